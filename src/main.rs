use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use fileflow_lib::config::{AppConfig, ConfigOverrides};
use fileflow_lib::production::{LocalFileSystem, NotifyFileWatcher, RegexTransformer};
use fileflow_lib::{init_logging, FileProcessor};

/// Watch a directory and write a transformed copy of every new file
#[derive(Debug, Parser)]
#[command(name = "fileflow", version, about)]
struct Cli {
    /// JSON config file; flags below override its values
    #[arg(short, long, env = "FILEFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Directory to watch
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Directory transformed files are written to (created if missing)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Glob matched against new file names, e.g. "*.xml"
    #[arg(short, long)]
    filter: Option<String>,

    /// JSON rules file for the transformer
    #[arg(short, long)]
    rules: Option<PathBuf>,

    /// Replace the extension of output files, e.g. "html"
    #[arg(short, long)]
    extension: Option<String>,

    /// Also watch subdirectories
    #[arg(long)]
    recursive: bool,

    /// Write a daily rolling log file into this directory
    #[arg(long, env = "FILEFLOW_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            input_dir: self.input.clone(),
            output_dir: self.output.clone(),
            rules_path: self.rules.clone(),
            filter: self.filter.clone(),
            recursive: self.recursive,
            output_extension: self.extension.clone(),
            log_dir: self.log_dir.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    config.apply_overrides(cli.overrides());
    if config.input_dir.is_none() {
        config.input_dir = Some(std::env::current_dir()?);
    }
    config.validate()?;

    let _guard = init_logging(config.log_dir.as_deref())?;
    tracing::info!("fileflow starting up");

    let output = config.output_location()?;
    if !output.directory.is_dir() {
        tracing::info!(path = %output.directory.display(), "Creating output directory");
        std::fs::create_dir_all(&output.directory)?;
    }

    let rules_path = config.rules_path.clone().ok_or("rules_path is required")?;
    let transformer = Arc::new(RegexTransformer::new(rules_path)?);
    let watcher = Arc::new(NotifyFileWatcher::new(config.watcher_options()?)?);
    let processor = FileProcessor::new(transformer, watcher, Arc::new(LocalFileSystem::new()));
    processor.set_output_location(output)?;

    processor.on_started(|| tracing::info!("Listening for files..."));
    processor.on_stopped(|| tracing::info!("Processing stopped"));
    processor.on_file_processed(|record| {
        tracing::info!(
            input = %record.input.display(),
            output = %record.output.display(),
            "Wrote transformed file"
        );
    });
    processor.on_error(|error| {
        tracing::error!(error = %error, cause = %error.source, "Failed to process file");
    });

    processor.start()?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    processor.dispose();
    Ok(())
}
