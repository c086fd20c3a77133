//! End-to-end integration tests for the fileflow pipeline.
//!
//! Tests the full flow: File Event → Lock-Retry Gate → Transform → Write → Notify

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use fileflow_lib::mocks::{InMemoryFileSystem, ManualFileWatcher, RecordedTransformer};
use fileflow_lib::production::{
    LocalFileSystem, LockRetry, NotifyFileWatcher, RegexTransformer, RewriteRule, RuleSet,
    WatcherOptions,
};
use fileflow_lib::traits::FileWatcher;
use fileflow_lib::{FileProcessor, OutputLocation, ProcessedFile};

/// Outcome of one detection as seen by the processor's observers
#[derive(Debug)]
enum Outcome {
    Processed(ProcessedFile),
    Failed(String),
}

fn observe(processor: &FileProcessor) -> mpsc::Receiver<Outcome> {
    let (tx, rx) = mpsc::channel();
    let processed_tx = Mutex::new(tx.clone());
    processor.on_file_processed(move |record| {
        let _ = processed_tx
            .lock()
            .unwrap()
            .send(Outcome::Processed(record.clone()));
    });
    let error_tx = Mutex::new(tx);
    processor.on_error(move |error| {
        let _ = error_tx
            .lock()
            .unwrap()
            .send(Outcome::Failed(format!("{}: {}", error, error.source)));
    });
    rx
}

fn write_rules(dir: &Path) -> PathBuf {
    let rules = RuleSet {
        rules: vec![
            RewriteRule {
                pattern: r"<book>(.*?)</book>".to_string(),
                replacement: "<li>$1</li>".to_string(),
            },
            RewriteRule {
                pattern: r"<books>".to_string(),
                replacement: "<ul>".to_string(),
            },
            RewriteRule {
                pattern: r"</books>".to_string(),
                replacement: "</ul>".to_string(),
            },
        ],
    };
    let path = dir.join("books-to-html.json");
    std::fs::write(&path, serde_json::to_string_pretty(&rules).unwrap()).unwrap();
    path
}

/// Real watcher, disk and transformer wired together
struct LivePipeline {
    input: TempDir,
    output: TempDir,
    _rules: TempDir,
    processor: FileProcessor,
    outcomes: mpsc::Receiver<Outcome>,
}

fn live_pipeline(filter: &str, output_extension: Option<&str>) -> LivePipeline {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let rules = TempDir::new().unwrap();

    let transformer = Arc::new(RegexTransformer::new(write_rules(rules.path())).unwrap());
    let watcher = Arc::new(
        NotifyFileWatcher::new(
            WatcherOptions::new(input.path())
                .with_filter(filter)
                .with_debounce(Duration::from_millis(50))
                .with_lock_retry(LockRetry::new(5, Duration::from_millis(20))),
        )
        .unwrap(),
    );
    let processor = FileProcessor::new(transformer, watcher, Arc::new(LocalFileSystem::new()));

    let mut location = OutputLocation::new(output.path());
    if let Some(extension) = output_extension {
        location = location.with_extension(extension);
    }
    processor.set_output_location(location).unwrap();
    let outcomes = observe(&processor);

    LivePipeline {
        input,
        output,
        _rules: rules,
        processor,
        outcomes,
    }
}

#[test]
fn test_mock_pipeline_event_to_output() {
    let watcher = Arc::new(ManualFileWatcher::new());
    let fs = Arc::new(InMemoryFileSystem::with_directories(&["/out"]));
    let transformer = Arc::new(RecordedTransformer::echo("<html/>"));
    let processor = FileProcessor::new(transformer.clone(), watcher.clone(), fs.clone());
    processor
        .set_output_location(OutputLocation::new("/out").with_extension("html"))
        .unwrap();
    let outcomes = observe(&processor);

    // 1. Events before start are not observed
    watcher.simulate_event(PathBuf::from("/in/early.xml"));
    assert!(outcomes.try_recv().is_err());

    // 2. Start → watcher enabled
    processor.start().unwrap();
    assert!(watcher.is_enabled());

    // 3. Detection → transform → write → notify
    watcher.simulate_event(PathBuf::from("/in/books.xml"));
    match outcomes.try_recv().unwrap() {
        Outcome::Processed(record) => {
            assert_eq!(record.input, PathBuf::from("/in/books.xml"));
            assert_eq!(record.output, PathBuf::from("/out/books.html"));
        }
        Outcome::Failed(e) => panic!("Unexpected failure: {}", e),
    }
    assert_eq!(fs.read(Path::new("/out/books.html")).unwrap(), b"<html/>");

    // 4. Stop → no further notifications
    processor.stop();
    watcher.simulate_event(PathBuf::from("/in/late.xml"));
    assert!(outcomes.try_recv().is_err());
    assert_eq!(transformer.calls().len(), 1);
}

#[test]
fn test_mock_pipeline_restart_after_stop() {
    let watcher = Arc::new(ManualFileWatcher::new());
    let fs = Arc::new(InMemoryFileSystem::with_directories(&["/out"]));
    let processor = FileProcessor::new(
        Arc::new(RecordedTransformer::echo("x")),
        watcher.clone(),
        fs.clone(),
    );
    processor
        .set_output_location(OutputLocation::new("/out"))
        .unwrap();
    let outcomes = observe(&processor);

    processor.start().unwrap();
    processor.stop();
    processor.start().unwrap();

    watcher.simulate_event(PathBuf::from("/in/a.xml"));
    assert!(matches!(outcomes.try_recv().unwrap(), Outcome::Processed(_)));
    assert_eq!(watcher.enable_calls(), 2);
}

#[test]
fn test_live_pipeline_transforms_new_file() {
    let pipeline = live_pipeline("*.xml", Some("html"));
    pipeline.processor.start().unwrap();

    let source = pipeline.input.path().join("books.xml");
    std::fs::write(&source, "<books><book>Dune</book></books>").unwrap();

    match pipeline.outcomes.recv_timeout(Duration::from_secs(5)).unwrap() {
        Outcome::Processed(record) => {
            assert_eq!(record.input.file_name(), source.file_name());
            assert_eq!(
                record.output,
                pipeline.output.path().join("books.html")
            );
            let written = std::fs::read_to_string(&record.output).unwrap();
            assert_eq!(written, "<ul><li>Dune</li></ul>");
        }
        Outcome::Failed(e) => panic!("Unexpected failure: {}", e),
    }

    pipeline.processor.dispose();
}

#[test]
fn test_live_pipeline_ignores_non_matching_files() {
    let pipeline = live_pipeline("*.xml", None);
    pipeline.processor.start().unwrap();

    std::fs::write(pipeline.input.path().join("notes.txt"), "hello").unwrap();

    assert!(pipeline
        .outcomes
        .recv_timeout(Duration::from_millis(800))
        .is_err());
    assert_eq!(std::fs::read_dir(pipeline.output.path()).unwrap().count(), 0);
}

#[test]
fn test_live_pipeline_rename_into_place_processed_once() {
    let pipeline = live_pipeline("*.xml", None);
    pipeline.processor.start().unwrap();

    let partial = pipeline.input.path().join("books.part");
    let complete = pipeline.input.path().join("books.xml");
    std::fs::write(&partial, "<books></books>").unwrap();
    std::fs::rename(&partial, &complete).unwrap();

    match pipeline.outcomes.recv_timeout(Duration::from_secs(5)).unwrap() {
        Outcome::Processed(record) => {
            assert_eq!(record.input.file_name(), complete.file_name());
        }
        Outcome::Failed(e) => panic!("Unexpected failure: {}", e),
    }
    assert!(pipeline
        .outcomes
        .recv_timeout(Duration::from_millis(800))
        .is_err());
}

#[test]
fn test_live_pipeline_collision_is_reported_not_overwritten() {
    let pipeline = live_pipeline("*.xml", None);
    std::fs::write(pipeline.output.path().join("books.xml"), "existing").unwrap();
    pipeline.processor.start().unwrap();

    std::fs::write(pipeline.input.path().join("books.xml"), "<books></books>").unwrap();

    match pipeline.outcomes.recv_timeout(Duration::from_secs(5)).unwrap() {
        Outcome::Failed(message) => assert!(message.contains("books.xml")),
        Outcome::Processed(record) => panic!("Unexpected success: {:?}", record),
    }
    assert_eq!(
        std::fs::read_to_string(pipeline.output.path().join("books.xml")).unwrap(),
        "existing"
    );
}

#[test]
fn test_live_pipeline_silent_after_dispose() {
    let pipeline = live_pipeline("*", None);
    pipeline.processor.start().unwrap();
    pipeline.processor.dispose();

    std::fs::write(pipeline.input.path().join("late.xml"), "<books></books>").unwrap();

    assert!(pipeline
        .outcomes
        .recv_timeout(Duration::from_millis(800))
        .is_err());
}
