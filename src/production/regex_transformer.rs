//! Rule-based text transformer
//!
//! Rules live in a JSON file and are compiled into regexes the first time a
//! file is transformed. Compilation happens once per transformer, no matter
//! how many detection threads hit it at the same time.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::traits::{FileTransformer, TransformError};

/// One substitution applied to the whole input
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RewriteRule {
    pub pattern: String,
    /// Replacement text, may reference capture groups (`$1`, `${name}`)
    pub replacement: String,
}

/// On-disk rules file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuleSet {
    pub rules: Vec<RewriteRule>,
}

#[derive(Debug)]
struct CompiledRules {
    rules: Vec<(Regex, String)>,
}

impl CompiledRules {
    fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        let set: RuleSet = serde_json::from_str(&raw)
            .map_err(|e| format!("cannot parse {}: {}", path.display(), e))?;

        let mut rules = Vec::with_capacity(set.rules.len());
        for rule in set.rules {
            let regex = Regex::new(&rule.pattern)
                .map_err(|e| format!("bad pattern '{}': {}", rule.pattern, e))?;
            rules.push((regex, rule.replacement));
        }
        Ok(Self { rules })
    }

    fn apply(&self, input: &str) -> String {
        let mut text = input.to_string();
        for (regex, replacement) in &self.rules {
            text = regex.replace_all(&text, replacement.as_str()).into_owned();
        }
        text
    }
}

/// Transformer driven by a JSON rules file
#[derive(Debug)]
pub struct RegexTransformer {
    rules_path: PathBuf,
    compiled: OnceLock<Result<CompiledRules, String>>,
}

impl RegexTransformer {
    /// Fails if `rules_path` is empty or does not point to a file.
    /// The file is only parsed on first use.
    pub fn new(rules_path: impl Into<PathBuf>) -> Result<Self, TransformError> {
        let rules_path = rules_path.into();
        if rules_path.as_os_str().is_empty() {
            return Err(TransformError::InvalidRules("rules path is empty".into()));
        }
        if !rules_path.is_file() {
            return Err(TransformError::InvalidRules(format!(
                "rules file not found: {}",
                rules_path.display()
            )));
        }
        Ok(Self {
            rules_path,
            compiled: OnceLock::new(),
        })
    }

    pub fn rules_path(&self) -> &Path {
        &self.rules_path
    }

    fn rules(&self) -> Result<&CompiledRules, TransformError> {
        self.compiled
            .get_or_init(|| {
                tracing::info!(path = %self.rules_path.display(), "Compiling transformation rules");
                CompiledRules::load(&self.rules_path)
            })
            .as_ref()
            .map_err(|e| TransformError::InvalidRules(e.clone()))
    }
}

impl FileTransformer for RegexTransformer {
    fn transform(&self, input: &Path, output: &mut Vec<u8>) -> Result<(), TransformError> {
        let rules = self.rules()?;

        let bytes = std::fs::read(input).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TransformError::InputNotFound(input.to_path_buf()),
            _ => TransformError::Io(e),
        })?;
        let text = String::from_utf8(bytes)
            .map_err(|_| TransformError::Encoding(input.to_path_buf()))?;

        let transformed = rules.apply(&text);
        output.extend_from_slice(transformed.as_bytes());
        tracing::debug!(
            path = %input.display(),
            rules = rules.rules.len(),
            bytes = transformed.len(),
            "Transformed file"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write_rules(dir: &TempDir, rules: &[(&str, &str)]) -> PathBuf {
        let set = RuleSet {
            rules: rules
                .iter()
                .map(|(pattern, replacement)| RewriteRule {
                    pattern: pattern.to_string(),
                    replacement: replacement.to_string(),
                })
                .collect(),
        };
        let path = dir.path().join("rules.json");
        std::fs::write(&path, serde_json::to_string(&set).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_new_rejects_empty_path() {
        assert!(matches!(
            RegexTransformer::new(""),
            Err(TransformError::InvalidRules(_))
        ));
    }

    #[test]
    fn test_new_rejects_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            RegexTransformer::new(dir.path().join("missing.json")),
            Err(TransformError::InvalidRules(_))
        ));
    }

    #[test]
    fn test_transform_applies_rules_in_order() {
        let dir = TempDir::new().unwrap();
        let rules = write_rules(
            &dir,
            &[
                (r"<title>(.*?)</title>", "<h1>$1</h1>"),
                (r"<h1>", "<h1 class=\"book\">"),
            ],
        );
        let input = dir.path().join("books.xml");
        std::fs::write(&input, "<title>Dune</title>").unwrap();

        let transformer = RegexTransformer::new(rules).unwrap();
        let mut out = Vec::new();
        transformer.transform(&input, &mut out).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "<h1 class=\"book\">Dune</h1>");
    }

    #[test]
    fn test_transform_missing_input() {
        let dir = TempDir::new().unwrap();
        let transformer = RegexTransformer::new(write_rules(&dir, &[])).unwrap();
        let mut out = Vec::new();

        let result = transformer.transform(&dir.path().join("gone.xml"), &mut out);

        assert!(matches!(result, Err(TransformError::InputNotFound(_))));
        assert!(out.is_empty());
    }

    #[test]
    fn test_transform_rejects_binary_input() {
        let dir = TempDir::new().unwrap();
        let transformer = RegexTransformer::new(write_rules(&dir, &[])).unwrap();
        let input = dir.path().join("blob.bin");
        std::fs::write(&input, [0xff, 0xfe, 0x00]).unwrap();
        let mut out = Vec::new();

        let result = transformer.transform(&input, &mut out);

        assert!(matches!(result, Err(TransformError::Encoding(_))));
        assert!(out.is_empty());
    }

    #[test]
    fn test_bad_pattern_is_reported_on_every_call() {
        let dir = TempDir::new().unwrap();
        let transformer = RegexTransformer::new(write_rules(&dir, &[("(", "x")])).unwrap();
        let input = dir.path().join("a.txt");
        std::fs::write(&input, "a").unwrap();

        for _ in 0..2 {
            let result = transformer.transform(&input, &mut Vec::new());
            assert!(matches!(result, Err(TransformError::InvalidRules(_))));
        }
    }

    #[test]
    fn test_rules_compiled_once() {
        let dir = TempDir::new().unwrap();
        let rules_path = write_rules(&dir, &[("a", "b")]);
        let input = dir.path().join("a.txt");
        std::fs::write(&input, "aaa").unwrap();

        let transformer = RegexTransformer::new(&rules_path).unwrap();
        transformer.transform(&input, &mut Vec::new()).unwrap();

        // Later edits to the rules file are not picked up by this instance
        std::fs::write(&rules_path, r#"{"rules":[{"pattern":"a","replacement":"c"}]}"#).unwrap();
        let mut out = Vec::new();
        transformer.transform(&input, &mut out).unwrap();
        assert_eq!(out, b"bbb");
    }

    #[test]
    fn test_concurrent_first_use() {
        let dir = TempDir::new().unwrap();
        let transformer =
            Arc::new(RegexTransformer::new(write_rules(&dir, &[("x", "y")])).unwrap());
        let input = dir.path().join("a.txt");
        std::fs::write(&input, "xx").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let transformer = Arc::clone(&transformer);
                let input = input.clone();
                std::thread::spawn(move || {
                    let mut out = Vec::new();
                    transformer.transform(&input, &mut out).unwrap();
                    out
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), b"yy");
        }
    }
}
