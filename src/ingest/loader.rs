use serde::Deserialize;
use std::path::Path;

use crate::error::{CitegraphError, Result};
use crate::records::{RawBatch, RawRecord};

/// Trait for batch file loaders
pub trait BatchLoader {
    /// Check if this loader can handle the given file extension
    fn can_load(&self, extension: &str) -> bool;

    /// Parse file content into a batch of raw records
    fn load(&self, content: &str, source: &str) -> Result<RawBatch>;
}

/// Top-level shape shared by `.json` and `.yaml` batches: a bare sequence or
/// a `records` wrapper. Elements stay untyped so each converts on its own.
#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<V> {
    Records(Vec<V>),
    Wrapped { records: Vec<V> },
}

impl<V> Envelope<V> {
    fn into_records(self) -> Vec<V> {
        match self {
            Envelope::Records(records) => records,
            Envelope::Wrapped { records } => records,
        }
    }
}

/// Convert elements one at a time. A malformed element is an upstream data
/// failure: logged with its position, counted and dropped.
fn collect_records<V, E, F>(source: &str, values: Vec<V>, convert: F) -> RawBatch
where
    E: std::fmt::Display,
    F: Fn(V) -> std::result::Result<RawRecord, E>,
{
    let mut batch = RawBatch::new(source, Vec::with_capacity(values.len()));
    for (index, value) in values.into_iter().enumerate() {
        match convert(value) {
            Ok(record) => batch.records.push(record),
            Err(e) => {
                let err = CitegraphError::Upstream(format!("{}[{}]: {}", source, index, e));
                log::warn!("{} ({}), record skipped", err, err.class());
                batch.upstream_failures += 1;
            }
        }
    }
    batch
}

/// `.json`: either a top-level array or `{ "records": [...] }`.
pub struct JsonLoader;

impl BatchLoader for JsonLoader {
    fn can_load(&self, extension: &str) -> bool {
        extension == "json"
    }

    fn load(&self, content: &str, source: &str) -> Result<RawBatch> {
        let envelope: Envelope<serde_json::Value> = serde_json::from_str(content)
            .map_err(|e| CitegraphError::Parse(format!("JSON batch {}: {}", source, e)))?;
        Ok(collect_records(source, envelope.into_records(), serde_json::from_value::<RawRecord>))
    }
}

/// `.jsonl` / `.ndjson`: one record per line. A malformed line is an upstream
/// data failure: it is logged and dropped, the rest of the batch survives.
pub struct JsonLinesLoader;

impl BatchLoader for JsonLinesLoader {
    fn can_load(&self, extension: &str) -> bool {
        matches!(extension, "jsonl" | "ndjson")
    }

    fn load(&self, content: &str, source: &str) -> Result<RawBatch> {
        let mut batch = RawBatch::new(source, Vec::new());
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawRecord>(line) {
                Ok(record) => batch.records.push(record),
                Err(e) => {
                    let err = CitegraphError::Upstream(format!("{}:{}: {}", source, lineno + 1, e));
                    log::warn!("{} ({}), line skipped", err, err.class());
                    batch.upstream_failures += 1;
                }
            }
        }
        Ok(batch)
    }
}

/// `.yaml` / `.yml`: a sequence of records or a `records:` mapping.
pub struct YamlLoader;

impl BatchLoader for YamlLoader {
    fn can_load(&self, extension: &str) -> bool {
        matches!(extension, "yaml" | "yml")
    }

    fn load(&self, content: &str, source: &str) -> Result<RawBatch> {
        let envelope: Envelope<serde_yaml_ng::Value> = serde_yaml_ng::from_str(content)
            .map_err(|e| CitegraphError::Parse(format!("YAML batch {}: {}", source, e)))?;
        Ok(collect_records(source, envelope.into_records(), serde_yaml_ng::from_value::<RawRecord>))
    }
}

/// Loader registry that selects the appropriate loader by extension
pub struct LoaderRegistry {
    loaders: Vec<Box<dyn BatchLoader + Send + Sync>>,
}

impl LoaderRegistry {
    /// Create a registry with all built-in loaders
    pub fn new() -> Self {
        let mut registry = Self { loaders: Vec::new() };
        registry.register(Box::new(JsonLoader));
        registry.register(Box::new(JsonLinesLoader));
        registry.register(Box::new(YamlLoader));
        registry
    }

    pub fn register(&mut self, loader: Box<dyn BatchLoader + Send + Sync>) {
        self.loaders.push(loader);
    }

    pub fn find_loader(&self, extension: &str) -> Option<&(dyn BatchLoader + Send + Sync)> {
        self.loaders
            .iter()
            .find(|l| l.can_load(extension))
            .map(|l| l.as_ref())
    }

    pub fn supports(&self, extension: &str) -> bool {
        self.find_loader(extension).is_some()
    }

    /// Parse content with the loader registered for `extension`.
    pub fn load(&self, content: &str, source: &str, extension: &str) -> Result<RawBatch> {
        let loader = self.find_loader(extension).ok_or_else(|| {
            CitegraphError::Parse(format!("No loader found for extension: {}", extension))
        })?;
        loader.load(content, source)
    }

    /// Read and parse a batch file from disk.
    pub fn load_path(&self, path: &Path) -> Result<RawBatch> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        let content = std::fs::read_to_string(path)?;
        let batch = self.load(&content, &path.display().to_string(), &extension)?;
        log::info!(
            "loaded {} record(s) from {} ({} malformed)",
            batch.len(),
            path.display(),
            batch.upstream_failures
        );
        Ok(batch)
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_by_extension() {
        let registry = LoaderRegistry::new();
        assert!(registry.supports("json"));
        assert!(registry.supports("jsonl"));
        assert!(registry.supports("ndjson"));
        assert!(registry.supports("yaml"));
        assert!(registry.supports("yml"));
        assert!(!registry.supports("xml"));
        assert!(registry.load("<x/>", "a.xml", "xml").is_err());
    }

    #[test]
    fn test_json_array_and_wrapped() {
        let registry = LoaderRegistry::new();
        let plain = registry
            .load(r#"[{"title": "A"}, {"title": "B"}]"#, "a.json", "json")
            .unwrap();
        assert_eq!(plain.len(), 2);

        let wrapped = registry
            .load(r#"{"records": [{"title": "A"}]}"#, "b.json", "json")
            .unwrap();
        assert_eq!(wrapped.len(), 1);
        assert_eq!(wrapped.source, "b.json");
    }

    #[test]
    fn test_jsonl_skips_bad_lines() {
        let content = "{\"title\": \"A\"}\nnot json\n\n{\"title\": \"B\"}\n";
        let batch = JsonLinesLoader.load(content, "x.jsonl").unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.upstream_failures, 1);
    }

    #[test]
    fn test_yaml_batch() {
        let content = "records:\n  - title: A\n    authors: [Alice, Bob]\n    concepts: NULL\n";
        let batch = YamlLoader.load(content, "x.yaml").unwrap();
        assert_eq!(batch.records[0].authors, vec!["Alice", "Bob"]);
        assert_eq!(batch.records[0].concepts, None);
    }

    #[test]
    fn test_json_bad_record_keeps_the_rest() {
        let content = r#"[{"title": "Good", "authors": ["A"]}, {"title": "Bad", "authors": ["B"], "concepts": "ML"}]"#;
        let batch = JsonLoader.load(content, "x.json").unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.records[0].title.as_deref(), Some("Good"));
        assert_eq!(batch.records[0].authors, vec!["A"]);
        assert_eq!(batch.upstream_failures, 1);

        let wrapped = JsonLoader
            .load(r#"{"records": [{"title": "A", "authors": "x"}, {"title": "B"}]}"#, "y.json")
            .unwrap();
        assert_eq!(wrapped.len(), 1);
        assert_eq!(wrapped.records[0].title.as_deref(), Some("B"));
        assert_eq!(wrapped.upstream_failures, 1);
    }

    #[test]
    fn test_yaml_bad_record_keeps_the_rest() {
        let content = "- title: Good\n  authors: [A]\n- title: Bad\n  concepts: ML\n- title: Also good\n";
        let batch = YamlLoader.load(content, "x.yaml").unwrap();
        let titles: Vec<_> = batch.records.iter().map(|r| r.title.as_deref().unwrap()).collect();
        assert_eq!(titles, vec!["Good", "Also good"]);
        assert_eq!(batch.upstream_failures, 1);
    }

    #[test]
    fn test_non_record_document_is_parse_error() {
        assert!(JsonLoader.load(r#""just a string""#, "s.json").is_err());
        assert!(YamlLoader.load("42", "s.yaml").is_err());
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = JsonLoader.load("{not json", "bad.json").unwrap_err();
        assert_eq!(err.class(), "UpstreamDataFailure");
    }
}
