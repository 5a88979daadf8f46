//! The execution context: scalar state shared across the steps of one run.
//!
//! Values are bounded to scalars because the context must be durable across
//! crash restarts; anything larger belongs in a side store with the handle
//! passed through the context. Only the step whose body is currently running
//! writes, so puts overwrite without conflict detection.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A scalar context value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ContextValue {
    /// A UTF-8 string.
    String(String),
    /// A 64-bit signed integer.
    Long(i64),
    /// A 64-bit float.
    Double(f64),
    /// A boolean.
    Bool(bool),
}

/// Thread-safe string -> scalar map carried through one execution.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    entries: RwLock<BTreeMap<String, ContextValue>>,
}

impl ExecutionContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value, overwriting any previous entry.
    pub fn put(&self, key: impl Into<String>, value: ContextValue) {
        self.entries.write().insert(key.into(), value);
    }

    /// Stores a string value.
    pub fn put_string(&self, key: impl Into<String>, value: impl Into<String>) {
        self.put(key, ContextValue::String(value.into()));
    }

    /// Stores a long value.
    pub fn put_long(&self, key: impl Into<String>, value: i64) {
        self.put(key, ContextValue::Long(value));
    }

    /// Stores a double value.
    pub fn put_double(&self, key: impl Into<String>, value: f64) {
        self.put(key, ContextValue::Double(value));
    }

    /// Stores a bool value.
    pub fn put_bool(&self, key: impl Into<String>, value: bool) {
        self.put(key, ContextValue::Bool(value));
    }

    /// Returns a copy of the value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<ContextValue> {
        self.entries.read().get(key).cloned()
    }

    /// Returns a string value.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(ContextValue::String(v)) => Some(v),
            _ => None,
        }
    }

    /// Returns a long value.
    #[must_use]
    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(ContextValue::Long(v)) => Some(v),
            _ => None,
        }
    }

    /// Returns a double value.
    #[must_use]
    pub fn get_double(&self, key: &str) -> Option<f64> {
        match self.get(key) {
            Some(ContextValue::Double(v)) => Some(v),
            _ => None,
        }
    }

    /// Returns a bool value.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(ContextValue::Bool(v)) => Some(v),
            _ => None,
        }
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the context is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Serializes the context for persistence.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(&*self.entries.read()).unwrap_or_else(|_| "{}".to_string())
    }

    /// Restores a context from its persisted form.
    ///
    /// # Errors
    ///
    /// Returns the serde error message when the snapshot is corrupt.
    pub fn from_json(raw: &str) -> Result<Self, String> {
        let entries: BTreeMap<String, ContextValue> =
            serde_json::from_str(raw).map_err(|e| e.to_string())?;
        Ok(Self {
            entries: RwLock::new(entries),
        })
    }
}

impl Clone for ExecutionContext {
    fn clone(&self) -> Self {
        Self {
            entries: RwLock::new(self.entries.read().clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_typed_getters() {
        let ctx = ExecutionContext::new();
        ctx.put_string("inputFilePath", "/tmp/input_job_7.dat");
        ctx.put_long("fileSizeBytes", 524_288_000);
        ctx.put_double("compressionRatio", 42.5);
        ctx.put_bool("verified", true);

        assert_eq!(
            ctx.get_string("inputFilePath").as_deref(),
            Some("/tmp/input_job_7.dat")
        );
        assert_eq!(ctx.get_long("fileSizeBytes"), Some(524_288_000));
        assert_eq!(ctx.get_double("compressionRatio"), Some(42.5));
        assert_eq!(ctx.get_bool("verified"), Some(true));
        assert_eq!(ctx.get_long("inputFilePath"), None);
    }

    #[test]
    fn test_put_overwrites() {
        let ctx = ExecutionContext::new();
        ctx.put_long("chunksProcessed", 1);
        ctx.put_long("chunksProcessed", 2);
        assert_eq!(ctx.get_long("chunksProcessed"), Some(2));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_json_round_trip() {
        let ctx = ExecutionContext::new();
        ctx.put_string("checksum", "ab12");
        ctx.put_long("recordCount", 100_000);

        let restored = ExecutionContext::from_json(&ctx.to_json()).unwrap();
        assert_eq!(restored.get_string("checksum").as_deref(), Some("ab12"));
        assert_eq!(restored.get_long("recordCount"), Some(100_000));
    }

    #[test]
    fn test_clone_is_a_snapshot() {
        let ctx = ExecutionContext::new();
        ctx.put_long("a", 1);
        let snapshot = ctx.clone();
        ctx.put_long("a", 2);
        assert_eq!(snapshot.get_long("a"), Some(1));
    }

    #[test]
    fn test_corrupt_snapshot_rejected() {
        assert!(ExecutionContext::from_json("not json").is_err());
    }
}
