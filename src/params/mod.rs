//! Typed job parameters.
//!
//! Each parameter is a scalar tagged as identifying or non-identifying. Two
//! executions whose identifying parameters are equal belong to the same job
//! instance, so the coordinator always injects a `triggerId` and an
//! epoch-millis `timestamp` (both identifying) to keep every run unique.

use crate::errors::BatchflowError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// The declared type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// A UTF-8 string.
    String,
    /// A 64-bit signed integer.
    Long,
    /// A 64-bit float.
    Double,
    /// A boolean.
    Bool,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Long => write!(f, "long"),
            Self::Double => write!(f, "double"),
            Self::Bool => write!(f, "bool"),
        }
    }
}

/// A scalar parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ParamValue {
    /// A UTF-8 string.
    String(String),
    /// A 64-bit signed integer.
    Long(i64),
    /// A 64-bit float.
    Double(f64),
    /// A boolean.
    Bool(bool),
}

impl ParamValue {
    /// Returns the kind of this value.
    #[must_use]
    pub fn kind(&self) -> ParamKind {
        match self {
            Self::String(_) => ParamKind::String,
            Self::Long(_) => ParamKind::Long,
            Self::Double(_) => ParamKind::Double,
            Self::Bool(_) => ParamKind::Bool,
        }
    }

    /// Coerces a raw string to a value of the declared kind.
    ///
    /// # Errors
    ///
    /// Returns `ParameterCoercion` if the raw string does not parse as the
    /// declared kind.
    pub fn coerce(kind: ParamKind, key: &str, raw: &str) -> Result<Self, BatchflowError> {
        let coercion_error = || BatchflowError::ParameterCoercion {
            key: key.to_string(),
            expected: kind,
            value: raw.to_string(),
        };
        match kind {
            ParamKind::String => Ok(Self::String(raw.to_string())),
            ParamKind::Long => raw.trim().parse::<i64>().map(Self::Long).map_err(|_| coercion_error()),
            ParamKind::Double => raw
                .trim()
                .parse::<f64>()
                .map(Self::Double)
                .map_err(|_| coercion_error()),
            ParamKind::Bool => match raw.trim() {
                "true" | "TRUE" | "True" => Ok(Self::Bool(true)),
                "false" | "FALSE" | "False" => Ok(Self::Bool(false)),
                _ => Err(coercion_error()),
            },
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// A parameter value plus its identifying flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    /// The scalar value.
    pub value: ParamValue,
    /// Whether this parameter contributes to job-instance identity.
    pub identifying: bool,
}

/// The full parameter set of one execution.
///
/// Keys are kept ordered so the identity digest is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    entries: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a builder.
    #[must_use]
    pub fn builder() -> JobParametersBuilder {
        JobParametersBuilder::default()
    }

    /// Returns the value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries.get(key).map(|p| &p.value)
    }

    /// Returns a string parameter.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(ParamValue::String(v)) => Some(v),
            _ => None,
        }
    }

    /// Returns a long parameter.
    #[must_use]
    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(ParamValue::Long(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns a double parameter.
    #[must_use]
    pub fn get_double(&self, key: &str) -> Option<f64> {
        match self.get(key) {
            Some(ParamValue::Double(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns a bool parameter.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(ParamValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no parameters are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &JobParameter)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates over identifying entries in key order.
    pub fn identifying(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries
            .iter()
            .filter(|(_, p)| p.identifying)
            .map(|(k, p)| (k.as_str(), &p.value))
    }

    /// Digest over the identifying parameters.
    ///
    /// Executions sharing this digest (and job name) share a job instance.
    #[must_use]
    pub fn job_key(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, value) in self.identifying() {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.kind().to_string().as_bytes());
            hasher.update(b":");
            hasher.update(value.to_string().as_bytes());
            hasher.update(b";");
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    /// Serializes the parameter set for persistence.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.entries).unwrap_or_else(|_| "{}".to_string())
    }

    /// Restores a parameter set from its persisted form.
    ///
    /// # Errors
    ///
    /// Returns the serde error message when the snapshot is corrupt.
    pub fn from_json(raw: &str) -> Result<Self, String> {
        let entries: BTreeMap<String, JobParameter> =
            serde_json::from_str(raw).map_err(|e| e.to_string())?;
        Ok(Self { entries })
    }
}

/// Builder for [`JobParameters`].
#[derive(Debug, Default)]
pub struct JobParametersBuilder {
    entries: BTreeMap<String, JobParameter>,
}

impl JobParametersBuilder {
    /// Adds a string parameter.
    #[must_use]
    pub fn add_string(self, key: impl Into<String>, value: impl Into<String>, identifying: bool) -> Self {
        self.add(key, ParamValue::String(value.into()), identifying)
    }

    /// Adds a long parameter.
    #[must_use]
    pub fn add_long(self, key: impl Into<String>, value: i64, identifying: bool) -> Self {
        self.add(key, ParamValue::Long(value), identifying)
    }

    /// Adds a double parameter.
    #[must_use]
    pub fn add_double(self, key: impl Into<String>, value: f64, identifying: bool) -> Self {
        self.add(key, ParamValue::Double(value), identifying)
    }

    /// Adds a bool parameter.
    #[must_use]
    pub fn add_bool(self, key: impl Into<String>, value: bool, identifying: bool) -> Self {
        self.add(key, ParamValue::Bool(value), identifying)
    }

    /// Adds an already-typed parameter.
    #[must_use]
    pub fn add(mut self, key: impl Into<String>, value: ParamValue, identifying: bool) -> Self {
        self.entries
            .insert(key.into(), JobParameter { value, identifying });
        self
    }

    /// Finishes the builder.
    #[must_use]
    pub fn build(self) -> JobParameters {
        JobParameters {
            entries: self.entries,
        }
    }
}

/// A parameter a job definition recognizes: name, type, default, identity.
#[derive(Debug, Clone)]
pub struct ParameterKey {
    /// The parameter name.
    pub name: String,
    /// The declared type.
    pub kind: ParamKind,
    /// Value applied when the caller omits the parameter.
    pub default: Option<ParamValue>,
    /// Whether the parameter contributes to job-instance identity.
    pub identifying: bool,
}

impl ParameterKey {
    /// Declares a string parameter.
    #[must_use]
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::String)
    }

    /// Declares a long parameter.
    #[must_use]
    pub fn long(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Long)
    }

    /// Declares a double parameter.
    #[must_use]
    pub fn double(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Double)
    }

    /// Declares a bool parameter.
    #[must_use]
    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Bool)
    }

    fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            identifying: false,
        }
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, value: ParamValue) -> Self {
        self.default = Some(value);
        self
    }

    /// Marks the parameter as identifying.
    #[must_use]
    pub fn identifying(mut self) -> Self {
        self.identifying = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_typed_getters() {
        let params = JobParameters::builder()
            .add_string("triggerId", "abc", true)
            .add_long("timestamp", 1_700_000_000_000, true)
            .add_double("threshold", 0.5, false)
            .add_bool("dryRun", true, false)
            .build();

        assert_eq!(params.get_string("triggerId"), Some("abc"));
        assert_eq!(params.get_long("timestamp"), Some(1_700_000_000_000));
        assert_eq!(params.get_double("threshold"), Some(0.5));
        assert_eq!(params.get_bool("dryRun"), Some(true));
        assert_eq!(params.get_long("triggerId"), None);
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_job_key_depends_only_on_identifying_entries() {
        let a = JobParameters::builder()
            .add_string("triggerId", "abc", true)
            .add_string("county", "alameda", false)
            .build();
        let b = JobParameters::builder()
            .add_string("triggerId", "abc", true)
            .add_string("county", "fresno", false)
            .build();
        let c = JobParameters::builder()
            .add_string("triggerId", "xyz", true)
            .build();

        assert_eq!(a.job_key(), b.job_key());
        assert_ne!(a.job_key(), c.job_key());
    }

    #[test]
    fn test_job_key_is_order_independent() {
        let a = JobParameters::builder()
            .add_string("b", "2", true)
            .add_string("a", "1", true)
            .build();
        let b = JobParameters::builder()
            .add_string("a", "1", true)
            .add_string("b", "2", true)
            .build();
        assert_eq!(a.job_key(), b.job_key());
    }

    #[test]
    fn test_coerce_long() {
        let value = ParamValue::coerce(ParamKind::Long, "fileSizeMB", "500").unwrap();
        assert_eq!(value, ParamValue::Long(500));

        let err = ParamValue::coerce(ParamKind::Long, "fileSizeMB", "big").unwrap_err();
        assert!(err.to_string().contains("fileSizeMB"));
    }

    #[test]
    fn test_coerce_bool() {
        assert_eq!(
            ParamValue::coerce(ParamKind::Bool, "streamToDb", "true").unwrap(),
            ParamValue::Bool(true)
        );
        assert!(ParamValue::coerce(ParamKind::Bool, "streamToDb", "yes").is_err());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let params = JobParameters::builder()
            .add_string("triggerId", "abc", true)
            .add_long("timestamp", 123, true)
            .add_double("ratio", 1.25, false)
            .build();

        let restored = JobParameters::from_json(&params.to_json()).unwrap();
        assert_eq!(restored, params);
        assert_eq!(restored.job_key(), params.job_key());
    }

    #[test]
    fn test_parameter_key_builder() {
        let key = ParameterKey::long("recordCount")
            .with_default(ParamValue::Long(100_000))
            .identifying();
        assert_eq!(key.kind, ParamKind::Long);
        assert!(key.identifying);
        assert_eq!(key.default, Some(ParamValue::Long(100_000)));
    }
}
