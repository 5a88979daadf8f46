//! Fixed-width record schemas and codec.
//!
//! Outbound interface files (payment requests, warrant reconciliations) are
//! fixed-width. Each layout is a plain value: an ordered list of field
//! descriptors held in a registry keyed by schema name. The codec consumes
//! the descriptor list; step bodies that produce or parse interface files
//! look the schema up by name and never hard-code offsets.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Errors from schema construction and the fixed-width codec.
#[derive(Debug, Error)]
pub enum RecordLayoutError {
    /// The schema definition is invalid.
    #[error("invalid schema '{schema}': {message}")]
    InvalidSchema {
        /// The schema name.
        schema: String,
        /// What is wrong with it.
        message: String,
    },

    /// A required field has no value at encode time.
    #[error("field '{field}' is required but missing")]
    MissingField {
        /// The field name.
        field: String,
    },

    /// A value does not fit its field width.
    #[error("value for field '{field}' is {actual} chars, limit {limit}")]
    ValueTooLong {
        /// The field name.
        field: String,
        /// The declared width.
        limit: usize,
        /// The value's length.
        actual: usize,
    },

    /// An input line does not match the schema's total width.
    #[error("line is {actual} chars, schema '{schema}' expects {expected}")]
    LineLengthMismatch {
        /// The schema name.
        schema: String,
        /// The schema's total width.
        expected: usize,
        /// The line's length.
        actual: usize,
    },
}

/// Which side of the field the value sits on; padding fills the other side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    /// Value first, padding after. The usual choice for text.
    Left,
    /// Padding first, value after. The usual choice for zero-padded numbers.
    Right,
}

/// One column of a fixed-width layout.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// The field name, unique within its schema.
    pub name: String,
    /// Width in characters.
    pub length: usize,
    /// Fill character for unused width.
    pub pad_char: char,
    /// Which side the value aligns to.
    pub alignment: Alignment,
    /// Whether encoding fails when no value is supplied.
    pub required: bool,
}

impl FieldSpec {
    /// A left-aligned, space-padded text field.
    #[must_use]
    pub fn text(name: impl Into<String>, length: usize) -> Self {
        Self {
            name: name.into(),
            length,
            pad_char: ' ',
            alignment: Alignment::Left,
            required: true,
        }
    }

    /// A right-aligned, zero-padded numeric field.
    #[must_use]
    pub fn numeric(name: impl Into<String>, length: usize) -> Self {
        Self {
            name: name.into(),
            length,
            pad_char: '0',
            alignment: Alignment::Right,
            required: true,
        }
    }

    /// Marks the field as optional; missing values encode as pure padding.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Overrides the pad character.
    #[must_use]
    pub fn with_pad_char(mut self, pad_char: char) -> Self {
        self.pad_char = pad_char;
        self
    }
}

/// An ordered fixed-width layout, identified by name.
#[derive(Debug, Clone)]
pub struct RecordSchema {
    /// The schema name, e.g. `payment-request-sco`.
    pub name: String,
    /// Columns in file order.
    pub fields: Vec<FieldSpec>,
}

impl RecordSchema {
    /// Builds a schema, validating field names and widths.
    ///
    /// # Errors
    ///
    /// Returns an invalid-schema error for an empty field list, a zero-width
    /// field, or duplicate field names.
    pub fn new(
        name: impl Into<String>,
        fields: Vec<FieldSpec>,
    ) -> Result<Self, RecordLayoutError> {
        let name = name.into();
        if fields.is_empty() {
            return Err(RecordLayoutError::InvalidSchema {
                schema: name,
                message: "schema must declare at least one field".to_string(),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for field in &fields {
            if field.length == 0 {
                return Err(RecordLayoutError::InvalidSchema {
                    schema: name,
                    message: format!("field '{}' has zero width", field.name),
                });
            }
            if !seen.insert(field.name.as_str()) {
                return Err(RecordLayoutError::InvalidSchema {
                    schema: name,
                    message: format!("duplicate field name '{}'", field.name),
                });
            }
        }
        Ok(Self { name, fields })
    }

    /// Total line width of the layout.
    #[must_use]
    pub fn line_length(&self) -> usize {
        self.fields.iter().map(|f| f.length).sum()
    }

    /// Encodes one record into a fixed-width line.
    ///
    /// # Errors
    ///
    /// Returns a missing-field error for absent required values and a
    /// too-long error for values wider than their field.
    pub fn encode(&self, values: &BTreeMap<String, String>) -> Result<String, RecordLayoutError> {
        let mut line = String::with_capacity(self.line_length());
        for field in &self.fields {
            let value = match values.get(&field.name) {
                Some(value) => value.as_str(),
                None if field.required => {
                    return Err(RecordLayoutError::MissingField {
                        field: field.name.clone(),
                    });
                }
                None => "",
            };
            let width = value.chars().count();
            if width > field.length {
                return Err(RecordLayoutError::ValueTooLong {
                    field: field.name.clone(),
                    limit: field.length,
                    actual: width,
                });
            }
            let padding: String = std::iter::repeat(field.pad_char)
                .take(field.length - width)
                .collect();
            match field.alignment {
                Alignment::Left => {
                    line.push_str(value);
                    line.push_str(&padding);
                }
                Alignment::Right => {
                    line.push_str(&padding);
                    line.push_str(value);
                }
            }
        }
        Ok(line)
    }

    /// Decodes a fixed-width line back into field values.
    ///
    /// Padding is stripped from the padded side of each field.
    ///
    /// # Errors
    ///
    /// Returns a length-mismatch error when the line width differs from the
    /// schema's.
    pub fn decode(&self, line: &str) -> Result<BTreeMap<String, String>, RecordLayoutError> {
        let chars: Vec<char> = line.chars().collect();
        if chars.len() != self.line_length() {
            return Err(RecordLayoutError::LineLengthMismatch {
                schema: self.name.clone(),
                expected: self.line_length(),
                actual: chars.len(),
            });
        }

        let mut values = BTreeMap::new();
        let mut offset = 0;
        for field in &self.fields {
            let raw: String = chars[offset..offset + field.length].iter().collect();
            offset += field.length;
            let value = match field.alignment {
                Alignment::Left => raw.trim_end_matches(field.pad_char),
                Alignment::Right => raw.trim_start_matches(field.pad_char),
            };
            values.insert(field.name.clone(), value.to_string());
        }
        Ok(values)
    }
}

/// Catalog of record schemas, keyed by name. Read-only after startup.
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, RecordSchema>>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema.
    ///
    /// # Errors
    ///
    /// Returns an invalid-schema error when the name is already taken.
    pub fn register(&self, schema: RecordSchema) -> Result<(), RecordLayoutError> {
        let mut schemas = self.schemas.write();
        if schemas.contains_key(&schema.name) {
            return Err(RecordLayoutError::InvalidSchema {
                schema: schema.name,
                message: "schema name is already registered".to_string(),
            });
        }
        schemas.insert(schema.name.clone(), schema);
        Ok(())
    }

    /// Looks up a schema by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<RecordSchema> {
        self.schemas.read().get(name).cloned()
    }

    /// Returns all registered schema names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment_schema() -> RecordSchema {
        RecordSchema::new(
            "payment-request-sco",
            vec![
                FieldSpec::text("PAYMENT_REQUEST_ID", 20),
                FieldSpec::text("PROVIDER_ID", 9),
                FieldSpec::text("COUNTY_CODE", 2),
                FieldSpec::numeric("TOTAL_HOURS", 8),
                FieldSpec::numeric("PAYMENT_AMOUNT", 12),
                FieldSpec::text("PAYMENT_TYPE", 1),
            ],
        )
        .unwrap()
    }

    fn payment_values() -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        values.insert("PAYMENT_REQUEST_ID".to_string(), "PR-2024-000042".to_string());
        values.insert("PROVIDER_ID".to_string(), "P12345".to_string());
        values.insert("COUNTY_CODE".to_string(), "19".to_string());
        values.insert("TOTAL_HOURS".to_string(), "00172.50".to_string());
        values.insert("PAYMENT_AMOUNT".to_string(), "2587.50".to_string());
        values.insert("PAYMENT_TYPE".to_string(), "R".to_string());
        values
    }

    #[test]
    fn test_line_length_sums_fields() {
        assert_eq!(payment_schema().line_length(), 52);
    }

    #[test]
    fn test_encode_pads_and_aligns() {
        let line = payment_schema().encode(&payment_values()).unwrap();

        assert_eq!(line.len(), 52);
        // Left-aligned text, space padded.
        assert!(line.starts_with("PR-2024-000042      "));
        // Right-aligned amount, zero padded to 12.
        assert!(line.contains("000002587.50"));
        assert!(line.ends_with('R'));
    }

    #[test]
    fn test_decode_round_trip() {
        let schema = payment_schema();
        let line = schema.encode(&payment_values()).unwrap();
        let decoded = schema.decode(&line).unwrap();

        assert_eq!(decoded["PAYMENT_REQUEST_ID"], "PR-2024-000042");
        assert_eq!(decoded["PROVIDER_ID"], "P12345");
        assert_eq!(decoded["PAYMENT_AMOUNT"], "2587.50");
        assert_eq!(decoded["PAYMENT_TYPE"], "R");
    }

    #[test]
    fn test_missing_required_field() {
        let mut values = payment_values();
        values.remove("PROVIDER_ID");

        let err = payment_schema().encode(&values).unwrap_err();
        assert!(matches!(err, RecordLayoutError::MissingField { .. }));
    }

    #[test]
    fn test_optional_field_encodes_as_padding() {
        let schema = RecordSchema::new(
            "with-optional",
            vec![
                FieldSpec::text("ID", 4),
                FieldSpec::text("NOTE", 6).optional(),
            ],
        )
        .unwrap();
        let mut values = BTreeMap::new();
        values.insert("ID".to_string(), "A1".to_string());

        assert_eq!(schema.encode(&values).unwrap(), "A1        ");
    }

    #[test]
    fn test_value_too_long() {
        let mut values = payment_values();
        values.insert("COUNTY_CODE".to_string(), "190".to_string());

        let err = payment_schema().encode(&values).unwrap_err();
        assert!(matches!(
            err,
            RecordLayoutError::ValueTooLong { limit: 2, actual: 3, .. }
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_width() {
        let err = payment_schema().decode("too short").unwrap_err();
        assert!(matches!(err, RecordLayoutError::LineLengthMismatch { .. }));
    }

    #[test]
    fn test_schema_validation() {
        assert!(RecordSchema::new("empty", vec![]).is_err());
        assert!(RecordSchema::new("zero", vec![FieldSpec::text("A", 0)]).is_err());
        assert!(RecordSchema::new(
            "dup",
            vec![FieldSpec::text("A", 1), FieldSpec::text("A", 2)]
        )
        .is_err());
    }

    #[test]
    fn test_registry_register_and_lookup() {
        let registry = SchemaRegistry::new();
        registry.register(payment_schema()).unwrap();

        let found = registry.lookup("payment-request-sco").unwrap();
        assert_eq!(found.fields.len(), 6);
        assert!(registry.lookup("missing").is_none());
        assert!(registry.register(payment_schema()).is_err());
        assert_eq!(registry.names(), vec!["payment-request-sco"]);
    }
}
