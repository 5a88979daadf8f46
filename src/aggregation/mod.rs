//! Streaming aggregation over large record inputs.
//!
//! The engine reduces a record stream into per-group aggregates without
//! holding the input in memory: buffers accumulate per group key and are
//! flushed to the aggregation store every `flush_size` records. Peak memory
//! is proportional to the number of distinct groups seen since the last
//! flush, not to the input size.

mod streaming;

pub use streaming::{AggregationStats, StreamingAggregator};

use crate::errors::RecordError;
use serde_json::Value;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

/// The key-derivation rule for one aggregation family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationType {
    /// Group by department.
    ByDepartment,
    /// Group by region.
    ByRegion,
    /// Group by status.
    ByStatus,
    /// Group by `department + "_" + region`.
    ByDepartmentRegion,
    /// Group by `department + "_" + region + "_" + status`.
    ByDepartmentRegionStatus,
}

impl AggregationType {
    /// The stable string form used in persisted rows.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ByDepartment => "BY_DEPARTMENT",
            Self::ByRegion => "BY_REGION",
            Self::ByStatus => "BY_STATUS",
            Self::ByDepartmentRegion => "BY_DEPARTMENT_REGION",
            Self::ByDepartmentRegionStatus => "BY_DEPARTMENT_REGION_STATUS",
        }
    }

    /// The families maintained at a given aggregation depth.
    ///
    /// Depth 1 keeps the single-field families; depth 2 adds
    /// department+region; depth 3 adds department+region+status.
    #[must_use]
    pub fn for_depth(depth: u8) -> Vec<Self> {
        let mut types = vec![Self::ByDepartment, Self::ByRegion, Self::ByStatus];
        if depth >= 2 {
            types.push(Self::ByDepartmentRegion);
        }
        if depth >= 3 {
            types.push(Self::ByDepartmentRegionStatus);
        }
        types
    }

    /// Derives the group key for a record under this family.
    #[must_use]
    pub fn group_key(&self, record: &WorkRecord) -> String {
        match self {
            Self::ByDepartment => record.department.clone(),
            Self::ByRegion => record.region.clone(),
            Self::ByStatus => record.status.clone(),
            Self::ByDepartmentRegion => format!("{}_{}", record.department, record.region),
            Self::ByDepartmentRegionStatus => {
                format!("{}_{}_{}", record.department, record.region, record.status)
            }
        }
    }
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BY_DEPARTMENT" => Ok(Self::ByDepartment),
            "BY_REGION" => Ok(Self::ByRegion),
            "BY_STATUS" => Ok(Self::ByStatus),
            "BY_DEPARTMENT_REGION" => Ok(Self::ByDepartmentRegion),
            "BY_DEPARTMENT_REGION_STATUS" => Ok(Self::ByDepartmentRegionStatus),
            other => Err(format!("unknown aggregation type: {other}")),
        }
    }
}

/// One input record to the aggregation engine.
///
/// Missing string fields default to `"UNKNOWN"` and missing numeric fields
/// to `0.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkRecord {
    /// The department code, e.g. `DEPT_07`.
    pub department: String,
    /// The region code, e.g. `REGION_3`.
    pub region: String,
    /// The record status, e.g. `ACTIVE`.
    pub status: String,
    /// Salary amount.
    pub salary: f64,
    /// Hours worked.
    pub hours_worked: f64,
    /// Bonus amount.
    pub bonus: f64,
}

const UNKNOWN: &str = "UNKNOWN";

impl WorkRecord {
    /// Parses a record from a JSON object.
    ///
    /// Accepts the numeric fields either flat (`salary`, `hoursWorked`,
    /// `bonus`) or nested under `employee`/`metrics` objects, the layout the
    /// report generator emits.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Malformed`] when the value is not an object.
    pub fn from_json(value: &Value) -> Result<Self, RecordError> {
        let object = value
            .as_object()
            .ok_or_else(|| RecordError::Malformed("expected a JSON object".to_string()))?;

        let string_field = |key: &str| -> String {
            object
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or(UNKNOWN)
                .to_string()
        };
        let number_field = |scope: Option<&Value>, key: &str| -> f64 {
            scope
                .and_then(Value::as_object)
                .and_then(|o| o.get(key))
                .or_else(|| object.get(key))
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
        };

        let employee = object.get("employee");
        let metrics = object.get("metrics");

        Ok(Self {
            department: string_field("department"),
            region: string_field("region"),
            status: string_field("status"),
            salary: number_field(employee, "salary"),
            hours_worked: number_field(metrics, "hoursWorked"),
            bonus: number_field(employee, "bonus"),
        })
    }

    /// Parses a record from one serialized JSON line.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Malformed`] for invalid JSON or a non-object.
    pub fn from_json_str(raw: &str) -> Result<Self, RecordError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| RecordError::Malformed(e.to_string()))?;
        Self::from_json(&value)
    }
}

/// Lazily streams newline-delimited JSON records from a file.
///
/// Blank lines are skipped; each remaining line yields either a parsed
/// record or a [`RecordError`] the aggregator counts as a parse failure.
///
/// # Errors
///
/// Returns an IO error if the file cannot be opened.
pub fn read_work_records(
    path: &Path,
) -> std::io::Result<impl Iterator<Item = Result<WorkRecord, RecordError>>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(reader.lines().filter_map(|line| match line {
        Ok(line) if line.trim().is_empty() => None,
        Ok(line) => Some(WorkRecord::from_json_str(&line)),
        Err(e) => Some(Err(RecordError::Io(e))),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_for_depth_families() {
        assert_eq!(AggregationType::for_depth(1).len(), 3);
        assert_eq!(AggregationType::for_depth(2).len(), 4);
        assert_eq!(AggregationType::for_depth(3).len(), 5);
        assert!(AggregationType::for_depth(2).contains(&AggregationType::ByDepartmentRegion));
        assert!(!AggregationType::for_depth(2).contains(&AggregationType::ByDepartmentRegionStatus));
    }

    #[test]
    fn test_type_round_trip() {
        for agg in AggregationType::for_depth(3) {
            assert_eq!(agg.as_str().parse::<AggregationType>().unwrap(), agg);
        }
    }

    #[test]
    fn test_group_keys() {
        let record = WorkRecord {
            department: "DEPT_01".to_string(),
            region: "REGION_05".to_string(),
            status: "ACTIVE".to_string(),
            salary: 1.0,
            hours_worked: 1.0,
            bonus: 0.0,
        };
        assert_eq!(AggregationType::ByDepartment.group_key(&record), "DEPT_01");
        assert_eq!(
            AggregationType::ByDepartmentRegion.group_key(&record),
            "DEPT_01_REGION_05"
        );
        assert_eq!(
            AggregationType::ByDepartmentRegionStatus.group_key(&record),
            "DEPT_01_REGION_05_ACTIVE"
        );
    }

    #[test]
    fn test_record_from_nested_json() {
        let record = WorkRecord::from_json_str(
            r#"{"department":"DEPT_1","region":"REGION_2","status":"PENDING",
                "employee":{"salary":55000.0,"bonus":1200.5},
                "metrics":{"hoursWorked":42.0}}"#,
        )
        .unwrap();
        assert_eq!(record.department, "DEPT_1");
        assert_eq!(record.salary, 55000.0);
        assert_eq!(record.hours_worked, 42.0);
        assert_eq!(record.bonus, 1200.5);
    }

    #[test]
    fn test_record_from_flat_json() {
        let record = WorkRecord::from_json_str(
            r#"{"department":"DEPT_1","salary":100.0,"hoursWorked":8.0}"#,
        )
        .unwrap();
        assert_eq!(record.salary, 100.0);
        assert_eq!(record.hours_worked, 8.0);
        assert_eq!(record.region, "UNKNOWN");
        assert_eq!(record.status, "UNKNOWN");
        assert_eq!(record.bonus, 0.0);
    }

    #[test]
    fn test_record_defaults_when_fields_missing() {
        let record = WorkRecord::from_json_str("{}").unwrap();
        assert_eq!(record.department, "UNKNOWN");
        assert_eq!(record.salary, 0.0);
    }

    #[test]
    fn test_malformed_records_rejected() {
        assert!(WorkRecord::from_json_str("not json").is_err());
        assert!(WorkRecord::from_json_str("[1,2,3]").is_err());
    }

    #[test]
    fn test_read_work_records_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"department":"DEPT_1"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "garbage").unwrap();
        writeln!(file, r#"{{"department":"DEPT_2"}}"#).unwrap();

        let results: Vec<_> = read_work_records(file.path()).unwrap().collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }
}
