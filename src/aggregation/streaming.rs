//! The streaming aggregation engine.

use super::{AggregationType, WorkRecord};
use crate::errors::{BatchflowError, RecordError};
use crate::store::{AggregationDelta, AggregationStore};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// In-memory accumulation for one group between flushes.
#[derive(Debug, Clone)]
struct GroupBuffer {
    record_count: u64,
    total_salary: f64,
    total_hours: f64,
    total_bonus: f64,
    min_salary: f64,
    max_salary: f64,
}

impl GroupBuffer {
    fn first(salary: f64, hours: f64, bonus: f64) -> Self {
        Self {
            record_count: 1,
            total_salary: salary,
            total_hours: hours,
            total_bonus: bonus,
            min_salary: salary,
            max_salary: salary,
        }
    }

    fn observe(&mut self, salary: f64, hours: f64, bonus: f64) {
        self.record_count += 1;
        self.total_salary += salary;
        self.total_hours += hours;
        self.total_bonus += bonus;
        self.min_salary = self.min_salary.min(salary);
        self.max_salary = self.max_salary.max(salary);
    }

    fn to_delta(&self) -> AggregationDelta {
        AggregationDelta {
            record_count: self.record_count,
            total_salary: self.total_salary,
            total_hours: self.total_hours,
            total_bonus: self.total_bonus,
            min_salary: self.min_salary,
            max_salary: self.max_salary,
        }
    }
}

/// What one aggregation pass produced.
#[derive(Debug, Clone)]
pub struct AggregationStats {
    /// Records parsed and folded into buffers.
    pub records_processed: u64,
    /// Records that failed to parse. They count toward flush cadence but
    /// contribute nothing to any group.
    pub parse_failures: u64,
    /// How many flushes ran, including the final one.
    pub flushes: u64,
    /// Distinct groups per maintained family, queried after the final flush.
    pub distinct_groups: Vec<(AggregationType, u64)>,
}

/// Reduces a record stream into per-group aggregates with bounded memory.
///
/// Buffers accumulate per `(family, group key)` and are pushed to the store
/// every `flush_size` records; cleared buffers are never re-flushed, so the
/// store-side merge observes each record exactly once.
pub struct StreamingAggregator {
    store: Arc<dyn AggregationStore>,
}

impl StreamingAggregator {
    /// Creates an aggregator writing to the given store.
    #[must_use]
    pub fn new(store: Arc<dyn AggregationStore>) -> Self {
        Self { store }
    }

    /// Consumes `records` and upserts batched aggregates for `execution_id`.
    ///
    /// `depth` selects the key families per [`AggregationType::for_depth`];
    /// `flush_size` is the record interval between flushes. The flush counter
    /// is explicit and resets on flush, so malformed records (which still
    /// count as one record each) cannot desynchronize the cadence.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for `depth` outside `1..=3` or a zero
    /// `flush_size`, and a storage error if a flush fails.
    pub async fn aggregate<I>(
        &self,
        execution_id: i64,
        records: I,
        depth: u8,
        flush_size: usize,
    ) -> Result<AggregationStats, BatchflowError>
    where
        I: IntoIterator<Item = Result<WorkRecord, RecordError>>,
    {
        if !(1..=3).contains(&depth) {
            return Err(BatchflowError::Configuration(format!(
                "aggregation depth must be 1 to 3, got {depth}"
            )));
        }
        if flush_size == 0 {
            return Err(BatchflowError::Configuration(
                "flush size must be positive".to_string(),
            ));
        }

        let families = AggregationType::for_depth(depth);
        let mut buffers: HashMap<(AggregationType, String), GroupBuffer> = HashMap::new();
        let mut records_processed: u64 = 0;
        let mut parse_failures: u64 = 0;
        let mut records_since_flush: usize = 0;
        let mut flushes: u64 = 0;

        for record in records {
            match record {
                Ok(record) => {
                    records_processed += 1;
                    for family in &families {
                        buffers
                            .entry((*family, family.group_key(&record)))
                            .and_modify(|buffer| {
                                buffer.observe(record.salary, record.hours_worked, record.bonus);
                            })
                            .or_insert_with(|| {
                                GroupBuffer::first(
                                    record.salary,
                                    record.hours_worked,
                                    record.bonus,
                                )
                            });
                    }
                }
                Err(e) => {
                    parse_failures += 1;
                    warn!(execution_id, error = %e, "skipping malformed record");
                }
            }

            records_since_flush += 1;
            if records_since_flush == flush_size {
                self.flush(execution_id, &mut buffers).await?;
                records_since_flush = 0;
                flushes += 1;
                debug!(
                    execution_id,
                    records_processed, parse_failures, "streaming aggregation progress"
                );
            }
        }

        if !buffers.is_empty() {
            self.flush(execution_id, &mut buffers).await?;
            flushes += 1;
        }

        let mut distinct_groups = Vec::with_capacity(families.len());
        for family in &families {
            let count = self
                .store
                .count_distinct_groups(execution_id, *family)
                .await?;
            distinct_groups.push((*family, count));
        }

        info!(
            execution_id,
            records_processed, parse_failures, flushes, "streaming aggregation complete"
        );

        Ok(AggregationStats {
            records_processed,
            parse_failures,
            flushes,
            distinct_groups,
        })
    }

    async fn flush(
        &self,
        execution_id: i64,
        buffers: &mut HashMap<(AggregationType, String), GroupBuffer>,
    ) -> Result<(), BatchflowError> {
        let group_count = buffers.len();
        for ((family, group_key), buffer) in buffers.iter() {
            self.store
                .upsert_batch(execution_id, *family, group_key, &buffer.to_delta())
                .await?;
        }
        buffers.clear();
        debug!(execution_id, group_count, "flushed aggregation buffers");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn record(department: &str, region: &str, status: &str, salary: f64) -> WorkRecord {
        WorkRecord {
            department: department.to_string(),
            region: region.to_string(),
            status: status.to_string(),
            salary,
            hours_worked: 8.0,
            bonus: 1.0,
        }
    }

    fn aggregator() -> (StreamingAggregator, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        (StreamingAggregator::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_empty_input_produces_no_rows() {
        let (aggregator, store) = aggregator();

        let stats = aggregator.aggregate(1, Vec::new(), 3, 100).await.unwrap();

        assert_eq!(stats.records_processed, 0);
        assert_eq!(stats.flushes, 0);
        assert_eq!(
            store
                .count_distinct_groups(1, AggregationType::ByDepartment)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_aggregates_across_flush_boundaries() {
        let (aggregator, store) = aggregator();
        let records: Vec<_> = (0..10)
            .map(|i| {
                Ok(record(
                    if i % 2 == 0 { "DEPT_A" } else { "DEPT_B" },
                    "REGION_1",
                    "ACTIVE",
                    100.0 + i as f64,
                ))
            })
            .collect();

        let stats = aggregator.aggregate(1, records, 3, 4).await.unwrap();

        assert_eq!(stats.records_processed, 10);
        // Two full flushes plus the final partial one.
        assert_eq!(stats.flushes, 3);

        let rows = store
            .find_by_type(1, AggregationType::ByDepartment)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row.record_count, 5);
            assert!(row.min_salary <= row.max_salary);
        }

        // Even salaries went to DEPT_A, odd to DEPT_B.
        let dept_a = rows.iter().find(|r| r.group_key == "DEPT_A").unwrap();
        assert_eq!(dept_a.min_salary, 100.0);
        assert_eq!(dept_a.max_salary, 108.0);
        assert_eq!(dept_a.total_salary, 100.0 + 102.0 + 104.0 + 106.0 + 108.0);

        assert_eq!(store.total_record_count(1).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_flush_size_one_upserts_every_record() {
        let (aggregator, store) = aggregator();
        let records = vec![
            Ok(record("DEPT_A", "REGION_1", "ACTIVE", 10.0)),
            Ok(record("DEPT_A", "REGION_1", "ACTIVE", 20.0)),
            Ok(record("DEPT_B", "REGION_2", "PENDING", 30.0)),
        ];

        let stats = aggregator.aggregate(1, records, 1, 1).await.unwrap();

        assert_eq!(stats.flushes, 3);
        assert_eq!(store.total_record_count(1).await.unwrap(), 3);

        let by_region_total: u64 = store
            .find_by_type(1, AggregationType::ByRegion)
            .await
            .unwrap()
            .iter()
            .map(|r| r.record_count)
            .sum();
        assert_eq!(by_region_total, 3);
    }

    #[tokio::test]
    async fn test_depth_controls_maintained_families() {
        let (aggregator, store) = aggregator();
        let records = vec![Ok(record("DEPT_A", "REGION_1", "ACTIVE", 10.0))];

        aggregator.aggregate(1, records, 1, 10).await.unwrap();

        assert_eq!(
            store
                .count_distinct_groups(1, AggregationType::ByStatus)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .count_distinct_groups(1, AggregationType::ByDepartmentRegion)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_parse_failures_count_toward_cadence() {
        let (aggregator, store) = aggregator();
        let records = vec![
            Ok(record("DEPT_A", "REGION_1", "ACTIVE", 10.0)),
            Err(RecordError::Malformed("bad line".to_string())),
            Ok(record("DEPT_A", "REGION_1", "ACTIVE", 20.0)),
            Err(RecordError::Malformed("bad line".to_string())),
        ];

        let stats = aggregator.aggregate(1, records, 3, 2).await.unwrap();

        assert_eq!(stats.records_processed, 2);
        assert_eq!(stats.parse_failures, 2);
        // Failures advance the counter: flush after record 2 and record 4.
        assert_eq!(stats.flushes, 2);
        assert_eq!(store.total_record_count(1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stats_report_distinct_groups() {
        let (aggregator, _store) = aggregator();
        let records = vec![
            Ok(record("DEPT_A", "REGION_1", "ACTIVE", 10.0)),
            Ok(record("DEPT_B", "REGION_1", "PENDING", 20.0)),
        ];

        let stats = aggregator.aggregate(1, records, 3, 100).await.unwrap();

        let lookup = |family: AggregationType| {
            stats
                .distinct_groups
                .iter()
                .find(|(f, _)| *f == family)
                .map(|(_, c)| *c)
                .unwrap()
        };
        assert_eq!(lookup(AggregationType::ByDepartment), 2);
        assert_eq!(lookup(AggregationType::ByRegion), 1);
        assert_eq!(lookup(AggregationType::ByStatus), 2);
        assert_eq!(lookup(AggregationType::ByDepartmentRegionStatus), 2);
    }

    #[tokio::test]
    async fn test_invalid_configuration_rejected() {
        let (aggregator, _store) = aggregator();
        assert!(aggregator
            .aggregate(1, Vec::new(), 0, 10)
            .await
            .is_err());
        assert!(aggregator
            .aggregate(1, Vec::new(), 4, 10)
            .await
            .is_err());
        assert!(aggregator
            .aggregate(1, Vec::new(), 3, 0)
            .await
            .is_err());
    }
}
