//! SQLite-backed execution and aggregation store.
//!
//! A single connection behind a mutex serializes statements. The aggregation
//! upsert uses `INSERT ... ON CONFLICT ... DO UPDATE` so a flush is one
//! round trip per group regardless of whether the row exists.

use super::{
    AggregationDelta, AggregationRow, AggregationStore, ExecutionStore, JobExecution, JobInstance,
    StepExecution,
};
use crate::aggregation::AggregationType;
use crate::context::ExecutionContext;
use crate::core::{BatchStatus, ExitCode, ExitStatus};
use crate::errors::StoreError;
use crate::params::JobParameters;
use crate::utils::{from_millis, now_millis, to_millis};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

const SCHEMA: &str = r#"
        CREATE TABLE IF NOT EXISTS batch_job_instance (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          job_name TEXT NOT NULL,
          job_key TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          UNIQUE (job_name, job_key)
        );

        CREATE TABLE IF NOT EXISTS batch_job_execution (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          instance_id INTEGER NOT NULL REFERENCES batch_job_instance(id),
          job_name TEXT NOT NULL,
          status TEXT NOT NULL,
          exit_code TEXT NOT NULL,
          exit_description TEXT NOT NULL DEFAULT '',
          start_time_ms INTEGER,
          end_time_ms INTEGER,
          parameters_json TEXT NOT NULL,
          context_json TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_batch_execution_instance
          ON batch_job_execution(instance_id);

        CREATE TABLE IF NOT EXISTS batch_step_execution (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          execution_id INTEGER NOT NULL REFERENCES batch_job_execution(id),
          step_name TEXT NOT NULL,
          status TEXT NOT NULL,
          exit_code TEXT NOT NULL,
          exit_description TEXT NOT NULL DEFAULT '',
          start_time_ms INTEGER,
          end_time_ms INTEGER,
          read_count INTEGER NOT NULL DEFAULT 0,
          write_count INTEGER NOT NULL DEFAULT 0,
          skip_count INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_batch_step_execution
          ON batch_step_execution(execution_id);

        CREATE TABLE IF NOT EXISTS batch_aggregation (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          execution_id INTEGER NOT NULL,
          aggregation_type TEXT NOT NULL,
          group_key TEXT NOT NULL,
          record_count INTEGER NOT NULL,
          total_salary REAL NOT NULL,
          total_hours REAL NOT NULL,
          total_bonus REAL NOT NULL,
          min_salary REAL NOT NULL,
          max_salary REAL NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          UNIQUE (execution_id, aggregation_type, group_key)
        );
        CREATE INDEX IF NOT EXISTS idx_batch_aggregation_execution
          ON batch_aggregation(execution_id);
"#;

/// Execution and aggregation store over an embedded SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if needed) a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the database cannot be opened or the
    /// schema cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    /// Opens an in-memory store, used by tests and local runs.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

struct RawExecution {
    id: i64,
    instance_id: i64,
    job_name: String,
    status: String,
    exit_code: String,
    exit_description: String,
    start_time_ms: Option<i64>,
    end_time_ms: Option<i64>,
    parameters_json: String,
    context_json: String,
}

impl RawExecution {
    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            instance_id: row.get(1)?,
            job_name: row.get(2)?,
            status: row.get(3)?,
            exit_code: row.get(4)?,
            exit_description: row.get(5)?,
            start_time_ms: row.get(6)?,
            end_time_ms: row.get(7)?,
            parameters_json: row.get(8)?,
            context_json: row.get(9)?,
        })
    }

    fn into_execution(self) -> Result<JobExecution, StoreError> {
        Ok(JobExecution {
            id: self.id,
            instance_id: self.instance_id,
            job_name: self.job_name,
            status: parse_status(&self.status)?,
            exit_status: ExitStatus {
                exit_code: parse_exit_code(&self.exit_code)?,
                exit_description: self.exit_description,
            },
            start_time: self.start_time_ms.and_then(from_millis),
            end_time: self.end_time_ms.and_then(from_millis),
            parameters: JobParameters::from_json(&self.parameters_json)
                .map_err(StoreError::Serialization)?,
            context: ExecutionContext::from_json(&self.context_json)
                .map_err(StoreError::Serialization)?,
        })
    }
}

const EXECUTION_COLUMNS: &str = "id, instance_id, job_name, status, exit_code, exit_description, \
     start_time_ms, end_time_ms, parameters_json, context_json";

fn parse_status(raw: &str) -> Result<BatchStatus, StoreError> {
    raw.parse().map_err(StoreError::Serialization)
}

fn parse_exit_code(raw: &str) -> Result<ExitCode, StoreError> {
    raw.parse().map_err(StoreError::Serialization)
}

fn read_step_row(row: &rusqlite::Row<'_>) -> Result<(StepExecution, String, String), rusqlite::Error> {
    let status: String = row.get(3)?;
    let exit_code: String = row.get(4)?;
    let step = StepExecution {
        id: row.get(0)?,
        execution_id: row.get(1)?,
        step_name: row.get(2)?,
        status: BatchStatus::Starting,
        exit_status: ExitStatus {
            exit_code: ExitCode::Unknown,
            exit_description: row.get(5)?,
        },
        start_time: row.get::<_, Option<i64>>(6)?.and_then(from_millis),
        end_time: row.get::<_, Option<i64>>(7)?.and_then(from_millis),
        read_count: row.get::<_, i64>(8)?.max(0) as u64,
        write_count: row.get::<_, i64>(9)?.max(0) as u64,
        skip_count: row.get::<_, i64>(10)?.max(0) as u64,
    };
    Ok((step, status, exit_code))
}

fn finish_step_row(
    (mut step, status, exit_code): (StepExecution, String, String),
) -> Result<StepExecution, StoreError> {
    step.status = parse_status(&status)?;
    step.exit_status.exit_code = parse_exit_code(&exit_code)?;
    Ok(step)
}

fn optional_millis(time: Option<DateTime<Utc>>) -> Option<i64> {
    time.as_ref().map(to_millis)
}

#[async_trait]
impl ExecutionStore for SqliteStore {
    async fn create_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance, StoreError> {
        let job_key = parameters.job_key();
        let conn = self.conn.lock();

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM batch_job_instance WHERE job_name = ?1 AND job_key = ?2",
                params![job_name, job_key],
                |row| row.get(0),
            )
            .optional()?;

        let id = match existing {
            Some(id) => id,
            None => {
                conn.execute(
                    "INSERT INTO batch_job_instance (job_name, job_key, created_at_ms) \
                     VALUES (?1, ?2, ?3)",
                    params![job_name, job_key, now_millis()],
                )?;
                conn.last_insert_rowid()
            }
        };

        Ok(JobInstance {
            id,
            job_name: job_name.to_string(),
            job_key,
        })
    }

    async fn create_execution(
        &self,
        instance: &JobInstance,
        parameters: &JobParameters,
    ) -> Result<JobExecution, StoreError> {
        let now = now_millis();
        let context = ExecutionContext::new();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO batch_job_execution \
               (instance_id, job_name, status, exit_code, exit_description, \
                parameters_json, context_json, created_at_ms, updated_at_ms) \
             VALUES (?1, ?2, ?3, ?4, '', ?5, ?6, ?7, ?7)",
            params![
                instance.id,
                instance.job_name,
                BatchStatus::Starting.as_str(),
                ExitCode::Unknown.as_str(),
                parameters.to_json(),
                context.to_json(),
                now,
            ],
        )?;

        Ok(JobExecution {
            id: conn.last_insert_rowid(),
            instance_id: instance.id,
            job_name: instance.job_name.clone(),
            status: BatchStatus::Starting,
            exit_status: ExitStatus::unknown(),
            start_time: None,
            end_time: None,
            parameters: parameters.clone(),
            context,
        })
    }

    async fn update_execution(&self, execution: &JobExecution) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let current_raw: String = conn
            .query_row(
                "SELECT status FROM batch_job_execution WHERE id = ?1",
                params![execution.id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::NotFound {
                entity: "execution",
                id: execution.id,
            })?;
        let current = parse_status(&current_raw)?;

        // A late runtime write must not undo a stop request; keep Stopping
        // until the runtime acknowledges it with a terminal status.
        let effective = if current == BatchStatus::Stopping
            && matches!(execution.status, BatchStatus::Starting | BatchStatus::Started)
        {
            BatchStatus::Stopping
        } else if current.can_transition_to(execution.status) {
            execution.status
        } else {
            return Err(StoreError::IllegalTransition {
                from: current,
                to: execution.status,
            });
        };

        conn.execute(
            "UPDATE batch_job_execution SET \
               status = ?2, exit_code = ?3, exit_description = ?4, \
               start_time_ms = ?5, end_time_ms = ?6, context_json = ?7, \
               updated_at_ms = ?8 \
             WHERE id = ?1",
            params![
                execution.id,
                effective.as_str(),
                execution.exit_status.exit_code.as_str(),
                execution.exit_status.exit_description,
                optional_millis(execution.start_time),
                optional_millis(execution.end_time),
                execution.context.to_json(),
                now_millis(),
            ],
        )?;
        Ok(())
    }

    async fn find_execution(&self, execution_id: i64) -> Result<Option<JobExecution>, StoreError> {
        let raw = {
            let conn = self.conn.lock();
            conn.query_row(
                &format!("SELECT {EXECUTION_COLUMNS} FROM batch_job_execution WHERE id = ?1"),
                params![execution_id],
                RawExecution::from_row,
            )
            .optional()?
        };
        raw.map(RawExecution::into_execution).transpose()
    }

    async fn create_step_execution(
        &self,
        execution_id: i64,
        step_name: &str,
    ) -> Result<StepExecution, StoreError> {
        let now = now_millis();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO batch_step_execution \
               (execution_id, step_name, status, exit_code, exit_description, start_time_ms) \
             VALUES (?1, ?2, ?3, ?4, '', ?5)",
            params![
                execution_id,
                step_name,
                BatchStatus::Started.as_str(),
                ExitCode::Executing.as_str(),
                now,
            ],
        )?;

        Ok(StepExecution {
            id: conn.last_insert_rowid(),
            execution_id,
            step_name: step_name.to_string(),
            status: BatchStatus::Started,
            exit_status: ExitStatus {
                exit_code: ExitCode::Executing,
                exit_description: String::new(),
            },
            start_time: from_millis(now),
            end_time: None,
            read_count: 0,
            write_count: 0,
            skip_count: 0,
        })
    }

    async fn update_step_execution(&self, step: &StepExecution) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE batch_step_execution SET \
               status = ?2, exit_code = ?3, exit_description = ?4, \
               start_time_ms = ?5, end_time_ms = ?6, \
               read_count = ?7, write_count = ?8, skip_count = ?9 \
             WHERE id = ?1",
            params![
                step.id,
                step.status.as_str(),
                step.exit_status.exit_code.as_str(),
                step.exit_status.exit_description,
                optional_millis(step.start_time),
                optional_millis(step.end_time),
                step.read_count as i64,
                step.write_count as i64,
                step.skip_count as i64,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "step execution",
                id: step.id,
            });
        }
        Ok(())
    }

    async fn list_step_executions(
        &self,
        execution_id: i64,
    ) -> Result<Vec<StepExecution>, StoreError> {
        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "SELECT id, execution_id, step_name, status, exit_code, exit_description, \
                        start_time_ms, end_time_ms, read_count, write_count, skip_count \
                 FROM batch_step_execution WHERE execution_id = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![execution_id], read_step_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        rows.into_iter().map(finish_step_row).collect()
    }

    async fn find_recent_instances(
        &self,
        job_name: &str,
        page: usize,
        size: usize,
    ) -> Result<Vec<JobInstance>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, job_name, job_key FROM batch_job_instance \
             WHERE job_name = ?1 ORDER BY id DESC LIMIT ?2 OFFSET ?3",
        )?;
        let instances = stmt
            .query_map(
                params![job_name, size as i64, (page * size) as i64],
                |row| {
                    Ok(JobInstance {
                        id: row.get(0)?,
                        job_name: row.get(1)?,
                        job_key: row.get(2)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(instances)
    }

    async fn list_executions(&self, instance_id: i64) -> Result<Vec<JobExecution>, StoreError> {
        let raws = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {EXECUTION_COLUMNS} FROM batch_job_execution \
                 WHERE instance_id = ?1 ORDER BY id DESC"
            ))?;
            let raws = stmt
                .query_map(params![instance_id], RawExecution::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            raws
        };
        raws.into_iter().map(RawExecution::into_execution).collect()
    }

    async fn mark_running_abandoned(&self) -> Result<u64, StoreError> {
        let now = now_millis();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE batch_step_execution SET \
               status = 'ABANDONED', exit_code = 'ABANDONED', end_time_ms = ?1 \
             WHERE status IN ('STARTING', 'STARTED', 'STOPPING')",
            params![now],
        )?;
        let swept = tx.execute(
            "UPDATE batch_job_execution SET \
               status = 'ABANDONED', exit_code = 'ABANDONED', end_time_ms = ?1, \
               updated_at_ms = ?1 \
             WHERE status IN ('STARTING', 'STARTED', 'STOPPING')",
            params![now],
        )?;
        tx.commit()?;
        Ok(swept as u64)
    }
}

#[async_trait]
impl AggregationStore for SqliteStore {
    async fn upsert_batch(
        &self,
        execution_id: i64,
        aggregation_type: AggregationType,
        group_key: &str,
        delta: &AggregationDelta,
    ) -> Result<(), StoreError> {
        let now = now_millis();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO batch_aggregation \
               (execution_id, aggregation_type, group_key, record_count, total_salary, \
                total_hours, total_bonus, min_salary, max_salary, created_at_ms, updated_at_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10) \
             ON CONFLICT (execution_id, aggregation_type, group_key) DO UPDATE SET \
               record_count = record_count + excluded.record_count, \
               total_salary = total_salary + excluded.total_salary, \
               total_hours = total_hours + excluded.total_hours, \
               total_bonus = total_bonus + excluded.total_bonus, \
               min_salary = MIN(min_salary, excluded.min_salary), \
               max_salary = MAX(max_salary, excluded.max_salary), \
               updated_at_ms = excluded.updated_at_ms",
            params![
                execution_id,
                aggregation_type.as_str(),
                group_key,
                delta.record_count as i64,
                delta.total_salary,
                delta.total_hours,
                delta.total_bonus,
                delta.min_salary,
                delta.max_salary,
                now,
            ],
        )?;
        Ok(())
    }

    async fn count_distinct_groups(
        &self,
        execution_id: i64,
        aggregation_type: AggregationType,
    ) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT group_key) FROM batch_aggregation \
             WHERE execution_id = ?1 AND aggregation_type = ?2",
            params![execution_id, aggregation_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    async fn total_record_count(&self, execution_id: i64) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(record_count), 0) FROM batch_aggregation \
             WHERE execution_id = ?1 AND aggregation_type = 'BY_DEPARTMENT'",
            params![execution_id],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u64)
    }

    async fn find_by_type(
        &self,
        execution_id: i64,
        aggregation_type: AggregationType,
    ) -> Result<Vec<AggregationRow>, StoreError> {
        let raws = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "SELECT execution_id, aggregation_type, group_key, record_count, total_salary, \
                        total_hours, total_bonus, min_salary, max_salary, created_at_ms, \
                        updated_at_ms \
                 FROM batch_aggregation \
                 WHERE execution_id = ?1 AND aggregation_type = ?2 \
                 ORDER BY record_count DESC, group_key",
            )?;
            let raws = stmt
                .query_map(params![execution_id, aggregation_type.as_str()], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, f64>(6)?,
                        row.get::<_, f64>(7)?,
                        row.get::<_, f64>(8)?,
                        row.get::<_, i64>(9)?,
                        row.get::<_, i64>(10)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            raws
        };

        raws.into_iter()
            .map(
                |(exec, agg, key, count, salary, hours, bonus, min, max, created, updated)| {
                    Ok(AggregationRow {
                        execution_id: exec,
                        aggregation_type: agg.parse().map_err(StoreError::Serialization)?,
                        group_key: key,
                        record_count: count.max(0) as u64,
                        total_salary: salary,
                        total_hours: hours,
                        total_bonus: bonus,
                        min_salary: min,
                        max_salary: max,
                        created_at: from_millis(created).unwrap_or_else(Utc::now),
                        updated_at: from_millis(updated).unwrap_or_else(Utc::now),
                    })
                },
            )
            .collect()
    }

    async fn delete_by_execution(&self, execution_id: i64) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM batch_aggregation WHERE execution_id = ?1",
            params![execution_id],
        )?;
        Ok(removed as u64)
    }
}
