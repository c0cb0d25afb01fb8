use super::lifecycle::{claim_next, close_claimed, recover_orphaned};
use super::schema::{ensure_schema, STATE_PENDING};
use super::{
    is_busy_error, ClaimOutcome, ClaimRequest, ControlStore, QueueError, TaskClose, TaskQueue,
};
use crate::remote::RemoteDescriptor;
use crate::runtime::CentralLog;
use crate::task::{CloseoutCode, ParamStore, Task};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A step to insert with [`SqliteTaskQueue::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStep {
    pub job: i64,
    pub step: i64,
    pub tool: String,
    pub dataset: String,
    pub params: ParamStore,
    pub priority: i64,
}

/// A queue row as stored, for inspection and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRow {
    pub job: i64,
    pub step: i64,
    pub tool: String,
    pub state: String,
    pub processor: Option<String>,
    pub attempts: i64,
    pub result_code: Option<CloseoutCode>,
    pub completion_message: Option<String>,
    pub remote: Option<RemoteDescriptor>,
    pub next_attempt_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub manager: String,
    pub level: String,
    pub message: String,
    pub posted_at: i64,
}

/// SQLite-backed queue and control store scoped to one manager name.
pub struct SqliteTaskQueue {
    db_path: PathBuf,
    manager: String,
    connection: Connection,
}

impl SqliteTaskQueue {
    pub fn open(db_path: &Path, manager: &str, busy_timeout: Duration) -> Result<Self, QueueError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| QueueError::CreateParent {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let connection = Connection::open(db_path).map_err(|source| QueueError::Open {
            path: db_path.display().to_string(),
            source,
        })?;
        connection
            .busy_timeout(busy_timeout)
            .map_err(|source| QueueError::Sql { source })?;
        let _mode: String = connection
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(|source| QueueError::Sql { source })?;
        ensure_schema(&connection)?;
        Ok(Self {
            db_path: db_path.to_path_buf(),
            manager: manager.to_string(),
            connection,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn manager(&self) -> &str {
        &self.manager
    }

    pub fn enqueue(&mut self, step: &NewStep, now: i64) -> Result<(), QueueError> {
        let params_json =
            serde_json::to_string(&step.params).map_err(|source| QueueError::Encode {
                what: "params",
                job: step.job,
                step: step.step,
                source,
            })?;
        let inserted = self
            .connection
            .execute(
                "
                INSERT INTO job_steps (
                    job, step, tool, dataset, params, priority, state, enqueued_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(job, step) DO NOTHING
                ",
                params![
                    step.job,
                    step.step,
                    step.tool,
                    step.dataset,
                    params_json,
                    step.priority,
                    STATE_PENDING,
                    now
                ],
            )
            .map_err(|source| QueueError::Sql { source })?;
        if inserted == 0 {
            return Err(QueueError::Duplicate {
                job: step.job,
                step: step.step,
            });
        }
        Ok(())
    }

    pub fn step_row(&self, job: i64, step: i64) -> Result<Option<StepRow>, QueueError> {
        let raw = self
            .connection
            .query_row(
                "
                SELECT job, step, tool, state, processor, attempts, result_code,
                       completion_message, remote_descriptor, next_attempt_at
                FROM job_steps WHERE job = ?1 AND step = ?2
                ",
                params![job, step],
                |row| {
                    Ok((
                        StepRow {
                            job: row.get(0)?,
                            step: row.get(1)?,
                            tool: row.get(2)?,
                            state: row.get(3)?,
                            processor: row.get(4)?,
                            attempts: row.get(5)?,
                            result_code: row
                                .get::<_, Option<String>>(6)?
                                .and_then(|raw| CloseoutCode::parse(&raw).ok()),
                            completion_message: row.get(7)?,
                            remote: None,
                            next_attempt_at: row.get(9)?,
                        },
                        row.get::<_, Option<String>>(8)?,
                    ))
                },
            )
            .optional()
            .map_err(|source| QueueError::Sql { source })?;
        let Some((mut row, descriptor)) = raw else {
            return Ok(None);
        };
        if let Some(raw) = descriptor {
            row.remote = Some(serde_json::from_str(&raw).map_err(|source| {
                QueueError::Parse {
                    what: "remote descriptor",
                    job,
                    step,
                    source,
                }
            })?);
        }
        Ok(Some(row))
    }

    /// Row counts per queue state, for the `status` command.
    pub fn state_counts(&self) -> Result<BTreeMap<String, i64>, QueueError> {
        let mut statement = self
            .connection
            .prepare("SELECT state, COUNT(*) FROM job_steps GROUP BY state")
            .map_err(|source| QueueError::Sql { source })?;
        let rows = statement
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|source| QueueError::Sql { source })?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let (state, count) = row.map_err(|source| QueueError::Sql { source })?;
            counts.insert(state, count);
        }
        Ok(counts)
    }

    pub fn log_entries(&self) -> Result<Vec<LogEntry>, QueueError> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT manager, level, message, posted_at FROM log_entries
                 WHERE manager = ?1 ORDER BY id",
            )
            .map_err(|source| QueueError::Sql { source })?;
        let rows = statement
            .query_map(params![self.manager], |row| {
                Ok(LogEntry {
                    manager: row.get(0)?,
                    level: row.get(1)?,
                    message: row.get(2)?,
                    posted_at: row.get(3)?,
                })
            })
            .map_err(|source| QueueError::Sql { source })?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|source| QueueError::Sql { source })
    }

    fn try_claim(&mut self, request: &ClaimRequest, now: i64) -> Result<Option<Task>, QueueError> {
        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|source| QueueError::Sql { source })?;
        let claimed = claim_next(&tx, &self.manager, request, now)?;
        tx.commit().map_err(|source| QueueError::Sql { source })?;
        Ok(claimed)
    }
}

impl TaskQueue for SqliteTaskQueue {
    fn claim(&mut self, request: &ClaimRequest, now: i64) -> ClaimOutcome {
        match self.try_claim(request, now) {
            Ok(Some(task)) => ClaimOutcome::TaskFound(Box::new(task)),
            Ok(None) => ClaimOutcome::NoTaskFound,
            Err(err) if err.is_busy() => ClaimOutcome::Deadlock(err.to_string()),
            Err(err) => ClaimOutcome::ResultError(err.to_string()),
        }
    }

    fn close(&mut self, task: &Task, close: &TaskClose, now: i64) -> Result<(), QueueError> {
        close_claimed(&self.connection, &self.manager, task, close, now)
    }

    fn recover_orphaned_claims(&mut self) -> Result<usize, QueueError> {
        recover_orphaned(&self.connection, &self.manager)
    }
}

impl ControlStore for SqliteTaskQueue {
    fn load_manager_params(&mut self) -> Result<BTreeMap<String, String>, QueueError> {
        let mut statement = self
            .connection
            .prepare("SELECT name, value FROM manager_params WHERE manager = ?1")
            .map_err(|source| QueueError::Sql { source })?;
        let rows = statement
            .query_map(params![self.manager], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|source| QueueError::Sql { source })?;
        let mut values = BTreeMap::new();
        for row in rows {
            let (name, value) = row.map_err(|source| QueueError::Sql { source })?;
            values.insert(name.to_ascii_lowercase(), value);
        }
        Ok(values)
    }

    fn set_manager_param(&mut self, name: &str, value: &str, now: i64) -> Result<(), QueueError> {
        self.connection
            .execute(
                "
                INSERT INTO manager_params (manager, name, value, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(manager, name) DO UPDATE SET value = excluded.value,
                    updated_at = excluded.updated_at
                ",
                params![self.manager, name.to_ascii_lowercase(), value, now],
            )
            .map_err(|source| QueueError::Sql { source })?;
        Ok(())
    }
}

impl CentralLog for SqliteTaskQueue {
    fn post_log(&mut self, level: &str, message: &str, posted_at: i64) -> Result<(), String> {
        self.connection
            .execute(
                "INSERT INTO log_entries (manager, level, message, posted_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![self.manager, level, message, posted_at],
            )
            .map(|_| ())
            .map_err(|err| err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn busy_errors_are_recognised() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(is_busy_error(&err));
        assert!(!is_busy_error(&rusqlite::Error::QueryReturnedNoRows));
    }

    #[test]
    fn manager_params_are_upserted() {
        let dir = tempdir().expect("tempdir");
        let mut queue = SqliteTaskQueue::open(
            &dir.path().join("queue.sqlite3"),
            "pub-1",
            Duration::from_millis(100),
        )
        .expect("open");
        queue.set_manager_param("mgr_active", "true", 1).expect("set");
        queue.set_manager_param("MGR_ACTIVE", "false", 2).expect("set");
        let params = queue.load_manager_params().expect("load");
        assert_eq!(params.get("mgr_active").map(String::as_str), Some("false"));
    }
}
