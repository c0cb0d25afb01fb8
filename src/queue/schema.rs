use super::QueueError;
use rusqlite::Connection;

pub const STATE_PENDING: &str = "pending";
pub const STATE_RUNNING: &str = "running";
pub const STATE_RUNNING_REMOTE: &str = "running_remote";

pub fn ensure_schema(connection: &Connection) -> Result<(), QueueError> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS job_steps (
                job INTEGER NOT NULL,
                step INTEGER NOT NULL,
                tool TEXT NOT NULL,
                dataset TEXT NOT NULL DEFAULT '',
                params TEXT NOT NULL DEFAULT '{}',
                priority INTEGER NOT NULL DEFAULT 3,
                state TEXT NOT NULL DEFAULT 'pending',
                processor TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                result_code TEXT,
                completion_message TEXT,
                remote_descriptor TEXT,
                next_attempt_at INTEGER NOT NULL DEFAULT 0,
                enqueued_at INTEGER NOT NULL,
                started_at INTEGER,
                finished_at INTEGER,
                PRIMARY KEY (job, step)
            );

            CREATE INDEX IF NOT EXISTS idx_job_steps_claim
                ON job_steps(state, priority, job, step);

            CREATE TABLE IF NOT EXISTS manager_params (
                manager TEXT NOT NULL,
                name TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (manager, name)
            );

            CREATE TABLE IF NOT EXISTS log_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                manager TEXT NOT NULL,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                posted_at INTEGER NOT NULL
            );
            ",
        )
        .map_err(|source| QueueError::Sql { source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let connection = Connection::open_in_memory().expect("memory db");
        ensure_schema(&connection).expect("first");
        ensure_schema(&connection).expect("second");
        let tables: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('job_steps', 'manager_params', 'log_entries')",
                [],
                |row| row.get(0),
            )
            .expect("count tables");
        assert_eq!(tables, 3);
    }
}
