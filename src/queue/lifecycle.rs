use super::schema::{STATE_PENDING, STATE_RUNNING, STATE_RUNNING_REMOTE};
use super::{ClaimRequest, QueueError, TaskClose};
use crate::remote::RemoteDescriptor;
use crate::task::{ParamStore, QueueDisposition, Task};
use rusqlite::{params, Connection, OptionalExtension};

struct Candidate {
    job: i64,
    step: i64,
    tool: String,
    dataset: String,
    params: String,
    remote_descriptor: Option<String>,
}

fn sql(source: rusqlite::Error) -> QueueError {
    QueueError::Sql { source }
}

/// Claims the next step for `manager` inside the caller's write transaction.
///
/// A step this manager already has running remotely wins over new work once its poll
/// time has come, so remote jobs keep getting polled while the queue is busy.
pub fn claim_next(
    connection: &Connection,
    manager: &str,
    request: &ClaimRequest,
    now: i64,
) -> Result<Option<Task>, QueueError> {
    let remote = connection
        .query_row(
            "
            SELECT job, step, tool, dataset, params, remote_descriptor
            FROM job_steps
            WHERE state = ?1 AND processor = ?2 AND next_attempt_at <= ?3
            ORDER BY next_attempt_at, job, step
            LIMIT 1
            ",
            params![STATE_RUNNING_REMOTE, manager, now],
            read_candidate,
        )
        .optional()
        .map_err(sql)?;

    let candidate = match remote {
        Some(candidate) => Some(candidate),
        None => next_pending(connection, request, now)?,
    };
    let Some(candidate) = candidate else {
        return Ok(None);
    };

    connection
        .execute(
            "
            UPDATE job_steps
            SET state = ?1,
                processor = ?2,
                attempts = attempts + 1,
                started_at = COALESCE(started_at, ?3)
            WHERE job = ?4 AND step = ?5
            ",
            params![STATE_RUNNING, manager, now, candidate.job, candidate.step],
        )
        .map_err(sql)?;

    into_task(candidate).map(Some)
}

fn next_pending(
    connection: &Connection,
    request: &ClaimRequest,
    now: i64,
) -> Result<Option<Candidate>, QueueError> {
    let mut statement = connection
        .prepare(
            "
            SELECT job, step, tool, dataset, params, remote_descriptor
            FROM job_steps
            WHERE state = ?1 AND next_attempt_at <= ?2
            ORDER BY priority, job, step
            ",
        )
        .map_err(sql)?;
    let rows = statement
        .query_map(params![STATE_PENDING, now], read_candidate)
        .map_err(sql)?;
    for row in rows {
        let candidate = row.map_err(sql)?;
        if accepts(request, &candidate.tool) {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

fn accepts(request: &ClaimRequest, tool: &str) -> bool {
    request.step_tools.is_empty()
        || request
            .step_tools
            .iter()
            .any(|allowed| allowed.trim().eq_ignore_ascii_case(tool))
}

fn read_candidate(row: &rusqlite::Row<'_>) -> rusqlite::Result<Candidate> {
    Ok(Candidate {
        job: row.get(0)?,
        step: row.get(1)?,
        tool: row.get(2)?,
        dataset: row.get(3)?,
        params: row.get(4)?,
        remote_descriptor: row.get(5)?,
    })
}

fn into_task(candidate: Candidate) -> Result<Task, QueueError> {
    let mut task = Task::new(
        candidate.job,
        candidate.step,
        candidate.tool,
        candidate.dataset,
    );
    task.params = serde_json::from_str::<ParamStore>(&candidate.params).map_err(|source| {
        QueueError::Parse {
            what: "params",
            job: candidate.job,
            step: candidate.step,
            source,
        }
    })?;
    if let Some(raw) = candidate.remote_descriptor.filter(|raw| !raw.trim().is_empty()) {
        let descriptor =
            serde_json::from_str::<RemoteDescriptor>(&raw).map_err(|source| QueueError::Parse {
                what: "remote descriptor",
                job: candidate.job,
                step: candidate.step,
                source,
            })?;
        task.remote = Some(descriptor);
    }
    Ok(task)
}

/// Moves a claimed row to the state its closeout code calls for.
pub fn close_claimed(
    connection: &Connection,
    manager: &str,
    task: &Task,
    close: &TaskClose,
    now: i64,
) -> Result<(), QueueError> {
    let encode = |what, source| QueueError::Encode {
        what,
        job: task.job,
        step: task.step,
        source,
    };
    let params_json = serde_json::to_string(&task.params).map_err(|e| encode("params", e))?;
    let disposition = match close.code.disposition() {
        // A reset of a step already running remotely keeps polling the same remote job.
        QueueDisposition::Requeue if task.remote.is_some() => QueueDisposition::RunningRemote,
        disposition => disposition,
    };
    let remote_json = match (disposition, task.remote.as_ref()) {
        (QueueDisposition::RunningRemote, Some(descriptor)) => {
            Some(serde_json::to_string(descriptor).map_err(|e| encode("remote descriptor", e))?)
        }
        _ => None,
    };
    let processor = match disposition {
        QueueDisposition::Requeue => None,
        _ => Some(manager),
    };
    let finished_at = match disposition {
        QueueDisposition::Complete | QueueDisposition::Failed => Some(now),
        QueueDisposition::Requeue | QueueDisposition::RunningRemote => None,
    };
    let next_attempt_at = match disposition {
        QueueDisposition::Requeue | QueueDisposition::RunningRemote => close.next_attempt_at,
        _ => 0,
    };

    let updated = connection
        .execute(
            "
            UPDATE job_steps
            SET state = ?1,
                processor = ?2,
                result_code = ?3,
                completion_message = ?4,
                remote_descriptor = ?5,
                params = ?6,
                next_attempt_at = ?7,
                finished_at = ?8
            WHERE job = ?9 AND step = ?10 AND state = ?11 AND processor = ?12
            ",
            params![
                disposition.as_state(),
                processor,
                close.code.as_str(),
                close.message,
                remote_json,
                params_json,
                next_attempt_at,
                finished_at,
                task.job,
                task.step,
                STATE_RUNNING,
                manager,
            ],
        )
        .map_err(sql)?;
    if updated == 0 {
        return Err(QueueError::NotClaimed {
            job: task.job,
            step: task.step,
            manager: manager.to_string(),
        });
    }
    Ok(())
}

/// Rows still `running` under `manager` belong to a process that died mid-step. Rows that
/// carry a remote descriptor go back to remote polling; the rest are requeued.
pub fn recover_orphaned(connection: &Connection, manager: &str) -> Result<usize, QueueError> {
    let remote = connection
        .execute(
            "
            UPDATE job_steps SET state = ?1, next_attempt_at = 0
            WHERE state = ?2 AND processor = ?3 AND remote_descriptor IS NOT NULL
            ",
            params![STATE_RUNNING_REMOTE, STATE_RUNNING, manager],
        )
        .map_err(sql)?;
    let local = connection
        .execute(
            "
            UPDATE job_steps SET state = ?1, processor = NULL, next_attempt_at = 0
            WHERE state = ?2 AND processor = ?3
            ",
            params![STATE_PENDING, STATE_RUNNING, manager],
        )
        .map_err(sql)?;
    Ok(remote + local)
}
