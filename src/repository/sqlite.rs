//! SQLite adapter: the dependency-free default backend used for local
//! development and the in-repo test suite.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::error::DispatchError;
use crate::ids::{AssignmentId, JobId, QueueId, SpecId, UserId, WorkerId};
use crate::model::{
    Job, JobSpecification, JobStatus, Queue, QueueState, QueueWorkerAssignment, SshAuthMethod, SshCredentials, Worker,
    WorkerState, WorkerStatus, WorkerType,
};

use super::codec;
use super::{JobStatistics, Page, Repository, UserRecord};

pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub async fn connect(url: &str) -> Result<Self, DispatchError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn spec_from_row(row: &SqliteRow) -> Result<JobSpecification, DispatchError> {
    Ok(JobSpecification {
        id: SpecId::parse(row.try_get::<String, _>("id")?.as_str()).map_err(anyhow::Error::from)?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        command: row.try_get("command")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn job_from_row(row: &SqliteRow) -> Result<Job, DispatchError> {
    let runtime_args_raw: String = row.try_get("runtime_args")?;
    let result_raw: Option<String> = row.try_get("result")?;
    let assigned_worker_raw: Option<String> = row.try_get("assigned_worker")?;
    Ok(Job {
        id: JobId::parse(row.try_get::<String, _>("id")?.as_str()).map_err(anyhow::Error::from)?,
        spec_id: SpecId::parse(row.try_get::<String, _>("spec_id")?.as_str()).map_err(anyhow::Error::from)?,
        spec_name: row.try_get("spec_name")?,
        command: row.try_get("command")?,
        status: codec::job_status_parse(&row.try_get::<String, _>("status")?)?,
        progress: row.try_get::<i64, _>("progress")? as u8,
        created_by: row.try_get("created_by")?,
        queue_id: QueueId::parse(row.try_get::<String, _>("queue_id")?.as_str()).map_err(anyhow::Error::from)?,
        assigned_worker: assigned_worker_raw
            .map(|s| WorkerId::parse(&s))
            .transpose()
            .map_err(anyhow::Error::from)?,
        runtime_args: serde_json::from_str(&runtime_args_raw).unwrap_or(Value::Null),
        result: result_raw.and_then(|s| serde_json::from_str(&s).ok()),
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn queue_from_row(row: &SqliteRow) -> Result<Queue, DispatchError> {
    Ok(Queue {
        id: QueueId::parse(row.try_get::<String, _>("id")?.as_str()).map_err(anyhow::Error::from)?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        priority: codec::queue_priority_parse(&row.try_get::<String, _>("priority")?)?,
        strategy: codec::queue_strategy_parse(&row.try_get::<String, _>("strategy")?)?,
        state: codec::queue_state_parse(&row.try_get::<String, _>("state")?)?,
        is_default: row.try_get::<i64, _>("is_default")? != 0,
        round_robin_cursor: row.try_get("round_robin_cursor")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn worker_from_row(row: &SqliteRow) -> Result<Worker, DispatchError> {
    let ssh_username: Option<String> = row.try_get("ssh_username")?;
    let ssh = ssh_username.map(|username| -> Result<SshCredentials, DispatchError> {
        Ok(SshCredentials {
            username,
            auth_method: codec::ssh_auth_method_parse(
                &row.try_get::<Option<String>, _>("ssh_auth_method")?
                    .unwrap_or_else(|| "key".to_string()),
            )?,
            private_key_path: row.try_get("ssh_private_key_path")?,
            password: row.try_get("ssh_password")?,
        })
    });
    let ssh = ssh.transpose()?;

    Ok(Worker {
        id: WorkerId::parse(row.try_get::<String, _>("id")?.as_str()).map_err(anyhow::Error::from)?,
        name: row.try_get("name")?,
        worker_type: codec::worker_type_parse(&row.try_get::<String, _>("worker_type")?)?,
        hostname: row.try_get("hostname")?,
        ip_address: row.try_get("ip_address")?,
        port: row.try_get::<i64, _>("port")? as u16,
        ssh,
        max_jobs: row.try_get::<i64, _>("max_jobs")? as u32,
        current_jobs: row.try_get::<i64, _>("current_jobs")? as u32,
        status: codec::worker_status_parse(&row.try_get::<String, _>("status")?)?,
        state: codec::worker_state_parse(&row.try_get::<String, _>("state")?)?,
        last_seen: row.try_get("last_seen")?,
        error_message: row.try_get("error_message")?,
        consecutive_health_misses: row.try_get::<i64, _>("consecutive_health_misses")? as u32,
        created_at: row.try_get("created_at")?,
    })
}

fn assignment_from_row(row: &SqliteRow) -> Result<QueueWorkerAssignment, DispatchError> {
    Ok(QueueWorkerAssignment {
        id: AssignmentId::parse(row.try_get::<String, _>("id")?.as_str()).map_err(anyhow::Error::from)?,
        queue_id: QueueId::parse(row.try_get::<String, _>("queue_id")?.as_str()).map_err(anyhow::Error::from)?,
        worker_id: WorkerId::parse(row.try_get::<String, _>("worker_id")?.as_str()).map_err(anyhow::Error::from)?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl Repository for SqliteRepository {
    // ---- specs ----

    async fn create_spec(&self, spec: JobSpecification) -> Result<JobSpecification, DispatchError> {
        sqlx::query(
            "INSERT INTO specs (id, name, description, command, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(spec.id.to_string())
        .bind(&spec.name)
        .bind(&spec.description)
        .bind(&spec.command)
        .bind(spec.created_at)
        .bind(spec.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(spec)
    }

    async fn get_spec(&self, id: SpecId) -> Result<Option<JobSpecification>, DispatchError> {
        let row = sqlx::query("SELECT * FROM specs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(spec_from_row).transpose()
    }

    async fn get_spec_by_name(&self, name: &str) -> Result<Option<JobSpecification>, DispatchError> {
        let row = sqlx::query("SELECT * FROM specs WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(spec_from_row).transpose()
    }

    async fn list_specs(&self, page: u32, per_page: u32) -> Result<Page<JobSpecification>, DispatchError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM specs")
            .fetch_one(&self.pool)
            .await?;
        let offset = page.saturating_sub(1) as i64 * per_page as i64;
        let rows = sqlx::query("SELECT * FROM specs ORDER BY created_at DESC LIMIT ? OFFSET ?")
            .bind(per_page as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        let items = rows.iter().map(spec_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            total: total as u64,
            page,
            per_page,
        })
    }

    async fn update_spec(&self, mut spec: JobSpecification) -> Result<JobSpecification, DispatchError> {
        spec.updated_at = chrono::Utc::now();
        sqlx::query("UPDATE specs SET description = ?, command = ?, updated_at = ? WHERE id = ?")
            .bind(&spec.description)
            .bind(&spec.command)
            .bind(spec.updated_at)
            .bind(spec.id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(spec)
    }

    async fn delete_spec(&self, id: SpecId) -> Result<bool, DispatchError> {
        let running: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE spec_id = ? AND status = 'running'",
        )
        .bind(id.to_string())
        .fetch_one(&self.pool)
        .await?;
        if running > 0 {
            return Ok(false);
        }
        let result = sqlx::query("DELETE FROM specs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ---- jobs ----

    async fn create_job(&self, job: Job) -> Result<Job, DispatchError> {
        sqlx::query(
            "INSERT INTO jobs (id, spec_id, spec_name, command, status, progress, created_by, queue_id, \
             assigned_worker, runtime_args, result, error_message, created_at, started_at, completed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id.to_string())
        .bind(job.spec_id.to_string())
        .bind(&job.spec_name)
        .bind(&job.command)
        .bind(codec::job_status_str(job.status))
        .bind(job.progress as i64)
        .bind(&job.created_by)
        .bind(job.queue_id.to_string())
        .bind(job.assigned_worker.map(|w| w.to_string()))
        .bind(job.runtime_args.to_string())
        .bind(job.result.as_ref().map(|v| v.to_string()))
        .bind(&job.error_message)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(job)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, DispatchError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_jobs(
        &self,
        page: u32,
        per_page: u32,
        exclude_status: &[JobStatus],
    ) -> Result<Page<Job>, DispatchError> {
        let excluded: Vec<&'static str> = exclude_status.iter().copied().map(codec::job_status_str).collect();
        let placeholders = std::iter::repeat("?").take(excluded.len()).collect::<Vec<_>>().join(",");
        let where_clause = if excluded.is_empty() {
            String::new()
        } else {
            format!("WHERE status NOT IN ({placeholders})")
        };

        let count_sql = format!("SELECT COUNT(*) FROM jobs {where_clause}");
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for s in &excluded {
            count_query = count_query.bind(*s);
        }
        let total: i64 = count_query.fetch_one(&self.pool).await?;

        let offset = page.saturating_sub(1) as i64 * per_page as i64;
        let list_sql = format!("SELECT * FROM jobs {where_clause} ORDER BY created_at DESC LIMIT ? OFFSET ?");
        let mut list_query = sqlx::query(&list_sql);
        for s in &excluded {
            list_query = list_query.bind(*s);
        }
        list_query = list_query.bind(per_page as i64).bind(offset);
        let rows = list_query.fetch_all(&self.pool).await?;
        let items = rows.iter().map(job_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            total: total as u64,
            page,
            per_page,
        })
    }

    async fn job_statistics(&self) -> Result<JobStatistics, DispatchError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs").fetch_one(&self.pool).await?;
        let status_rows = sqlx::query("SELECT status, COUNT(*) as c FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut by_status = HashMap::new();
        for row in &status_rows {
            let status = codec::job_status_parse(&row.try_get::<String, _>("status")?)?;
            by_status.insert(status, row.try_get::<i64, _>("c")? as u64);
        }
        let spec_rows = sqlx::query("SELECT spec_name, COUNT(*) as c FROM jobs GROUP BY spec_name")
            .fetch_all(&self.pool)
            .await?;
        let mut by_spec = HashMap::new();
        for row in &spec_rows {
            by_spec.insert(row.try_get::<String, _>("spec_name")?, row.try_get::<i64, _>("c")? as u64);
        }
        Ok(JobStatistics {
            total: total as u64,
            by_status,
            by_spec,
        })
    }

    async fn cancel_pending_job(&self, id: JobId) -> Result<Option<Job>, DispatchError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'cancelled', error_message = 'cancelled while pending', completed_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(chrono::Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_job(id).await
    }

    async fn move_pending_job(&self, id: JobId, new_queue: QueueId) -> Result<Option<Job>, DispatchError> {
        let result = sqlx::query("UPDATE jobs SET queue_id = ? WHERE id = ? AND status = 'pending'")
            .bind(new_queue.to_string())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_job(id).await
    }

    async fn delete_job(&self, id: JobId) -> Result<bool, DispatchError> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE id = ? AND status IN ('completed', 'failed', 'cancelled')",
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reserve_dispatch(&self, job_id: JobId, worker_id: WorkerId) -> Result<bool, DispatchError> {
        let mut tx = self.pool.begin().await?;
        let reserved: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM jobs j, workers w WHERE j.id = ? AND w.id = ? AND j.status = 'pending' \
             AND w.current_jobs < w.max_jobs",
        )
        .bind(job_id.to_string())
        .bind(worker_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;
        if reserved.is_none() {
            return Ok(false);
        }

        let now = chrono::Utc::now();
        sqlx::query(
            "UPDATE jobs SET status = 'running', assigned_worker = ?, started_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(worker_id.to_string())
        .bind(now)
        .bind(job_id.to_string())
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE workers SET current_jobs = current_jobs + 1 WHERE id = ?")
            .bind(worker_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn release_reservation(&self, job_id: JobId, worker_id: WorkerId) -> Result<(), DispatchError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE jobs SET status = 'pending', assigned_worker = NULL, started_at = NULL WHERE id = ?",
        )
        .bind(job_id.to_string())
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE workers SET current_jobs = MAX(current_jobs - 1, 0) WHERE id = ?")
            .bind(worker_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_job_progress(&self, job_id: JobId, progress: u8) -> Result<bool, DispatchError> {
        let result = sqlx::query("UPDATE jobs SET progress = ? WHERE id = ? AND status = 'running'")
            .bind(progress as i64)
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_job_terminal(
        &self,
        job_id: JobId,
        status: JobStatus,
        result: Option<Value>,
        error_message: Option<String>,
    ) -> Result<bool, DispatchError> {
        let res = sqlx::query(
            "UPDATE jobs SET status = ?, result = ?, error_message = ?, completed_at = ? \
             WHERE id = ? AND status NOT IN ('completed', 'failed', 'cancelled')",
        )
        .bind(codec::job_status_str(status))
        .bind(result.map(|v| v.to_string()))
        .bind(error_message)
        .bind(chrono::Utc::now())
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn complete_job(
        &self,
        job_id: JobId,
        worker_id: WorkerId,
        status: JobStatus,
        result: Option<Value>,
        error_message: Option<String>,
    ) -> Result<bool, DispatchError> {
        let mut tx = self.pool.begin().await?;
        let res = sqlx::query(
            "UPDATE jobs SET status = ?, result = ?, error_message = ?, completed_at = ? \
             WHERE id = ? AND status NOT IN ('completed', 'failed', 'cancelled')",
        )
        .bind(codec::job_status_str(status))
        .bind(result.map(|v| v.to_string()))
        .bind(error_message)
        .bind(chrono::Utc::now())
        .bind(job_id.to_string())
        .execute(&mut *tx)
        .await?;
        let updated = res.rows_affected() > 0;
        if updated {
            sqlx::query("UPDATE workers SET current_jobs = MAX(current_jobs - 1, 0) WHERE id = ?")
                .bind(worker_id.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(updated)
    }

    async fn oldest_pending_job(&self, queue_id: QueueId) -> Result<Option<Job>, DispatchError> {
        let row = sqlx::query(
            "SELECT * FROM jobs WHERE queue_id = ? AND status = 'pending' ORDER BY created_at ASC, id ASC LIMIT 1",
        )
        .bind(queue_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn fail_stale_running_jobs(&self, reason: &str) -> Result<u64, DispatchError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', error_message = ?, completed_at = ? WHERE status = 'running'",
        )
        .bind(reason)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ---- queues ----

    async fn create_queue(&self, queue: Queue) -> Result<Queue, DispatchError> {
        sqlx::query(
            "INSERT INTO queues (id, name, description, priority, strategy, state, is_default, \
             round_robin_cursor, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(queue.id.to_string())
        .bind(&queue.name)
        .bind(&queue.description)
        .bind(codec::queue_priority_str(queue.priority))
        .bind(codec::queue_strategy_str(queue.strategy))
        .bind(codec::queue_state_str(queue.state))
        .bind(queue.is_default)
        .bind(queue.round_robin_cursor)
        .bind(queue.created_at)
        .bind(queue.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(queue)
    }

    async fn get_queue(&self, id: QueueId) -> Result<Option<Queue>, DispatchError> {
        let row = sqlx::query("SELECT * FROM queues WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(queue_from_row).transpose()
    }

    async fn get_queue_by_name(&self, name: &str) -> Result<Option<Queue>, DispatchError> {
        let row = sqlx::query("SELECT * FROM queues WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(queue_from_row).transpose()
    }

    async fn get_default_queue(&self) -> Result<Option<Queue>, DispatchError> {
        let row = sqlx::query("SELECT * FROM queues WHERE is_default = 1")
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(queue_from_row).transpose()
    }

    async fn list_queues(&self, page: u32, per_page: u32) -> Result<Page<Queue>, DispatchError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queues").fetch_one(&self.pool).await?;
        let offset = page.saturating_sub(1) as i64 * per_page as i64;
        let rows = sqlx::query("SELECT * FROM queues ORDER BY created_at DESC LIMIT ? OFFSET ?")
            .bind(per_page as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        let items = rows.iter().map(queue_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            total: total as u64,
            page,
            per_page,
        })
    }

    async fn list_started_queues(&self) -> Result<Vec<Queue>, DispatchError> {
        let rows = sqlx::query("SELECT * FROM queues WHERE state = 'started'")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(queue_from_row).collect()
    }

    async fn update_queue(&self, mut queue: Queue) -> Result<Queue, DispatchError> {
        queue.updated_at = chrono::Utc::now();
        sqlx::query(
            "UPDATE queues SET description = ?, priority = ?, strategy = ?, is_default = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&queue.description)
        .bind(codec::queue_priority_str(queue.priority))
        .bind(codec::queue_strategy_str(queue.strategy))
        .bind(queue.is_default)
        .bind(queue.updated_at)
        .bind(queue.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(queue)
    }

    async fn set_queue_state(&self, id: QueueId, state: QueueState) -> Result<Option<Queue>, DispatchError> {
        sqlx::query("UPDATE queues SET state = ?, updated_at = ? WHERE id = ?")
            .bind(codec::queue_state_str(state))
            .bind(chrono::Utc::now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        self.get_queue(id).await
    }

    async fn advance_round_robin_cursor(&self, id: QueueId, new_cursor: i64) -> Result<(), DispatchError> {
        sqlx::query("UPDATE queues SET round_robin_cursor = ? WHERE id = ?")
            .bind(new_cursor)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_queue(&self, id: QueueId) -> Result<bool, DispatchError> {
        let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE queue_id = ? AND status = 'pending'")
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await?;
        if pending > 0 {
            return Ok(false);
        }
        let result = sqlx::query("DELETE FROM queues WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn assign_worker_to_queue(
        &self,
        queue_id: QueueId,
        worker_id: WorkerId,
    ) -> Result<QueueWorkerAssignment, DispatchError> {
        let assignment = QueueWorkerAssignment::new(queue_id, worker_id);
        sqlx::query(
            "INSERT INTO queue_worker (id, queue_id, worker_id, created_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT (queue_id, worker_id) DO NOTHING",
        )
        .bind(assignment.id.to_string())
        .bind(queue_id.to_string())
        .bind(worker_id.to_string())
        .bind(assignment.created_at)
        .execute(&self.pool)
        .await?;
        Ok(assignment)
    }

    async fn unassign_worker_from_queue(&self, queue_id: QueueId, worker_id: WorkerId) -> Result<(), DispatchError> {
        sqlx::query("DELETE FROM queue_worker WHERE queue_id = ? AND worker_id = ?")
            .bind(queue_id.to_string())
            .bind(worker_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_queue_workers(&self, queue_id: QueueId) -> Result<Vec<Worker>, DispatchError> {
        let rows = sqlx::query(
            "SELECT w.* FROM workers w JOIN queue_worker qw ON qw.worker_id = w.id WHERE qw.queue_id = ?",
        )
        .bind(queue_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(worker_from_row).collect()
    }

    async fn list_eligible_workers(&self, queue_id: QueueId) -> Result<Vec<Worker>, DispatchError> {
        let rows = sqlx::query(
            "SELECT w.* FROM workers w JOIN queue_worker qw ON qw.worker_id = w.id \
             WHERE qw.queue_id = ? AND w.state = 'started' AND w.status = 'online' AND w.current_jobs < w.max_jobs",
        )
        .bind(queue_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(worker_from_row).collect()
    }

    // ---- workers ----

    async fn create_worker(&self, worker: Worker) -> Result<Worker, DispatchError> {
        sqlx::query(
            "INSERT INTO workers (id, name, worker_type, hostname, ip_address, port, ssh_username, \
             ssh_auth_method, ssh_private_key_path, ssh_password, max_jobs, current_jobs, status, state, \
             last_seen, error_message, consecutive_health_misses, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(worker.id.to_string())
        .bind(&worker.name)
        .bind(codec::worker_type_str(worker.worker_type))
        .bind(&worker.hostname)
        .bind(&worker.ip_address)
        .bind(worker.port as i64)
        .bind(worker.ssh.as_ref().map(|s| s.username.clone()))
        .bind(worker.ssh.as_ref().map(|s| codec::ssh_auth_method_str(s.auth_method)))
        .bind(worker.ssh.as_ref().and_then(|s| s.private_key_path.clone()))
        .bind(worker.ssh.as_ref().and_then(|s| s.password.clone()))
        .bind(worker.max_jobs as i64)
        .bind(worker.current_jobs as i64)
        .bind(codec::worker_status_str(worker.status))
        .bind(codec::worker_state_str(worker.state))
        .bind(worker.last_seen)
        .bind(&worker.error_message)
        .bind(worker.consecutive_health_misses as i64)
        .bind(worker.created_at)
        .execute(&self.pool)
        .await?;
        Ok(worker)
    }

    async fn get_worker(&self, id: WorkerId) -> Result<Option<Worker>, DispatchError> {
        let row = sqlx::query("SELECT * FROM workers WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(worker_from_row).transpose()
    }

    async fn get_worker_by_name(&self, name: &str) -> Result<Option<Worker>, DispatchError> {
        let row = sqlx::query("SELECT * FROM workers WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(worker_from_row).transpose()
    }

    async fn list_workers(&self, page: u32, per_page: u32) -> Result<Page<Worker>, DispatchError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workers").fetch_one(&self.pool).await?;
        let offset = page.saturating_sub(1) as i64 * per_page as i64;
        let rows = sqlx::query("SELECT * FROM workers ORDER BY created_at DESC LIMIT ? OFFSET ?")
            .bind(per_page as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        let items = rows.iter().map(worker_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            total: total as u64,
            page,
            per_page,
        })
    }

    async fn list_monitored_workers(&self) -> Result<Vec<Worker>, DispatchError> {
        let rows = sqlx::query("SELECT * FROM workers WHERE state IN ('started', 'paused')")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(worker_from_row).collect()
    }

    async fn update_worker_max_jobs(&self, id: WorkerId, max_jobs: u32) -> Result<Option<Worker>, DispatchError> {
        sqlx::query("UPDATE workers SET max_jobs = ? WHERE id = ?")
            .bind(max_jobs as i64)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        self.get_worker(id).await
    }

    async fn set_worker_state(&self, id: WorkerId, state: WorkerState) -> Result<Option<Worker>, DispatchError> {
        sqlx::query("UPDATE workers SET state = ? WHERE id = ?")
            .bind(codec::worker_state_str(state))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        self.get_worker(id).await
    }

    async fn record_health_probe(&self, id: WorkerId, success: bool) -> Result<Option<Worker>, DispatchError> {
        if success {
            sqlx::query(
                "UPDATE workers SET status = 'online', last_seen = ?, consecutive_health_misses = 0, \
                 error_message = NULL WHERE id = ?",
            )
            .bind(chrono::Utc::now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query("UPDATE workers SET consecutive_health_misses = consecutive_health_misses + 1 WHERE id = ?")
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
            sqlx::query(
                "UPDATE workers SET status = 'offline' WHERE id = ? AND consecutive_health_misses >= 3",
            )
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        }
        self.get_worker(id).await
    }

    async fn set_worker_status(
        &self,
        id: WorkerId,
        status: WorkerStatus,
        error_message: Option<String>,
    ) -> Result<(), DispatchError> {
        sqlx::query("UPDATE workers SET status = ?, error_message = ? WHERE id = ?")
            .bind(codec::worker_status_str(status))
            .bind(error_message)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_worker(&self, id: WorkerId) -> Result<bool, DispatchError> {
        let is_system: Option<String> = sqlx::query_scalar(
            "SELECT name FROM workers WHERE id = ? AND name = ?",
        )
        .bind(id.to_string())
        .bind(Worker::SYSTEM_WORKER_NAME)
        .fetch_optional(&self.pool)
        .await?;
        if is_system.is_some() {
            return Ok(false);
        }
        let result = sqlx::query("DELETE FROM workers WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cancel_running_jobs_for_worker(&self, worker_id: WorkerId) -> Result<Vec<Job>, DispatchError> {
        let jobs = self.list_running_jobs_for_worker(worker_id).await?;
        sqlx::query(
            "UPDATE jobs SET status = 'cancelled', error_message = 'worker stopped', completed_at = ? \
             WHERE assigned_worker = ? AND status = 'running'",
        )
        .bind(chrono::Utc::now())
        .bind(worker_id.to_string())
        .execute(&self.pool)
        .await?;
        sqlx::query("UPDATE workers SET current_jobs = 0 WHERE id = ?")
            .bind(worker_id.to_string())
            .execute(&self.pool)
            .await?;
        let mut cancelled = Vec::with_capacity(jobs.len());
        for job in jobs {
            if let Some(updated) = self.get_job(job.id).await? {
                cancelled.push(updated);
            }
        }
        Ok(cancelled)
    }

    async fn list_running_jobs_for_worker(&self, worker_id: WorkerId) -> Result<Vec<Job>, DispatchError> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE assigned_worker = ? AND status = 'running'")
            .bind(worker_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    // ---- users ----

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, DispatchError> {
        let row = sqlx::query("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| -> Result<UserRecord, DispatchError> {
            Ok(UserRecord {
                id: UserId::parse(row.try_get::<String, _>("id")?.as_str()).map_err(anyhow::Error::from)?,
                username: row.try_get("username")?,
                password_hash: row.try_get("password_hash")?,
                auth_source: row.try_get("auth_source")?,
                is_admin: row.try_get::<i64, _>("is_admin")? != 0,
            })
        })
        .transpose()
    }

    async fn migrate(&self) -> Result<(), DispatchError> {
        sqlx::migrate!("./migrations/sqlite")
            .run(&self.pool)
            .await
            .map_err(|e| DispatchError::Internal(anyhow::Error::from(e)))
    }
}
