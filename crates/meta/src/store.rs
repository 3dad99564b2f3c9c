use crate::records::{JobRecord, RequestRecord};
use skyq_common::{
    ControllerId, FileInfo, ReplicaInfo, ReplicaStatus, Result, SkyqError, TuningConfig,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Distinguishes shared-cache in-memory databases handed out for
/// `sqlite::memory:`, so the iterator and writer pools of one gateway see
/// the same data while separate gateways stay isolated.
static MEMORY_DB_SEQ: AtomicU64 = AtomicU64::new(0);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS controller (
    id          TEXT PRIMARY KEY,
    host        TEXT NOT NULL,
    pid         INTEGER NOT NULL,
    start_time  INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS job (
    id             TEXT PRIMARY KEY,
    controller_id  TEXT NOT NULL REFERENCES controller(id),
    parent_job_id  TEXT,
    type           TEXT NOT NULL,
    state          TEXT NOT NULL,
    ext_state      TEXT NOT NULL,
    begin_time     INTEGER NOT NULL,
    end_time       INTEGER NOT NULL,
    heartbeat      INTEGER NOT NULL,
    priority       INTEGER NOT NULL,
    exclusive      INTEGER NOT NULL,
    preemptable    INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS job_ext (
    job_id  TEXT NOT NULL REFERENCES job(id),
    param   TEXT NOT NULL,
    value   TEXT NOT NULL,
    PRIMARY KEY (job_id, param)
);
CREATE TABLE IF NOT EXISTS request (
    id              TEXT PRIMARY KEY,
    job_id          TEXT NOT NULL REFERENCES job(id),
    type            TEXT NOT NULL,
    worker          TEXT NOT NULL,
    priority        INTEGER NOT NULL,
    state           TEXT NOT NULL,
    ext_state       TEXT NOT NULL,
    server_status   TEXT NOT NULL,
    c_create_time   INTEGER NOT NULL,
    c_start_time    INTEGER NOT NULL,
    w_receive_time  INTEGER NOT NULL,
    w_start_time    INTEGER NOT NULL,
    w_finish_time   INTEGER NOT NULL,
    c_finish_time   INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS request_ext (
    request_id  TEXT NOT NULL REFERENCES request(id),
    param       TEXT NOT NULL,
    value       TEXT NOT NULL,
    PRIMARY KEY (request_id, param)
);
CREATE TABLE IF NOT EXISTS replica (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    worker       TEXT NOT NULL,
    database     TEXT NOT NULL,
    chunk        INTEGER NOT NULL,
    status       TEXT NOT NULL,
    verify_time  INTEGER NOT NULL,
    UNIQUE (worker, database, chunk)
);
CREATE TABLE IF NOT EXISTS replica_file (
    replica_id         INTEGER NOT NULL REFERENCES replica(id) ON DELETE CASCADE,
    name               TEXT NOT NULL,
    size               INTEGER NOT NULL,
    mtime              INTEGER NOT NULL,
    cs                 TEXT NOT NULL,
    begin_create_time  INTEGER NOT NULL,
    end_create_time    INTEGER NOT NULL,
    PRIMARY KEY (replica_id, name)
);
CREATE TABLE IF NOT EXISTS master_lock (
    name           TEXT PRIMARY KEY,
    controller_id  TEXT NOT NULL,
    lock_time      INTEGER NOT NULL
);
"#;

fn store_err(e: sqlx::Error) -> SkyqError {
    SkyqError::Store(e.to_string())
}

fn is_duplicate_key(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Typed gateway to the relational metadata store.
///
/// `iter_pool` serves result-set iteration, `write_pool` serves point
/// writes; separating the two avoids reentrancy deadlock during set-based
/// syncs that read and write the same scope.
pub struct MetaStore {
    iter_pool: SqlitePool,
    write_pool: SqlitePool,
    retry_budget: u32,
}

impl MetaStore {
    /// Connect both pools and create the schema when missing.
    pub async fn connect(url: &str, tuning: &TuningConfig) -> Result<Self> {
        let url = if url == "sqlite::memory:" {
            let n = MEMORY_DB_SEQ.fetch_add(1, Ordering::SeqCst);
            format!("sqlite:file:skyq_meta_mem_{n}?mode=memory&cache=shared")
        } else {
            url.to_string()
        };
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(store_err)?
            .create_if_missing(true)
            .foreign_keys(true);
        let connect = |size| {
            SqlitePoolOptions::new()
                .min_connections(1)
                .max_connections(size)
                .acquire_timeout(Duration::from_secs(tuning.store_connect_timeout_sec))
                .connect_with(options.clone())
        };
        let iter_pool = connect(2).await.map_err(store_err)?;
        let write_pool = connect(1).await.map_err(store_err)?;
        let store = Self {
            iter_pool,
            write_pool,
            retry_budget: tuning.store_retry_budget,
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        for stmt in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(stmt)
                .execute(&self.write_pool)
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Controller identity & leader lock
    // -----------------------------------------------------------------

    /// Record this controller instance.
    pub async fn register_controller(
        &self,
        id: ControllerId,
        host: &str,
        pid: u32,
        start_time: u64,
    ) -> Result<()> {
        let mut last = None;
        for _ in 0..=self.retry_budget {
            let res = sqlx::query(
                "INSERT INTO controller (id, host, pid, start_time) VALUES (?, ?, ?, ?)",
            )
            .bind(id.to_string())
            .bind(host)
            .bind(pid as i64)
            .bind(start_time as i64)
            .execute(&self.write_pool)
            .await;
            let outcome = match res {
                Ok(_) => Ok(()),
                Err(e) if is_duplicate_key(&e) => sqlx::query(
                    "UPDATE controller SET host = ?, pid = ?, start_time = ? WHERE id = ?",
                )
                .bind(host)
                .bind(pid as i64)
                .bind(start_time as i64)
                .bind(id.to_string())
                .execute(&self.write_pool)
                .await
                .map(|_| ())
                .map_err(store_err),
                Err(e) => Err(store_err(e)),
            };
            match outcome {
                Ok(()) => return Ok(()),
                Err(e) => last = Some(e),
            }
        }
        Err(last.unwrap_or_else(|| SkyqError::Store("retry budget exhausted".to_string())))
    }

    /// Try to become the active controller.
    ///
    /// Returns `false` when another live controller already holds the lock.
    pub async fn acquire_master_lock(&self, id: ControllerId, now: u64) -> Result<bool> {
        let res = sqlx::query(
            "INSERT INTO master_lock (name, controller_id, lock_time) VALUES ('master', ?, ?)",
        )
        .bind(id.to_string())
        .bind(now as i64)
        .execute(&self.write_pool)
        .await;
        match res {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => {
                let holder: Option<String> =
                    sqlx::query("SELECT controller_id FROM master_lock WHERE name = 'master'")
                        .fetch_optional(&self.iter_pool)
                        .await
                        .map_err(store_err)?
                        .map(|r| r.get(0));
                Ok(holder.as_deref() == Some(&id.to_string()))
            }
            Err(e) => Err(store_err(e)),
        }
    }

    /// Probe the lock; any anomaly raises [`SkyqError::LockLost`], which
    /// demotes the instance.
    pub async fn probe_master_lock(&self, id: ControllerId) -> Result<()> {
        let holder: Option<String> =
            sqlx::query("SELECT controller_id FROM master_lock WHERE name = 'master'")
                .fetch_optional(&self.iter_pool)
                .await
                .map_err(|e| SkyqError::LockLost(e.to_string()))?
                .map(|r| r.get(0));
        match holder {
            Some(h) if h == id.to_string() => Ok(()),
            Some(h) => Err(SkyqError::LockLost(format!("lock now held by {h}"))),
            None => Err(SkyqError::LockLost("lock row disappeared".to_string())),
        }
    }

    /// Release the lock on clean shutdown.
    pub async fn release_master_lock(&self, id: ControllerId) -> Result<()> {
        sqlx::query("DELETE FROM master_lock WHERE name = 'master' AND controller_id = ?")
            .bind(id.to_string())
            .execute(&self.write_pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Jobs & requests
    // -----------------------------------------------------------------

    /// Insert or update one job row and its extended attributes.
    pub async fn save_job(&self, job: &JobRecord) -> Result<()> {
        let mut tx = self.write_pool.begin().await.map_err(store_err)?;
        let res = sqlx::query(
            "INSERT INTO job (id, controller_id, parent_job_id, type, state, ext_state, \
             begin_time, end_time, heartbeat, priority, exclusive, preemptable) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id.to_string())
        .bind(job.controller_id.to_string())
        .bind(job.parent_job_id.map(|p| p.to_string()))
        .bind(&job.job_type)
        .bind(&job.state)
        .bind(&job.ext_state)
        .bind(job.begin_time as i64)
        .bind(job.end_time as i64)
        .bind(job.heartbeat as i64)
        .bind(job.priority)
        .bind(job.exclusive)
        .bind(job.preemptable)
        .execute(&mut *tx)
        .await;
        if let Err(e) = res {
            if !is_duplicate_key(&e) {
                return Err(store_err(e));
            }
            sqlx::query(
                "UPDATE job SET state = ?, ext_state = ?, end_time = ?, heartbeat = ? WHERE id = ?",
            )
            .bind(&job.state)
            .bind(&job.ext_state)
            .bind(job.end_time as i64)
            .bind(job.heartbeat as i64)
            .bind(job.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }
        for (param, value) in &job.ext {
            sqlx::query("INSERT OR REPLACE INTO job_ext (job_id, param, value) VALUES (?, ?, ?)")
                .bind(job.id.to_string())
                .bind(param)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)
    }

    /// Insert or update one request row and its extended attributes.
    pub async fn save_request(&self, req: &RequestRecord) -> Result<()> {
        let mut tx = self.write_pool.begin().await.map_err(store_err)?;
        let res = sqlx::query(
            "INSERT INTO request (id, job_id, type, worker, priority, state, ext_state, \
             server_status, c_create_time, c_start_time, w_receive_time, w_start_time, \
             w_finish_time, c_finish_time) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(req.id.to_string())
        .bind(req.job_id.to_string())
        .bind(&req.request_type)
        .bind(&req.worker)
        .bind(req.priority)
        .bind(&req.state)
        .bind(&req.ext_state)
        .bind(&req.server_status)
        .bind(req.c_create_time as i64)
        .bind(req.c_start_time as i64)
        .bind(req.w_receive_time as i64)
        .bind(req.w_start_time as i64)
        .bind(req.w_finish_time as i64)
        .bind(req.c_finish_time as i64)
        .execute(&mut *tx)
        .await;
        if let Err(e) = res {
            if !is_duplicate_key(&e) {
                return Err(store_err(e));
            }
            sqlx::query(
                "UPDATE request SET state = ?, ext_state = ?, server_status = ?, \
                 c_start_time = ?, w_receive_time = ?, w_start_time = ?, w_finish_time = ?, \
                 c_finish_time = ? WHERE id = ?",
            )
            .bind(&req.state)
            .bind(&req.ext_state)
            .bind(&req.server_status)
            .bind(req.c_start_time as i64)
            .bind(req.w_receive_time as i64)
            .bind(req.w_start_time as i64)
            .bind(req.w_finish_time as i64)
            .bind(req.c_finish_time as i64)
            .bind(req.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }
        for (param, value) in &req.ext {
            sqlx::query(
                "INSERT OR REPLACE INTO request_ext (request_id, param, value) VALUES (?, ?, ?)",
            )
            .bind(req.id.to_string())
            .bind(param)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)
    }

    // -----------------------------------------------------------------
    // Replica inventory
    // -----------------------------------------------------------------

    /// Reconcile the persisted inventory of `(worker, database)` with a
    /// freshly reported collection.
    ///
    /// Postcondition: the persisted scope equals `new_collection` exactly.
    pub async fn save_replica_info_collection(
        &self,
        worker: &str,
        database: &str,
        new_collection: &[ReplicaInfo],
    ) -> Result<()> {
        let persisted = self.find_worker_replicas(worker, database).await?;
        let persisted_by_chunk: HashMap<u32, &ReplicaInfo> =
            persisted.iter().map(|r| (r.chunk, r)).collect();
        let new_by_chunk: HashMap<u32, &ReplicaInfo> = new_collection
            .iter()
            .filter(|r| r.worker == worker && r.database == database)
            .map(|r| (r.chunk, r))
            .collect();

        let mut to_delete: Vec<u32> = Vec::new();
        let mut to_insert: Vec<&ReplicaInfo> = Vec::new();
        for (chunk, old) in &persisted_by_chunk {
            match new_by_chunk.get(chunk) {
                None => to_delete.push(*chunk),
                Some(new) => {
                    if new.status != old.status
                        || new.verify_time != old.verify_time
                        || !new.same_files(old)
                    {
                        // Unequal: delete-then-insert replaces the row.
                        to_delete.push(*chunk);
                        to_insert.push(new);
                    }
                }
            }
        }
        for (chunk, new) in &new_by_chunk {
            if !persisted_by_chunk.contains_key(chunk) {
                to_insert.push(new);
            }
        }
        to_delete.sort_unstable();
        to_insert.sort_by_key(|r| r.chunk);

        let mut tx = self.write_pool.begin().await.map_err(store_err)?;
        for chunk in &to_delete {
            sqlx::query(
                "DELETE FROM replica_file WHERE replica_id IN \
                 (SELECT id FROM replica WHERE worker = ? AND database = ? AND chunk = ?)",
            )
            .bind(worker)
            .bind(database)
            .bind(*chunk as i64)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
            sqlx::query("DELETE FROM replica WHERE worker = ? AND database = ? AND chunk = ?")
                .bind(worker)
                .bind(database)
                .bind(*chunk as i64)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        for replica in &to_insert {
            let replica_id = sqlx::query(
                "INSERT INTO replica (worker, database, chunk, status, verify_time) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(worker)
            .bind(database)
            .bind(replica.chunk as i64)
            .bind(replica.status.as_str())
            .bind(replica.verify_time as i64)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?
            .last_insert_rowid();
            for f in &replica.files {
                sqlx::query(
                    "INSERT INTO replica_file (replica_id, name, size, mtime, cs, \
                     begin_create_time, end_create_time) VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(replica_id)
                .bind(&f.name)
                .bind(f.size as i64)
                .bind(f.mtime as i64)
                .bind(&f.cs)
                .bind(f.begin_transfer_time as i64)
                .bind(f.end_transfer_time as i64)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            }
        }
        tx.commit().await.map_err(store_err)?;
        tracing::debug!(
            worker,
            database,
            deleted = to_delete.len(),
            inserted = to_insert.len(),
            "replica inventory synchronized"
        );
        Ok(())
    }

    /// Persisted replicas of one `(worker, database)` scope, chunk order.
    pub async fn find_worker_replicas(
        &self,
        worker: &str,
        database: &str,
    ) -> Result<Vec<ReplicaInfo>> {
        let rows = sqlx::query(
            "SELECT id, chunk, status, verify_time FROM replica \
             WHERE worker = ? AND database = ? ORDER BY chunk",
        )
        .bind(worker)
        .bind(database)
        .fetch_all(&self.iter_pool)
        .await
        .map_err(store_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let replica_id: i64 = row.get(0);
            let chunk: i64 = row.get(1);
            let status: String = row.get(2);
            let verify_time: i64 = row.get(3);
            let files = self.replica_files(replica_id).await?;
            out.push(ReplicaInfo {
                status: ReplicaStatus::parse(&status)
                    .ok_or_else(|| SkyqError::Store(format!("bad replica status: {status}")))?,
                worker: worker.to_string(),
                database: database.to_string(),
                chunk: chunk as u32,
                verify_time: verify_time as u64,
                files,
            });
        }
        Ok(out)
    }

    /// Persisted replicas of one database across all workers, used by job
    /// planning to seed occupancy maps.
    pub async fn find_database_replicas(&self, database: &str) -> Result<Vec<ReplicaInfo>> {
        let rows = sqlx::query(
            "SELECT id, worker, chunk, status, verify_time FROM replica \
             WHERE database = ? ORDER BY worker, chunk",
        )
        .bind(database)
        .fetch_all(&self.iter_pool)
        .await
        .map_err(store_err)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let replica_id: i64 = row.get(0);
            let worker: String = row.get(1);
            let chunk: i64 = row.get(2);
            let status: String = row.get(3);
            let verify_time: i64 = row.get(4);
            let files = self.replica_files(replica_id).await?;
            out.push(ReplicaInfo {
                status: ReplicaStatus::parse(&status)
                    .ok_or_else(|| SkyqError::Store(format!("bad replica status: {status}")))?,
                worker,
                database: database.to_string(),
                chunk: chunk as u32,
                verify_time: verify_time as u64,
                files,
            });
        }
        Ok(out)
    }

    async fn replica_files(&self, replica_id: i64) -> Result<Vec<FileInfo>> {
        let rows = sqlx::query(
            "SELECT name, size, mtime, cs, begin_create_time, end_create_time \
             FROM replica_file WHERE replica_id = ? ORDER BY name",
        )
        .bind(replica_id)
        .fetch_all(&self.iter_pool)
        .await
        .map_err(store_err)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let size: i64 = row.get(1);
                let mtime: i64 = row.get(2);
                let begin: i64 = row.get(4);
                let end: i64 = row.get(5);
                FileInfo {
                    name: row.get(0),
                    size: size as u64,
                    mtime: mtime as u64,
                    cs: row.get(3),
                    begin_transfer_time: begin as u64,
                    end_transfer_time: end as u64,
                }
            })
            .collect())
    }

}
