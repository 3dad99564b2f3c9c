use crate::chunk_lock::ChunkLocker;
use crate::jobs::{DeleteWorkerJob, PurgeJob, RebalanceJob, ReplicateJob};
use crate::request::{now_ms, EchoPolicy, Request};
use async_trait::async_trait;
use skyq_catalog::Catalog;
use skyq_common::{ControllerId, Result, SkyqError, TuningConfig};
use skyq_distributed::Transport;
use skyq_meta::MetaStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};

/// Echo failures in a row before a worker is considered dead and evicted.
const HEALTH_FAILURES_BEFORE_EVICTION: u32 = 3;

/// Shared state of the replication control plane.
pub struct ReplicationContext {
    /// Identity of this controller instance.
    pub controller_id: ControllerId,
    /// Deployment catalog; jobs read it, eviction mutates it.
    pub catalog: RwLock<Catalog>,
    /// RPC fabric to the workers.
    pub transport: Arc<dyn Transport>,
    /// Metadata store gateway.
    pub store: Arc<MetaStore>,
    /// Tuning knobs.
    pub tuning: TuningConfig,
    /// Exclusive chunk locks.
    pub locker: ChunkLocker,
}

impl ReplicationContext {
    /// Assemble a context for one controller process.
    pub fn new(
        catalog: Catalog,
        transport: Arc<dyn Transport>,
        store: Arc<MetaStore>,
        tuning: TuningConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            controller_id: ControllerId::generate(),
            catalog: RwLock::new(catalog),
            transport,
            store,
            tuning,
            locker: ChunkLocker::new(),
        })
    }
}

/// One cooperative control activity run repeatedly by a [`ControlThread`].
#[async_trait]
pub trait ControlLoop: Send + Sync + 'static {
    /// Loop name for diagnostics.
    fn name(&self) -> &'static str;

    /// Perform one iteration of the activity.
    ///
    /// Returning [`SkyqError::Cancelled`] is the graceful "stopped"
    /// sentinel; any other error is abnormal termination and fires the
    /// thread's termination hook.
    async fn iterate(&self, ctx: &Arc<ReplicationContext>) -> Result<()>;
}

/// Hook invoked when a control thread terminates abnormally.
pub type TerminationHook = Arc<dyn Fn(&'static str, &SkyqError) + Send + Sync>;

/// Long-running wrapper around a [`ControlLoop`]: sleep/iterate cycle,
/// per-iteration leader-lock probe, idempotent start/stop.
pub struct ControlThread {
    looper: Arc<dyn ControlLoop>,
    ctx: Arc<ReplicationContext>,
    running: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    on_terminated: Option<TerminationHook>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ControlThread {
    /// Wrap a loop; `on_terminated` fires on abnormal exit.
    pub fn new(
        looper: Arc<dyn ControlLoop>,
        ctx: Arc<ReplicationContext>,
        on_terminated: Option<TerminationHook>,
    ) -> Arc<Self> {
        Arc::new(Self {
            looper,
            ctx,
            running: Arc::new(AtomicBool::new(false)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(Notify::new()),
            on_terminated,
            handle: Mutex::new(None),
        })
    }

    /// Start the loop; returns `false` when it is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.stop_flag.store(false, Ordering::SeqCst);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.run().await;
            this.running.store(false, Ordering::SeqCst);
        });
        *self.handle.lock().expect("handle lock") = Some(handle);
        true
    }

    /// Signal the loop to exit at its next suspension point. Idempotent.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    /// Whether the loop is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Await loop exit after a stop.
    pub async fn join(&self) {
        let handle = self.handle.lock().expect("handle lock").take();
        if let Some(h) = handle {
            let _ = h.await;
        }
    }

    /// Start and poll `predicate` once per second, stopping the loop as
    /// soon as it holds.
    pub async fn start_and_wait(self: &Arc<Self>, predicate: impl Fn() -> bool + Send) {
        self.start();
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if predicate() || !self.is_running() {
                break;
            }
        }
        self.stop();
        self.join().await;
    }

    async fn run(&self) {
        tracing::info!(thread = self.looper.name(), "control thread started");
        loop {
            if self.stop_flag.load(Ordering::SeqCst) {
                break;
            }
            // Leadership is re-checked on every iteration; losing the lock
            // must terminate control threads within one polling interval.
            if let Err(e) = self.ctx.store.probe_master_lock(self.ctx.controller_id).await {
                self.terminated(&e);
                return;
            }
            match self.looper.iterate(&self.ctx).await {
                Ok(()) => {}
                Err(e) if e.is_cooperative() => break,
                Err(e) => {
                    self.terminated(&e);
                    return;
                }
            }
            let sleep = Duration::from_secs(self.ctx.tuning.control_loop_ival_sec);
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = self.stop_notify.notified() => {}
            }
        }
        tracing::info!(thread = self.looper.name(), "control thread stopped");
    }

    fn terminated(&self, e: &SkyqError) {
        tracing::error!(
            thread = self.looper.name(),
            error = %e,
            "control thread terminated abnormally"
        );
        if let Some(hook) = &self.on_terminated {
            hook(self.looper.name(), e);
        }
    }
}

// ---------------------------------------------------------------------------
// Concrete control loops
// ---------------------------------------------------------------------------

/// Echo-probes every enabled worker and evicts those that stay silent.
pub struct HealthMonitorLoop {
    failures: Mutex<HashMap<String, u32>>,
}

impl HealthMonitorLoop {
    /// Fresh monitor with no recorded failures.
    pub fn new() -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for HealthMonitorLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlLoop for HealthMonitorLoop {
    fn name(&self) -> &'static str {
        "health-monitor"
    }

    async fn iterate(&self, ctx: &Arc<ReplicationContext>) -> Result<()> {
        let workers: Vec<String> = {
            let catalog = ctx.catalog.read().expect("catalog lock");
            catalog
                .workers()
                .iter()
                .filter(|w| w.is_enabled)
                .map(|w| w.name.clone())
                .collect()
        };
        let mut dead = Vec::new();
        for worker in workers {
            let request = Request::new(
                worker.clone(),
                EchoPolicy {
                    data: b"ping".to_vec(),
                    delay_ms: 0,
                },
                Duration::from_secs(ctx.tuning.request_expiration_ival_sec),
                0,
            );
            let healthy = request.execute(&*ctx.transport).await.is_ok();
            let mut failures = self.failures.lock().expect("failures lock");
            if healthy {
                failures.remove(&worker);
            } else {
                let n = failures.entry(worker.clone()).or_insert(0);
                *n += 1;
                tracing::warn!(worker = %worker, failures = *n, "worker missed echo probe");
                if *n >= HEALTH_FAILURES_BEFORE_EVICTION {
                    failures.remove(&worker);
                    dead.push(worker);
                }
            }
        }
        for worker in dead {
            tracing::warn!(worker = %worker, "evicting unresponsive worker");
            let job = DeleteWorkerJob::new(worker, false, Arc::clone(ctx));
            if let Err(e) = job.run().await {
                tracing::warn!(error = %e, "eviction job failed");
            }
        }
        Ok(())
    }
}

/// Keeps every family at its configured replication level: replicate up,
/// then purge down.
pub struct ReplicaLevelingLoop;

#[async_trait]
impl ControlLoop for ReplicaLevelingLoop {
    fn name(&self) -> &'static str {
        "replica-leveling"
    }

    async fn iterate(&self, ctx: &Arc<ReplicationContext>) -> Result<()> {
        let families: Vec<(String, usize)> = {
            let catalog = ctx.catalog.read().expect("catalog lock");
            catalog
                .families()
                .iter()
                .map(|f| (f.name.clone(), f.replication_level))
                .collect()
        };
        let jobs: Vec<Arc<ReplicateJob>> = families
            .iter()
            .map(|(family, level)| {
                Arc::new(ReplicateJob::new(family.clone(), *level, Arc::clone(ctx)))
            })
            .collect();
        track(jobs.iter().map(|j| {
            let j = Arc::clone(j);
            async move { j.run().await.map(|_| ()) }
        }))
        .await?;

        for (family, level) in &families {
            let purge = PurgeJob::new(family.clone(), *level, Arc::clone(ctx));
            if let Err(e) = purge.run().await {
                tracing::warn!(family = %family, error = %e, "purge pass failed");
            }
        }
        Ok(())
    }
}

/// Periodically evens chunk placement across workers.
pub struct RebalanceLoop;

#[async_trait]
impl ControlLoop for RebalanceLoop {
    fn name(&self) -> &'static str {
        "rebalance"
    }

    async fn iterate(&self, ctx: &Arc<ReplicationContext>) -> Result<()> {
        let families: Vec<String> = {
            let catalog = ctx.catalog.read().expect("catalog lock");
            catalog.families().iter().map(|f| f.name.clone()).collect()
        };
        let jobs: Vec<Arc<RebalanceJob>> = families
            .iter()
            .map(|f| Arc::new(RebalanceJob::new(f.clone(), false, Arc::clone(ctx))))
            .collect();
        track(jobs.iter().map(|j| {
            let j = Arc::clone(j);
            async move { j.run().await.map(|_| ()) }
        }))
        .await
    }
}

/// Run one job per family in parallel and poll the shared completion
/// count once per second until every child finished.
async fn track<F>(futures: impl Iterator<Item = F>) -> Result<()>
where
    F: std::future::Future<Output = Result<()>> + Send + 'static,
{
    let mut set = JoinSet::new();
    for f in futures {
        set.spawn(f);
    }
    let mut num_finished_jobs = 0;
    let total = set.len();
    let mut first_error = None;
    while num_finished_jobs < total {
        match tokio::time::timeout(Duration::from_secs(1), set.join_next()).await {
            Err(_) => continue, // poll tick, nothing finished this second
            Ok(None) => break,
            Ok(Some(joined)) => {
                num_finished_jobs += 1;
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                    Err(join) => {
                        if first_error.is_none() {
                            first_error = Some(SkyqError::Internal(format!(
                                "job task panicked: {join}"
                            )));
                        }
                    }
                }
            }
        }
    }
    match first_error {
        None => Ok(()),
        Some(e) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// The replication-system process: at most one instance is active per
/// deployment, enforced by the `master_lock` row in the metadata store.
pub struct Controller {
    ctx: Arc<ReplicationContext>,
    threads: Mutex<Vec<Arc<ControlThread>>>,
    demoted: Arc<AtomicBool>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("controller_id", &self.ctx.controller_id)
            .field("demoted", &self.demoted.load(std::sync::atomic::Ordering::Relaxed))
            .finish()
    }
}

impl Controller {
    /// Register the instance and take the leader lock.
    ///
    /// Fails with [`SkyqError::LockLost`] when another controller is
    /// already active.
    pub async fn elect(ctx: Arc<ReplicationContext>, host: &str) -> Result<Arc<Self>> {
        ctx.store
            .register_controller(ctx.controller_id, host, std::process::id(), now_ms())
            .await?;
        if !ctx
            .store
            .acquire_master_lock(ctx.controller_id, now_ms())
            .await?
        {
            return Err(SkyqError::LockLost(
                "another controller instance holds the leader lock".to_string(),
            ));
        }
        tracing::info!(controller_id = %ctx.controller_id, "controller elected leader");
        Ok(Arc::new(Self {
            ctx,
            threads: Mutex::new(Vec::new()),
            demoted: Arc::new(AtomicBool::new(false)),
        }))
    }

    /// Shared control-plane state.
    pub fn context(&self) -> &Arc<ReplicationContext> {
        &self.ctx
    }

    /// Whether this instance lost leadership.
    pub fn is_demoted(&self) -> bool {
        self.demoted.load(Ordering::SeqCst)
    }

    /// Start the standard control loops.
    pub fn start(self: &Arc<Self>) {
        let loops: Vec<Arc<dyn ControlLoop>> = vec![
            Arc::new(HealthMonitorLoop::new()),
            Arc::new(ReplicaLevelingLoop),
            Arc::new(RebalanceLoop),
        ];
        let weak: Weak<Controller> = Arc::downgrade(self);
        let hook: TerminationHook = Arc::new(move |name, err| {
            if let Some(controller) = weak.upgrade() {
                if matches!(err, SkyqError::LockLost(_)) {
                    tracing::error!(thread = name, "leader lock lost; demoting controller");
                }
                controller.demote();
            }
        });
        let mut threads = self.threads.lock().expect("threads lock");
        for looper in loops {
            let thread = ControlThread::new(looper, Arc::clone(&self.ctx), Some(Arc::clone(&hook)));
            thread.start();
            threads.push(thread);
        }
    }

    /// Stop every control thread; the demoted flag stays set so callers
    /// can tell a demotion from a clean shutdown.
    pub fn demote(&self) {
        self.demoted.store(true, Ordering::SeqCst);
        for t in self.threads.lock().expect("threads lock").iter() {
            t.stop();
        }
    }

    /// Clean shutdown: stop threads and release the leader lock.
    pub async fn shutdown(&self) -> Result<()> {
        let threads: Vec<Arc<ControlThread>> = {
            let mut guard = self.threads.lock().expect("threads lock");
            guard.drain(..).collect()
        };
        for t in &threads {
            t.stop();
        }
        for t in &threads {
            t.join().await;
        }
        self.ctx
            .store
            .release_master_lock(self.ctx.controller_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyq_distributed::{TransportSession, WireRequest};
    use std::sync::atomic::AtomicU32;

    struct DownTransport;

    #[async_trait]
    impl Transport for DownTransport {
        async fn submit(&self, _worker: &str, _request: WireRequest) -> Result<TransportSession> {
            Err(SkyqError::Transport("network down".to_string()))
        }
    }

    struct CountingLoop {
        ticks: Arc<AtomicU32>,
    }

    #[async_trait]
    impl ControlLoop for CountingLoop {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn iterate(&self, _ctx: &Arc<ReplicationContext>) -> Result<()> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn test_ctx() -> Arc<ReplicationContext> {
        let tuning = TuningConfig {
            control_loop_ival_sec: 1,
            ..TuningConfig::default()
        };
        let store = Arc::new(
            MetaStore::connect("sqlite::memory:", &tuning)
                .await
                .expect("store"),
        );
        ReplicationContext::new(
            Catalog::new(),
            Arc::new(DownTransport),
            store,
            tuning,
        )
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_exits_the_loop() {
        let ctx = test_ctx().await;
        assert!(ctx
            .store
            .acquire_master_lock(ctx.controller_id, 1)
            .await
            .expect("lock"));
        let ticks = Arc::new(AtomicU32::new(0));
        let thread = ControlThread::new(
            Arc::new(CountingLoop {
                ticks: Arc::clone(&ticks),
            }),
            Arc::clone(&ctx),
            None,
        );
        assert!(thread.start());
        assert!(!thread.start(), "second start reports already running");
        tokio::time::sleep(Duration::from_millis(100)).await;
        thread.stop();
        thread.stop(); // idempotent
        thread.join().await;
        assert!(ticks.load(Ordering::SeqCst) >= 1);
        assert!(!thread.is_running());
    }

    #[tokio::test]
    async fn lost_leader_lock_terminates_the_thread() {
        let ctx = test_ctx().await;
        assert!(ctx
            .store
            .acquire_master_lock(ctx.controller_id, 1)
            .await
            .expect("lock"));
        // Another instance steals the lock.
        ctx.store
            .release_master_lock(ctx.controller_id)
            .await
            .expect("release");
        let other = ControllerId::generate();
        assert!(ctx.store.acquire_master_lock(other, 2).await.expect("steal"));

        let fired = Arc::new(AtomicBool::new(false));
        let fired_hook = Arc::clone(&fired);
        let hook: TerminationHook = Arc::new(move |_name, err| {
            assert!(matches!(err, SkyqError::LockLost(_)));
            fired_hook.store(true, Ordering::SeqCst);
        });
        let thread = ControlThread::new(
            Arc::new(CountingLoop {
                ticks: Arc::new(AtomicU32::new(0)),
            }),
            Arc::clone(&ctx),
            Some(hook),
        );
        thread.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(fired.load(Ordering::SeqCst), "termination hook must fire");
        assert!(!thread.is_running());
    }

    #[tokio::test]
    async fn second_controller_is_refused_election() {
        let ctx_a = test_ctx().await;
        let controller = Controller::elect(Arc::clone(&ctx_a), "host-a")
            .await
            .expect("first controller");
        assert!(!controller.is_demoted());

        // A second instance against the same store is refused.
        let ctx_b = Arc::new(ReplicationContext {
            controller_id: ControllerId::generate(),
            catalog: RwLock::new(Catalog::new()),
            transport: Arc::new(DownTransport),
            store: Arc::clone(&ctx_a.store),
            tuning: ctx_a.tuning.clone(),
            locker: ChunkLocker::new(),
        });
        let err = Controller::elect(ctx_b, "host-b")
            .await
            .expect_err("must be refused");
        assert!(matches!(err, SkyqError::LockLost(_)));

        controller.shutdown().await.expect("shutdown");
    }
}
