//! Bounded browser session pool
//!
//! Hands out at most `max_sessions` live sessions. Live counts every session
//! that owns OS resources: idle, checked out, being created or being
//! destroyed. A checked-out session is returned automatically when its
//! [`PooledSession`] guard is dropped.
//!
//! Sessions are recycled lazily at acquire time (dead, worn out, too old or
//! failing the liveness probe) and by a background sweep that evicts
//! sessions idle for longer than `idle_timeout`.

use pricewatch_core::dto::system::PoolStats;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{SessionFactory, SessionHandle};
use crate::error::{CrawlError, CrawlResult, ErrorKind};
use crate::process;

/// Session pool limits
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Hard cap on live sessions
    pub max_sessions: usize,

    /// Checkouts after which a session is recycled
    pub max_requests_per_session: u32,

    /// Age after which a session is recycled
    pub max_age: Duration,

    /// Idle time after which the sweep evicts a session
    pub idle_timeout: Duration,

    /// How often the idle sweep runs
    pub sweep_interval: Duration,

    /// Pause between graceful quit and force-kill
    pub destroy_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 2,
            max_requests_per_session: 30,
            max_age: Duration::from_secs(300),
            idle_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
            destroy_grace: Duration::from_millis(300),
        }
    }
}

/// Bounded pool of browser sessions
///
/// Cheap to clone; all clones share the same sessions.
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: PoolConfig,
    factory: Arc<dyn SessionFactory>,
    state: Mutex<PoolState>,
    available: Notify,
    next_id: AtomicU64,
    sweeper_started: AtomicBool,
    shutdown: CancellationToken,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<SessionHandle>,
    checked_out: usize,
    creating: usize,
    destroying: usize,
    generation: u64,
    closed: bool,
    total_created: u64,
    total_requests: u64,
    recycled_count: u64,
    peak_live: usize,
    last_cleanup: Option<chrono::DateTime<chrono::Utc>>,
}

impl PoolState {
    fn live(&self) -> usize {
        self.idle.len() + self.checked_out + self.creating + self.destroying
    }

    fn note_live(&mut self) {
        self.peak_live = self.peak_live.max(self.live());
    }

    fn take_idle(&mut self) -> Vec<SessionHandle> {
        let taken: Vec<SessionHandle> = self.idle.drain(..).collect();
        self.destroying += taken.len();
        taken
    }
}

enum Step {
    Reuse(SessionHandle),
    Create,
    Wait,
}

impl SessionPool {
    pub fn new(config: PoolConfig, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                state: Mutex::new(PoolState::default()),
                available: Notify::new(),
                next_id: AtomicU64::new(1),
                sweeper_started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Starts the background idle sweep; later calls are no-ops
    pub fn start(&self) {
        if self.inner.sweeper_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let pool = self.clone();
        let token = self.inner.shutdown.clone();
        let every = self.inner.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval(every);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        pool.sweep_idle().await;
                    }
                }
            }

            debug!("Session sweep stopped");
        });
    }

    /// Checks out a session, waiting up to `timeout` for one to free up
    ///
    /// Idle sessions are probed first and recycled when unfit. A new session
    /// is created only while the pool is under its cap.
    pub async fn acquire(&self, timeout: Duration) -> CrawlResult<PooledSession> {
        let inner = &self.inner;
        let deadline = Instant::now() + timeout;

        loop {
            let notified = inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let step = {
                let mut state = inner.lock();
                if state.closed {
                    return Err(CrawlError::PoolClosed);
                }

                if let Some(handle) = state.idle.pop_front() {
                    state.checked_out += 1;
                    Step::Reuse(handle)
                } else if state.live() < inner.config.max_sessions {
                    state.creating += 1;
                    state.note_live();
                    Step::Create
                } else {
                    Step::Wait
                }
            };

            match step {
                Step::Reuse(handle) => {
                    let mut session = PooledSession::new(handle, Arc::clone(inner));
                    if session.needs_recycle().await {
                        debug!("Recycling session #{} at acquire", session.id());
                        session.mark_dead();
                        drop(session);
                        continue;
                    }
                    self.record_checkout(&mut session);
                    return Ok(session);
                }
                Step::Create => {
                    let slot = CreateSlot {
                        inner,
                        armed: true,
                    };
                    let created = inner.factory.create().await;
                    match created {
                        Ok(raw) => {
                            let handle = slot.fill(raw);
                            info!("Created browser session #{}", handle.id);
                            let mut session = PooledSession::new(handle, Arc::clone(inner));
                            self.record_checkout(&mut session);
                            return Ok(session);
                        }
                        Err(e) => {
                            drop(slot);
                            warn!("Failed to create browser session: {}", e);
                            return Err(e);
                        }
                    }
                }
                Step::Wait => {
                    if time::timeout_at(deadline, notified.as_mut()).await.is_err() {
                        return Err(CrawlError::PoolExhausted(timeout));
                    }
                }
            }
        }
    }

    /// Destroys idle sessions unused for longer than `idle_timeout`
    pub async fn sweep_idle(&self) -> usize {
        let idle_timeout = self.inner.config.idle_timeout;
        let expired: Vec<SessionHandle> = {
            let mut state = self.inner.lock();
            let (keep, expired): (VecDeque<_>, VecDeque<_>) = state
                .idle
                .drain(..)
                .partition(|h| h.idle_for() < idle_timeout);
            state.idle = keep;
            state.destroying += expired.len();
            state.last_cleanup = Some(chrono::Utc::now());
            expired.into()
        };

        let count = expired.len();
        for handle in expired {
            self.inner.destroy_counted(handle).await;
        }

        if count > 0 {
            info!("Evicted {} idle browser session(s)", count);
        }
        count
    }

    /// Destroys every idle session and retires checked-out ones on return
    ///
    /// The pool stays open; new sessions are created on demand.
    pub async fn drain(&self) -> usize {
        let drained = {
            let mut state = self.inner.lock();
            state.generation += 1;
            state.take_idle()
        };

        let count = drained.len();
        for handle in drained {
            self.inner.destroy_counted(handle).await;
        }

        warn!("Drained {} idle browser session(s)", count);
        count
    }

    /// Destroys all sessions and stops the sweep; idempotent
    pub async fn shutdown(&self) {
        let drained = {
            let mut state = self.inner.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.generation += 1;
            state.take_idle()
        };

        self.inner.shutdown.cancel();
        self.inner.available.notify_waiters();

        let count = drained.len();
        for handle in drained {
            self.inner.destroy_counted(handle).await;
        }

        info!("Session pool shut down ({} idle session(s) destroyed)", count);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of sessions currently owning OS resources
    pub fn live_count(&self) -> usize {
        self.inner.lock().live()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        PoolStats {
            total_created: state.total_created,
            total_requests: state.total_requests,
            current_active: state.checked_out,
            pool_size: state.idle.len(),
            recycled_count: state.recycled_count,
            max_sessions: self.inner.config.max_sessions,
            peak_live: state.peak_live,
            last_cleanup: state.last_cleanup,
        }
    }

    fn record_checkout(&self, session: &mut PooledSession) {
        if let Some(handle) = session.handle.as_mut() {
            handle.touch();
        }
        self.inner.lock().total_requests += 1;
    }
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes back a checked-out handle
    fn release(self: &Arc<Self>, handle: SessionHandle) {
        let retired = {
            let mut state = self.lock();
            state.checked_out -= 1;
            if handle.dead || state.closed || handle.generation != state.generation {
                state.destroying += 1;
                Some(handle)
            } else {
                state.idle.push_back(handle);
                None
            }
        };

        match retired {
            None => self.available.notify_one(),
            Some(handle) => self.destroy_detached(handle),
        }
    }

    /// Destroys a handle already counted in `destroying`
    async fn destroy_counted(&self, handle: SessionHandle) {
        handle.destroy(self.config.destroy_grace).await;
        self.finish_destroy();
    }

    fn destroy_detached(self: &Arc<Self>, handle: SessionHandle) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let inner = Arc::clone(self);
                runtime.spawn(async move {
                    inner.destroy_counted(handle).await;
                });
            }
            Err(_) => {
                // Outside a runtime only the synchronous kill is possible
                process::kill_pids_blocking(&handle.session.pids());
                self.finish_destroy();
            }
        }
    }

    fn finish_destroy(&self) {
        {
            let mut state = self.lock();
            state.destroying -= 1;
            state.recycled_count += 1;
        }
        self.available.notify_one();
    }
}

/// Reserved creation slot, released if creation fails or is abandoned
struct CreateSlot<'a> {
    inner: &'a Arc<PoolInner>,
    armed: bool,
}

impl CreateSlot<'_> {
    fn fill(mut self, session: Box<dyn super::Session>) -> SessionHandle {
        self.armed = false;
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let mut state = self.inner.lock();
        state.creating -= 1;
        state.checked_out += 1;
        state.total_created += 1;
        SessionHandle::new(id, session, state.generation)
    }
}

impl Drop for CreateSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.lock().creating -= 1;
            self.inner.available.notify_one();
        }
    }
}

/// A checked-out session; returned to the pool on drop
pub struct PooledSession {
    handle: Option<SessionHandle>,
    pool: Arc<PoolInner>,
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession").field("id", &self.id()).finish_non_exhaustive()
    }
}

impl PooledSession {
    fn new(handle: SessionHandle, pool: Arc<PoolInner>) -> Self {
        Self {
            handle: Some(handle),
            pool,
        }
    }

    pub fn id(&self) -> u64 {
        self.handle.as_ref().map(|h| h.id).unwrap_or_default()
    }

    /// Checkouts of the underlying session, this one included
    pub fn request_count(&self) -> u32 {
        self.handle.as_ref().map(|h| h.request_count).unwrap_or_default()
    }

    /// Navigates and returns the page markup
    ///
    /// A dead-session error marks the handle so it is destroyed on return
    /// and never handed out again.
    pub async fn navigate(&mut self, url: &str, settle: Duration) -> CrawlResult<String> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(CrawlError::PoolClosed);
        };

        let result = handle.session.navigate(url, settle).await;
        if let Err(e) = &result {
            if e.kind() == ErrorKind::SessionDead {
                warn!("Browser session #{} died: {}", handle.id, e);
                handle.mark_dead();
            }
        }
        result
    }

    /// Forces destruction on return
    pub fn mark_dead(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            handle.mark_dead();
        }
    }

    async fn needs_recycle(&mut self) -> bool {
        let generation = self.pool.lock().generation;
        let config = &self.pool.config;
        match self.handle.as_mut() {
            Some(handle) => handle.generation != generation || handle.should_recycle(config).await,
            None => true,
        }
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::FakeFactory;

    fn pool_with(config: PoolConfig) -> (SessionPool, Arc<FakeFactory>) {
        let factory = FakeFactory::new("<html>price</html>");
        let pool = SessionPool::new(config, factory.clone());
        (pool, factory)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_cycles_never_exceed_cap() {
        let (pool, factory) = pool_with(PoolConfig {
            max_sessions: 2,
            max_requests_per_session: 4,
            ..PoolConfig::default()
        });

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..10 {
                    let mut session = pool.acquire(Duration::from_secs(60)).await.unwrap();
                    session
                        .navigate(&format!("https://shop.example/{i}"), Duration::ZERO)
                        .await
                        .unwrap();
                    time::sleep(Duration::from_millis(5)).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let stats = pool.stats();
        assert!(stats.peak_live <= 2, "peak live was {}", stats.peak_live);
        assert!(factory.counters.peak_live.load(Ordering::SeqCst) <= 2);
        assert_eq!(stats.total_requests, 60);
        assert!(stats.total_created > 2, "worn sessions should have been replaced");
    }

    #[tokio::test(start_paused = true)]
    async fn test_recycled_on_next_acquire_not_mid_use() {
        let (pool, factory) = pool_with(PoolConfig {
            max_sessions: 1,
            max_requests_per_session: 3,
            ..PoolConfig::default()
        });

        let first_id = {
            let session = pool.acquire(Duration::from_secs(1)).await.unwrap();
            session.id()
        };
        for expected in 2..=3 {
            let mut session = pool.acquire(Duration::from_secs(1)).await.unwrap();
            assert_eq!(session.id(), first_id);
            assert_eq!(session.request_count(), expected);
            // Still usable at the limit
            session.navigate("https://a", Duration::ZERO).await.unwrap();
        }

        let session = pool.acquire(Duration::from_secs(5)).await.unwrap();
        assert_ne!(session.id(), first_id);
        assert_eq!(session.request_count(), 1);
        assert_eq!(factory.counters.created.load(Ordering::SeqCst), 2);
        assert_eq!(factory.counters.quit.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().recycled_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out_when_exhausted() {
        let (pool, _factory) = pool_with(PoolConfig {
            max_sessions: 1,
            ..PoolConfig::default()
        });

        let _held = pool.acquire(Duration::from_secs(1)).await.unwrap();
        let err = pool.acquire(Duration::from_millis(100)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PoolExhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_wakes_on_release() {
        let (pool, factory) = pool_with(PoolConfig {
            max_sessions: 1,
            ..PoolConfig::default()
        });

        let held = pool.acquire(Duration::from_secs(1)).await.unwrap();
        let held_id = held.id();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(Duration::from_secs(10)).await.map(|s| s.id()) })
        };

        time::sleep(Duration::from_secs(1)).await;
        drop(held);

        assert_eq!(waiter.await.unwrap().unwrap(), held_id);
        assert_eq!(factory.counters.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_session_is_not_reused() {
        let (pool, factory) = pool_with(PoolConfig::default());

        let dead_id = {
            let mut session = pool.acquire(Duration::from_secs(1)).await.unwrap();
            factory.kill_all();
            let err = session.navigate("https://a", Duration::ZERO).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::SessionDead);
            session.id()
        };

        let session = pool.acquire(Duration::from_secs(5)).await.unwrap();
        assert_ne!(session.id(), dead_id);
        assert_eq!(factory.counters.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_create_releases_slot() {
        let (pool, factory) = pool_with(PoolConfig {
            max_sessions: 1,
            ..PoolConfig::default()
        });

        factory.fail_creates.store(true, Ordering::SeqCst);
        let err = pool.acquire(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.stats().pool_size, 0);

        factory.fail_creates.store(false, Ordering::SeqCst);
        let session = pool.acquire(Duration::from_millis(100)).await;
        assert!(session.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_idle_sessions() {
        let (pool, factory) = pool_with(PoolConfig::default());

        drop(pool.acquire(Duration::from_secs(1)).await.unwrap());
        assert_eq!(pool.sweep_idle().await, 0);

        time::advance(Duration::from_secs(61)).await;
        assert_eq!(pool.sweep_idle().await, 1);

        let stats = pool.stats();
        assert_eq!(stats.pool_size, 0);
        assert!(stats.last_cleanup.is_some());
        assert_eq!(factory.counters.quit.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_retires_checked_out_sessions() {
        let (pool, factory) = pool_with(PoolConfig::default());

        let held = pool.acquire(Duration::from_secs(1)).await.unwrap();
        drop(pool.acquire(Duration::from_secs(1)).await.unwrap());
        assert_eq!(pool.stats().pool_size, 1);

        assert_eq!(pool.drain().await, 1);
        drop(held);
        time::sleep(Duration::from_secs(1)).await;

        assert_eq!(pool.live_count(), 0);
        assert_eq!(factory.counters.quit.load(Ordering::SeqCst), 2);

        let fresh = pool.acquire(Duration::from_secs(1)).await.unwrap();
        assert_eq!(fresh.request_count(), 1);
        assert_eq!(factory.counters.created.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_idempotent_and_final() {
        let (pool, factory) = pool_with(PoolConfig::default());
        pool.start();

        drop(pool.acquire(Duration::from_secs(1)).await.unwrap());
        pool.shutdown().await;
        pool.shutdown().await;

        assert!(pool.is_closed());
        assert_eq!(factory.counters.quit.load(Ordering::SeqCst), 1);
        let err = pool.acquire(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PoolClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_wakes_waiters() {
        let (pool, _factory) = pool_with(PoolConfig {
            max_sessions: 1,
            ..PoolConfig::default()
        });

        let held = pool.acquire(Duration::from_secs(1)).await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(Duration::from_secs(600)).await.map(|_| ()) })
        };
        tokio::task::yield_now().await;

        pool.shutdown().await;
        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PoolClosed);
        drop(held);
    }
}
