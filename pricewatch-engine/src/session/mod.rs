//! Browser automation sessions
//!
//! A [`Session`] is one live browser controlled through a driver process.
//! Sessions are expensive (a browser costs 100-300 MB), so they are only
//! handed out through the bounded [`pool::SessionPool`], which wraps each one
//! in a [`SessionHandle`] carrying its usage bookkeeping.

pub mod pool;
pub mod webdriver;

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::CrawlResult;
use crate::process;
use pool::PoolConfig;

/// Driver error fragments that mean the browser session is gone
const SESSION_DEAD_MARKERS: &[&str] = &[
    "connection refused",
    "connection aborted",
    "remotedisconnected",
    "remote end closed connection",
    "max retries exceeded",
    "session deleted",
    "session not created",
    "invalid session id",
    "no such session",
    "session timed out",
    "connection reset",
    "broken pipe",
];

/// Checks whether a driver error message indicates a dead session
pub fn is_session_dead_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    SESSION_DEAD_MARKERS.iter().any(|m| lower.contains(m))
}

/// A live browser session
#[async_trait]
pub trait Session: Send + Sync {
    /// Loads `url`, waits `settle` for scripts to run and returns the page markup
    async fn navigate(&mut self, url: &str, settle: Duration) -> CrawlResult<String>;

    /// Cheap liveness probe
    async fn ping(&mut self) -> bool;

    /// Graceful shutdown of the browser and its driver
    async fn quit(&mut self) -> CrawlResult<()>;

    /// OS processes backing this session, including descendants it has
    /// already seen; must stay valid until the session is dropped
    fn pids(&self) -> Vec<u32>;
}

/// Creates new sessions for the pool
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> CrawlResult<Box<dyn Session>>;
}

/// A pooled session together with its usage bookkeeping
pub struct SessionHandle {
    pub(crate) id: u64,
    pub(crate) session: Box<dyn Session>,
    pub(crate) request_count: u32,
    pub(crate) created_at: Instant,
    pub(crate) last_used_at: Instant,
    pub(crate) dead: bool,
    pub(crate) generation: u64,
}

impl SessionHandle {
    pub(crate) fn new(id: u64, session: Box<dyn Session>, generation: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            session,
            request_count: 0,
            created_at: now,
            last_used_at: now,
            dead: false,
            generation,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn request_count(&self) -> u32 {
        self.request_count
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn mark_dead(&mut self) {
        self.dead = true;
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    /// Records one checkout of this handle
    pub(crate) fn touch(&mut self) {
        self.request_count += 1;
        self.last_used_at = Instant::now();
    }

    /// Whether the handle must be destroyed instead of reused
    ///
    /// Cheap checks run first; the liveness probe only runs for handles that
    /// are otherwise still usable.
    pub async fn should_recycle(&mut self, config: &PoolConfig) -> bool {
        if self.dead
            || self.request_count >= config.max_requests_per_session
            || self.age() >= config.max_age
        {
            return true;
        }

        if !self.session.ping().await {
            self.dead = true;
            return true;
        }

        false
    }

    /// Graceful quit, short grace, then force-kill of every tracked process
    ///
    /// Never fails: a session that is already gone is the expected case.
    pub(crate) async fn destroy(mut self, grace: Duration) {
        // Snapshot before quitting: children of a dead driver are reparented
        let pids = process::process_trees(&self.session.pids()).await;
        debug!(
            "Destroying session #{} ({} requests, pids {:?})",
            self.id, self.request_count, pids
        );

        match tokio::time::timeout(grace * 10, self.session.quit()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Session #{} quit failed: {}", self.id, e),
            Err(_) => debug!("Session #{} quit timed out", self.id),
        }

        tokio::time::sleep(grace).await;
        process::kill_pids(&pids).await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory sessions for pool and adapter tests

    use super::*;
    use crate::error::CrawlError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Counters shared by every fake session of a factory
    #[derive(Default)]
    pub struct FakeCounters {
        pub created: AtomicUsize,
        pub quit: AtomicUsize,
        pub live: AtomicUsize,
        pub peak_live: AtomicUsize,
        pub navigations: AtomicUsize,
    }

    pub struct FakeSession {
        counters: Arc<FakeCounters>,
        alive: Arc<AtomicBool>,
        markup: String,
        closed: bool,
    }

    #[async_trait]
    impl Session for FakeSession {
        async fn navigate(&mut self, url: &str, _settle: Duration) -> CrawlResult<String> {
            self.counters.navigations.fetch_add(1, Ordering::SeqCst);
            if !self.alive.load(Ordering::SeqCst) {
                return Err(CrawlError::from_driver_message("invalid session id"));
            }
            Ok(format!("{} <!-- {} -->", self.markup, url))
        }

        async fn ping(&mut self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        async fn quit(&mut self) -> CrawlResult<()> {
            if !self.closed {
                self.closed = true;
                self.counters.quit.fetch_add(1, Ordering::SeqCst);
                self.counters.live.fetch_sub(1, Ordering::SeqCst);
            }
            Ok(())
        }

        fn pids(&self) -> Vec<u32> {
            Vec::new()
        }
    }

    /// Factory producing [`FakeSession`]s
    pub struct FakeFactory {
        pub counters: Arc<FakeCounters>,
        pub markup: String,
        pub fail_creates: AtomicBool,
        /// Liveness switch of every session created so far
        pub switches: std::sync::Mutex<Vec<Arc<AtomicBool>>>,
    }

    impl FakeFactory {
        pub fn new(markup: impl Into<String>) -> Arc<Self> {
            Arc::new(Self {
                counters: Arc::new(FakeCounters::default()),
                markup: markup.into(),
                fail_creates: AtomicBool::new(false),
                switches: std::sync::Mutex::new(Vec::new()),
            })
        }

        /// Kills every session created so far
        pub fn kill_all(&self) {
            for switch in self.switches.lock().unwrap().iter() {
                switch.store(false, Ordering::SeqCst);
            }
        }
    }

    #[async_trait]
    impl SessionFactory for FakeFactory {
        async fn create(&self) -> CrawlResult<Box<dyn Session>> {
            if self.fail_creates.load(Ordering::SeqCst) {
                return Err(CrawlError::Network("driver failed to start".to_string()));
            }
            self.counters.created.fetch_add(1, Ordering::SeqCst);
            let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.counters.peak_live.fetch_max(live, Ordering::SeqCst);

            let alive = Arc::new(AtomicBool::new(true));
            self.switches.lock().unwrap().push(Arc::clone(&alive));

            Ok(Box::new(FakeSession {
                counters: Arc::clone(&self.counters),
                alive,
                markup: self.markup.clone(),
                closed: false,
            }))
        }
    }
}
