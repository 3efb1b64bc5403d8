//! Explicit-state NNTP connection pool.
//!
//! The pool owns every client it created: a client is always in exactly one
//! of `idle`, lent-out (owned by the borrower), or being closed. Waiters are
//! served FIFO, broken clients are dropped and replaced asynchronously, and
//! idle clients are kept warm with STAT probes until triage goes quiet.

use crate::error::{ErrorKind, NntpError};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use super::activity::{ACTIVITY_IDLE_LIMIT, TriageActivity};
use super::connection::NntpConnector;

/// How long a client may sit idle before a keep-alive STAT is issued.
const IDLE_KEEPALIVE: Duration = Duration::from_secs(30);
/// Overall deadline for one keep-alive probe.
const KEEPALIVE_PROBE_TIMEOUT: Duration = Duration::from_secs(6);
/// Pause between failed replacement attempts.
const REPLACEMENT_RETRY: Duration = Duration::from_secs(1);

/// A client lent out by the pool.
///
/// Must be handed back via [`NntpPool::release`]; the `drop_client` flag on
/// the triggering [`NntpError`] decides whether it returns to `idle` or is
/// closed and replaced.
pub struct PooledClient {
    id: u64,
    client: Box<dyn super::connection::NntpClient>,
}

impl PooledClient {
    /// Probe article existence.
    pub async fn stat(&mut self, message_id: &str) -> Result<(), NntpError> {
        self.client.stat(message_id).await
    }

    /// Fetch an article body.
    pub async fn body(&mut self, message_id: &str) -> Result<Vec<u8>, NntpError> {
        self.client.body(message_id).await
    }

    async fn quit(mut self) {
        self.client.quit().await;
    }
}

struct IdleEntry {
    client: PooledClient,
    keepalive: JoinHandle<()>,
}

#[derive(Default)]
struct PoolState {
    /// Count of clients in `idle` plus lent-out (replacements in flight are
    /// not counted until they connect).
    total: usize,
    idle: Vec<IdleEntry>,
    waiters: VecDeque<oneshot::Sender<PooledClient>>,
    closing: bool,
}

struct PoolInner {
    connector: Arc<dyn NntpConnector>,
    size: usize,
    keep_alive_ms: u64,
    activity: TriageActivity,
    state: Mutex<PoolState>,
    epoch: Instant,
    /// Milliseconds since `epoch` of the last use, offset by 1; 0 = never.
    last_used: AtomicU64,
    next_id: AtomicU64,
    rotation: Mutex<Option<JoinHandle<()>>>,
}

/// Counts for observability and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStatus {
    /// Clients currently owned by the pool (idle + lent-out)
    pub total: usize,
    /// Clients sitting idle
    pub idle: usize,
    /// Acquirers blocked waiting for a client
    pub waiters: usize,
}

/// Pool of warm, authenticated NNTP sessions.
#[derive(Clone)]
pub struct NntpPool {
    inner: Arc<PoolInner>,
}

impl NntpPool {
    /// Open `max(1, size)` sessions concurrently.
    ///
    /// If any connect fails, the successes are closed and the first failure
    /// is surfaced.
    pub async fn connect(
        connector: Arc<dyn NntpConnector>,
        size: usize,
        keep_alive_ms: u64,
        activity: TriageActivity,
    ) -> Result<Self, NntpError> {
        let n = size.max(1);
        let results =
            futures::future::join_all((0..n).map(|_| connector.connect())).await;

        let mut clients = Vec::with_capacity(n);
        let mut first_err = None;
        for result in results {
            match result {
                Ok(client) => clients.push(client),
                Err(e) if first_err.is_none() => first_err = Some(e),
                Err(_) => {}
            }
        }
        if let Some(e) = first_err {
            tracing::error!(error = %e, wanted = n, "NNTP pool construction failed");
            futures::future::join_all(clients.into_iter().map(|mut c| async move {
                c.quit().await;
            }))
            .await;
            return Err(e);
        }

        let inner = Arc::new(PoolInner {
            connector,
            size: n,
            keep_alive_ms,
            activity,
            state: Mutex::new(PoolState::default()),
            epoch: Instant::now(),
            last_used: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            rotation: Mutex::new(None),
        });
        inner.touch();

        {
            let mut state = inner.state.lock().await;
            state.total = n;
            for client in clients {
                let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
                let keepalive = arm_keepalive(&inner, id);
                state.idle.push(IdleEntry {
                    client: PooledClient { id, client },
                    keepalive,
                });
            }
        }

        let rotation = spawn_rotation(Arc::clone(&inner));
        *inner.rotation.lock().await = Some(rotation);

        tracing::debug!(connections = n, "NNTP pool ready");
        Ok(Self { inner })
    }

    /// Borrow a client: pop an idle one, or wait FIFO for a release.
    pub async fn acquire(&self) -> Result<PooledClient, NntpError> {
        let rx = {
            let mut state = self.inner.state.lock().await;
            if state.closing {
                return Err(pool_closed());
            }
            if let Some(entry) = state.idle.pop() {
                entry.keepalive.abort();
                self.inner.touch();
                return Ok(entry.client);
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };
        match rx.await {
            Ok(client) => {
                self.inner.touch();
                Ok(client)
            }
            Err(_) => Err(pool_closed()),
        }
    }

    /// Hand a client back.
    ///
    /// With `drop_client` the client is closed and an asynchronous
    /// replacement is started; otherwise it goes to the head waiter or back
    /// to `idle` with a fresh keep-alive timer.
    pub async fn release(&self, client: PooledClient, drop_client: bool) {
        if drop_client {
            let closing = {
                let mut state = self.inner.state.lock().await;
                state.total = state.total.saturating_sub(1);
                state.closing
            };
            tracing::debug!(client_id = client.id, "dropping NNTP client");
            tokio::spawn(client.quit());
            if !closing {
                spawn_replacement(Arc::clone(&self.inner));
            }
            return;
        }

        self.inner.touch();
        let mut state = self.inner.state.lock().await;
        if state.closing {
            state.total = state.total.saturating_sub(1);
            drop(state);
            tokio::spawn(client.quit());
            return;
        }
        route_client(&self.inner, &mut state, client);
    }

    /// Update the last-used timestamp without borrowing.
    pub fn touch(&self) {
        self.inner.touch();
    }

    /// Time since the pool was last used.
    pub fn since_last_used(&self) -> Option<Duration> {
        self.inner.since_last_used()
    }

    /// Current counts.
    pub async fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock().await;
        PoolStatus {
            total: state.total,
            idle: state.idle.len(),
            waiters: state.waiters.len(),
        }
    }

    /// Close the pool: cancel timers, fail all waiters, QUIT every member.
    ///
    /// Lent-out clients are closed when their borrower releases them.
    pub async fn close(&self) {
        let idle = {
            let mut state = self.inner.state.lock().await;
            if state.closing {
                return;
            }
            state.closing = true;
            state.total = state.total.saturating_sub(state.idle.len());
            // Dropping the senders resolves every waiter with "pool closed"
            state.waiters.clear();
            std::mem::take(&mut state.idle)
        };
        if let Some(rotation) = self.inner.rotation.lock().await.take() {
            rotation.abort();
        }
        tracing::debug!(idle = idle.len(), "closing NNTP pool");
        futures::future::join_all(idle.into_iter().map(|entry| async move {
            entry.keepalive.abort();
            entry.client.quit().await;
        }))
        .await;
    }
}

impl PoolInner {
    fn touch(&self) {
        let ms = self.epoch.elapsed().as_millis() as u64;
        self.last_used.store(ms + 1, Ordering::Relaxed);
    }

    fn since_last_used(&self) -> Option<Duration> {
        let raw = self.last_used.load(Ordering::Relaxed);
        if raw == 0 {
            return None;
        }
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        Some(Duration::from_millis(elapsed.saturating_sub(raw - 1)))
    }
}

fn pool_closed() -> NntpError {
    NntpError::new(ErrorKind::Econnaborted, "NNTP pool is closed")
}

/// Hand a client to the head waiter that is still listening, else park it
/// idle with a keep-alive timer. Caller holds the state lock.
fn route_client(inner: &Arc<PoolInner>, state: &mut PoolState, mut client: PooledClient) {
    while let Some(waiter) = state.waiters.pop_front() {
        match waiter.send(client) {
            Ok(()) => return,
            // Waiter gave up (acquire future dropped); try the next one
            Err(returned) => client = returned,
        }
    }
    let keepalive = arm_keepalive(inner, client.id);
    state.idle.push(IdleEntry { client, keepalive });
}

fn arm_keepalive(inner: &Arc<PoolInner>, client_id: u64) -> JoinHandle<()> {
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        tokio::time::sleep(IDLE_KEEPALIVE).await;
        keepalive_probe(inner, client_id).await;
    })
}

/// Probe one idle client with a STAT for a synthesized message-id.
///
/// Success and 430 both prove liveness. Anything else removes the client and
/// triggers a replacement. Probes are suppressed once triage has been quiet
/// past the activity limit; a stale pool is replaced on next use instead.
async fn keepalive_probe(inner: Arc<PoolInner>, client_id: u64) {
    if inner.activity.idle_longer_than(ACTIVITY_IDLE_LIMIT) {
        tracing::debug!(client_id, "skipping keep-alive, triage inactive");
        return;
    }

    let entry = {
        let mut state = inner.state.lock().await;
        if state.closing {
            return;
        }
        match state.idle.iter().position(|e| e.client.id == client_id) {
            Some(idx) => state.idle.remove(idx),
            // Already acquired or rotated out
            None => return,
        }
    };

    let mut client = entry.client;
    let probe_id = format!(
        "<keepalive-{}-{}@invalid>",
        inner.epoch.elapsed().as_millis(),
        rand::random::<u32>()
    );
    let alive = match tokio::time::timeout(KEEPALIVE_PROBE_TIMEOUT, client.stat(&probe_id)).await
    {
        Ok(Ok(())) => true,
        Ok(Err(e)) => e.kind == ErrorKind::StatMissing,
        Err(_) => false,
    };

    if alive {
        let mut state = inner.state.lock().await;
        if state.closing {
            state.total = state.total.saturating_sub(1);
            drop(state);
            client.quit().await;
            return;
        }
        route_client(&inner, &mut state, client);
    } else {
        tracing::warn!(client_id, "keep-alive probe failed, replacing client");
        {
            let mut state = inner.state.lock().await;
            state.total = state.total.saturating_sub(1);
        }
        client.quit().await;
        spawn_replacement(inner);
    }
}

/// Open one replacement client, retrying until it connects or the pool
/// closes. The fresh client goes to a waiter if one exists.
fn spawn_replacement(inner: Arc<PoolInner>) {
    tokio::spawn(async move {
        loop {
            {
                let state = inner.state.lock().await;
                if state.closing || state.total >= inner.size {
                    return;
                }
            }
            match inner.connector.connect().await {
                Ok(raw) => {
                    let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let client = PooledClient { id, client: raw };
                    let mut state = inner.state.lock().await;
                    if state.closing {
                        drop(state);
                        client.quit().await;
                        return;
                    }
                    state.total += 1;
                    route_client(&inner, &mut state, client);
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "NNTP replacement failed, retrying");
                    tokio::time::sleep(REPLACEMENT_RETRY).await;
                }
            }
        }
    });
}

/// Proactive idle rotation: every `keep_alive_ms`, retire one idle client of
/// a pool that is warm but unused, so provider-side idle limits never bite.
fn spawn_rotation(inner: Arc<PoolInner>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_millis(inner.keep_alive_ms.max(1000));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await; // first tick fires immediately
        loop {
            interval.tick().await;
            if inner.activity.idle_longer_than(ACTIVITY_IDLE_LIMIT) {
                continue;
            }
            if inner
                .since_last_used()
                .is_none_or(|idle| idle < period)
            {
                continue;
            }
            let victim = {
                let mut state = inner.state.lock().await;
                if state.closing {
                    return;
                }
                if !state.waiters.is_empty() || state.idle.is_empty() {
                    continue;
                }
                let entry = state.idle.remove(0);
                entry.keepalive.abort();
                state.total = state.total.saturating_sub(1);
                entry.client
            };
            tracing::debug!(client_id = victim.id, "rotating idle NNTP client");
            victim.quit().await;
            spawn_replacement(Arc::clone(&inner));
        }
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockConnector, MockScript};

    fn activity_now() -> TriageActivity {
        let activity = TriageActivity::new();
        activity.mark();
        activity
    }

    #[tokio::test]
    async fn warms_up_to_size_and_serves_clients() {
        let connector = Arc::new(MockConnector::new(MockScript::default()));
        let pool = NntpPool::connect(connector.clone(), 3, 120_000, activity_now())
            .await
            .unwrap();
        assert_eq!(connector.connect_count(), 3);

        let status = pool.status().await;
        assert_eq!(status.total, 3);
        assert_eq!(status.idle, 3);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_eq!(pool.status().await.idle, 1);
        pool.release(a, false).await;
        pool.release(b, false).await;
        assert_eq!(pool.status().await.idle, 3);
        pool.close().await;
    }

    #[tokio::test]
    async fn zero_size_still_opens_one_connection() {
        let connector = Arc::new(MockConnector::new(MockScript::default()));
        let pool = NntpPool::connect(connector.clone(), 0, 120_000, activity_now())
            .await
            .unwrap();
        assert_eq!(pool.status().await.total, 1);
        pool.close().await;
    }

    #[tokio::test]
    async fn construction_failure_closes_successes() {
        let script = MockScript::default().fail_connects_after(2);
        let connector = Arc::new(MockConnector::new(script));
        let result = NntpPool::connect(connector.clone(), 4, 120_000, activity_now()).await;
        assert!(result.is_err());
        // Every successfully opened client was QUIT
        assert_eq!(connector.quit_count(), connector.connect_count() - 2);
    }

    #[tokio::test]
    async fn waiters_are_served_fifo() {
        let connector = Arc::new(MockConnector::new(MockScript::default()));
        let pool = NntpPool::connect(connector, 1, 120_000, activity_now())
            .await
            .unwrap();

        let held = pool.acquire().await.unwrap();
        let p1 = pool.clone();
        let first = tokio::spawn(async move { p1.acquire().await.unwrap().id() });
        // Make sure the first waiter is enqueued before the second
        tokio::task::yield_now().await;
        let p2 = pool.clone();
        let second = tokio::spawn(async move { p2.acquire().await.unwrap().id() });
        tokio::task::yield_now().await;
        assert_eq!(pool.status().await.waiters, 2);

        let held_id = held.id();
        pool.release(held, false).await;
        let first_id = first.await.unwrap();
        assert_eq!(first_id, held_id);
        // Second waiter still parked; close resolves it with an error
        second.abort();
        pool.close().await;
    }

    #[tokio::test]
    async fn dropped_client_is_replaced() {
        let connector = Arc::new(MockConnector::new(MockScript::default()));
        let pool = NntpPool::connect(connector.clone(), 2, 120_000, activity_now())
            .await
            .unwrap();

        let client = pool.acquire().await.unwrap();
        pool.release(client, true).await;

        // Replacement is async; poll for it
        for _ in 0..50 {
            if pool.status().await.total == 2 && pool.status().await.idle == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let status = pool.status().await;
        assert_eq!(status.total, 2);
        assert_eq!(status.idle, 2);
        assert_eq!(connector.connect_count(), 3);
        assert_eq!(connector.quit_count(), 1);
        pool.close().await;
    }

    #[tokio::test]
    async fn replacement_goes_to_waiter_first() {
        let connector = Arc::new(MockConnector::new(MockScript::default()));
        let pool = NntpPool::connect(connector, 1, 120_000, activity_now())
            .await
            .unwrap();

        let broken = pool.acquire().await.unwrap();
        let p = pool.clone();
        let waiter = tokio::spawn(async move { p.acquire().await });
        tokio::task::yield_now().await;
        pool.release(broken, true).await;

        let replacement = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        pool.release(replacement, false).await;
        pool.close().await;
    }

    #[tokio::test]
    async fn pool_never_exceeds_configured_size() {
        let connector = Arc::new(MockConnector::new(MockScript::default()));
        let pool = NntpPool::connect(connector, 2, 120_000, activity_now())
            .await
            .unwrap();

        for _ in 0..5 {
            let a = pool.acquire().await.unwrap();
            let b = pool.acquire().await.unwrap();
            let status = pool.status().await;
            assert!(status.total <= 2, "total {} exceeds size", status.total);
            pool.release(a, false).await;
            pool.release(b, true).await;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        for _ in 0..50 {
            if pool.status().await.total == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(pool.status().await.total <= 2);
        pool.close().await;
    }

    #[tokio::test]
    async fn close_fails_pending_acquires() {
        let connector = Arc::new(MockConnector::new(MockScript::default()));
        let pool = NntpPool::connect(connector.clone(), 1, 120_000, activity_now())
            .await
            .unwrap();

        let held = pool.acquire().await.unwrap();
        let p = pool.clone();
        let waiter = tokio::spawn(async move { p.acquire().await });
        tokio::task::yield_now().await;

        pool.close().await;
        assert!(waiter.await.unwrap().is_err());
        assert!(pool.acquire().await.is_err());

        // Late release of a lent-out client QUITs it
        pool.release(held, false).await;
        for _ in 0..50 {
            if connector.quit_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(connector.quit_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_probe_replaces_dead_idle_client() {
        let script = MockScript::default().stat_error_for_keepalive();
        let connector = Arc::new(MockConnector::new(script));
        let activity = activity_now();
        let pool = NntpPool::connect(connector.clone(), 1, 120_000, activity.clone())
            .await
            .unwrap();

        // Advance past the 30s idle timer; keep activity fresh so the probe runs
        for _ in 0..40 {
            activity.mark();
            tokio::time::advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
        }
        // The dead client was probed, dropped, and replaced
        for _ in 0..100 {
            tokio::task::yield_now().await;
            if connector.connect_count() >= 2 {
                break;
            }
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        assert!(connector.connect_count() >= 2);
        assert!(connector.keepalive_stats() >= 1);
        pool.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_skipped_when_triage_inactive() {
        let connector = Arc::new(MockConnector::new(MockScript::default()));
        let activity = TriageActivity::new(); // never marked: inactive
        let pool = NntpPool::connect(connector.clone(), 1, 120_000, activity)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(40)).await;
        tokio::task::yield_now().await;
        assert_eq!(connector.keepalive_stats(), 0);
        pool.close().await;
    }

    impl PooledClient {
        fn id(&self) -> u64 {
            self.id
        }
    }
}
