//! Bounded pool of browser sessions.
//!
//! Every live session (idle, leased, or still launching) occupies one slot,
//! and the number of slots never exceeds the configured capacity. Callers
//! that find the pool full wait in a FIFO queue; a released session or a
//! freed slot is handed straight to the longest waiter, so new callers
//! cannot overtake it.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::session::{BrowserSession, SessionFactory};
use crate::error::{Result, ScrapeError};

/// What a waiter receives when it reaches the front of the queue
enum Grant<S> {
    /// A healthy session released by another job
    Session(Pooled<S>),
    /// A free slot; the waiter launches its own session
    Slot,
}

struct Pooled<S> {
    id: u64,
    session: Arc<S>,
}

impl<S> Clone for Pooled<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            session: Arc::clone(&self.session),
        }
    }
}

struct PoolState<S> {
    /// Slots taken by idle, leased or launching sessions
    slots: usize,
    leased: usize,
    next_id: u64,
    idle: Vec<Pooled<S>>,
    live: HashMap<u64, Arc<S>>,
    waiters: VecDeque<oneshot::Sender<Grant<S>>>,
    closed: bool,
}

struct Shared<S: BrowserSession> {
    capacity: usize,
    state: Mutex<PoolState<S>>,
}

impl<S: BrowserSession> Shared<S> {
    /// Give `grant` to the first waiter still listening. Returns the grant
    /// when nobody took it.
    fn hand_off(state: &mut PoolState<S>, mut grant: Grant<S>) -> Option<Grant<S>> {
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(grant) {
                Ok(()) => return None,
                Err(returned) => grant = returned,
            }
        }
        Some(grant)
    }

    fn release(&self, pooled: Pooled<S>) {
        if !pooled.session.is_healthy() {
            debug!(session = pooled.id, "Released session is unhealthy, discarding");
            self.discard(pooled);
            return;
        }

        let mut state = self.state.lock();
        if state.closed {
            Self::forget(&mut state, &pooled);
            drop(state);
            pooled.session.close();
            return;
        }

        match Self::hand_off(&mut state, Grant::Session(pooled)) {
            None => {}
            Some(Grant::Session(pooled)) => {
                state.leased -= 1;
                state.idle.push(pooled);
            }
            Some(Grant::Slot) => unreachable!("hand_off returns the grant it was given"),
        }
    }

    fn discard(&self, pooled: Pooled<S>) {
        {
            let mut state = self.state.lock();
            state.live.remove(&pooled.id);
            state.leased -= 1;
        }
        pooled.session.close();
        self.release_slot();
    }

    /// Free one slot, passing it to a waiter if there is one.
    fn release_slot(&self) {
        let mut state = self.state.lock();
        if state.closed || Self::hand_off(&mut state, Grant::Slot).is_some() {
            state.slots -= 1;
        }
    }

    /// Return a grant that reached a waiter which stopped listening.
    fn restore(&self, grant: Grant<S>) {
        match grant {
            Grant::Session(pooled) => self.release(pooled),
            Grant::Slot => self.release_slot(),
        }
    }

    fn forget(state: &mut PoolState<S>, pooled: &Pooled<S>) {
        state.live.remove(&pooled.id);
        state.leased -= 1;
        state.slots -= 1;
    }
}

/// Point-in-time view of the pool's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub capacity: usize,
    pub live: usize,
    pub in_use: usize,
    pub idle: usize,
    pub waiting: usize,
}

pub struct BrowserPool<F: SessionFactory> {
    factory: F,
    shared: Arc<Shared<F::Session>>,
}

impl<F: SessionFactory> BrowserPool<F> {
    pub fn new(factory: F, capacity: usize) -> Self {
        Self {
            factory,
            shared: Arc::new(Shared {
                capacity,
                state: Mutex::new(PoolState {
                    slots: 0,
                    leased: 0,
                    next_id: 0,
                    idle: Vec::new(),
                    live: HashMap::new(),
                    waiters: VecDeque::new(),
                    closed: false,
                }),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.shared.state.lock();
        PoolState::status(&state, self.shared.capacity)
    }

    /// Take a session, waiting for one to free up if the pool is at capacity.
    pub async fn acquire(&self) -> Result<Lease<F::Session>> {
        let rx = {
            let mut state = self.shared.state.lock();
            match self.try_take(&mut state)? {
                Some(Grant::Session(pooled)) => return Ok(self.lease(pooled)),
                Some(Grant::Slot) => None,
                None => {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(tx);
                    debug!(waiting = state.waiters.len(), "Browser pool full, queued for a session");
                    Some(rx)
                }
            }
        };

        let grant = match rx {
            None => Grant::Slot,
            Some(rx) => Waiter { rx: Some(rx), shared: Arc::clone(&self.shared) }.wait().await?,
        };

        match grant {
            Grant::Session(pooled) => Ok(self.lease(pooled)),
            Grant::Slot => self.launch_into_slot().await,
        }
    }

    /// Take a session without waiting. Fails with `PoolExhausted` when full.
    pub async fn try_acquire(&self) -> Result<Lease<F::Session>> {
        let grant = {
            let mut state = self.shared.state.lock();
            self.try_take(&mut state)?.ok_or(ScrapeError::PoolExhausted)?
        };
        match grant {
            Grant::Session(pooled) => Ok(self.lease(pooled)),
            Grant::Slot => self.launch_into_slot().await,
        }
    }

    /// Return a healthy session for reuse.
    pub fn release(&self, lease: Lease<F::Session>) {
        lease.release();
    }

    /// Drop an untrusted session and free its slot.
    pub fn discard(&self, lease: Lease<F::Session>) {
        lease.discard();
    }

    /// Close every live session and reject all current and future waiters.
    pub fn shutdown(&self) {
        let sessions: Vec<Arc<F::Session>> = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            // Dropping the senders wakes every waiter with a shutdown error.
            state.waiters.clear();
            let idle = std::mem::take(&mut state.idle);
            state.slots -= idle.len();
            for pooled in &idle {
                state.live.remove(&pooled.id);
            }
            idle.into_iter()
                .map(|p| p.session)
                .chain(state.live.values().cloned())
                .collect()
        };

        info!(sessions = sessions.len(), "Shutting down browser pool");
        for session in sessions {
            session.close();
        }
    }

    /// Idle session or free slot, if either is available without waiting.
    fn try_take(&self, state: &mut PoolState<F::Session>) -> Result<Option<Grant<F::Session>>> {
        if state.closed {
            return Err(ScrapeError::PoolShutdown);
        }

        state.waiters.retain(|tx| !tx.is_closed());
        if !state.waiters.is_empty() {
            return Ok(None);
        }

        if let Some(pooled) = state.idle.pop() {
            state.leased += 1;
            return Ok(Some(Grant::Session(pooled)));
        }
        if state.slots < self.shared.capacity {
            state.slots += 1;
            return Ok(Some(Grant::Slot));
        }
        Ok(None)
    }

    async fn launch_into_slot(&self) -> Result<Lease<F::Session>> {
        let guard = SlotGuard { shared: Some(Arc::clone(&self.shared)) };
        let session = self.factory.launch().await?;
        guard.disarm();

        let mut state = self.shared.state.lock();
        if state.closed {
            state.slots -= 1;
            drop(state);
            session.close();
            return Err(ScrapeError::PoolShutdown);
        }

        let id = state.next_id;
        state.next_id += 1;
        let session = Arc::new(session);
        state.live.insert(id, Arc::clone(&session));
        state.leased += 1;
        debug!(session = id, live = state.live.len(), "Added browser session to pool");

        Ok(Lease {
            pooled: Some(Pooled { id, session }),
            shared: Arc::clone(&self.shared),
        })
    }

    fn lease(&self, pooled: Pooled<F::Session>) -> Lease<F::Session> {
        Lease {
            pooled: Some(pooled),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> PoolState<S> {
    fn status(&self, capacity: usize) -> PoolStatus {
        PoolStatus {
            capacity,
            live: self.slots,
            in_use: self.leased,
            idle: self.idle.len(),
            waiting: self.waiters.iter().filter(|tx| !tx.is_closed()).count(),
        }
    }
}

/// Pending place in the waiter queue. If the waiting future is dropped after
/// a grant was sent, the grant goes back to the pool.
struct Waiter<S: BrowserSession> {
    rx: Option<oneshot::Receiver<Grant<S>>>,
    shared: Arc<Shared<S>>,
}

impl<S: BrowserSession> Waiter<S> {
    async fn wait(mut self) -> Result<Grant<S>> {
        let result = match self.rx.as_mut() {
            Some(rx) => rx.await.map_err(|_| ScrapeError::PoolShutdown),
            None => Err(ScrapeError::PoolShutdown),
        };
        self.rx = None;
        result
    }
}

impl<S: BrowserSession> Drop for Waiter<S> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if let Ok(grant) = rx.try_recv() {
                self.shared.restore(grant);
            }
        }
    }
}

/// Frees a reserved slot if the launch future is dropped or fails.
struct SlotGuard<S: BrowserSession> {
    shared: Option<Arc<Shared<S>>>,
}

impl<S: BrowserSession> SlotGuard<S> {
    fn disarm(mut self) {
        self.shared = None;
    }
}

impl<S: BrowserSession> Drop for SlotGuard<S> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            warn!("Browser launch did not complete, freeing its slot");
            shared.release_slot();
        }
    }
}

/// Exclusive use of one pooled session. Dropping a lease without releasing
/// it discards the session.
pub struct Lease<S: BrowserSession> {
    pooled: Option<Pooled<S>>,
    shared: Arc<Shared<S>>,
}

impl<S: BrowserSession> Lease<S> {
    pub fn id(&self) -> u64 {
        self.pooled.as_ref().map(|p| p.id).unwrap_or_default()
    }

    pub fn release(mut self) {
        if let Some(pooled) = self.pooled.take() {
            self.shared.release(pooled);
        }
    }

    pub fn discard(mut self) {
        if let Some(pooled) = self.pooled.take() {
            self.shared.discard(pooled);
        }
    }
}

impl<S: BrowserSession> Deref for Lease<S> {
    type Target = S;

    fn deref(&self) -> &S {
        match &self.pooled {
            Some(pooled) => pooled.session.as_ref(),
            None => unreachable!("lease is only emptied by release or discard"),
        }
    }
}

impl<S: BrowserSession> Drop for Lease<S> {
    fn drop(&mut self) {
        if let Some(pooled) = self.pooled.take() {
            debug!(session = pooled.id, "Lease dropped without release, discarding session");
            self.shared.discard(pooled);
        }
    }
}
