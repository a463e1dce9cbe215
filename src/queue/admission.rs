//! Admission queue: a single worker task owns [`QueueState`]; everyone
//! else talks to it through a cloneable [`AdmissionQueue`] handle.
//!
//! # Flow
//!
//! ```text
//! AdmissionQueue::submit ──Command::Request──▶ worker ──▶ QueueState::submit
//!                                                 │
//! AdmissionQueue::release ──Command::Release──▶   ├─▶ QueueState::release
//!                                                 └─▶ QueueState::drain ─▶ settle grants
//! sweeper task ──Command::Sweep (periodic)────▶   └─▶ QueueState::sweep ─▶ reject stale
//! ```
//!
//! Because every command is processed to completion before the next one is
//! read, a release that frees a slot and immediately grants it to the next
//! waiter can never interleave with another drain.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{QueueConfig, SessionKind};

use super::state::{Grant, QueueState, QueueStatus, SlotId, Submission};

// ---------------------------------------------------------------------------
// AdmissionError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The request waited longer than the staleness threshold.
    #[error("session request timed out in the admission queue")]
    Timeout,

    /// The worker stopped before the request was settled.
    #[error("admission queue is closed")]
    QueueClosed,
}

type Reply = oneshot::Sender<Result<SlotId, AdmissionError>>;

enum Command {
    Request {
        kind: SessionKind,
        reply: Reply,
        ticket: oneshot::Sender<Ticket>,
    },
    Release(SlotId),
    Status(oneshot::Sender<QueueStatus>),
    Sweep {
        max_age: Duration,
        done: Option<oneshot::Sender<usize>>,
    },
    Shutdown,
}

// ---------------------------------------------------------------------------
// Ticket / PendingAdmission
// ---------------------------------------------------------------------------

/// What the worker did with a freshly submitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ticket {
    Admitted(SlotId),
    Queued { id: SlotId, position: usize },
}

impl Ticket {
    pub fn id(&self) -> SlotId {
        match self {
            Ticket::Admitted(id) | Ticket::Queued { id, .. } => *id,
        }
    }
}

/// A submitted request awaiting its slot.
///
/// Dropping it, or dropping the [`granted`](Self::granted) future, abandons
/// the request.  A grant the worker has not sent yet fails to deliver and
/// the worker frees the slot; a grant already sitting in the reply channel
/// is released here.
#[derive(Debug)]
pub struct PendingAdmission {
    ticket: Ticket,
    rx: oneshot::Receiver<Result<SlotId, AdmissionError>>,
    queue: mpsc::UnboundedSender<Command>,
}

impl PendingAdmission {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// Suspend until the request is granted, swept or the queue closes.
    pub async fn granted(mut self) -> Result<SlotId, AdmissionError> {
        (&mut self.rx).await.unwrap_or(Err(AdmissionError::QueueClosed))
    }
}

impl Drop for PendingAdmission {
    fn drop(&mut self) {
        self.rx.close();
        if let Ok(Ok(slot)) = self.rx.try_recv() {
            log::debug!("queue: {slot} was granted after its caller left, releasing");
            let _ = self.queue.send(Command::Release(slot));
        }
    }
}

// ---------------------------------------------------------------------------
// AdmissionQueue
// ---------------------------------------------------------------------------

/// Handle to the process-wide admission queue.
///
/// Construct one with [`AdmissionQueue::spawn`] at startup and pass clones
/// to every session; call [`shutdown`](Self::shutdown) on exit.
///
/// ```rust,no_run
/// use pitch_session::config::{QueueConfig, SessionKind};
/// use pitch_session::queue::AdmissionQueue;
///
/// # async fn example() {
/// let (queue, _worker) = AdmissionQueue::spawn(&QueueConfig::default());
/// let slot = queue.request_admission(SessionKind::Pitch).await.unwrap();
/// // ... hold the voice channel ...
/// queue.release(slot);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AdmissionQueue {
    tx: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Request { kind, .. } => write!(f, "Request({})", kind.label()),
            Command::Release(id) => write!(f, "Release({id})"),
            Command::Status(_) => f.write_str("Status"),
            Command::Sweep { max_age, .. } => write!(f, "Sweep({max_age:?})"),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl AdmissionQueue {
    /// Start the worker (and the periodic staleness sweep when enabled).
    ///
    /// Must be called from inside a tokio runtime.
    pub fn spawn(config: &QueueConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            state: QueueState::new(config.max_concurrent),
        };
        let handle = tokio::spawn(worker.run(rx));

        if let Some(every) = config.sweep_interval() {
            tokio::spawn(sweep_periodically(tx.downgrade(), every, config.stale_after()));
        }

        (Self { tx }, handle)
    }

    /// Submit a request and learn immediately whether it was admitted or
    /// queued (and at which position).
    pub async fn submit(&self, kind: SessionKind) -> Result<PendingAdmission, AdmissionError> {
        let (reply, rx) = oneshot::channel();
        let (ticket_tx, ticket_rx) = oneshot::channel();
        self.send(Command::Request {
            kind,
            reply,
            ticket: ticket_tx,
        })?;
        let ticket = ticket_rx.await.map_err(|_| AdmissionError::QueueClosed)?;
        Ok(PendingAdmission {
            ticket,
            rx,
            queue: self.tx.clone(),
        })
    }

    /// Suspend until a slot is granted.  The caller must [`release`] the
    /// returned id exactly once.
    ///
    /// [`release`]: Self::release
    pub async fn request_admission(&self, kind: SessionKind) -> Result<SlotId, AdmissionError> {
        self.submit(kind).await?.granted().await
    }

    /// Acquire a slot, then run `op` while holding it.
    ///
    /// When `op` fails the slot is released here before the error is
    /// returned; on success the caller owns the slot and must release it.
    pub async fn acquire_with<T, E, F, Fut>(&self, kind: SessionKind, op: F) -> Result<(SlotId, T), E>
    where
        F: FnOnce(SlotId) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<AdmissionError>,
    {
        let slot = self.request_admission(kind).await?;
        match op(slot).await {
            Ok(value) => Ok((slot, value)),
            Err(e) => {
                log::warn!("queue: operation after admission failed, releasing {slot}");
                self.release(slot);
                Err(e)
            }
        }
    }

    /// Free a slot.  Unknown or already-released ids are ignored.
    pub fn release(&self, slot: SlotId) {
        if self.tx.send(Command::Release(slot)).is_err() {
            log::debug!("queue: release of {slot} after shutdown ignored");
        }
    }

    pub async fn status(&self) -> Result<QueueStatus, AdmissionError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Status(tx))?;
        rx.await.map_err(|_| AdmissionError::QueueClosed)
    }

    /// Reject waiting requests older than `max_age`; returns how many were
    /// removed.
    pub async fn sweep_stale(&self, max_age: Duration) -> Result<usize, AdmissionError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Sweep {
            max_age,
            done: Some(tx),
        })?;
        rx.await.map_err(|_| AdmissionError::QueueClosed)
    }

    /// Stop the worker.  Every still-waiting request is rejected with
    /// [`AdmissionError::QueueClosed`].
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    fn send(&self, cmd: Command) -> Result<(), AdmissionError> {
        self.tx.send(cmd).map_err(|_| AdmissionError::QueueClosed)
    }
}

async fn sweep_periodically(
    tx: mpsc::WeakUnboundedSender<Command>,
    every: Duration,
    max_age: Duration,
) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(tx) = tx.upgrade() else { break };
        if tx.send(Command::Sweep { max_age, done: None }).is_err() {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct Worker {
    state: QueueState<Reply>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Request {
                    kind,
                    reply,
                    ticket,
                } => self.handle_request(kind, reply, ticket),
                Command::Release(id) => self.handle_release(id),
                Command::Status(tx) => {
                    let _ = tx.send(self.state.status());
                }
                Command::Sweep { max_age, done } => {
                    let removed = self.handle_sweep(max_age);
                    if let Some(done) = done {
                        let _ = done.send(removed);
                    }
                }
                Command::Shutdown => break,
            }
        }

        for waiting in self.state.take_waiting() {
            let _ = waiting.responder.send(Err(AdmissionError::QueueClosed));
        }
        log::info!("queue: admission worker stopped");
    }

    fn handle_request(&mut self, kind: SessionKind, reply: Reply, ticket: oneshot::Sender<Ticket>) {
        match self.state.submit(kind, Instant::now(), reply) {
            Submission::Admitted(grant) => {
                log::info!("queue: immediate {} session granted: {}", kind.label(), grant.id);
                let _ = ticket.send(Ticket::Admitted(grant.id));
                self.settle(grant);
            }
            Submission::Queued { id, position } => {
                log::info!(
                    "queue: adding {} session {id} to queue, position {position}",
                    kind.label()
                );
                let _ = ticket.send(Ticket::Queued { id, position });
            }
        }
    }

    fn handle_release(&mut self, id: SlotId) {
        if self.state.release(&id) {
            log::info!(
                "queue: released {id}, active: {}",
                self.state.status().active_count
            );
            self.drain();
        }
    }

    fn handle_sweep(&mut self, max_age: Duration) -> usize {
        let stale = self.state.sweep(Instant::now(), max_age);
        for waiting in &stale {
            log::warn!(
                "queue: {} request {} timed out after {:?}",
                waiting.kind.label(),
                waiting.id,
                waiting.submitted_at.elapsed()
            );
        }
        let removed = stale.len();
        for waiting in stale {
            let _ = waiting.responder.send(Err(AdmissionError::Timeout));
        }
        removed
    }

    /// Grant until no further progress is possible.  A grant whose caller
    /// has gone away frees its slot again, which lets the loop continue.
    fn drain(&mut self) {
        loop {
            let grants = self.state.drain();
            if grants.is_empty() {
                break;
            }
            for grant in grants {
                log::info!(
                    "queue: processing {} session {} (waited {:?})",
                    grant.kind.label(),
                    grant.id,
                    grant.submitted_at.elapsed()
                );
                self.settle(grant);
            }
        }
    }

    fn settle(&mut self, grant: Grant<Reply>) {
        let id = grant.id;
        if grant.responder.send(Ok(id)).is_err() {
            log::debug!("queue: caller of {id} went away, releasing");
            self.state.release(&id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_concurrent: usize) -> QueueConfig {
        QueueConfig {
            max_concurrent,
            stale_after_secs: 600,
            sweep_interval_secs: 0,
        }
    }

    #[tokio::test]
    async fn immediate_grant_when_free() {
        let (queue, _) = AdmissionQueue::spawn(&config(1));
        let pending = queue.submit(SessionKind::Pitch).await.unwrap();
        assert!(matches!(pending.ticket(), Ticket::Admitted(_)));
        let slot = pending.granted().await.unwrap();

        let status = queue.status().await.unwrap();
        assert_eq!(status.active_count, 1);
        queue.release(slot);
        assert_eq!(queue.status().await.unwrap().active_count, 0);
    }

    #[tokio::test]
    async fn three_requests_then_release() {
        let (queue, _) = AdmissionQueue::spawn(&config(1));

        let r1 = queue.submit(SessionKind::Pitch).await.unwrap();
        let r2 = queue.submit(SessionKind::Pitch).await.unwrap();
        let r3 = queue.submit(SessionKind::Feedback).await.unwrap();

        assert!(matches!(r2.ticket(), Ticket::Queued { position: 1, .. }));
        assert!(matches!(r3.ticket(), Ticket::Queued { position: 2, .. }));
        assert_eq!(
            queue.status().await.unwrap(),
            QueueStatus {
                active_count: 1,
                queue_length: 2,
                max_concurrent: 1
            }
        );

        let s1 = r1.granted().await.unwrap();
        let r2_id = r2.ticket().id();
        queue.release(s1);
        let s2 = r2.granted().await.unwrap();
        assert_eq!(s2, r2_id);

        let status = queue.status().await.unwrap();
        assert_eq!(status.active_count, 1);
        assert_eq!(status.queue_length, 1);
        drop(r3);
    }

    #[tokio::test]
    async fn grants_follow_submission_order() {
        let (queue, _) = AdmissionQueue::spawn(&config(1));
        let first = queue.request_admission(SessionKind::Pitch).await.unwrap();

        let (order_tx, mut order_rx) = mpsc::unbounded_channel();
        for n in 0..5 {
            let pending = queue.submit(SessionKind::Pitch).await.unwrap();
            let order_tx = order_tx.clone();
            let queue = queue.clone();
            tokio::spawn(async move {
                let slot = pending.granted().await.unwrap();
                order_tx.send(n).unwrap();
                queue.release(slot);
            });
        }
        drop(order_tx);
        queue.release(first);

        let mut order = Vec::new();
        while let Some(n) = order_rx.recv().await {
            order.push(n);
        }
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn double_release_keeps_count_sane() {
        let (queue, _) = AdmissionQueue::spawn(&config(1));
        let slot = queue.request_admission(SessionKind::Pitch).await.unwrap();
        queue.release(slot);
        queue.release(slot);
        queue.release(SlotId::generate());
        assert_eq!(queue.status().await.unwrap().active_count, 0);

        // The freed slot is still usable exactly once.
        let again = queue.submit(SessionKind::Pitch).await.unwrap();
        assert!(matches!(again.ticket(), Ticket::Admitted(_)));
    }

    #[tokio::test]
    async fn abandoned_waiter_does_not_leak_its_slot() {
        let (queue, _) = AdmissionQueue::spawn(&config(1));
        let held = queue.request_admission(SessionKind::Pitch).await.unwrap();
        let abandoned = queue.submit(SessionKind::Pitch).await.unwrap();
        let next = queue.submit(SessionKind::Pitch).await.unwrap();
        drop(abandoned);

        queue.release(held);
        let slot = next.granted().await.unwrap();
        assert_eq!(queue.status().await.unwrap().active_count, 1);
        queue.release(slot);
    }

    #[tokio::test]
    async fn dropping_a_delivered_grant_releases_the_slot() {
        let (queue, _) = AdmissionQueue::spawn(&config(1));
        let held = queue.request_admission(SessionKind::Pitch).await.unwrap();
        let waiting = queue.submit(SessionKind::Pitch).await.unwrap();

        queue.release(held);
        // The status round trip guarantees the grant is already in the reply
        // channel before the request is dropped.
        assert_eq!(queue.status().await.unwrap().active_count, 1);
        drop(waiting);

        let status = queue.status().await.unwrap();
        assert_eq!(status.active_count, 0);
        assert_eq!(status.queue_length, 0);
    }

    #[tokio::test]
    async fn granted_slot_is_kept_after_the_request_is_consumed() {
        let (queue, _) = AdmissionQueue::spawn(&config(1));
        let pending = queue.submit(SessionKind::Pitch).await.unwrap();
        let slot = pending.granted().await.unwrap();
        assert_eq!(queue.status().await.unwrap().active_count, 1);
        queue.release(slot);
        assert_eq!(queue.status().await.unwrap().active_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_rejects_stale_with_timeout() {
        let (queue, _) = AdmissionQueue::spawn(&config(1));
        let _held = queue.request_admission(SessionKind::Pitch).await.unwrap();
        let old = queue.submit(SessionKind::Pitch).await.unwrap();

        tokio::time::advance(Duration::from_secs(601)).await;
        let fresh = queue.submit(SessionKind::Pitch).await.unwrap();

        let removed = queue.sweep_stale(Duration::from_secs(600)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(old.granted().await, Err(AdmissionError::Timeout));
        assert!(matches!(fresh.ticket(), Ticket::Queued { position: 2, .. }));
        assert_eq!(queue.status().await.unwrap().queue_length, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_sweep_runs_when_enabled() {
        let cfg = QueueConfig {
            max_concurrent: 1,
            stale_after_secs: 5,
            sweep_interval_secs: 1,
        };
        let (queue, _) = AdmissionQueue::spawn(&cfg);
        let _held = queue.request_admission(SessionKind::Pitch).await.unwrap();
        let waiting = queue.submit(SessionKind::Feedback).await.unwrap();

        let result = waiting.granted().await;
        assert_eq!(result, Err(AdmissionError::Timeout));
    }

    #[tokio::test]
    async fn shutdown_rejects_waiters() {
        let (queue, worker) = AdmissionQueue::spawn(&config(1));
        let _held = queue.request_admission(SessionKind::Pitch).await.unwrap();
        let waiting = queue.submit(SessionKind::Pitch).await.unwrap();

        queue.shutdown();
        worker.await.unwrap();

        assert_eq!(waiting.granted().await, Err(AdmissionError::QueueClosed));
        assert_eq!(queue.status().await, Err(AdmissionError::QueueClosed));
        queue.release(SlotId::generate());
    }

    #[derive(Debug, PartialEq)]
    enum OpError {
        Admission(AdmissionError),
        Upstream,
    }

    impl From<AdmissionError> for OpError {
        fn from(e: AdmissionError) -> Self {
            OpError::Admission(e)
        }
    }

    #[tokio::test]
    async fn acquire_with_releases_on_failure() {
        let (queue, _) = AdmissionQueue::spawn(&config(1));
        let result: Result<(SlotId, ()), OpError> = queue
            .acquire_with(SessionKind::Pitch, |_slot| async { Err(OpError::Upstream) })
            .await;

        assert_eq!(result.unwrap_err(), OpError::Upstream);
        assert_eq!(queue.status().await.unwrap().active_count, 0);
    }

    #[tokio::test]
    async fn acquire_with_keeps_slot_on_success() {
        let (queue, _) = AdmissionQueue::spawn(&config(1));
        let (slot, token) = queue
            .acquire_with(SessionKind::Pitch, |slot| async move {
                Ok::<_, OpError>(format!("token-for-{slot}"))
            })
            .await
            .unwrap();

        assert!(token.ends_with(&slot.to_string()));
        assert_eq!(queue.status().await.unwrap().active_count, 1);
        queue.release(slot);
    }
}
