// Merges a one-shot fetch and a push subscription into one ordered stream.
//
// Each session runs two tokio tasks: one awaits the fetch, the other drains
// the subscription. Both report through a single `Delivery`, which holds the
// session's watermark and the consumer's sink behind one lock, so the
// "is this newer?" check and the sink call are atomic with respect to the
// other task. A `CancellationToken` shared by both tasks is raced against
// every network future; cancelling drops whatever request is in flight.

use std::cell::Cell;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::token::{ValueUpdate, Watermark};

// ---------------------------------------------------------------------------
// Errors and the network seam
// ---------------------------------------------------------------------------

/// Errors surfaced to the consumer through the sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("subscription failed: {0}")]
    Subscription(String),
}

pub type MergeResult<V> = Result<ValueUpdate<V>, MergeError>;

/// Push feed of updates. Ends with an `Err` item when the subscription fails.
pub type UpdateStream<V> = BoxStream<'static, anyhow::Result<ValueUpdate<V>>>;

/// The two network capabilities a merge session consumes.
#[async_trait]
pub trait NetworkClient: Send + Sync + 'static {
    type Subject: Clone + fmt::Display + Send + Sync + 'static;
    type Value: Send + 'static;

    /// One-shot read of the subject's current value and the token it was read at.
    async fn fetch_current_value(
        &self,
        subject: &Self::Subject,
    ) -> anyhow::Result<ValueUpdate<Self::Value>>;

    /// Open a push subscription for the subject.
    async fn subscribe_to_updates(
        &self,
        subject: &Self::Subject,
    ) -> anyhow::Result<UpdateStream<Self::Value>>;
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Source {
    Fetch,
    Subscription,
}

impl Source {
    fn as_str(self) -> &'static str {
        match self {
            Source::Fetch => "fetch",
            Source::Subscription => "subscription",
        }
    }
}

thread_local! {
    /// Set while this thread is running some session's sink.
    static IN_SINK: Cell<bool> = const { Cell::new(false) };
}

/// Cancellation state shared by a session's tasks and its handles.
struct Gate {
    token: CancellationToken,
    /// Held for the whole check-and-deliver step.
    watermark: Mutex<Watermark>,
}

impl Gate {
    fn cancel(&self) {
        self.token.cancel();
        if IN_SINK.with(Cell::get) {
            // Inside a sink (this session's or another's): no barrier. Waiting
            // could deadlock against a sink cancelling this thread's session.
            // No delivery starts after the token is set.
            return;
        }
        // Wait out a delivery already running on another thread. Any delivery
        // that starts after this sees the cancelled token.
        drop(self.watermark.lock().expect("merge session mutex poisoned"));
    }
}

type Sink<V> = Box<dyn FnMut(MergeResult<V>) + Send>;

struct Delivery<V> {
    gate: Arc<Gate>,
    subject: String,
    sink: Mutex<Sink<V>>,
}

impl<V> Delivery<V> {
    fn offer(&self, source: Source, result: MergeResult<V>) {
        let mut watermark = self
            .gate
            .watermark
            .lock()
            .expect("merge session mutex poisoned");
        if self.gate.token.is_cancelled() {
            return;
        }

        match &result {
            Ok(update) => {
                if !watermark.advance(update.token) {
                    debug!(
                        subject = %self.subject,
                        token = %update.token,
                        last = %watermark.last(),
                        source = source.as_str(),
                        "discarding stale update"
                    );
                    return;
                }
                debug!(
                    subject = %self.subject,
                    token = %update.token,
                    source = source.as_str(),
                    "delivering update"
                );
            }
            Err(e) => {
                warn!(subject = %self.subject, source = source.as_str(), "{e}");
            }
        }

        let mut guard = self.sink.lock().expect("merge session mutex poisoned");
        let sink = &mut *guard;
        IN_SINK.with(|flag| flag.set(true));
        sink(result);
        IN_SINK.with(|flag| flag.set(false));
    }
}

// ---------------------------------------------------------------------------
// StreamMerger
// ---------------------------------------------------------------------------

/// Starts merge sessions against one network client.
pub struct StreamMerger<C> {
    client: Arc<C>,
}

impl<C> Clone for StreamMerger<C> {
    fn clone(&self) -> Self {
        StreamMerger {
            client: Arc::clone(&self.client),
        }
    }
}

impl<C: NetworkClient> StreamMerger<C> {
    pub fn new(client: Arc<C>) -> Self {
        StreamMerger { client }
    }

    /// Start tracking `subject`, delivering into `sink`.
    ///
    /// The fetch and the subscription are launched concurrently. `sink` sees
    /// values with non-decreasing tokens and every error from either side;
    /// neither side's failure stops the other. Must be called from within a
    /// tokio runtime.
    pub fn start<F>(&self, subject: C::Subject, sink: F) -> MergeSession<C::Subject>
    where
        F: FnMut(MergeResult<C::Value>) + Send + 'static,
    {
        let gate = Arc::new(Gate {
            token: CancellationToken::new(),
            watermark: Mutex::new(Watermark::new()),
        });
        let delivery = Arc::new(Delivery {
            gate: Arc::clone(&gate),
            subject: subject.to_string(),
            sink: Mutex::new(Box::new(sink) as Sink<C::Value>),
        });

        debug!(subject = %subject, "starting merge session");

        let fetch_task = tokio::spawn(run_fetch(
            Arc::clone(&self.client),
            subject.clone(),
            Arc::clone(&delivery),
            gate.token.clone(),
        ));
        let subscription_task = tokio::spawn(run_subscription(
            Arc::clone(&self.client),
            subject.clone(),
            delivery,
            gate.token.clone(),
        ));

        MergeSession {
            subject,
            handle: CancelHandle { gate },
            tasks: vec![fetch_task, subscription_task],
        }
    }
}

async fn run_fetch<C: NetworkClient>(
    client: Arc<C>,
    subject: C::Subject,
    delivery: Arc<Delivery<C::Value>>,
    token: CancellationToken,
) {
    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        outcome = client.fetch_current_value(&subject) => outcome,
    };
    match outcome {
        Ok(update) => delivery.offer(Source::Fetch, Ok(update)),
        Err(e) => delivery.offer(Source::Fetch, Err(MergeError::Fetch(format!("{e:#}")))),
    }
}

async fn run_subscription<C: NetworkClient>(
    client: Arc<C>,
    subject: C::Subject,
    delivery: Arc<Delivery<C::Value>>,
    token: CancellationToken,
) {
    let opened = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        opened = client.subscribe_to_updates(&subject) => opened,
    };
    let mut updates = match opened {
        Ok(updates) => updates,
        Err(e) => {
            delivery.offer(
                Source::Subscription,
                Err(MergeError::Subscription(format!("{e:#}"))),
            );
            return;
        }
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = updates.next() => next,
        };
        match next {
            Some(Ok(update)) => delivery.offer(Source::Subscription, Ok(update)),
            Some(Err(e)) => {
                delivery.offer(
                    Source::Subscription,
                    Err(MergeError::Subscription(format!("{e:#}"))),
                );
                break;
            }
            None => {
                debug!(subject = %subject, "subscription stream ended");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MergeSession / CancelHandle
// ---------------------------------------------------------------------------

/// Cloneable handle that cancels a session. Safe to call repeatedly, from any
/// thread, and from inside any session's sink.
///
/// Called outside a sink, `cancel` waits for a delivery in progress on
/// another thread, so no sink call happens after it returns. Called inside a
/// sink it does not wait; a delivery of the cancelled session already running
/// on another thread may still complete.
#[derive(Clone)]
pub struct CancelHandle {
    gate: Arc<Gate>,
}

impl CancelHandle {
    /// Stop both operations. Outside a sink, once this returns the sink is not
    /// invoked again.
    pub fn cancel(&self) {
        self.gate.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.gate.token.is_cancelled()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A running merge for one subject. Dropping it cancels the merge.
pub struct MergeSession<S> {
    subject: S,
    handle: CancelHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl<S> MergeSession<S> {
    pub fn subject(&self) -> &S {
        &self.subject
    }

    pub fn handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// Wait until both the fetch and the subscription have finished, either
    /// by running to completion or by cancellation.
    pub async fn finished(mut self) {
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

impl<S> Drop for MergeSession<S> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<S: fmt::Debug> fmt::Debug for MergeSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeSession")
            .field("subject", &self.subject)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
