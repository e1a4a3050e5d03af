//! Per-task event queue with ordered fan-out
//!
//! One bounded queue per active task. Sequence numbers are assigned at
//! enqueue under the queue lock, so they are strictly increasing with
//! no gaps. Delivery to any single subscriber is FIFO; fan-out is
//! independent per subscriber — a slow subscriber only loses its own
//! events and gets an events-dropped marker in their place.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, broadcast};
use tokio::time::{Duration, timeout};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::store::EventStore;

use super::types::{AuditEvent, EventKind};

/// How long a producer blocks on a full queue before dropping
const FULL_QUEUE_WAIT: Duration = Duration::from_millis(100);

/// Fan-out channel capacity per subscriber
const FANOUT_CAPACITY: usize = 1_024;

struct BusInner {
    queue: VecDeque<AuditEvent>,
    next_seq: u64,
    dropped: u64,
    closed: bool,
}

/// The per-task event bus
pub struct EventBus {
    task_id: String,
    capacity: usize,
    inner: Mutex<BusInner>,
    /// Wakes the persistence batcher
    ready: Notify,
    /// Wakes producers blocked on a full queue
    space: Notify,
    fanout: broadcast::Sender<AuditEvent>,
}

impl EventBus {
    pub fn new(task_id: impl Into<String>, capacity: usize) -> Arc<Self> {
        let (fanout, _) = broadcast::channel(FANOUT_CAPACITY);
        Arc::new(Self {
            task_id: task_id.into(),
            capacity: capacity.max(1),
            inner: Mutex::new(BusInner {
                queue: VecDeque::new(),
                next_seq: 0,
                dropped: 0,
                closed: false,
            }),
            ready: Notify::new(),
            space: Notify::new(),
            fanout,
        })
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Publish one event. Returns the assigned sequence number, or
    /// `None` if the event was dropped (queue full) or the bus closed.
    ///
    /// Critical events use the reserved slot: they are enqueued even
    /// when the queue is at capacity.
    pub async fn publish(&self, kind: EventKind) -> Option<u64> {
        let critical = kind.is_critical();
        let deadline = tokio::time::Instant::now() + FULL_QUEUE_WAIT;
        let mut timed_out = false;

        loop {
            {
                let mut inner = self.inner.lock().await;
                if inner.closed {
                    return None;
                }
                if critical || inner.queue.len() < self.capacity {
                    inner.next_seq += 1;
                    let event = AuditEvent::new(self.task_id.clone(), inner.next_seq, kind.clone());
                    inner.queue.push_back(event.clone());
                    // Fan-out failures just mean no subscribers
                    let _ = self.fanout.send(event);
                    self.ready.notify_one();
                    return Some(inner.next_seq);
                }
                if timed_out {
                    inner.dropped += 1;
                    warn!(task_id = %self.task_id, dropped = inner.dropped, "Event queue full, dropping event");
                    return None;
                }
            }

            // Full and non-critical: block briefly for space, then do
            // one final capacity check before dropping
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            timed_out = remaining.is_zero() || timeout(remaining, self.space.notified()).await.is_err();
        }
    }

    /// Drain up to `max` events for persistence, freeing queue space
    pub async fn drain(&self, max: usize) -> Vec<AuditEvent> {
        let mut inner = self.inner.lock().await;
        let take = inner.queue.len().min(max);
        let batch: Vec<AuditEvent> = inner.queue.drain(..take).collect();
        if !batch.is_empty() {
            self.space.notify_waiters();
        }
        batch
    }

    /// Wait until events are ready or `wait` elapses
    pub async fn wait_ready(&self, wait: Duration) {
        let _ = timeout(wait, self.ready.notified()).await;
    }

    /// Subscribe to the live event stream
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            task_id: self.task_id.clone(),
            rx: self.fanout.subscribe(),
        }
    }

    /// Close the bus: no further events are accepted. Pending events
    /// stay queued for the batcher to drain.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        self.ready.notify_waiters();
        self.space.notify_waiters();
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    /// Events dropped under queue pressure (producer-side)
    pub async fn dropped_count(&self) -> u64 {
        self.inner.lock().await.dropped
    }

    /// Highest sequence number assigned so far
    pub async fn last_sequence(&self) -> u64 {
        self.inner.lock().await.next_seq
    }

    pub async fn pending(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    /// Cheap emitter handle for components that publish events
    pub fn emitter(self: &Arc<Self>) -> EventEmitter {
        EventEmitter { bus: self.clone() }
    }
}

/// A subscriber's view of the stream. Lag is surfaced as a synthetic
/// events-dropped marker rather than an error.
pub struct EventStream {
    task_id: String,
    rx: broadcast::Receiver<AuditEvent>,
}

impl EventStream {
    /// Next event, `None` once the bus is gone
    pub async fn next(&mut self) -> Option<AuditEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(task_id = %self.task_id, lagged = n, "Subscriber lagged, inserting drop marker");
                    return Some(AuditEvent::new(self.task_id.clone(), 0, EventKind::EventsDropped { count: n }));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Cloneable handle with convenience publishers
#[derive(Clone)]
pub struct EventEmitter {
    bus: Arc<EventBus>,
}

impl EventEmitter {
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn task_id(&self) -> &str {
        self.bus.task_id()
    }

    pub async fn task_start(&self, config_digest: impl Into<String>) {
        self.bus
            .publish(EventKind::TaskStart {
                config_digest: config_digest.into(),
            })
            .await;
    }

    pub async fn phase_start(&self, phase: &str) {
        self.bus
            .publish(EventKind::PhaseStart {
                phase: phase.to_string(),
            })
            .await;
    }

    pub async fn phase_complete(&self, phase: &str, outcome: &str, duration_ms: u64) {
        self.bus
            .publish(EventKind::PhaseComplete {
                phase: phase.to_string(),
                outcome: outcome.to_string(),
                duration_ms,
            })
            .await;
    }

    pub async fn agent_step(&self, phase: &str, message: impl Into<String>, tokens: u64) {
        self.bus
            .publish(EventKind::AgentStep {
                phase: phase.to_string(),
                message: message.into(),
                tokens,
            })
            .await;
    }

    pub async fn tool_call(
        &self,
        name: &str,
        input: serde_json::Value,
        output: serde_json::Value,
        duration_ms: u64,
        outcome: &str,
        truncated: bool,
    ) {
        self.bus
            .publish(EventKind::ToolCall {
                name: name.to_string(),
                input,
                output,
                duration_ms,
                outcome: outcome.to_string(),
                truncated,
            })
            .await;
    }

    pub async fn finding_new(&self, finding_id: &str, title: &str, severity: &str) {
        self.bus
            .publish(EventKind::FindingNew {
                finding_id: finding_id.to_string(),
                title: title.to_string(),
                severity: severity.to_string(),
            })
            .await;
    }

    pub async fn finding_updated(&self, finding_id: &str, status: &str) {
        self.bus
            .publish(EventKind::FindingUpdated {
                finding_id: finding_id.to_string(),
                status: status.to_string(),
            })
            .await;
    }

    pub async fn checkpoint(&self, index: u64) {
        self.bus.publish(EventKind::Checkpoint { index }).await;
    }

    pub async fn task_complete(&self, counts: crate::domain::SeverityCounts, overall_score: u8, duration_ms: u64) {
        self.bus
            .publish(EventKind::TaskComplete {
                finding_counts: counts,
                overall_score,
                duration_ms,
            })
            .await;
    }

    pub async fn task_error(&self, error_kind: &str, message: impl Into<String>) {
        self.bus
            .publish(EventKind::TaskError {
                error_kind: error_kind.to_string(),
                message: message.into(),
            })
            .await;
    }
}

/// Persistence batcher: drains up to `batch_size` events or whatever
/// arrived within the flush interval, whichever first, and writes them
/// through the event store. Runs until the bus closes and empties.
pub async fn run_persistence(bus: Arc<EventBus>, store: Arc<dyn EventStore>, batch_size: usize) {
    let flush_interval = Duration::from_secs(1);
    loop {
        let batch = bus.drain(batch_size.max(1)).await;
        if !batch.is_empty() {
            if let Err(e) = store.append_batch(bus.task_id(), &batch).await {
                warn!(task_id = %bus.task_id(), error = %e, "Failed to persist event batch");
            }
            continue;
        }
        if bus.is_closed().await {
            break;
        }
        bus.wait_ready(flush_interval).await;
    }
    debug!(task_id = %bus.task_id(), "Event persistence batcher stopped");
}

/// Heartbeat emitter: keeps SSE subscribers alive while the task idles
pub async fn run_heartbeat(bus: Arc<EventBus>, interval: Duration, cancel: CancelToken) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if bus.is_closed().await {
                    break;
                }
                bus.publish(EventKind::Heartbeat).await;
            }
            _ = cancel.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStores;

    #[tokio::test]
    async fn test_sequences_are_gapless_and_increasing() {
        let bus = EventBus::new("t1", 100);

        for _ in 0..10 {
            bus.publish(EventKind::Heartbeat).await;
        }

        let events = bus.drain(100).await;
        let seqs: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, (1..=10).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_full_queue_drops_noncritical() {
        let bus = EventBus::new("t1", 2);

        assert!(bus.publish(EventKind::Heartbeat).await.is_some());
        assert!(bus.publish(EventKind::Heartbeat).await.is_some());
        // Queue full; this one blocks ~100ms then drops
        assert!(bus.publish(EventKind::Heartbeat).await.is_none());
        assert_eq!(bus.dropped_count().await, 1);
    }

    #[tokio::test]
    async fn test_critical_event_never_dropped() {
        let bus = EventBus::new("t1", 1);

        bus.publish(EventKind::Heartbeat).await;
        let seq = bus
            .publish(EventKind::TaskError {
                error_kind: "Cancelled".to_string(),
                message: "stop".to_string(),
            })
            .await;

        assert!(seq.is_some());
        assert_eq!(bus.pending().await, 2);
        assert_eq!(bus.dropped_count().await, 0);
    }

    #[tokio::test]
    async fn test_blocked_producer_resumes_on_drain() {
        let bus = EventBus::new("t1", 1);
        bus.publish(EventKind::Heartbeat).await;

        let producer = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.publish(EventKind::Heartbeat).await })
        };

        // Drain promptly; the parked producer should get the freed slot
        tokio::time::sleep(Duration::from_millis(10)).await;
        let drained = bus.drain(10).await;
        assert_eq!(drained.len(), 1);

        let seq = producer.await.unwrap();
        assert!(seq.is_some());
    }

    #[tokio::test]
    async fn test_closed_bus_rejects_events() {
        let bus = EventBus::new("t1", 10);
        bus.close().await;
        assert!(bus.publish(EventKind::Heartbeat).await.is_none());
    }

    #[tokio::test]
    async fn test_subscriber_receives_fifo() {
        let bus = EventBus::new("t1", 100);
        let mut stream = bus.subscribe();

        let emitter = bus.emitter();
        emitter.phase_start("recon").await;
        emitter.phase_complete("recon", "success", 5).await;

        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(first.kind.kind_str(), "phase-start");
        assert_eq!(second.kind.kind_str(), "phase-complete");
        assert!(first.sequence < second.sequence);
    }

    #[tokio::test]
    async fn test_persistence_batcher_writes_all_events() {
        let bus = EventBus::new("t1", 100);
        let stores = MemoryStores::new();
        let store: Arc<dyn EventStore> = Arc::new(stores.clone());

        let batcher = tokio::spawn(run_persistence(bus.clone(), store, 5));

        let emitter = bus.emitter();
        for _ in 0..12 {
            emitter.agent_step("analysis", "thinking", 10).await;
        }
        emitter.task_complete(Default::default(), 100, 1).await;

        bus.close().await;
        batcher.await.unwrap();

        let persisted = stores.events_for("t1").await;
        assert_eq!(persisted.len(), 13);
        // Persisted exactly once, in order
        let seqs: Vec<u64> = persisted.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, (1..=13).collect::<Vec<u64>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_emits_until_cancelled() {
        let bus = EventBus::new("t1", 100);
        let cancel = CancelToken::new();

        let hb = tokio::spawn(run_heartbeat(bus.clone(), Duration::from_secs(30), cancel.clone()));

        tokio::time::sleep(Duration::from_secs(95)).await;
        cancel.cancel();
        hb.await.unwrap();

        let events = bus.drain(100).await;
        let beats = events.iter().filter(|e| e.kind == EventKind::Heartbeat).count();
        assert!(beats >= 2, "expected at least 2 heartbeats, got {}", beats);
    }
}
