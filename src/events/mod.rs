use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
        Mutex,
    },
    time::Duration,
};

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::{
    data_model::{Event, EventType},
    utils::get_epoch_time_in_ms,
};

/// A single frame on the push channel. `connection` opens the stream,
/// `heartbeat` proves liveness, `event` wraps a domain event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamFrame {
    Connection { timestamp: u64 },
    Heartbeat { timestamp: u64 },
    Event {
        timestamp: u64,
        id: String,
        payload: Event,
    },
}

impl StreamFrame {
    pub fn connection() -> Self {
        StreamFrame::Connection {
            timestamp: get_epoch_time_in_ms(),
        }
    }

    fn heartbeat() -> Self {
        StreamFrame::Heartbeat {
            timestamp: get_epoch_time_in_ms(),
        }
    }

    pub fn event(event: Event) -> Self {
        StreamFrame::Event {
            timestamp: event.timestamp,
            id: event.id.clone(),
            payload: event,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventBusStats {
    pub total_published: u64,
    pub buffered: usize,
    pub subscribers: usize,
    pub total_dropped: u64,
}

struct Ring {
    buffer: VecDeque<Event>,
    capacity: usize,
}

/// Single-process pub/sub bus. A bounded ring keeps the last `ring_capacity`
/// events for replay and the REST snapshot; live fan-out rides a broadcast
/// channel whose bounded per-receiver buffer drops the oldest frames for a
/// lagging subscriber instead of stalling publishers or fast readers.
pub struct EventBus {
    ring: Mutex<Ring>,
    live_tx: broadcast::Sender<StreamFrame>,
    published_total: AtomicU64,
    dropped_total: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(ring_capacity: usize, subscriber_queue_capacity: usize) -> Self {
        let (live_tx, _) = broadcast::channel(subscriber_queue_capacity.max(1));
        Self {
            ring: Mutex::new(Ring {
                buffer: VecDeque::with_capacity(ring_capacity),
                capacity: ring_capacity.max(1),
            }),
            live_tx,
            published_total: AtomicU64::new(0),
            dropped_total: Arc::new(AtomicU64::new(0)),
        }
    }

    /// O(1) append; evicts the oldest buffered event when full. Publishers
    /// never block, whatever subscribers are doing.
    pub fn publish(&self, event_type: EventType, payload: serde_json::Value) -> Event {
        let event = Event::new(event_type, payload);
        {
            let mut ring = self.ring.lock().expect("event ring lock poisoned");
            if ring.buffer.len() == ring.capacity {
                ring.buffer.pop_front();
            }
            ring.buffer.push_back(event.clone());
        }
        self.published_total.fetch_add(1, Ordering::Relaxed);
        // Send fails only when nobody is subscribed, which is fine.
        let _ = self.live_tx.send(StreamFrame::event(event.clone()));
        event
    }

    /// A live feed of future frames, preceded by a replay of up to
    /// `replay` already-buffered events. The receiver is registered under
    /// the ring lock, so no event lands in both the replay and the feed.
    pub fn subscribe(&self, replay: usize) -> BusSubscription {
        let (rx, replayed) = {
            let ring = self.ring.lock().expect("event ring lock poisoned");
            let rx = self.live_tx.subscribe();
            let skip = ring.buffer.len().saturating_sub(replay);
            let replayed = ring.buffer.iter().skip(skip).cloned().collect();
            (rx, replayed)
        };
        BusSubscription {
            replay: replayed,
            rx,
            dropped: 0,
            bus_dropped: self.dropped_total.clone(),
        }
    }

    /// Snapshot of the most recent events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        let ring = self.ring.lock().expect("event ring lock poisoned");
        ring.buffer.iter().rev().take(limit).cloned().collect()
    }

    pub fn stats(&self) -> EventBusStats {
        let buffered = self
            .ring
            .lock()
            .expect("event ring lock poisoned")
            .buffer
            .len();
        EventBusStats {
            total_published: self.published_total.load(Ordering::Relaxed),
            buffered,
            subscribers: self.live_tx.receiver_count(),
            total_dropped: self.dropped_total.load(Ordering::Relaxed),
        }
    }

    /// Emits a synthetic heartbeat frame on a fixed interval so push-channel
    /// clients can tell a quiet stream from a dead connection. Heartbeats
    /// bypass the ring: replaying them would evict real events.
    pub fn start_heartbeat(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<()>,
    ) {
        let bus = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let _ = bus.live_tx.send(StreamFrame::heartbeat());
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("event bus heartbeat stopping");
                        return;
                    }
                }
            }
        });
    }
}

/// What a subscriber sees next: a frame, or notice that it fell behind and
/// `n` frames were dropped from its queue.
#[derive(Debug)]
pub enum SubscriptionItem {
    Frame(StreamFrame),
    Lagged(u64),
    Closed,
}

pub struct BusSubscription {
    /// Buffered events handed over at subscription time, oldest first.
    pub replay: Vec<Event>,
    rx: broadcast::Receiver<StreamFrame>,
    dropped: u64,
    bus_dropped: Arc<AtomicU64>,
}

impl BusSubscription {
    pub async fn next_item(&mut self) -> SubscriptionItem {
        match self.rx.recv().await {
            Ok(frame) => SubscriptionItem::Frame(frame),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                self.dropped += n;
                self.bus_dropped.fetch_add(n, Ordering::Relaxed);
                SubscriptionItem::Lagged(n)
            }
            Err(broadcast::error::RecvError::Closed) => SubscriptionItem::Closed,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Releases the subscription's slot. Dropping does the same.
    pub fn unsubscribe(self) {}
}
