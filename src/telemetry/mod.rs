//! Animator telemetry collector and helpers.
//!
//! The collector multiplexes recording phases, blink transitions, skipped
//! preview ticks and degenerate mouth picks into a bounded history plus an
//! async broadcast stream.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::animation::EyeState;
use crate::error::ErrorCode;
use crate::recording::RecordingPhase;

pub mod events;

pub use events::{MetricEvent, SkipReason};

/// Global telemetry hub shared across the crate.
static HUB: Lazy<TelemetryHub> = Lazy::new(TelemetryHub::default);

/// Access the global telemetry hub.
pub fn hub() -> &'static TelemetryHub {
    &HUB
}

/// Snapshot of collector state for CLI reporting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TelemetrySnapshot {
    pub recent: Vec<MetricEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
}

/// Broadcast-based collector retaining a bounded history of events.
pub struct TelemetryCollector {
    tx: broadcast::Sender<MetricEvent>,
    history: Mutex<VecDeque<MetricEvent>>,
    history_capacity: usize,
    total_events: AtomicU64,
    dropped_history: AtomicU64,
}

impl TelemetryCollector {
    pub fn new(buffer: usize, history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity: history_capacity.max(1),
            total_events: AtomicU64::new(0),
            dropped_history: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: MetricEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        {
            let mut history = lock(&self.history);
            if history.len() == self.history_capacity {
                history.pop_front();
                self.dropped_history.fetch_add(1, Ordering::Relaxed);
            }
            history.push_back(event.clone());
        }

        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.tx.subscribe()
    }

    /// Live events as a stream. A lagging consumer skips what it missed.
    pub fn stream(&self) -> impl Stream<Item = MetricEvent> {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|event| event.ok())
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let history = lock(&self.history);
        TelemetrySnapshot {
            recent: history.iter().cloned().collect(),
            total_events: self.total_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_history.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

/// Top-level hub wrapping collector state plus skip counters.
pub struct TelemetryHub {
    collector: TelemetryCollector,
    skipped: Mutex<HashMap<SkipReason, u64>>,
}

impl TelemetryHub {
    pub fn new(channel_capacity: usize, history_capacity: usize) -> Self {
        Self {
            collector: TelemetryCollector::new(channel_capacity, history_capacity),
            skipped: Mutex::new(HashMap::new()),
        }
    }

    pub fn collector(&self) -> &TelemetryCollector {
        &self.collector
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.collector.snapshot()
    }

    pub fn record_phase(&self, phase: RecordingPhase) {
        self.collector.publish(MetricEvent::PhaseChanged {
            phase,
            timestamp_ms: now_timestamp_ms(),
        });
    }

    pub fn record_blink(&self, eye: EyeState) {
        self.collector.publish(MetricEvent::BlinkTransition { eye });
    }

    /// Count a skipped preview tick. Only the first skip and every 50th
    /// after it are published so a stalled preview does not flood history.
    pub fn record_tick_skipped(&self, reason: SkipReason) {
        let total = {
            let mut skipped = lock(&self.skipped);
            let count = skipped.entry(reason).or_insert(0);
            *count += 1;
            *count
        };
        if total == 1 || total % 50 == 0 {
            self.collector
                .publish(MetricEvent::TickSkipped { reason, total });
        }
    }

    pub fn skipped_ticks(&self, reason: SkipReason) -> u64 {
        lock(&self.skipped).get(&reason).copied().unwrap_or(0)
    }

    pub fn record_degenerate_pick(&self, frame_index: usize, score: Option<f32>) {
        self.collector
            .publish(MetricEvent::DegeneratePick { frame_index, score });
    }

    pub fn record_recording_summary(
        &self,
        video_frames: usize,
        audio_frames: usize,
        duration: Duration,
        bytes: usize,
    ) {
        self.collector.publish(MetricEvent::RecordingSummary {
            video_frames,
            audio_frames,
            duration_ms: duration.as_millis() as u64,
            bytes,
        });
    }

    pub fn record_error(&self, error: &impl ErrorCode, context: impl Into<String>) {
        self.collector.publish(MetricEvent::Error {
            code: error.code(),
            context: context.into(),
        });
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn now_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
