//! Kernel trace events and in-process subscription streams.
//!
//! The trace is the kernel's observable surface: phase transitions,
//! firings, decisions, impasses, learned chunks, and reported
//! conditions. Events are fanned out to bounded subscriber channels with
//! non-blocking sends, so a slow subscriber can never stall a phase;
//! when a queue is full the event is dropped for that subscriber.

use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{NoesisError, NoesisResult, RuntimeError};

/// Phases of the decision cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Host input callback runs; input-link WMEs land.
    Input,
    /// Queued instantiations fire and retract, producing preferences.
    Preference,
    /// Non-context slots are resolved and WM deltas applied.
    WorkingMemory,
    /// Output-link snapshot is handed to the host callback.
    Output,
    /// Context slots are resolved; goals push and pop.
    Decision,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Preference => write!(f, "preference"),
            Self::WorkingMemory => write!(f, "working-memory"),
            Self::Output => write!(f, "output"),
            Self::Decision => write!(f, "decision"),
        }
    }
}

/// Unique identifier for a trace subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Creates a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// One kernel event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    /// A phase began.
    PhaseStart {
        /// The phase.
        phase: Phase,
        /// Decision cycle counter.
        decision_cycle: u64,
    },
    /// A phase completed.
    PhaseEnd {
        /// The phase.
        phase: Phase,
        /// Decision cycle counter.
        decision_cycle: u64,
    },
    /// A WME entered working memory.
    WmeAdded {
        /// Its timetag.
        timetag: u64,
        /// Printed `(id ^attr value)` form.
        wme: String,
    },
    /// A WME left working memory.
    WmeRemoved {
        /// Its timetag.
        timetag: u64,
        /// Printed `(id ^attr value)` form.
        wme: String,
    },
    /// An instantiation fired.
    ProductionFired {
        /// The production name.
        production: String,
        /// The instantiation id.
        instantiation: u64,
    },
    /// An instantiation retracted.
    ProductionRetracted {
        /// The production name.
        production: String,
        /// The instantiation id.
        instantiation: u64,
    },
    /// A context slot settled on an operator.
    DecisionMade {
        /// The goal.
        goal: String,
        /// The selected operator.
        operator: String,
    },
    /// A context slot could not settle; a sub-goal was pushed.
    ImpasseCreated {
        /// The impassed goal.
        goal: String,
        /// Impasse flavor.
        impasse: String,
        /// The new sub-goal identifier.
        subgoal: String,
    },
    /// A sub-goal was removed.
    ImpasseResolved {
        /// The goal whose impasse resolved.
        goal: String,
        /// The popped sub-goal.
        subgoal: String,
    },
    /// Chunking produced a new rule.
    ChunkBuilt {
        /// The new production's name.
        name: String,
        /// `chunk` or `justification`.
        kind: String,
    },
    /// An inconsistent preference set was reported (non-fatal).
    PreferenceConflict {
        /// Slot identifier.
        id: String,
        /// Slot attribute.
        attr: String,
        /// What was inconsistent.
        reason: String,
    },
    /// A resource bound cut a cycle short (non-fatal).
    ResourceBound {
        /// Which bound.
        bound: String,
        /// Its configured limit.
        limit: u64,
    },
    /// A run stopped.
    RunHalted {
        /// Why: requested unit count, interrupt, or bound.
        reason: String,
    },
}

/// A timestamped trace event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// When the event was emitted.
    pub at: DateTime<Utc>,
    /// The event.
    pub event: TraceEvent,
}

/// A subscription stream for trace events.
///
/// Dropping the stream disconnects it; the bus prunes dead subscribers
/// on the next dispatch.
#[derive(Debug)]
pub struct TraceStream {
    subscription_id: SubscriptionId,
    rx: Receiver<TraceRecord>,
}

impl TraceStream {
    /// The subscription id backing this stream.
    #[must_use]
    pub const fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    /// Receives the next event (blocking).
    pub fn recv(&self) -> NoesisResult<TraceRecord> {
        self.rx
            .recv()
            .map_err(|_| NoesisError::Runtime(RuntimeError::TraceDisconnected))
    }

    /// Receives the next event with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> NoesisResult<TraceRecord> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => NoesisError::Runtime(RuntimeError::TraceTimeout {
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            }),
            RecvTimeoutError::Disconnected => {
                NoesisError::Runtime(RuntimeError::TraceDisconnected)
            }
        })
    }

    /// Returns the next event if one is already queued.
    #[must_use]
    pub fn try_recv(&self) -> Option<TraceRecord> {
        self.rx.try_recv().ok()
    }

    /// Drains everything currently queued.
    #[must_use]
    pub fn drain(&self) -> Vec<TraceRecord> {
        let mut out = Vec::new();
        while let Ok(record) = self.rx.try_recv() {
            out.push(record);
        }
        out
    }
}

/// The per-agent trace fan-out.
#[derive(Debug, Default)]
pub struct TraceBus {
    subscribers: Vec<(SubscriptionId, Sender<TraceRecord>)>,
}

impl TraceBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new bounded subscription.
    pub fn subscribe(&mut self, capacity: usize) -> TraceStream {
        let (tx, rx) = bounded(capacity.max(1));
        let subscription_id = SubscriptionId::new();
        self.subscribers.push((subscription_id, tx));
        TraceStream {
            subscription_id,
            rx,
        }
    }

    /// Removes a subscription by id.
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|(sid, _)| *sid != id);
    }

    /// True if anyone is listening. Emitters may skip building event
    /// payloads when this is false.
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty()
    }

    /// Emits an event to every live subscriber without blocking.
    pub fn emit(&mut self, event: TraceEvent) {
        if self.subscribers.is_empty() {
            return;
        }
        let record = TraceRecord {
            at: Utc::now(),
            event,
        };
        self.subscribers.retain(|(_, tx)| {
            match tx.try_send(record.clone()) {
                Ok(()) => true,
                // A full queue drops the event for that subscriber only.
                Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_and_receive() {
        let mut bus = TraceBus::new();
        let stream = bus.subscribe(8);
        bus.emit(TraceEvent::RunHalted {
            reason: "done".to_string(),
        });
        let record = stream.recv_timeout(Duration::from_millis(100)).unwrap();
        assert!(matches!(record.event, TraceEvent::RunHalted { .. }));
    }

    #[test]
    fn test_full_queue_drops_not_blocks() {
        let mut bus = TraceBus::new();
        let stream = bus.subscribe(1);
        bus.emit(TraceEvent::RunHalted {
            reason: "first".to_string(),
        });
        bus.emit(TraceEvent::RunHalted {
            reason: "second".to_string(),
        });
        let records = stream.drain();
        assert_eq!(records.len(), 1);
        assert!(
            matches!(&records[0].event, TraceEvent::RunHalted { reason } if reason == "first")
        );
        // The subscriber stays registered after a drop.
        assert!(bus.has_subscribers());
    }

    #[test]
    fn test_dropped_stream_is_pruned() {
        let mut bus = TraceBus::new();
        let stream = bus.subscribe(4);
        drop(stream);
        bus.emit(TraceEvent::RunHalted {
            reason: "x".to_string(),
        });
        assert!(!bus.has_subscribers());
    }

    #[test]
    fn test_unsubscribe_by_id() {
        let mut bus = TraceBus::new();
        let stream = bus.subscribe(4);
        bus.unsubscribe(stream.subscription_id());
        assert!(!bus.has_subscribers());
        assert!(stream.recv_timeout(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_event_serialization() {
        let event = TraceEvent::ImpasseCreated {
            goal: "S1".to_string(),
            impasse: "tie".to_string(),
            subgoal: "S2".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("impasse_created"));
        let back: TraceEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
