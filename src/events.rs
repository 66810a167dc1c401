//! Lifecycle event sinks.
//!
//! Events are dispatched after the triggering write has already gone
//! through. Dispatch is synchronous and fire-and-forget: nothing a sink or
//! listener does can turn a committed mutation into an error.

use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;

/// A lifecycle event, e.g. `paymentMethod:created` with the re-read row
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub payload: Value,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn dispatch(&self, event: &Event);
}

/// Drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn dispatch(&self, _event: &Event) {}
}

/// Keeps every event in memory, in dispatch order
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn names(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.name).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventSink for MemorySink {
    fn dispatch(&self, event: &Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Forwards events to an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn dispatch(&self, event: &Event) {
        if self.tx.send(event.clone()).is_err() {
            tracing::debug!(event = %event.name, "event receiver dropped");
        }
    }
}

pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

type Listener = Arc<dyn Fn(&Event) -> std::result::Result<(), ListenerError> + Send + Sync>;

/// In-process listener list keyed by event name (`*` matches all).
///
/// Each listener runs in isolation: an `Err` is logged, a panic is caught
/// and logged, and the remaining listeners still run. Listeners run
/// outside the registry lock, so they may register further listeners;
/// those see the next event.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<(String, Listener)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen<F>(&self, name: impl Into<String>, listener: F)
    where
        F: Fn(&Event) -> std::result::Result<(), ListenerError> + Send + Sync + 'static,
    {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push((name.into(), Arc::new(listener)));
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }
}

impl EventSink for EventBus {
    fn dispatch(&self, event: &Event) {
        let matching: Vec<Listener> = match self.listeners.read() {
            Ok(listeners) => listeners
                .iter()
                .filter(|(name, _)| name == "*" || name == &event.name)
                .map(|(_, listener)| Arc::clone(listener))
                .collect(),
            Err(_) => {
                tracing::error!(event = %event.name, "event listener registry poisoned");
                return;
            }
        };

        for listener in matching {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(event = %event.name, error = %err, "event listener failed");
                }
                Err(_) => {
                    tracing::error!(event = %event.name, "event listener panicked");
                }
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
