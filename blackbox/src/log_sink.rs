//! Log fan-out to named subscribers.
//!
//! [`LogHub`] is a [`tracing_subscriber::Layer`]: installed next to the usual
//! `fmt` layer, it renders every event as a single line and hands it to each
//! subscriber. Session recorders subscribe to mirror the log into their
//! session folder.
//!
//! ```rust,no_run
//! use blackbox::log_sink::LogHub;
//! use tracing_subscriber::prelude::*;
//!
//! let hub = LogHub::new();
//! tracing_subscriber::registry()
//!     .with(tracing_subscriber::fmt::layer())
//!     .with(hub.clone())
//!     .init();
//! ```

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Local;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Receives one formatted log line.
pub type LogCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// A source of formatted log lines that parties can subscribe to by name.
pub trait LogSink: Send + Sync {
    /// Registers `callback` under `name`, replacing any previous one.
    fn subscribe(&self, name: &str, callback: LogCallback);

    /// Removes the subscriber registered under `name`, if any.
    fn unsubscribe(&self, name: &str);
}

thread_local! {
    static DELIVERING: Cell<bool> = const { Cell::new(false) };
}

/// Resets the re-entrancy flag even if a callback panics.
struct DeliveryGuard;

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        DELIVERING.with(|d| d.set(false));
    }
}

/// Broadcasts log lines to named subscribers.
///
/// Cloning is cheap; clones share the subscriber table.
#[derive(Clone, Default)]
pub struct LogHub {
    subscribers: Arc<Mutex<BTreeMap<String, LogCallback>>>,
}

impl LogHub {
    /// Creates a hub with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, BTreeMap<String, LogCallback>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.table().len()
    }

    /// Delivers `line` to every subscriber.
    ///
    /// Callbacks run outside the table lock. Lines published from inside a
    /// callback on the same thread are dropped.
    pub fn publish(&self, line: &str) {
        if DELIVERING.with(Cell::get) {
            return;
        }
        let callbacks: Vec<LogCallback> = self.table().values().cloned().collect();
        if callbacks.is_empty() {
            return;
        }

        DELIVERING.with(|d| d.set(true));
        let _guard = DeliveryGuard;
        for callback in callbacks {
            callback(line);
        }
    }
}

impl LogSink for LogHub {
    fn subscribe(&self, name: &str, callback: LogCallback) {
        self.table().insert(name.to_string(), callback);
    }

    fn unsubscribe(&self, name: &str) {
        self.table().remove(name);
    }
}

impl fmt::Debug for LogHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogHub")
            .field("subscribers", &self.table().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<S: Subscriber> Layer<S> for LogHub {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if DELIVERING.with(Cell::get) || self.table().is_empty() {
            return;
        }

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let meta = event.metadata();
        let line = format!(
            "{} {:<5} {}: {}{}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            meta.level(),
            meta.target(),
            visitor.message,
            visitor.fields,
        );
        self.publish(&line);
    }
}

/// Collects the `message` field and renders the rest as ` key=value`.
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
