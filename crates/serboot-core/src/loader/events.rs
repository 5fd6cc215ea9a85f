//! Progress events emitted while an update is sent.
//!
//! The CLI subscribes through `LoaderObserver`; the core only reports.

use std::fmt;
use std::sync::Mutex;

/// Update phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    /// Nothing sent yet.
    Idle,
    /// Sending the auto-baud preamble.
    Sync,
    Erase,
    Write,
    Finish,
    Complete,
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadPhase::Idle => write!(f, "Idle"),
            LoadPhase::Sync => write!(f, "Sync"),
            LoadPhase::Erase => write!(f, "Erase"),
            LoadPhase::Write => write!(f, "Write"),
            LoadPhase::Finish => write!(f, "Finish"),
            LoadPhase::Complete => write!(f, "Complete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadEvent {
    PhaseChanged { from: LoadPhase, to: LoadPhase },
    /// A frame left the host.
    FrameSent {
        kind: &'static str,
        wire_len: usize,
        index: usize,
        total: usize,
    },
    Complete { frames: usize, bytes: usize },
}

pub trait LoaderObserver: Send + Sync {
    fn on_event(&self, event: &LoadEvent);
}

impl<T: LoaderObserver + ?Sized> LoaderObserver for &T {
    fn on_event(&self, event: &LoadEvent) {
        (**self).on_event(event)
    }
}

/// Discards everything.
pub struct NullObserver;

impl LoaderObserver for NullObserver {
    fn on_event(&self, _event: &LoadEvent) {}
}

/// Logs events using tracing.
pub struct TracingObserver;

impl LoaderObserver for TracingObserver {
    fn on_event(&self, event: &LoadEvent) {
        match event {
            LoadEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            LoadEvent::FrameSent {
                kind,
                wire_len,
                index,
                total,
            } => {
                let pct = if *total > 0 { (index + 1) * 100 / total } else { 0 };
                tracing::debug!(kind, wire_len, progress = %format!("{}%", pct), "Frame sent");
            }
            LoadEvent::Complete { frames, bytes } => {
                tracing::info!(frames, bytes, "Update sent");
            }
        }
    }
}

/// Keeps every event; used by tests.
#[derive(Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<LoadEvent>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LoadEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn phases(&self) -> Vec<LoadPhase> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                LoadEvent::PhaseChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }
}

impl LoaderObserver for CollectingObserver {
    fn on_event(&self, event: &LoadEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
