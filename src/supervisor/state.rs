//! Server liveness state
//!
//! ```text
//!                 start_server()
//!   ┌────────┐ ─────────────────► ┌──────────┐   both signals in one poll   ┌─────────┐
//!   │  Down  │                    │ Starting │ ───────────────────────────► │ Running │
//!   └────────┘ ◄───────────────── └──────────┘                              └─────────┘
//!                   timeout
//! ```
//!
//! `running` is only ever derived from a single poll observation, never
//! from signals seen in different iterations.

use std::fmt;

/// Liveness of the background agent server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerState {
    pub running: bool,
    /// Server process seen in the last poll
    pub pid_detected: bool,
    /// Version probe healthy in the last poll
    pub version_probe_ok: bool,
}

impl ServerState {
    /// Forget everything observed about a previous instance
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record one poll iteration; returns whether the server is now running
    pub(crate) fn record_poll(&mut self, pid_detected: bool, version_probe_ok: bool) -> bool {
        self.pid_detected = pid_detected;
        self.version_probe_ok = version_probe_ok;
        self.running = pid_detected && version_probe_ok;
        self.running
    }

    /// Readiness window elapsed without success
    pub(crate) fn mark_down(&mut self) {
        self.running = false;
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.running {
            write!(f, "running")
        } else {
            write!(
                f,
                "down (process: {}, probe: {})",
                if self.pid_detected { "yes" } else { "no" },
                if self.version_probe_ok { "ok" } else { "failing" }
            )
        }
    }
}
