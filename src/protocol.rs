//! The cross-boundary message protocol.
//!
//! The sandboxed context cannot hand live values to the host; everything
//! that crosses the isolation boundary is a line of JSON on the context's
//! captured stdout pipe. Each line is one [`ProtocolMessage`]: a sentinel
//! tag identifying the protocol, the run identifier the message belongs to,
//! a raw stream name and the already-serialized arguments. The protocol is
//! one-directional (context to host); after the document is injected the
//! host never sends anything back in.
//!
//! Validation happens at a single point: a message is accepted only when it
//! carries the sentinel and its run identifier equals the currently active
//! run. Anything else is foreign or stale traffic and is silently dropped.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::console::LogLevel;

/// Fixed tag distinguishing this subsystem's messages from unrelated guest
/// output on the same pipe.
pub const PROTOCOL_SOURCE: &str = "lesson-sandbox-console";

/// Placeholder emitted when a value survives none of the serialization
/// fallbacks. Must match the marker baked into the instrumentation preamble.
pub const UNSERIALIZABLE_MARKER: &str = "[unserializable]";

/// Correlation token minted per execution request.
///
/// The sole link between a dispatched execution and the console entries it
/// may produce. Comparing run identifiers is the system's only cancellation
/// mechanism: output from a superseded run fails the comparison and is
/// dropped, no teardown race involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(u64);

impl RunId {
    /// Wrap a raw identifier. Zero is reserved for "no run yet".
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw identifier value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run#{}", self.0)
    }
}

/// The shared "currently active run" state.
///
/// One gate is owned by the scheduler and cloned into every producer. A new
/// run is minted with [`RunGate::mint`], which atomically supersedes the
/// previous one; producers check [`RunGate::is_current`] before appending.
#[derive(Clone, Debug)]
pub struct RunGate {
    current: Arc<AtomicU64>,
    next: Arc<AtomicU64>,
}

impl RunGate {
    /// Create a gate with no active run.
    pub fn new() -> Self {
        Self {
            current: Arc::new(AtomicU64::new(0)),
            next: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Mint a fresh run identifier and make it current, superseding any
    /// previous run. Late messages from the superseded run now fail
    /// [`RunGate::is_current`] and are dropped.
    pub fn mint(&self) -> RunId {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        self.current.store(id, Ordering::SeqCst);
        RunId(id)
    }

    /// The currently active run, if any run was ever started.
    pub fn current(&self) -> Option<RunId> {
        match self.current.load(Ordering::SeqCst) {
            0 => None,
            raw => Some(RunId(raw)),
        }
    }

    /// Check whether `run_id` is the currently active run. Exact equality,
    /// no partial matches.
    pub fn is_current(&self, run_id: RunId) -> bool {
        self.current.load(Ordering::SeqCst) == run_id.0
    }
}

impl Default for RunGate {
    fn default() -> Self {
        Self::new()
    }
}

/// The wire shape of one message crossing the isolation boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolMessage {
    /// Protocol sentinel; must equal [`PROTOCOL_SOURCE`].
    pub source: String,
    /// Run the message belongs to.
    #[serde(rename = "runId")]
    pub run_id: RunId,
    /// Raw stream name as the guest saw it: `log`, `info`, `warn`, `error`.
    pub level: String,
    /// Independently serialized argument values.
    pub args: Vec<String>,
}

impl ProtocolMessage {
    /// Parse one wire line. Lines that are not protocol messages (plain
    /// guest output, engine noise) yield `None` and are treated as foreign
    /// traffic.
    pub fn parse(line: &str) -> Option<Self> {
        serde_json::from_str(line.trim()).ok()
    }

    /// Apply the validation rule set against the active run.
    pub fn is_valid(&self, gate: &RunGate) -> bool {
        self.source == PROTOCOL_SOURCE && gate.is_current(self.run_id)
    }

    /// Map the raw stream name onto a console level.
    ///
    /// Unrecognized names degrade to `info` rather than rejecting the
    /// message, so the guest and host sides stay forward-compatible
    /// independently.
    pub fn log_level(&self) -> LogLevel {
        match self.level.as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warning,
            "log" | "info" => LogLevel::Info,
            _ => LogLevel::Info,
        }
    }

    /// Render the message the way the browser console would: arguments
    /// joined with single spaces.
    pub fn rendered(&self) -> String {
        self.args.join(" ")
    }
}

/// Host-side mirror of the producer serializer baked into the preamble:
/// strings pass through unquoted, everything else is JSON-encoded, and a
/// value that cannot be encoded degrades to its display form. Never fails.
pub fn serialize_arg(value: &serde_json::Value) -> String {
    if let serde_json::Value::String(s) = value {
        return s.clone();
    }
    serde_json::to_string(value).unwrap_or_else(|_| UNSERIALIZABLE_MARKER.to_string())
}
