/// Processed-event trace.
///
/// Records every event the environment processes, in processing order,
/// and folds it into a deterministic hash. Two runs with identical inputs
/// must produce identical hashes; the text export makes a mismatch easy
/// to diff.

use std::io::{self, Write};

use crate::event::{EventId, EventKind, Priority};
use crate::time::SimTime;

// ── Hash utility ──────────────────────────────────────────────────────

/// Combine two u64 hashes deterministically.
pub fn hash_combine(a: u64, b: u64) -> u64 {
    let mut h = a;
    h = h.wrapping_mul(0x517cc1b727220a95);
    h = h.wrapping_add(b);
    h ^= h >> 32;
    h
}

fn kind_hash(kind: EventKind) -> u64 {
    match kind {
        EventKind::Timeout => 1,
        EventKind::Plain => 2,
        EventKind::Completion(pid) => hash_combine(3, pid.raw()),
    }
}

// ── TraceEntry ────────────────────────────────────────────────────────

/// A record of a single processed event.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TraceEntry {
    /// Position in processing order, starting at 0.
    pub index: u64,
    /// Virtual time at which the event was processed.
    pub time: SimTime,
    pub event: EventId,
    pub kind: EventKind,
    pub priority: Priority,
    /// Whether the event succeeded.
    pub ok: bool,
    /// Number of waiters it was delivered to.
    pub waiters: usize,
}

impl std::fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[#{} {} {}] {} {} waiters={}",
            self.index,
            self.time,
            self.event,
            self.kind,
            if self.ok { "ok" } else { "failed" },
            self.waiters,
        )
    }
}

// ── EventTrace ────────────────────────────────────────────────────────

/// Append-only trace of processed events.
#[derive(Debug, Clone, Default)]
pub struct EventTrace {
    entries: Vec<TraceEntry>,
}

impl EventTrace {
    pub fn new() -> Self {
        EventTrace { entries: Vec::new() }
    }

    pub fn record(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Event ids in processing order.
    pub fn event_order(&self) -> Vec<EventId> {
        self.entries.iter().map(|e| e.event).collect()
    }

    /// Deterministic hash of the whole trace.
    pub fn hash(&self) -> u64 {
        self.entries.iter().fold(0u64, |mut h, e| {
            h = hash_combine(h, e.event.raw());
            h = hash_combine(h, e.time.as_f64().to_bits());
            h = hash_combine(h, e.priority.raw() as u64);
            h = hash_combine(h, kind_hash(e.kind));
            hash_combine(h, u64::from(e.ok))
        })
    }

    /// Write the trace in a line-oriented text format.
    pub fn export<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "# TEMPO EVENT TRACE v1")?;
        writeln!(w, "# events: {}", self.entries.len())?;
        writeln!(w, "# hash: {:016x}", self.hash())?;
        for e in &self.entries {
            writeln!(
                w,
                "E {} {} {} {} {} {} {}",
                e.index,
                e.time.as_f64(),
                e.event.raw(),
                e.kind,
                e.priority.raw(),
                u8::from(e.ok),
                e.waiters,
            )?;
        }
        Ok(())
    }
}
