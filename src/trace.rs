//! Partition event stream for step-by-step inspection of a run.
//!
//! When the `trace` feature is enabled, the minimizer records every selection,
//! local search, split, assignment and duplicate into a [`TraceWriter`]. The
//! rendered form is one tagged line per event:
//!
//! ```text
//! TRACE SELECT t=<iter> region=<id> score=<s>
//! TRACE SEARCH t=<iter> fun=<f> nfev=<n> x=[..]
//! TRACE SPLIT region=<id> kind=<empty|owned|new|both> axis=<k> at=<c> children=<a>,<b>
//! TRACE ASSIGN region=<id> x=[..]
//! TRACE DUPLICATE region=<id> x=[..]
//! TRACE STOP t=<iter> reason=<tag> nfev=<n>
//! ```
//!
//! Without the feature, [`trace_event!`](crate::trace_event) expands to nothing
//! and the writer is never populated.

use std::fmt;

use crate::domain::RegionId;
use crate::error::StopReason;
use crate::region::SplitKind;

/// One recorded partition event.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    Select {
        iteration: usize,
        region: RegionId,
        score: f64,
    },
    Search {
        iteration: usize,
        x: Vec<f64>,
        fun: f64,
        nfev: usize,
    },
    Split {
        region: RegionId,
        kind: SplitKind,
        axis: usize,
        at: f64,
        children: [RegionId; 2],
    },
    Assign {
        region: RegionId,
        x: Vec<f64>,
    },
    Duplicate {
        region: RegionId,
        x: Vec<f64>,
    },
    Stop {
        iteration: usize,
        reason: StopReason,
        nfev: usize,
    },
}

fn write_point(f: &mut fmt::Formatter<'_>, x: &[f64]) -> fmt::Result {
    write!(f, "[")?;
    for (i, xi) in x.iter().enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, "{:.17e}", xi)?;
    }
    write!(f, "]")
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select {
                iteration,
                region,
                score,
            } => write!(
                f,
                "TRACE SELECT t={} region={} score={:.17e}",
                iteration,
                region.index(),
                score
            ),
            Self::Search {
                iteration,
                x,
                fun,
                nfev,
            } => {
                write!(f, "TRACE SEARCH t={} fun={:.17e} nfev={} x=", iteration, fun, nfev)?;
                write_point(f, x)
            }
            Self::Split {
                region,
                kind,
                axis,
                at,
                children,
            } => write!(
                f,
                "TRACE SPLIT region={} kind={} axis={} at={:.17e} children={},{}",
                region.index(),
                kind.tag(),
                axis,
                at,
                children[0].index(),
                children[1].index()
            ),
            Self::Assign { region, x } => {
                write!(f, "TRACE ASSIGN region={} x=", region.index())?;
                write_point(f, x)
            }
            Self::Duplicate { region, x } => {
                write!(f, "TRACE DUPLICATE region={} x=", region.index())?;
                write_point(f, x)
            }
            Self::Stop {
                iteration,
                reason,
                nfev,
            } => write!(
                f,
                "TRACE STOP t={} reason={} nfev={}",
                iteration,
                reason.tag(),
                nfev
            ),
        }
    }
}

/// Ordered collection of trace events owned by one minimizer.
#[derive(Debug, Clone, Default)]
pub struct TraceWriter {
    events: Vec<TraceEvent>,
}

impl TraceWriter {
    pub fn new() -> Self {
        Self {
            events: Vec::with_capacity(1024),
        }
    }

    pub fn record(&mut self, event: TraceEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Rendered trace as a vector of lines.
    pub fn lines(&self) -> Vec<String> {
        self.events.iter().map(|e| e.to_string()).collect()
    }
}

impl fmt::Display for TraceWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for event in &self.events {
            writeln!(f, "{}", event)?;
        }
        Ok(())
    }
}

/// Record a trace event (only active with the `trace` feature).
#[cfg(feature = "trace")]
#[macro_export]
macro_rules! trace_event {
    ($writer:expr, $event:expr) => {
        $writer.record($event)
    };
}

/// No-op when the trace feature is disabled.
#[cfg(not(feature = "trace"))]
#[macro_export]
macro_rules! trace_event {
    ($writer:expr, $event:expr) => {};
}
