//! Per-instrument and per-cycle outcome reporting. A cycle always returns a
//! full summary, even when some instruments failed or timed out.

use std::time::Duration;

/// How one instrument's unit of work ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentOutcome {
    Completed,
    Failed(String),
    TimedOut,
}

/// What one instrument's pipeline run did, stage by stage. Counts reflect
/// only data that was actually committed before any failure.
#[derive(Debug, Clone)]
pub struct InstrumentReport {
    pub instrument_id: String,
    pub prices_added: usize,
    pub dividends_added: usize,
    pub tri_added: i64,
    pub windows_done: Vec<String>,
    pub windows_skipped: Vec<String>,
    pub outcome: InstrumentOutcome,
}

impl InstrumentReport {
    pub fn new(instrument_id: impl Into<String>) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            prices_added: 0,
            dividends_added: 0,
            tri_added: 0,
            windows_done: Vec::new(),
            windows_skipped: Vec::new(),
            outcome: InstrumentOutcome::Completed,
        }
    }

    pub fn failed(instrument_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            outcome: InstrumentOutcome::Failed(reason.into()),
            ..Self::new(instrument_id)
        }
    }

    pub fn timed_out(instrument_id: impl Into<String>) -> Self {
        Self {
            outcome: InstrumentOutcome::TimedOut,
            ..Self::new(instrument_id)
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == InstrumentOutcome::Completed
    }
}

/// The aggregate result of one full sync cycle.
#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
    pub reports: Vec<InstrumentReport>,
}

impl CycleSummary {
    pub fn from_reports(reports: Vec<InstrumentReport>, elapsed: Duration) -> Self {
        let processed = reports.len();
        let succeeded = reports.iter().filter(|r| r.is_success()).count();
        Self {
            processed,
            succeeded,
            failed: processed - succeeded,
            elapsed,
            reports,
        }
    }
}
