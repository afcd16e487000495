//! Progress events for one execution.

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;

use hub_core::enums::SyncPhase;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    pub execution_id: String,
    pub phase: SyncPhase,
    /// 0..=100, never decreasing within one execution.
    pub percent: u8,
    pub processed: u64,
    pub total: u64,
    pub errors: u64,
    pub message: String,
}

/// Sends progress without ever waiting on the receiver.
///
/// A full or closed channel drops the update.
#[derive(Debug)]
pub struct ProgressReporter {
    tx: Option<mpsc::Sender<SyncProgress>>,
    execution_id: String,
    phase: SyncPhase,
    percent: u8,
    dropped: u64,
}

impl ProgressReporter {
    #[must_use]
    pub fn new(execution_id: impl Into<String>, tx: Option<mpsc::Sender<SyncProgress>>) -> Self {
        Self {
            tx,
            execution_id: execution_id.into(),
            phase: SyncPhase::Initialize,
            percent: 0,
            dropped: 0,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> SyncPhase {
        self.phase
    }

    #[must_use]
    pub const fn percent(&self) -> u8 {
        self.percent
    }

    /// Updates lost to a full or closed channel.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Enter a phase at its progress floor.
    pub fn enter(&mut self, phase: SyncPhase, message: impl Into<String>) {
        self.phase = phase;
        self.emit(phase.progress_floor(), 0, 0, 0, message.into());
    }

    /// Report progress inside the current phase. `processed` of `total`
    /// scales between this phase's floor and the next one's.
    pub fn advance(&mut self, processed: u64, total: u64, errors: u64, message: impl Into<String>) {
        let floor = self.phase.progress_floor();
        let ceiling = next_floor(self.phase);
        let span = u64::from(ceiling - floor);
        let step = if total == 0 {
            0
        } else {
            (span * processed.min(total)) / total
        };
        let percent = floor + u8::try_from(step).unwrap_or(ceiling - floor);
        self.emit(percent, processed, total, errors, message.into());
    }

    fn emit(&mut self, percent: u8, processed: u64, total: u64, errors: u64, message: String) {
        self.percent = self.percent.max(percent.min(100));
        let Some(tx) = &self.tx else {
            return;
        };
        let event = SyncProgress {
            execution_id: self.execution_id.clone(),
            phase: self.phase,
            percent: self.percent,
            processed,
            total,
            errors,
            message,
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                trace!(execution_id = %self.execution_id, "progress channel full; update dropped");
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped += 1;
                self.tx = None;
            }
        }
    }
}

const fn next_floor(phase: SyncPhase) -> u8 {
    match phase {
        SyncPhase::Initialize => SyncPhase::Extract.progress_floor(),
        SyncPhase::Extract => SyncPhase::Map.progress_floor(),
        SyncPhase::Map => SyncPhase::MatchKeys.progress_floor(),
        SyncPhase::MatchKeys => SyncPhase::Govern.progress_floor(),
        SyncPhase::Govern => SyncPhase::Load.progress_floor(),
        SyncPhase::Load => SyncPhase::Lineage.progress_floor(),
        SyncPhase::Lineage | SyncPhase::Complete => SyncPhase::Complete.progress_floor(),
    }
}
