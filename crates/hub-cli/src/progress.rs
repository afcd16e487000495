use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use hub_engine::SyncProgress;

use crate::ui;

/// Terminal rendering of an execution's progress stream.
pub struct RunProgress {
    bar: Option<ProgressBar>,
}

impl RunProgress {
    #[must_use]
    pub fn new(task: &str) -> Self {
        if !ui::prefs().progress {
            return Self { bar: None };
        }
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{prefix:.bold} {bar:30.cyan/blue} {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_prefix(task.to_string());
        Self { bar: Some(bar) }
    }

    /// A progress channel and the task draining it into the bar. Without a
    /// terminal the updates are only logged.
    pub fn attach(&self, buffer: usize) -> (mpsc::Sender<SyncProgress>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<SyncProgress>(buffer.max(1));
        let bar = self.bar.clone();
        let handle = tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                tracing::debug!(
                    execution_id = %update.execution_id,
                    phase = %update.phase,
                    percent = update.percent,
                    processed = update.processed,
                    "progress"
                );
                if let Some(bar) = &bar {
                    bar.set_position(u64::from(update.percent));
                    bar.set_message(format!("{} {}", update.phase, update.message));
                }
            }
        });
        (tx, handle)
    }

    pub fn finish(&self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(message.to_string());
        }
    }

    pub fn abandon(&self, message: &str) {
        if let Some(bar) = &self.bar {
            bar.abandon_with_message(message.to_string());
        }
    }
}
