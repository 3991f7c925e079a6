//! Segment-by-segment event collection.
//!
//! Each window of the requested range is sent to the model and saved
//! immediately, so an interruption or failure never loses earlier windows.

use std::time::Duration;

use crate::model::{prompt, ModelClient, Sleeper, ThreadSleeper};
use crate::timeline::EventRequest;
use crate::vault::{NoteRecord, Vault};

use super::StepError;

/// Outcome of one window, handed to the progress callback.
#[derive(Debug)]
pub struct SegmentResult {
    /// Zero-based position in the plan.
    pub index: usize,
    pub total: usize,
    pub label: String,
    pub outcome: Result<NoteRecord, StepError>,
}

/// Summary of a collection run.
#[derive(Debug, Default)]
pub struct CollectReport {
    pub saved: Vec<NoteRecord>,
    /// Windows that failed, with the error.
    pub failed: Vec<(String, StepError)>,
    /// Windows never attempted because the token budget ran out.
    pub skipped: usize,
    pub budget_exhausted: bool,
}

/// Drives the model over the windows of an [`EventRequest`].
pub struct Collector<'a> {
    client: &'a mut ModelClient,
    vault: &'a Vault,
    pacer: Box<dyn Sleeper>,
    pause: Duration,
    streaming: bool,
}

impl<'a> Collector<'a> {
    pub fn new(client: &'a mut ModelClient, vault: &'a Vault) -> Self {
        Self {
            client,
            vault,
            pacer: Box::new(ThreadSleeper),
            pause: Duration::from_secs(1),
            streaming: true,
        }
    }

    /// Pause between consecutive model calls.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn with_pacer(mut self, pacer: Box<dyn Sleeper>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Collects every window of `request`, split into at most `segments`.
    ///
    /// `on_segment` is called after each window with its outcome. A
    /// failed window is recorded and the run moves on; an exhausted token
    /// budget stops the run.
    pub fn run<F>(&mut self, request: &EventRequest, segments: usize, mut on_segment: F) -> CollectReport
    where
        F: FnMut(&SegmentResult),
    {
        let labels = request.plan(segments).labels();
        let total = labels.len();
        let mut report = CollectReport::default();

        for (index, label) in labels.into_iter().enumerate() {
            let outcome = self.collect_window(&request.name, &label);
            let result = SegmentResult {
                index,
                total,
                label,
                outcome,
            };
            on_segment(&result);

            match result.outcome {
                Ok(record) => report.saved.push(record),
                Err(err) if err.is_budget_exhausted() => {
                    report.budget_exhausted = true;
                    report.skipped = total - index;
                    break;
                }
                Err(err) => {
                    tracing::error!("Window {} of '{}' failed: {err}", result.label, request.name);
                    report.failed.push((result.label, err));
                }
            }

            if index + 1 < total {
                self.pacer.sleep(self.pause);
            }
        }

        report
    }

    fn collect_window(&mut self, event_name: &str, label: &str) -> Result<NoteRecord, StepError> {
        tracing::info!("Generating '{event_name}' for {label}");
        let result = self.client.call(
            &prompt::timeline_prompt(event_name, label),
            Some(prompt::timeline_system_prompt()),
            None,
            self.streaming,
        )?;
        Ok(self.vault.save_timeline(event_name, label, &result.content)?)
    }
}
