//! Drives preview polling for one job. The fetcher owns the single retry
//! timer: arming replaces (and thereby cancels) any previous one, and the
//! timer is always disarmed before a new fetch goes out, so two timers
//! can never be live for the same job.

use std::pin::Pin;
use std::time::Duration;

use causeway_core::error::GateError;
use causeway_core::gate::{Gate, GateState};
use causeway_core::preview::PreviewPoll;
use tokio::time::Sleep;

use crate::api::JobApi;
use crate::snapshot::SnapshotStore;

/// One-shot retry timer. Dropping the armed sleep cancels it; the handle
/// is always disposed before a new one is created.
#[derive(Default)]
pub struct RetryTimer {
    armed: Option<Pin<Box<Sleep>>>,
}

impl RetryTimer {
    pub fn arm(&mut self, delay: Duration) {
        self.armed = Some(Box::pin(tokio::time::sleep(delay)));
    }

    pub fn disarm(&mut self) {
        self.armed = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Wait for the armed timer to fire, consuming it. Returns
    /// immediately when nothing is armed.
    pub async fn fired(&mut self) {
        if let Some(sleep) = self.armed.take() {
            sleep.await;
        }
    }
}

pub struct PreviewFetcher<'a> {
    api: &'a JobApi,
    store: &'a SnapshotStore,
    timer: RetryTimer,
    main_data_source_id: Option<String>,
}

impl<'a> PreviewFetcher<'a> {
    pub fn new(api: &'a JobApi, store: &'a SnapshotStore, main_data_source_id: Option<String>) -> Self {
        PreviewFetcher {
            api,
            store,
            timer: RetryTimer::default(),
            main_data_source_id,
        }
    }

    /// One fetch: disarm any armed timer, call the endpoint, persist a
    /// ready preview before surfacing it, arm exactly one timer on a
    /// pending answer. Errors are surfaced without scheduling a retry —
    /// retry is a user action.
    pub async fn load_once(&mut self, gate: &mut Gate) -> Result<(), GateError> {
        let generation = gate.begin_load()?;
        self.timer.disarm();

        match self
            .api
            .fetch_preview(gate.job_id(), self.main_data_source_id.as_deref())
            .await
        {
            Ok(PreviewPoll::Ready(preview)) => {
                // Persist before surfacing so a reload mid-flow resumes
                // without re-fetching.
                if let Err(e) = self.store.save_preview(gate.job_id(), &preview) {
                    tracing::warn!(error = %e, "failed to snapshot preview");
                }
                gate.apply_poll(generation, PreviewPoll::Ready(preview));
                Ok(())
            }
            Ok(PreviewPoll::Pending { retry_after }) => {
                if gate.apply_poll(generation, PreviewPoll::Pending { retry_after }) {
                    tracing::debug!(seconds = retry_after.as_secs_f64(), "preview pending");
                    self.timer.arm(retry_after);
                }
                Ok(())
            }
            Err(error) => {
                gate.apply_load_error(generation, &error);
                Err(error)
            }
        }
    }

    /// Poll until the preview is ready (or a fetch fails, or Ctrl-C).
    /// There is deliberately no retry-count ceiling: slow preprocessing
    /// keeps getting polled until the user walks away, and walking away
    /// disarms the timer.
    pub async fn watch(&mut self, gate: &mut Gate) -> Result<bool, GateError> {
        loop {
            self.load_once(gate).await?;
            if gate.state() != GateState::Pending {
                return Ok(true);
            }
            tokio::select! {
                _ = self.timer.fired() => {}
                _ = tokio::signal::ctrl_c() => {
                    self.timer.disarm();
                    return Ok(false);
                }
            }
        }
    }

}
