//! Per-slot orchestration.
//!
//! A slot runs the sequence: start server, wait out the warm-up, run the
//! worker, terminate the server. For training workers a nonzero exit
//! relaunches the whole sequence with a fresh server: a crashed worker
//! cannot be cheaply distinguished from a wedged server, so the slot assumes
//! corrupted state and starts over instead of reconnecting. Evaluation
//! workers are never retried. The shared [`CancelToken`] is checked at every
//! decision point, so an interrupt always wins over a pending retry.

use std::path::PathBuf;

use tracing::{info, instrument, warn};

use crate::configuration::Configuration;
use crate::experiment::{Experiment, SlotConfig};
use crate::interrupt::CancelToken;
use crate::process::{ExitStatus, ProcessManager};
use crate::server::BattleServer;
use crate::worker::{self, WorkerOutcome};

/// Terminal state of one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOutcome {
    /// The worker exited with status zero.
    Succeeded,
    /// The run was interrupted before the worker could succeed.
    Interrupted,
    /// The worker failed and was not (or no longer) eligible for retry.
    WorkerFailed(ExitStatus),
    /// The server or worker process could not be launched at all.
    LaunchFailed(String),
}

impl SlotOutcome {
    /// True only for [`SlotOutcome::Succeeded`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        *self == SlotOutcome::Succeeded
    }
}

/// Report produced when a slot reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotReport {
    /// Index of the slot in the experiment configuration.
    pub index: usize,
    /// The slot's server/worker port.
    pub port: u16,
    /// Number of worker invocations performed (0 if interrupted before the
    /// first one).
    pub attempts: u32,
    /// How the slot ended.
    pub outcome: SlotOutcome,
    /// Where the worker's output went.
    pub log_path: PathBuf,
}

/// Drive one slot to a terminal state. Runs on the slot's own thread and
/// only ever touches state owned by this slot, plus the shared token.
#[instrument(skip_all, fields(slot = slot.index, port = slot.port))]
pub(crate) fn run_slot<M: ProcessManager>(
    manager: &M,
    config: &Configuration,
    experiment: &Experiment,
    slot: &SlotConfig,
    token: &CancelToken,
) -> SlotReport {
    let log_path = worker::log_path(config, slot.port);
    let mut attempts = 0u32;

    let outcome = loop {
        if token.is_cancelled() {
            break SlotOutcome::Interrupted;
        }

        let server = match BattleServer::launch(manager, config, slot.port) {
            Ok(server) => server,
            Err(e) => break SlotOutcome::LaunchFailed(format!("{e:#}")),
        };

        // let the server finish binding before the worker connects
        if !token.sleep(config.warm_up) {
            terminate_server(server, slot.port);
            break SlotOutcome::Interrupted;
        }

        attempts += 1;
        let outcome = match worker::run_worker(manager, config, experiment, slot, token) {
            Ok(outcome) => outcome,
            Err(e) => {
                terminate_server(server, slot.port);
                break SlotOutcome::LaunchFailed(format!("{e:#}"));
            }
        };

        // the server is relaunched from scratch on retry, so it goes down
        // after every attempt, successful or not
        terminate_server(server, slot.port);

        let Some(WorkerOutcome { status, .. }) = outcome else {
            break SlotOutcome::Interrupted;
        };
        if status.success() {
            break SlotOutcome::Succeeded;
        }
        if !experiment.mode.is_train() {
            break SlotOutcome::WorkerFailed(status);
        }
        if token.is_cancelled() {
            break SlotOutcome::Interrupted;
        }
        if let Some(max) = config.max_retries {
            if attempts > max {
                warn!(attempts, "retry budget exhausted, giving up");
                break SlotOutcome::WorkerFailed(status);
            }
        }
        info!(%status, attempts, "training worker failed, relaunching slot with a fresh server");
        if !token.sleep(config.retry_delay) {
            break SlotOutcome::Interrupted;
        }
    };

    info!(?outcome, attempts, "slot finished");
    SlotReport {
        index: slot.index,
        port: slot.port,
        attempts,
        outcome,
        log_path,
    }
}

fn terminate_server<H: crate::process::ProcessHandle>(server: BattleServer<H>, port: u16) {
    if let Err(e) = server.terminate() {
        // not fatal for the slot: the worker result still stands
        warn!(port, "server termination failed: {e:#}");
    }
}
