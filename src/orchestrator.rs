//! Top-level driver for running experiments.
//!
//! This module defines the [`Orchestrator`] type, which owns the whole run:
//!
//! - Launching one independent slot per configuration entry, staggered so
//!   the slots do not all load models and bind sockets at the same instant
//! - Wiring the operator interrupt to every slot's cancellation check
//! - Collecting a [`SlotReport`] per slot once all of them are terminal
//!
//! The driver deliberately does not fold slot failures into its own return
//! value: slots are independent experiments, and one slot failing says
//! nothing about its siblings. Callers inspect the reports (and the per-port
//! log files) to judge the run, the way the original runner left judgment to
//! whoever read the logs.
//!
//! # Example
//!
//! See the crate-level documentation.

use std::sync::{mpsc, Arc};

use tracing::{info, instrument, trace, warn};

use crate::configuration::Configuration;
use crate::experiment::Experiment;
use crate::interrupt::{self, CancelToken};
use crate::logger::init_logger;
use crate::process::ProcessManager;
use crate::slot::{run_slot, SlotOutcome, SlotReport};
use crate::worker;

/// The main type for orchestrating battle servers and workers.
///
/// Generic over the [`ProcessManager`] so the full slot lifecycle can be
/// tested against a fake manager; production use is
/// [`OsProcessManager`](crate::process::OsProcessManager).
pub struct Orchestrator<M: ProcessManager> {
    manager: Arc<M>,
    config: Configuration,
}

impl<M: ProcessManager + 'static> Orchestrator<M> {
    /// Create an [`Orchestrator`] with the given manager and [`Configuration`].
    #[instrument(skip_all)]
    pub fn new(manager: M, config: Configuration) -> Orchestrator<M> {
        if config.log {
            init_logger();
        }
        trace!(?config);
        Orchestrator {
            manager: Arc::new(manager),
            config,
        }
    }

    /// Run every slot of `experiment` to a terminal state.
    ///
    /// Installs a SIGINT/SIGTERM handler for the duration of the run; an
    /// interrupt cancels pending retries and unlaunched slots and tears down
    /// every slot's server. Use [`run_with_token`](Self::run_with_token) to
    /// keep signal handling in the caller's hands.
    ///
    /// # Errors
    /// Returns an error only when the run itself could not be carried out.
    /// Individual slot failures are reported in the returned
    /// [`SlotReport`]s, not as an error.
    pub fn run(&self, experiment: Experiment) -> anyhow::Result<Vec<SlotReport>> {
        let token = CancelToken::new();
        if let Err(e) = interrupt::install_signal_handler(&token) {
            // the run still works, it just cannot be interrupted cleanly
            warn!("could not install signal handler: {e:#}");
        }
        self.run_with_token(experiment, token)
    }

    /// Like [`run`](Self::run), but cancellation is controlled entirely by
    /// the caller through `token`; no signal handler is installed.
    #[instrument(skip_all, fields(slots = experiment.slots().len()))]
    pub fn run_with_token(
        &self,
        experiment: Experiment,
        token: CancelToken,
    ) -> anyhow::Result<Vec<SlotReport>> {
        preflight(experiment.slots().len());

        let experiment = Arc::new(experiment);
        let (tx_report, rx_report) = mpsc::channel();
        let mut launched = 0;

        for slot in experiment.slots() {
            if slot.index > 0 && !token.sleep(self.config.stagger) {
                break;
            }
            if token.is_cancelled() {
                break;
            }
            if self.config.verbose {
                println!(
                    "Starting slot {} (port {}, device {})...",
                    slot.index, slot.port, slot.device
                );
            }
            info!(slot = slot.index, port = slot.port, "launching slot");

            let manager = Arc::clone(&self.manager);
            let experiment = Arc::clone(&experiment);
            let config = self.config.clone();
            let token = token.clone();
            let tx_report = tx_report.clone();
            let index = slot.index;
            std::thread::spawn(move || {
                let slot = &experiment.slots()[index];
                let report = run_slot(manager.as_ref(), &config, &experiment, slot, &token);
                // the receiver is only gone if the driver thread panicked
                let _ = tx_report.send(report);
            });
            launched += 1;
        }
        drop(tx_report);

        let mut reports: Vec<SlotReport> = rx_report.iter().collect();

        // slots never launched because of an interrupt are terminal too
        for slot in experiment.slots().iter().skip(launched) {
            reports.push(SlotReport {
                index: slot.index,
                port: slot.port,
                attempts: 0,
                outcome: SlotOutcome::Interrupted,
                log_path: worker::log_path(&self.config, slot.port),
            });
        }
        reports.sort_by_key(|r| r.index);

        if self.config.verbose {
            print_reports(&reports);
        }
        info!(
            succeeded = reports.iter().filter(|r| r.outcome.is_success()).count(),
            total = reports.len(),
            "all slots terminal"
        );
        Ok(reports)
    }
}

/// Best-effort sanity check before committing the machine to a run. Only
/// warns: the operator may know better.
fn preflight(num_slots: usize) {
    let physical = num_cpus::get_physical();
    if num_slots > physical {
        warn!(
            num_slots,
            physical, "more slots than physical CPUs, workers will contend for cores"
        );
    }

    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    let available = sys.available_memory();
    // rough floor per worker: policy network + simulator clients
    const BYTES_PER_SLOT: u64 = 1_000_000_000;
    if available < num_slots as u64 * BYTES_PER_SLOT {
        warn!(
            available_mb = available / 1_000_000,
            num_slots, "low available memory for the configured slots"
        );
    }
}

fn print_reports(reports: &[SlotReport]) {
    const RED: &str = "\x1b[31m";
    const GREEN: &str = "\x1b[32m";
    const YELLOW: &str = "\x1b[33m";
    const RESET: &str = "\x1b[0m";

    for report in reports {
        let attempts = report.attempts;
        let port = report.port;
        match &report.outcome {
            SlotOutcome::Succeeded => println!(
                "{GREEN}slot {} (port {port}): succeeded after {attempts} attempt(s){RESET}",
                report.index
            ),
            SlotOutcome::Interrupted => println!(
                "{YELLOW}slot {} (port {port}): interrupted{RESET}",
                report.index
            ),
            SlotOutcome::WorkerFailed(status) => println!(
                "{RED}slot {} (port {port}): worker failed ({status}), see {}{RESET}",
                report.index,
                report.log_path.display()
            ),
            SlotOutcome::LaunchFailed(reason) => println!(
                "{RED}slot {} (port {port}): {reason}{RESET}",
                report.index
            ),
        }
    }
}
