//! Worker invocation.
//!
//! A worker is the external training or evaluation process (`train.py` /
//! `eval.py`). This module owns the worker side of the external contract:
//! the exact command line for a slot, the per-port log file, and the
//! cancellable wait for the worker's exit status. The exit status is the
//! only success/failure signal the harness consumes; nothing structured is
//! parsed out of the log.

use std::path::PathBuf;

use anyhow::Context;
use tracing::{info, instrument};

use crate::configuration::Configuration;
use crate::experiment::{Experiment, SlotConfig, TeamSelector};
use crate::interrupt::CancelToken;
use crate::process::{CommandSpec, ExitStatus, ProcessHandle, ProcessManager, Wait};

/// Training paradigm for the learning worker. Exactly one is passed to
/// `train.py`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearningStyle {
    /// Both sides controlled by the same learning policy.
    SelfPlay,
    /// Opponent drawn from past saved policies.
    FictitiousPlay,
    /// Opponent drawn from past policies weighted by a Nash equilibrium.
    DoubleOracle,
    /// Train against one fixed policy placed in the save folder beforehand.
    Exploiter,
}

impl LearningStyle {
    pub(crate) fn flag(self) -> &'static str {
        match self {
            LearningStyle::SelfPlay => "--self_play",
            LearningStyle::FictitiousPlay => "--fictitious_play",
            LearningStyle::DoubleOracle => "--double_oracle",
            LearningStyle::Exploiter => "--exploiter",
        }
    }
}

/// Options forwarded to a training worker.
///
/// Defaults match the `train.py` defaults, so an unmodified
/// `TrainOptions::new(style)` produces the same run the script would do on
/// its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainOptions {
    pub(crate) style: LearningStyle,
    pub(crate) behavior_clone: bool,
    pub(crate) allow_mirror_match: bool,
    pub(crate) chooses_on_teampreview: bool,
    pub(crate) num_frames: u32,
    pub(crate) num_envs: u32,
    pub(crate) num_eval_workers: u32,
    pub(crate) log_level: u32,
}

impl TrainOptions {
    /// Training options for the given learning style, everything else at the
    /// worker's defaults.
    #[must_use]
    pub fn new(style: LearningStyle) -> Self {
        Self {
            style,
            behavior_clone: false,
            allow_mirror_match: true,
            chooses_on_teampreview: true,
            num_frames: 1,
            num_envs: 1,
            num_eval_workers: 1,
            log_level: 25,
        }
    }

    /// Warm-start from the behavior-cloned checkpoint.
    #[must_use]
    pub fn with_behavior_clone(mut self, value: bool) -> Self {
        self.behavior_clone = value;
        self
    }

    /// Allow or exclude same-team matchups. Exclusion requires more than one
    /// team and is incompatible with [`LearningStyle::Exploiter`].
    #[must_use]
    pub fn with_mirror_match(mut self, value: bool) -> Self {
        self.allow_mirror_match = value;
        self
    }

    /// Let the policy make teampreview decisions (otherwise teampreview is
    /// random and games effectively start after it).
    #[must_use]
    pub fn with_teampreview(mut self, value: bool) -> Self {
        self.chooses_on_teampreview = value;
        self
    }

    /// Number of frames for frame stacking (1 = no stacking).
    #[must_use]
    pub fn with_num_frames(mut self, value: u32) -> Self {
        self.num_frames = value;
        self
    }

    /// Number of parallel environments inside the worker.
    #[must_use]
    pub fn with_num_envs(mut self, value: u32) -> Self {
        self.num_envs = value;
        self
    }

    /// Number of evaluation workers inside the worker.
    #[must_use]
    pub fn with_num_eval_workers(mut self, value: u32) -> Self {
        self.num_eval_workers = value;
        self
    }

    /// Log level forwarded to the worker's battle clients.
    #[must_use]
    pub fn with_log_level(mut self, value: u32) -> Self {
        self.log_level = value;
        self
    }
}

/// Which entry point a slot's worker runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMode {
    /// Reinforcement-learning training (`train.py`), retried on failure.
    Train(TrainOptions),
    /// Cross-play evaluation (`eval.py`), never retried.
    Eval,
}

impl WorkerMode {
    pub(crate) fn is_train(&self) -> bool {
        matches!(self, WorkerMode::Train(_))
    }
}

/// What a single worker invocation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOutcome {
    /// The worker's exit status. Zero means success.
    pub status: ExitStatus,
    /// The log file holding the worker's combined stdout/stderr.
    pub log_path: PathBuf,
}

/// The log file for a worker on `port`: `<log_dir>/debug<port>.log`.
///
/// Ports are unique across slots, so no slot ever overwrites another slot's
/// log.
#[must_use]
pub fn log_path(config: &Configuration, port: u16) -> PathBuf {
    config.log_dir.join(format!("debug{port}.log"))
}

/// Build the command line for `slot`'s worker.
pub(crate) fn worker_command(
    config: &Configuration,
    experiment: &Experiment,
    slot: &SlotConfig,
) -> CommandSpec {
    let mut spec = CommandSpec::new(&config.python);
    match &experiment.mode {
        WorkerMode::Train(opts) => {
            spec = spec
                .arg(&config.train_script)
                .arg("--reg")
                .arg(&experiment.regulation)
                .arg("--run_id")
                .arg(experiment.run_id.to_string());
            spec = team_args(spec, &slot.teams);
            spec = spec
                .arg("--port")
                .arg(slot.port.to_string())
                .arg("--device")
                .arg(&slot.device)
                .arg("--num_envs")
                .arg(opts.num_envs.to_string())
                .arg("--num_eval_workers")
                .arg(opts.num_eval_workers.to_string())
                .arg("--log_level")
                .arg(opts.log_level.to_string())
                .arg(opts.style.flag());
            if opts.behavior_clone {
                spec = spec.arg("--behavior_clone");
            }
            if !opts.allow_mirror_match {
                spec = spec.arg("--no_mirror_match");
            }
            if !opts.chooses_on_teampreview {
                spec = spec.arg("--no_teampreview");
            }
            if opts.num_frames > 1 {
                spec = spec.arg("--num_frames").arg(opts.num_frames.to_string());
            }
        }
        WorkerMode::Eval => {
            spec = spec
                .arg(&config.eval_script)
                .arg("--reg")
                .arg(&experiment.regulation);
            spec = team_args(spec, &slot.teams);
            spec = spec
                .arg("--port")
                .arg(slot.port.to_string())
                .arg("--device")
                .arg(&slot.device);
        }
    }
    if let Some(dir) = &config.worker_dir {
        spec = spec.current_dir(dir);
    }
    spec.log_to(log_path(config, slot.port))
}

fn team_args(spec: CommandSpec, teams: &TeamSelector) -> CommandSpec {
    match teams {
        TeamSelector::Count(n) => spec.arg("--num_teams").arg(n.to_string()),
        TeamSelector::Indices(indices) => indices
            .iter()
            .fold(spec.arg("--teams"), |spec, i| spec.arg(i.to_string())),
        TeamSelector::Pair {
            team1,
            team2,
            results_suffix,
        } => spec
            .arg("--team1")
            .arg(team1)
            .arg("--team2")
            .arg(team2)
            .arg("--results_suffix")
            .arg(results_suffix),
    }
}

/// Run `slot`'s worker to completion (or cancellation).
///
/// Blocks the calling slot thread. On cancellation the worker is terminated
/// before returning.
#[instrument(skip_all, fields(port = slot.port))]
pub(crate) fn run_worker<M: ProcessManager>(
    manager: &M,
    config: &Configuration,
    experiment: &Experiment,
    slot: &SlotConfig,
    token: &CancelToken,
) -> anyhow::Result<Option<WorkerOutcome>> {
    let spec = worker_command(config, experiment, slot);
    let log = log_path(config, slot.port);
    info!(program = %spec.program, args = ?spec.args, "starting worker");

    let mut handle = manager
        .launch(&spec)
        .context("could not launch worker process")?;

    match crate::process::wait_or_cancel(&mut handle, token, config.poll_interval)? {
        Wait::Exited(status) => {
            info!(%status, "worker finished");
            Ok(Some(WorkerOutcome {
                status,
                log_path: log,
            }))
        }
        Wait::Cancelled => {
            info!("interrupted, terminating worker");
            handle
                .terminate()
                .context("could not terminate worker after interrupt")?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod worker_tests {
    use super::*;

    #[test]
    fn log_path_is_derived_from_port() {
        let config = Configuration::new().with_log_dir("/var/log/harness");
        assert_eq!(
            log_path(&config, 7200),
            PathBuf::from("/var/log/harness/debug7200.log")
        );
    }

    #[test]
    fn one_flag_per_learning_style() {
        let styles = [
            LearningStyle::SelfPlay,
            LearningStyle::FictitiousPlay,
            LearningStyle::DoubleOracle,
            LearningStyle::Exploiter,
        ];
        let flags: std::collections::HashSet<_> =
            styles.iter().map(|s| s.flag()).collect();
        assert_eq!(flags.len(), styles.len());
    }
}
