//! Experiment configuration: which workers run where.
//!
//! An [`Experiment`] is the full description of one driver invocation: the
//! worker mode, the regulation, a run identifier, and one [`SlotConfig`] per
//! parallel slot. Slots are drawn from equal-length parallel sequences of
//! team selections, ports and devices; every slot owns its port, device and
//! log file exclusively for the lifetime of the run.
//!
//! Construction goes through [`ExperimentBuilder`], which validates the
//! configuration up front: mismatched sequence lengths, duplicate ports and
//! duplicate devices are build errors, not runtime surprises on whichever
//! slot happened to lose the race.

use std::collections::HashSet;

use anyhow::bail;

use crate::worker::{LearningStyle, WorkerMode};

/// How a slot selects the teams its worker plays with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeamSelector {
    /// Play with the first `n` teams of the team pool (`--num_teams`).
    Count(u32),
    /// Play with explicitly chosen team indices from the pool (`--teams`),
    /// training only.
    Indices(Vec<u32>),
    /// Solve one explicit matchup between two full team specifications
    /// (plain-text team-description format), training only.
    Pair {
        /// Team specification for player 1.
        team1: String,
        /// Team specification for player 2.
        team2: String,
        /// Suffix distinguishing this matchup's output directory.
        results_suffix: String,
    },
}

/// One orchestrated (server, worker) pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotConfig {
    /// Position in the configuration sequences; stable for the run.
    pub index: usize,
    /// Team selection forwarded to the worker.
    pub teams: TeamSelector,
    /// Port the battle server binds and the worker connects to.
    pub port: u16,
    /// Accelerator device for the worker, e.g. `cuda:0`.
    pub device: String,
}

/// A validated driver configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Experiment {
    pub(crate) mode: WorkerMode,
    pub(crate) regulation: String,
    pub(crate) run_id: u32,
    pub(crate) slots: Vec<SlotConfig>,
}

impl Experiment {
    /// Start building an experiment for the given worker mode.
    #[must_use]
    pub fn builder(mode: WorkerMode) -> ExperimentBuilder {
        ExperimentBuilder {
            mode,
            regulation: "G".to_string(),
            run_id: 1,
            slots: vec![],
            parallel: None,
        }
    }

    /// The slots of this experiment, in launch order.
    pub fn slots(&self) -> &[SlotConfig] {
        &self.slots
    }

    /// The worker mode shared by all slots.
    pub fn mode(&self) -> &WorkerMode {
        &self.mode
    }

    /// The run identifier forwarded to training workers.
    pub fn run_id(&self) -> u32 {
        self.run_id
    }
}

/// Builder for [`Experiment`]. Slots can be added one by one or as parallel
/// sequences; [`build`](Self::build) validates the result.
#[derive(Debug)]
pub struct ExperimentBuilder {
    mode: WorkerMode,
    regulation: String,
    run_id: u32,
    slots: Vec<(TeamSelector, u16, String)>,
    parallel: Option<(Vec<u32>, Vec<u16>, Vec<String>)>,
}

impl ExperimentBuilder {
    /// Set the VGC regulation forwarded to workers (default `G`).
    #[must_use]
    pub fn with_regulation(mut self, value: impl Into<String>) -> Self {
        self.regulation = value.into();
        self
    }

    /// Set the run identifier, distinguishing output directories across
    /// repeated runs. Opaque to the harness, simply forwarded.
    #[must_use]
    pub fn with_run_id(mut self, value: u32) -> Self {
        self.run_id = value;
        self
    }

    /// Add one slot.
    #[must_use]
    pub fn add_slot(mut self, teams: TeamSelector, port: u16, device: impl Into<String>) -> Self {
        self.slots.push((teams, port, device.into()));
        self
    }

    /// Add slots from parallel sequences of team counts, ports and devices.
    ///
    /// The sequences must have equal lengths; [`build`](Self::build) fails
    /// otherwise.
    #[must_use]
    pub fn with_parallel(
        mut self,
        team_counts: &[u32],
        ports: &[u16],
        devices: &[&str],
    ) -> Self {
        self.parallel = Some((
            team_counts.to_vec(),
            ports.to_vec(),
            devices.iter().map(|d| d.to_string()).collect(),
        ));
        self
    }

    /// Validate and produce the [`Experiment`].
    ///
    /// # Errors
    ///
    /// - no slots, or parallel sequences of unequal length
    /// - a port or device used by more than one slot
    /// - a [`TeamSelector::Pair`] in evaluation mode, with an empty team, or
    ///   with an empty results suffix
    /// - mirror-match exclusion combined with exploiter training (the
    ///   exploiter trains on a single team)
    pub fn build(self) -> anyhow::Result<Experiment> {
        let mut slots = self.slots;
        if let Some((counts, ports, devices)) = self.parallel {
            if counts.len() != ports.len() || ports.len() != devices.len() {
                bail!(
                    "parallel sequences differ in length: {} team counts, {} ports, {} devices",
                    counts.len(),
                    ports.len(),
                    devices.len()
                );
            }
            for ((count, port), device) in counts.into_iter().zip(ports).zip(devices) {
                slots.push((TeamSelector::Count(count), port, device));
            }
        }
        if slots.is_empty() {
            bail!("experiment has no slots");
        }

        let mut seen_ports = HashSet::new();
        let mut seen_devices = HashSet::new();
        for (teams, port, device) in &slots {
            if !seen_ports.insert(*port) {
                bail!("port {port} is assigned to more than one slot");
            }
            if !seen_devices.insert(device.clone()) {
                bail!("device '{device}' is assigned to more than one slot");
            }
            match teams {
                TeamSelector::Count(_) => {}
                TeamSelector::Indices(indices) => {
                    if !self.mode.is_train() {
                        bail!("explicit team indices are only supported for training");
                    }
                    if indices.is_empty() {
                        bail!("team index list must not be empty");
                    }
                }
                TeamSelector::Pair {
                    team1,
                    team2,
                    results_suffix,
                } => {
                    if !self.mode.is_train() {
                        bail!("explicit team pairs are only supported for training");
                    }
                    if team1.is_empty() || team2.is_empty() {
                        bail!("both teams of a pair must be provided");
                    }
                    if results_suffix.is_empty() {
                        bail!("a results suffix is required when using an explicit team pair");
                    }
                }
            }
        }

        if let WorkerMode::Train(opts) = &self.mode {
            if opts.style == LearningStyle::Exploiter && !opts.allow_mirror_match {
                bail!("mirror-match exclusion is incompatible with exploiter training (exploiter uses a single team)");
            }
        }

        Ok(Experiment {
            mode: self.mode,
            regulation: self.regulation,
            run_id: self.run_id,
            slots: slots
                .into_iter()
                .enumerate()
                .map(|(index, (teams, port, device))| SlotConfig {
                    index,
                    teams,
                    port,
                    device,
                })
                .collect(),
        })
    }
}
