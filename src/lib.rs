//! # Showdown Harness
//!
//! A modular Rust crate for orchestrating population-based reinforcement
//! learning runs against locally hosted Pokémon Showdown servers.
//!
//! It provides:
//! - Concurrent, staggered execution of independent training/evaluation
//!   slots, each owning its own server, port, device and log file
//!   (`Orchestrator`)
//! - Battle server lifecycle management with guaranteed teardown, including
//!   on interrupt
//! - Automatic relaunch of failed training slots from a fresh server
//! - A `ProcessManager` seam so the whole orchestration is testable without
//!   spawning real servers
//!
//! Each slot pairs one battle server with one worker process (the external
//! `train.py`/`eval.py` entry points). The harness observes nothing about a
//! worker but its exit status: zero is success, anything else is a failure
//! that is retried (training) or surfaced (evaluation). Worker output goes
//! to a per-port `debug<port>.log` file.
//!
//! # Documentation Overview
//!
//! - For the run lifecycle and report collection, see the [`orchestrator`]
//!   module.
//! - For configuring pacing, retry policy and program locations, see
//!   [`Configuration`](crate::configuration::Configuration).
//! - For describing what runs where, see [`Experiment`](crate::experiment::Experiment)
//!   and [`TeamSelector`](crate::experiment::TeamSelector).
//! - To substitute the process layer (e.g. in tests), implement
//!   [`ProcessManager`](crate::process::ProcessManager).
//!
//! # Usage Example
//!
//! ```no_run
//! use showdown_harness::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Configuration::new()
//!         .with_server_dir("pokemon-showdown")
//!         .with_max_retries(Some(10));
//!
//!     let options = TrainOptions::new(LearningStyle::SelfPlay)
//!         .with_behavior_clone(true)
//!         .with_mirror_match(false);
//!
//!     let experiment = Experiment::builder(WorkerMode::Train(options))
//!         .with_run_id(1)
//!         .with_parallel(
//!             &[1, 4, 16],
//!             &[7200, 7201, 7202],
//!             &["cuda:0", "cuda:1", "cuda:2"],
//!         )
//!         .build()?;
//!
//!     let orchestrator = Orchestrator::new(OsProcessManager::new(), config);
//!     let reports = orchestrator.run(experiment)?;
//!
//!     for report in &reports {
//!         println!("slot {} -> {:?}", report.index, report.outcome);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Interrupting a run
//!
//! SIGINT/SIGTERM raise a global, write-once cancellation: no slot retries
//! again, running workers are terminated, and every battle server receives
//! its termination signal before the run returns. Slot failures never
//! cascade: only the operator interrupt stops sibling slots.
#![warn(missing_docs)]

pub use anyhow;

pub mod configuration;
pub mod experiment;
pub mod interrupt;
mod logger;
pub mod orchestrator;
pub mod process;
mod server;
pub mod slot;
pub mod worker;

/// Commonly used types for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use showdown_harness::prelude::*;
/// ```
pub mod prelude {
    pub use crate::configuration::Configuration;
    pub use crate::experiment::{Experiment, ExperimentBuilder, SlotConfig, TeamSelector};
    pub use crate::interrupt::CancelToken;
    pub use crate::orchestrator::Orchestrator;
    pub use crate::process::{
        CommandSpec, ExitStatus, OsProcessManager, OutputMode, ProcessHandle, ProcessManager,
    };
    pub use crate::slot::{SlotOutcome, SlotReport};
    pub use crate::worker::{LearningStyle, TrainOptions, WorkerMode, WorkerOutcome};
}
