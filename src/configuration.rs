//! Config for the harness behaviors
//!
//! This module provides configuration options for controlling how the driver
//! launches servers and workers: pacing (warm-up, staggering), retry policy,
//! program locations, and output.
//!
//! Configuration can be created programmatically using [`Configuration::new()`]
//! or by reading environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! The following environment variables can be used to override configuration
//! values. All values are optional. Boolean flags are case-insensitive and
//! enabled with `"true"`.
//!
//! - `HARNESS_VERBOSE` — Print slot progress to stdout (default: `true`)
//! - `HARNESS_LOG` — Enable logging to a file (default: `false`)
//! - `HARNESS_WARM_UP_SECS` — Server warm-up pause in seconds (default: `5`)
//! - `HARNESS_STAGGER_SECS` — Delay between slot launches in seconds (default: `15`)
//! - `HARNESS_MAX_RETRIES` — Maximum training retries per slot (default: unbounded)
//! - `HARNESS_NODE` — Node.js binary used to start the battle server (default: `node`)
//! - `HARNESS_PYTHON` — Python binary used to run workers (default: `python`)
//! - `HARNESS_LOG_DIR` — Directory for per-port `debug<port>.log` files (default: `.`)

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for harness behaviors.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub(crate) verbose: bool,
    pub(crate) log: bool,
    pub(crate) warm_up: Duration,
    pub(crate) stagger: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) max_retries: Option<u32>,
    pub(crate) retry_delay: Duration,
    pub(crate) node: String,
    pub(crate) server_script: String,
    pub(crate) server_dir: Option<PathBuf>,
    pub(crate) python: String,
    pub(crate) train_script: String,
    pub(crate) eval_script: String,
    pub(crate) worker_dir: Option<PathBuf>,
    pub(crate) log_dir: PathBuf,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - Slot progress is printed to stdout.
    /// - Logging to file is disabled.
    /// - Servers get a 5 second warm-up pause before their worker connects.
    /// - Consecutive slot launches are staggered by 15 seconds.
    /// - Failed training workers are retried without bound until interrupted.
    ///   This mirrors the original runner: a failed training run is assumed
    ///   to be a transient server or worker fault, so the slot is relaunched
    ///   from a fresh server rather than health-checked. Use
    ///   [`with_max_retries`](Self::with_max_retries) to bound it.
    /// - The server is `node pokemon-showdown start <port> --no-security`.
    /// - Workers are `python train.py ...` / `python eval.py ...`.
    pub fn new() -> Self {
        Self {
            verbose: true,
            log: false,
            warm_up: Duration::from_secs(5),
            stagger: Duration::from_secs(15),
            poll_interval: Duration::from_millis(250),
            max_retries: None,
            retry_delay: Duration::ZERO,
            node: "node".to_string(),
            server_script: "pokemon-showdown".to_string(),
            server_dir: None,
            python: "python".to_string(),
            train_script: "train.py".to_string(),
            eval_script: "eval.py".to_string(),
            worker_dir: None,
            log_dir: PathBuf::from("."),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// See the module documentation for the recognized variables. Any other
    /// value (including unset) falls back to the default for that field.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn get_env_secs(var: &str) -> Option<Duration> {
            std::env::var(var)
                .ok()?
                .parse::<u64>()
                .ok()
                .map(Duration::from_secs)
        }

        let defaults = Self::new();
        Self {
            verbose: get_env_flag("HARNESS_VERBOSE", true),
            log: get_env_flag("HARNESS_LOG", false),
            warm_up: get_env_secs("HARNESS_WARM_UP_SECS").unwrap_or(defaults.warm_up),
            stagger: get_env_secs("HARNESS_STAGGER_SECS").unwrap_or(defaults.stagger),
            max_retries: std::env::var("HARNESS_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok()),
            node: std::env::var("HARNESS_NODE").unwrap_or(defaults.node.clone()),
            python: std::env::var("HARNESS_PYTHON").unwrap_or(defaults.python.clone()),
            log_dir: std::env::var("HARNESS_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir.clone()),
            ..defaults
        }
    }

    /// Enable or disable slot progress output on stdout.
    #[must_use]
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    #[must_use]
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Set the pause between starting a server and starting its worker,
    /// absorbing server initialization latency.
    #[must_use]
    pub fn with_warm_up(mut self, value: Duration) -> Self {
        self.warm_up = value;
        self
    }

    /// Set the delay between consecutive slot launches.
    ///
    /// Launching every slot at once makes all workers load models and all
    /// servers bind sockets simultaneously; spacing the launches avoids that
    /// contention.
    #[must_use]
    pub fn with_stagger(mut self, value: Duration) -> Self {
        self.stagger = value;
        self
    }

    /// Set the polling interval used while waiting on child processes.
    #[must_use]
    pub fn with_poll_interval(mut self, value: Duration) -> Self {
        self.poll_interval = value;
        self
    }

    /// Bound the number of training retries per slot.
    ///
    /// `None` (the default) retries forever until interrupted, matching the
    /// original runner. Evaluation workers are never retried regardless of
    /// this setting.
    #[must_use]
    pub fn with_max_retries(mut self, value: Option<u32>) -> Self {
        self.max_retries = value;
        self
    }

    /// Set a delay between a training failure and the relaunch of its slot.
    #[must_use]
    pub fn with_retry_delay(mut self, value: Duration) -> Self {
        self.retry_delay = value;
        self
    }

    /// Set the Node.js binary used to start the battle server.
    #[must_use]
    pub fn with_node(mut self, value: impl Into<String>) -> Self {
        self.node = value.into();
        self
    }

    /// Set the battle server entry script (default `pokemon-showdown`).
    #[must_use]
    pub fn with_server_script(mut self, value: impl Into<String>) -> Self {
        self.server_script = value.into();
        self
    }

    /// Set the directory the battle server is started from (the
    /// `pokemon-showdown` checkout).
    #[must_use]
    pub fn with_server_dir(mut self, value: impl Into<PathBuf>) -> Self {
        self.server_dir = Some(value.into());
        self
    }

    /// Set the Python binary used to run workers.
    #[must_use]
    pub fn with_python(mut self, value: impl Into<String>) -> Self {
        self.python = value.into();
        self
    }

    /// Set the training entry script (default `train.py`).
    #[must_use]
    pub fn with_train_script(mut self, value: impl Into<String>) -> Self {
        self.train_script = value.into();
        self
    }

    /// Set the evaluation entry script (default `eval.py`).
    #[must_use]
    pub fn with_eval_script(mut self, value: impl Into<String>) -> Self {
        self.eval_script = value.into();
        self
    }

    /// Set the directory workers are started from.
    #[must_use]
    pub fn with_worker_dir(mut self, value: impl Into<PathBuf>) -> Self {
        self.worker_dir = Some(value.into());
        self
    }

    /// Set the directory that per-port `debug<port>.log` files are written
    /// to.
    #[must_use]
    pub fn with_log_dir(mut self, value: impl Into<PathBuf>) -> Self {
        self.log_dir = value.into();
        self
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod configuration_tests {
    use super::*;

    #[test]
    fn defaults_match_original_runner() {
        let config = Configuration::new();
        assert!(config.verbose);
        assert!(!config.log);
        assert_eq!(config.warm_up, Duration::from_secs(5));
        assert_eq!(config.max_retries, None);
        assert_eq!(config.node, "node");
        assert_eq!(config.python, "python");
    }

    #[test]
    fn builders_chain() {
        let config = Configuration::new()
            .with_verbose(false)
            .with_warm_up(Duration::ZERO)
            .with_max_retries(Some(3))
            .with_server_dir("/opt/pokemon-showdown")
            .with_log_dir("/tmp/logs");
        assert!(!config.verbose);
        assert_eq!(config.warm_up, Duration::ZERO);
        assert_eq!(config.max_retries, Some(3));
        assert_eq!(
            config.server_dir.as_deref(),
            Some(std::path::Path::new("/opt/pokemon-showdown"))
        );
        assert_eq!(config.log_dir, PathBuf::from("/tmp/logs"));
    }
}
