//! Battle server lifecycle.
//!
//! Each slot owns exactly one local Pokémon Showdown server, started as
//! `node pokemon-showdown start <port> --no-security` with both output
//! streams suppressed and the process detached into its own group. The
//! launcher does not verify the bind: a port collision or a crashed server
//! surfaces as a connection failure of the dependent worker, which is
//! cheaper and more robust than health-checking here.

use anyhow::Context;
use tracing::{info, instrument, warn};

use crate::configuration::Configuration;
use crate::process::{CommandSpec, ProcessHandle, ProcessManager};

/// Build the launch command for a server on `port`.
fn server_command(config: &Configuration, port: u16) -> CommandSpec {
    let mut spec = CommandSpec::new(&config.node)
        .arg(&config.server_script)
        .arg("start")
        .arg(port.to_string())
        .arg("--no-security")
        .detached();
    if let Some(dir) = &config.server_dir {
        spec = spec.current_dir(dir);
    }
    spec
}

/// A running battle server, owned by the slot that launched it.
///
/// The server is terminated exactly once: either explicitly through
/// [`terminate`](Self::terminate), or by the drop guard if the slot unwinds
/// first. Termination signals the server's whole process group, so helpers
/// it forked go down with it.
#[derive(Debug)]
pub(crate) struct BattleServer<H: ProcessHandle> {
    handle: H,
    port: u16,
    terminated: bool,
}

impl<H: ProcessHandle> BattleServer<H> {
    /// Start a server bound to `port`, detached, with output suppressed.
    #[instrument(skip(manager, config))]
    pub(crate) fn launch<M>(
        manager: &M,
        config: &Configuration,
        port: u16,
    ) -> anyhow::Result<BattleServer<H>>
    where
        M: ProcessManager<Handle = H>,
    {
        let spec = server_command(config, port);
        let handle = manager
            .launch(&spec)
            .with_context(|| format!("could not launch battle server on port {port}"))?;
        info!(port, pid = handle.id(), "battle server started");
        Ok(BattleServer {
            handle,
            port,
            terminated: false,
        })
    }

    /// Terminate the server and its process group, consuming the handle.
    pub(crate) fn terminate(mut self) -> anyhow::Result<()> {
        self.terminated = true;
        info!(port = self.port, pid = self.handle.id(), "terminating battle server");
        self.handle
            .terminate()
            .with_context(|| format!("could not terminate battle server on port {}", self.port))
    }
}

impl<H: ProcessHandle> Drop for BattleServer<H> {
    fn drop(&mut self) {
        if !self.terminated {
            warn!(port = self.port, "battle server still running on drop, terminating");
            if let Err(e) = self.handle.terminate() {
                warn!(port = self.port, "could not terminate battle server: {e:#}");
            }
        }
    }
}
