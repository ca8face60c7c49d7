//! Cooperative cancellation for the driver and its slots.
//!
//! A single [`CancelToken`] is shared by the driver and every slot it
//! launches. The token is write-once: it can only go from "running" to
//! "cancelled", and slots read it before every retry decision and while
//! waiting on a child process. [`install_signal_handler`] wires SIGINT and
//! SIGTERM to the token so an operator interrupt disables further retries
//! and lets each slot tear down its own server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

/// Shared cancellation flag, set at most once.
///
/// Cloning is cheap; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token in the "running" state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the token cancelled. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// True once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `total`, waking early on cancellation.
    ///
    /// Returns `false` if the token was cancelled before the full duration
    /// elapsed.
    pub(crate) fn sleep(&self, total: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(50);
        let deadline = std::time::Instant::now() + total;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return true;
            }
            std::thread::sleep(remaining.min(SLICE));
        }
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<AtomicBool> {
        Arc::downgrade(&self.flag)
    }
}

/// Set by the OS signal handler; bridged to the current token by a watcher
/// thread. Signal handlers may only touch static state.
static SIGNAL_SEEN: AtomicBool = AtomicBool::new(false);

/// Install SIGINT/SIGTERM handling that cancels `token`.
///
/// The handler itself only flips a static flag; a small watcher thread
/// forwards the flag to the token. The watcher holds a weak reference, so it
/// exits on its own once the run is over and the token is gone.
///
/// On non-unix platforms no handler is installed; the token still works when
/// cancelled programmatically.
pub fn install_signal_handler(token: &CancelToken) -> anyhow::Result<()> {
    SIGNAL_SEEN.store(false, Ordering::SeqCst);
    register_os_handler()?;

    let weak = token.downgrade();
    std::thread::Builder::new()
        .name("signal-watcher".to_string())
        .spawn(move || loop {
            if SIGNAL_SEEN.load(Ordering::SeqCst) {
                if let Some(flag) = weak.upgrade() {
                    info!("interrupt received, cancelling all slots");
                    flag.store(true, Ordering::SeqCst);
                }
                break;
            }
            if weak.upgrade().is_none() {
                // run finished, nothing left to cancel
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        })
        .map_err(|e| anyhow::anyhow!("could not spawn signal watcher thread: {e}"))?;
    Ok(())
}

#[cfg(unix)]
fn register_os_handler() -> anyhow::Result<()> {
    extern "C" fn on_signal(_signal: libc::c_int) {
        SIGNAL_SEEN.store(true, Ordering::SeqCst);
    }

    let handler = on_signal as extern "C" fn(libc::c_int);
    for signal in [libc::SIGINT, libc::SIGTERM] {
        let previous = unsafe { libc::signal(signal, handler as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            anyhow::bail!(
                "could not install handler for signal {signal}: {}",
                std::io::Error::last_os_error()
            );
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn register_os_handler() -> anyhow::Result<()> {
    tracing::warn!("signal handling is not supported on this platform; interrupts must be delivered through CancelToken");
    Ok(())
}

#[cfg(test)]
mod token_tests {
    use super::*;

    #[test]
    fn token_is_write_once() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn sleep_returns_early_when_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        let start = std::time::Instant::now();
        assert!(!token.sleep(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn sleep_completes_when_not_cancelled() {
        let token = CancelToken::new();
        assert!(token.sleep(Duration::from_millis(10)));
    }
}
