//! A scripted [`ProcessManager`] for orchestration tests.
//!
//! Servers are recognized by their detached spawn and never exit on their
//! own; workers run for a configurable time and exit with scripted codes,
//! keyed by the port in their command line. Every spawn and termination is
//! recorded so tests can assert the exact lifecycle.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use showdown_harness::anyhow;
use showdown_harness::prelude::*;

/// Console logger for debugging a test run; call at the top of the test.
pub fn init_debug_logger() {
    let format = tracing_subscriber::fmt::format()
        .without_time()
        .with_ansi(true)
        .with_level(true)
        .with_target(false);
    let subscriber = tracing_subscriber::fmt()
        .event_format(format)
        .with_max_level(tracing::Level::TRACE)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Spawned { id: u32, detached: bool, port: u16 },
    Terminated { id: u32 },
}

#[derive(Default)]
struct Inner {
    next_id: u32,
    events: Vec<Event>,
    specs: Vec<CommandSpec>,
    worker_codes: HashMap<u16, VecDeque<i32>>,
    worker_runtime: Duration,
}

/// Scripted stand-in for [`OsProcessManager`].
#[derive(Clone, Default)]
pub struct FakeProcessManager {
    inner: Arc<Mutex<Inner>>,
}

impl FakeProcessManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make workers take `runtime` before exiting (default: immediate).
    pub fn with_worker_runtime(self, runtime: Duration) -> Self {
        self.inner.lock().unwrap().worker_runtime = runtime;
        self
    }

    /// Exit codes for successive workers on `port`. Once the list is
    /// exhausted, further workers on that port exit 0.
    pub fn script_worker(&self, port: u16, codes: &[i32]) {
        self.inner
            .lock()
            .unwrap()
            .worker_codes
            .insert(port, codes.iter().copied().collect());
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        self.inner.lock().unwrap().specs.clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.lock().unwrap().events.clone()
    }

    /// Ids of all spawned servers (detached children), in spawn order.
    pub fn server_ids(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Spawned { id, detached: true, .. } => Some(id),
                _ => None,
            })
            .collect()
    }

    /// How many times `id` received a termination signal.
    pub fn terminations(&self, id: u32) -> usize {
        self.events()
            .into_iter()
            .filter(|e| *e == Event::Terminated { id })
            .count()
    }

    /// Recorded specs of worker (non-detached) spawns.
    pub fn worker_specs(&self) -> Vec<CommandSpec> {
        self.specs().into_iter().filter(|s| !s.detach).collect()
    }

    /// Recorded specs of server (detached) spawns.
    pub fn server_specs(&self) -> Vec<CommandSpec> {
        self.specs().into_iter().filter(|s| s.detach).collect()
    }
}

#[derive(Clone, Copy)]
enum Kind {
    Server,
    Worker { done_at: Instant, code: i32 },
}

pub struct FakeHandle {
    id: u32,
    kind: Kind,
    inner: Arc<Mutex<Inner>>,
}

impl ProcessHandle for FakeHandle {
    fn id(&self) -> u32 {
        self.id
    }

    fn poll(&mut self) -> anyhow::Result<Option<ExitStatus>> {
        match self.kind {
            Kind::Server => Ok(None),
            Kind::Worker { done_at, code } => {
                if Instant::now() >= done_at {
                    Ok(Some(ExitStatus::Exited(code)))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn terminate(&mut self) -> anyhow::Result<()> {
        self.inner
            .lock()
            .unwrap()
            .events
            .push(Event::Terminated { id: self.id });
        Ok(())
    }
}

fn port_of(spec: &CommandSpec) -> u16 {
    if spec.detach {
        // server command: the port is the only numeric argument
        spec.args
            .iter()
            .find_map(|a| a.parse().ok())
            .expect("server spec has no port argument")
    } else {
        let flag = spec
            .args
            .iter()
            .position(|a| a == "--port")
            .expect("worker spec has no --port flag");
        spec.args[flag + 1].parse().expect("invalid --port value")
    }
}

impl ProcessManager for FakeProcessManager {
    type Handle = FakeHandle;

    fn launch(&self, spec: &CommandSpec) -> anyhow::Result<FakeHandle> {
        let port = port_of(spec);
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.specs.push(spec.clone());
        inner.events.push(Event::Spawned {
            id,
            detached: spec.detach,
            port,
        });
        let kind = if spec.detach {
            Kind::Server
        } else {
            let code = inner
                .worker_codes
                .get_mut(&port)
                .and_then(|codes| codes.pop_front())
                .unwrap_or(0);
            Kind::Worker {
                done_at: Instant::now() + inner.worker_runtime,
                code,
            }
        };
        Ok(FakeHandle {
            id,
            kind,
            inner: Arc::clone(&self.inner),
        })
    }
}
