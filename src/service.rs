//! Background worker that runs relocation operations one at a time.
//!
//! The service owns the engine (and through it the privileged shell) inside a
//! single tokio task. Callers enqueue operations and either await the returned
//! [`OperationHandle`] or watch the event stream from [`RelocationService::subscribe`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use log::debug;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::engine::RelocationEngine;
use crate::error::{ErrorKind, RelocationError, RelocationResult};
use crate::gate::RootAccessGate;

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "operation", rename_all = "kebab-case")]
pub enum Operation {
    InstallSystemApp { overwrite: bool },
    UninstallSystemApp { keep_user_app: bool },
    UninstallUserApp,
    ClearAppData,
    Reboot { soft: bool },
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::InstallSystemApp { .. } => f.write_str("Install as system app"),
            Operation::UninstallSystemApp { .. } => f.write_str("Uninstall system app"),
            Operation::UninstallUserApp => f.write_str("Uninstall user app"),
            Operation::ClearAppData => f.write_str("Clear app data"),
            Operation::Reboot { soft: true } => f.write_str("Soft reboot"),
            Operation::Reboot { soft: false } => f.write_str("Reboot"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// An operation reached a terminal state.
    Finished {
        operation: Operation,
        result: RelocationResult,
    },
    /// A reboot could not be issued; the user has to reboot by hand.
    RebootFailed { message: String },
}

struct Job {
    operation: Operation,
    reply: Option<oneshot::Sender<RelocationResult>>,
}

/// Resolves to the terminal result of one queued operation.
pub struct OperationHandle {
    rx: oneshot::Receiver<RelocationResult>,
}

impl Future for OperationHandle {
    type Output = RelocationResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(RelocationError::new(
                    ErrorKind::IoFailure,
                    "The relocation worker stopped before finishing.",
                ))
            })
        })
    }
}

pub struct RelocationService {
    gate: RootAccessGate,
    jobs: mpsc::UnboundedSender<Job>,
    events: broadcast::Sender<ServiceEvent>,
    worker: JoinHandle<()>,
}

impl RelocationService {
    /// Start the worker. Must be called from within a tokio runtime.
    pub fn spawn(engine: RelocationEngine, gate: RootAccessGate) -> Self {
        let (jobs, job_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let worker = tokio::spawn(run_worker(engine, job_rx, events.clone()));
        Self {
            gate,
            jobs,
            events,
            worker,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    pub fn is_root_available(&self) -> bool {
        self.gate.is_available()
    }

    /// Answered directly, not queued behind running operations.
    pub async fn gain_root_access(&self) -> RelocationResult {
        self.gate.gain().await
    }

    pub fn install_as_system_app(&self, overwrite: bool) -> OperationHandle {
        self.submit(Operation::InstallSystemApp { overwrite })
    }

    pub fn uninstall_system_app(&self, keep_user_app: bool) -> OperationHandle {
        self.submit(Operation::UninstallSystemApp { keep_user_app })
    }

    pub fn uninstall_user_app(&self) -> OperationHandle {
        self.submit(Operation::UninstallUserApp)
    }

    pub fn clear_app_data(&self) -> OperationHandle {
        self.submit(Operation::ClearAppData)
    }

    /// Fire and forget; a failure shows up as [`ServiceEvent::RebootFailed`].
    pub fn reboot_device(&self, soft: bool) {
        self.enqueue(Job {
            operation: Operation::Reboot { soft },
            reply: None,
        });
    }

    /// Let queued work finish, then close the privileged session.
    pub async fn shutdown(self) {
        drop(self.jobs);
        if let Err(e) = self.worker.await {
            debug!("relocation worker ended abnormally: {}", e);
        }
    }

    fn submit(&self, operation: Operation) -> OperationHandle {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Job {
            operation,
            reply: Some(tx),
        });
        OperationHandle { rx }
    }

    fn enqueue(&self, job: Job) {
        debug!("queueing {:?}", job.operation);
        // A closed queue drops the reply sender, which the handle reports.
        let _ = self.jobs.send(job);
    }
}

async fn run_worker(
    mut engine: RelocationEngine,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    events: broadcast::Sender<ServiceEvent>,
) {
    while let Some(job) = jobs.recv().await {
        let operation = job.operation;
        debug!("running {:?}", operation);

        let result = match operation {
            Operation::InstallSystemApp { overwrite } => engine.install_to_protected(overwrite).await,
            Operation::UninstallSystemApp { keep_user_app } => {
                engine.uninstall_from_protected(keep_user_app).await
            }
            Operation::UninstallUserApp => engine.uninstall_user_copy().await,
            Operation::ClearAppData => engine.wipe_data().await,
            Operation::Reboot { soft } => engine.reboot(soft).await,
        };

        if let (Operation::Reboot { .. }, Err(e)) = (&operation, &result) {
            let _ = events.send(ServiceEvent::RebootFailed {
                message: e.message.clone(),
            });
        }
        let _ = events.send(ServiceEvent::Finished {
            operation,
            result: result.clone(),
        });
        if let Some(reply) = job.reply {
            let _ = reply.send(result);
        }
    }

    engine.shutdown().await;
}
