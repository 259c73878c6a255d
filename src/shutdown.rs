//! Group shutdown escalation.
//!
//! The coordinator waits for the event that ends the run, asks every process
//! to stop, gives them `timeout` to comply, and then kills them all:
//!
//! ```text
//! Running --trigger--> Interrupting --timeout | signal--> Killing --> Done
//! ```
//!
//! Every process is interrupted before any process is killed. A signal during
//! the grace period cuts it short; further signals have no extra effect.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::events::{Signal, Trigger};
use crate::process::ProcessHandle;

/// What ends a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitMode {
    /// The first process to exit, for any reason, ends the run.
    Primary,
    /// The run ends once every process succeeded, or as soon as one fails.
    JobRunner,
}

/// Escalation stage of the coordinator. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the event that ends the run.
    Running,
    /// Every process was interrupted; the grace period is running.
    Interrupting,
    /// Every process was told to die.
    Killing,
    /// All runners reported.
    Done,
}

/// Next termination request. A closed channel never yields one.
pub(crate) async fn next_signal(signals: &mut mpsc::Receiver<Signal>) -> Signal {
    match signals.recv().await {
        Some(signal) => signal,
        None => std::future::pending().await,
    }
}

/// Waits for the event that ends the running phase.
pub(crate) async fn wait_for_trigger(
    mode: ExitMode,
    total: usize,
    completions: &mut mpsc::Receiver<bool>,
    signals: &mut mpsc::Receiver<Signal>,
) -> Trigger {
    let mut succeeded = 0;
    loop {
        let completion = tokio::select! {
            biased;
            signal = next_signal(signals) => return Trigger::Signal(signal),
            completion = completions.recv() => completion,
        };
        let Some(ok) = completion else {
            return Trigger::RunnersGone;
        };
        match mode {
            ExitMode::Primary => return Trigger::ProcessExited { succeeded: ok },
            ExitMode::JobRunner if !ok => return Trigger::JobFailed,
            ExitMode::JobRunner => {
                succeeded += 1;
                if succeeded >= total {
                    return Trigger::AllJobsSucceeded;
                }
            }
        }
    }
}

pub(crate) struct Coordinator<P> {
    processes: Vec<Arc<P>>,
    mode: ExitMode,
    timeout: Duration,
    phase: Phase,
}

impl<P: ProcessHandle> Coordinator<P> {
    pub(crate) fn new(processes: Vec<Arc<P>>, mode: ExitMode, timeout: Duration) -> Self {
        Self {
            processes,
            mode,
            timeout,
            phase: Phase::Running,
        }
    }

    fn advance(&mut self, next: Phase) {
        debug!(from = ?self.phase, to = ?next, "shutdown phase");
        self.phase = next;
    }

    /// Drives the whole escalation. Returns once every runner has reported.
    pub(crate) async fn drive(
        mut self,
        mut completions: mpsc::Receiver<bool>,
        mut signals: mpsc::Receiver<Signal>,
    ) {
        let trigger = wait_for_trigger(
            self.mode,
            self.processes.len(),
            &mut completions,
            &mut signals,
        )
        .await;
        info!(?trigger, "stopping all processes");

        self.advance(Phase::Interrupting);
        for process in &self.processes {
            process.interrupt();
        }

        tokio::select! {
            biased;
            signal = next_signal(&mut signals) => {
                info!(%signal, "skipping the rest of the grace period");
            }
            _ = tokio::time::sleep(self.timeout) => {
                debug!(timeout = ?self.timeout, "grace period elapsed");
            }
        }

        self.advance(Phase::Killing);
        for process in &self.processes {
            process.kill();
        }

        while completions.recv().await.is_some() {}
        self.advance(Phase::Done);
    }
}
