//! Building the process set and running it to completion.
//!
//! The [`Supervisor`] launches every process on its own task. Each task posts
//! exactly one completion onto a bounded channel once its process has fully
//! stopped; the shutdown coordinator consumes that channel. When every task
//! has finished, the exit status of the whole run is aggregated.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::ConfigError;
use crate::events::Signal;
use crate::output::{color_for, OutputOptions, OutputSink};
use crate::process::{ManagedProcess, ProcessDefinition, ProcessHandle};
use crate::shutdown::{Coordinator, ExitMode};

/// A definition chosen to run, with the color of its Procfile position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedProcess {
    pub definition: ProcessDefinition,
    pub color: u8,
}

/// Splits a comma-separated allow-list, dropping blanks.
pub fn parse_filter(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Keeps the definitions named in `filter` (all of them when it is empty).
///
/// Colors come from the position in the full list, so a process looks the
/// same whichever subset is running.
pub fn select_processes(
    definitions: Vec<ProcessDefinition>,
    filter: &[String],
) -> Result<Vec<SelectedProcess>, ConfigError> {
    for name in filter {
        if !definitions.iter().any(|definition| &definition.name == name) {
            warn!(process = %name, "filter names a process that is not defined");
        }
    }

    let selected: Vec<SelectedProcess> = definitions
        .into_iter()
        .enumerate()
        .filter(|(_, definition)| filter.is_empty() || filter.contains(&definition.name))
        .map(|(idx, definition)| SelectedProcess {
            definition,
            color: color_for(idx),
        })
        .collect();

    if selected.is_empty() {
        return Err(ConfigError::NoProcessesSelected {
            filter: filter.join(","),
        });
    }
    Ok(selected)
}

/// Creates the shared output sink and one managed process per selection.
pub fn build_process_set(
    selected: Vec<SelectedProcess>,
    root: &Path,
    options: OutputOptions,
) -> (Arc<OutputSink>, Vec<ManagedProcess>) {
    let name_width = selected
        .iter()
        .map(|process| process.definition.name.len())
        .max()
        .unwrap_or(0);
    let output = Arc::new(OutputSink::stdout(options, name_width));
    let processes = selected
        .into_iter()
        .map(|process| {
            ManagedProcess::new(
                process.definition,
                process.color,
                root.to_path_buf(),
                Arc::clone(&output),
            )
        })
        .collect();
    (output, processes)
}

/// Highest exit code in the group; processes without one count as 0.
pub fn aggregate_exit_code<I>(codes: I) -> i32
where
    I: IntoIterator<Item = Option<i32>>,
{
    codes
        .into_iter()
        .map(|code| code.unwrap_or(0))
        .fold(0, i32::max)
}

// Posts the completion when dropped, so a panicking runner still reports.
struct Completion {
    tx: mpsc::Sender<bool>,
    succeeded: bool,
}

impl Drop for Completion {
    fn drop(&mut self) {
        // Capacity equals the process count: this never finds the channel full.
        let _ = self.tx.try_send(self.succeeded);
    }
}

/// Runs a fixed set of processes and stops them as one group.
///
/// `mode` decides what ends the run; `timeout` is the grace period between
/// interrupting and killing.
pub struct Supervisor<P> {
    processes: Vec<Arc<P>>,
    mode: ExitMode,
    timeout: Duration,
}

impl<P: ProcessHandle + 'static> Supervisor<P> {
    pub fn new(processes: Vec<P>, mode: ExitMode, timeout: Duration) -> Self {
        Self {
            processes: processes.into_iter().map(Arc::new).collect(),
            mode,
            timeout,
        }
    }

    /// Runs every process and returns the aggregated exit status.
    ///
    /// `signals` carries external termination requests. Returns only after
    /// every process has stopped.
    pub async fn run(self, signals: mpsc::Receiver<Signal>) -> i32 {
        let (done_tx, done_rx) = mpsc::channel(self.processes.len().max(1));
        info!(processes = self.processes.len(), mode = ?self.mode, "starting processes");

        let mut runners = JoinSet::new();
        for process in &self.processes {
            let process = Arc::clone(process);
            let mut completion = Completion {
                tx: done_tx.clone(),
                succeeded: false,
            };
            runners.spawn(async move {
                completion.succeeded = process.run().await;
                debug!(process = %process.name(), succeeded = completion.succeeded, "process finished");
            });
        }
        drop(done_tx);

        let coordinator = Coordinator::new(self.processes.clone(), self.mode, self.timeout);
        let coordinator = tokio::spawn(coordinator.drive(done_rx, signals));

        while let Some(joined) = runners.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "process runner crashed");
            }
        }
        coordinator.abort();
        let _ = coordinator.await;

        let code = aggregate_exit_code(self.processes.iter().map(|process| process.exit_code()));
        info!(code, "all processes stopped");
        code
    }
}
