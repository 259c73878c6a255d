//! Control inputs that drive the shutdown coordinator.

use std::fmt;

/// An external termination request received by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
    Hangup,
}

impl Signal {
    pub fn label(self) -> &'static str {
        match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::Hangup => "SIGHUP",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why the coordinator left the running phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A process finished while running as the primary process group.
    ProcessExited { succeeded: bool },
    /// Every job finished successfully.
    AllJobsSucceeded,
    /// A job failed, ending the run early.
    JobFailed,
    /// An external termination request arrived.
    Signal(Signal),
    /// Every runner finished without a trigger being observed.
    RunnersGone,
}
