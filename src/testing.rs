//! Scripted stand-ins for managed processes.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::process::ProcessHandle;

/// Exit code of a fake that was killed.
pub(crate) const KILLED_CODE: i32 = 137;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Interrupt,
    Kill,
    Exit(i32),
}

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub name: String,
    pub action: Action,
    pub at: Instant,
}

/// Shared, time-stamped record of everything the fakes saw.
#[derive(Default)]
pub(crate) struct Journal(Mutex<Vec<Entry>>);

impl Journal {
    fn record(&self, name: &str, action: Action) {
        self.0.lock().unwrap().push(Entry {
            name: name.to_string(),
            action,
            at: Instant::now(),
        });
    }

    pub(crate) fn entries(&self) -> Vec<Entry> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn of(&self, action: Action) -> Vec<Entry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.action == action)
            .collect()
    }
}

pub(crate) struct FakeProcess {
    name: String,
    // Exits on its own after the delay with the code.
    lifetime: Option<(Duration, i32)>,
    honors_interrupt: bool,
    journal: Arc<Journal>,
    interrupted: Notify,
    killed: Notify,
    runs: AtomicUsize,
    exit_code: Mutex<Option<i32>>,
}

impl FakeProcess {
    fn new(
        name: &str,
        lifetime: Option<(Duration, i32)>,
        honors_interrupt: bool,
        journal: &Arc<Journal>,
    ) -> Self {
        Self {
            name: name.to_string(),
            lifetime,
            honors_interrupt,
            journal: Arc::clone(journal),
            interrupted: Notify::new(),
            killed: Notify::new(),
            runs: AtomicUsize::new(0),
            exit_code: Mutex::new(None),
        }
    }

    /// Exits by itself after `after` with `code`; stops cleanly when interrupted.
    pub(crate) fn exits(name: &str, after: Duration, code: i32, journal: &Arc<Journal>) -> Self {
        Self::new(name, Some((after, code)), true, journal)
    }

    /// Runs until interrupted, then exits 0.
    pub(crate) fn server(name: &str, journal: &Arc<Journal>) -> Self {
        Self::new(name, None, true, journal)
    }

    /// Ignores interrupts and only dies when killed.
    pub(crate) fn stubborn(name: &str, journal: &Arc<Journal>) -> Self {
        Self::new(name, None, false, journal)
    }

    pub(crate) fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    async fn lifetime(&self) -> i32 {
        match self.lifetime {
            Some((after, code)) => {
                tokio::time::sleep(after).await;
                code
            }
            None => std::future::pending().await,
        }
    }

    async fn run_scripted(&self) -> bool {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let code = tokio::select! {
            code = self.lifetime() => code,
            _ = self.interrupted.notified(), if self.honors_interrupt => 0,
            _ = self.killed.notified() => KILLED_CODE,
        };
        *self.exit_code.lock().unwrap() = Some(code);
        self.journal.record(&self.name, Action::Exit(code));
        code == 0
    }
}

impl ProcessHandle for FakeProcess {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> impl Future<Output = bool> + Send {
        self.run_scripted()
    }

    fn interrupt(&self) {
        self.journal.record(&self.name, Action::Interrupt);
        self.interrupted.notify_one();
    }

    fn kill(&self) {
        self.journal.record(&self.name, Action::Kill);
        self.killed.notify_one();
    }

    fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock().unwrap()
    }
}
