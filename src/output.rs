//! Merged, labeled output for all managed processes.
//!
//! Every line a child prints ends up here, tagged with the process name in
//! the process's color. Writers from different processes share one lock so
//! lines never interleave mid-way.

use std::io::Write;
use std::sync::Mutex;
use std::time::Instant;

/// 256-color terminal palette cycled through by process position.
pub const PALETTE: [u8; 10] = [2, 3, 4, 5, 6, 42, 130, 103, 129, 108];

/// Color for the process at `index` in the unfiltered Procfile.
pub fn color_for(index: usize) -> u8 {
    PALETTE[index % PALETTE.len()]
}

/// Rendering switches for the merged stream.
#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    /// Print the colored `name |` column.
    pub print_name: bool,
    /// Print elapsed time before each line.
    pub print_timestamp: bool,
}

pub struct OutputSink {
    options: OutputOptions,
    name_width: usize,
    start: Instant,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl OutputSink {
    /// Creates a sink writing to standard output.
    pub fn stdout(options: OutputOptions, name_width: usize) -> Self {
        Self::with_writer(options, name_width, Box::new(std::io::stdout()))
    }

    pub fn with_writer(
        options: OutputOptions,
        name_width: usize,
        writer: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            options,
            name_width,
            start: Instant::now(),
            writer: Mutex::new(writer),
        }
    }

    /// Writes one line of child output.
    pub fn write_line(&self, name: &str, color: u8, line: &str) {
        let rendered = format!("{}{}", self.prefix(name, color), line);
        self.emit(&rendered);
    }

    /// Writes a supervisor status message in bold.
    pub fn write_status(&self, name: &str, color: u8, message: &str) {
        let rendered = format!("{}\x1b[1m{}\x1b[0m", self.prefix(name, color), message);
        self.emit(&rendered);
    }

    /// Sets the terminal window title.
    pub fn set_title(&self, title: &str) {
        let mut writer = self.lock();
        let _ = write!(writer, "\x1b]0;{} | procswarm\x07", title);
        let _ = writer.flush();
    }

    fn prefix(&self, name: &str, color: u8) -> String {
        let mut prefix = String::new();
        if self.options.print_timestamp {
            prefix.push_str(&format!("\x1b[2m{}\x1b[0m ", self.elapsed()));
        }
        if self.options.print_name {
            prefix.push_str(&format!(
                "\x1b[1;38;5;{}m{:<width$} |\x1b[0m ",
                color,
                name,
                width = self.name_width
            ));
        }
        prefix
    }

    fn elapsed(&self) -> String {
        let secs = self.start.elapsed().as_secs();
        format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
    }

    fn emit(&self, rendered: &str) {
        let mut writer = self.lock();
        let _ = writeln!(writer, "{}", rendered);
        let _ = writer.flush();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Box<dyn Write + Send>> {
        // Poisoning only means another writer panicked mid-line.
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
