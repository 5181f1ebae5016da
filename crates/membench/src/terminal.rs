//! Terminal output: spinners, the build progress bar, status lines and tables.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Spinner shown while one measurement runs.
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(spinner_style) = ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template("{spinner:.cyan} {msg}")
        {
            bar.set_style(spinner_style);
        }
        bar.set_message(message);
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    /// Print a line above the spinner.
    pub fn println(&self, line: impl AsRef<str>) {
        self.bar.println(line);
    }

    pub fn finish_with_success(&self, message: &str) {
        self.bar.finish_and_clear();
        success(message);
    }

    pub fn finish_with_failure(&self, message: &str) {
        self.bar.finish_and_clear();
        error(message);
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

/// Progress bar over all programs while building.
pub struct Progress {
    bar: ProgressBar,
}

impl Progress {
    pub fn new(total: u64, message: &str) -> Self {
        let bar = ProgressBar::new(total);
        if let Ok(bar_style) = ProgressStyle::default_bar().template("{msg} [{bar:30.cyan/dim}] {pos}/{len}") {
            bar.set_style(bar_style.progress_chars("━╸━"));
        }
        bar.set_message(message.to_string());
        Self { bar }
    }

    pub fn inc(&self) {
        self.bar.inc(1);
    }

    /// Print a line above the bar without tearing it.
    pub fn println(&self, line: impl AsRef<str>) {
        self.bar.println(line);
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

// ============================================================================
// Styled output helpers
// ============================================================================

pub fn info(message: &str) {
    eprintln!("{} {message}", style("→").cyan());
}

pub fn success(message: &str) {
    eprintln!("{} {message}", style("✓").green().bold());
}

pub fn error(message: &str) {
    eprintln!("{} {message}", style("✗").red().bold());
}

pub fn warning(message: &str) {
    eprintln!("{} {message}", style("!").yellow().bold());
}

/// Styled status line, for use with [`Progress::println`].
#[must_use]
pub fn status_line(ok: bool, message: &str) -> String {
    if ok {
        format!("{} {message}", style("✓").green().bold())
    } else {
        format!("{} {message}", style("✗").red().bold())
    }
}

/// Print an output path (`  → /path/to/file`).
pub fn path_output(path: &Path) {
    eprintln!("  {} {}", style("→").dim(), style(path.display()).dim());
}

// ============================================================================
// Markdown tables
// ============================================================================

/// Markdown table with a left-aligned first column and right-aligned rest.
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn add_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let mut out = String::new();
        out.push('|');
        for (header, &w) in self.headers.iter().zip(&widths) {
            let _ = write!(out, " {header:^w$} |");
        }
        out.push_str("\n|");
        for (i, &w) in widths.iter().enumerate() {
            let dashes = "-".repeat(w + 1);
            if i == 0 {
                let _ = write!(out, ":{dashes}|");
            } else {
                let _ = write!(out, "{dashes}:|");
            }
        }
        out.push('\n');
        for row in &self.rows {
            out.push('|');
            for (i, &w) in widths.iter().enumerate() {
                let cell = row.get(i).map_or("", String::as_str);
                if i == 0 {
                    let _ = write!(out, " {cell:<w$} |");
                } else {
                    let _ = write!(out, " {cell:>w$} |");
                }
            }
            out.push('\n');
        }
        out
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }
}
