//! Terminal progress for plan execution

use colored::Colorize;
use converge::{Action, NodePath, ProgressCallback, Status};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}";

/// Progress bar with one line per entry that touched the provider
pub struct BarProgress {
    bar: ProgressBar,
    verbose: bool,
}

impl BarProgress {
    pub fn new(quiet: bool, verbose: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template(TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { bar, verbose }
    }

    fn line(&self, line: &str) {
        if !self.bar.is_hidden() {
            self.bar.suspend(|| println!("  {line}"));
        }
    }
}

impl ProgressCallback for BarProgress {
    fn on_start(&mut self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.enable_steady_tick(Duration::from_millis(120));
    }

    fn on_entry_start(&mut self, path: &NodePath, action: Action) {
        if action.is_change() {
            self.bar.set_message(format!("{action} {path}"));
        }
    }

    fn on_entry_complete(&mut self, path: &NodePath, action: Action, status: &Status) {
        self.bar.inc(1);
        let line = match status {
            Status::Succeeded if action.is_change() => {
                format!("{} {action} {path}", "✓".green())
            }
            Status::Succeeded => return,
            Status::Failed(failure) => format!("{} {action} {path}: {failure}", "✗".red()),
            Status::Skipped(reason) if self.verbose => {
                format!("{} {path} ({reason})", "⊘".dimmed())
            }
            Status::Skipped(_) => return,
        };
        self.line(&line);
    }

    fn on_retry(&mut self, path: &NodePath, attempt: u32, delay: Duration) {
        log::debug!("Retrying {path} (attempt {attempt}) in {delay:?}");
        self.line(&format!(
            "{} {path}: retry {attempt} in {}ms",
            "↻".yellow(),
            delay.as_millis()
        ));
    }

    fn on_finish(&mut self) {
        self.bar.finish_and_clear();
    }
}
