//! Progress bar for apply and destroy

use colored::Colorize;
use declarative::{ApplyResult, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};

/// Reports engine progress on a terminal progress bar.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(total: usize, quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(total as u64)
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn symbol(result: &ApplyResult) -> String {
    match result {
        ApplyResult::NoChange => "○".dimmed().to_string(),
        ApplyResult::Created
        | ApplyResult::Modified
        | ApplyResult::Replaced
        | ApplyResult::Removed => "✓".green().to_string(),
        ApplyResult::Failed { .. } => "✗".red().to_string(),
        ApplyResult::Skipped { .. } => "⊘".yellow().to_string(),
    }
}

fn detail(result: &ApplyResult) -> String {
    match result {
        ApplyResult::NoChange => "unchanged".to_string(),
        ApplyResult::Created => "created".to_string(),
        ApplyResult::Modified => "modified".to_string(),
        ApplyResult::Replaced => "replaced".to_string(),
        ApplyResult::Removed => "removed".to_string(),
        ApplyResult::Failed { error } => error.clone(),
        ApplyResult::Skipped { reason } => reason.clone(),
    }
}

impl ProgressCallback for BarProgress {
    fn on_level_start(&self, index: usize, count: usize) {
        log::debug!("level {index}: {count} resources");
    }

    fn on_resource_start(&self, name: &str, description: &str) {
        log::info!("{name}: {description}");
        self.bar.set_message(name.to_string());
    }

    fn on_resource_complete(&self, name: &str, result: &ApplyResult) {
        if !matches!(result, ApplyResult::NoChange) {
            self.bar
                .println(format!("  {} {name} {}", symbol(result), detail(result).dimmed()));
        }
        self.bar.inc(1);
    }

    fn on_level_complete(&self, _index: usize) {}
}
