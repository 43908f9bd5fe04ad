//! Group and item progress bars for a run.
//!
//! Also provides global progress context for coordinating output from
//! any part of the application during progress display.

use std::sync::{OnceLock, RwLock};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::helpers::truncate_name;

/// Global reference to active progress display for coordinating output.
static ACTIVE_PROGRESS: OnceLock<RwLock<Option<MultiProgress>>> = OnceLock::new();

fn get_active_progress() -> &'static RwLock<Option<MultiProgress>> {
    ACTIVE_PROGRESS.get_or_init(|| RwLock::new(None))
}

/// Set the global active progress display.
pub fn set_active_progress(multi: Option<MultiProgress>) {
    if let Ok(mut guard) = get_active_progress().write() {
        *guard = multi;
    }
}

/// Print a message that coordinates with any active progress display.
/// Falls back to println! if no progress display is active.
pub fn progress_println(message: &str) {
    if let Ok(guard) = get_active_progress().read() {
        if let Some(ref multi) = *guard {
            let _ = multi.println(message);
            return;
        }
    }
    println!("{}", message);
}

fn bar_style(template: &str, chars: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars(chars)
}

/// Two-level display: one bar over groups, one over the current group's items.
pub struct RunProgress {
    multi: MultiProgress,
    group_bar: ProgressBar,
    item_bar: ProgressBar,
}

impl RunProgress {
    pub fn new(total_groups: usize) -> Self {
        let multi = MultiProgress::new();

        let group_bar = multi.add(ProgressBar::new(total_groups as u64));
        group_bar.set_style(bar_style(
            "{spinner:.green} {msg} [{bar:30.cyan/blue}] {pos}/{len} groups",
            "█▓░",
        ));
        group_bar.set_message("Starting");
        group_bar.enable_steady_tick(Duration::from_millis(100));

        let item_bar = multi.add(ProgressBar::new(0));
        item_bar.set_style(bar_style(
            "  {spinner:.dim} {wide_msg} [{bar:25.cyan/blue}] {pos}/{len}",
            "━╸─",
        ));
        item_bar.set_message("idle");

        set_active_progress(Some(multi.clone()));

        Self {
            multi,
            group_bar,
            item_bar,
        }
    }

    pub fn start_group(&self, index: usize, total: usize, name: &str) {
        self.group_bar
            .set_message(format!("[{}/{}] {}", index, total, truncate_name(name, 30)));
        self.item_bar.set_length(0);
        self.item_bar.set_position(0);
        self.item_bar.set_message("fetching items");
    }

    pub fn set_items(&self, total: usize) {
        self.item_bar.set_length(total as u64);
        self.item_bar.set_position(0);
        self.item_bar.set_message("processing");
    }

    pub fn set_item_position(&self, current: usize, total: usize) {
        self.item_bar.set_length(total as u64);
        self.item_bar.set_position(current as u64);
    }

    pub fn set_item_message(&self, message: impl Into<String>) {
        self.item_bar.set_message(message.into());
    }

    pub fn finish_group(&self, current: usize) {
        self.group_bar.set_position(current as u64);
        self.item_bar.set_message("idle");
    }

    /// Finish all progress bars and clear the display.
    pub fn finish(&self) {
        self.item_bar.finish_and_clear();
        self.group_bar.finish_and_clear();
        set_active_progress(None);
    }

    /// Print a message that coordinates with the progress display.
    pub fn println(&self, message: &str) {
        let _ = self.multi.println(message);
    }
}
