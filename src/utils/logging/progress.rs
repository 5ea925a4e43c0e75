//! Progress reporting for shard loops, using the indicatif crate.

use indicatif::{ProgressBar, ProgressStyle};

/// Default style for a shard progress bar
pub const DEFAULT_SHARD_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} shards {msg}";

/// Create a progress bar over `length` shards
///
/// When `enabled` is false the bar is hidden, so callers can tick it
/// unconditionally.
#[must_use]
pub fn create_shard_progress_bar(length: u64, description: &str, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(length);
    if let Ok(style) = ProgressStyle::default_bar().template(DEFAULT_SHARD_TEMPLATE) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(description.to_string());
    pb
}

/// Finish a progress bar with a completion message
pub fn finish_progress_bar(pb: &ProgressBar, message: Option<&str>) {
    if let Some(msg) = message {
        pb.finish_with_message(msg.to_string());
    } else {
        pb.finish();
    }
}
