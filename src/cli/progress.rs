//! CLI-specific progress handling for lcp-toolbox
//!
//! Provides the iteration progress bar for long-running tools.

use indicatif::{ProgressBar, ProgressStyle};

const TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} iterations ({percent}%) ETA: {eta}";

/// Creates a progress bar counting scheduler iterations
pub fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = match ProgressStyle::default_bar().template(TEMPLATE) {
        Ok(style) => style,
        Err(e) => {
            log::debug!("Invalid progress template: {e}");
            ProgressStyle::default_bar()
        }
    };
    pb.set_style(style.progress_chars("#>-"));
    pb
}

/// Progress manager for iteration-driven tool runs
pub struct ProgressManager {
    pub pb: ProgressBar,
}

impl ProgressManager {
    /// Create a new progress manager; the message is printed to stderr
    pub fn new(total: u64, message: &str) -> Self {
        let pb = create_progress_bar(total);
        eprintln!("{message}");
        Self { pb }
    }
}
