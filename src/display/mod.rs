//! Terminal display utilities for CLI output.

pub mod progress;

pub use progress::{create_progress_bar, create_spinner, with_spinner};
