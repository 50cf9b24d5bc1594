//! Output module for reports and exports
//!
//! This module handles:
//! - Collecting and printing system statistics
//! - Exporting an account's accumulated links as CSV

mod export;
pub mod stats;

pub use export::{default_export_filename, export_account_links};
pub use stats::{load_statistics, print_statistics, SystemStatistics};

use crate::storage::StorageError;
use thiserror::Error;

/// Errors raised while producing reports or exports
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
