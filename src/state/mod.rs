//! State module for tracking operation and account lifecycles
//!
//! # Components
//!
//! - `OperationState`: Lifecycle of a single fetch operation (queued, processing, completed, failed)
//! - `OperationOrigin`: Whether an operation was requested on demand or by the scheduler
//! - `AccountStatus`: Whether a managed account takes part in round-robin monitoring

mod account_status;
mod operation_state;

// Re-export main types
pub use account_status::AccountStatus;
pub use operation_state::{OperationOrigin, OperationState};
