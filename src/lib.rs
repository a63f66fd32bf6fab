//! Test platform bridge - runtime core of an IDE test integration
//!
//! This library executes already-discovered test items through an external
//! test host, correlates the host's structured result logs back onto the
//! test tree, and orchestrates debugger attach sessions against those same
//! host processes via the Debug Adapter Protocol (DAP).

pub mod common;
pub mod controller;
pub mod correlate;
pub mod dap;
pub mod debug;
pub mod process;
pub mod run;
pub mod tree;
pub mod trx;

// Re-export commonly used types for hosts and tests
pub use common::{Config, Error, Result};
pub use tree::{RunLog, RunProfile, RunRequest, TestTree};
