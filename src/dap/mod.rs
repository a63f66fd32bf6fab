//! Debug Adapter Protocol support
//!
//! Framed transport, the protocol subset needed for attach sessions, the
//! attach-oriented client, and the message-interceptor middleware.

pub mod client;
pub mod interceptor;
pub mod transport;
pub mod types;

pub use client::{DebuggerClient, SessionEnd};
pub use interceptor::{MessageInterceptor, NeverBreakOverride};
pub use types::AttachArguments;
