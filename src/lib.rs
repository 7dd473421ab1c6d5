//! # rdagent
//!
//! A remote debug agent that runs on a build or test host and serves a
//! development client over TCP:
//! - Supervised process execution with timeout, cancellation and
//!   process-tree termination
//! - File transfer with metadata listing, parallel pack/unpack and zip
//!   extraction
//! - Debugger output fetching
//! - Compact length-prefixed binary protocol with optional compression
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TCP Server                              │
//! │               (one thread per client)                        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ frames (protocol)
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     Dispatcher                               │
//! │            (optional exclusive execution)                    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┼────────────┐
//!          │            │            │
//!          ▼            ▼            ▼
//!   ┌─────────────┐ ┌─────────┐ ┌─────────────┐
//!   │   Process   │ │  Fetch  │ │  Transfer   │
//!   │ Supervisor  │ │ output  │ │   Engine    │
//!   └─────────────┘ └─────────┘ └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod process;
pub mod transfer;
pub mod handlers;
pub mod network;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{AgentError, Result};
pub use config::Config;
pub use handlers::{DispatchContext, Dispatcher};
pub use network::{Server, ShutdownHandle};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of rdagent
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
