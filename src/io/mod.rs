//! I/O layer - Generic abstractions for processes and transport
//!
//! - **Transport**: Pure I/O layer for bidirectional text exchange
//! - **Process**: One-shot compiler runs against a temporary input file
//!
//! Neither knows anything about the protocol spoken on top.

pub mod process;
pub mod transport;

// Re-export main types for convenience
pub use process::{CompileRequest, CompilerRunner, ExternalCompiler, ProcessError};
pub use transport::{StdioTransport, Transport};
