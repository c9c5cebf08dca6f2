//! Language Server Protocol plumbing
//!
//! Layered the same way as the wire:
//!
//! - **Framing**: LSP message framing (Content-Length headers)
//! - **Protocol**: JSON-RPC 2.0 peer with requests in both directions
//! - **Client**: typed API for what the server sends to the editor
//! - **Capabilities**: one-time negotiation at `initialize`
//! - **Testing**: mock editor for session tests
//!
//! Transport lives in the generic I/O layer (`crate::io`).

pub mod capabilities;
pub mod client;
pub mod error;
pub mod framing;
pub mod jsonrpc_utils;
pub mod protocol;
#[cfg(test)]
pub mod testing;

pub use capabilities::NegotiatedCapabilities;
pub use client::LanguageClient;
pub use error::LspError;
pub use protocol::{Connection, Incoming};
