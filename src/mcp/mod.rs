//! MCP protocol layer: JSON-RPC envelopes and method routing.
//!
//! Transports hand raw message bytes plus a [`CallScope`] to
//! [`McpRouter::handle_bytes`] and write back whatever response comes out.

mod router;
mod wire;

pub use router::{CallScope, McpRouter, TransportKind};
pub use wire::{
    JsonRpcErrorObject, JsonRpcRequest, JsonRpcResponse, MAX_BODY_BYTES, decode_request,
};
