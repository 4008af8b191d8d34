//! Protocol models shared by the client and the gateway

mod jsonrpc;
mod mcp;

pub use jsonrpc::*;
pub use mcp::*;
