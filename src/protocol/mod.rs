//! Wire types: the consumer-facing JSON-RPC envelope and the provider channel
//! message set (spec §4.A, §6).

mod messages;
mod provider;

pub use messages::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};
pub use provider::{ChatMessage, ChatRequestPayload, ChatResponsePayload, Content, ProviderMessage, ToolDescriptor};

/// JSON-RPC protocol version string used on the consumer-facing `/mcp` endpoint.
pub const JSONRPC_VERSION: &str = "2.0";
