//! MCP protocol surface: method names and handshake types.

pub mod capability;
pub mod methods;

pub use capability::{
    Implementation, InitializeResult, PromptsCapability, ResourcesCapability, ServerCapabilities,
    ToolsCapability,
};
