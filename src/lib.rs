//! # Blaze MCP Server
//!
//! Model Context Protocol adapter for the Blaze FHIR server. Exposes FHIR
//! CRUD, search, terminology, CQL and administrative operations as MCP tools,
//! server metadata as MCP resources, and a few clinical prompt templates.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod prompts;
pub mod resources;
pub mod server;
pub mod session;
pub mod tools;
pub mod transport;

// Re-export commonly used types
pub use client::FhirClient;
pub use config::ServerConfig;
pub use error::{Error, ErrorKind, ErrorRecord, Result};
pub use server::McpServer;
pub use session::{SessionState, Target};

/// Current version of the MCP server
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
