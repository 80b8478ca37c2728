pub mod cache;
pub mod config;
pub mod docs;
pub mod error;
pub mod experts;
pub mod forum;
pub mod index;
pub mod mcp;
pub mod ranking;
pub mod slack;
pub mod tools;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{McpError, McpResult};
