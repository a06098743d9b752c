// Firecrawl Relay - Core
//
// Relays tool calls to a Firecrawl deployment with retry, lifecycle events
// and rolling metrics, and tracks long-running research and llms.txt jobs.

pub mod config;
pub mod kernel;
pub mod server;

pub use config::*;
