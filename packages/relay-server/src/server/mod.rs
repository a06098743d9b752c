// Tool protocol server (JSON-RPC over stdio)
pub mod rpc;

pub use rpc::*;
