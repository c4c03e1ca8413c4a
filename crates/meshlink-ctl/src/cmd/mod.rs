//! CLI command modules.

pub mod dests;
pub mod http;
pub mod links;
