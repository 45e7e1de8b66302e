//! Entry points into the engine: CSV batch intake and the HTTP API.

pub mod csv;
pub mod http;
