//! The JSON-RPC surface over HTTP with Basic authentication.
//!
//! Requests are `{method, params: [...], id}` envelopes POSTed to the
//! server root; responses are `{result, error, id}`. All chain access goes
//! through the chain engine's read methods — the only mutation this crate
//! can cause is `posttx`, which runs ordinary transaction acceptance and
//! relays the result.

#[macro_use]
extern crate tracing;

pub mod config;
pub mod error;
pub mod methods;
pub mod server;

pub use config::Config;
pub use error::RpcError;
pub use server::spawn;
