//! HTTP server and response envelope.

pub mod envelope;
pub mod server;

pub use envelope::GatewayError;
pub use server::GatewayServer;
