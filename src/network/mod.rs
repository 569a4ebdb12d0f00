mod connection;
mod frame;
mod server;

pub use connection::Connection;
pub use frame::{encode_reply, RequestFrame};
pub use server::GatewayServer;
