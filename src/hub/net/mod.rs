pub mod connection;
pub mod server;
pub mod session;
