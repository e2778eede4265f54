pub mod application;
pub mod server;
