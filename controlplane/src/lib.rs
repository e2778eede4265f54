//! Keel control plane library
//!
//! Orchestrator backends for the servers keel manages and the DNS-01
//! certificate pipeline: provider clients, proxy configuration, certificate
//! status polling and provisioning webhooks.

pub mod app;
pub mod certs;
pub mod dns;
pub mod errors;
pub mod events;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod orchestrator;
pub mod proxy;
pub mod remote;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
