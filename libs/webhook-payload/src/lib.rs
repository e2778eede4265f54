//! Webhook wire models shared between the control plane and its consumers.

pub mod models;

pub use models::*;
