//! Reverse proxy configuration

pub mod traefik;
