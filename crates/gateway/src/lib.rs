//! `lb-gateway`: the `linkbridge` binary's library half.
//!
//! Bootstraps the session from configuration and exposes it over HTTP
//! (status / QR, send, cloud webhook and cloud send).

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod cloud;
pub mod qr;
pub mod state;
