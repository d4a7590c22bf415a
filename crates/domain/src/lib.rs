//! `lb-domain` — types shared by every linkbridge crate: the error
//! taxonomy, the configuration model and structured trace events.

pub mod config;
pub mod error;
pub mod trace;
