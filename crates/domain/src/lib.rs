//! `tause-domain`: configuration types and the shared error type.

pub mod config;
pub mod error;
