//! CLI commands

pub mod serve;
pub mod servers;
