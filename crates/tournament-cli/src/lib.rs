//! Command-line front end for LLM-judged tournaments.
//!
//! Configuration loading, HTTP judge transports and console reporting
//! around the `tournament` library. The `llm-tournament` binary is a thin
//! clap layer over [`commands`].

pub mod commands;
pub mod config;
pub mod report;
pub mod transport;

pub use config::AppConfig;
