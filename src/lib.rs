//! Goal planner library
//!
//! Goals broken into tasks, recursive progress roll-up, dependency checks,
//! velocity analysis, completion forecasts, and reasoning-engine-assisted
//! goal breakdown over a SQLite store.

pub mod breakdown;
pub mod cli;
pub mod config;
pub mod db;
pub mod dependencies;
pub mod error;
pub mod forecast;
pub mod logging;
pub mod progress;
pub mod service;
pub mod types;
pub mod velocity;
