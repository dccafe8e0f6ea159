//! Command-line shell around the `react-client` dev server core.
//!
//! The binary stays thin: argument parsing, logger setup, terminal
//! status output, and dispatch into [`react_client::serve`].

pub mod cli;
pub mod commands;
pub mod logger;
pub mod ui;
