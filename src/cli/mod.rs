//! Interactive command-line front-end

pub mod commands;

pub use commands::{execute, resolve_peer, AppState, CliResult, ReplCommand};
