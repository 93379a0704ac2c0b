//! Process entry surface: CLI parsing and logging setup (A1, A3).

pub mod cli;
pub mod logging;
