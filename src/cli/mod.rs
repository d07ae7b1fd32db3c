//! Script commands: one JSON object per line, each naming an operation and its collection.

mod command;
mod runner;

pub use command::{Command, parse_command_json};
pub use runner::{LineResult, render, run, run_script, total_documents};
