//! Side-effecting collaborators: capability backends, files and prompts.

pub mod capability;
pub mod case_file;
pub mod config;
pub mod event_log;
pub mod guidance;
pub mod process;
pub mod prompt;
