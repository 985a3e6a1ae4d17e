//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod catalog;
pub mod phase;
pub mod salvage;
pub mod selector;
pub mod task_board;
pub mod transcript;
pub mod types;
