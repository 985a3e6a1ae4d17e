//! Multi-turn interview orchestration engine.
//!
//! An automated interviewer questions a subject over many turns. Each turn
//! threads a phase-gated task board through a fixed pipeline of capability
//! roles, and a run loop drives turns until every phase is done, a turn
//! fails, or the turn limit is reached.
//!
//! - **[`core`]**: Pure, deterministic logic (phases, task board, selection
//!   policies, JSON salvage, transcripts). No I/O.
//! - **[`io`]**: Side effects (capability backends, child processes, config,
//!   event log, guidance, case files, prompt templates).
//! - **[`race`]**: Redundant-request race that gets a valid structured answer
//!   out of an unreliable capability.
//!
//! Orchestration modules ([`agents`], [`step`], [`looping`], [`engine`])
//! coordinate core logic with I/O to implement CLI commands.

pub mod agents;
pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod race;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
