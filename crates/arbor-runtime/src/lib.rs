//! # arbor-runtime
//!
//! The streaming-generation engine for Arbor.
//!
//! One request flows through this crate as follows: the server hands
//! [`orchestrator::run_generation`] a conversation it owns for the duration
//! of the stream, a write-target message, and a [`pipeline::GenerationContext`].
//! The orchestrator runs the [`pipeline`] (websearch → tools → generate) and
//! the best-effort [`title`] producer concurrently, merges their events with
//! [`fan_in::merge`], applies each event through the [`applier`], and forwards
//! the encoded record to the client channel.
//!
//! - **[`applier`]**: turns [`arbor_core::events::MessageUpdate`]s into
//!   conversation mutations + wire writes, with the anti-side-channel rules
//! - **[`fan_in`]**: arrival-order merge of independent event producers
//! - **[`pipeline`]**: the per-request stage state machine
//! - **[`abort`]**: process-wide cancellation snapshot, refreshed periodically
//! - **[`engine`]**: collaborator traits (models, generation, search, tools,
//!   files, persistence)
//!
//! ## Crate Position
//!
//! Depends on `arbor-core`. Depended on by `arbor-server`.

#![deny(unsafe_code)]

pub mod abort;
pub mod applier;
pub mod engine;
pub mod errors;
pub mod fan_in;
pub mod orchestrator;
pub mod pipeline;
pub mod title;
pub mod tools;
pub mod websearch;
