//! # arbor-core
//!
//! Foundation types for the Arbor chat service.
//!
//! This crate provides the shared vocabulary that the runtime and server
//! crates depend on:
//!
//! - **Branded IDs**: [`ids::ConversationId`], [`ids::MessageId`] as newtypes
//! - **Data model**: [`messages::Message`], [`messages::Conversation`] — a
//!   branching conversation tree stored as an arena keyed by message id
//! - **Tree operations**: [`tree`] — `add_child`, `add_sibling`,
//!   `build_subtree` on [`messages::Conversation`]
//! - **Update events**: [`events::MessageUpdate`] — the tagged event records
//!   streamed to clients and recorded in per-message audit logs
//! - **Constants**: [`constants`] — wire padding widths, size caps, timeouts
//! - **Logging**: [`logging::init_subscriber`]
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `arbor-runtime` and `arbor-server`.

#![deny(unsafe_code)]

pub mod constants;
pub mod events;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod tree;
