//! # arbor-server
//!
//! HTTP surface for the Arbor chat service:
//!
//! - `POST /conversations/generate` — validate a request, grow the
//!   conversation tree, stream newline-delimited update events
//! - `POST /conversations/{id}/abort` — record a cancellation request
//! - `GET /health` — liveness
//!
//! Request validation and tree shaping happen before the first streamed
//! byte; everything after travels in-stream through `arbor-runtime`.
//!
//! ## Crate Position
//!
//! Top of the stack. Depends on `arbor-core` and `arbor-runtime`; builds the
//! `arbor-server` binary.

#![deny(unsafe_code)]

pub mod config;
pub mod dev;
pub mod rejection;
pub mod routes;
pub mod server;
pub mod shutdown;
