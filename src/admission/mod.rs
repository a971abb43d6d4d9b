//! Admission-time webhook logic (spec.md §4.3, §6).
//!
//! These are plain async functions rather than a hand-rolled HTTP server: the
//! TLS/transport layer is explicitly out of scope (spec.md §1), so the
//! request/response plumbing is left to whatever `warp`/`axum` handler a
//! deployment wires on top.

pub mod defaulter;
pub mod injector;
pub mod validator;
