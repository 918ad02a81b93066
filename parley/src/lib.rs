//! Parley client library.
//!
//! Connects to a Parley gateway, presents the caller's identity, and
//! drives contact management and per-conversation chat sessions. UI
//! rendering is out of scope: the library exposes state transitions and
//! ordered message streams for a front-end to consume.

pub mod client;
pub mod identity;
pub mod session;
