//! Parley messaging core.
//!
//! The server side of Parley: a user directory, a directed contact
//! registry, an append-only per-conversation message log with live
//! subscriptions, and the WebSocket gateway that exposes them to clients.
//! Exposed as a library so tests can run an in-process gateway.

pub mod access;
pub mod config;
pub mod contacts;
pub mod directory;
pub mod gateway;
pub mod log;
