//! Application layer orchestrating objectives.
//!
//! `Engine` turns API requests, peer messages and chain events into objective
//! transitions and side effects. `Node` wraps an engine and its run loop for
//! callers that only want to open, pay over and close channels.

pub mod engine;
pub mod locker;
pub mod metrics;
pub mod node;
pub mod policy;
pub mod vouchers;
