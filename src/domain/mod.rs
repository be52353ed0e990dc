//! Channel state, objectives and the ports the engine drives them through.

pub mod amount;
pub mod chain;
pub mod channel;
pub mod consensus;
pub mod event;
pub mod message;
pub mod objective;
pub mod ports;
pub mod registry;
pub mod state;
pub mod types;
