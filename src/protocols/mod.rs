//! Reference objective protocols.
//!
//! Each protocol registers itself with the `ProtocolRegistry` under the
//! prefix of the objective ids it produces.

pub mod directdefund;
pub mod directfund;
