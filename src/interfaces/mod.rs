//! Outer adapters: CSV scenario input, outcome output and the scenario runner.

pub mod csv;
pub mod simulation;
