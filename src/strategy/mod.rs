//! Strategy layer: pure decision functions.
//!
//! Nothing in here performs I/O. The engine feeds these functions market
//! data and account state and acts on what they return.

pub mod governor;
pub mod kelly;
pub mod lifecycle;
pub mod momentum;
pub mod planner;
pub mod scoring;
