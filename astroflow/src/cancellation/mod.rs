//! Cooperative stop signalling for the scheduler loop.

mod token;

pub use token::StopSignal;
