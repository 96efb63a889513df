//! Inference engine integration
//!
//! Locates the external engine binary and runs it as a subprocess,
//! streaming generated tokens back to the caller.

pub mod locate;
pub mod runner;
