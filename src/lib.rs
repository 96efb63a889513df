//! modelhost library
//!
//! Core library for hosting local inference models: the model catalog,
//! download orchestration, engine binary discovery, subprocess token
//! streaming, and the active-model session lifecycle.

pub mod catalog;
pub mod engine;
pub mod prompt;
pub mod session;
pub mod storage;
