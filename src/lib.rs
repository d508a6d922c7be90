//! Slidegate - Exact Sliding-Window Admission Control
//!
//! This crate decides, per caller-supplied key, whether a unit of work may
//! proceed under a limit of N admissions per trailing time window. State is
//! held in process memory; keys are isolated from each other and only calls
//! for the same key are serialized.

pub mod config;
pub mod error;
pub mod ratelimit;

pub use error::{GateError, Result};
pub use ratelimit::{AdmissionEngine, Decision, Limit, Usage};
