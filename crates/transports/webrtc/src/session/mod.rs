//! Per-request session orchestration

pub mod service;

pub use service::{ActiveSession, SessionService};
