//! Periodix admission limiter.
//!
//! This crate implements the per-key sliding-window limiter that shields the
//! upstream timetable provider and the lesson-color preference endpoints of
//! the Periodix timetable service. It ships as axum middleware and as a small
//! HTTP admission service the web backend can consult.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
