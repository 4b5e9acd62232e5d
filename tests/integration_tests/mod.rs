//! Integration tests module
//!
//! End-to-end tests for the pifleet membership pipeline:
//! - Backend samples → membership events → durable node records
//! - Observer isolation under failing and panicking handlers

pub mod end_to_end_test;
pub mod fixtures;
pub mod observer_test;
