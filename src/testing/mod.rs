//! Testing utilities and mock implementations
//!
//! Provides a mock broker client so the session manager and agent loop can
//! be exercised without a live broker.

pub mod mocks;
