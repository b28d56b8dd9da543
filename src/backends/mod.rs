//! Collaborator implementations
//!
//! - HTTP clients for the face-parsing and inpainting services
//! - Deterministic in-memory doubles used by unit and integration tests

pub mod http;

// Test doubles; integration tests and benches enable `test-utils`
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use self::http::{HttpInpaintingClient, HttpSegmentationClient};
