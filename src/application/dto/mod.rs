//! Data Transfer Objects
//!
//! DTOs for REST request/response serialization.

pub mod request;
pub mod response;
