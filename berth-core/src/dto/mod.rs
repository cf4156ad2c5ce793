//! Data Transfer Objects
//!
//! Payloads exchanged with the hosting platform.

pub mod status;
