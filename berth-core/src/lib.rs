//! Berth Core
//!
//! Core types for the Berth deployment-surface toolkit.
//!
//! This crate contains:
//! - Domain types: the five deployment artifacts (pipeline job, image build
//!   spec, values record, compose topology, entry points) and the `Stack`
//!   that groups them for one service
//! - Report types: findings produced by consistency checks
//! - DTOs: payloads exchanged with the hosting platform

pub mod domain;
pub mod dto;
pub mod error;
pub mod report;
pub mod vars;

pub use error::{CoreError, Result};
pub use vars::{EnvVarProvider, MapVarProvider, VarProvider};
