//! # Camp Common Library
//!
//! Shared code for the camp grouping workspace including:
//! - Database initialization, migrations and table models
//! - Tagged status types shared by campers, groups, runs and violations
//! - Configuration loading
//! - GUID helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;
pub mod types;
pub mod uuid_utils;

pub use error::{Error, Result};
pub use types::{
    AssignmentType, GradeSource, GroupingStatus, ResolutionType, RunType, RunViolationDisposition,
    ViolationKind, ViolationSeverity, ViolationStatus,
};
