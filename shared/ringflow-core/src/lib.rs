//! Ringflow Core - Shared domain types and service infrastructure
//!
//! This crate provides:
//! - Standard service trait all microservices must implement
//! - Common domain types (PhoneNumber, etc.)
//! - Error handling utilities

pub mod domain;
pub mod error;
pub mod service;

pub use domain::*;
pub use error::{Result, RingflowError};
pub use service::{DependencyStatus, HealthStatus, ReadinessStatus, RingflowService, ServiceRuntime};
