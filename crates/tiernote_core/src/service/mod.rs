//! Core use-case services.
//!
//! # Responsibility
//! - Compose repository calls into transactional, quota-checked operations.
//! - Keep the API layer decoupled from storage details.

pub mod ordering_service;
pub mod quota_service;
pub mod storage_service;
pub mod workspace_service;
