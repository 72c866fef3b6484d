//! Data Transfer Objects for REST request/response serialization.
//!
//! Amounts are serialized in minor currency units.

pub mod payment_dto;
pub mod webhook_dto;

pub use payment_dto::*;
pub use webhook_dto::*;
