//! Shared domain types for the storefront order core.
//!
//! Contains the persistent models (orders, coupons, catalog), the
//! application-wide error taxonomy and small utilities. Everything that
//! both the server and any future client crate need to agree on lives here.

pub mod error;
pub mod models;
pub mod util;

pub use error::{ServiceError, ServiceResult};
