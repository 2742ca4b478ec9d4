#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Paymount Shared Types and Utilities
//!
//! Status enums, parse errors, and database helpers shared by the billing
//! core and the HTTP integration.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
