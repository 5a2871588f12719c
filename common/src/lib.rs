//! StayFX Common Types
//!
//! This crate contains the shared currency model used across StayFX,
//! including the currency catalog, the registry that closes the set of
//! accepted codes, and time utilities.

pub mod currency;
pub mod registry;
pub mod error;
pub mod time;

pub use currency::*;
pub use registry::*;
pub use error::*;
pub use time::*;
