//! Domain layer types and invariants.

pub mod error;
pub mod page;
pub mod props;
pub mod protocol;
pub mod validation;
