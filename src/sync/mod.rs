//! Sequence synchronization
//!
//! Implements:
//! - Records and per-entity sequences
//! - Update descriptors (hashed blocks, appends, no-ops)
//! - Block reconciliation with cache reuse and concurrent fetches

mod descriptor;
mod record;
mod reconcile;

#[cfg(test)]
pub(crate) mod fixtures;

pub use descriptor::*;
pub use record::*;
pub use reconcile::*;
