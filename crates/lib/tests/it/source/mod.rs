//! Source integration tests
//!
//! `contract` runs against whichever source TEST_SOURCE selects; the other modules
//! cover behavior specific to one implementation.

mod contract;
mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;
