//! Stores for testing the harness itself
//!
//! - [`MemoryStore`]: a correct single-lock store
//! - [`FaultyStore`]: breaks the store contract after N operations
//! - [`ReadBackCas`]: infers CAS outcomes for stores that report none

mod faulty;
mod memory_store;
mod read_back;

pub use faulty::{FaultMode, FaultyStore};
pub use memory_store::MemoryStore;
pub use read_back::ReadBackCas;
