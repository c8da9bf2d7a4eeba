#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Durable persistence and query primitives for workflows, branches and
//! jobs. [`Repository`] is the seam the Scheduler and Workflow Service are
//! built against; [`PostgresStore`] and [`InMemoryStore`] are its two
//! implementations.

mod error;
mod memory;
mod postgres;
mod repository;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use repository::Repository;
