//! Unit-of-work contracts and both its implementations (spec §4.1).

pub mod memory;
pub mod sql;
pub mod traits;

pub use memory::{InMemoryDatabase, InMemoryUnitOfWork, InMemoryUnitOfWorkFactory};
pub use sql::{SqlUnitOfWork, SqlUnitOfWorkFactory};
pub use traits::{UnitOfWork, UnitOfWorkFactory};
