//! Maps record types onto relational rows.
//!
//! Declare a record type once with [`TypeDeclaration`] and [`Orm::compile`],
//! then create, look up, update and delete rows through [`Model`] and
//! [`RecordInstance`]. Only attributes changed since the last persist are
//! written. All storage access goes through a [`StorageDriver`]:
//! [`SqlxDriver`] for sqlite/postgres pools, [`MemoryDriver`] in-process.

pub mod libs;

pub use libs::*;
