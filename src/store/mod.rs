//! Persistence layer: libSQL-backed storage for workloads and people.

pub mod handle;
pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use handle::PersonHandle;
pub use libsql_backend::LibSqlBackend;
pub use traits::{RecordStore, StoredPerson};
