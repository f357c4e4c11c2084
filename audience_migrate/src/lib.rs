pub mod config;
pub mod error;
pub mod importer;
pub mod remap;

pub use config::{FailurePolicy, ImportConfig};
pub use error::{MigrateError, Result};
pub use importer::{BulkImporter, ImportReport, ImportWarning};
pub use remap::{RemapEntry, RemapTable};
