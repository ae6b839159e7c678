pub mod export;
pub mod import;

pub use export::{ComplianceSnapshot, Exporter};
pub use import::{load_directory, DirectoryFile};
