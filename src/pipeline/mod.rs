//! Query, normalize, persist and import stages.

pub mod coerce;
pub mod import;
pub mod normalize;
pub mod persist;
pub mod query;

pub use import::{DirectoryImport, ImportReport, Importer};
pub use normalize::{normalize, to_tabular_row};
pub use persist::save_dataset;
pub use query::{CollectionPlan, CollectionResult, QueryRunner};
