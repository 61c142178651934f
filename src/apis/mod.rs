pub mod materials_project;

use crate::error::Result;
use crate::types::{MaterialQuery, SourceRecord};

/// A source of materials documents.
#[async_trait::async_trait]
pub trait MaterialsApi: Send + Sync {
    /// Unique identifier for this provider
    fn api_name(&self) -> &'static str;

    /// Fetch every summary document matching the query
    async fn search_summary(&self, query: &MaterialQuery) -> Result<Vec<SourceRecord>>;

    /// Fetch electronic-structure documents for the given identifiers
    async fn search_electronic_structure(&self, material_ids: &[String]) -> Result<Vec<SourceRecord>>;
}

pub use materials_project::MaterialsProjectClient;
