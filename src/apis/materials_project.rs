use crate::apis::MaterialsApi;
use crate::config::MaterialsProjectConfig;
use crate::constants::{
    API_KEY_HEADER, ELECTRONIC_STRUCTURE_ENDPOINT, ELECTRONIC_STRUCTURE_FIELDS, SUMMARY_ENDPOINT,
};
use crate::error::{MaterialsError, Result};
use crate::types::{MaterialQuery, SourceRecord};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Response envelope of the REST API
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    data: Vec<SourceRecord>,
}

pub struct MaterialsProjectClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    page_size: usize,
}

impl MaterialsProjectClient {
    pub fn new(api_key: &str, config: &MaterialsProjectConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("mp_harvest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            page_size: config.page_size.max(1),
        })
    }

    async fn get_page(&self, endpoint: &str, params: &[(String, String)]) -> Result<Vec<SourceRecord>> {
        let url = format!("{}{}", self.base_url, endpoint);
        let resp = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(params)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message: String = body.chars().take(200).collect();
            return Err(MaterialsError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: ApiResponse = resp.json().await?;
        Ok(envelope.data)
    }

    /// Walk `_skip`/`_limit` pages until a short page comes back.
    async fn get_all(&self, endpoint: &str, params: Vec<(String, String)>) -> Result<Vec<SourceRecord>> {
        let mut all = Vec::new();
        let mut skip = 0usize;
        loop {
            let mut page_params = params.clone();
            page_params.push(("_limit".to_string(), self.page_size.to_string()));
            page_params.push(("_skip".to_string(), skip.to_string()));

            let page = self.get_page(endpoint, &page_params).await?;
            let fetched = page.len();
            debug!("Fetched page of {} documents at offset {}", fetched, skip);
            all.extend(page);

            if fetched < self.page_size {
                break;
            }
            skip += fetched;
        }
        Ok(all)
    }
}

#[async_trait::async_trait]
impl MaterialsApi for MaterialsProjectClient {
    fn api_name(&self) -> &'static str {
        "materials_project"
    }

    #[instrument(skip(self), fields(api = self.api_name()))]
    async fn search_summary(&self, query: &MaterialQuery) -> Result<Vec<SourceRecord>> {
        let docs = self.get_all(SUMMARY_ENDPOINT, query.to_query_pairs()).await?;
        info!("Retrieved {} summary documents", docs.len());
        Ok(docs)
    }

    #[instrument(skip(self), fields(api = self.api_name()))]
    async fn search_electronic_structure(&self, material_ids: &[String]) -> Result<Vec<SourceRecord>> {
        if material_ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = MaterialQuery::by_ids(material_ids).with_fields(ELECTRONIC_STRUCTURE_FIELDS);
        let docs = self
            .get_all(ELECTRONIC_STRUCTURE_ENDPOINT, query.to_query_pairs())
            .await?;
        info!("Retrieved {} electronic structure documents", docs.len());
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash_and_clamps_page_size() {
        let config = MaterialsProjectConfig {
            base_url: "https://example.org/".to_string(),
            page_size: 0,
            ..MaterialsProjectConfig::default()
        };
        let client = MaterialsProjectClient::new("key", &config).unwrap();
        assert_eq!(client.base_url, "https://example.org");
        assert_eq!(client.page_size, 1);
        assert_eq!(client.api_name(), "materials_project");
    }

    #[test]
    fn envelope_tolerates_missing_data() {
        let envelope: ApiResponse = serde_json::from_str(r#"{"meta": {"total_doc": 0}}"#).unwrap();
        assert!(envelope.data.is_empty());
    }
}
