use crate::apis::MaterialsApi;
use crate::constants::{
    elements_provenance, DEFAULT_BAND_GAP_RANGE, DEFAULT_ELEMENT_LIMIT, DEFAULT_SEMICONDUCTOR_LIMIT,
    ELEMENT_FIELDS, IMPORTANT_MATERIALS, MAX_ADDITIONAL_PROPERTY_MATERIALS, PING_FIELDS,
    PING_MATERIAL, PREFIX_COMPREHENSIVE, PREFIX_SEMICONDUCTORS, PREFIX_SPECIFIC, PREFIX_STABLE,
    PROVENANCE_SEMICONDUCTORS, PROVENANCE_SPECIFIC_IDS, PROVENANCE_STABLE, SEMICONDUCTOR_FIELDS,
    SOURCE_ELECTRONIC_STRUCTURE, SPECIFIC_FIELDS, STABLE_FIELDS,
};
use crate::error::{MaterialsError, Result};
use crate::metrics::names::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, QUERY_ERRORS_TOTAL};
use crate::pipeline::normalize::normalize;
use crate::pipeline::persist::{save_dataset, SavedFiles};
use crate::types::{MaterialQuery, NormalizedRecord};
use metrics::{counter, histogram};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Electronic-structure values keyed by material id.
pub type AdditionalProperties = HashMap<String, Map<String, Value>>;

/// Which named queries a collection run performs.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionPlan {
    pub material_ids: Vec<String>,
    /// Element filter; empty skips the element query
    pub elements: Vec<String>,
    pub element_limit: usize,
    pub band_gap: (f64, f64),
    pub semiconductor_limit: usize,
    /// `(energy_above_hull max, limit)`; `None` skips the stable query
    pub stable: Option<(f64, usize)>,
    /// Number of specific materials to enrich with electronic-structure data
    pub additional_properties: usize,
}

impl Default for CollectionPlan {
    fn default() -> Self {
        Self {
            material_ids: IMPORTANT_MATERIALS.iter().map(|s| s.to_string()).collect(),
            elements: vec!["Si".to_string()],
            element_limit: DEFAULT_ELEMENT_LIMIT,
            band_gap: DEFAULT_BAND_GAP_RANGE,
            semiconductor_limit: DEFAULT_SEMICONDUCTOR_LIMIT,
            stable: None,
            additional_properties: MAX_ADDITIONAL_PROPERTY_MATERIALS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollectionResult {
    pub saved: Vec<SavedFiles>,
    /// De-duplicated union of every query, first occurrence wins
    pub unique: Vec<NormalizedRecord>,
}

/// Runs the named queries against a materials API and normalizes the results.
pub struct QueryRunner {
    api: Arc<dyn MaterialsApi>,
}

impl QueryRunner {
    pub fn new(api: Arc<dyn MaterialsApi>) -> Self {
        Self { api }
    }

    /// Probe the API with a one-document query. Errors propagate: callers
    /// treat an unreachable API as fatal.
    #[instrument(skip(self))]
    pub async fn ping(&self) -> Result<(String, Option<String>)> {
        let query = MaterialQuery::by_ids(&[PING_MATERIAL.to_string()]).with_fields(PING_FIELDS);
        let docs = self.api.search_summary(&query).await?;
        let doc = docs.first().ok_or_else(|| MaterialsError::Api {
            status: 200,
            message: "API connected but no data returned".to_string(),
        })?;
        let id = doc
            .get("material_id")
            .and_then(Value::as_str)
            .ok_or_else(|| MaterialsError::MissingField("material_id".into()))?
            .to_string();
        let formula = doc
            .get("formula_pretty")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok((id, formula))
    }

    /// Run one query, tag every record with `provenance`, and truncate to
    /// `limit` after retrieval. Upstream failures yield an empty list.
    async fn run_query(
        &self,
        query: &MaterialQuery,
        provenance: &str,
        limit: Option<usize>,
    ) -> Vec<NormalizedRecord> {
        counter!(QUERIES_TOTAL, "query_type" => provenance.to_string()).increment(1);
        let started = std::time::Instant::now();

        let mut docs = match self.api.search_summary(query).await {
            Ok(docs) => docs,
            Err(e) => {
                error!(query_type = provenance, "Query failed: {}", e);
                counter!(QUERY_ERRORS_TOTAL, "query_type" => provenance.to_string()).increment(1);
                return Vec::new();
            }
        };
        histogram!(QUERY_DURATION_SECONDS, "query_type" => provenance.to_string())
            .record(started.elapsed().as_secs_f64());

        if let Some(limit) = limit {
            docs.truncate(limit);
        }
        info!(query_type = provenance, "Retrieved {} materials", docs.len());

        docs.iter().map(|doc| normalize(doc, provenance)).collect()
    }

    #[instrument(skip(self, material_ids), fields(count = material_ids.len()))]
    pub async fn query_specific_materials(&self, material_ids: &[String]) -> Vec<NormalizedRecord> {
        let query = MaterialQuery::by_ids(material_ids).with_fields(SPECIFIC_FIELDS);
        self.run_query(&query, PROVENANCE_SPECIFIC_IDS, None).await
    }

    #[instrument(skip(self))]
    pub async fn query_by_elements(&self, elements: &[String], limit: usize) -> Vec<NormalizedRecord> {
        let query = MaterialQuery::by_elements(elements).with_fields(ELEMENT_FIELDS);
        let provenance = elements_provenance(elements);
        self.run_query(&query, &provenance, Some(limit)).await
    }

    #[instrument(skip(self))]
    pub async fn query_semiconductors(&self, band_gap: (f64, f64), limit: usize) -> Vec<NormalizedRecord> {
        let query = MaterialQuery::band_gap_range(band_gap.0, band_gap.1).with_fields(SEMICONDUCTOR_FIELDS);
        self.run_query(&query, PROVENANCE_SEMICONDUCTORS, Some(limit)).await
    }

    #[instrument(skip(self))]
    pub async fn query_stable_materials(&self, e_hull_max: f64, limit: usize) -> Vec<NormalizedRecord> {
        let query = MaterialQuery::energy_above_hull_range(0.0, e_hull_max).with_fields(STABLE_FIELDS);
        self.run_query(&query, PROVENANCE_STABLE, Some(limit)).await
    }

    /// Electronic-structure values for at most `max_materials` ids.
    #[instrument(skip(self, material_ids))]
    pub async fn additional_properties(
        &self,
        material_ids: &[String],
        max_materials: usize,
    ) -> AdditionalProperties {
        let limited: Vec<String> = material_ids.iter().take(max_materials).cloned().collect();
        let mut extra = AdditionalProperties::new();

        let docs = match self.api.search_electronic_structure(&limited).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!("Electronic structure data error: {}", e);
                return extra;
            }
        };

        for doc in &docs {
            let Some(id) = doc.get("material_id").and_then(Value::as_str) else {
                continue;
            };
            let mut values = Map::new();
            for key in ["cbm", "vbm", "is_gap_direct"] {
                values.insert(key.to_string(), doc.get(key).cloned().unwrap_or(Value::Null));
            }
            extra.insert(id.to_string(), values);
        }
        info!("Got electronic structure for {} materials", extra.len());
        extra
    }

    /// Run every query of `plan`, save each result set and the de-duplicated
    /// comprehensive dataset into `output_dir`.
    #[instrument(skip(self, plan, output_dir))]
    pub async fn collect(&self, plan: &CollectionPlan, output_dir: &Path) -> Result<CollectionResult> {
        let mut saved = Vec::new();
        let mut all = Vec::new();

        let mut specific = self.query_specific_materials(&plan.material_ids).await;
        if plan.additional_properties > 0 && !specific.is_empty() {
            let ids: Vec<String> = specific.iter().filter_map(|r| r.material_id.clone()).collect();
            let extra = self.additional_properties(&ids, plan.additional_properties).await;
            attach_additional_properties(&mut specific, &extra);
        }
        saved.extend(save_dataset(&specific, PREFIX_SPECIFIC, output_dir)?);
        all.extend(specific);

        if !plan.elements.is_empty() {
            let by_elements = self.query_by_elements(&plan.elements, plan.element_limit).await;
            let prefix = elements_provenance(&plan.elements);
            saved.extend(save_dataset(&by_elements, &prefix, output_dir)?);
            all.extend(by_elements);
        }

        let semiconductors = self
            .query_semiconductors(plan.band_gap, plan.semiconductor_limit)
            .await;
        saved.extend(save_dataset(&semiconductors, PREFIX_SEMICONDUCTORS, output_dir)?);
        all.extend(semiconductors);

        if let Some((e_hull_max, limit)) = plan.stable {
            let stable = self.query_stable_materials(e_hull_max, limit).await;
            saved.extend(save_dataset(&stable, PREFIX_STABLE, output_dir)?);
            all.extend(stable);
        }

        let unique = dedupe_by_material_id(all);
        info!("Total unique materials: {}", unique.len());
        saved.extend(save_dataset(&unique, PREFIX_COMPREHENSIVE, output_dir)?);

        Ok(CollectionResult { saved, unique })
    }
}

/// Attach electronic-structure values to matching records.
pub fn attach_additional_properties(records: &mut [NormalizedRecord], extra: &AdditionalProperties) {
    for record in records.iter_mut() {
        let Some(values) = record.material_id.as_ref().and_then(|id| extra.get(id)) else {
            continue;
        };
        record.attach_properties(SOURCE_ELECTRONIC_STRUCTURE, values);
    }
}

/// Keep the first record for each material id; records without an id are
/// dropped.
pub fn dedupe_by_material_id(records: Vec<NormalizedRecord>) -> Vec<NormalizedRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| match &r.material_id {
            Some(id) => seen.insert(id.clone()),
            None => false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::normalize::normalize;
    use serde_json::json;

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let records = vec![
            normalize(&json!({"material_id": "mp-1", "band_gap": 1.0}), "a"),
            normalize(&json!({"material_id": "mp-2"}), "a"),
            normalize(&json!({"material_id": "mp-1", "band_gap": 2.0}), "b"),
            normalize(&json!({"formula_pretty": "X"}), "b"),
        ];
        let unique = dedupe_by_material_id(records);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].band_gap, Some(1.0));
        assert_eq!(unique[0].query_type, "a");
    }

    #[test]
    fn attaches_properties_by_id() {
        let mut records = vec![normalize(&json!({"material_id": "mp-149"}), "a")];
        let mut extra = AdditionalProperties::new();
        let mut values = Map::new();
        values.insert("cbm".into(), json!(6.227));
        extra.insert("mp-149".into(), values);

        attach_additional_properties(&mut records, &extra);
        assert_eq!(records[0].properties["electronic_structure"]["cbm"], json!(6.227));
    }
}
