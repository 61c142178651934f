use anyhow::Result;
use async_trait::async_trait;
use mp_harvest::apis::MaterialsApi;
use mp_harvest::error::{MaterialsError, Result as MpResult};
use mp_harvest::pipeline::{CollectionPlan, QueryRunner};
use mp_harvest::types::{MaterialQuery, SourceRecord};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

/// Serves canned documents and records every query it receives.
struct FakeApi {
    summary: Vec<SourceRecord>,
    electronic: Vec<SourceRecord>,
    fail_summary: bool,
    seen: Mutex<Vec<MaterialQuery>>,
}

impl FakeApi {
    fn new(summary: Vec<SourceRecord>) -> Self {
        Self {
            summary,
            electronic: Vec::new(),
            fail_summary: false,
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MaterialsApi for FakeApi {
    fn api_name(&self) -> &'static str {
        "fake"
    }

    async fn search_summary(&self, query: &MaterialQuery) -> MpResult<Vec<SourceRecord>> {
        self.seen.lock().unwrap().push(query.clone());
        if self.fail_summary {
            return Err(MaterialsError::Api {
                status: 503,
                message: "unavailable".into(),
            });
        }
        Ok(self.summary.clone())
    }

    async fn search_electronic_structure(&self, material_ids: &[String]) -> MpResult<Vec<SourceRecord>> {
        Ok(self
            .electronic
            .iter()
            .filter(|d| {
                d["material_id"]
                    .as_str()
                    .map(|id| material_ids.iter().any(|m| m == id))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }
}

fn docs(n: usize) -> Vec<SourceRecord> {
    (0..n)
        .map(|i| json!({"material_id": format!("mp-{i}"), "formula_pretty": "Si", "band_gap": 1.5}))
        .collect()
}

#[tokio::test]
async fn upstream_failure_yields_empty_result() {
    let mut api = FakeApi::new(docs(3));
    api.fail_summary = true;
    let runner = QueryRunner::new(Arc::new(api));

    assert!(runner.query_semiconductors((1.0, 3.0), 20).await.is_empty());
    assert!(runner.ping().await.is_err());
}

#[tokio::test]
async fn limit_is_applied_after_retrieval() {
    let api = Arc::new(FakeApi::new(docs(30)));
    let runner = QueryRunner::new(api.clone());

    let records = runner.query_by_elements(&["Si".to_string(), "O".to_string()], 15).await;
    assert_eq!(records.len(), 15);
    assert!(records.iter().all(|r| r.query_type == "elements_Si-O"));

    let seen = api.seen.lock().unwrap();
    assert_eq!(seen[0].elements, vec!["Si".to_string(), "O".to_string()]);
    assert!(seen[0].fields.contains(&"material_id".to_string()));
}

#[tokio::test]
async fn ping_reports_first_document() -> Result<()> {
    let api = FakeApi::new(vec![json!({"material_id": "mp-149", "formula_pretty": "Si"})]);
    let runner = QueryRunner::new(Arc::new(api));
    let (id, formula) = runner.ping().await?;
    assert_eq!(id, "mp-149");
    assert_eq!(formula.as_deref(), Some("Si"));
    Ok(())
}

#[tokio::test]
async fn collect_saves_each_query_and_a_deduplicated_dataset() -> Result<()> {
    let dir = tempdir()?;
    let mut api = FakeApi::new(docs(4));
    api.electronic = vec![json!({"material_id": "mp-0", "cbm": 6.2, "vbm": 5.6, "is_gap_direct": false})];
    let runner = QueryRunner::new(Arc::new(api));

    let plan = CollectionPlan {
        material_ids: vec!["mp-0".into(), "mp-1".into()],
        stable: Some((0.1, 2)),
        ..CollectionPlan::default()
    };
    let result = runner.collect(&plan, dir.path()).await?;

    // specific, elements_Si, semiconductors, stable_materials, comprehensive
    assert_eq!(result.saved.len(), 5);
    assert_eq!(result.unique.len(), 4);
    assert_eq!(result.unique[0].query_type, "specific_ids");
    assert_eq!(
        result.unique[0].properties["electronic_structure"]["cbm"],
        json!(6.2)
    );

    let comprehensive = result.saved.last().unwrap();
    assert!(comprehensive
        .json
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("comprehensive_dataset_"));
    assert_eq!(comprehensive.records, 4);
    Ok(())
}
