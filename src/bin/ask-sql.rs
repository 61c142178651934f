//! Reads `{"question": "..."}` from stdin and prints one SELECT statement.
//! With `"execute": true` the statement is also run against the local store
//! and a JSON object with the SQL and its rows is printed instead.

use anyhow::{anyhow, Context};
use mp_harvest::config::Config;
use mp_harvest::console;
use mp_harvest::llm::{prompt::MAX_SAMPLE_ROWS, GeminiProvider, SqlBridge};
use mp_harvest::logging;
use mp_harvest::storage::MaterialStore;
use mp_harvest::types::MaterialRow;
use serde::Deserialize;
use std::io::Read;
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    execute: bool,
}

fn parse_request(raw: &str) -> anyhow::Result<(String, bool)> {
    let request: Request =
        serde_json::from_str(raw).map_err(|e| anyhow!("invalid JSON input: {}", e))?;
    let question = request.question.unwrap_or_default().trim().to_string();
    if question.is_empty() {
        return Err(anyhow!("empty question"));
    }
    Ok((question, request.execute))
}

/// Sample rows for the prompt when a local store exists; absent or unreadable
/// stores just mean no samples.
fn load_samples(config: &Config) -> Vec<MaterialRow> {
    let path = config.database.sqlite_path();
    if !path.exists() {
        return Vec::new();
    }
    match MaterialStore::open(path).and_then(|store| store.sample_materials(MAX_SAMPLE_ROWS)) {
        Ok(rows) => rows,
        Err(e) => {
            warn!("Could not read sample rows: {}", e);
            Vec::new()
        }
    }
}

async fn run() -> anyhow::Result<String> {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("failed to read stdin")?;
    let (question, execute) = parse_request(&raw)?;

    let config = Config::load()?;
    let api_key = config.require_llm_key()?;
    let provider = GeminiProvider::new(api_key, &config.llm)?;
    let bridge = SqlBridge::new(Arc::new(provider), load_samples(&config));

    let sql = bridge
        .answer(&question)
        .await
        .context("exception while calling LLM")?;
    if !execute {
        return Ok(sql);
    }

    let store = MaterialStore::open(config.database.sqlite_path())?;
    let outcome = console::execute(&store, &sql).context("query execution failed")?;
    let body = serde_json::json!({
        "sql": sql,
        "results": outcome.result.to_records(),
        "execution_time": outcome.execution_ms,
    });
    Ok(serde_json::to_string_pretty(&body)?)
}

#[tokio::main]
async fn main() {
    logging::init_bridge_logging();

    match run().await {
        Ok(sql) => println!("{}", sql),
        Err(e) => {
            error!("{:#}", e);
            println!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_question() {
        let (question, execute) = parse_request(r#"{"question": "  stable oxides? "}"#).unwrap();
        assert_eq!(question, "stable oxides?");
        assert!(!execute);
        let (_, execute) = parse_request(r#"{"question": "metals", "execute": true}"#).unwrap();
        assert!(execute);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_request("not json").is_err());
        assert!(parse_request(r#"{"question": ""}"#).is_err());
        assert!(parse_request(r#"{}"#).is_err());
    }
}
