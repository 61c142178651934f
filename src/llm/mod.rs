//! Natural-language questions to SQL over the materials store.

pub mod guard;
pub mod prompt;
pub mod provider;

pub use provider::{GeminiProvider, LlmProvider};

use crate::error::Result;
use crate::types::MaterialRow;
use std::sync::Arc;
use tracing::{info, instrument};

/// Turns a question into one validated SELECT statement.
pub struct SqlBridge {
    provider: Arc<dyn LlmProvider>,
    samples: Vec<MaterialRow>,
}

impl SqlBridge {
    pub fn new(provider: Arc<dyn LlmProvider>, samples: Vec<MaterialRow>) -> Self {
        Self { provider, samples }
    }

    #[instrument(skip(self), fields(provider = self.provider.name()))]
    pub async fn answer(&self, question: &str) -> Result<String> {
        let prompt = prompt::build_prompt(question, &self.samples);
        let raw = self.provider.complete(&prompt).await?;
        let sql = guard::clean_sql(&raw)?;
        guard::validate_select(&sql)?;
        info!("Generated {} characters of SQL", sql.len());
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MaterialsError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct MockLlm {
        reply: String,
        last_prompt: Mutex<Option<String>>,
    }

    impl MockLlm {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                last_prompt: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        async fn complete(&self, prompt: &str) -> Result<String> {
            *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
            Ok(self.reply.clone())
        }
        fn name(&self) -> &str {
            "mock"
        }
    }

    #[tokio::test]
    async fn answer_cleans_model_output() {
        let llm = Arc::new(MockLlm::new("```sql\nSELECT COUNT(*) FROM materials\n```"));
        let bridge = SqlBridge::new(llm.clone(), Vec::new());
        let sql = bridge.answer("how many materials?").await.unwrap();
        assert_eq!(sql, "SELECT COUNT(*) FROM materials");
        let prompt = llm.last_prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.contains("how many materials?"));
    }

    #[tokio::test]
    async fn answer_rejects_modifying_sql() {
        let bridge = SqlBridge::new(Arc::new(MockLlm::new("DROP TABLE materials")), Vec::new());
        let err = bridge.answer("remove everything").await.unwrap_err();
        assert!(matches!(err, MaterialsError::UnsafeSql(_)));
    }
}
