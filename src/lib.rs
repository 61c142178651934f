pub mod apis;
pub mod config;
pub mod console;
pub mod constants;
pub mod error;
pub mod llm;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod storage;
pub mod types;
