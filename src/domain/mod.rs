pub mod error;
pub mod llm_config;
pub mod metadata;
pub mod schema;
