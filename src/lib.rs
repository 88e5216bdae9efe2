mod app;
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
pub mod shared;

pub use app::run;
pub use application::{PromptCache, PromptLimits, SqlGenerator, SqlPromptBuilder};
pub use domain::error::{AppError, Result};
pub use infrastructure::config::{ConfigService, Settings};
pub use infrastructure::llm_clients::{BackendDispatcher, GenerationRequest, SqlBackend};
pub use infrastructure::response::{clean_sql_response, format_sql};
