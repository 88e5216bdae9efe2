pub mod use_cases;

pub use use_cases::prompt_cache::PromptCache;
pub use use_cases::sql_generator::SqlGenerator;
pub use use_cases::sql_prompt_builder::{PromptLimits, SqlPromptBuilder};
