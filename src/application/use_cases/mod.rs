pub mod prompt_cache;
pub mod sql_generator;
pub mod sql_prompt_builder;
