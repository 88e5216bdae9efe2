use crate::application::use_cases::sql_generator::SqlGenerator;
use crate::domain::error::{AppError, Result};
use crate::infrastructure::config::{ConfigService, Settings};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Turn a natural-language question into a single T-SQL SELECT statement
#[derive(Parser, Debug)]
#[command(name = "datagenie", version)]
#[command(about = "Generate one T-SQL SELECT statement from a natural-language question")]
pub struct CliArgs {
    /// The question, e.g. "How many orders shipped last month?"
    #[arg(required_unless_present_any = ["print_prompt", "set_api_key", "delete_api_key"])]
    pub question: Option<String>,

    /// Database schema JSON file
    #[arg(short, long, required_unless_present_any = ["set_api_key", "delete_api_key"])]
    pub schema: Option<PathBuf>,

    /// Business metadata JSON file (table descriptions, join hints, filters, terms)
    #[arg(short, long)]
    pub metadata: Option<PathBuf>,

    /// TOML settings file (default: ./datagenie.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print the system prompt and exit without calling a model
    #[arg(long)]
    pub print_prompt: bool,

    /// Extra free-text guidance sent with the question
    #[arg(long)]
    pub hints: Option<String>,

    /// Store an API key in the OS keyring for the configured LLM type
    #[arg(long, value_name = "KEY", conflicts_with = "delete_api_key")]
    pub set_api_key: Option<String>,

    /// Remove the stored API key for the configured LLM type
    #[arg(long)]
    pub delete_api_key: bool,
}

async fn read_document(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AppError::IoError(format!("{}: {}", path.display(), e)))
}

/// Run one invocation and return what should be printed on stdout.
pub async fn execute(args: CliArgs) -> Result<String> {
    let config_service = ConfigService::new();

    if let Some(key) = args.set_api_key.as_deref() {
        let settings = Settings::load(args.config.as_deref())?;
        config_service.save_api_key(settings.llm.llm_type, key)?;
        return Ok(format!(
            "API key stored for {}",
            settings.llm.llm_type.key_name()
        ));
    }
    if args.delete_api_key {
        let settings = Settings::load(args.config.as_deref())?;
        config_service.delete_api_key(settings.llm.llm_type)?;
        return Ok(format!(
            "API key removed for {}",
            settings.llm.llm_type.key_name()
        ));
    }

    let schema_path = args
        .schema
        .as_deref()
        .ok_or_else(|| AppError::ValidationError("--schema is required".to_string()))?;
    let schema_json = read_document(schema_path).await?;
    let metadata_json = match args.metadata.as_deref() {
        Some(path) => read_document(path).await?,
        None => "{}".to_string(),
    };

    let settings = if args.print_prompt {
        Settings::load(args.config.as_deref())?
    } else {
        config_service.load_settings(args.config.as_deref())?
    };
    let generator = SqlGenerator::from_settings(&settings)?;

    if args.print_prompt {
        let prompt = generator.system_prompt(&schema_json, &metadata_json)?;
        return Ok(prompt.to_string());
    }

    let question = args.question.unwrap_or_default();
    let outcome = tokio::select! {
        result = generator.generate_statement(&question, &schema_json, &metadata_json, args.hints.as_deref()) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting down backend");
            Err(AppError::Internal("Interrupted".to_string()))
        }
    };

    generator.shutdown().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use figment::Jail;

    #[test]
    fn test_cli_definition_is_consistent() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_parse_full_invocation() {
        let args = CliArgs::try_parse_from([
            "datagenie",
            "--schema",
            "schema.json",
            "--metadata",
            "meta.json",
            "--hints",
            "Use Sales",
            "Top 5 customers",
        ])
        .unwrap();
        assert_eq!(args.question.as_deref(), Some("Top 5 customers"));
        assert_eq!(args.schema, Some(PathBuf::from("schema.json")));
        assert_eq!(args.hints.as_deref(), Some("Use Sales"));
        assert!(!args.print_prompt);
    }

    #[test]
    fn test_question_and_schema_are_required() {
        assert!(CliArgs::try_parse_from(["datagenie", "--schema", "s.json"]).is_err());
        assert!(CliArgs::try_parse_from(["datagenie", "question"]).is_err());
        assert!(CliArgs::try_parse_from(["datagenie", "--schema", "s.json", "--print-prompt"]).is_ok());
        assert!(CliArgs::try_parse_from(["datagenie", "--set-api-key", "sk-1"]).is_ok());
    }

    #[test]
    fn test_print_prompt_renders_without_backend() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "schema.json",
                r#"{ "databaseName": "Shop", "tables": [ { "tableName": "Orders", "columns": [] } ] }"#,
            )?;
            let args = CliArgs::try_parse_from([
                "datagenie",
                "--schema",
                "schema.json",
                "--print-prompt",
            ])
            .unwrap();

            let runtime = tokio::runtime::Runtime::new().unwrap();
            let prompt = runtime.block_on(execute(args)).unwrap();
            assert!(prompt.contains(" - Name: Shop"));
            assert!(prompt.contains("- Table: [dbo].[Orders]"));
            Ok(())
        });
    }

    #[test]
    fn test_missing_schema_file_is_io_error() {
        Jail::expect_with(|_jail| {
            let args = CliArgs::try_parse_from([
                "datagenie",
                "--schema",
                "missing.json",
                "--print-prompt",
            ])
            .unwrap();

            let runtime = tokio::runtime::Runtime::new().unwrap();
            let err = runtime.block_on(execute(args)).unwrap_err();
            assert!(matches!(err, AppError::IoError(ref msg) if msg.contains("missing.json")));
            Ok(())
        });
    }
}
