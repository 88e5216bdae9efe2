//! System prompt builder for SQL generation
//!
//! Renders the schema document and the curated business metadata into one
//! fixed-structure system prompt that constrains the model to a single
//! T-SQL SELECT statement. The output is a pure function of its inputs, so it
//! can be memoized (see `prompt_cache`).

use crate::domain::error::{AppError, Result};
use crate::domain::metadata::{ColumnConfiguration, LlmMetadata, TableConfiguration};
use crate::domain::schema::{ColumnDefinition, DatabaseSchema, TableDefinition};
use crate::shared::lenient_json::from_lenient_str;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

const CRLF: &str = "\r\n";

pub const DEFAULT_MAX_TABLES: usize = 200;
pub const DEFAULT_MAX_COLUMNS_PER_TABLE: usize = 200;

/// Caps on how much of the schema is rendered, to keep prompts inside the
/// model's context window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromptLimits {
    pub max_tables: usize,
    pub max_columns_per_table: usize,
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self {
            max_tables: DEFAULT_MAX_TABLES,
            max_columns_per_table: DEFAULT_MAX_COLUMNS_PER_TABLE,
        }
    }
}

const HARD_RULES: [&str; 9] = [
    "1) Output must be a single T-SQL SELECT statement (no INSERT/UPDATE/DELETE/MERGE/DDL).",
    "2) Use ONLY tables and columns that exist in the provided schema.",
    "3) Prefer joins based on declared foreign keys; join hints may clarify intent.",
    "4) Do not invent parameters. Use literal values only if the user provides them.",
    "5) If the request is ambiguous, choose the safest reasonable interpretation.",
    "6) If a field is marked PII or RESTRICTED, do NOT select it.",
    "7) Qualify tables as [schema].[table] and columns as [alias].[column].",
    "8) Use explicit JOIN ... ON ... clauses (no implicit joins).",
    "9) Use GROUP BY correctly and TOP (N) with ORDER BY when applicable.",
];

/// Line-oriented writer; every line ends with CRLF.
struct PromptWriter {
    buf: String,
}

impl PromptWriter {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: String::with_capacity(capacity),
        }
    }

    fn line(&mut self, text: &str) {
        self.buf.push_str(text);
        self.buf.push_str(CRLF);
    }

    fn blank(&mut self) {
        self.buf.push_str(CRLF);
    }

    fn finish(self) -> String {
        self.buf
    }
}

pub struct SqlPromptBuilder;

impl SqlPromptBuilder {
    /// Parse both documents and render the system prompt.
    ///
    /// Blank inputs fail with a validation error naming the parameter;
    /// malformed JSON fails with a parse error.
    pub fn build_system_prompt(
        database_schema_json: &str,
        llm_config_json: &str,
        limits: PromptLimits,
    ) -> Result<String> {
        if database_schema_json.trim().is_empty() {
            return Err(AppError::ValidationError(
                "databaseSchemaJson: database schema JSON is required".to_string(),
            ));
        }
        if llm_config_json.trim().is_empty() {
            return Err(AppError::ValidationError(
                "llmConfigJson: LLM config JSON is required".to_string(),
            ));
        }

        let schema: DatabaseSchema = from_lenient_str(database_schema_json, "database schema JSON")?;
        let metadata: LlmMetadata = from_lenient_str(llm_config_json, "LLM config JSON")?;

        Ok(Self::render(&schema, &metadata, limits))
    }

    pub fn render(schema: &DatabaseSchema, metadata: &LlmMetadata, limits: PromptLimits) -> String {
        let table_configs = index_table_configurations(&metadata.table_configurations);
        let mut out = PromptWriter::with_capacity(32_000);

        Self::write_instructions(&mut out);
        Self::write_database(&mut out, schema);
        Self::write_business_rules(&mut out, metadata);

        out.line("Schema:");
        let tables: Vec<&TableDefinition> = schema.tables.iter().take(limits.max_tables).collect();
        for table in &tables {
            let config = table_configs
                .get(&table.qualified_name().to_lowercase())
                .copied();
            Self::write_table(&mut out, table, config, limits.max_columns_per_table);
        }

        out.line("Output format:");
        out.line("- SQL only. No markdown. No explanation. No JSON.");

        let prompt = out.finish();
        debug!(
            tables_rendered = tables.len(),
            tables_total = schema.tables.len(),
            prompt_chars = prompt.len(),
            "Rendered SQL system prompt"
        );
        prompt
    }

    fn write_instructions(out: &mut PromptWriter) {
        out.line("You are a SQL query generator.");
        out.line("Return EXACTLY ONE SQL Server SELECT statement and nothing else.");
        out.blank();

        out.line("Hard rules:");
        for rule in HARD_RULES {
            out.line(rule);
        }
        out.blank();
    }

    fn write_database(out: &mut PromptWriter, schema: &DatabaseSchema) {
        out.line("Database:");
        out.line(&format!(
            " - Name: {}",
            schema.database_name.as_deref().unwrap_or("(unknown)")
        ));
        out.line(&format!(
            " - Server: {}",
            schema.server_name.as_deref().unwrap_or("(unknown)")
        ));
        out.blank();
    }

    fn write_business_rules(out: &mut PromptWriter, metadata: &LlmMetadata) {
        if !metadata.join_hints.is_empty() {
            out.line("Join Hints:");
            for hint in &metadata.join_hints {
                let comment = match hint.hint.as_deref() {
                    Some(text) if !text.trim().is_empty() => format!("  // {}", text),
                    _ => String::new(),
                };
                out.line(&format!(
                    " - {}.[{}] -> {}.[{}]{}",
                    hint.from_table, hint.from_column, hint.to_table, hint.to_column, comment
                ));
            }
            out.blank();
        }

        if !metadata.required_filters.is_empty() {
            out.line("Required Filters:");
            for filter in &metadata.required_filters {
                out.line(&format!(" - {}", filter));
            }
            out.blank();
        }

        if !metadata.business_terms.is_empty() {
            out.line("Business Terms:");
            for term in &metadata.business_terms {
                out.line(&format!(" - {}", term));
            }
            out.blank();
        }
    }

    fn write_table(
        out: &mut PromptWriter,
        table: &TableDefinition,
        config: Option<&TableConfiguration>,
        max_columns: usize,
    ) {
        out.line(&format!("- Table: [{}].[{}]", table.schema_name, table.table_name));

        if let Some(name) = config.and_then(|c| non_blank(c.friendly_name.as_deref())) {
            out.line(&format!("  FriendlyName: {}", name));
        }
        if let Some(description) = config.and_then(|c| non_blank(c.description.as_deref())) {
            out.line(&format!("  Description: {}", description));
        }

        let aliases = merge_aliases(config.and_then(|c| c.aliases.as_deref()), &table.aliases);
        if !aliases.is_empty() {
            out.line(&format!("  Aliases: {}", aliases.join(", ")));
        }

        if let Some(pk) = table.primary_key.as_ref().filter(|pk| !pk.columns.is_empty()) {
            let columns: Vec<String> = pk.columns.iter().map(|c| format!("[{}]", c)).collect();
            out.line(&format!("  PrimaryKey: ({})", columns.join(", ")));
        }

        if !table.foreign_keys.is_empty() {
            out.line("  ForeignKeys:");
            for fk in &table.foreign_keys {
                for (column, referenced) in fk.column_pairs() {
                    out.line(&format!(
                        "    - [{}].[{}].[{}] -> [{}].[{}].[{}]",
                        table.schema_name,
                        table.table_name,
                        column,
                        fk.referenced_schema,
                        fk.referenced_table,
                        referenced
                    ));
                }
            }
        }

        let column_configs = index_column_configurations(config);

        out.line("  Columns:");
        for column in table.columns.iter().take(max_columns) {
            let column_config = column_configs
                .get(&column.column_name.to_lowercase())
                .copied();
            out.line(&render_column(column, column_config));
        }

        out.blank();
    }
}

fn render_column(column: &ColumnDefinition, config: Option<&ColumnConfiguration>) -> String {
    let mut flags = Vec::new();
    if !column.is_nullable {
        flags.push("NOT NULL");
    }
    if config.map(|c| c.is_pii).unwrap_or(false) {
        flags.push("PII");
    }
    if config.map(|c| c.is_restricted).unwrap_or(false) {
        flags.push("RESTRICTED");
    }

    let mut data_type = column.data_type.clone().unwrap_or_else(|| "unknown".to_string());
    if let Some(max_length) = column.max_length {
        data_type.push_str(&format!("({})", max_length));
    }

    let mut line = format!("    - [{}] : {}", column.column_name, data_type);
    if !flags.is_empty() {
        line.push_str(&format!(" [{}]", flags.join(", ")));
    }

    let aliases = merge_aliases(config.and_then(|c| c.aliases.as_deref()), &column.aliases);
    if !aliases.is_empty() {
        line.push_str(&format!("  Aliases: {}", aliases.join(", ")));
    }
    if let Some(name) = config.and_then(|c| non_blank(c.friendly_name.as_deref())) {
        line.push_str(&format!("  FriendlyName: {}", name));
    }
    if let Some(description) = config.and_then(|c| non_blank(c.description.as_deref())) {
        line.push_str(&format!("  Description: {}", description));
    }

    line
}

/// Config aliases (comma-delimited) first, then the schema's own, trimmed and
/// deduplicated case-insensitively in first-seen order.
pub fn merge_aliases(configured: Option<&str>, native: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    configured
        .unwrap_or_default()
        .split(',')
        .chain(native.iter().map(String::as_str))
        .map(str::trim)
        .filter(|alias| !alias.is_empty())
        .filter(|alias| seen.insert(alias.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Case-insensitive `schema.table` lookup. The first configuration for a table wins.
fn index_table_configurations(configs: &[TableConfiguration]) -> HashMap<String, &TableConfiguration> {
    let mut index = HashMap::with_capacity(configs.len());
    for config in configs {
        index
            .entry(config.qualified_name().to_lowercase())
            .or_insert(config);
    }
    index
}

fn index_column_configurations(
    config: Option<&TableConfiguration>,
) -> HashMap<String, &ColumnConfiguration> {
    let mut index = HashMap::new();
    if let Some(config) = config {
        for column in &config.column_configurations {
            index.entry(column.column_name.to_lowercase()).or_insert(column);
        }
    }
    index
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
