//! Curated business metadata layered over the raw schema: friendly names,
//! aliases, PII/restricted flags, join hints, required filters and terms.

use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LlmMetadata {
    #[serde(rename = "tableconfigurations")]
    pub table_configurations: Vec<TableConfiguration>,
    #[serde(rename = "joinhints")]
    pub join_hints: Vec<JoinHint>,
    #[serde(rename = "requiredfilters")]
    pub required_filters: Vec<String>,
    #[serde(rename = "businessterms")]
    pub business_terms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TableConfiguration {
    #[serde(rename = "schemaname")]
    pub schema_name: String,
    #[serde(rename = "tablename")]
    pub table_name: String,
    #[serde(rename = "friendlyname")]
    pub friendly_name: Option<String>,
    pub description: Option<String>,
    /// Comma-delimited.
    pub aliases: Option<String>,
    #[serde(rename = "columnconfigurations")]
    pub column_configurations: Vec<ColumnConfiguration>,
}

impl Default for TableConfiguration {
    fn default() -> Self {
        Self {
            schema_name: "dbo".to_string(),
            table_name: String::new(),
            friendly_name: None,
            description: None,
            aliases: None,
            column_configurations: Vec::new(),
        }
    }
}

impl TableConfiguration {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ColumnConfiguration {
    #[serde(rename = "columnname")]
    pub column_name: String,
    #[serde(rename = "friendlyname")]
    pub friendly_name: Option<String>,
    pub description: Option<String>,
    /// Comma-delimited.
    pub aliases: Option<String>,
    #[serde(rename = "ispii")]
    pub is_pii: bool,
    #[serde(rename = "isrestricted")]
    pub is_restricted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct JoinHint {
    #[serde(rename = "fromtable")]
    pub from_table: String,
    #[serde(rename = "fromcolumn")]
    pub from_column: String,
    #[serde(rename = "totable")]
    pub to_table: String,
    #[serde(rename = "tocolumn")]
    pub to_column: String,
    pub hint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_default_to_false() {
        let column: ColumnConfiguration =
            serde_json::from_str(r#"{"columnname":"Email"}"#).unwrap();
        assert!(!column.is_pii);
        assert!(!column.is_restricted);
    }

    #[test]
    fn test_empty_document_is_valid() {
        let metadata: LlmMetadata = serde_json::from_str("{}").unwrap();
        assert_eq!(metadata, LlmMetadata::default());
    }
}
