//! Typed view of the database schema document produced by catalog introspection.
//!
//! Property names are matched after key folding (see `shared::lenient_json`), so
//! every serde name here is the lowercase, separator-free form of the JSON key.

use serde::Deserialize;

fn default_schema_name() -> String {
    "dbo".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseSchema {
    #[serde(rename = "databasename")]
    pub database_name: Option<String>,
    #[serde(rename = "servername")]
    pub server_name: Option<String>,
    #[serde(rename = "generatedat")]
    pub generated_at: Option<String>,
    pub tables: Vec<TableDefinition>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TableDefinition {
    #[serde(rename = "schemaname")]
    pub schema_name: String,
    #[serde(rename = "tablename")]
    pub table_name: String,
    pub aliases: Vec<String>,
    pub columns: Vec<ColumnDefinition>,
    #[serde(rename = "primarykey")]
    pub primary_key: Option<PrimaryKeyDefinition>,
    #[serde(rename = "foreignkeys")]
    pub foreign_keys: Vec<ForeignKeyDefinition>,
}

impl Default for TableDefinition {
    fn default() -> Self {
        Self {
            schema_name: default_schema_name(),
            table_name: String::new(),
            aliases: Vec::new(),
            columns: Vec::new(),
            primary_key: None,
            foreign_keys: Vec::new(),
        }
    }
}

impl TableDefinition {
    /// `schema.table`, the key table configurations join on.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ColumnDefinition {
    #[serde(rename = "columnname")]
    pub column_name: String,
    #[serde(rename = "datatype")]
    pub data_type: Option<String>,
    pub aliases: Vec<String>,
    #[serde(rename = "maxlength")]
    pub max_length: Option<i64>,
    #[serde(rename = "isnullable")]
    pub is_nullable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PrimaryKeyDefinition {
    #[serde(rename = "constraintname")]
    pub constraint_name: Option<String>,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ForeignKeyDefinition {
    #[serde(rename = "constraintname")]
    pub constraint_name: Option<String>,
    #[serde(rename = "referencedschema")]
    pub referenced_schema: String,
    #[serde(rename = "referencedtable")]
    pub referenced_table: String,
    pub columns: Vec<String>,
    #[serde(rename = "referencedcolumns")]
    pub referenced_columns: Vec<String>,
}

impl Default for ForeignKeyDefinition {
    fn default() -> Self {
        Self {
            constraint_name: None,
            referenced_schema: default_schema_name(),
            referenced_table: String::new(),
            columns: Vec::new(),
            referenced_columns: Vec::new(),
        }
    }
}

impl ForeignKeyDefinition {
    /// Column pairs in declaration order; the longer side is truncated.
    pub fn column_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .zip(self.referenced_columns.iter())
            .map(|(from, to)| (from.as_str(), to.as_str()))
    }
}
