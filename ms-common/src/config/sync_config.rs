use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct MeilisearchConfig {
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_insert_size")]
    pub insert_size: usize,
    #[serde(default = "default_insert_interval")]
    pub insert_interval: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "type", default = "default_source_type")]
    pub db_type: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_server_id")]
    pub server_id: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProgressConfig {
    pub location: String,
    #[serde(default = "default_save_interval")]
    pub save_interval: u64,
    #[serde(default)]
    pub skip_dump: bool,
}

/// One replicated table: source table, destination index, upsert/delete key
/// and the projected columns (empty = all).
#[derive(Clone, Debug, Deserialize)]
pub struct SyncRule {
    pub source: String,
    pub index: String,
    pub primary_key: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

fn default_insert_size() -> usize {
    1000
}

fn default_insert_interval() -> u64 {
    10
}

fn default_source_type() -> String {
    "mysql".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_server_id() -> u64 {
    200129
}

fn default_save_interval() -> u64 {
    10
}
