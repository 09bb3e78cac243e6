use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    ConfigError(String),

    #[error("extractor error: {0}")]
    ExtractorError(String),

    #[error("sinker error: {0}")]
    SinkerError(String),

    #[error("position error: {0}")]
    PositionError(String),

    #[error("pull mysql binlog error: {0}")]
    BinlogError(#[from] mysql_binlog_connector_rust::binlog_error::BinlogError),

    #[error("sqlx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("http request error: {0}")]
    HttpError(String),

    #[error("http client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}
