use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::TryStreamExt;
use sqlx::{mysql::MySqlRow, MySqlPool, Row};
use tokio::sync::mpsc::Sender;

use ms_common::{
    config::sync_config::SyncRule,
    error::Error,
    log_info, log_warn,
    meta::{
        col_type::{ColType, TableColumn},
        col_value::ColValue,
        row_data::{RowData, RowType},
    },
    utils::sql_util::SqlUtil,
};

use crate::{extractor::mysql::mysql_meta_manager::MysqlMetaManager, Extractor};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Initial dump: streams each configured table in full through the query
/// protocol before the binlog tail takes over. Values read here are the
/// human-readable representations, the `*2` side of ColValue.
pub struct MysqlSnapshotExtractor {
    pub conn_pool: MySqlPool,
    pub meta_manager: MysqlMetaManager,
    pub database: String,
    pub rules: Vec<SyncRule>,
    pub sender: Sender<RowData>,
}

#[async_trait]
impl Extractor for MysqlSnapshotExtractor {
    async fn extract(&mut self) -> anyhow::Result<()> {
        let rules = self.rules.clone();
        for rule in rules.iter() {
            self.extract_table(rule).await?;
        }
        Ok(())
    }
}

impl MysqlSnapshotExtractor {
    async fn extract_table(&mut self, rule: &SyncRule) -> anyhow::Result<()> {
        let columns = self
            .meta_manager
            .get_columns(&self.database, &rule.source)
            .await?;
        let selected: Vec<TableColumn> = columns
            .iter()
            .filter(|column| rule.fields.is_empty() || rule.fields.contains(&column.name))
            .cloned()
            .collect();
        if selected.is_empty() {
            bail! {Error::ExtractorError(format!(
                "no projectable columns for table {}.{}",
                self.database, rule.source
            ))}
        }

        let column_list = selected
            .iter()
            .map(|column| SqlUtil::escape(&column.name))
            .collect::<Vec<String>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM {}",
            column_list,
            SqlUtil::escape_table(&self.database, &rule.source)
        );
        log_info!("snapshot of {}.{} starts", self.database, rule.source);

        let selected = Arc::new(selected);
        let mut row_count = 0u64;
        let mut stream = sqlx::query(&sql).fetch(&self.conn_pool);
        while let Some(row) = stream.try_next().await? {
            let values = Self::convert_row(&row, &selected);
            let row_data = RowData::new(
                RowType::Insert,
                &self.database,
                &rule.source,
                selected.clone(),
                vec![values],
            );
            if self.sender.send(row_data).await.is_err() {
                bail! {Error::ExtractorError("row dispatch channel closed".into())}
            }
            row_count += 1;
        }

        log_info!(
            "snapshot of {}.{} done, {} rows",
            self.database,
            rule.source,
            row_count
        );
        Ok(())
    }

    fn convert_row(row: &MySqlRow, columns: &[TableColumn]) -> Vec<ColValue> {
        columns
            .iter()
            .enumerate()
            .map(|(i, column)| Self::convert_col(row, i, column))
            .collect()
    }

    fn convert_col(row: &MySqlRow, i: usize, column: &TableColumn) -> ColValue {
        let result = match &column.col_type {
            ColType::Tiny | ColType::Short | ColType::Long | ColType::LongLong => row
                .try_get::<Option<i64>, _>(i)
                .map(|v| v.map_or(ColValue::None, ColValue::LongLong)),
            ColType::Float => row
                .try_get::<Option<f32>, _>(i)
                .map(|v| v.map_or(ColValue::None, ColValue::Float)),
            ColType::Double => row
                .try_get::<Option<f64>, _>(i)
                .map(|v| v.map_or(ColValue::None, ColValue::Double)),
            ColType::Decimal => row
                .try_get::<Option<sqlx::types::BigDecimal>, _>(i)
                .map(|v| v.map_or(ColValue::None, |d| ColValue::Decimal(d.to_string()))),
            ColType::Time => row.try_get::<Option<NaiveTime>, _>(i).map(|v| {
                v.map_or(ColValue::None, |t| {
                    ColValue::Time(t.format(TIME_FORMAT).to_string())
                })
            }),
            ColType::Date => row.try_get::<Option<NaiveDate>, _>(i).map(|v| {
                v.map_or(ColValue::None, |d| {
                    ColValue::Date(d.format(DATE_FORMAT).to_string())
                })
            }),
            ColType::DateTime => row.try_get::<Option<NaiveDateTime>, _>(i).map(|v| {
                v.map_or(ColValue::None, |dt| {
                    ColValue::DateTime(dt.format(DATETIME_FORMAT).to_string())
                })
            }),
            ColType::Timestamp => row.try_get::<Option<DateTime<Utc>>, _>(i).map(|v| {
                v.map_or(ColValue::None, |dt| {
                    ColValue::Timestamp(
                        dt.with_timezone(&Local).format(DATETIME_FORMAT).to_string(),
                    )
                })
            }),
            ColType::Year => row
                .try_get::<Option<u16>, _>(i)
                .map(|v| v.map_or(ColValue::None, ColValue::Year)),
            ColType::String => row
                .try_get::<Option<String>, _>(i)
                .map(|v| v.map_or(ColValue::None, ColValue::String)),
            ColType::Blob => row
                .try_get::<Option<Vec<u8>>, _>(i)
                .map(|v| v.map_or(ColValue::None, ColValue::Blob)),
            ColType::Bit => row
                .try_get::<Option<Vec<u8>>, _>(i)
                .map(|v| v.map_or(ColValue::None, |bytes| ColValue::Bit(Self::bytes_to_u64(&bytes)))),
            ColType::Enum { .. } => row
                .try_get::<Option<String>, _>(i)
                .map(|v| v.map_or(ColValue::None, ColValue::Enum2)),
            ColType::Set { .. } => row
                .try_get::<Option<String>, _>(i)
                .map(|v| v.map_or(ColValue::None, ColValue::Set2)),
            ColType::Json => row
                .try_get::<Option<serde_json::Value>, _>(i)
                .map(|v| v.map_or(ColValue::None, |json| ColValue::Json2(json.to_string()))),
            ColType::Unknown => row
                .try_get::<Option<String>, _>(i)
                .map(|v| v.map_or(ColValue::None, ColValue::String)),
        };

        match result {
            Ok(value) => value,
            // zero dates and other undecodable values degrade to NULL
            Err(e) => {
                log_warn!("snapshot decode failed for column {}: {}", column.name, e);
                ColValue::None
            }
        }
    }

    fn bytes_to_u64(bytes: &[u8]) -> u64 {
        bytes
            .iter()
            .take(8)
            .fold(0u64, |acc, b| (acc << 8) | *b as u64)
    }
}
