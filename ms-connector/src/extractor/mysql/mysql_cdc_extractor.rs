use std::{collections::HashMap, sync::Arc};

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use mysql_binlog_connector_rust::{
    binlog_client::BinlogClient,
    column::{column_value::ColumnValue, json::json_binary::JsonBinary},
    event::{
        delete_rows_event::DeleteRowsEvent, event_data::EventData,
        update_rows_event::UpdateRowsEvent, write_rows_event::WriteRowsEvent,
    },
};
use tokio::sync::{mpsc::Sender, Mutex};

use ms_common::{
    error::Error,
    log_info,
    meta::{
        col_type::TableColumn,
        col_value::ColValue,
        row_data::{RowData, RowType},
    },
    position::ReplicationPosition,
    utils::table_filter::TableFilter,
};

use crate::{extractor::mysql::mysql_meta_manager::MysqlMetaManager, Extractor};

const ZERO_TIMESTAMP: &str = "0000-00-00 00:00:00";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Tails the binlog and turns row events into RowData dispatched over a
/// bounded channel. Dispatch is serial; when the batcher is busy inside a
/// sink call the channel fills up and the stream read blocks, which is the
/// backpressure path.
pub struct MysqlCdcExtractor {
    pub meta_manager: MysqlMetaManager,
    pub filter: TableFilter,
    pub url: String,
    pub server_id: u64,
    pub start_position: ReplicationPosition,
    pub current_position: Arc<Mutex<ReplicationPosition>>,
    pub sender: Sender<RowData>,
}

#[async_trait]
impl Extractor for MysqlCdcExtractor {
    async fn extract(&mut self) -> anyhow::Result<()> {
        log_info!(
            "MysqlCdcExtractor starts streaming from {}",
            self.start_position
        );

        let mut client = BinlogClient {
            url: self.url.clone(),
            binlog_filename: self.start_position.name.clone(),
            binlog_position: self.start_position.offset,
            server_id: self.server_id,
            gtid_enabled: false,
            gtid_set: String::new(),
            heartbeat_interval_secs: 10,
            timeout_secs: 60,
            keepalive_idle_secs: 0,
            keepalive_interval_secs: 0,
        };
        let mut stream = client.connect().await?;

        // table_id -> (schema, table), valid until the next TableMap event
        let mut table_map: HashMap<u64, (String, String)> = HashMap::new();
        loop {
            let (header, data) = stream.read().await?;
            match data {
                EventData::Rotate(rotate) => {
                    let mut position = self.current_position.lock().await;
                    position.name = rotate.binlog_filename.clone();
                    position.offset = rotate.binlog_position as u32;
                }

                EventData::TableMap(table_map_event) => {
                    table_map.insert(
                        table_map_event.table_id,
                        (
                            table_map_event.database_name.clone(),
                            table_map_event.table_name.clone(),
                        ),
                    );
                }

                EventData::WriteRows(write) => self.handle_write_rows(&table_map, write).await?,
                EventData::UpdateRows(update) => self.handle_update_rows(&table_map, update).await?,
                EventData::DeleteRows(delete) => self.handle_delete_rows(&table_map, delete).await?,

                _ => {}
            }

            // the rotate at stream start carries next_event_position 0
            if header.next_event_position > 0 {
                self.current_position.lock().await.offset = header.next_event_position;
            }
        }
    }
}

impl MysqlCdcExtractor {
    async fn handle_write_rows(
        &mut self,
        table_map: &HashMap<u64, (String, String)>,
        event: WriteRowsEvent,
    ) -> anyhow::Result<()> {
        let Some((schema, tb)) = Self::resolve_table(table_map, event.table_id, &self.filter)
        else {
            return Ok(());
        };

        let columns = self
            .get_columns_checked(&schema, &tb, &event.included_columns)
            .await?;
        let rows: Vec<Vec<ColValue>> = event
            .rows
            .into_iter()
            .map(|row| Self::convert_row(row.column_values))
            .collect();

        self.send_row_data(RowData::new(RowType::Insert, &schema, &tb, columns, rows))
            .await
    }

    async fn handle_update_rows(
        &mut self,
        table_map: &HashMap<u64, (String, String)>,
        event: UpdateRowsEvent,
    ) -> anyhow::Result<()> {
        let Some((schema, tb)) = Self::resolve_table(table_map, event.table_id, &self.filter)
        else {
            return Ok(());
        };

        let columns = self
            .get_columns_checked(&schema, &tb, &event.included_columns_after)
            .await?;
        // flatten to [before, after, before, after, ...]
        let mut rows = Vec::with_capacity(event.rows.len() * 2);
        for (before, after) in event.rows {
            rows.push(Self::convert_row(before.column_values));
            rows.push(Self::convert_row(after.column_values));
        }

        self.send_row_data(RowData::new(RowType::Update, &schema, &tb, columns, rows))
            .await
    }

    async fn handle_delete_rows(
        &mut self,
        table_map: &HashMap<u64, (String, String)>,
        event: DeleteRowsEvent,
    ) -> anyhow::Result<()> {
        let Some((schema, tb)) = Self::resolve_table(table_map, event.table_id, &self.filter)
        else {
            return Ok(());
        };

        let columns = self
            .get_columns_checked(&schema, &tb, &event.included_columns)
            .await?;
        let rows: Vec<Vec<ColValue>> = event
            .rows
            .into_iter()
            .map(|row| Self::convert_row(row.column_values))
            .collect();

        self.send_row_data(RowData::new(RowType::Delete, &schema, &tb, columns, rows))
            .await
    }

    fn resolve_table(
        table_map: &HashMap<u64, (String, String)>,
        table_id: u64,
        filter: &TableFilter,
    ) -> Option<(String, String)> {
        let (schema, tb) = table_map.get(&table_id)?;
        if !filter.matches(schema, tb) {
            return None;
        }
        Some((schema.clone(), tb.clone()))
    }

    /// Cached metadata must line up with the binlog's view of the table;
    /// a column-count mismatch means DDL happened since the last fetch.
    async fn get_columns_checked(
        &mut self,
        schema: &str,
        tb: &str,
        included_columns: &[bool],
    ) -> anyhow::Result<Arc<Vec<TableColumn>>> {
        let mut columns = self.meta_manager.get_columns(schema, tb).await?;
        if columns.len() != included_columns.len() {
            self.meta_manager.invalidate(schema, tb);
            columns = self.meta_manager.get_columns(schema, tb).await?;
        }

        if included_columns.iter().all(|included| *included) {
            return Ok(columns);
        }
        let projected: Vec<TableColumn> = columns
            .iter()
            .zip(included_columns.iter())
            .filter(|(_, included)| **included)
            .map(|(column, _)| column.clone())
            .collect();
        Ok(Arc::new(projected))
    }

    async fn send_row_data(&mut self, row_data: RowData) -> anyhow::Result<()> {
        if self.sender.send(row_data).await.is_err() {
            bail! {Error::ExtractorError("row dispatch channel closed".into())}
        }
        Ok(())
    }

    fn convert_row(column_values: Vec<ColumnValue>) -> Vec<ColValue> {
        column_values.into_iter().map(Self::convert_col).collect()
    }

    fn convert_col(value: ColumnValue) -> ColValue {
        match value {
            ColumnValue::None => ColValue::None,
            ColumnValue::Tiny(v) => ColValue::Tiny(v),
            ColumnValue::Short(v) => ColValue::Short(v),
            ColumnValue::Long(v) => ColValue::Long(v),
            ColumnValue::LongLong(v) => ColValue::LongLong(v),
            ColumnValue::Float(v) => ColValue::Float(v),
            ColumnValue::Double(v) => ColValue::Double(v),
            ColumnValue::Decimal(v) => ColValue::Decimal(v),
            ColumnValue::Time(v) => ColValue::Time(v),
            ColumnValue::Date(v) => ColValue::Date(v),
            ColumnValue::DateTime(v) => ColValue::DateTime(v),
            ColumnValue::Timestamp(v) => ColValue::Timestamp(Self::format_timestamp(v)),
            ColumnValue::Year(v) => ColValue::Year(v),
            ColumnValue::String(v) => ColValue::RawString(v),
            ColumnValue::Blob(v) => ColValue::Blob(v),
            ColumnValue::Bit(v) => ColValue::Bit(v),
            ColumnValue::Set(v) => ColValue::Set(v),
            ColumnValue::Enum(v) => ColValue::Enum(v),
            ColumnValue::Json(v) => match JsonBinary::parse_as_string(&v) {
                Ok(text) => ColValue::Json2(text),
                Err(_) => ColValue::Json(v),
            },
        }
    }

    /// Binlog timestamps arrive as epoch microseconds; render the canonical
    /// local text form so normalization has one parsing path.
    fn format_timestamp(micros: i64) -> String {
        if micros == 0 {
            return ZERO_TIMESTAMP.to_string();
        }
        match DateTime::from_timestamp_micros(micros) {
            Some(dt) => dt
                .with_timezone(&Local)
                .format(DATETIME_FORMAT)
                .to_string(),
            None => ZERO_TIMESTAMP.to_string(),
        }
    }
}
