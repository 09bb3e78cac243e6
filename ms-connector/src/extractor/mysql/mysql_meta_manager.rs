use std::{collections::HashMap, sync::Arc};

use anyhow::bail;
use sqlx::{mysql::MySqlPoolOptions, MySqlPool, Row};

use ms_common::{
    error::Error,
    log_info,
    meta::col_type::{ColType, TableColumn},
    position::ReplicationPosition,
};

const COLUMNS_SQL: &str = "SELECT COLUMN_NAME, DATA_TYPE, COLUMN_TYPE \
    FROM information_schema.columns \
    WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
    ORDER BY ORDINAL_POSITION";

/// Resolves and caches column metadata per table. The binlog carries only
/// wire types; names and ENUM/SET value tables come from information_schema
/// and are reused for every row until the table version drifts.
#[derive(Clone)]
pub struct MysqlMetaManager {
    pub conn_pool: MySqlPool,
    cache: HashMap<String, Arc<Vec<TableColumn>>>,
}

impl MysqlMetaManager {
    pub async fn new(url: &str) -> anyhow::Result<Self> {
        let conn_pool = MySqlPoolOptions::new()
            .max_connections(2)
            .connect(url)
            .await?;
        Ok(Self {
            conn_pool,
            cache: HashMap::new(),
        })
    }

    pub async fn get_columns(
        &mut self,
        schema: &str,
        tb: &str,
    ) -> anyhow::Result<Arc<Vec<TableColumn>>> {
        let key = format!("{}.{}", schema, tb);
        if let Some(columns) = self.cache.get(&key) {
            return Ok(columns.clone());
        }

        let columns = self.fetch_columns(schema, tb).await?;
        self.cache.insert(key, columns.clone());
        Ok(columns)
    }

    pub fn invalidate(&mut self, schema: &str, tb: &str) {
        let key = format!("{}.{}", schema, tb);
        if self.cache.remove(&key).is_some() {
            log_info!("invalidated cached metadata for {}", key);
        }
    }

    async fn fetch_columns(&self, schema: &str, tb: &str) -> anyhow::Result<Arc<Vec<TableColumn>>> {
        let rows = sqlx::query(COLUMNS_SQL)
            .bind(schema)
            .bind(tb)
            .fetch_all(&self.conn_pool)
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            let name: String = row.try_get(0)?;
            let data_type: String = row.try_get(1)?;
            let column_type: String = row.try_get(2)?;
            columns.push(TableColumn {
                name,
                col_type: ColType::from_mysql(&data_type, &column_type),
            });
        }

        if columns.is_empty() {
            bail! {Error::ExtractorError(format!(
                "no column metadata found for {}.{}",
                schema, tb
            ))}
        }
        Ok(Arc::new(columns))
    }

    /// The live head of the binlog, used for skip_dump startup and for
    /// fencing the position before a snapshot.
    pub async fn fetch_master_position(&self) -> anyhow::Result<ReplicationPosition> {
        let row = sqlx::query("SHOW MASTER STATUS")
            .fetch_optional(&self.conn_pool)
            .await?;

        match row {
            Some(row) => {
                let name: String = row.try_get(0)?;
                let offset: u64 = row.try_get(1)?;
                Ok(ReplicationPosition::new(&name, offset as u32))
            }
            None => bail! {Error::ExtractorError(
                "SHOW MASTER STATUS returned no rows, is binary logging enabled?".into()
            )},
        }
    }
}
