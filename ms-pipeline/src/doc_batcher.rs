use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;

use ms_common::{
    config::sync_config::SyncRule,
    log_info, log_warn,
    meta::{
        doc_converter::{DocConverter, Document},
        row_data::{RowData, RowType},
    },
};
use ms_connector::Sinker;

const SOFT_DELETE_FIELD: &str = "deleted_at";

#[derive(Debug)]
struct PendingBatch {
    upserts: HashMap<String, Vec<Document>>,
    deletes: HashMap<String, Vec<String>>,
    size: usize,
    last_flush: Instant,
}

impl PendingBatch {
    fn new() -> Self {
        Self {
            upserts: HashMap::new(),
            deletes: HashMap::new(),
            size: 0,
            last_flush: Instant::now(),
        }
    }
}

/// Accumulates per-table upserts and deletes and applies them to the sink
/// when the aggregate count or the flush interval is crossed.
///
/// All entry points hold the one lock for their whole duration, the sink
/// call included: the dispatch path and the flush ticker never interleave,
/// and a slow sink blocks observation, which is the backpressure contract.
pub struct DocBatcher {
    sinker: Box<dyn Sinker + Send + Sync>,
    table_rules: HashMap<String, SyncRule>,
    insert_size: usize,
    insert_interval: Duration,
    pending: Mutex<PendingBatch>,
}

impl DocBatcher {
    pub fn new(
        sinker: Box<dyn Sinker + Send + Sync>,
        table_rules: HashMap<String, SyncRule>,
        insert_size: usize,
        insert_interval: Duration,
    ) -> Self {
        Self {
            sinker,
            table_rules,
            insert_size,
            insert_interval,
            pending: Mutex::new(PendingBatch::new()),
        }
    }

    /// Folds one row event into the pending batch; flushes synchronously on
    /// the dispatch path once the size threshold is reached.
    pub async fn observe(&self, row_data: RowData) -> anyhow::Result<()> {
        let Some(rule) = self.table_rules.get(&row_data.tb) else {
            return Ok(());
        };

        let mut pending = self.pending.lock().await;
        match row_data.row_type {
            RowType::Insert => Self::observe_upserts(&mut pending, &row_data, rule, 0, 1),
            // updates carry [before, after] pairs, only after-images count
            RowType::Update => Self::observe_upserts(&mut pending, &row_data, rule, 1, 2),
            RowType::Delete => Self::observe_deletes(&mut pending, &row_data, rule),
        }

        if pending.size >= self.insert_size {
            self.flush_locked(&mut pending).await?;
        }
        Ok(())
    }

    pub async fn flush(&self) -> anyhow::Result<()> {
        let mut pending = self.pending.lock().await;
        self.flush_locked(&mut pending).await
    }

    pub async fn maybe_flush_due_to_time(&self) -> anyhow::Result<()> {
        let mut pending = self.pending.lock().await;
        if pending.last_flush.elapsed() >= self.insert_interval {
            self.flush_locked(&mut pending).await?;
        }
        Ok(())
    }

    pub async fn pending_size(&self) -> usize {
        self.pending.lock().await.size
    }

    fn observe_upserts(
        pending: &mut PendingBatch,
        row_data: &RowData,
        rule: &SyncRule,
        start: usize,
        stride: usize,
    ) {
        let mut i = start;
        while i < row_data.rows.len() {
            let doc = DocConverter::row_to_document(&row_data.columns, &row_data.rows[i], &rule.fields);
            i += stride;

            // a set deleted_at means the row is logically gone
            let soft_deleted = doc
                .get(SOFT_DELETE_FIELD)
                .map_or(false, |value| !value.is_null());
            if soft_deleted {
                match doc.get(&rule.primary_key) {
                    Some(key) => {
                        let id = DocConverter::doc_value_to_key(key);
                        pending.deletes.entry(row_data.tb.clone()).or_default().push(id);
                        pending.size += 1;
                    }
                    None => log_warn!(
                        "soft-deleted row in {} misses primary key {}, skipped",
                        row_data.tb,
                        rule.primary_key
                    ),
                }
                continue;
            }

            pending.upserts.entry(row_data.tb.clone()).or_default().push(doc);
            pending.size += 1;
        }
    }

    fn observe_deletes(pending: &mut PendingBatch, row_data: &RowData, rule: &SyncRule) {
        let Some(key_index) = row_data
            .columns
            .iter()
            .position(|column| column.name == rule.primary_key)
        else {
            log_warn!(
                "delete on {} misses primary key column {}, skipped",
                row_data.tb,
                rule.primary_key
            );
            return;
        };
        let key_type = &row_data.columns[key_index].col_type;

        for row in row_data.rows.iter() {
            let Some(value) = row.get(key_index) else {
                continue;
            };
            let doc_value = DocConverter::col_value_to_doc_value(value.clone(), key_type);
            let id = DocConverter::doc_value_to_key(&doc_value);
            pending.deletes.entry(row_data.tb.clone()).or_default().push(id);
            pending.size += 1;
        }
    }

    /// Applies the pending batch, upserts before deletes per table. On any
    /// sink error the batch stays pending and the error propagates.
    async fn flush_locked(&self, pending: &mut PendingBatch) -> anyhow::Result<()> {
        if pending.size > 0 {
            let upsert_count: usize = pending.upserts.values().map(Vec::len).sum();
            log_info!(
                "flushing {} upserts and {} deletes",
                upsert_count,
                pending.size - upsert_count
            );
        }

        for (tb, docs) in pending.upserts.iter() {
            if let Some(rule) = self.table_rules.get(tb) {
                self.sinker
                    .add_documents(&rule.index, docs, &rule.primary_key)
                    .await?;
            }
        }
        for (tb, ids) in pending.deletes.iter() {
            if let Some(rule) = self.table_rules.get(tb) {
                self.sinker.delete_documents(&rule.index, ids).await?;
            }
        }

        pending.upserts.clear();
        pending.deletes.clear();
        pending.size = 0;
        pending.last_flush = Instant::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    };

    use anyhow::bail;
    use async_trait::async_trait;

    use ms_common::meta::{
        col_type::{ColType, TableColumn},
        col_value::ColValue,
    };

    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    enum SinkCall {
        Add {
            index: String,
            ids: Vec<String>,
            primary_key: String,
        },
        Delete {
            index: String,
            ids: Vec<String>,
        },
    }

    #[derive(Clone, Default)]
    struct MockSinker {
        calls: Arc<StdMutex<Vec<SinkCall>>>,
        fail: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Sinker for MockSinker {
        async fn add_documents(
            &self,
            index: &str,
            docs: &[Document],
            primary_key: &str,
        ) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                bail!("sink down");
            }
            let ids = docs
                .iter()
                .map(|doc| DocConverter::doc_value_to_key(&doc[primary_key]))
                .collect();
            self.calls.lock().unwrap().push(SinkCall::Add {
                index: index.to_string(),
                ids,
                primary_key: primary_key.to_string(),
            });
            Ok(())
        }

        async fn delete_documents(&self, index: &str, ids: &[String]) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                bail!("sink down");
            }
            self.calls.lock().unwrap().push(SinkCall::Delete {
                index: index.to_string(),
                ids: ids.to_vec(),
            });
            Ok(())
        }
    }

    impl MockSinker {
        fn calls(&self) -> Vec<SinkCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn columns() -> Arc<Vec<TableColumn>> {
        Arc::new(vec![
            TableColumn {
                name: "id".into(),
                col_type: ColType::String,
            },
            TableColumn {
                name: "name".into(),
                col_type: ColType::String,
            },
            TableColumn {
                name: "deleted_at".into(),
                col_type: ColType::DateTime,
            },
        ])
    }

    fn row(id: &str, name: &str, deleted_at: Option<&str>) -> Vec<ColValue> {
        vec![
            ColValue::String(id.into()),
            ColValue::String(name.into()),
            deleted_at.map_or(ColValue::None, |v| ColValue::DateTime(v.into())),
        ]
    }

    fn insert(tb: &str, id: &str) -> RowData {
        RowData::new(RowType::Insert, "app", tb, columns(), vec![row(id, "x", None)])
    }

    fn delete(tb: &str, id: &str) -> RowData {
        RowData::new(RowType::Delete, "app", tb, columns(), vec![row(id, "x", None)])
    }

    fn rules(tables: &[&str]) -> HashMap<String, SyncRule> {
        tables
            .iter()
            .map(|tb| {
                (
                    tb.to_string(),
                    SyncRule {
                        source: tb.to_string(),
                        index: format!("{}_idx", tb),
                        primary_key: "id".to_string(),
                        fields: Vec::new(),
                    },
                )
            })
            .collect()
    }

    fn batcher(sinker: MockSinker, insert_size: usize, insert_interval: Duration) -> DocBatcher {
        DocBatcher::new(
            Box::new(sinker),
            rules(&["books", "users"]),
            insert_size,
            insert_interval,
        )
    }

    #[tokio::test]
    async fn test_size_triggered_flush() {
        let sinker = MockSinker::default();
        let batcher = batcher(sinker.clone(), 3, Duration::from_secs(600));

        batcher.observe(insert("books", "1")).await.unwrap();
        batcher.observe(insert("books", "2")).await.unwrap();
        assert!(sinker.calls().is_empty());
        batcher.observe(insert("books", "3")).await.unwrap();

        assert_eq!(
            sinker.calls(),
            vec![SinkCall::Add {
                index: "books_idx".into(),
                ids: vec!["1".into(), "2".into(), "3".into()],
                primary_key: "id".into(),
            }]
        );
        assert_eq!(batcher.pending_size().await, 0);
    }

    #[tokio::test]
    async fn test_time_triggered_flush() {
        let sinker = MockSinker::default();
        let batcher = batcher(sinker.clone(), 1000, Duration::from_millis(200));

        batcher.observe(insert("books", "1")).await.unwrap();
        batcher.observe(insert("books", "2")).await.unwrap();
        batcher.maybe_flush_due_to_time().await.unwrap();
        assert!(sinker.calls().is_empty());

        tokio::time::sleep(Duration::from_millis(250)).await;
        batcher.maybe_flush_due_to_time().await.unwrap();
        assert_eq!(
            sinker.calls(),
            vec![SinkCall::Add {
                index: "books_idx".into(),
                ids: vec!["1".into(), "2".into()],
                primary_key: "id".into(),
            }]
        );
    }

    #[tokio::test]
    async fn test_soft_delete_reroutes_update_to_delete() {
        let sinker = MockSinker::default();
        let batcher = batcher(sinker.clone(), 1000, Duration::from_secs(600));

        let update = RowData::new(
            RowType::Update,
            "app",
            "users",
            columns(),
            vec![
                row("42", "x", None),
                row("42", "x", Some("2024-01-01 00:00:00")),
            ],
        );
        batcher.observe(update).await.unwrap();
        assert_eq!(batcher.pending_size().await, 1);

        batcher.flush().await.unwrap();
        assert_eq!(
            sinker.calls(),
            vec![SinkCall::Delete {
                index: "users_idx".into(),
                ids: vec!["42".into()],
            }]
        );
    }

    #[tokio::test]
    async fn test_update_observes_after_images_only() {
        let sinker = MockSinker::default();
        let batcher = batcher(sinker.clone(), 1000, Duration::from_secs(600));

        let update = RowData::new(
            RowType::Update,
            "app",
            "books",
            columns(),
            vec![
                row("1", "old", None),
                row("1", "new", None),
                row("2", "old", None),
                row("2", "new", None),
            ],
        );
        batcher.observe(update).await.unwrap();
        assert_eq!(batcher.pending_size().await, 2);

        batcher.flush().await.unwrap();
        assert_eq!(
            sinker.calls(),
            vec![SinkCall::Add {
                index: "books_idx".into(),
                ids: vec!["1".into(), "2".into()],
                primary_key: "id".into(),
            }]
        );
    }

    #[tokio::test]
    async fn test_upserts_flush_before_deletes_per_table() {
        let sinker = MockSinker::default();
        let batcher = batcher(sinker.clone(), 1000, Duration::from_secs(600));

        batcher.observe(insert("books", "1")).await.unwrap();
        batcher.observe(delete("books", "1")).await.unwrap();
        batcher.observe(insert("books", "2")).await.unwrap();
        batcher.flush().await.unwrap();

        assert_eq!(
            sinker.calls(),
            vec![
                SinkCall::Add {
                    index: "books_idx".into(),
                    ids: vec!["1".into(), "2".into()],
                    primary_key: "id".into(),
                },
                SinkCall::Delete {
                    index: "books_idx".into(),
                    ids: vec!["1".into()],
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_sink_error_retains_batch() {
        let sinker = MockSinker::default();
        let batcher = batcher(sinker.clone(), 1000, Duration::from_secs(600));

        batcher.observe(insert("books", "1")).await.unwrap();
        batcher.observe(delete("users", "9")).await.unwrap();

        sinker.fail.store(true, Ordering::SeqCst);
        assert!(batcher.flush().await.is_err());
        assert_eq!(batcher.pending_size().await, 2);

        // recovery replays the same batch
        sinker.fail.store(false, Ordering::SeqCst);
        batcher.flush().await.unwrap();
        assert_eq!(batcher.pending_size().await, 0);
        assert_eq!(sinker.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_flush_is_idempotent_when_empty() {
        let sinker = MockSinker::default();
        let batcher = batcher(sinker.clone(), 1000, Duration::from_secs(600));

        batcher.observe(insert("books", "1")).await.unwrap();
        batcher.flush().await.unwrap();
        batcher.flush().await.unwrap();

        assert_eq!(sinker.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_size_counts_both_collections() {
        let sinker = MockSinker::default();
        let batcher = batcher(sinker.clone(), 1000, Duration::from_secs(600));

        batcher.observe(insert("books", "1")).await.unwrap();
        batcher.observe(insert("users", "2")).await.unwrap();
        batcher.observe(delete("books", "3")).await.unwrap();
        let soft_delete = RowData::new(
            RowType::Insert,
            "app",
            "users",
            columns(),
            vec![row("4", "x", Some("2024-01-01 00:00:00"))],
        );
        batcher.observe(soft_delete).await.unwrap();

        assert_eq!(batcher.pending_size().await, 4);
    }

    #[tokio::test]
    async fn test_unconfigured_table_is_ignored() {
        let sinker = MockSinker::default();
        let batcher = batcher(sinker.clone(), 1, Duration::from_secs(600));

        batcher.observe(insert("orders", "1")).await.unwrap();
        assert_eq!(batcher.pending_size().await, 0);
        assert!(sinker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_field_projection_applies_to_documents() {
        let sinker = MockSinker::default();
        let mut table_rules = rules(&["books"]);
        table_rules.get_mut("books").unwrap().fields = vec!["id".to_string()];
        let batcher = DocBatcher::new(
            Box::new(sinker.clone()),
            table_rules,
            1,
            Duration::from_secs(600),
        );

        batcher.observe(insert("books", "1")).await.unwrap();
        let calls = sinker.calls();
        assert_eq!(calls.len(), 1);
        // only the projected field made it into the document
        match &calls[0] {
            SinkCall::Add { ids, .. } => assert_eq!(ids, &vec!["1".to_string()]),
            other => panic!("unexpected call: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_stringifies_numeric_keys() {
        let sinker = MockSinker::default();
        let numeric_columns = Arc::new(vec![TableColumn {
            name: "id".into(),
            col_type: ColType::Long,
        }]);
        let batcher = batcher(sinker.clone(), 1000, Duration::from_secs(600));

        let row_data = RowData::new(
            RowType::Delete,
            "app",
            "books",
            numeric_columns,
            vec![vec![ColValue::Long(42)]],
        );
        batcher.observe(row_data).await.unwrap();
        batcher.flush().await.unwrap();

        assert_eq!(
            sinker.calls(),
            vec![SinkCall::Delete {
                index: "books_idx".into(),
                ids: vec!["42".into()],
            }]
        );
    }
}
