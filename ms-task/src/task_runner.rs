use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time,
};

use ms_common::{
    config::task_config::TaskConfig,
    error::Error,
    log_error, log_info, log_warn,
    meta::row_data::RowData,
    position::{PositionStore, ReplicationPosition},
    utils::table_filter::TableFilter,
};
use ms_connector::{
    extractor::mysql::{
        mysql_cdc_extractor::MysqlCdcExtractor, mysql_meta_manager::MysqlMetaManager,
        mysql_snapshot_extractor::MysqlSnapshotExtractor,
    },
    sinker::meilisearch_sinker::MeilisearchSinker,
    Extractor,
};
use ms_pipeline::doc_batcher::DocBatcher;

/// Owns the pipeline lifecycle: configuring, loading the position,
/// streaming, shutting down. Rows are dispatched serially; the flush ticker
/// and the position saver run beside the dispatch loop.
pub struct TaskRunner {
    config: Arc<TaskConfig>,
}

impl TaskRunner {
    pub fn new(config_path: &str) -> anyhow::Result<Self> {
        Ok(Self {
            config: Arc::new(TaskConfig::new(config_path)?),
        })
    }

    pub fn new_from_str(content: &str) -> anyhow::Result<Self> {
        Ok(Self {
            config: Arc::new(TaskConfig::new_from_str(content)?),
        })
    }

    pub async fn start_task(&self) -> anyhow::Result<()> {
        let config = self.config.clone();

        let sinker = MeilisearchSinker::new(&config.meilisearch.api_url, &config.meilisearch.api_key);
        sinker.health().await?;
        log_info!("meilisearch at {} is available", config.meilisearch.api_url);

        let batcher = Arc::new(DocBatcher::new(
            Box::new(sinker),
            config.table_rules.clone(),
            config.meilisearch.insert_size,
            Duration::from_secs(config.meilisearch.insert_interval),
        ));

        let filter = TableFilter::from_rules(&config.source.database, &config.sync)?;
        let mut meta_manager = MysqlMetaManager::new(&config.mysql_url()).await?;

        let saved_position = PositionStore::load(&config.progress.location)?;
        let start_position = if config.progress.skip_dump {
            // stream from the live head; the saved position is deliberately
            // ignored in this mode
            meta_manager.fetch_master_position().await?
        } else if let Some(position) = saved_position {
            log_info!("resuming from saved position {}", position);
            position
        } else {
            // fence the head first: replaying from the fence covers writes
            // that land while the dump runs
            let fenced = meta_manager.fetch_master_position().await?;
            self.run_snapshot(&meta_manager, &batcher).await?;
            fenced
        };

        let current_position = Arc::new(Mutex::new(start_position.clone()));
        let (sender, mut receiver) = mpsc::channel::<RowData>(config.meilisearch.insert_size);

        let mut extractor = MysqlCdcExtractor {
            meta_manager,
            filter,
            url: config.mysql_url(),
            server_id: config.source.server_id,
            start_position,
            current_position: current_position.clone(),
            sender,
        };

        let mut flush_task = Self::spawn_flush_ticker(
            batcher.clone(),
            Duration::from_secs(config.meilisearch.insert_interval),
        );
        let save_task = Self::spawn_position_saver(
            current_position.clone(),
            config.progress.location.clone(),
            Duration::from_secs(config.progress.save_interval),
        );
        let mut extract_task: JoinHandle<anyhow::Result<()>> =
            tokio::spawn(async move { extractor.extract().await });

        let result = loop {
            tokio::select! {
                row_data = receiver.recv() => match row_data {
                    Some(row_data) => {
                        if let Err(e) = batcher.observe(row_data).await {
                            break Err(e);
                        }
                    }
                    None => {
                        break match (&mut extract_task).await {
                            Ok(extract_result) => extract_result,
                            Err(e) => Err(Error::Unexpected(format!(
                                "extractor task failed: {}", e
                            ))
                            .into()),
                        };
                    }
                },
                flush_result = &mut flush_task => {
                    break match flush_result {
                        Ok(inner) => inner,
                        Err(e) => Err(Error::Unexpected(format!(
                            "flush ticker failed: {}", e
                        ))
                        .into()),
                    };
                }
                _ = tokio::signal::ctrl_c() => {
                    log_info!("shutdown signal received");
                    break Ok(());
                }
            }
        };

        extract_task.abort();
        flush_task.abort();
        save_task.abort();

        if result.is_ok() {
            // orderly shutdown: push out what is pending and checkpoint
            if let Err(e) = batcher.flush().await {
                log_error!("final flush failed: {}", e);
            }
            let position = current_position.lock().await.clone();
            if let Err(e) = PositionStore::save(&config.progress.location, &position) {
                log_warn!("failed to save final position {}: {}", position, e);
            }
        }
        result
    }

    async fn run_snapshot(
        &self,
        meta_manager: &MysqlMetaManager,
        batcher: &Arc<DocBatcher>,
    ) -> anyhow::Result<()> {
        let config = &self.config;
        log_info!("no saved position, dumping {} tables", config.sync.len());

        let (sender, mut receiver) = mpsc::channel::<RowData>(config.meilisearch.insert_size);
        let mut extractor = MysqlSnapshotExtractor {
            conn_pool: meta_manager.conn_pool.clone(),
            meta_manager: meta_manager.clone(),
            database: config.source.database.clone(),
            rules: config.sync.clone(),
            sender,
        };
        let snapshot_task: JoinHandle<anyhow::Result<()>> =
            tokio::spawn(async move { extractor.extract().await });

        while let Some(row_data) = receiver.recv().await {
            batcher.observe(row_data).await?;
        }
        snapshot_task
            .await
            .map_err(|e| Error::Unexpected(format!("snapshot task failed: {}", e)))??;

        // the dump is fully applied before streaming begins
        batcher.flush().await
    }

    fn spawn_flush_ticker(
        batcher: Arc<DocBatcher>,
        interval: Duration,
    ) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                batcher.maybe_flush_due_to_time().await?;
            }
        })
    }

    fn spawn_position_saver(
        current_position: Arc<Mutex<ReplicationPosition>>,
        location: String,
        interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let position = current_position.lock().await.clone();
                if let Err(e) = PositionStore::save(&location, &position) {
                    log_warn!("failed to save position {}: {}", position, e);
                }
            }
        })
    }
}
