pub mod mysql_cdc_extractor;
pub mod mysql_meta_manager;
pub mod mysql_snapshot_extractor;
