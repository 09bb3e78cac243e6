use async_trait::async_trait;

use ms_common::meta::doc_converter::Document;

pub mod extractor;
pub mod sinker;

#[async_trait]
pub trait Extractor {
    async fn extract(&mut self) -> anyhow::Result<()>;
}

/// Document sink. Both operations are keyed by primary key and safe to
/// re-apply; transient failures propagate, retry is the caller's concern.
#[async_trait]
pub trait Sinker {
    async fn add_documents(
        &self,
        index: &str,
        docs: &[Document],
        primary_key: &str,
    ) -> anyhow::Result<()>;

    async fn delete_documents(&self, index: &str, ids: &[String]) -> anyhow::Result<()>;
}
