pub mod doc_batcher;
