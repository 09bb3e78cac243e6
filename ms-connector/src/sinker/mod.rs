pub mod meilisearch_sinker;
