pub mod cache;
pub mod config;
pub mod db;
pub mod discord;
pub mod embedding;
pub mod error;
pub mod history;
pub mod indexer;
pub mod pipeline;
pub mod preferences;
pub mod retry;
pub mod search;
pub mod thread;
pub mod vector;

pub use error::{Error, Result};

use std::sync::Arc;

/// Shared handles the binary builds once and hands to each component.
#[derive(Clone)]
pub struct Data {
    pub config: config::Config,
    pub db: db::Database,
    pub embedder: Arc<dyn embedding::Embedder>,
}

impl Data {
    pub fn pipeline(&self) -> pipeline::IndexingPipeline {
        pipeline::IndexingPipeline::new(self.embedder.clone(), self.db.clone())
    }

    pub fn indexer(&self) -> indexer::GuildIndexer {
        indexer::GuildIndexer::new(
            history::HistoryExtractor::from_config(&self.config),
            self.pipeline(),
        )
    }

    pub fn search(&self) -> search::SemanticSearch {
        search::SemanticSearch::new(self.embedder.clone(), self.db.clone())
    }

    pub fn threads(&self, bot_id: u64) -> thread::ThreadContinuity {
        thread::ThreadContinuity::from_config(self.db.clone(), bot_id, &self.config)
    }
}
