use crate::db::{Database, MessageRecord, MAX_SEARCH_ROWS};
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// How many extra candidates to pull per requested result when a filter is
/// applied on top of the unfiltered nearest-neighbour query.
const FILTER_OVERFETCH: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub channels: Vec<u64>,
    pub authors: Vec<u64>,
    pub limit: usize,
}

impl SearchFilter {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_channel(mut self, channel_id: u64) -> Self {
        self.channels.push(channel_id);
        self
    }

    pub fn with_author(mut self, author_id: u64) -> Self {
        self.authors.push(author_id);
        self
    }

    fn is_filtered(&self) -> bool {
        !self.channels.is_empty() || !self.authors.is_empty()
    }

    fn matches(&self, record: &MessageRecord) -> bool {
        (self.channels.is_empty() || self.channels.contains(&record.channel_id))
            && (self.authors.is_empty() || self.authors.contains(&record.author_id))
    }
}

/// Query side of the index: semantic search and per-user history.
#[derive(Clone)]
pub struct SemanticSearch {
    embedder: Arc<dyn Embedder>,
    db: Database,
}

impl SemanticSearch {
    pub fn new(embedder: Arc<dyn Embedder>, db: Database) -> Self {
        Self { embedder, db }
    }

    /// Messages closest in meaning to `query`, nearest first.
    pub async fn search(&self, query: &str, filter: SearchFilter) -> Result<Vec<MessageRecord>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InputInvalid("empty search query"));
        }

        let mut embeddings = self.embedder.embed(&[query.to_string()]).await?;
        let vector = embeddings
            .pop()
            .ok_or_else(|| Error::UpstreamShape("no embedding for query".to_string()))?;

        let limit = filter.limit.min(MAX_SEARCH_ROWS);
        let fetch = if filter.is_filtered() {
            limit.saturating_mul(FILTER_OVERFETCH).min(MAX_SEARCH_ROWS)
        } else {
            limit
        };
        let candidates = self
            .db
            .run_blocking(move |db| db.similarity_search(&vector, fetch))
            .await?;
        debug!("Search for '{}' returned {} candidates", query, candidates.len());

        let results: Vec<_> = candidates
            .into_iter()
            .filter(|r| filter.matches(r))
            .take(limit)
            .collect();
        info!("Found {} search results for query: '{}'", results.len(), query);
        Ok(results)
    }

    pub async fn user_history(&self, user_id: u64, limit: usize) -> Result<Vec<MessageRecord>> {
        self.db
            .run_blocking(move |db| db.user_history(user_id, limit))
            .await
    }
}
