//! Backward pagination over a channel's message history.
//!
//! Pages are fetched newest to oldest with a "before" cursor and each page is
//! flipped so its messages run oldest first. Human messages are buffered and
//! handed to the indexing pipeline in fixed-size batches.

use crate::config::Config;
use crate::error::Result;
use crate::pipeline::{IndexTotals, IndexingPipeline};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAttachment {
    pub url: String,
    pub content_type: Option<String>,
}

/// A raw message as delivered by the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    pub id: u64,
    pub channel_id: u64,
    pub author_id: u64,
    pub author_name: String,
    pub author_is_bot: bool,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub attachments: Vec<SourceAttachment>,
}

impl SourceMessage {
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// A channel whose history can be read page by page.
#[async_trait]
pub trait MessageSource: Send + Sync {
    fn name(&self) -> &str;

    /// Up to `limit` messages older than `before`, newest first. `None`
    /// starts from the most recent message.
    async fn fetch_before(&self, before: Option<u64>, limit: u8) -> Result<Vec<SourceMessage>>;
}

/// Lazy, one-shot walk over a channel's history.
///
/// Each call to `next_page` performs at most one fetch. The walk ends at the
/// first empty page or the first fetch error and cannot be rewound.
pub struct HistoryPages<'a, S: ?Sized> {
    source: &'a S,
    page_size: u8,
    cursor: Option<u64>,
    finished: bool,
    fetches: usize,
}

impl<'a, S: MessageSource + ?Sized> HistoryPages<'a, S> {
    pub fn new(source: &'a S, page_size: u8) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
            cursor: None,
            finished: false,
            fetches: 0,
        }
    }

    /// Number of fetch calls issued so far, including the terminating one.
    pub fn fetches(&self) -> usize {
        self.fetches
    }

    pub async fn next_page(&mut self) -> Option<Result<Vec<SourceMessage>>> {
        if self.finished {
            return None;
        }

        self.fetches += 1;
        let mut page = match self.source.fetch_before(self.cursor, self.page_size).await {
            Ok(page) => page,
            Err(e) => {
                self.finished = true;
                return Some(Err(e));
            }
        };

        if page.is_empty() {
            self.finished = true;
            return None;
        }

        // The last message of a newest-first page is the oldest one seen.
        let oldest = page.last().map(|m| m.id);
        if let (Some(previous), Some(next)) = (self.cursor, oldest) {
            if next >= previous {
                warn!(
                    "[History] Cursor for #{} did not move back ({} -> {}), stopping",
                    self.source.name(),
                    previous,
                    next
                );
                self.finished = true;
            }
        }
        self.cursor = oldest;

        page.reverse();
        Some(Ok(page))
    }
}

/// Per-channel result of an extraction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTotals {
    /// Non-empty pages received.
    pub pages: usize,
    /// Messages received, bots included.
    pub fetched: usize,
    pub indexed: IndexTotals,
    /// Set when a fetch error cut the channel short.
    pub interrupted: bool,
}

pub struct HistoryExtractor {
    page_size: u8,
    batch_size: usize,
}

impl HistoryExtractor {
    pub fn new(page_size: u8, batch_size: usize) -> Self {
        Self {
            page_size: page_size.clamp(1, 100),
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.history_page_size, config.index_batch_size)
    }

    pub fn pages<'a, S: MessageSource + ?Sized>(&self, source: &'a S) -> HistoryPages<'a, S> {
        HistoryPages::new(source, self.page_size)
    }

    /// Feeds a channel's full history through `pipeline`.
    ///
    /// A fetch error ends the channel early: whatever is still buffered is
    /// dropped and the totals gathered so far are returned.
    pub async fn index_channel<S: MessageSource + ?Sized>(
        &self,
        source: &S,
        pipeline: &IndexingPipeline,
    ) -> ChannelTotals {
        info!("[History] Starting to fetch messages from #{}", source.name());
        let mut totals = ChannelTotals::default();
        let mut buffer: Vec<SourceMessage> = Vec::new();
        let mut pages = self.pages(source);

        while let Some(page) = pages.next_page().await {
            let page = match page {
                Ok(page) => page,
                Err(e) => {
                    error!(
                        "[History] Error fetching messages from #{}: {}",
                        source.name(),
                        e
                    );
                    totals.interrupted = true;
                    return totals;
                }
            };

            totals.pages += 1;
            totals.fetched += page.len();
            buffer.extend(page.into_iter().filter(|m| !m.author_is_bot));

            while buffer.len() >= self.batch_size {
                let batch: Vec<SourceMessage> = buffer.drain(..self.batch_size).collect();
                let outcome = pipeline.process_batch(&batch).await;
                totals.indexed.record(batch.len(), &outcome);
            }

            debug!(
                "[History] Page {} from #{}. Buffer: {}",
                totals.pages,
                source.name(),
                buffer.len()
            );
        }

        if !buffer.is_empty() {
            debug!(
                "[History] Processing final {} messages for #{}",
                buffer.len(),
                source.name()
            );
            let outcome = pipeline.process_batch(&buffer).await;
            totals.indexed.record(buffer.len(), &outcome);
        }

        info!(
            "[History] Finished #{}. Attempted: {}. Inserted: {}.",
            source.name(),
            totals.indexed.attempted,
            totals.indexed.inserted
        );
        totals
    }
}
