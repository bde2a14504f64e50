use crate::db::{Database, MessageRecord};
use crate::embedding::Embedder;
use crate::history::SourceMessage;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Stages a batch moves through: `Received → Validated → Embedded → Stored →
/// Done`. A batch that fails a precondition stops at the last stage it
/// reached and is reported as skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStage {
    Received,
    Validated,
    Embedded,
    Stored,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    EmptyBatch,
    EmbeddingFailed(String),
    CardinalityMismatch { expected: usize, got: usize },
    StoreUnavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The batch reached the store. `inserted` may be 0 when every message
    /// was already indexed.
    Stored { inserted: usize },
    Skipped { at: BatchStage, reason: SkipReason },
}

/// Running counts across batches, kept by whoever drives the pipeline.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexTotals {
    pub attempted: usize,
    pub inserted: usize,
    pub skipped_batches: usize,
}

impl IndexTotals {
    pub fn record(&mut self, batch_len: usize, outcome: &BatchOutcome) {
        self.attempted += batch_len;
        match outcome {
            BatchOutcome::Stored { inserted } => self.inserted += inserted,
            BatchOutcome::Skipped { .. } => self.skipped_batches += 1,
        }
    }

    pub fn merge(&mut self, other: &IndexTotals) {
        self.attempted += other.attempted;
        self.inserted += other.inserted;
        self.skipped_batches += other.skipped_batches;
    }
}

/// Embeds and stores one batch of messages at a time.
///
/// Holds no state between batches; the store connection is only checked out
/// after the embedding call has returned.
#[derive(Clone)]
pub struct IndexingPipeline {
    embedder: Arc<dyn Embedder>,
    db: Database,
}

impl IndexingPipeline {
    pub fn new(embedder: Arc<dyn Embedder>, db: Database) -> Self {
        Self { embedder, db }
    }

    pub async fn process_batch(&self, batch: &[SourceMessage]) -> BatchOutcome {
        let mut stage = BatchStage::Received;

        if batch.is_empty() {
            warn!("Invalid batch. Skipping batch");
            return skipped(stage, SkipReason::EmptyBatch);
        }
        stage = advance(stage, BatchStage::Validated);

        info!("Processing {} messages in batch...", batch.len());
        // Positions must line up with `batch`, so missing text becomes "".
        let texts: Vec<String> = batch.iter().map(|m| m.text().to_string()).collect();
        let embeddings = match self.embedder.embed(&texts).await {
            Ok(embeddings) => embeddings,
            Err(e) => {
                error!("Failed to get embeddings. Skipping batch: {}", e);
                return skipped(stage, SkipReason::EmbeddingFailed(e.to_string()));
            }
        };
        stage = advance(stage, BatchStage::Embedded);

        if embeddings.len() != batch.len() {
            error!(
                "Expected {} embeddings, got {}. Skipping batch",
                batch.len(),
                embeddings.len()
            );
            return skipped(
                stage,
                SkipReason::CardinalityMismatch {
                    expected: batch.len(),
                    got: embeddings.len(),
                },
            );
        }

        let records: Vec<MessageRecord> = batch
            .iter()
            .zip(embeddings)
            .map(|(message, embedding)| project(message, embedding))
            .collect();

        let inserted = match self
            .db
            .run_blocking(move |db| db.upsert_batch(&records))
            .await
        {
            Ok(inserted) => inserted,
            Err(e) => {
                error!("Failed to store batch. Skipping batch: {}", e);
                return skipped(stage, SkipReason::StoreUnavailable(e.to_string()));
            }
        };
        stage = advance(stage, BatchStage::Stored);

        advance(stage, BatchStage::Done);
        info!("Batch stored. Inserted {} of {}", inserted, batch.len());
        BatchOutcome::Stored { inserted }
    }
}

fn advance(from: BatchStage, to: BatchStage) -> BatchStage {
    debug!("Batch {:?} -> {:?}", from, to);
    to
}

fn skipped(at: BatchStage, reason: SkipReason) -> BatchOutcome {
    BatchOutcome::Skipped { at, reason }
}

fn project(message: &SourceMessage, embedding: Vec<f32>) -> MessageRecord {
    MessageRecord {
        message_id: message.id,
        author_id: message.author_id,
        channel_id: message.channel_id,
        content: message.text().to_string(),
        created_at: message.created_at,
        author_name: message.author_name.clone(),
        attachment_urls: message.attachments.iter().map(|a| a.url.clone()).collect(),
        embedding: Some(embedding),
    }
}
