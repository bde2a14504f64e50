use crate::history::{ChannelTotals, HistoryExtractor, MessageSource};
use crate::pipeline::{IndexTotals, IndexingPipeline};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Summary of one indexing run across several channels.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub channels_processed: usize,
    pub channels_interrupted: Vec<String>,
    pub fetched: usize,
    pub totals: IndexTotals,
    pub elapsed: Duration,
}

impl RunSummary {
    fn record(&mut self, channel: &str, totals: &ChannelTotals) {
        self.channels_processed += 1;
        self.fetched += totals.fetched;
        self.totals.merge(&totals.indexed);
        if totals.interrupted {
            self.channels_interrupted.push(channel.to_string());
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Whole seconds keep the output readable.
        let elapsed = Duration::from_secs(self.elapsed.as_secs());
        write!(
            f,
            "{} channels, {} messages fetched, {} attempted, {} inserted, {} batches skipped in {}",
            self.channels_processed,
            self.fetched,
            self.totals.attempted,
            self.totals.inserted,
            self.totals.skipped_batches,
            humantime::format_duration(elapsed)
        )?;
        if !self.channels_interrupted.is_empty() {
            write!(f, " (interrupted: {})", self.channels_interrupted.join(", "))?;
        }
        Ok(())
    }
}

/// Walks channels one after another, feeding each through the pipeline.
pub struct GuildIndexer {
    extractor: HistoryExtractor,
    pipeline: IndexingPipeline,
}

impl GuildIndexer {
    pub fn new(extractor: HistoryExtractor, pipeline: IndexingPipeline) -> Self {
        Self {
            extractor,
            pipeline,
        }
    }

    /// An interrupted channel does not stop the run; the next channel starts
    /// from scratch.
    pub async fn run<S: MessageSource>(&self, channels: &[S]) -> RunSummary {
        let started = Instant::now();
        let mut summary = RunSummary::default();
        info!("Indexing {} channels", channels.len());

        for channel in channels {
            let totals = self.extractor.index_channel(channel, &self.pipeline).await;
            if totals.interrupted {
                warn!("Channel #{} was only partially indexed", channel.name());
            }
            summary.record(channel.name(), &totals);
        }

        summary.elapsed = started.elapsed();
        info!("Indexing finished: {}", summary);
        summary
    }
}
