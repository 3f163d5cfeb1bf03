//! Rate-limited bulk history loader
//!
//! At startup every discovered instrument needs its candle history before
//! the strategy can say anything useful. The backfiller drains a queue of
//! symbols at most three at a time with a fixed pause between batches, to
//! respect provider request-rate expectations.

use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::common::types::Candle;
use crate::feed::FeedClient;

/// Instruments fetched concurrently per batch
const CONCURRENT_FETCHES: usize = 3;
/// Pause between batches
const BATCH_PAUSE: Duration = Duration::from_millis(250);

/// Emitted when an instrument's history finished loading. The monitor uses
/// it to start the live subscription and run a first analysis pass.
#[derive(Debug)]
pub struct BackfillComplete {
    pub symbol: String,
    pub candles: Vec<Candle>,
}

/// Queue-draining history loader. Construct with [`HistoryBackfiller::new`],
/// feed symbols through the returned sender, spawn [`HistoryBackfiller::run`].
pub struct HistoryBackfiller {
    feed: FeedClient,
    inbox: mpsc::Receiver<String>,
    done: mpsc::Sender<BackfillComplete>,
    history_count: u32,
}

impl HistoryBackfiller {
    pub fn new(
        feed: FeedClient,
        done: mpsc::Sender<BackfillComplete>,
        history_count: u32,
    ) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(1024);
        (
            tx,
            Self {
                feed,
                inbox: rx,
                done,
                history_count,
            },
        )
    }

    pub async fn run(mut self) {
        while let Some(first) = self.inbox.recv().await {
            let mut batch = vec![first];
            while batch.len() < CONCURRENT_FETCHES {
                match self.inbox.try_recv() {
                    Ok(symbol) => batch.push(symbol),
                    Err(_) => break,
                }
            }

            debug!("backfilling batch of {}", batch.len());
            let fetches = batch.into_iter().map(|symbol| {
                let feed = self.feed.clone();
                let count = self.history_count;
                async move {
                    let candles = feed.request_history(&symbol, count, 60).await;
                    (symbol, candles)
                }
            });

            for (symbol, candles) in join_all(fetches).await {
                if candles.is_empty() {
                    // Logged and skipped; the instrument stays unsubscribed
                    // rather than retrying into a failure storm.
                    warn!(symbol, "no history returned, skipping instrument");
                    continue;
                }
                info!(symbol, candles = candles.len(), "history loaded");
                if self
                    .done
                    .send(BackfillComplete { symbol, candles })
                    .await
                    .is_err()
                {
                    return; // monitor is gone
                }
            }

            sleep(BATCH_PAUSE).await;
        }
    }
}
