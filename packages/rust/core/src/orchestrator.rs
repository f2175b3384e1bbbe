//! End-to-end harvest run: topics → URLs → pages → dataset records.
//!
//! One aggregation loop owns the [`ProgressStore`] and the [`DatasetSink`] and
//! is the only writer of either. Discovery runs as a separate task feeding the
//! loop over a channel; fetch/extract workers run in a [`JoinSet`] and hand
//! their outcome back to the loop. No network I/O happens inside the loop.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use topicharvest_crawler::{FetchOptions, PageFetcher};
use topicharvest_discovery::{
    DuckDuckGoProvider, ResolveOptions, SearchProvider, SeenUrls, TopicResolver,
};
use topicharvest_extract::ContentExtractor;
use topicharvest_shared::{
    HarvestConfig, Outcome, RateLimiter, Result, SeedUrl, StatusCounts, Topic, UrlStatus,
    normalize_url,
};
use topicharvest_storage::{DatasetSink, ProgressStore};

use crate::worker::{WorkResult, harvest_one};

/// Capacity of the discovery → aggregation channel.
const DISCOVERY_BUFFER: usize = 64;

/// Terminal outcomes between rewrites of the completed and error lists.
const VIEW_REFRESH_EVERY: usize = 32;

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// What to harvest in one run.
#[derive(Debug, Clone, Default)]
pub struct HarvestInput {
    /// Topics to search for. Duplicates are resolved once.
    pub topics: Vec<Topic>,
    /// URLs admitted directly, bypassing search.
    pub seeds: Vec<SeedUrl>,
}

/// Result of a harvest run.
#[derive(Debug, Clone, Serialize)]
pub struct HarvestSummary {
    pub run_id: Uuid,
    /// URLs admitted by this run (discovered or seeded).
    pub discovered_new: usize,
    /// URLs completed by this run.
    pub completed: usize,
    /// URLs failed by this run.
    pub failed: usize,
    /// URLs left pending for a later run.
    pub pending: usize,
    /// Status counts over the whole store after the run.
    pub totals: StatusCounts,
    pub output_dir: PathBuf,
    pub error_list_path: PathBuf,
    pub dataset_path: PathBuf,
    pub elapsed: Duration,
    /// Whether the run ended because the stop token fired.
    pub stopped: bool,
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for the harvest run.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a URL is admitted as pending.
    fn url_admitted(&self, url: &str, topic: &Topic);
    /// Called when a URL reaches a terminal state.
    fn url_finished(&self, url: &str, outcome: &Outcome, totals: &StatusCounts);
    /// Called when the run completes.
    fn done(&self, summary: &HarvestSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn url_admitted(&self, _url: &str, _topic: &Topic) {}
    fn url_finished(&self, _url: &str, _outcome: &Outcome, _totals: &StatusCounts) {}
    fn done(&self, _summary: &HarvestSummary) {}
}

// ---------------------------------------------------------------------------
// Harvester
// ---------------------------------------------------------------------------

/// Runs harvests against one configuration, search provider and rate limiter.
pub struct Harvester {
    config: HarvestConfig,
    provider: Arc<dyn SearchProvider>,
    limiter: RateLimiter,
}

impl Harvester {
    /// Create a harvester searching the configured DuckDuckGo endpoint.
    pub fn new(config: HarvestConfig) -> Result<Self> {
        let provider = DuckDuckGoProvider::new(config.search_endpoint.clone(), config.search_timeout)?;
        Self::with_provider(config, Arc::new(provider))
    }

    /// Create a harvester with a custom search provider.
    pub fn with_provider(config: HarvestConfig, provider: Arc<dyn SearchProvider>) -> Result<Self> {
        config.validate()?;
        let limiter = RateLimiter::new(config.search_rate, config.fetch_rate);
        Ok(Self {
            config,
            provider,
            limiter,
        })
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Run one harvest until discovery is exhausted and every admitted URL is
    /// terminal, or until `stop` fires.
    ///
    /// On stop, queued URLs stay pending and in-flight workers finish. Per-URL
    /// failures are recorded, not returned; an `Err` means state could not be
    /// persisted and the run was halted.
    pub async fn run(
        &self,
        input: HarvestInput,
        stop: CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<HarvestSummary> {
        let run_id = Uuid::now_v7();
        let span = info_span!("harvest", %run_id);
        self.run_inner(run_id, input, stop, progress)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        input: HarvestInput,
        stop: CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<HarvestSummary> {
        let start = Instant::now();
        let config = &self.config;

        // --- Phase 1: Load state ---
        progress.phase("Loading progress");
        let store = ProgressStore::load(&config.output_dir)?;
        let sink = DatasetSink::open(&config.output_dir.join(DatasetSink::FILE_NAME))?;
        let mut run = RunState {
            store,
            sink,
            queue: VecDeque::new(),
            discovered_new: 0,
            completed: 0,
            failed: 0,
            progress,
        };
        run.reconcile()?;
        run.apply_seeds(input.seeds)?;
        run.queue_pending();

        let seen: SeenUrls = run
            .store
            .records()
            .iter()
            .map(|r| r.url().to_string())
            .collect();

        info!(
            topics = input.topics.len(),
            known = run.store.len(),
            queued = run.queue.len(),
            output = %config.output_dir.display(),
            "starting harvest"
        );

        // --- Phase 2: Discovery + harvest ---
        progress.phase("Harvesting");
        let run_stop = stop.child_token();
        let (tx, rx) = mpsc::channel(DISCOVERY_BUFFER);
        let resolver = TopicResolver::new(
            Arc::clone(&self.provider),
            self.limiter.clone(),
            seen,
            ResolveOptions {
                max_results: config.urls_per_topic,
                max_pages: config.max_search_pages,
                retry: config.search_retry_policy(),
            },
            run_stop.clone(),
        );
        let discovery = tokio::spawn(
            discover(resolver, dedup_topics(input.topics), config.topic_concurrency, tx)
                .in_current_span(),
        );

        let fetcher = PageFetcher::new(
            self.limiter.clone(),
            FetchOptions::from(config),
            run_stop.clone(),
        )?;
        let extractor = ContentExtractor::new(config.min_text_chars);

        let looped = run
            .aggregate(rx, fetcher, extractor, config.fetch_concurrency, &run_stop)
            .await;
        if looped.is_err() {
            run_stop.cancel();
            discovery.abort();
        }
        if let Err(e) = discovery.await {
            if !e.is_cancelled() {
                warn!(error = %e, "discovery task failed");
            }
        }
        looped?;

        // --- Phase 3: Flush and summarize ---
        progress.phase("Flushing");
        run.sink.flush()?;
        run.store.flush()?;

        let totals = run.store.counts();
        let summary = HarvestSummary {
            run_id,
            discovered_new: run.discovered_new,
            completed: run.completed,
            failed: run.failed,
            pending: totals.pending,
            totals,
            output_dir: config.output_dir.clone(),
            error_list_path: run.store.errors_path(),
            dataset_path: run.sink.path().to_path_buf(),
            elapsed: start.elapsed(),
            stopped: stop.is_cancelled(),
        };

        info!(
            discovered_new = summary.discovered_new,
            completed = summary.completed,
            failed = summary.failed,
            pending = summary.pending,
            stopped = summary.stopped,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "harvest finished"
        );
        progress.done(&summary);
        Ok(summary)
    }
}

/// Resolve topics concurrently and forward each claimed URL to the loop.
async fn discover(
    resolver: TopicResolver,
    topics: Vec<Topic>,
    topic_concurrency: usize,
    tx: mpsc::Sender<(String, Topic)>,
) {
    stream::iter(topics)
        .for_each_concurrent(topic_concurrency, |topic| {
            let resolver = resolver.clone();
            let tx = tx.clone();
            async move {
                let mut urls = resolver.resolve(&topic);
                let mut sent = 0usize;
                while let Some(url) = urls.next().await {
                    if tx.send((url, topic.clone())).await.is_err() {
                        return;
                    }
                    sent += 1;
                }
                debug!(topic = %topic, sent, "topic resolved");
            }
        })
        .await;
}

fn dedup_topics(topics: Vec<Topic>) -> Vec<Topic> {
    let mut seen = HashSet::new();
    topics
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Aggregation loop
// ---------------------------------------------------------------------------

/// State owned by the single writer.
struct RunState<'a> {
    store: ProgressStore,
    sink: DatasetSink,
    queue: VecDeque<(String, Topic)>,
    discovered_new: usize,
    completed: usize,
    failed: usize,
    progress: &'a dyn ProgressReporter,
}

impl RunState<'_> {
    /// Mark pending URLs whose record already reached the dataset as completed.
    fn reconcile(&mut self) -> Result<()> {
        let found: Vec<(String, u64)> = self
            .store
            .pending()
            .filter_map(|r| self.sink.line_of(r.url()).map(|line| (r.url().to_string(), line)))
            .collect();
        for (url, line) in found {
            info!(%url, line, "reconciling pending URL already in dataset");
            self.store.record_outcome(
                &url,
                Outcome::Completed {
                    dataset_line: line,
                    attempts: 0,
                },
            )?;
        }
        Ok(())
    }

    /// Admit new seeds and requeue failed ones; completed seeds are skipped.
    fn apply_seeds(&mut self, seeds: Vec<SeedUrl>) -> Result<()> {
        for seed in seeds {
            let Some(url) = normalize_url(&seed.url) else {
                warn!(url = %seed.url, "skipping unusable seed URL");
                continue;
            };
            match self.store.get(&url).map(|r| r.status()) {
                None => {
                    if self.store.admit(&url, &seed.topic)? {
                        self.discovered_new += 1;
                        self.progress.url_admitted(&url, &seed.topic);
                    }
                }
                Some(UrlStatus::Failed) => {
                    self.store.requeue(&url)?;
                    debug!(%url, "requeued failed seed");
                }
                Some(status) => debug!(%url, ?status, "seed already known"),
            }
        }
        Ok(())
    }

    fn queue_pending(&mut self) {
        let pending: Vec<_> = self
            .store
            .pending()
            .map(|r| (r.url().to_string(), r.topic().clone()))
            .collect();
        self.queue.extend(pending);
    }

    async fn aggregate(
        &mut self,
        mut rx: mpsc::Receiver<(String, Topic)>,
        fetcher: PageFetcher,
        extractor: ContentExtractor,
        fetch_concurrency: usize,
        stop: &CancellationToken,
    ) -> Result<()> {
        let mut workers: JoinSet<(String, WorkResult)> = JoinSet::new();
        let mut discovery_open = true;

        loop {
            while workers.len() < fetch_concurrency && !stop.is_cancelled() {
                let Some((url, topic)) = self.queue.pop_front() else {
                    break;
                };
                workers.spawn(
                    harvest_one(fetcher.clone(), extractor.clone(), url, topic).in_current_span(),
                );
            }

            let queue_done = self.queue.is_empty() || stop.is_cancelled();
            if !discovery_open && workers.is_empty() && queue_done {
                break;
            }

            tokio::select! {
                msg = rx.recv(), if discovery_open => match msg {
                    Some((url, topic)) => self.admit(url, topic)?,
                    None => {
                        debug!("discovery finished");
                        discovery_open = false;
                    }
                },
                Some(joined) = workers.join_next(), if !workers.is_empty() => match joined {
                    Ok((url, result)) => self.finish(&url, result)?,
                    Err(e) => warn!(error = %e, "worker task lost; URL stays pending"),
                },
                else => break,
            }
        }

        if stop.is_cancelled() && !self.queue.is_empty() {
            info!(left = self.queue.len(), "stopped; queued URLs stay pending");
        }
        Ok(())
    }

    fn admit(&mut self, url: String, topic: Topic) -> Result<()> {
        if self.store.admit(&url, &topic)? {
            self.discovered_new += 1;
            self.progress.url_admitted(&url, &topic);
            self.queue.push_back((url, topic));
        }
        Ok(())
    }

    /// Apply a worker result: dataset append first, then the status write.
    fn finish(&mut self, url: &str, result: WorkResult) -> Result<()> {
        let outcome = match result {
            WorkResult::Extracted { record, attempts } => {
                let dataset_line = self.sink.append(&record)?;
                self.completed += 1;
                Outcome::Completed {
                    dataset_line,
                    attempts,
                }
            }
            WorkResult::Failed {
                failure,
                message,
                attempts,
            } => {
                warn!(url, %failure, %message, attempts, "URL failed");
                self.failed += 1;
                Outcome::Failed {
                    failure,
                    message,
                    attempts,
                }
            }
        };
        self.store.record_outcome(url, outcome.clone())?;
        if (self.completed + self.failed) % VIEW_REFRESH_EVERY == 0 {
            self.store.flush_views()?;
        }
        self.progress.url_finished(url, &outcome, &self.store.counts());
        Ok(())
    }
}
