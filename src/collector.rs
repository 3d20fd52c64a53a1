use std::sync::Arc;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

use crate::api::{PageFetcher, SearchApi};
use crate::checkpoint::{CheckpointError, CheckpointManager, CheckpointState};
use crate::config::Config;
use crate::db;
use crate::dedup::DedupIndex;
use crate::error::FetchError;
use crate::keywords::{self, KeywordQueue};
use crate::record::{self, ExtractionStatus, ItemRef};

/// Collection stats returned after a run completes or is interrupted.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub processed: usize,
    pub success: usize,
    pub partial: usize,
    pub failed: usize,
    pub duplicates_skipped: usize,
    pub keywords_completed: usize,
}

/// Drives the whole pipeline: keyword queue -> search pages -> concurrent
/// detail fetches -> extraction -> store, with checkpointed progress.
///
/// The collector is the only writer of the store, the checkpoint and the
/// keyword files; fetch workers never touch any of them.
pub struct Collector {
    search: Arc<dyn SearchApi>,
    fetcher: Arc<dyn PageFetcher>,
    conn: Connection,
    keywords: KeywordQueue,
    manager: CheckpointManager,
    state: CheckpointState,
    dedup: DedupIndex,
    config: Config,
}

impl Collector {
    /// Open the store, keyword queue and checkpoint. `fresh` discards any
    /// existing checkpoint; without it a corrupt checkpoint aborts the run
    /// rather than silently restarting from zero.
    pub fn open(
        config: Config,
        search: Arc<dyn SearchApi>,
        fetcher: Arc<dyn PageFetcher>,
        fresh: bool,
    ) -> Result<Self> {
        let conn = db::connect(&config.db_path())?;
        db::init_schema(&conn)?;
        let keywords = KeywordQueue::open(config.keywords_dir())?;

        let manager = CheckpointManager::new(config.checkpoint_path());
        if fresh {
            manager.reset()?;
        }
        let state = match manager.load() {
            Ok(Some(state)) => {
                info!(
                    "resuming: keyword {} of {}, {} records already processed",
                    state.keyword_index + 1,
                    keywords.len(),
                    state.total_processed
                );
                state
            }
            Ok(None) => CheckpointState::fresh(),
            Err(CheckpointError::Corrupt { path, reason }) => {
                bail!(
                    "checkpoint at {} is corrupt ({reason}); \
                     rerun with --fresh to discard it and start over",
                    path.display()
                );
            }
            Err(e) => return Err(e).context("loading checkpoint"),
        };

        // Seed dedup from both sources: the store has every committed record,
        // the checkpoint covers records committed right before a crash whose
        // WAL frame may not have reached the main db file yet.
        let mut dedup = DedupIndex::seed(db::load_identities(&conn)?);
        dedup.extend(state.processed.iter().cloned());
        info!("{} known identities", dedup.len());

        Ok(Self {
            search,
            fetcher,
            conn,
            keywords,
            manager,
            state,
            dedup,
            config,
        })
    }

    /// Run until the keyword queue is exhausted, `max_items` new records have
    /// been committed, or shutdown is signalled. Safe to re-invoke: progress
    /// is durable at page granularity and duplicates are skipped.
    pub async fn run(
        &mut self,
        max_items: Option<usize>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        'keywords: while let Some(keyword) =
            self.keywords.get(self.state.keyword_index).map(str::to_string)
        {
            if *shutdown.borrow() {
                info!("shutdown requested, stopping before next keyword");
                break;
            }
            if self.keywords.is_done(&keyword) {
                self.advance_keyword()?;
                continue;
            }
            if budget_exhausted(max_items, summary.processed) {
                info!("item budget reached");
                break;
            }
            info!(
                "keyword {}/{}: '{}'",
                self.state.keyword_index + 1,
                self.keywords.len(),
                keyword
            );

            let mut pages_this_run = 0u32;
            loop {
                if *shutdown.borrow() {
                    info!("shutdown requested, stopping after committed page");
                    break 'keywords;
                }
                if budget_exhausted(max_items, summary.processed) {
                    info!("item budget reached");
                    break 'keywords;
                }

                let cursor = self.state.page_cursor.clone();
                let search = Arc::clone(&self.search);
                let page = match self
                    .config
                    .retry
                    .run("keyword search", || search.search(&keyword, cursor.as_deref()))
                    .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        // Leave the keyword unfinished so a later run can
                        // retry it; move on rather than stalling the queue.
                        warn!("abandoning keyword '{}': {}", keyword, e);
                        self.advance_keyword()?;
                        continue 'keywords;
                    }
                };
                let next_cursor = page.next_cursor.clone();

                let (items, skipped) = self.select_new(page.items);
                summary.duplicates_skipped += skipped;

                let allowed = remaining_budget(max_items, summary.processed);
                let truncated = items.len() > allowed;
                let mut items = items;
                items.truncate(allowed);

                self.process_page(items, &mut summary).await?;

                if truncated {
                    // The page was only partially committed, so the cursor
                    // must not move past it. Committed identities are in the
                    // store and checkpoint; the rest get picked up next run.
                    self.manager.save(&self.state)?;
                    info!("item budget reached mid-page");
                    break 'keywords;
                }

                self.state.page_cursor = next_cursor;
                self.manager.save(&self.state)?;
                pages_this_run += 1;

                if self.state.page_cursor.is_none() {
                    break;
                }
                if pages_this_run >= self.config.max_pages_per_keyword {
                    debug!("page limit reached for '{}'", keyword);
                    break;
                }
            }

            self.keywords.mark_done(&keyword)?;
            self.advance_keyword()?;
            summary.keywords_completed += 1;
        }

        info!(
            "run finished: {} processed ({} success, {} partial, {} failed), {} duplicates skipped",
            summary.processed,
            summary.success,
            summary.partial,
            summary.failed,
            summary.duplicates_skipped
        );
        Ok(summary)
    }

    fn advance_keyword(&mut self) -> Result<()> {
        self.state.keyword_index += 1;
        self.state.page_cursor = None;
        self.manager.save(&self.state)?;
        Ok(())
    }

    /// Drop items whose identity is already known, plus intra-page repeats.
    fn select_new(&self, items: Vec<ItemRef>) -> (Vec<ItemRef>, usize) {
        let mut fresh = Vec::new();
        let mut in_page = std::collections::HashSet::new();
        let mut skipped = 0;
        for item in items {
            let identity = record::identity_of(&item);
            if self.dedup.seen(&identity) || !in_page.insert(identity) {
                skipped += 1;
            } else {
                fresh.push(item);
            }
        }
        (fresh, skipped)
    }

    /// Fetch one page's items concurrently, committing each record as it
    /// arrives. Every spawned item ends up committed: fetch failures become
    /// all-error records so the identity is never re-attempted.
    async fn process_page(&mut self, items: Vec<ItemRef>, summary: &mut RunSummary) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let total = items.len();

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
                .progress_chars("=> "),
        );

        // Channel: workers send fetch results, this loop extracts and saves.
        let (tx, mut rx) =
            tokio::sync::mpsc::channel::<(ItemRef, Result<String, FetchError>)>(
                self.config.concurrency * 2,
            );

        for item in items {
            let fetcher = Arc::clone(&self.fetcher);
            let sem = Arc::clone(&semaphore);
            let tx = tx.clone();
            let retry = self.config.retry;

            tokio::spawn(async move {
                let _permit = sem.acquire().await.unwrap();
                let url = item.detail_url.clone();
                let result = retry.run("detail fetch", || fetcher.fetch(&url)).await;
                let _ = tx.send((item, result)).await;
            });
        }

        // Drop our copy of tx so rx closes when all spawned tasks finish
        drop(tx);

        let mut since_save = 0usize;
        while let Some((item, result)) = rx.recv().await {
            let rec = match &result {
                Ok(html) => record::assemble(&item, Some(html), None),
                Err(e) => {
                    warn!("fetch failed for {}: {}", item.detail_url, e);
                    record::assemble(&item, None, Some(e))
                }
            };

            db::upsert_record(&self.conn, &rec)?;
            self.dedup.mark(rec.identity.clone());
            self.state.record_outcome(&rec.identity, rec.status);

            summary.processed += 1;
            match rec.status {
                ExtractionStatus::Success => summary.success += 1,
                ExtractionStatus::Partial => summary.partial += 1,
                ExtractionStatus::Failed => summary.failed += 1,
            }

            let found = keywords::discover(&rec);
            if !found.is_empty() {
                let added = self.keywords.add_discovered(found)?;
                if added > 0 {
                    debug!("{} new keywords from '{}'", added, rec.name);
                }
            }

            since_save += 1;
            if since_save >= self.config.checkpoint_every {
                self.manager.save(&self.state)?;
                since_save = 0;
            }
            pb.inc(1);
        }
        if since_save > 0 {
            self.manager.save(&self.state)?;
        }

        pb.finish_and_clear();
        Ok(())
    }
}

fn budget_exhausted(max_items: Option<usize>, processed: usize) -> bool {
    max_items.is_some_and(|max| processed >= max)
}

fn remaining_budget(max_items: Option<usize>, processed: usize) -> usize {
    match max_items {
        Some(max) => max.saturating_sub(processed),
        None => usize::MAX,
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SearchPage;
    use crate::record::identity_of;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::{HashMap, HashSet};
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeSearch {
        pages: HashMap<String, Vec<Vec<ItemRef>>>,
    }

    #[async_trait]
    impl SearchApi for FakeSearch {
        async fn search(
            &self,
            keyword: &str,
            cursor: Option<&str>,
        ) -> Result<SearchPage, FetchError> {
            let idx: usize = match cursor {
                None => 0,
                Some(c) => c.parse().map_err(|_| FetchError::Permanent("cursor".into()))?,
            };
            let Some(pages) = self.pages.get(keyword) else {
                return Ok(SearchPage { items: Vec::new(), next_cursor: None });
            };
            let items = pages.get(idx).cloned().unwrap_or_default();
            let next_cursor = if idx + 1 < pages.len() {
                Some((idx + 1).to_string())
            } else {
                None
            };
            Ok(SearchPage { items, next_cursor })
        }
    }

    struct FakeFetcher {
        body: String,
        fail: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        fn new(body: &str) -> Self {
            Self {
                body: body.to_string(),
                fail: HashSet::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.calls.lock().unwrap().push(url.to_string());
            if self.fail.contains(url) {
                Err(FetchError::Transient("unreachable".into()))
            } else {
                Ok(self.body.clone())
            }
        }
    }

    fn item(id: u64) -> ItemRef {
        ItemRef {
            identifier: format!("{id:09}"),
            title: format!("테스트정 {id}"),
            detail_url: format!("https://terms.naver.com/entry.naver?docId={id:09}"),
        }
    }

    fn test_config(dir: &Path) -> Config {
        Config {
            data_dir: dir.to_path_buf(),
            concurrency: 2,
            retry: crate::error::RetryPolicy::new(2, Duration::from_millis(1)),
            ..Config::default()
        }
    }

    fn search_for(keyword: &str, pages: Vec<Vec<ItemRef>>) -> Arc<FakeSearch> {
        let mut map = HashMap::new();
        map.insert(keyword.to_string(), pages);
        Arc::new(FakeSearch { pages: map })
    }

    fn no_shutdown() -> watch::Receiver<bool> {
        // Receivers keep the last value after the sender drops.
        let (_tx, rx) = watch::channel(false);
        rx
    }

    #[tokio::test]
    async fn collects_commits_and_checkpoints_everything() {
        let dir = tempfile::tempdir().unwrap();
        let html = std::fs::read_to_string("tests/fixtures/gastril.html").unwrap();
        let search = search_for("소화제", vec![vec![item(1), item(2), item(3)]]);
        let fetcher = Arc::new(FakeFetcher::new(&html));

        let mut collector =
            Collector::open(test_config(dir.path()), search, fetcher, false).unwrap();
        let summary = collector.run(None, no_shutdown()).await.unwrap();

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.success, 3);
        assert_eq!(db::record_count(&collector.conn).unwrap(), 3);
        assert_eq!(collector.state.processed.len(), 3);
        assert!(collector.keywords.is_done("소화제"));
        // Every keyword was worked through, including ones discovered from
        // the committed records along the way.
        assert!(collector.keywords.len() >= keywords::DEFAULT_KEYWORDS.len());
        assert_eq!(collector.state.keyword_index, collector.keywords.len());
        // Checkpoint on disk matches in-memory state.
        let on_disk = collector.manager.load().unwrap().unwrap();
        assert_eq!(on_disk, collector.state);
    }

    #[tokio::test]
    async fn known_identities_are_never_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let known = item(1);
        {
            let conn = db::connect(&test_config(dir.path()).db_path()).unwrap();
            db::init_schema(&conn).unwrap();
            let rec = crate::record::Record {
                identity: identity_of(&known),
                name: known.title.clone(),
                fields: Vec::new(),
                status: ExtractionStatus::Success,
                source_url: known.detail_url.clone(),
                collected_at: Utc::now(),
            };
            db::upsert_record(&conn, &rec).unwrap();
        }

        let search = search_for("소화제", vec![vec![item(1), item(2)]]);
        let fetcher = Arc::new(FakeFetcher::new("<html></html>"));
        let mut collector = Collector::open(
            test_config(dir.path()),
            search,
            Arc::clone(&fetcher) as Arc<dyn PageFetcher>,
            false,
        )
        .unwrap();
        let summary = collector.run(None, no_shutdown()).await.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.duplicates_skipped, 1);
        let calls = fetcher.calls();
        assert!(!calls.contains(&known.detail_url));
        assert!(calls.contains(&item(2).detail_url));
    }

    #[tokio::test]
    async fn exhausted_fetch_commits_failed_record_as_processed() {
        let dir = tempfile::tempdir().unwrap();
        let bad = item(7);
        let search = search_for("소화제", vec![vec![bad.clone()]]);
        let mut fetcher = FakeFetcher::new("<html></html>");
        fetcher.fail.insert(bad.detail_url.clone());
        let fetcher = Arc::new(fetcher);

        let mut collector = Collector::open(
            test_config(dir.path()),
            search,
            Arc::clone(&fetcher) as Arc<dyn PageFetcher>,
            false,
        )
        .unwrap();
        let summary = collector.run(None, no_shutdown()).await.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 1);
        // Retried up to the policy's bound, then gave up.
        assert_eq!(fetcher.calls().len(), 2);
        // Stored as failed and marked processed so it is never re-attempted.
        let recs = db::fetch_range(&collector.conn, 1, 1).unwrap();
        assert_eq!(recs[0].status, ExtractionStatus::Failed);
        assert!(recs[0].fields.iter().all(|f| f.value.is_none()));
        assert!(collector.state.processed.contains(&identity_of(&bad)));
    }

    #[tokio::test]
    async fn budget_stops_mid_page_and_a_later_run_finishes_it() {
        let dir = tempfile::tempdir().unwrap();
        let html = std::fs::read_to_string("tests/fixtures/gastril.html").unwrap();
        let pages = vec![vec![item(1), item(2), item(3)], vec![item(4)]];

        let mut collector = Collector::open(
            test_config(dir.path()),
            search_for("소화제", pages.clone()),
            Arc::new(FakeFetcher::new(&html)),
            false,
        )
        .unwrap();
        let summary = collector.run(Some(2), no_shutdown()).await.unwrap();
        assert_eq!(summary.processed, 2);
        // Partially committed page: cursor stays put, keyword stays open.
        assert_eq!(collector.state.page_cursor, None);
        assert_eq!(collector.state.keyword_index, 0);
        assert!(!collector.keywords.is_done("소화제"));
        drop(collector);

        // A fresh process picks up where the first left off.
        let mut collector = Collector::open(
            test_config(dir.path()),
            search_for("소화제", pages),
            Arc::new(FakeFetcher::new(&html)),
            false,
        )
        .unwrap();
        let summary = collector.run(None, no_shutdown()).await.unwrap();
        assert_eq!(summary.processed, 2); // items 3 and 4
        assert_eq!(db::record_count(&collector.conn).unwrap(), 4);
        assert!(collector.keywords.is_done("소화제"));
    }

    #[tokio::test]
    async fn pre_signalled_shutdown_processes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let search = search_for("소화제", vec![vec![item(1)]]);
        let fetcher = Arc::new(FakeFetcher::new("<html></html>"));
        let (tx, rx) = watch::channel(true);

        let mut collector =
            Collector::open(test_config(dir.path()), search, fetcher, false).unwrap();
        let summary = collector.run(None, rx).await.unwrap();
        drop(tx);

        assert_eq!(summary.processed, 0);
        assert_eq!(db::record_count(&collector.conn).unwrap(), 0);
    }

    #[tokio::test]
    async fn corrupt_checkpoint_aborts_unless_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::create_dir_all(&config.data_dir).unwrap();
        std::fs::write(config.checkpoint_path(), b"not json at all").unwrap();

        let err = Collector::open(
            config.clone(),
            search_for("소화제", vec![]),
            Arc::new(FakeFetcher::new("")),
            false,
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("--fresh"));

        // --fresh discards the corrupt file and starts over.
        let collector = Collector::open(
            config,
            search_for("소화제", vec![]),
            Arc::new(FakeFetcher::new("")),
            true,
        )
        .unwrap();
        assert_eq!(collector.state.total_processed, 0);
    }
}
