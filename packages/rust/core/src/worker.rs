//! Per-URL work: fetch then extract, off the aggregation loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{debug, error};

use topicharvest_crawler::PageFetcher;
use topicharvest_extract::ContentExtractor;
use topicharvest_shared::{DatasetRecord, FailureKind, Topic};

/// What a worker hands back to the aggregation loop.
#[derive(Debug)]
pub(crate) enum WorkResult {
    Extracted {
        record: DatasetRecord,
        attempts: u32,
    },
    Failed {
        failure: FailureKind,
        message: String,
        attempts: u32,
    },
}

/// Harvest one URL. Always returns exactly one result, even if the work panics.
pub(crate) async fn harvest_one(
    fetcher: PageFetcher,
    extractor: ContentExtractor,
    url: String,
    topic: Topic,
) -> (String, WorkResult) {
    let work = AssertUnwindSafe(fetch_and_extract(&fetcher, &extractor, &url, &topic));
    let result = match work.catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(%url, %message, "worker panicked");
            WorkResult::Failed {
                failure: FailureKind::Aborted,
                message: format!("worker panicked: {message}"),
                attempts: 0,
            }
        }
    };
    (url, result)
}

async fn fetch_and_extract(
    fetcher: &PageFetcher,
    extractor: &ContentExtractor,
    url: &str,
    topic: &Topic,
) -> WorkResult {
    let page = match fetcher.fetch(url).await {
        Ok(page) => page,
        Err(e) => {
            debug!(url, error = %e, "fetch failed");
            return WorkResult::Failed {
                failure: e.failure_kind(),
                message: e.message,
                attempts: e.attempts,
            };
        }
    };

    match extractor.extract(&page, topic) {
        Ok(record) => WorkResult::Extracted {
            record,
            attempts: page.attempts,
        },
        Err(e) => {
            debug!(url, error = %e, "extraction rejected page");
            WorkResult::Failed {
                failure: e.failure_kind(),
                message: e.to_string(),
                attempts: page.attempts,
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
