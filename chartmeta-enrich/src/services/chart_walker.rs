//! Backward traversal over chart snapshots
//!
//! The walk is a lazy stream: nothing is fetched until the consumer polls.
//! It ends after `count` snapshots, when the source reports
//! `NoMoreSnapshots`, or right after yielding a `ChartError::Unavailable`.
//! It cannot be restarted mid-way; resuming callers build a new walker with
//! [`WalkStart::Before`] the last completed date.

use crate::models::ChartSnapshot;
use crate::services::chart_source::{ChartError, ChartSource};
use chrono::NaiveDate;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Where a walk begins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalkStart {
    /// The most recent snapshot
    Latest,
    /// The snapshot dated exactly this day
    At(NaiveDate),
    /// The snapshot preceding this day's
    Before(NaiveDate),
}

pub struct ChartWalker {
    source: Arc<dyn ChartSource>,
    start: WalkStart,
}

impl ChartWalker {
    pub fn new(source: Arc<dyn ChartSource>, start: WalkStart) -> Self {
        Self { source, start }
    }

    /// Stream at most `count` snapshots, strictly backward in time
    pub fn walk(&self, count: u32) -> BoxStream<'static, Result<ChartSnapshot, ChartError>> {
        let source = Arc::clone(&self.source);
        let start = self.start;

        Box::pin(async_stream::stream! {
            let mut cursor: Option<NaiveDate> = None;

            for index in 0..count {
                let fetched = match (cursor, start) {
                    (None, WalkStart::Latest) => source.latest().await,
                    (None, WalkStart::At(date)) => source.snapshot(date).await,
                    (None, WalkStart::Before(date)) => fetch_previous(source.as_ref(), date).await,
                    (Some(date), _) => fetch_previous(source.as_ref(), date).await,
                };

                match fetched {
                    Ok(snapshot) => {
                        if let Some(previous) = cursor {
                            if snapshot.date >= previous {
                                yield Err(ChartError::Unavailable(format!(
                                    "source returned {} after {}, expected an earlier chart",
                                    snapshot.date, previous
                                )));
                                break;
                            }
                        }
                        tracing::debug!(index, date = %snapshot.date, items = snapshot.items.len(), "Walked to snapshot");
                        cursor = Some(snapshot.date);
                        yield Ok(snapshot);
                    }
                    Err(ChartError::NoMoreSnapshots(date)) => {
                        tracing::info!(walked = index, "No chart before {}, traversal ends early", date);
                        break;
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        })
    }
}

async fn fetch_previous(source: &dyn ChartSource, date: NaiveDate) -> Result<ChartSnapshot, ChartError> {
    let previous = source.previous_date(date).await?;
    source.snapshot(previous).await
}
