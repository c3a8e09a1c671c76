//! Chart snapshot types

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One ranked entry within a chart snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartItem {
    /// External lookup identifier; empty when the chart does not carry one
    pub identifier: String,
    pub title: String,
    pub artist: String,
    /// 1-based chart position (0 when unknown)
    #[serde(default)]
    pub rank: u32,
}

impl ChartItem {
    pub fn new(
        identifier: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            title: title.into(),
            artist: artist.into(),
            rank: 0,
        }
    }

    /// Set chart position
    pub fn at_rank(mut self, rank: u32) -> Self {
        self.rank = rank;
        self
    }

    /// True when the identifier is usable for lookups
    pub fn has_identifier(&self) -> bool {
        !self.identifier.trim().is_empty()
    }
}

/// A dated ranking of items
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartSnapshot {
    pub date: NaiveDate,
    pub items: Vec<ChartItem>,
}

impl ChartSnapshot {
    pub fn new(date: NaiveDate, items: Vec<ChartItem>) -> Self {
        Self { date, items }
    }
}
