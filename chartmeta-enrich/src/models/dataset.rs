//! Ordered, identifier-keyed collection of enriched records

use super::{ChartItem, EnrichedRecord};
use std::collections::HashMap;

/// One row of a dataset table
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetRow {
    Record(EnrichedRecord),
    /// Title without enrichment, from a hand-edited or legacy table
    Unresolved(ChartItem),
}

/// Records in discovery order, unique by identifier
///
/// Unresolved rows come only from persisted tables whose enrichment columns
/// are blank. The pipeline never produces them; they are carried through in
/// place until the reconciler fills them in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    rows: Vec<DatasetRow>,
    /// identifier -> position in `rows`, records only
    index: HashMap<String, usize>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of complete records
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Every row in table order
    pub fn rows(&self) -> &[DatasetRow] {
        &self.rows
    }

    pub fn records(&self) -> impl Iterator<Item = &EnrichedRecord> {
        self.rows.iter().filter_map(|row| match row {
            DatasetRow::Record(record) => Some(record),
            DatasetRow::Unresolved(_) => None,
        })
    }

    pub fn unresolved_count(&self) -> usize {
        self.rows.len() - self.index.len()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.records().map(|r| r.identifier.as_str())
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.index.contains_key(identifier)
    }

    pub fn get(&self, identifier: &str) -> Option<&EnrichedRecord> {
        match self.rows.get(*self.index.get(identifier)?) {
            Some(DatasetRow::Record(record)) => Some(record),
            _ => None,
        }
    }

    /// First complete record with this title
    pub fn find_by_title(&self, title: &str) -> Option<&EnrichedRecord> {
        self.records().find(|r| r.title == title)
    }

    /// Append a record; returns false (and drops it) if the identifier exists
    pub fn insert(&mut self, record: EnrichedRecord) -> bool {
        if self.index.contains_key(&record.identifier) {
            return false;
        }
        self.index.insert(record.identifier.clone(), self.rows.len());
        self.rows.push(DatasetRow::Record(record));
        true
    }

    /// Replace the record with the same identifier in place, or append
    ///
    /// Returns the replaced record, if any.
    pub fn upsert(&mut self, record: EnrichedRecord) -> Option<EnrichedRecord> {
        match self.index.get(&record.identifier) {
            Some(&i) => match std::mem::replace(&mut self.rows[i], DatasetRow::Record(record)) {
                DatasetRow::Record(old) => Some(old),
                DatasetRow::Unresolved(_) => None,
            },
            None => {
                self.insert(record);
                None
            }
        }
    }

    pub fn push_unresolved(&mut self, item: ChartItem) {
        self.rows.push(DatasetRow::Unresolved(item));
    }

    /// Fill in the unresolved row titled `title` with `record`
    ///
    /// The record takes the first such row's position and any further
    /// unresolved rows with that title are dropped. A record whose
    /// identifier is already present replaces that record instead; with no
    /// matching row it is upserted.
    pub fn resolve(&mut self, title: &str, record: EnrichedRecord) {
        let is_match =
            |row: &DatasetRow| matches!(row, DatasetRow::Unresolved(item) if item.title == title);

        match self.rows.iter().position(is_match) {
            Some(i) if !self.index.contains_key(&record.identifier) => {
                self.index.insert(record.identifier.clone(), i);
                self.rows[i] = DatasetRow::Record(record);
            }
            _ => {
                self.upsert(record);
            }
        }

        if self.rows.iter().any(is_match) {
            self.rows.retain(|row| !is_match(row));
            self.reindex();
        }
    }

    fn reindex(&mut self) {
        self.index = self
            .rows
            .iter()
            .enumerate()
            .filter_map(|(i, row)| match row {
                DatasetRow::Record(record) => Some((record.identifier.clone(), i)),
                DatasetRow::Unresolved(_) => None,
            })
            .collect();
    }
}
