use tracing::{instrument, warn};

use crate::model::HistoryEntry;
use crate::{PersistenceError, HISTORY_CAPACITY};

/// Result of merging the persisted record into the in-memory store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOutcome {
    pub restored: usize,
    pub discarded_corrupt: bool,
    /// Entries were appended before the load finished, so the merged list
    /// differs from the record and must be written back.
    pub needs_persist: bool,
}

/// Capped, newest-first log of past analyses.
///
/// Only `append` and `clear` mutate the list. Both leave the store in the
/// exact shape that is then persisted as one JSON record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryStore {
    entries: Vec<HistoryEntry>,
    loaded: bool,
    cleared_before_load: bool,
}

impl HistoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    #[must_use]
    pub fn newest(&self) -> Option<&HistoryEntry> {
        self.entries.first()
    }

    pub fn append(&mut self, entry: HistoryEntry) {
        self.entries.insert(0, entry);
        self.entries.truncate(HISTORY_CAPACITY);
    }

    /// Empties the list. A clear issued before the startup load also
    /// drops whatever that load returns.
    pub fn clear(&mut self) {
        self.entries.clear();
        if !self.loaded {
            self.cleared_before_load = true;
        }
    }

    /// Merges the persisted record, if any, behind whatever was appended
    /// in this session. A record that does not parse is logged and treated
    /// as absent. Only the first load has any effect.
    #[instrument(skip(self, record), fields(record_len = record.map_or(0, <[u8]>::len)))]
    pub fn load(&mut self, record: Option<&[u8]>) -> LoadOutcome {
        let appended_before_load = self.entries.len();
        if self.loaded {
            return LoadOutcome {
                restored: 0,
                discarded_corrupt: false,
                needs_persist: false,
            };
        }
        self.loaded = true;

        let record = if std::mem::take(&mut self.cleared_before_load) {
            None
        } else {
            record
        };

        let (restored, discarded_corrupt) = match record.map(Self::decode_record) {
            None => (Vec::new(), false),
            Some(Ok(entries)) => (entries, false),
            Some(Err(e)) => {
                warn!(error = %e, "discarding unreadable history record");
                (Vec::new(), true)
            }
        };

        let restored_count = restored.len();
        self.entries.extend(restored);
        self.entries.truncate(HISTORY_CAPACITY);

        LoadOutcome {
            restored: restored_count.min(HISTORY_CAPACITY),
            discarded_corrupt,
            needs_persist: appended_before_load > 0,
        }
    }

    pub fn to_record(&self) -> Result<Vec<u8>, PersistenceError> {
        serde_json::to_vec(&self.entries)
            .map_err(|e| PersistenceError::SerializationFailed(e.to_string()))
    }

    /// Serializes the list, dropping the oldest entries until the record
    /// fits in `max_bytes`. The newest entry is always kept, so a single
    /// entry larger than the limit still comes back oversized.
    pub fn to_record_within(&mut self, max_bytes: usize) -> Result<Vec<u8>, PersistenceError> {
        let mut record = self.to_record()?;
        let mut evicted = 0usize;
        while record.len() > max_bytes && self.entries.len() > 1 {
            self.entries.pop();
            evicted += 1;
            record = self.to_record()?;
        }
        if evicted > 0 {
            warn!(evicted, bytes = record.len(), max_bytes, "oldest history entries dropped to fit the store");
        }
        Ok(record)
    }

    pub fn decode_record(bytes: &[u8]) -> Result<Vec<HistoryEntry>, PersistenceError> {
        let mut entries: Vec<HistoryEntry> = serde_json::from_slice(bytes)
            .map_err(|e| PersistenceError::ReadFailure(e.to_string()))?;
        entries.truncate(HISTORY_CAPACITY);
        Ok(entries)
    }
}
