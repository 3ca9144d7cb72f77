//! The ordered transcript exposed to presentation layers.

use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};

use crate::transcript::{EntryId, TranscriptEntry};

/// Describes one completed mutation of a [`TranscriptStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreChange {
    /// An entry was added at the tail.
    Appended(EntryId),
    /// The entry at the tail was replaced by a newer copy.
    Replaced(EntryId),
    /// An entry was removed.
    Removed(EntryId),
    /// All entries were removed.
    Cleared,
}

/// Errors returned when a store precondition does not hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreError {
    /// An entry with the same id is already in the store.
    DuplicateId(EntryId),
    /// The store is empty, or the tail has a different id.
    NotTail(EntryId),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::DuplicateId(id) => {
                write!(f, "entry {id} is already in the transcript")
            }
            StoreError::NotTail(id) => {
                write!(f, "entry {id} is not at the tail of the transcript")
            }
        }
    }
}

impl Error for StoreError {}

pub(crate) type Observer =
    Box<dyn Fn(&StoreChange, &[TranscriptEntry]) + Send + Sync>;

/// An ordered sequence of transcript entries.
///
/// Observers are called after each mutation has been fully applied, with
/// the change and the entries as they are after it. An operation that
/// changes nothing notifies nobody.
#[derive(Default)]
pub struct TranscriptStore {
    entries: Vec<TranscriptEntry>,
    observers: Vec<Observer>,
}

impl TranscriptStore {
    /// Creates an empty store.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer.
    pub fn subscribe(
        &mut self,
        observer: impl Fn(&StoreChange, &[TranscriptEntry]) + Send + Sync + 'static,
    ) {
        self.observers.push(Box::new(observer));
    }

    /// Adds an entry at the tail.
    pub fn append(&mut self, entry: TranscriptEntry) -> Result<(), StoreError> {
        let id = entry.id();
        if self.get(id).is_some() {
            return Err(StoreError::DuplicateId(id));
        }
        self.entries.push(entry);
        self.notify(StoreChange::Appended(id));
        Ok(())
    }

    /// Replaces the entry at the tail with a newer copy of itself.
    pub fn replace_tail(
        &mut self,
        entry: TranscriptEntry,
    ) -> Result<(), StoreError> {
        let id = entry.id();
        let Some(tail) = self.entries.last_mut().filter(|e| e.id() == id)
        else {
            return Err(StoreError::NotTail(id));
        };
        *tail = entry;
        self.notify(StoreChange::Replaced(id));
        Ok(())
    }

    /// Removes the entry with `id`, if present.
    pub fn remove(&mut self, id: EntryId) -> Option<TranscriptEntry> {
        let idx = self.entries.iter().position(|e| e.id() == id)?;
        let entry = self.entries.remove(idx);
        self.notify(StoreChange::Removed(id));
        Some(entry)
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        self.entries.clear();
        self.notify(StoreChange::Cleared);
    }

    /// Returns the entry with `id`, if present.
    #[inline]
    pub fn get(&self, id: EntryId) -> Option<&TranscriptEntry> {
        self.entries.iter().find(|e| e.id() == id)
    }

    /// Returns the entry at the tail.
    #[inline]
    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    /// Returns all entries in chronological order.
    #[inline]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Returns the number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn notify(&self, change: StoreChange) {
        trace!("transcript changed: {change:?}");
        for observer in &self.observers {
            observer(&change, &self.entries);
        }
    }
}

impl Debug for TranscriptStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscriptStore")
            .field("entries", &self.entries)
            .field("observers", &self.observers.len())
            .finish()
    }
}
