//! The ordered item list and its cursor.

use crate::Item;
use std::sync::Arc;

/// A mutation of the sequence coming from outside the cache.
#[derive(Debug)]
pub enum SequenceChange {
    /// Reload with a new set of items
    Replace(Vec<Item>),
    /// A new entry appeared (index is clamped to the end)
    Insert { index: usize, item: Item },
    /// An entry went away
    Remove { index: usize },
}

/// Ordered items plus a cursor that is always a valid index, or `None`
/// when the sequence is empty.
#[derive(Debug, Default)]
pub struct Sequence {
    items: Vec<Arc<Item>>,
    cursor: Option<usize>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<Item>) -> Self {
        let items: Vec<_> = items.into_iter().map(Arc::new).collect();
        let cursor = if items.is_empty() { None } else { Some(0) };
        Self { items, cursor }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Move the cursor, clamping to the last item. Returns the new cursor.
    pub fn set_cursor(&mut self, index: usize) -> Option<usize> {
        self.cursor = self.clamp(index);
        self.cursor
    }

    fn clamp(&self, index: usize) -> Option<usize> {
        self.items.len().checked_sub(1).map(|last| index.min(last))
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Item>> {
        self.items.get(index)
    }

    pub fn current(&self) -> Option<&Arc<Item>> {
        self.cursor.and_then(|index| self.items.get(index))
    }

    pub fn items(&self) -> &[Arc<Item>] {
        &self.items
    }

    /// Index of this exact item (by identity, not by id string).
    pub fn position_of(&self, item: &Arc<Item>) -> Option<usize> {
        self.items.iter().position(|other| Arc::ptr_eq(other, item))
    }

    /// Apply a change. The cursor stays on the same item when it can;
    /// removing the current item leaves the cursor on the same index,
    /// clamped. A replacement keeps the cursor index, clamped.
    ///
    /// Returns `false` if the change was a no-op (removing a missing index).
    pub fn apply(&mut self, change: SequenceChange) -> bool {
        match change {
            SequenceChange::Replace(items) => {
                let previous = self.cursor.unwrap_or(0);
                self.items = items.into_iter().map(Arc::new).collect();
                self.cursor = self.clamp(previous);
            }
            SequenceChange::Insert { index, item } => {
                let index = index.min(self.items.len());
                self.items.insert(index, Arc::new(item));
                self.cursor = match self.cursor {
                    None => Some(0),
                    Some(cursor) if index <= cursor => Some(cursor + 1),
                    Some(cursor) => Some(cursor),
                };
            }
            SequenceChange::Remove { index } => {
                if index >= self.items.len() {
                    return false;
                }
                self.items.remove(index);
                self.cursor = match self.cursor {
                    Some(cursor) if index < cursor => Some(cursor - 1),
                    Some(cursor) => self.clamp(cursor),
                    None => None,
                };
            }
        }
        true
    }
}
