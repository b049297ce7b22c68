use std::collections::HashMap;

use crate::{ObjError, ObjPtr, OwnedRef, object_eq, object_hash};

struct DictEntry {
    key: OwnedRef,
    value: OwnedRef,
}

/// Insertion-ordered mapping storage keyed by [`object_hash`] /
/// [`object_eq`].
#[derive(Default)]
pub struct DictTable {
    entries: Vec<DictEntry>,
    buckets: HashMap<u64, Vec<usize>>,
}

impl DictTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find(&self, hash: u64, key: ObjPtr) -> Option<usize> {
        self.buckets
            .get(&hash)?
            .iter()
            .copied()
            .find(|&idx| object_eq(self.entries[idx].key.as_obj(), key))
    }

    /// Claims `key` and `value`. Returns the value it displaced, if any, so
    /// the caller can release it outside the table borrow.
    pub fn insert(&mut self, key: ObjPtr, value: ObjPtr) -> Result<Option<OwnedRef>, ObjError> {
        let hash = object_hash(key)?;
        let value = OwnedRef::new_ref(value);
        if let Some(idx) = self.find(hash, key) {
            let previous = std::mem::replace(&mut self.entries[idx].value, value);
            return Ok(Some(previous));
        }
        let idx = self.entries.len();
        self.entries.push(DictEntry {
            key: OwnedRef::new_ref(key),
            value,
        });
        self.buckets.entry(hash).or_default().push(idx);
        Ok(None)
    }

    pub fn get(&self, key: ObjPtr) -> Result<Option<ObjPtr>, ObjError> {
        let hash = object_hash(key)?;
        Ok(self
            .find(hash, key)
            .map(|idx| self.entries[idx].value.as_obj()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjPtr, ObjPtr)> + '_ {
        self.entries
            .iter()
            .map(|entry| (entry.key.as_obj(), entry.value.as_obj()))
    }
}
