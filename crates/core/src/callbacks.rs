//! Ordered callback registry.
//!
//! Callbacks are grouped under a key (typically an event kind paired with an
//! argument such as a CSS selector). Keys iterate in first-registration order
//! and callbacks under a key in their list order, which callers control with
//! positional inserts and overwrites.

use std::hash::Hash;

use indexmap::IndexMap;

use crate::Error;

#[derive(Debug, Clone)]
pub struct CallbackList<K, F> {
    entries: IndexMap<K, Vec<F>>,
}

impl<K, F> Default for CallbackList<K, F> {
    fn default() -> Self {
        Self { entries: IndexMap::new() }
    }
}

fn out_of_range(index: usize, len: usize) -> Error {
    Error::InvalidConfig(format!("callback index {index} out of range for {len} entries"))
}

impl<K: Hash + Eq, F> CallbackList<K, F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `f` under `key`, returning its position.
    pub fn push(&mut self, key: K, f: F) -> usize {
        let list = self.entries.entry(key).or_default();
        list.push(f);
        list.len() - 1
    }

    /// Insert `f` at `index`, shifting later callbacks. `index` may equal the
    /// current length.
    pub fn insert_at(&mut self, key: K, index: usize, f: F) -> Result<(), Error> {
        let len = self.entries.get(&key).map_or(0, Vec::len);
        if index > len {
            return Err(out_of_range(index, len));
        }
        self.entries.entry(key).or_default().insert(index, f);
        Ok(())
    }

    /// Overwrite the callback at `index`, returning the previous one.
    pub fn replace_at(&mut self, key: &K, index: usize, f: F) -> Result<F, Error> {
        let list = self.entries.get_mut(key).ok_or_else(|| out_of_range(index, 0))?;
        let len = list.len();
        let slot = list.get_mut(index).ok_or_else(|| out_of_range(index, len))?;
        Ok(std::mem::replace(slot, f))
    }

    /// Remove the callback at `index`. A key left without callbacks is dropped.
    pub fn remove_at(&mut self, key: &K, index: usize) -> Result<F, Error> {
        let list = self.entries.get_mut(key).ok_or_else(|| out_of_range(index, 0))?;
        if index >= list.len() {
            return Err(out_of_range(index, list.len()));
        }
        let removed = list.remove(index);
        if list.is_empty() {
            self.entries.shift_remove(key);
        }
        Ok(removed)
    }

    pub fn get(&self, key: &K) -> &[F] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &[F])> {
        self.entries.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Total number of callbacks across all keys.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_keeps_order() {
        let mut list = CallbackList::new();
        assert_eq!(list.push("html", "a"), 0);
        assert_eq!(list.push("error", "e"), 0);
        assert_eq!(list.push("html", "b"), 1);

        assert_eq!(list.get(&"html"), &["a", "b"]);
        let keys: Vec<_> = list.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, ["html", "error"]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_positional_edits() {
        let mut list = CallbackList::new();
        list.push(("html", "a[href]"), 1);
        list.push(("html", "a[href]"), 3);
        list.insert_at(("html", "a[href]"), 1, 2).unwrap();
        list.insert_at(("html", "a[href]"), 3, 4).unwrap();
        assert_eq!(list.get(&("html", "a[href]")), &[1, 2, 3, 4]);

        assert_eq!(list.replace_at(&("html", "a[href]"), 0, 10).unwrap(), 1);
        assert_eq!(list.remove_at(&("html", "a[href]"), 3).unwrap(), 4);
        assert_eq!(list.get(&("html", "a[href]")), &[10, 2, 3]);
    }

    #[test]
    fn test_out_of_range() {
        let mut list: CallbackList<&str, u8> = CallbackList::new();
        assert!(list.insert_at("k", 1, 0).is_err());
        assert!(list.replace_at(&"missing", 0, 0).is_err());
        list.push("k", 1);
        assert!(list.remove_at(&"k", 1).is_err());
    }

    #[test]
    fn test_empty_key_is_dropped() {
        let mut list = CallbackList::new();
        list.push("a", 1);
        list.push("b", 2);
        list.remove_at(&"a", 0).unwrap();
        list.push("a", 3);
        let keys: Vec<_> = list.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, ["b", "a"]);
    }
}
