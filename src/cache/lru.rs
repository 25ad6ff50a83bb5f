//! Slot-table LRU index.
//!
//! Entries live in a `Vec` of slots threaded into an intrusive doubly linked
//! list (head = most recently used). Freed slots are recycled through a free
//! list, so lookups and recency updates never reallocate.

use std::collections::HashMap;

struct Slot<V> {
    key: String,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// String-keyed map that tracks recency order.
///
/// Capacity policy is left to the caller: use [`LruIndex::pop_lru`] to evict.
pub struct LruIndex<V> {
    map: HashMap<String, usize>,
    slots: Vec<Option<Slot<V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<V> Default for LruIndex<V> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl<V> LruIndex<V> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Look up without changing recency.
    pub fn peek(&self, key: &str) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.slots[idx].as_ref().map(|slot| &slot.value)
    }

    /// Look up and mark as most recently used.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        let idx = *self.map.get(key)?;
        self.move_to_front(idx);
        self.slots[idx].as_mut().map(|slot| &mut slot.value)
    }

    /// Insert or replace, marking the key as most recently used.
    /// Returns the previous value if the key was present.
    pub fn insert(&mut self, key: String, value: V) -> Option<V> {
        if let Some(&idx) = self.map.get(&key) {
            self.move_to_front(idx);
            return self.slots[idx]
                .as_mut()
                .map(|slot| std::mem::replace(&mut slot.value, value));
        }

        let slot = Slot {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.attach_front(idx);
        self.map.insert(key, idx);
        None
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let idx = self.map.remove(key)?;
        self.release(idx).map(|(_, value)| value)
    }

    /// Remove and return the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<(String, V)> {
        let idx = self.tail?;
        let (key, value) = self.release(idx)?;
        self.map.remove(&key);
        Some((key, value))
    }

    /// Remove every entry for which `pred` returns true.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&str, &V) -> bool) -> Vec<(String, V)> {
        let doomed: Vec<String> = self
            .slots
            .iter()
            .flatten()
            .filter(|slot| pred(&slot.key, &slot.value))
            .map(|slot| slot.key.clone())
            .collect();

        doomed
            .into_iter()
            .filter_map(|key| self.remove(&key).map(|value| (key, value)))
            .collect()
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Keys<'_, V> {
        Keys {
            index: self,
            cursor: self.head,
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    fn release(&mut self, idx: usize) -> Option<(String, V)> {
        self.detach(idx);
        let slot = self.slots[idx].take()?;
        self.free.push(idx);
        Some((slot.key, slot.value))
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.detach(idx);
        self.attach_front(idx);
    }

    fn attach_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.prev = None;
            slot.next = old_head;
        }
        match old_head {
            Some(h) => {
                if let Some(head) = self.slots[h].as_mut() {
                    head.prev = Some(idx);
                }
            }
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].as_mut() {
            Some(slot) => (slot.prev.take(), slot.next.take()),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(slot) = self.slots[p].as_mut() {
                    slot.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(slot) = self.slots[n].as_mut() {
                    slot.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }
}

/// Iterator over keys in recency order.
pub struct Keys<'a, V> {
    index: &'a LruIndex<V>,
    cursor: Option<usize>,
}

impl<'a, V> Iterator for Keys<'a, V> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.index.slots[self.cursor?].as_ref()?;
        self.cursor = slot.next;
        Some(slot.key.as_str())
    }
}
