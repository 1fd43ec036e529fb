// File: src/table.rs
//
// Open-addressed hash table keyed by interned-string identity. Used for both
// the VM's globals and its string-intern pool.
//
// Slots are modeled as a three-way Rust enum rather than the spec's
// value-encodes-tombstone packing trick (see DESIGN.md) -- same probing
// behavior, same load-factor bookkeeping, just a sum type instead of a
// memory-layout pun.

use std::rc::Rc;

use crate::value::{ObjString, Value};

const MAX_LOAD: f64 = 0.75;
const INITIAL_CAPACITY: usize = 8;

enum Slot {
    Empty,
    Tombstone,
    Occupied(Rc<ObjString>, Value),
}

pub struct Table {
    slots: Vec<Slot>,
    /// Occupied + tombstone slots. Tombstones count against the load factor
    /// so that a table hammered with insert/delete doesn't probe forever.
    count: usize,
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    pub fn new() -> Self {
        Table { slots: Vec::new(), count: 0 }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Linear probe starting at `hash mod capacity`, wrapping. Returns the
    /// index of the matching occupied slot, or the first empty/earliest
    /// tombstone slot suitable for insertion if no match exists.
    fn find_slot(&self, key: &Rc<ObjString>) -> usize {
        self.find_slot_by(key.hash, |s| Rc::ptr_eq(s, key))
    }

    fn find_slot_by(&self, hash: u32, matches: impl Fn(&Rc<ObjString>) -> bool) -> usize {
        let capacity = self.capacity();
        let mut index = (hash as usize) % capacity;
        let mut tombstone: Option<usize> = None;
        loop {
            match &self.slots[index] {
                Slot::Empty => return tombstone.unwrap_or(index),
                Slot::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Slot::Occupied(key, _) if matches(key) => return index,
                Slot::Occupied(..) => {}
            }
            index = (index + 1) % capacity;
        }
    }

    fn grow(&mut self, new_capacity: usize) {
        let mut grown = Table { slots: Vec::new(), count: 0 };
        grown.slots.resize_with(new_capacity, || Slot::Empty);
        for slot in self.slots.drain(..) {
            if let Slot::Occupied(key, value) = slot {
                let index = grown.find_slot(&key);
                grown.slots[index] = Slot::Occupied(key, value);
                grown.count += 1;
            }
        }
        *self = grown;
    }

    fn ensure_capacity(&mut self) {
        if self.capacity() == 0 {
            self.grow(INITIAL_CAPACITY);
            return;
        }
        if (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD {
            self.grow(self.capacity() * 2);
        }
    }

    /// Inserts or overwrites `key => value`. Returns `true` iff this created
    /// a brand new entry (used by `DefineGlobal`/`SetGlobal` rollback logic).
    pub fn set(&mut self, key: Rc<ObjString>, value: Value) -> bool {
        self.ensure_capacity();
        let index = self.find_slot(&key);
        let is_new = !matches!(self.slots[index], Slot::Occupied(..));
        if is_new && !matches!(self.slots[index], Slot::Tombstone) {
            self.count += 1;
        }
        self.slots[index] = Slot::Occupied(key, value);
        is_new
    }

    pub fn get(&self, key: &Rc<ObjString>) -> Option<&Value> {
        if self.capacity() == 0 {
            return None;
        }
        let index = self.find_slot(key);
        match &self.slots[index] {
            Slot::Occupied(_, value) => Some(value),
            _ => None,
        }
    }

    /// Replaces the slot with a tombstone rather than `Empty`, so later
    /// probes don't stop short of keys that hashed past this slot.
    pub fn delete(&mut self, key: &Rc<ObjString>) -> bool {
        if self.capacity() == 0 {
            return false;
        }
        let index = self.find_slot(key);
        if matches!(self.slots[index], Slot::Occupied(..)) {
            self.slots[index] = Slot::Tombstone;
            true
        } else {
            false
        }
    }

    /// Looks up an interned string by raw bytes, without needing an
    /// `ObjString` to compare against -- length, then hash, then bytes.
    pub fn find_string(&self, bytes: &[u8], hash: u32) -> Option<Rc<ObjString>> {
        if self.capacity() == 0 {
            return None;
        }
        let index = self.find_slot_by(hash, |s| {
            s.hash == hash && s.chars.len() == bytes.len() && s.chars.as_bytes() == bytes
        });
        match &self.slots[index] {
            Slot::Occupied(key, _) => Some(Rc::clone(key)),
            _ => None,
        }
    }
}

/// Returns the interned `Rc<ObjString>` for `s`, reusing an existing
/// allocation when the bytes already live in `table`. Shared by the compiler
/// (identifiers, string literals) and the VM (runtime string concatenation)
/// so that any two strings with equal content are also pointer-equal.
pub fn intern_string(table: &mut Table, s: &str) -> Rc<ObjString> {
    let hash = crate::value::fnv1a_hash(s.as_bytes());
    if let Some(existing) = table.find_string(s.as_bytes(), hash) {
        return existing;
    }
    let interned = Rc::new(ObjString::new(s.to_string()));
    table.set(Rc::clone(&interned), Value::Nil);
    interned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Rc<ObjString> {
        Rc::new(ObjString::new(s.to_string()))
    }

    #[test]
    fn set_reports_new_vs_overwrite() {
        let mut t = Table::new();
        let a = key("a");
        assert!(t.set(Rc::clone(&a), Value::Number(1.0)));
        assert!(!t.set(a, Value::Number(2.0)));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn delete_then_reinsert_reuses_tombstone() {
        let mut t = Table::new();
        let a = key("a");
        t.set(Rc::clone(&a), Value::Nil);
        assert!(t.delete(&a));
        assert!(t.get(&a).is_none());
        assert!(t.set(a, Value::Bool(true)));
    }

    #[test]
    fn grows_past_load_factor() {
        let mut t = Table::new();
        let keys: Vec<Rc<ObjString>> = (0..100).map(|i| key(&format!("k{i}"))).collect();
        for (i, k) in keys.iter().enumerate() {
            t.set(Rc::clone(k), Value::Number(i as f64));
        }
        for (i, k) in keys.iter().enumerate() {
            assert_eq!(t.get(k), Some(&Value::Number(i as f64)));
        }
    }

    #[test]
    fn find_string_matches_raw_bytes() {
        let mut t = Table::new();
        let s = key("hello");
        let hash = s.hash;
        t.set(s, Value::Nil);
        let found = t.find_string(b"hello", hash).expect("should find interned string");
        assert_eq!(&*found.chars, "hello");
        assert!(t.find_string(b"nope", crate::value::fnv1a_hash(b"nope")).is_none());
    }
}
