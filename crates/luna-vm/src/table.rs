//! Lua tables: an array part for the keys `1..n` plus an insertion-ordered
//! hash part.

use crate::value::Value;
use indexmap::IndexMap;
use luna_core::number::float_to_integer;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Errors raised by table writes and traversal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("table index is nil")]
    NilKey,
    #[error("table index is NaN")]
    NanKey,
    #[error("invalid key to 'next'")]
    InvalidNextKey,
}

/// Hash-part key. Floats with integral values never get here (they are
/// normalized to integers first), so `Integer` and `Float` keys are
/// always distinct.
#[derive(Clone, Debug)]
struct Key(Value);

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Integer(_), Value::Float(_)) | (Value::Float(_), Value::Integer(_)) => false,
            (a, b) => a.raw_equal(b),
        }
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.0).hash(state);
        match &self.0 {
            Value::Nil => {}
            Value::Boolean(b) => b.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::Table(t) => (Rc::as_ptr(t) as *const () as usize).hash(state),
            Value::Function(f) => (Rc::as_ptr(f) as *const () as usize).hash(state),
        }
    }
}

/// Integer-valued floats become integers; `nil` and NaN are rejected.
fn normalize_key(key: Value) -> Result<Value, TableError> {
    match key {
        Value::Nil => Err(TableError::NilKey),
        Value::Float(f) if f.is_nan() => Err(TableError::NanKey),
        Value::Float(f) => Ok(float_to_integer(f).map_or(Value::Float(f), Value::Integer)),
        other => Ok(other),
    }
}

#[derive(Debug, Default)]
pub struct Table {
    array: Vec<Value>,
    hash: IndexMap<Key, Value>,
    /// Hash entries whose value was set to nil. They stay in place so a
    /// running `next` traversal can step past them.
    dead: usize,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(narray: usize, nhash: usize) -> Self {
        Table {
            array: Vec::with_capacity(narray),
            hash: IndexMap::with_capacity(nhash),
            dead: 0,
        }
    }

    /// Build a sequence `{v1, v2, ...}`.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        let mut t = Table::new();
        for (i, v) in values.into_iter().enumerate() {
            t.set_int(i as i64 + 1, v);
        }
        t
    }

    pub fn get(&self, key: &Value) -> Value {
        match key {
            Value::Nil => Value::Nil,
            Value::Integer(i) => self.get_int(*i),
            Value::Float(f) => match float_to_integer(*f) {
                Some(i) => self.get_int(i),
                None => self.get_hashed(key),
            },
            _ => self.get_hashed(key),
        }
    }

    pub fn get_int(&self, i: i64) -> Value {
        if i >= 1 && (i as u64) <= self.array.len() as u64 {
            return self.array[(i - 1) as usize].clone();
        }
        self.get_hashed(&Value::Integer(i))
    }

    pub fn get_str(&self, name: &str) -> Value {
        self.get_hashed(&Value::from(name))
    }

    fn get_hashed(&self, key: &Value) -> Value {
        self.hash.get(&Key(key.clone())).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, key: Value, value: Value) -> Result<(), TableError> {
        match normalize_key(key)? {
            Value::Integer(i) => self.set_int(i, value),
            key => self.set_hashed(key, value),
        }
        Ok(())
    }

    pub fn set_str(&mut self, name: &str, value: Value) {
        self.set_hashed(Value::from(name), value);
    }

    pub fn set_int(&mut self, i: i64, value: Value) {
        let len = self.array.len();
        if i >= 1 && (i as u64) <= len as u64 {
            self.array[(i - 1) as usize] = value;
            return;
        }
        if i as u64 == len as u64 + 1 && !value.is_nil() {
            if let Some(old) = self.hash.get_mut(&Key(Value::Integer(i))) {
                if !old.is_nil() {
                    self.dead += 1;
                }
                *old = Value::Nil;
            }
            self.array.push(value);
            self.migrate_from_hash();
            return;
        }
        self.set_hashed(Value::Integer(i), value);
    }

    /// Move keys `n+1, n+2, ...` that follow the array part out of the hash part.
    fn migrate_from_hash(&mut self) {
        if self.hash.len() == self.dead {
            return;
        }
        loop {
            let next = Key(Value::Integer(self.array.len() as i64 + 1));
            match self.hash.get_mut(&next) {
                Some(v) if !v.is_nil() => {
                    let v = std::mem::take(v);
                    self.dead += 1;
                    self.array.push(v);
                }
                _ => break,
            }
        }
    }

    fn set_hashed(&mut self, key: Value, value: Value) {
        let key = Key(key);
        if let Some(slot) = self.hash.get_mut(&key) {
            match (slot.is_nil(), value.is_nil()) {
                (false, true) => self.dead += 1,
                (true, false) => self.dead -= 1,
                _ => {}
            }
            *slot = value;
            return;
        }
        if value.is_nil() {
            return;
        }
        if self.dead > 8 && self.dead * 2 > self.hash.len() {
            self.hash.retain(|_, v| !v.is_nil());
            self.dead = 0;
        }
        self.hash.insert(key, value);
    }

    /// A border: `t[n] ~= nil` and `t[n+1] == nil` (or 0 when `t[1] == nil`).
    pub fn length(&self) -> i64 {
        let n = self.array.len();
        if n > 0 && self.array[n - 1].is_nil() {
            // binary search for a border inside the array part
            let (mut lo, mut hi) = (0usize, n);
            while hi - lo > 1 {
                let mid = (lo + hi) / 2;
                if self.array[mid - 1].is_nil() {
                    hi = mid;
                } else {
                    lo = mid;
                }
            }
            return lo as i64;
        }
        let mut j = n as i64;
        while !self.get_hashed(&Value::Integer(j + 1)).is_nil() {
            j += 1;
        }
        j
    }

    /// Traversal step: the entry after `key` (`nil` starts the walk).
    /// Array entries come first in index order, then hash entries in
    /// insertion order.
    pub fn next(&self, key: &Value) -> Result<Option<(Value, Value)>, TableError> {
        let start = match key {
            Value::Nil => 0,
            _ => self.position_after(key)?,
        };
        for i in start..self.array.len() {
            if !self.array[i].is_nil() {
                return Ok(Some((Value::Integer(i as i64 + 1), self.array[i].clone())));
            }
        }
        let first_hash = start.saturating_sub(self.array.len());
        for idx in first_hash..self.hash.len() {
            if let Some((k, v)) = self.hash.get_index(idx) {
                if !v.is_nil() {
                    return Ok(Some((k.0.clone(), v.clone())));
                }
            }
        }
        Ok(None)
    }

    /// Unified traversal index just past `key`.
    fn position_after(&self, key: &Value) -> Result<usize, TableError> {
        let key = normalize_key(key.clone()).map_err(|_| TableError::InvalidNextKey)?;
        if let Value::Integer(i) = key {
            if i >= 1 && (i as u64) <= self.array.len() as u64 {
                return Ok(i as usize);
            }
        }
        match self.hash.get_index_of(&Key(key)) {
            Some(idx) => Ok(self.array.len() + idx + 1),
            None => Err(TableError::InvalidNextKey),
        }
    }

    pub fn array_len(&self) -> usize {
        self.array.len()
    }
}
