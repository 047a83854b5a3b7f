//! Immutable byte strings shared between the compiler and the VM.
//!
//! Lua strings are arbitrary byte sequences, so `LuaStr` wraps an
//! `Rc<[u8]>` instead of `String`. Clones are cheap and equality first
//! compares pointers, then the cached hash, then the bytes.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Strings up to this length are "short" in the binary chunk format.
pub const SHORT_STRING_MAX: usize = 40;

/// A reference-counted, immutable Lua string with a precomputed hash.
#[derive(Clone)]
pub struct LuaStr {
    bytes: Rc<[u8]>,
    hash: u32,
}

impl LuaStr {
    /// Create a new string from bytes.
    pub fn new(bytes: &[u8]) -> Self {
        LuaStr {
            hash: lua_hash(bytes),
            bytes: Rc::from(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// True if this string would be stored as a short string.
    pub fn is_short(&self) -> bool {
        self.bytes.len() <= SHORT_STRING_MAX
    }

    pub fn hash_code(&self) -> u32 {
        self.hash
    }

    /// Lossy UTF-8 view, for messages and display.
    pub fn to_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    /// True if both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &LuaStr) -> bool {
        Rc::ptr_eq(&self.bytes, &other.bytes)
    }
}

/// Hash used for strings (the `luaS_hash` step algorithm, seed = length).
pub fn lua_hash(bytes: &[u8]) -> u32 {
    let len = bytes.len();
    let mut h = len as u32;
    let step = (len >> 5) + 1;
    let mut i = len;
    while i >= step {
        h ^= (h << 5).wrapping_add(h >> 2).wrapping_add(bytes[i - 1] as u32);
        i -= step;
    }
    h
}

impl PartialEq for LuaStr {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || (self.hash == other.hash && self.bytes == other.bytes)
    }
}

impl Eq for LuaStr {}

impl Hash for LuaStr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl PartialOrd for LuaStr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LuaStr {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl Borrow<[u8]> for LuaStr {
    fn borrow(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<&str> for LuaStr {
    fn from(s: &str) -> Self {
        LuaStr::new(s.as_bytes())
    }
}

impl From<&[u8]> for LuaStr {
    fn from(b: &[u8]) -> Self {
        LuaStr::new(b)
    }
}

impl From<Vec<u8>> for LuaStr {
    fn from(v: Vec<u8>) -> Self {
        LuaStr {
            hash: lua_hash(&v),
            bytes: Rc::from(v.into_boxed_slice()),
        }
    }
}

impl From<String> for LuaStr {
    fn from(s: String) -> Self {
        LuaStr::from(s.into_bytes())
    }
}

impl fmt::Debug for LuaStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.bytes) {
            Ok(s) => write!(f, "{s:?}"),
            Err(_) => write!(f, "<binary string len={}>", self.len()),
        }
    }
}

impl fmt::Display for LuaStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_str_lossy())
    }
}
