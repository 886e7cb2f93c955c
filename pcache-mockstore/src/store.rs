//! # Keyspace
//!
//! In-memory databases holding typed values with optional expiry.
//!
//! Expired entries are removed lazily on access, the same fast path the
//! production engines use; there is no background sweeper.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Number of selectable databases.
pub const DB_COUNT: usize = 16;

/// Typed value stored under a key.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(Vec<u8>),
    Set(BTreeSet<Vec<u8>>),
    Hash(BTreeMap<Vec<u8>, Vec<u8>>),
    List(VecDeque<Vec<u8>>),
    /// Kept ordered by (score, member).
    ZSet(Vec<(f64, Vec<u8>)>),
}

#[derive(Debug)]
pub struct Entry {
    pub value: Value,
    pub expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Entry {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

/// TTL state mirroring the `TTL` reply codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    Missing,
    NoExpiry,
    ExpiresIn(Duration),
}

/// One logical database.
#[derive(Debug, Default)]
pub struct Database {
    entries: HashMap<Vec<u8>, Entry>,
}

impl Database {
    /// Returns the live entry for `key`, dropping it first if it expired.
    pub fn entry(&mut self, key: &[u8]) -> Option<&mut Entry> {
        let now = Instant::now();
        let expired = self.entries.get(key).map(|entry| entry.is_expired(now))?;
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get_mut(key)
    }

    pub fn value(&mut self, key: &[u8]) -> Option<&mut Value> {
        self.entry(key).map(|entry| &mut entry.value)
    }

    /// Returns the live entry, inserting `init()` without expiry when missing.
    pub fn entry_or_insert(&mut self, key: &[u8], init: impl FnOnce() -> Value) -> &mut Entry {
        // Purge an expired entry so it is replaced, not revived.
        self.entry(key);
        self.entries
            .entry(key.to_vec())
            .or_insert_with(|| Entry::new(init()))
    }

    /// Stores a string value, replacing any previous value and TTL.
    pub fn set_string(&mut self, key: &[u8], value: Vec<u8>, ttl: Option<Duration>) {
        let mut entry = Entry::new(Value::Str(value));
        entry.expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.entries.insert(key.to_vec(), entry);
    }

    pub fn exists(&mut self, key: &[u8]) -> bool {
        self.entry(key).is_some()
    }

    pub fn remove(&mut self, key: &[u8]) -> bool {
        let live = self.exists(key);
        self.entries.remove(key);
        live
    }

    pub fn ttl(&mut self, key: &[u8]) -> TtlStatus {
        let now = Instant::now();
        match self.entry(key) {
            None => TtlStatus::Missing,
            Some(entry) => match entry.expires_at {
                None => TtlStatus::NoExpiry,
                Some(deadline) => TtlStatus::ExpiresIn(deadline.saturating_duration_since(now)),
            },
        }
    }

    /// Live keys matching a glob pattern.
    pub fn keys(&mut self, pattern: &[u8]) -> Vec<Vec<u8>> {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let mut keys: Vec<Vec<u8>> = self
            .entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// All databases of one store instance.
#[derive(Debug)]
pub struct Store {
    dbs: Vec<Database>,
}

impl Default for Store {
    fn default() -> Self {
        Store::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Store {
            dbs: (0..DB_COUNT).map(|_| Database::default()).collect(),
        }
    }

    /// Database by index; callers validate the index on SELECT.
    pub fn db(&mut self, index: usize) -> &mut Database {
        &mut self.dbs[index]
    }

    pub fn flush_all(&mut self) {
        for db in &mut self.dbs {
            db.clear();
        }
    }
}

/// Glob matching with `*`, `?`, `[...]` classes (`^` negation, `a-z` ranges)
/// and `\` escapes.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0usize, 0usize);
    // Backtrack point: position after the last `*` and the text it consumed up to.
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    star = Some((p + 1, t));
                    p += 1;
                    continue;
                }
                b'?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                b'[' => {
                    if let Some((matched, next)) = match_class(pattern, p, text[t]) {
                        if matched {
                            p = next;
                            t += 1;
                            continue;
                        }
                    }
                }
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c => {
                    if c == text[t] {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
            }
        }

        match star {
            Some((star_p, star_t)) => {
                p = star_p;
                t = star_t + 1;
                star = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

/// Matches `c` against the class starting at `pattern[start] == b'['`.
///
/// Returns whether it matched and the index after the closing `]`, or `None`
/// for an unterminated class.
fn match_class(pattern: &[u8], start: usize, c: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < pattern.len() && pattern[i] != b']' {
        if pattern[i] == b'\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == c;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let (lo, hi) = (pattern[i].min(pattern[i + 2]), pattern[i].max(pattern[i + 2]));
            matched |= lo <= c && c <= hi;
            i += 3;
        } else {
            matched |= pattern[i] == c;
            i += 1;
        }
    }

    if i >= pattern.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_star_and_question() {
        assert!(glob_match(b"user:*", b"user:42"));
        assert!(glob_match(b"*", b""));
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(!glob_match(b"h?llo", b"hllo"));
        assert!(glob_match(b"*:session:*", b"app:session:9"));
        assert!(!glob_match(b"user:*", b"session:1"));
    }

    #[test]
    fn glob_classes_and_escape() {
        assert!(glob_match(b"h[ae]llo", b"hallo"));
        assert!(!glob_match(b"h[^e]llo", b"hello"));
        assert!(glob_match(b"key[0-9]", b"key7"));
        assert!(glob_match(b"a\\*b", b"a*b"));
        assert!(!glob_match(b"a\\*b", b"axb"));
    }

    #[test]
    fn expired_entries_disappear_on_access() {
        let mut db = Database::default();
        db.set_string(b"k", b"v".to_vec(), Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(!db.exists(b"k"));
        assert_eq!(db.ttl(b"k"), TtlStatus::Missing);
        assert!(db.is_empty());
    }

    #[test]
    fn ttl_reports_no_expiry_and_remaining() {
        let mut db = Database::default();
        db.set_string(b"a", b"1".to_vec(), None);
        db.set_string(b"b", b"1".to_vec(), Some(Duration::from_secs(60)));
        assert_eq!(db.ttl(b"a"), TtlStatus::NoExpiry);
        assert!(matches!(db.ttl(b"b"), TtlStatus::ExpiresIn(d) if d <= Duration::from_secs(60)));
    }

    #[test]
    fn databases_are_isolated() {
        let mut store = Store::new();
        store.db(0).set_string(b"k", b"v".to_vec(), None);
        assert!(!store.db(1).exists(b"k"));
        store.flush_all();
        assert!(!store.db(0).exists(b"k"));
    }
}
