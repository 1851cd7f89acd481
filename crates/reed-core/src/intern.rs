//! String interning: identifiers, table keys, and string literals share one pool so equal
//! strings always compare by a cheap integer rather than a byte scan.
//!
//! Deduplicated on insertion: interning the same text twice returns the same [`StringId`]. The
//! pool only grows for the lifetime of an [`crate::eval::Evaluator`]; nothing is ever evicted.

use ahash::AHashMap;

/// Index into the interner's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StringId(u32);

impl StringId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Pool of unique strings, addressed by [`StringId`].
#[derive(Debug, Default)]
pub struct Interner {
    map: AHashMap<Box<str>, StringId>,
    strings: Vec<Box<str>>,
}

impl Interner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `s`, returning its existing id if already present.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.map.get(s) {
            return id;
        }
        let id = StringId(u32::try_from(self.strings.len()).expect("interner overflow"));
        let boxed: Box<str> = s.into();
        self.strings.push(boxed.clone());
        self.map.insert(boxed, id);
        id
    }

    /// Looks up the text behind a [`StringId`] previously returned by this interner.
    #[must_use]
    pub fn resolve(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    /// Returns the `StringId` for `s` if it has already been interned, without inserting it.
    #[must_use]
    pub fn find(&self, s: &str) -> Option<StringId> {
        self.map.get(s).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_same_text_twice_returns_same_id() {
        let mut interner = Interner::new();
        let a = interner.intern("hello");
        let b = interner.intern("hello");
        assert_eq!(a, b);
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn distinct_strings_get_distinct_ids() {
        let mut interner = Interner::new();
        let a = interner.intern("foo");
        let b = interner.intern("bar");
        assert_ne!(a, b);
        assert_eq!(interner.resolve(a), "foo");
        assert_eq!(interner.resolve(b), "bar");
    }

    #[test]
    fn find_does_not_insert() {
        let mut interner = Interner::new();
        assert_eq!(interner.find("missing"), None);
        assert_eq!(interner.len(), 0);
        let id = interner.intern("missing");
        assert_eq!(interner.find("missing"), Some(id));
    }
}
