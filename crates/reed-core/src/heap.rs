//! Reference-counted arena backing every value that outlives a single expression.
//!
//! Mirrors the original interpreter's `Object{ref_count, ...}` header: a slab of slots plus a
//! free list, so long-running loops that allocate and drop values at a steady rate reuse slots
//! instead of growing forever. Unlike a tracing collector, a cycle (e.g. a closure's environment
//! capturing itself) leaks rather than crashing — acceptable for a script interpreter without a
//! GC pass, and the same trade-off the reference implementation makes.

use ahash::AHashMap;
use std::rc::Rc;

use crate::ast::Stmt;
use crate::error::Result;
use crate::intern::StringId;
use crate::native::bridge::{ForeignFunction, ForeignStruct};
use crate::table::Table;
use crate::value::Value;

/// Identifier for a slot in the [`Heap`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(usize);

impl HeapId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// A user-defined function: parameters, a shared reference to its body in the parsed AST, and
/// the environment it closed over at definition time.
#[derive(Debug, Clone)]
pub struct ScriptFunction {
    pub name: Option<String>,
    /// `Rc<[String]>` rather than `Vec<String>` so dispatching a call can clone the parameter
    /// list out of the heap borrow cheaply before binding it into a fresh call environment.
    pub params: Rc<[String]>,
    pub body: Rc<Stmt>,
    pub closure: HeapId,
}

/// A host-registered function exposed to scripts under a name via [`crate::host::Evaluator::register_native`].
pub struct NativeFunction {
    pub name: String,
    pub arity: Option<usize>,
    pub func: Rc<dyn Fn(&mut crate::eval::Evaluator, &[Value]) -> Result<Value>>,
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFunction").field("name", &self.name).field("arity", &self.arity).finish()
    }
}

/// A single binding in an [`Env`]: the value plus whether it was declared with `::`.
#[derive(Debug, Clone, Copy)]
pub struct Binding {
    pub value: Value,
    pub is_const: bool,
}

/// A lexical scope, itself heap-allocated so closures can share ownership of the scopes they
/// captured the same way any other heap object is shared.
#[derive(Debug, Clone, Default)]
pub struct Env {
    pub bindings: AHashMap<StringId, Binding>,
    pub parent: Option<HeapId>,
}

#[derive(Debug)]
pub enum HeapData {
    Str(String),
    Array(Vec<Value>),
    Table(Table),
    Env(Env),
    ScriptFunction(ScriptFunction),
    NativeFunction(NativeFunction),
    /// A raw address obtained from `&expr`, a C function's pointer return, or a loaded symbol.
    ForeignPointer(usize),
    ForeignStruct(ForeignStruct),
    /// `Rc`-wrapped so a call can clone the descriptor out of the heap borrow before invoking it,
    /// since invocation needs a fresh `&mut Heap` to marshal the return value.
    ForeignFunction(Rc<ForeignFunction>),
}

impl HeapData {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            HeapData::Str(_) => "string",
            HeapData::Array(_) => "array",
            HeapData::Table(_) => "table",
            HeapData::Env(_) => "environment",
            HeapData::ScriptFunction(_) | HeapData::NativeFunction(_) => "function",
            HeapData::ForeignPointer(_) => "pointer",
            HeapData::ForeignStruct(_) => "struct",
            HeapData::ForeignFunction(_) => "native function",
        }
    }

    /// Heap kinds that can themselves hold `Value::Ref`s into the arena; only these need their
    /// children's ref-counts touched on free.
    fn child_refs(&self) -> Vec<HeapId> {
        match self {
            HeapData::Array(items) => items.iter().filter_map(value_ref).collect(),
            HeapData::Table(table) => table.iter().filter_map(|(_, v)| value_ref(v)).collect(),
            HeapData::Env(env) => {
                let mut ids: Vec<_> = env.bindings.values().filter_map(|b| value_ref(&b.value)).collect();
                ids.extend(env.parent);
                ids
            }
            HeapData::ScriptFunction(f) => vec![f.closure],
            _ => Vec::new(),
        }
    }
}

fn value_ref(v: &Value) -> Option<HeapId> {
    match v {
        Value::Ref(id) => Some(*id),
        _ => None,
    }
}

struct Slot {
    data: HeapData,
    ref_count: u32,
}

/// The arena itself: a slab of slots addressed by [`HeapId`], with a free list for reuse.
#[derive(Default)]
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free_list: Vec<HeapId>,
    /// Value-level string pool keyed on bytes, so every string the language produces — a literal,
    /// a concatenation, a foreign-call return — shares one handle with every other string equal to
    /// it. Separate from `Interner` (`intern.rs`), which only pools identifier/key names.
    interned_strings: AHashMap<String, HeapId>,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates `data` with a reference count of 1.
    pub fn allocate(&mut self, data: HeapData) -> HeapId {
        let slot = Slot { data, ref_count: 1 };
        if let Some(id) = self.free_list.pop() {
            self.slots[id.index()] = Some(slot);
            id
        } else {
            let id = HeapId(self.slots.len());
            self.slots.push(Some(slot));
            id
        }
    }

    /// Returns the shared handle for a string equal to `s` by bytes, allocating it only the first
    /// time this content is seen. Gives every runtime string value the identity the heap's "string
    /// equality implies identity" invariant promises, the same way `alloc_str`'s callers already
    /// expect a fresh owned reference back.
    pub fn intern_str(&mut self, s: String) -> HeapId {
        if let Some(&id) = self.interned_strings.get(&s) {
            self.inc_ref(id);
            return id;
        }
        let id = self.allocate(HeapData::Str(s.clone()));
        self.interned_strings.insert(s, id);
        id
    }

    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        &self.slots[id.index()].as_ref().expect("heap slot already freed").data
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self.slots[id.index()].as_mut().expect("heap slot already freed").data
    }

    pub fn inc_ref(&mut self, id: HeapId) {
        self.slots[id.index()].as_mut().expect("heap slot already freed").ref_count += 1;
    }

    /// Decrements `id`'s reference count, freeing the slot (and recursively releasing any
    /// children) once the count hits zero.
    pub fn dec_ref(&mut self, id: HeapId) {
        let slot = self.slots[id.index()].as_mut().expect("heap slot already freed");
        slot.ref_count -= 1;
        if slot.ref_count > 0 {
            return;
        }
        let freed = self.slots[id.index()].take().expect("heap slot already freed");
        self.free_list.push(id);
        if let HeapData::Str(s) = &freed.data {
            self.interned_strings.remove(s);
        }
        for child in freed.data.child_refs() {
            self.dec_ref(child);
        }
    }

    #[must_use]
    pub fn ref_count(&self, id: HeapId) -> u32 {
        self.slots[id.index()].as_ref().expect("heap slot already freed").ref_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_get_round_trip() {
        let mut heap = Heap::new();
        let id = heap.allocate(HeapData::Str("hi".into()));
        assert!(matches!(heap.get(id), HeapData::Str(s) if s == "hi"));
    }

    #[test]
    fn dec_ref_to_zero_frees_slot_for_reuse() {
        let mut heap = Heap::new();
        let id = heap.allocate(HeapData::Str("a".into()));
        heap.dec_ref(id);
        let id2 = heap.allocate(HeapData::Str("b".into()));
        assert_eq!(id, id2);
    }

    #[test]
    fn inc_ref_delays_free() {
        let mut heap = Heap::new();
        let id = heap.allocate(HeapData::Str("a".into()));
        heap.inc_ref(id);
        heap.dec_ref(id);
        assert!(matches!(heap.get(id), HeapData::Str(_)));
        heap.dec_ref(id);
    }

    #[test]
    fn freeing_array_releases_child_refs() {
        let mut heap = Heap::new();
        let inner = heap.allocate(HeapData::Str("child".into()));
        let outer = heap.allocate(HeapData::Array(vec![Value::Ref(inner)]));
        assert_eq!(heap.ref_count(inner), 1);
        heap.dec_ref(outer);
        let id2 = heap.allocate(HeapData::Str("reused".into()));
        assert_eq!(inner, id2);
    }

    #[test]
    fn intern_str_dedupes_equal_content() {
        let mut heap = Heap::new();
        let a = heap.intern_str("hi".to_string());
        let b = heap.intern_str("hi".to_string());
        assert_eq!(a, b);
        assert_eq!(heap.ref_count(a), 2);
        let c = heap.intern_str("other".to_string());
        assert_ne!(a, c);
    }

    #[test]
    fn intern_str_reclaims_pool_entry_when_last_ref_drops() {
        let mut heap = Heap::new();
        let a = heap.intern_str("hi".to_string());
        heap.dec_ref(a);
        // "hi" has no live references left; interning it again must allocate fresh rather than
        // hand back a now-freed id from a stale pool entry.
        let b = heap.intern_str("hi".to_string());
        assert!(matches!(heap.get(b), HeapData::Str(s) if s == "hi"));
        assert_eq!(heap.ref_count(b), 1);
    }
}
