//! Chained lexical scopes, stored as heap objects so closures can share ownership of an
//! enclosing scope the same way they share any other reference-counted value.
//!
//! Mirrors the original interpreter's `Environment{variables, enclosing, ref_count}`: a table of
//! bindings plus a link to the parent scope, walked outward on lookup and failure.

use crate::heap::{Binding, Env, Heap, HeapData, HeapId};
use crate::intern::{Interner, StringId};
use crate::value::Value;

/// Allocates a new, empty scope enclosed by `parent` (`None` for the global scope).
///
/// Retains `parent`: a child scope holds one reference to its enclosing scope, released when the
/// child itself is freed (see `HeapData::child_refs`), so every scope walked here must have been
/// balanced by an `inc_ref` at creation.
pub fn create(heap: &mut Heap, parent: Option<HeapId>) -> HeapId {
    if let Some(id) = parent {
        heap.inc_ref(id);
    }
    heap.allocate(HeapData::Env(Env { bindings: Default::default(), parent }))
}

fn as_env(heap: &Heap, id: HeapId) -> &Env {
    match heap.get(id) {
        HeapData::Env(env) => env,
        other => unreachable!("expected an environment heap object, found a {}", other.type_name()),
    }
}

fn as_env_mut(heap: &mut Heap, id: HeapId) -> &mut Env {
    match heap.get_mut(id) {
        HeapData::Env(env) => env,
        other => unreachable!("expected an environment heap object, found a {}", other.type_name()),
    }
}

/// Defines `name` in `env` itself, shadowing any binding of the same name in an enclosing scope.
/// Returns `false` if `name` is already bound in `env` (matching the original's `env_define`,
/// which refuses to redeclare a name within the same scope).
pub fn define(heap: &mut Heap, env: HeapId, name: StringId, value: Value, is_const: bool) -> bool {
    let scope = as_env_mut(heap, env);
    if scope.bindings.contains_key(&name) {
        return false;
    }
    scope.bindings.insert(name, Binding { value, is_const });
    true
}

/// Looks up `name` in `env`, walking outward through enclosing scopes.
pub fn get(heap: &Heap, env: HeapId, name: StringId) -> Option<Value> {
    let mut current = Some(env);
    while let Some(id) = current {
        let scope = as_env(heap, id);
        if let Some(binding) = scope.bindings.get(&name) {
            return Some(binding.value);
        }
        current = scope.parent;
    }
    None
}

/// Looks up `name` in `env` only, without consulting enclosing scopes.
pub fn get_local(heap: &Heap, env: HeapId, name: StringId) -> Option<Value> {
    as_env(heap, env).bindings.get(&name).map(|b| b.value)
}

/// Returns whether `name` was declared `const` wherever it is bound, walking outward.
pub fn is_const(heap: &Heap, env: HeapId, name: StringId) -> Option<bool> {
    let mut current = Some(env);
    while let Some(id) = current {
        let scope = as_env(heap, id);
        if let Some(binding) = scope.bindings.get(&name) {
            return Some(binding.is_const);
        }
        current = scope.parent;
    }
    None
}

/// Assigns to an existing binding of `name`, walking outward to find the scope that owns it.
/// Returns the value the binding previously held, so the caller can release its reference count.
/// `Err(true)` means the name is bound but declared `const`; `Err(false)` means it is not bound
/// anywhere in the chain.
pub fn set(heap: &mut Heap, env: HeapId, name: StringId, value: Value) -> Result<Value, bool> {
    let mut current = Some(env);
    while let Some(id) = current {
        let scope = as_env_mut(heap, id);
        if let Some(binding) = scope.bindings.get_mut(&name) {
            if binding.is_const {
                return Err(true);
            }
            return Ok(std::mem::replace(&mut binding.value, value));
        }
        current = scope.parent;
    }
    Err(false)
}

/// Resolves a textual name through the interner before delegating to [`get`].
pub fn get_named(heap: &Heap, interner: &Interner, env: HeapId, name: &str) -> Option<Value> {
    let id = interner.find(name)?;
    get(heap, env, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Heap, Interner) {
        (Heap::new(), Interner::new())
    }

    #[test]
    fn define_then_get_round_trips() {
        let (mut heap, mut interner) = setup();
        let env = create(&mut heap, None);
        let name = interner.intern("x");
        assert!(define(&mut heap, env, name, Value::Int(42), false));
        assert_eq!(get(&heap, env, name), Some(Value::Int(42)));
    }

    #[test]
    fn redefining_in_same_scope_fails() {
        let (mut heap, mut interner) = setup();
        let env = create(&mut heap, None);
        let name = interner.intern("x");
        assert!(define(&mut heap, env, name, Value::Int(1), false));
        assert!(!define(&mut heap, env, name, Value::Int(2), false));
    }

    #[test]
    fn lookup_walks_to_enclosing_scope() {
        let (mut heap, mut interner) = setup();
        let parent = create(&mut heap, None);
        let name = interner.intern("x");
        define(&mut heap, parent, name, Value::Int(7), false);
        let child = create(&mut heap, Some(parent));
        assert_eq!(get(&heap, child, name), Some(Value::Int(7)));
        assert_eq!(get_local(&heap, child, name), None);
    }

    #[test]
    fn set_rejects_const_and_unknown_names() {
        let (mut heap, mut interner) = setup();
        let env = create(&mut heap, None);
        let constant = interner.intern("PI");
        define(&mut heap, env, constant, Value::Float(3.14), true);
        assert_eq!(set(&mut heap, env, constant, Value::Float(0.0)), Err(true));

        let unknown = interner.intern("nope");
        assert_eq!(set(&mut heap, env, unknown, Value::Nil), Err(false));
    }

    #[test]
    fn set_updates_binding_in_owning_scope() {
        let (mut heap, mut interner) = setup();
        let parent = create(&mut heap, None);
        let name = interner.intern("count");
        define(&mut heap, parent, name, Value::Int(0), false);
        let child = create(&mut heap, Some(parent));
        assert_eq!(set(&mut heap, child, name, Value::Int(1)), Ok(Value::Int(0)));
        assert_eq!(get(&heap, parent, name), Some(Value::Int(1)));
    }
}
