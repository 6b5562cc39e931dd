use std::collections::BTreeMap;

use crate::frontend::intern::Symbol;

/// A data structure to assist in traversing scopes. Module declarations live
/// in the global scope, which is order independent; blocks and functions push
/// shallow scopes that shadow everything below them.
#[derive(Debug)]
pub(super) struct ScopeStack<R> {
    global_scope: BTreeMap<Symbol, R>,
    stack: Vec<BTreeMap<Symbol, R>>,
}

impl<R> ScopeStack<R> {
    pub fn new() -> Self {
        Self {
            global_scope: BTreeMap::new(),
            stack: Vec::new(),
        }
    }

    /// Creates a new block or function scope
    pub fn push_shallow_scope(&mut self) {
        self.stack.push(BTreeMap::new());
    }

    /// Destroys the current block or function scope
    pub fn pop_shallow_scope(&mut self) {
        debug_assert!(!self.stack.is_empty(), "popped a shallow scope from the global context");

        self.stack.pop();
    }

    /// Looks for a binding only within the current (most nested) scope
    pub fn get_shallow_binding(&self, symbol: Symbol) -> Option<&R> {
        match self.stack.last() {
            Some(scope) => scope.get(&symbol),
            None => self.global_scope.get(&symbol),
        }
    }

    /// Adds a binding within the current (most nested) scope
    pub fn add_shallow_binding(&mut self, symbol: Symbol, resolution: R) {
        match self.stack.last_mut() {
            Some(scope) => scope.insert(symbol, resolution),
            None => self.global_scope.insert(symbol, resolution),
        };
    }

    pub fn get_global_binding(&self, symbol: Symbol) -> Option<&R> {
        self.global_scope.get(&symbol)
    }

    pub fn add_global_binding(&mut self, symbol: Symbol, resolution: R) {
        self.global_scope.insert(symbol, resolution);
    }

    /// Traverses the scope stack from innermost to outermost looking for a
    /// binding before checking the global scope
    pub fn get_binding(&self, symbol: Symbol) -> Option<&R> {
        self.stack
            .iter()
            .rev()
            .find_map(|scope| scope.get(&symbol))
            .or_else(|| self.global_scope.get(&symbol))
    }

    /// Hides every shallow scope, e.g. while resolving a module-scope
    /// declaration from inside a function body. Returns the hidden scopes.
    pub fn take_shallow_scopes(&mut self) -> Vec<BTreeMap<Symbol, R>> {
        std::mem::take(&mut self.stack)
    }

    pub fn restore_shallow_scopes(&mut self, scopes: Vec<BTreeMap<Symbol, R>>) {
        self.stack = scopes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::intern::Interner;

    #[test]
    fn inner_scopes_shadow_outer_ones() {
        let mut interner = Interner::new();
        let x = interner.intern("x");
        let y = interner.intern("y");

        let mut scopes = ScopeStack::new();
        scopes.add_global_binding(x, "global x");
        scopes.add_global_binding(y, "global y");

        scopes.push_shallow_scope();
        scopes.add_shallow_binding(x, "local x");

        assert_eq!(scopes.get_binding(x), Some(&"local x"));
        assert_eq!(scopes.get_binding(y), Some(&"global y"));
        assert_eq!(scopes.get_shallow_binding(y), None);

        scopes.pop_shallow_scope();
        assert_eq!(scopes.get_binding(x), Some(&"global x"));
    }
}
