use hashbrown::HashMap;

/// A string interning table owned by one module. Symbols from different
/// tables must never be mixed.
#[derive(Debug, Default, Clone)]
pub struct Interner {
    strings: Vec<Box<str>>,
    lookup: HashMap<Box<str>, Symbol>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, string: &str) -> Symbol {
        if let Some(symbol) = self.lookup.get(string) {
            return *symbol;
        }

        let symbol = Symbol(self.strings.len() as u32);

        self.strings.push(string.into());
        self.lookup.insert(string.into(), symbol);

        symbol
    }

    pub fn lookup(&self, string: &str) -> Option<Symbol> {
        self.lookup.get(string).copied()
    }

    pub fn resolve(&self, symbol: Symbol) -> &str {
        self.strings
            .get(symbol.0 as usize)
            .map(|s| &**s)
            .unwrap_or("<invalid symbol>")
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

/// An index into an [`Interner`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(u32);

impl Symbol {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut interner = Interner::new();

        let a = interner.intern("position");
        let b = interner.intern("normal");
        let c = interner.intern("position");

        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(interner.resolve(b), "normal");
        assert_eq!(interner.lookup("missing"), None);
        assert_eq!(interner.len(), 2);
    }
}
