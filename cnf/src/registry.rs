/// Fresh-name and fresh-literal registry.
///
/// One registry per compiler instance, never shared and never static, so
/// independent compilations cannot collide. Symbol names carry a level tag
/// so that nested machines mint disjoint namespaces.
use crate::Lit;

#[derive(Debug)]
pub struct Registry {
    tag: &'static str,
    next_symbol: u64,
    next_literal: Lit,
}

impl Registry {
    pub fn new(tag: &'static str) -> Self {
        Self {
            tag,
            next_symbol: 0,
            next_literal: 0,
        }
    }

    /// Mint a globally unique symbol name, e.g. `$1:17`.
    pub fn next_symbol(&mut self) -> String {
        self.next_symbol += 1;
        format!("${}:{}", self.tag, self.next_symbol)
    }

    /// Mint a fresh 1-based literal index (positive polarity).
    pub fn next_literal(&mut self) -> Lit {
        self.next_literal += 1;
        self.next_literal
    }

    /// Highest literal index handed out so far (0 if none).
    pub fn max_literal(&self) -> Lit {
        self.next_literal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_are_tagged_and_unique() {
        let mut r = Registry::new("1");
        assert_eq!(r.next_symbol(), "$1:1");
        assert_eq!(r.next_symbol(), "$1:2");
        let mut r2 = Registry::new("2");
        assert_eq!(r2.next_symbol(), "$2:1");
    }

    #[test]
    fn literals_start_at_one() {
        let mut r = Registry::new("1");
        assert_eq!(r.max_literal(), 0);
        assert_eq!(r.next_literal(), 1);
        assert_eq!(r.next_literal(), 2);
        assert_eq!(r.max_literal(), 2);
    }
}
