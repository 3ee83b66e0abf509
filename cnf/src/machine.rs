/// The Level 1 stack machine: Tseitin encoding of Boolean gates.
use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use smallvec::smallvec;

use crate::error::{Error, ErrorKind};
use crate::instruction::Instr;
use crate::metadata::Metadata;
use crate::registry::Registry;
use crate::writer::Writer;
use crate::{Clause, Lit};

/// Result of a full Level 1 compilation.
#[derive(Debug, Clone)]
pub struct Output {
    pub metadata: Metadata,
    pub dimacs: String,
}

pub struct Machine {
    registry: Registry,
    stack: Vec<String>,
    table: FxHashMap<String, Lit>,
    clauses: Vec<Clause>,
    true_symbol: Option<String>,
    false_symbol: Option<String>,
    /// Exposed symbol -> literal, in deterministic order for the header.
    variables: BTreeMap<String, Lit>,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        Self {
            registry: Registry::new("1"),
            stack: Vec::new(),
            table: FxHashMap::default(),
            clauses: Vec::new(),
            true_symbol: None,
            false_symbol: None,
            variables: BTreeMap::new(),
        }
    }

    /// Process one instruction, tagging any failure with it.
    pub fn call(&mut self, instr: &Instr) -> Result<(), Error> {
        self.exec(instr).map_err(|kind| Error::at(instr, kind))
    }

    /// Batch entry point: run every instruction, then render DIMACS.
    pub fn compile(instructions: &[Instr], metadata: Metadata) -> Result<Output, Error> {
        let mut machine = Machine::new();
        for instr in instructions {
            machine.call(instr)?;
        }
        Ok(machine.finish(metadata))
    }

    /// Attach the Level 1 variable dictionary and render the DIMACS text.
    pub fn finish(self, mut metadata: Metadata) -> Output {
        metadata.level1_variables = self.variables;
        let dimacs = Writer::render(&metadata, self.registry.max_literal(), &self.clauses);
        Output { metadata, dimacs }
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn clause_count(&self) -> usize {
        self.clauses.len()
    }

    pub fn max_literal(&self) -> Lit {
        self.registry.max_literal()
    }

    pub fn variables(&self) -> &BTreeMap<String, Lit> {
        &self.variables
    }

    // ========================================================================
    // Instruction dispatch
    // ========================================================================

    fn exec(&mut self, instr: &Instr) -> Result<(), ErrorKind> {
        match instr {
            Instr::Push(symbol) => {
                self.reserve(symbol);
                self.stack.push(symbol.clone());
                Ok(())
            }
            Instr::Pop(symbol) => {
                let lit = self.pop_lit()?;
                self.table.insert(symbol.clone(), lit);
                Ok(())
            }
            Instr::Not => {
                let x = self.pop_lit()?;
                let (name, _) = self.gate_not(x);
                self.stack.push(name);
                Ok(())
            }
            Instr::And => {
                let y = self.pop_lit()?;
                let x = self.pop_lit()?;
                let (name, _) = self.gate_and(x, y);
                self.stack.push(name);
                Ok(())
            }
            Instr::Or => {
                let y = self.pop_lit()?;
                let x = self.pop_lit()?;
                let (name, _) = self.gate_or(x, y);
                self.stack.push(name);
                Ok(())
            }
            Instr::Equal => {
                let y = self.pop_lit()?;
                let x = self.pop_lit()?;
                let (name, _) = self.gate_equal(x, y);
                self.stack.push(name);
                Ok(())
            }
            Instr::True => {
                let name = self.constant(true);
                self.stack.push(name);
                Ok(())
            }
            Instr::False => {
                let name = self.constant(false);
                self.stack.push(name);
                Ok(())
            }
            Instr::Variable(symbol) => {
                let lit = self.lookup(symbol)?;
                self.variables.insert(symbol.clone(), lit);
                Ok(())
            }
            Instr::Duplicate => {
                let top = self
                    .stack
                    .last()
                    .cloned()
                    .ok_or(ErrorKind::StackUnderflow)?;
                self.stack.push(top);
                Ok(())
            }
            Instr::Swap => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(ErrorKind::StackUnderflow);
                }
                self.stack.swap(len - 1, len - 2);
                Ok(())
            }
            Instr::If => {
                let e = self.pop_lit()?;
                let t = self.pop_lit()?;
                let c = self.pop_lit()?;
                // z = (c AND t) OR (NOT c AND e): 2 + 3 + 3 + 3 = 11 clauses.
                let (_, not_c) = self.gate_not(c);
                let (_, hi) = self.gate_and(c, t);
                let (_, lo) = self.gate_and(not_c, e);
                let (name, _) = self.gate_or(hi, lo);
                self.stack.push(name);
                Ok(())
            }
            Instr::Invariant => {
                let lit = self.pop_lit()?;
                self.emit(smallvec![lit]);
                Ok(())
            }
        }
    }

    // ========================================================================
    // Stack and symbol-table helpers
    // ========================================================================

    fn lookup(&self, symbol: &str) -> Result<Lit, ErrorKind> {
        self.table
            .get(symbol)
            .copied()
            .ok_or_else(|| ErrorKind::UndefinedSymbol(symbol.to_string()))
    }

    /// Allocate a fresh unconstrained literal for an unknown symbol. The
    /// tautological clause reserves the literal so unused free variables
    /// still appear in the variable count.
    fn reserve(&mut self, symbol: &str) {
        if !self.table.contains_key(symbol) {
            let lit = self.registry.next_literal();
            self.table.insert(symbol.to_string(), lit);
            self.emit(smallvec![lit, -lit]);
        }
    }

    fn pop_lit(&mut self) -> Result<Lit, ErrorKind> {
        let name = self.stack.pop().ok_or(ErrorKind::StackUnderflow)?;
        self.lookup(&name)
    }

    fn emit(&mut self, clause: Clause) {
        self.clauses.push(clause);
    }

    /// Bind a fresh symbol to a fresh literal.
    fn fresh(&mut self) -> (String, Lit) {
        let name = self.registry.next_symbol();
        let lit = self.registry.next_literal();
        self.table.insert(name.clone(), lit);
        (name, lit)
    }

    // ========================================================================
    // Gates
    // ========================================================================

    fn gate_not(&mut self, x: Lit) -> (String, Lit) {
        let (name, z) = self.fresh();
        self.emit(smallvec![x, z]);
        self.emit(smallvec![-x, -z]);
        (name, z)
    }

    fn gate_and(&mut self, x: Lit, y: Lit) -> (String, Lit) {
        let (name, z) = self.fresh();
        self.emit(smallvec![-x, -y, z]);
        self.emit(smallvec![x, -z]);
        self.emit(smallvec![y, -z]);
        (name, z)
    }

    fn gate_or(&mut self, x: Lit, y: Lit) -> (String, Lit) {
        let (name, z) = self.fresh();
        self.emit(smallvec![x, y, -z]);
        self.emit(smallvec![-x, z]);
        self.emit(smallvec![-y, z]);
        (name, z)
    }

    fn gate_equal(&mut self, x: Lit, y: Lit) -> (String, Lit) {
        let (name, z) = self.fresh();
        self.emit(smallvec![-x, -y, z]);
        self.emit(smallvec![x, y, z]);
        self.emit(smallvec![x, -y, -z]);
        self.emit(smallvec![-x, y, -z]);
        (name, z)
    }

    /// Memoized constant: one unit clause per polarity per compilation,
    /// repeat calls reuse the same literal.
    fn constant(&mut self, value: bool) -> String {
        let memo = if value {
            &self.true_symbol
        } else {
            &self.false_symbol
        };
        if let Some(name) = memo {
            return name.clone();
        }
        let (name, lit) = self.fresh();
        self.emit(smallvec![if value { lit } else { -lit }]);
        if value {
            self.true_symbol = Some(name.clone());
        } else {
            self.false_symbol = Some(name.clone());
        }
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(instrs: &[Instr]) -> Machine {
        let mut m = Machine::new();
        for i in instrs {
            m.call(i).unwrap();
        }
        m
    }

    #[test]
    fn push_unknown_reserves_literal_with_tautology() {
        let m = run(&[Instr::Push("a".into())]);
        assert_eq!(m.max_literal(), 1);
        assert_eq!(m.clauses(), &[Clause::from_slice(&[1, -1])]);
    }

    #[test]
    fn push_known_emits_nothing() {
        let m = run(&[Instr::Push("a".into()), Instr::Push("a".into())]);
        assert_eq!(m.max_literal(), 1);
        assert_eq!(m.clause_count(), 1);
    }

    #[test]
    fn not_emits_two_clauses() {
        let m = run(&[Instr::Push("a".into()), Instr::Not]);
        // 1 reservation clause + 2 gate clauses
        assert_eq!(m.clause_count(), 3);
        assert_eq!(m.clauses()[1], Clause::from_slice(&[1, 2]));
        assert_eq!(m.clauses()[2], Clause::from_slice(&[-1, -2]));
    }

    #[test]
    fn and_emits_three_clauses() {
        let m = run(&[Instr::Push("a".into()), Instr::Push("b".into()), Instr::And]);
        assert_eq!(m.clause_count(), 2 + 3);
        assert_eq!(m.clauses()[2], Clause::from_slice(&[-1, -2, 3]));
        assert_eq!(m.clauses()[3], Clause::from_slice(&[1, -3]));
        assert_eq!(m.clauses()[4], Clause::from_slice(&[2, -3]));
    }

    #[test]
    fn or_emits_three_clauses() {
        let m = run(&[Instr::Push("a".into()), Instr::Push("b".into()), Instr::Or]);
        assert_eq!(m.clause_count(), 2 + 3);
        assert_eq!(m.clauses()[2], Clause::from_slice(&[1, 2, -3]));
        assert_eq!(m.clauses()[3], Clause::from_slice(&[-1, 3]));
        assert_eq!(m.clauses()[4], Clause::from_slice(&[-2, 3]));
    }

    #[test]
    fn equal_emits_four_clauses() {
        let m = run(&[
            Instr::Push("a".into()),
            Instr::Push("b".into()),
            Instr::Equal,
        ]);
        assert_eq!(m.clause_count(), 2 + 4);
    }

    #[test]
    fn if_emits_eleven_clauses() {
        let m = run(&[
            Instr::Push("c".into()),
            Instr::Push("t".into()),
            Instr::Push("e".into()),
            Instr::If,
        ]);
        assert_eq!(m.clause_count(), 3 + 11);
    }

    #[test]
    fn invariant_emits_unit_clause() {
        let m = run(&[Instr::Push("a".into()), Instr::Invariant]);
        assert_eq!(m.clauses()[1], Clause::from_slice(&[1]));
    }

    #[test]
    fn constants_are_memoized() {
        let m = run(&[Instr::True, Instr::True, Instr::False, Instr::False]);
        // one unit clause per polarity, no duplicates
        assert_eq!(m.clause_count(), 2);
        assert_eq!(m.max_literal(), 2);
        assert_eq!(m.clauses()[0], Clause::from_slice(&[1]));
        assert_eq!(m.clauses()[1], Clause::from_slice(&[-2]));
    }

    #[test]
    fn pop_binds_symbol_to_literal() {
        let m = run(&[
            Instr::Push("a".into()),
            Instr::Pop("b".into()),
            Instr::Push("b".into()),
            Instr::Invariant,
        ]);
        // b aliases a's literal: the invariant is on literal 1
        assert_eq!(m.clauses().last().unwrap(), &Clause::from_slice(&[1]));
    }

    #[test]
    fn duplicate_and_swap() {
        let m = run(&[
            Instr::Push("a".into()),
            Instr::Push("b".into()),
            Instr::Duplicate,
            Instr::Invariant, // b
            Instr::Swap,
            Instr::Invariant, // a
        ]);
        let n = m.clause_count();
        assert_eq!(m.clauses()[n - 2], Clause::from_slice(&[2]));
        assert_eq!(m.clauses()[n - 1], Clause::from_slice(&[1]));
    }

    #[test]
    fn variable_records_exposed_literal() {
        let m = run(&[Instr::Push("a".into()), Instr::Variable("a".into())]);
        assert_eq!(m.variables().get("a"), Some(&1));
    }

    #[test]
    fn pop_on_empty_stack_is_fatal() {
        let mut m = Machine::new();
        let err = m.call(&Instr::Pop("x".into())).unwrap_err();
        assert!(err.to_string().contains("level 1"));
        assert!(err.to_string().contains("pop x"));
        assert!(err.to_string().contains("empty stack"));
    }

    #[test]
    fn variable_on_unset_symbol_is_fatal() {
        let mut m = Machine::new();
        let err = m.call(&Instr::Variable("ghost".into())).unwrap_err();
        assert!(err.to_string().contains("undefined symbol `ghost`"));
    }
}
