/// Unit-propagation evaluator for generated CNF, used by integration tests.
///
/// Tseitin circuits are fully determined by their inputs: once the input
/// literals are assumed, repeated unit propagation fixes every gate output.
/// This is an evaluator, not a solver; it never branches.
use rustc_hash::FxHashMap;

use crate::Lit;

#[derive(Debug)]
pub struct Simulation {
    clauses: Vec<Vec<Lit>>,
    values: FxHashMap<Lit, bool>,
}

impl Simulation {
    /// Parse the clause section of a DIMACS text. Comment and problem lines
    /// are skipped.
    pub fn from_dimacs(text: &str) -> Self {
        let mut clauses = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('c') || line.starts_with('p') {
                continue;
            }
            let clause: Vec<Lit> = line
                .split_whitespace()
                .filter_map(|tok| tok.parse::<Lit>().ok())
                .take_while(|&lit| lit != 0)
                .collect();
            if !clause.is_empty() {
                clauses.push(clause);
            }
        }
        Self {
            clauses,
            values: FxHashMap::default(),
        }
    }

    /// Assume a literal true (negative literal assumes the variable false).
    pub fn assume(&mut self, lit: Lit) {
        self.values.insert(lit.abs(), lit > 0);
    }

    pub fn value(&self, var: Lit) -> Option<bool> {
        self.values.get(&var.abs()).copied()
    }

    fn lit_value(&self, lit: Lit) -> Option<bool> {
        self.value(lit).map(|v| if lit > 0 { v } else { !v })
    }

    /// Run unit propagation to fixpoint. Returns the index of the first
    /// falsified clause, if any.
    pub fn propagate(&mut self) -> Result<(), usize> {
        loop {
            let mut changed = false;
            for (idx, clause) in self.clauses.iter().enumerate() {
                let mut unassigned = None;
                let mut satisfied = false;
                let mut open = 0;
                for &lit in clause {
                    match self.lit_value(lit) {
                        Some(true) => {
                            satisfied = true;
                            break;
                        }
                        Some(false) => {}
                        None => {
                            open += 1;
                            unassigned = Some(lit);
                        }
                    }
                }
                if satisfied {
                    continue;
                }
                match (open, unassigned) {
                    (0, _) => return Err(idx),
                    (1, Some(lit)) => {
                        self.values.insert(lit.abs(), lit > 0);
                        changed = true;
                    }
                    _ => {}
                }
            }
            if !changed {
                return Ok(());
            }
        }
    }

    /// True when every clause contains at least one true literal.
    pub fn all_clauses_satisfied(&self) -> bool {
        self.clauses.iter().all(|clause| {
            clause
                .iter()
                .any(|&lit| self.lit_value(lit) == Some(true))
        })
    }
}
