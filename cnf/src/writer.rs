/// DIMACS CNF writer.
///
/// Output layout:
///   c Sentient Machine Code, Version 1.0
///   c <pretty-printed JSON metadata, one comment per line>
///   p cnf <maxVariableIndex> <clauseCount>
///   <one line per clause, space-separated literals, 0-terminated>
use crate::metadata::Metadata;
use crate::{Clause, Lit};

pub const HEADER: &str = "c Sentient Machine Code, Version 1.0";

pub struct Writer;

impl Writer {
    pub fn render(metadata: &Metadata, max_literal: Lit, clauses: &[Clause]) -> String {
        let mut out = String::new();
        out.push_str(HEADER);
        out.push('\n');

        let json = serde_json::to_string_pretty(&metadata.to_json())
            .unwrap_or_else(|_| "{}".to_string());
        for line in json.lines() {
            out.push_str("c ");
            out.push_str(line);
            out.push('\n');
        }

        out.push_str(&format!("p cnf {} {}\n", max_literal, clauses.len()));
        for clause in clauses {
            for lit in clause {
                out.push_str(&lit.to_string());
                out.push(' ');
            }
            out.push_str("0\n");
        }
        out
    }
}
