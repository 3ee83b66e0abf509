/// The function arena and the call stack used during inlining.
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::ErrorKind;
use crate::instruction::Instr;

pub type FunctionId = u64;

/// A defined function. The body is stored verbatim and re-executed at
/// every call site, so calls inline at compile time.
#[derive(Debug)]
pub struct Function {
    pub id: FunctionId,
    pub name: String,
    pub args: Vec<String>,
    /// Dynamic functions resolve missed lookups through their caller's
    /// frame instead of falling straight to the context table.
    pub dynamic: bool,
    /// Immutable names reject redefinition; the standard library is
    /// registered immutable.
    pub immutable: bool,
    /// How many values the body leaves on the stack.
    pub returns: usize,
    pub body: Vec<Instr>,
}

#[derive(Default)]
pub struct Functions {
    arena: FxHashMap<FunctionId, Rc<Function>>,
    names: FxHashMap<String, FunctionId>,
    next: FunctionId,
}

impl Functions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under its name. Redefinition replaces the
    /// binding unless the existing function is immutable.
    pub fn define(
        &mut self,
        name: String,
        args: Vec<String>,
        dynamic: bool,
        immutable: bool,
        returns: usize,
        body: Vec<Instr>,
    ) -> Result<FunctionId, ErrorKind> {
        if let Some(existing) = self.by_name(&name) {
            if existing.immutable {
                return Err(ErrorKind::ImmutableFunction(name));
            }
        }
        self.next += 1;
        let id = self.next;
        self.names.insert(name.clone(), id);
        self.arena.insert(
            id,
            Rc::new(Function {
                id,
                name,
                args,
                dynamic,
                immutable,
                returns,
                body,
            }),
        );
        Ok(id)
    }

    pub fn by_name(&self, name: &str) -> Option<Rc<Function>> {
        self.names.get(name).and_then(|id| self.by_id(*id))
    }

    pub fn by_id(&self, id: FunctionId) -> Option<Rc<Function>> {
        self.arena.get(&id).cloned()
    }

    pub fn id_of(&self, name: &str) -> Option<FunctionId> {
        self.names.get(name).copied()
    }
}

/// The chain of calls currently being inlined. Membership is O(1) so
/// deep chains stay cheap to police.
#[derive(Default)]
pub struct CallStack {
    frames: Vec<(FunctionId, String)>,
    expanding: FxHashSet<FunctionId>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: FunctionId) -> bool {
        self.expanding.contains(&id)
    }

    pub fn enter(&mut self, id: FunctionId, name: &str) {
        self.frames.push((id, name.to_string()));
        self.expanding.insert(id);
    }

    pub fn leave(&mut self, id: FunctionId) {
        self.expanding.remove(&id);
        self.frames.pop();
    }

    /// Render the offending call chain for a recursion error.
    pub fn trace(&self, id: FunctionId, name: &str) -> String {
        let mut lines: Vec<String> = self
            .frames
            .iter()
            .map(|(fid, fname)| format!("{fname} (#{fid})"))
            .collect();
        lines.push(format!("{name} (#{id})"));
        let width = lines.iter().map(|l| l.len()).max().unwrap_or(0);
        let rule = format!("  +-{}-+", "-".repeat(width));
        let mut out = String::from("recursive function call detected:\n");
        out.push_str(&rule);
        out.push('\n');
        for line in lines {
            out.push_str(&format!("  | {line:<width$} |\n"));
        }
        out.push_str(&rule);
        out
    }
}
