/// Lowers the parsed AST to Level 3 instructions.
///
/// Operators, indexing and the ternary become calls of the standard
/// library's immutable functions; iteration macros (`times`, `upto`,
/// `downto`, `eachCombination`, `eachCons`, `eachSlice`, `reduce`)
/// expand here because their shape arguments must be compile-time
/// constants. Function literals are hoisted into uniquely named
/// top-level definitions and replaced by pointers at the use site.
use std::fmt;

use rustc_hash::FxHashMap;
use sentient_parser::ast::{
    AssignOp, BinOp, Expr, FunctionDecl, Program, Span, Stmt, TypeSpec, UnOp,
};
use structures::{Const, Instr, TypeSpec as L3Type};

#[derive(Debug, Clone)]
pub struct LoweringError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl LoweringError {
    fn at(span: Span, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: span.line,
            col: span.col,
        }
    }
}

impl fmt::Display for LoweringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot lower line {}, col {}: {}",
            self.line, self.col, self.message
        )
    }
}

impl std::error::Error for LoweringError {}

/// Lower a whole program. `returns` seeds the produced-value counts
/// with the standard library's; hoisted definitions come first in the
/// output so every pointer resolves by the time it is pushed.
pub fn lower(
    program: &Program,
    returns: FxHashMap<String, usize>,
) -> Result<Vec<Instr>, LoweringError> {
    let mut lowering = Lowering {
        out: Vec::new(),
        hoisted: Vec::new(),
        returns,
        next_anon: 0,
        next_discard: 0,
        depth: 0,
    };
    for stmt in &program.stmts {
        lowering.stmt(stmt)?;
    }
    let mut instrs = lowering.hoisted;
    instrs.extend(lowering.out);
    Ok(instrs)
}

struct Lowering {
    out: Vec<Instr>,
    hoisted: Vec<Instr>,
    /// Function name to how many values a call leaves on the stack.
    returns: FxHashMap<String, usize>,
    next_anon: usize,
    next_discard: usize,
    /// Function definition nesting; declarations inside a body bind
    /// locally.
    depth: usize,
}

impl Lowering {
    // ========================================================================
    // Statements
    // ========================================================================

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), LoweringError> {
        match stmt {
            Stmt::Declaration { spec, names, .. } => {
                let spec = lower_type(spec);
                for name in names {
                    self.out.push(Instr::Typedef {
                        symbol: name.clone(),
                        spec: spec.clone(),
                        local: self.depth > 0,
                    });
                }
                Ok(())
            }
            Stmt::Assignment {
                targets,
                op,
                values,
                span,
            } => self.assignment(targets, *op, values, *span),
            Stmt::Invariant { exprs, .. } => {
                for expr in exprs {
                    self.value(expr)?;
                    self.out.push(Instr::Invariant);
                }
                Ok(())
            }
            Stmt::Vary { names, .. } => {
                for name in names {
                    self.out.push(Instr::Variable {
                        symbol: name.clone(),
                    });
                }
                Ok(())
            }
            Stmt::Function(decl) => {
                let Some(name) = decl.name.clone() else {
                    return Err(LoweringError::at(
                        decl.span,
                        "a function statement needs a name",
                    ));
                };
                self.function(&name, decl)
            }
            Stmt::Expr(expr) => {
                let produced = self.expr(expr)?;
                for _ in 0..produced {
                    let symbol = format!("$discard:{}", self.next_discard);
                    self.next_discard += 1;
                    self.out.push(Instr::Pop {
                        symbol,
                        local: false,
                    });
                }
                Ok(())
            }
        }
    }

    fn assignment(
        &mut self,
        targets: &[String],
        op: AssignOp,
        values: &[Expr],
        span: Span,
    ) -> Result<(), LoweringError> {
        if let Some(name) = op_function(op) {
            // Compound: single target, read-modify-write.
            let target = &targets[0];
            self.out.push(Instr::Push {
                symbol: target.clone(),
            });
            self.value(&values[0])?;
            self.out.push(Instr::Call {
                name: name.into(),
                argc: 2,
            });
            self.out.push(Instr::Pop {
                symbol: target.clone(),
                local: false,
            });
            return Ok(());
        }

        let mut produced = 0;
        for value in values {
            produced += self.produced(value)?;
        }
        if produced != targets.len() {
            return Err(LoweringError::at(
                span,
                format!(
                    "expected {} value(s) but the right-hand side produces {}",
                    targets.len(),
                    produced
                ),
            ));
        }
        for value in values {
            self.expr(value)?;
        }
        for target in targets.iter().rev() {
            self.out.push(Instr::Pop {
                symbol: target.clone(),
                local: false,
            });
        }
        Ok(())
    }

    // ========================================================================
    // Functions
    // ========================================================================

    fn function(&mut self, name: &str, decl: &FunctionDecl) -> Result<(), LoweringError> {
        // Provisional entry so the body can reference itself; the L3
        // machine reports the recursion with a call trace.
        self.returns.insert(name.to_string(), decl.returns.len());
        self.out.push(Instr::Define {
            name: name.to_string(),
            args: decl.args.clone(),
            dynamic: decl.dynamic,
            immutable: false,
        });
        self.depth += 1;
        for stmt in &decl.body {
            self.stmt(stmt)?;
        }
        let mut count = 0;
        for expr in &decl.returns {
            count += self.expr(expr)?;
        }
        self.depth -= 1;
        self.returns.insert(name.to_string(), count);
        self.out.push(Instr::Return { count });
        Ok(())
    }

    /// Hoist an anonymous literal into a uniquely named top-level
    /// definition; the caller pushes a pointer to it.
    fn hoist(&mut self, decl: &FunctionDecl) -> Result<String, LoweringError> {
        let name = format!("$anon:{}", self.next_anon);
        self.next_anon += 1;
        let saved = std::mem::take(&mut self.out);
        let saved_depth = std::mem::replace(&mut self.depth, 0);
        let result = self.function(&name, decl);
        let body = std::mem::replace(&mut self.out, saved);
        self.depth = saved_depth;
        result?;
        self.hoisted.extend(body);
        Ok(name)
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    /// How many values an expression leaves on the stack. Everything
    /// is one except calls of multi-return functions and the
    /// iteration macros.
    fn produced(&self, expr: &Expr) -> Result<usize, LoweringError> {
        match expr {
            Expr::Call { name, span, .. } => self.lookup(name, *span),
            Expr::Method { name, span, .. } => match name.as_str() {
                "times" | "upto" | "downto" | "eachCombination" | "eachCons" | "eachSlice" => {
                    Ok(0)
                }
                "reduce" => Ok(1),
                _ => self.lookup(name, *span),
            },
            _ => Ok(1),
        }
    }

    fn lookup(&self, name: &str, span: Span) -> Result<usize, LoweringError> {
        self.returns.get(name).copied().ok_or_else(|| {
            LoweringError::at(span, format!("unknown function `{name}`"))
        })
    }

    /// Lower an expression that must produce exactly one value.
    fn value(&mut self, expr: &Expr) -> Result<(), LoweringError> {
        let produced = self.produced(expr)?;
        if produced != 1 {
            return Err(LoweringError::at(
                expr.span(),
                format!("expected a single value here, found {produced}"),
            ));
        }
        self.expr(expr)?;
        Ok(())
    }

    /// Lower any expression; returns how many values it pushed.
    fn expr(&mut self, expr: &Expr) -> Result<usize, LoweringError> {
        match expr {
            Expr::Integer { value, .. } => {
                self.out.push(Instr::Constant(Const::Integer(*value)));
                Ok(1)
            }
            Expr::Boolean { value, .. } => {
                self.out.push(Instr::Constant(Const::Boolean(*value)));
                Ok(1)
            }
            Expr::Ident { name, .. } => {
                // A name that resolves to a function becomes a
                // first-class pointer; anything else is a variable.
                if self.returns.contains_key(name) {
                    self.out.push(Instr::Pointer { name: name.clone() });
                } else {
                    self.out.push(Instr::Push {
                        symbol: name.clone(),
                    });
                }
                Ok(1)
            }
            Expr::Array { elements, .. } => {
                for element in elements {
                    self.value(element)?;
                }
                self.out.push(Instr::Collect {
                    count: elements.len(),
                });
                Ok(1)
            }
            Expr::Unary { op, operand, .. } => {
                // Fold a negated literal so `-8` fits its declared
                // width instead of widening through negate.
                if let (UnOp::Neg, Expr::Integer { value, .. }) = (op, operand.as_ref()) {
                    self.out.push(Instr::Constant(Const::Integer(-value)));
                    return Ok(1);
                }
                self.value(operand)?;
                let name = match op {
                    UnOp::Neg => "-@",
                    UnOp::Not => "!",
                };
                self.out.push(Instr::Call {
                    name: name.into(),
                    argc: 1,
                });
                Ok(1)
            }
            Expr::Binary { op, lhs, rhs, .. } => {
                self.value(lhs)?;
                self.value(rhs)?;
                self.out.push(Instr::Call {
                    name: binop_function(*op).into(),
                    argc: 2,
                });
                Ok(1)
            }
            Expr::Ternary {
                cond, then, els, ..
            } => {
                self.value(cond)?;
                self.value(then)?;
                self.value(els)?;
                self.out.push(Instr::Call {
                    name: "if".into(),
                    argc: 3,
                });
                Ok(1)
            }
            Expr::Index { object, index, .. } => {
                self.value(object)?;
                self.value(index)?;
                self.out.push(Instr::Call {
                    name: "[]".into(),
                    argc: 2,
                });
                Ok(1)
            }
            Expr::Call { name, args, span } => {
                let produced = self.lookup(name, *span)?;
                for arg in args {
                    self.value(arg)?;
                }
                self.out.push(Instr::Call {
                    name: name.clone(),
                    argc: args.len(),
                });
                Ok(produced)
            }
            Expr::Method {
                receiver,
                name,
                args,
                span,
            } => self.method(receiver, name, args, *span),
            Expr::Function(decl) => {
                let name = self.hoist(decl)?;
                self.out.push(Instr::Pointer { name });
                Ok(1)
            }
        }
    }

    // ========================================================================
    // Methods and iteration macros
    // ========================================================================

    fn method(
        &mut self,
        receiver: &Expr,
        name: &str,
        args: &[Expr],
        span: Span,
    ) -> Result<usize, LoweringError> {
        match name {
            "times" => {
                let bound = int_literal(receiver)?;
                if bound < 0 {
                    return Err(LoweringError::at(span, "times needs a non-negative count"));
                }
                let [callback] = args else {
                    return Err(LoweringError::at(span, "times takes one callback"));
                };
                self.range_each((0..bound).collect(), callback)
            }
            "upto" => {
                let from = int_literal(receiver)?;
                let [to, callback] = args else {
                    return Err(LoweringError::at(span, "upto takes a bound and a callback"));
                };
                let to = int_literal(to)?;
                self.range_each((from..=to).collect(), callback)
            }
            "downto" => {
                let from = int_literal(receiver)?;
                let [to, callback] = args else {
                    return Err(LoweringError::at(span, "downto takes a bound and a callback"));
                };
                let to = int_literal(to)?;
                self.range_each((to..=from).rev().collect(), callback)
            }
            "eachCombination" | "eachCons" | "eachSlice" => {
                let [size, callback] = args else {
                    return Err(LoweringError::at(
                        span,
                        format!("{name} takes a size and a callback"),
                    ));
                };
                let size = int_literal(size)?;
                if size < 0 {
                    return Err(LoweringError::at(span, format!("{name} size must be non-negative")));
                }
                let size = size as usize;
                self.value(receiver)?;
                self.value(callback)?;
                self.out.push(match name {
                    "eachCombination" => Instr::EachCombination { size },
                    "eachCons" => Instr::EachCons { size },
                    _ => Instr::EachSlice { size },
                });
                Ok(0)
            }
            "reduce" => {
                self.value(receiver)?;
                match args {
                    [callback] => {
                        self.value(callback)?;
                        self.out.push(Instr::Reduce {
                            with_initial: false,
                        });
                    }
                    [initial, callback] => {
                        self.value(initial)?;
                        self.value(callback)?;
                        self.out.push(Instr::Reduce { with_initial: true });
                    }
                    _ => {
                        return Err(LoweringError::at(
                            span,
                            "reduce takes a callback and an optional initial value",
                        ));
                    }
                }
                Ok(1)
            }
            _ => {
                // Plain method sugar: the receiver is the first
                // argument of the named function.
                let produced = self.lookup(name, span)?;
                self.value(receiver)?;
                for arg in args {
                    self.value(arg)?;
                }
                self.out.push(Instr::Call {
                    name: name.to_string(),
                    argc: args.len() + 1,
                });
                Ok(produced)
            }
        }
    }

    /// `times`/`upto`/`downto` expand to `each` over a constant array.
    fn range_each(&mut self, values: Vec<i64>, callback: &Expr) -> Result<usize, LoweringError> {
        let count = values.len();
        for value in values {
            self.out.push(Instr::Constant(Const::Integer(value)));
        }
        self.out.push(Instr::Collect { count });
        self.value(callback)?;
        self.out.push(Instr::Each);
        Ok(0)
    }
}

// ============================================================================
// Tables
// ============================================================================

fn lower_type(spec: &TypeSpec) -> L3Type {
    match spec {
        TypeSpec::Bool => L3Type::Boolean,
        TypeSpec::Int { width } => L3Type::Integer { width: *width },
        TypeSpec::Array { length, element } => L3Type::Array {
            length: *length,
            element: Box::new(lower_type(element)),
        },
    }
}

fn binop_function(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::Eq => "==",
        BinOp::Neq => "!=",
        BinOp::And => "&&",
        BinOp::Or => "||",
    }
}

fn op_function(op: AssignOp) -> Option<&'static str> {
    match op {
        AssignOp::Assign => None,
        AssignOp::Add => Some("+"),
        AssignOp::Sub => Some("-"),
        AssignOp::Mul => Some("*"),
        AssignOp::Div => Some("/"),
        AssignOp::Mod => Some("%"),
    }
}

/// Macros need their shape arguments at compile time.
fn int_literal(expr: &Expr) -> Result<i64, LoweringError> {
    match expr {
        Expr::Integer { value, .. } => Ok(*value),
        Expr::Unary {
            op: UnOp::Neg,
            operand,
            ..
        } => match operand.as_ref() {
            Expr::Integer { value, .. } => Ok(-value),
            _ => Err(LoweringError::at(
                expr.span(),
                "this argument must be an integer literal",
            )),
        },
        _ => Err(LoweringError::at(
            expr.span(),
            "this argument must be an integer literal",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stdlib;
    use sentient_parser::parse_program;

    fn lowered(source: &str) -> Vec<Instr> {
        let program = parse_program(source).unwrap();
        let (_, returns) = stdlib::prelude();
        lower(&program, returns).unwrap()
    }

    fn lowering_error(source: &str) -> LoweringError {
        let program = parse_program(source).unwrap();
        let (_, returns) = stdlib::prelude();
        lower(&program, returns).unwrap_err()
    }

    #[test]
    fn operators_call_the_standard_library() {
        let instrs = lowered("int4 a, b; invariant a + b == 7;");
        assert!(instrs.contains(&Instr::Call {
            name: "+".into(),
            argc: 2
        }));
        assert!(instrs.contains(&Instr::Call {
            name: "==".into(),
            argc: 2
        }));
        assert_eq!(instrs.last(), Some(&Instr::Invariant));
    }

    #[test]
    fn declarations_expand_per_name() {
        let instrs = lowered("int6 a, b;");
        let typedefs = instrs
            .iter()
            .filter(|i| matches!(i, Instr::Typedef { local: false, .. }))
            .count();
        assert_eq!(typedefs, 2);
    }

    #[test]
    fn destructuring_pops_targets_in_reverse() {
        let instrs = lowered("int4 a, b; q, r = a.divmod(b);");
        let pops: Vec<&str> = instrs
            .iter()
            .filter_map(|i| match i {
                Instr::Pop { symbol, .. } => Some(symbol.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(pops, vec!["r", "q"]);
    }

    #[test]
    fn arity_mismatch_is_a_lowering_error() {
        let err = lowering_error("int4 a, b; q, r, s = a.divmod(b);");
        assert!(err.message.contains("produces 2"));
    }

    #[test]
    fn compound_assignment_reads_then_writes() {
        let instrs = lowered("int4 a; a += 1;");
        let call = instrs
            .iter()
            .position(|i| matches!(i, Instr::Call { name, .. } if name == "+"))
            .unwrap();
        assert!(matches!(&instrs[call - 2], Instr::Push { symbol } if symbol == "a"));
        assert!(matches!(&instrs[call + 1], Instr::Pop { symbol, .. } if symbol == "a"));
    }

    #[test]
    fn function_literals_are_hoisted_before_user_code() {
        let instrs = lowered(
            "array3<int4> xs; xs.each(function (x) { invariant x >= 0; return; });",
        );
        let define = instrs
            .iter()
            .position(|i| matches!(i, Instr::Define { name, .. } if name.starts_with("$anon:")))
            .unwrap();
        let typedef = instrs
            .iter()
            .position(|i| matches!(i, Instr::Typedef { .. }))
            .unwrap();
        assert!(define < typedef);
        assert!(instrs.contains(&Instr::Pointer {
            name: "$anon:0".into()
        }));
    }

    #[test]
    fn times_expands_to_each_over_constants() {
        let instrs = lowered("3.times(function (i) { invariant i >= 0; return; });");
        let constants = instrs
            .iter()
            .filter(|i| matches!(i, Instr::Constant(Const::Integer(_))))
            .count();
        assert!(instrs.contains(&Instr::Collect { count: 3 }));
        assert!(instrs.contains(&Instr::Each));
        // 0, 1, 2 plus the literal inside the callback body
        assert!(constants >= 3);
    }

    #[test]
    fn downto_counts_backwards() {
        let instrs = lowered("3.downto(1, function (i) { invariant i >= 1; return; });");
        let values: Vec<i64> = instrs
            .iter()
            .filter_map(|i| match i {
                Instr::Constant(Const::Integer(v)) => Some(*v),
                _ => None,
            })
            .collect();
        let run = values.windows(3).any(|w| w == [3, 2, 1]);
        assert!(run, "expected 3, 2, 1 in {values:?}");
    }

    #[test]
    fn each_combination_needs_a_literal_size() {
        let err = lowering_error(
            "array4<int4> xs; int2 k; xs.eachCombination(k, function (c) { return; });",
        );
        assert!(err.message.contains("integer literal"));
    }

    #[test]
    fn expression_statements_discard_their_values() {
        let instrs = lowered("int4 a; a.abs;");
        assert!(instrs
            .iter()
            .any(|i| matches!(i, Instr::Pop { symbol, .. } if symbol.starts_with("$discard:"))));
    }

    #[test]
    fn negated_literals_fold_into_constants() {
        let instrs = lowered("int4 a; invariant a == -8;");
        assert!(instrs.contains(&Instr::Constant(Const::Integer(-8))));
        assert!(!instrs.iter().any(|i| matches!(i, Instr::Call { name, .. } if name == "-@")));
    }

    #[test]
    fn vary_exposes_each_name() {
        let instrs = lowered("int4 a, b; vary a, b;");
        let exposed: Vec<&str> = instrs
            .iter()
            .filter_map(|i| match i {
                Instr::Variable { symbol } => Some(symbol.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(exposed, vec!["a", "b"]);
    }
}
