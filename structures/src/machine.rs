/// The Level 3 stack machine: structures, inlining and scoping.
///
/// The stack holds context-table names, never values, so a value can be
/// aliased cheaply. Function frames are hash values living in the same
/// context table; argument binding is a name-to-name mapping resolved
/// at each lookup.
use std::collections::BTreeMap;

use arith::Instr as L2;
use cnf::{Metadata, Registry, Shape};
use rustc_hash::FxHashMap;

use crate::combinatorics::combinations;
use crate::error::{Error, ErrorKind};
use crate::functions::{CallStack, FunctionId, Functions};
use crate::instruction::{Const, Instr, TypeSpec};
use crate::value::Value;

struct Frame {
    /// Context name of the hash holding this frame's bindings.
    hash_symbol: String,
    dynamic: bool,
}

struct Defining {
    name: String,
    args: Vec<String>,
    dynamic: bool,
    immutable: bool,
    returns: usize,
    body: Vec<Instr>,
    /// Nesting depth of inner definitions being captured verbatim.
    depth: usize,
}

pub struct Machine {
    registry: Registry,
    stack: Vec<String>,
    context: FxHashMap<String, Value>,
    frames: Vec<Frame>,
    functions: Functions,
    calls: CallStack,
    defining: Option<Defining>,
    out: Vec<L2>,
    variables: BTreeMap<String, Shape>,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        Self {
            registry: Registry::new("3"),
            stack: Vec::new(),
            context: FxHashMap::default(),
            frames: Vec::new(),
            functions: Functions::new(),
            calls: CallStack::new(),
            defining: None,
            out: Vec::new(),
            variables: BTreeMap::new(),
        }
    }

    pub fn call(&mut self, instr: &Instr) -> Result<(), Error> {
        self.step(instr)
    }

    /// Batch entry point: run every instruction, then hand the emitted
    /// Level 2 program and enriched metadata to the caller.
    pub fn compile(
        instructions: &[Instr],
        metadata: Metadata,
    ) -> Result<(Metadata, Vec<L2>), Error> {
        let mut machine = Machine::new();
        for instr in instructions {
            machine.call(instr)?;
        }
        Ok(machine.finish(metadata))
    }

    pub fn finish(self, mut metadata: Metadata) -> (Metadata, Vec<L2>) {
        metadata.level3_variables = self.variables;
        (metadata, self.out)
    }

    pub fn emitted(&self) -> &[L2] {
        &self.out
    }

    fn step(&mut self, instr: &Instr) -> Result<(), Error> {
        if self.defining.is_some() {
            return self.collect(instr).map_err(|kind| Error::at(instr, kind));
        }
        self.exec(instr)
    }

    /// While a definition is open, instructions are captured into its
    /// body instead of executing. Inner definitions nest by depth.
    fn collect(&mut self, instr: &Instr) -> Result<(), ErrorKind> {
        let finalize = {
            let Some(defining) = self.defining.as_mut() else {
                return Ok(());
            };
            match instr {
                Instr::Define { .. } => {
                    defining.depth += 1;
                    defining.body.push(instr.clone());
                    false
                }
                Instr::Return { count } if defining.depth == 0 => {
                    defining.returns = *count;
                    true
                }
                Instr::Return { .. } => {
                    defining.depth -= 1;
                    defining.body.push(instr.clone());
                    false
                }
                other => {
                    defining.body.push(other.clone());
                    false
                }
            }
        };
        if finalize {
            if let Some(d) = self.defining.take() {
                self.functions
                    .define(d.name, d.args, d.dynamic, d.immutable, d.returns, d.body)?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Instruction dispatch
    // ========================================================================

    fn exec(&mut self, instr: &Instr) -> Result<(), Error> {
        let fail = |kind: ErrorKind| Error::at(instr, kind);
        match instr {
            Instr::Typedef {
                symbol,
                spec,
                local,
            } => {
                let value = self.allocate(spec);
                self.rebind(symbol, value, *local).map_err(fail)
            }
            Instr::Push { symbol } => {
                let ctx = self
                    .resolve(symbol)
                    .map_err(fail)?
                    .ok_or_else(|| fail(ErrorKind::UndefinedSymbol(symbol.clone())))?;
                self.stack.push(ctx);
                Ok(())
            }
            Instr::Pop { symbol, local } => {
                let value = self.pop_value().map_err(fail)?;
                self.write(symbol, value, *local).map_err(fail)
            }
            Instr::Constant(c) => {
                let symbol = self.lower_const(*c);
                let value = match c {
                    Const::Boolean(_) => Value::Boolean { symbol },
                    Const::Integer(_) => Value::Integer {
                        symbol,
                        width: None,
                    },
                };
                self.push_temp(value);
                Ok(())
            }
            Instr::Not => self.bool_unary(L2::Not).map_err(fail),
            Instr::And => self.bool_binary(L2::And).map_err(fail),
            Instr::Or => self.bool_binary(L2::Or).map_err(fail),
            Instr::Equal => {
                let b = self.pop_value().map_err(fail)?;
                let a = self.pop_value().map_err(fail)?;
                let symbol = self.eq_values(&a, &b).map_err(fail)?;
                self.push_temp(Value::Boolean { symbol });
                Ok(())
            }
            Instr::Add => self.int_binary(L2::Add, false).map_err(fail),
            Instr::Subtract => self.int_binary(L2::Subtract, false).map_err(fail),
            Instr::Multiply => self.int_binary(L2::Multiply, false).map_err(fail),
            Instr::Divide => self.int_binary(L2::Divide, false).map_err(fail),
            Instr::Modulo => self.int_binary(L2::Modulo, false).map_err(fail),
            Instr::Divmod => {
                let b = self.pop_value().map_err(fail)?;
                let a = self.pop_value().map_err(fail)?;
                let (a, b) = (int_symbol(&a).map_err(fail)?, int_symbol(&b).map_err(fail)?);
                self.emit(L2::Push { symbol: a });
                self.emit(L2::Push { symbol: b });
                self.emit(L2::Divmod);
                let quotient = self.fresh();
                let remainder = self.fresh();
                self.emit(L2::Pop {
                    symbol: remainder.clone(),
                    width: None,
                });
                self.emit(L2::Pop {
                    symbol: quotient.clone(),
                    width: None,
                });
                self.push_temp(Value::Integer {
                    symbol: quotient,
                    width: None,
                });
                self.push_temp(Value::Integer {
                    symbol: remainder,
                    width: None,
                });
                Ok(())
            }
            Instr::Negate => self.int_unary(L2::Negate).map_err(fail),
            Instr::Absolute => self.int_unary(L2::Absolute).map_err(fail),
            Instr::LessThan => self.int_binary(L2::LessThan, true).map_err(fail),
            Instr::GreaterThan => self.int_binary(L2::GreaterThan, true).map_err(fail),
            Instr::LessEqual => self.int_binary(L2::LessEqual, true).map_err(fail),
            Instr::GreaterEqual => self.int_binary(L2::GreaterEqual, true).map_err(fail),
            Instr::Duplicate => {
                let top = self
                    .stack
                    .last()
                    .cloned()
                    .ok_or_else(|| fail(ErrorKind::StackUnderflow))?;
                self.stack.push(top);
                Ok(())
            }
            Instr::Swap => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(fail(ErrorKind::StackUnderflow));
                }
                self.stack.swap(len - 1, len - 2);
                Ok(())
            }
            Instr::If => {
                let e = self.pop_value().map_err(fail)?;
                let t = self.pop_value().map_err(fail)?;
                let c = self.pop_value().map_err(fail)?;
                let cond = bool_symbol(&c).map_err(fail)?;
                let value = self.mux_values(&cond, &t, &e).map_err(fail)?;
                self.push_temp(value);
                Ok(())
            }
            Instr::Invariant => {
                let value = self.pop_value().map_err(fail)?;
                let symbol = bool_symbol(&value).map_err(fail)?;
                self.emit(L2::Push { symbol });
                self.emit(L2::Invariant);
                Ok(())
            }
            Instr::Variable { symbol } => {
                let value = self.read(symbol).map_err(fail)?;
                let shape = self.expose(&value).map_err(fail)?;
                self.variables.insert(symbol.clone(), shape);
                Ok(())
            }
            Instr::Collect { count } => {
                let mut members = Vec::with_capacity(*count);
                for _ in 0..*count {
                    members.push(self.pop_value().map_err(fail)?);
                }
                members.reverse();
                self.push_temp(Value::Array(members));
                Ok(())
            }
            Instr::Fetch { index } => {
                let members = self.pop_array().map_err(fail)?;
                let member = members.get(*index).cloned().ok_or_else(|| {
                    fail(ErrorKind::IndexOutOfBounds {
                        index: *index,
                        length: members.len(),
                    })
                })?;
                self.push_temp(member);
                Ok(())
            }
            Instr::Get => {
                let index = self.pop_value().map_err(fail)?;
                let index_symbol = int_symbol(&index).map_err(fail)?;
                let members = self.pop_array().map_err(fail)?;
                let value = self.get_columns(&members, &index_symbol).map_err(fail)?;
                self.push_temp(value);
                Ok(())
            }
            Instr::Length => {
                let members = self.pop_array().map_err(fail)?;
                let symbol = self.lower_const(Const::Integer(members.len() as i64));
                self.push_temp(Value::Integer {
                    symbol,
                    width: None,
                });
                Ok(())
            }
            Instr::Define {
                name,
                args,
                dynamic,
                immutable,
            } => {
                self.defining = Some(Defining {
                    name: name.clone(),
                    args: args.clone(),
                    dynamic: *dynamic,
                    immutable: *immutable,
                    returns: 0,
                    body: Vec::new(),
                    depth: 0,
                });
                Ok(())
            }
            Instr::Return { .. } => Err(fail(ErrorKind::Structure(
                "return outside of a function definition".into(),
            ))),
            Instr::Call { name, argc } => {
                let id = self
                    .functions
                    .id_of(name)
                    .ok_or_else(|| fail(ErrorKind::UnknownFunction(name.clone())))?;
                self.call_function(instr, id, *argc)?;
                Ok(())
            }
            Instr::Pointer { name } => {
                let id = self
                    .functions
                    .id_of(name)
                    .ok_or_else(|| fail(ErrorKind::UnknownFunction(name.clone())))?;
                self.push_temp(Value::Pointer(id));
                Ok(())
            }
            Instr::Each => {
                let id = pointer_id(&self.pop_value().map_err(fail)?).map_err(fail)?;
                let members = self.pop_array().map_err(fail)?;
                for member in members {
                    self.invoke(instr, id, vec![member])?;
                }
                Ok(())
            }
            Instr::EachPair => {
                let id = pointer_id(&self.pop_value().map_err(fail)?).map_err(fail)?;
                let members = self.pop_array().map_err(fail)?;
                for i in 0..members.len() {
                    for j in i + 1..members.len() {
                        self.invoke(instr, id, vec![members[i].clone(), members[j].clone()])?;
                    }
                }
                Ok(())
            }
            Instr::EachCombination { size } => {
                let id = pointer_id(&self.pop_value().map_err(fail)?).map_err(fail)?;
                let members = self.pop_array().map_err(fail)?;
                for combo in combinations(members.len(), *size) {
                    let arg = Value::Array(combo.iter().map(|&i| members[i].clone()).collect());
                    self.invoke(instr, id, vec![arg])?;
                }
                Ok(())
            }
            Instr::EachCons { size } => {
                if *size == 0 {
                    return Err(fail(ErrorKind::Structure(
                        "window size must be positive".into(),
                    )));
                }
                let id = pointer_id(&self.pop_value().map_err(fail)?).map_err(fail)?;
                let members = self.pop_array().map_err(fail)?;
                for window in members.windows(*size) {
                    self.invoke(instr, id, vec![Value::Array(window.to_vec())])?;
                }
                Ok(())
            }
            Instr::EachSlice { size } => {
                if *size == 0 {
                    return Err(fail(ErrorKind::Structure(
                        "slice size must be positive".into(),
                    )));
                }
                let id = pointer_id(&self.pop_value().map_err(fail)?).map_err(fail)?;
                let members = self.pop_array().map_err(fail)?;
                for chunk in members.chunks(*size) {
                    self.invoke(instr, id, vec![Value::Array(chunk.to_vec())])?;
                }
                Ok(())
            }
            Instr::Reduce { with_initial } => {
                let id = pointer_id(&self.pop_value().map_err(fail)?).map_err(fail)?;
                let initial = if *with_initial {
                    Some(self.pop_name().map_err(fail)?)
                } else {
                    None
                };
                let members = self.pop_array().map_err(fail)?;
                let mut iter = members.into_iter();
                let mut acc = match initial {
                    Some(name) => name,
                    None => match iter.next() {
                        Some(first) => self.bind_temp(first),
                        None => {
                            return Err(fail(ErrorKind::Structure(
                                "reduce of an empty array with no initial value".into(),
                            )))
                        }
                    },
                };
                for member in iter {
                    self.stack.push(acc.clone());
                    let element = self.bind_temp(member);
                    self.stack.push(element);
                    let returns = self.call_function(instr, id, 2)?;
                    if returns != 1 {
                        return Err(fail(ErrorKind::Structure(
                            "reduce callback must return exactly one value".into(),
                        )));
                    }
                    acc = self.stack.pop().ok_or_else(|| fail(ErrorKind::StackUnderflow))?;
                }
                self.stack.push(acc);
                Ok(())
            }
        }
    }

    // ========================================================================
    // Function inlining
    // ========================================================================

    /// Inline one call: bind arguments into a fresh dynamic-scope frame,
    /// re-execute the stored body, verify the declared return arity.
    fn call_function(
        &mut self,
        instr: &Instr,
        id: FunctionId,
        argc: usize,
    ) -> Result<usize, Error> {
        let fail = |kind: ErrorKind| Error::at(instr, kind);
        let func = self
            .functions
            .by_id(id)
            .ok_or_else(|| fail(ErrorKind::UnknownFunction(format!("#{id}"))))?;
        if self.calls.contains(id) {
            return Err(fail(ErrorKind::Recursion(self.calls.trace(id, &func.name))));
        }
        if func.args.len() != argc {
            return Err(fail(ErrorKind::ArityMismatch {
                function: func.name.clone(),
                expected: func.args.len(),
                found: argc,
            }));
        }
        let mut names = Vec::with_capacity(argc);
        for _ in 0..argc {
            names.push(self.pop_name().map_err(fail)?);
        }
        names.reverse();
        let bindings: FxHashMap<String, String> =
            func.args.iter().cloned().zip(names).collect();
        let hash_symbol = self.fresh();
        self.context.insert(hash_symbol.clone(), Value::Hash(bindings));
        self.frames.push(Frame {
            hash_symbol,
            dynamic: func.dynamic,
        });
        self.calls.enter(id, &func.name);
        let base = self.stack.len();
        for body_instr in func.body.iter() {
            self.step(body_instr)?;
        }
        self.calls.leave(id);
        self.frames.pop();
        let produced = self.stack.len().saturating_sub(base);
        if produced != func.returns {
            return Err(fail(ErrorKind::Structure(format!(
                "function `{}` produced {} values but declares {}",
                func.name, produced, func.returns
            ))));
        }
        Ok(func.returns)
    }

    /// Push argument values and call, requiring a value-free callback.
    fn invoke(&mut self, instr: &Instr, id: FunctionId, args: Vec<Value>) -> Result<(), Error> {
        let argc = args.len();
        for value in args {
            let name = self.bind_temp(value);
            self.stack.push(name);
        }
        let returns = self.call_function(instr, id, argc)?;
        if returns != 0 {
            return Err(Error::at(
                instr,
                ErrorKind::Structure("iteration callback must not return values".into()),
            ));
        }
        Ok(())
    }

    // ========================================================================
    // Name resolution and binding
    // ========================================================================

    /// Resolve a surface name to a context name. Frames are searched
    /// innermost first; only dynamic frames keep the walk going, a
    /// static frame falls straight through to the context.
    fn resolve(&self, name: &str) -> Result<Option<String>, ErrorKind> {
        for frame in self.frames.iter().rev() {
            if let Some(target) = self.frame_get(frame, name)? {
                return Ok(Some(target));
            }
            if !frame.dynamic {
                break;
            }
        }
        Ok(self.context.contains_key(name).then(|| name.to_string()))
    }

    fn frame_get(&self, frame: &Frame, name: &str) -> Result<Option<String>, ErrorKind> {
        match self.context.get(&frame.hash_symbol) {
            Some(Value::Hash(map)) => Ok(map.get(name).cloned()),
            _ => Err(ErrorKind::Structure(format!(
                "frame table `{}` is not a hash",
                frame.hash_symbol
            ))),
        }
    }

    fn frame_insert(
        &mut self,
        hash_symbol: &str,
        name: &str,
        target: &str,
    ) -> Result<(), ErrorKind> {
        match self.context.get_mut(hash_symbol) {
            Some(Value::Hash(map)) => {
                map.insert(name.to_string(), target.to_string());
                Ok(())
            }
            _ => Err(ErrorKind::Structure(format!(
                "frame table `{hash_symbol}` is not a hash"
            ))),
        }
    }

    fn read(&self, name: &str) -> Result<Value, ErrorKind> {
        match self.resolve(name)? {
            Some(ctx) => self
                .context
                .get(&ctx)
                .cloned()
                .ok_or_else(|| ErrorKind::UndefinedSymbol(name.to_string())),
            None => Err(ErrorKind::UndefinedSymbol(name.to_string())),
        }
    }

    /// Assignment: resolve and re-coerce against the existing binding,
    /// or create a fresh context binding for an unseen name.
    fn write(&mut self, name: &str, value: Value, local: bool) -> Result<(), ErrorKind> {
        if local {
            return self.rebind(name, value, true);
        }
        match self.resolve(name)? {
            Some(ctx) => {
                let coerced = match self.context.get(&ctx).cloned() {
                    Some(old) => self.coerce(&old, value)?,
                    None => value,
                };
                self.context.insert(ctx, coerced);
                Ok(())
            }
            None => {
                self.context.insert(name.to_string(), value);
                Ok(())
            }
        }
    }

    /// Bind without coercion: declarations replace whatever was there.
    fn rebind(&mut self, name: &str, value: Value, local: bool) -> Result<(), ErrorKind> {
        if local {
            let frame_hash = self.frames.last().map(|f| f.hash_symbol.clone());
            if let Some(hash_symbol) = frame_hash {
                let fresh = self.fresh();
                self.frame_insert(&hash_symbol, name, &fresh)?;
                self.context.insert(fresh, value);
                return Ok(());
            }
        }
        match self.resolve(name)? {
            Some(ctx) => {
                self.context.insert(ctx, value);
            }
            None => {
                self.context.insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    /// Fit a new value to the declared shape of the old one. Declared
    /// integer widths re-truncate on every assignment; shapes must
    /// otherwise agree.
    fn coerce(&mut self, old: &Value, new: Value) -> Result<Value, ErrorKind> {
        match (old, new) {
            (
                Value::Integer { width: Some(w), .. },
                Value::Integer { symbol, .. },
            ) => {
                let fresh = self.fresh();
                self.emit(L2::Push { symbol });
                self.emit(L2::Pop {
                    symbol: fresh.clone(),
                    width: Some(*w),
                });
                Ok(Value::Integer {
                    symbol: fresh,
                    width: Some(*w),
                })
            }
            (Value::Integer { width: None, .. }, new @ Value::Integer { .. }) => Ok(new),
            (Value::Boolean { .. }, new @ Value::Boolean { .. }) => Ok(new),
            (Value::Array(old_members), Value::Array(new_members)) => {
                if old_members.len() != new_members.len() {
                    return Err(ErrorKind::Structure(format!(
                        "cannot assign {} elements to an array of length {}",
                        new_members.len(),
                        old_members.len()
                    )));
                }
                let old_members = old_members.clone();
                let coerced = old_members
                    .iter()
                    .zip(new_members)
                    .map(|(o, n)| self.coerce(o, n))
                    .collect::<Result<_, _>>()?;
                Ok(Value::Array(coerced))
            }
            (Value::Pointer(_), new) => Ok(new),
            (old, new) => Err(ErrorKind::TypeError {
                expected: old.kind(),
                found: new.kind(),
            }),
        }
    }

    /// Declare fresh unconstrained Level 2 backing for a shape.
    fn allocate(&mut self, spec: &TypeSpec) -> Value {
        match spec {
            TypeSpec::Boolean => {
                let symbol = self.fresh();
                self.emit(L2::Boolean {
                    symbol: symbol.clone(),
                });
                Value::Boolean { symbol }
            }
            TypeSpec::Integer { width } => {
                let symbol = self.fresh();
                self.emit(L2::Integer {
                    symbol: symbol.clone(),
                    width: *width,
                });
                Value::Integer {
                    symbol,
                    width: Some(*width),
                }
            }
            TypeSpec::Array { length, element } => {
                Value::Array((0..*length).map(|_| self.allocate(element)).collect())
            }
        }
    }

    fn expose(&mut self, value: &Value) -> Result<Shape, ErrorKind> {
        match value {
            Value::Boolean { symbol } => {
                self.emit(L2::Variable {
                    symbol: symbol.clone(),
                });
                Ok(Shape::Boolean {
                    symbol: symbol.clone(),
                })
            }
            Value::Integer { symbol, .. } => {
                self.emit(L2::Variable {
                    symbol: symbol.clone(),
                });
                Ok(Shape::Integer {
                    symbol: symbol.clone(),
                })
            }
            Value::Array(members) => Ok(Shape::Array {
                elements: members
                    .iter()
                    .map(|m| self.expose(m))
                    .collect::<Result<_, _>>()?,
            }),
            other => Err(ErrorKind::Structure(format!(
                "cannot expose {}",
                other.kind()
            ))),
        }
    }

    // ========================================================================
    // Level 2 emission
    // ========================================================================

    fn fresh(&mut self) -> String {
        self.registry.next_symbol()
    }

    fn emit(&mut self, instr: L2) {
        self.out.push(instr);
    }

    fn bind_temp(&mut self, value: Value) -> String {
        let name = self.fresh();
        self.context.insert(name.clone(), value);
        name
    }

    fn push_temp(&mut self, value: Value) {
        let name = self.bind_temp(value);
        self.stack.push(name);
    }

    fn pop_name(&mut self) -> Result<String, ErrorKind> {
        self.stack.pop().ok_or(ErrorKind::StackUnderflow)
    }

    fn pop_value(&mut self) -> Result<Value, ErrorKind> {
        let name = self.pop_name()?;
        self.context
            .get(&name)
            .cloned()
            .ok_or(ErrorKind::UndefinedSymbol(name))
    }

    fn pop_array(&mut self) -> Result<Vec<Value>, ErrorKind> {
        match self.pop_value()? {
            Value::Array(members) => Ok(members),
            other => Err(ErrorKind::TypeError {
                expected: "an array",
                found: other.kind(),
            }),
        }
    }

    /// Emit pushes for the operands, the operation, and a fresh pop.
    fn lower(&mut self, operands: &[String], op: L2) -> String {
        for symbol in operands {
            self.emit(L2::Push {
                symbol: symbol.clone(),
            });
        }
        self.emit(op);
        let name = self.fresh();
        self.emit(L2::Pop {
            symbol: name.clone(),
            width: None,
        });
        name
    }

    fn lower_const(&mut self, c: Const) -> String {
        self.emit(L2::Constant(c));
        let name = self.fresh();
        self.emit(L2::Pop {
            symbol: name.clone(),
            width: None,
        });
        name
    }

    fn int_binary(&mut self, op: L2, boolean_result: bool) -> Result<(), ErrorKind> {
        let b = self.pop_value()?;
        let a = self.pop_value()?;
        let operands = [int_symbol(&a)?, int_symbol(&b)?];
        let symbol = self.lower(&operands, op);
        self.push_temp(if boolean_result {
            Value::Boolean { symbol }
        } else {
            Value::Integer {
                symbol,
                width: None,
            }
        });
        Ok(())
    }

    fn int_unary(&mut self, op: L2) -> Result<(), ErrorKind> {
        let a = self.pop_value()?;
        let operands = [int_symbol(&a)?];
        let symbol = self.lower(&operands, op);
        self.push_temp(Value::Integer {
            symbol,
            width: None,
        });
        Ok(())
    }

    fn bool_binary(&mut self, op: L2) -> Result<(), ErrorKind> {
        let b = self.pop_value()?;
        let a = self.pop_value()?;
        let operands = [bool_symbol(&a)?, bool_symbol(&b)?];
        let symbol = self.lower(&operands, op);
        self.push_temp(Value::Boolean { symbol });
        Ok(())
    }

    fn bool_unary(&mut self, op: L2) -> Result<(), ErrorKind> {
        let a = self.pop_value()?;
        let operands = [bool_symbol(&a)?];
        let symbol = self.lower(&operands, op);
        self.push_temp(Value::Boolean { symbol });
        Ok(())
    }

    /// Structural equality: scalars compare bitwise, arrays element-wise
    /// with an and-fold. Arrays of different lengths are statically
    /// unequal.
    fn eq_values(&mut self, a: &Value, b: &Value) -> Result<String, ErrorKind> {
        match (a, b) {
            (Value::Boolean { symbol: x }, Value::Boolean { symbol: y }) => {
                let operands = [x.clone(), y.clone()];
                Ok(self.lower(&operands, L2::Equal))
            }
            (
                Value::Integer { symbol: x, .. },
                Value::Integer { symbol: y, .. },
            ) => {
                let operands = [x.clone(), y.clone()];
                Ok(self.lower(&operands, L2::Equal))
            }
            (Value::Array(xs), Value::Array(ys)) => {
                if xs.len() != ys.len() {
                    return Ok(self.lower_const(Const::Boolean(false)));
                }
                let pairs: Vec<(Value, Value)> = xs
                    .iter()
                    .cloned()
                    .zip(ys.iter().cloned())
                    .collect();
                let mut acc: Option<String> = None;
                for (x, y) in &pairs {
                    let pair = self.eq_values(x, y)?;
                    acc = Some(match acc {
                        None => pair,
                        Some(prev) => self.lower(&[prev, pair], L2::And),
                    });
                }
                match acc {
                    Some(symbol) => Ok(symbol),
                    None => Ok(self.lower_const(Const::Boolean(true))),
                }
            }
            _ => Err(ErrorKind::TypeError {
                expected: a.kind(),
                found: b.kind(),
            }),
        }
    }

    /// Element-wise selection. Arrays must agree on length; scalars mux
    /// down at Level 2.
    fn mux_values(&mut self, cond: &str, t: &Value, e: &Value) -> Result<Value, ErrorKind> {
        match (t, e) {
            (Value::Boolean { symbol: x }, Value::Boolean { symbol: y }) => {
                let symbol = self.lower_if(cond, x, y);
                Ok(Value::Boolean { symbol })
            }
            (
                Value::Integer { symbol: x, .. },
                Value::Integer { symbol: y, .. },
            ) => {
                let symbol = self.lower_if(cond, x, y);
                Ok(Value::Integer {
                    symbol,
                    width: None,
                })
            }
            (Value::Array(xs), Value::Array(ys)) => {
                if xs.len() != ys.len() {
                    return Err(ErrorKind::Structure(format!(
                        "cannot select between arrays of lengths {} and {}",
                        xs.len(),
                        ys.len()
                    )));
                }
                let pairs: Vec<(Value, Value)> = xs
                    .iter()
                    .cloned()
                    .zip(ys.iter().cloned())
                    .collect();
                let members = pairs
                    .iter()
                    .map(|(x, y)| self.mux_values(cond, x, y))
                    .collect::<Result<_, _>>()?;
                Ok(Value::Array(members))
            }
            _ => Err(ErrorKind::TypeError {
                expected: t.kind(),
                found: e.kind(),
            }),
        }
    }

    fn lower_if(&mut self, cond: &str, t: &str, e: &str) -> String {
        self.emit(L2::Push {
            symbol: cond.to_string(),
        });
        self.emit(L2::Push {
            symbol: t.to_string(),
        });
        self.emit(L2::Push {
            symbol: e.to_string(),
        });
        self.emit(L2::If);
        let name = self.fresh();
        self.emit(L2::Pop {
            symbol: name.clone(),
            width: None,
        });
        name
    }

    /// Dynamic selection delegated to Level 2 column by column: flat
    /// scalar arrays become one Level 2 get; nested arrays recurse per
    /// element position, each column carrying its own bounds check.
    fn get_columns(&mut self, members: &[Value], index_symbol: &str) -> Result<Value, ErrorKind> {
        let first = members
            .first()
            .ok_or_else(|| ErrorKind::Structure("get from an empty array".into()))?;
        match first {
            Value::Boolean { .. } | Value::Integer { .. } => {
                let boolean = matches!(first, Value::Boolean { .. });
                let mut symbols = Vec::with_capacity(members.len());
                for member in members {
                    match member {
                        Value::Boolean { symbol } if boolean => symbols.push(symbol.clone()),
                        Value::Integer { symbol, .. } if !boolean => {
                            symbols.push(symbol.clone())
                        }
                        other => {
                            return Err(ErrorKind::Structure(format!(
                                "array members must share a type for get, found {}",
                                other.kind()
                            )))
                        }
                    }
                }
                for symbol in &symbols {
                    self.emit(L2::Push {
                        symbol: symbol.clone(),
                    });
                }
                self.emit(L2::Collect {
                    count: symbols.len(),
                });
                self.emit(L2::Push {
                    symbol: index_symbol.to_string(),
                });
                self.emit(L2::Get);
                let name = self.fresh();
                self.emit(L2::Pop {
                    symbol: name.clone(),
                    width: None,
                });
                Ok(if boolean {
                    Value::Boolean { symbol: name }
                } else {
                    Value::Integer {
                        symbol: name,
                        width: None,
                    }
                })
            }
            Value::Array(first_inner) => {
                let length = first_inner.len();
                let mut columns = Vec::with_capacity(length);
                for j in 0..length {
                    let mut column = Vec::with_capacity(members.len());
                    for member in members {
                        match member {
                            Value::Array(inner) if inner.len() == length => {
                                column.push(inner[j].clone())
                            }
                            Value::Array(inner) => {
                                return Err(ErrorKind::Structure(format!(
                                    "ragged array: expected {} members, found {}",
                                    length,
                                    inner.len()
                                )))
                            }
                            other => {
                                return Err(ErrorKind::Structure(format!(
                                    "array members must share a type for get, found {}",
                                    other.kind()
                                )))
                            }
                        }
                    }
                    columns.push(self.get_columns(&column, index_symbol)?);
                }
                Ok(Value::Array(columns))
            }
            other => Err(ErrorKind::Structure(format!(
                "cannot select from {}",
                other.kind()
            ))),
        }
    }
}

fn int_symbol(value: &Value) -> Result<String, ErrorKind> {
    match value {
        Value::Integer { symbol, .. } => Ok(symbol.clone()),
        other => Err(ErrorKind::TypeError {
            expected: "an integer",
            found: other.kind(),
        }),
    }
}

fn bool_symbol(value: &Value) -> Result<String, ErrorKind> {
    match value {
        Value::Boolean { symbol } => Ok(symbol.clone()),
        other => Err(ErrorKind::TypeError {
            expected: "a boolean",
            found: other.kind(),
        }),
    }
}

fn pointer_id(value: &Value) -> Result<FunctionId, ErrorKind> {
    match value {
        Value::Pointer(id) => Ok(*id),
        other => Err(ErrorKind::TypeError {
            expected: "a function pointer",
            found: other.kind(),
        }),
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

    fn typedef(symbol: &str, spec: TypeSpec) -> Instr {
        Instr::Typedef {
            symbol: symbol.into(),
            spec,
            local: false,
        }
    }

    fn int_spec(width: u32) -> TypeSpec {
        TypeSpec::Integer { width }
    }

    fn push(symbol: &str) -> Instr {
        Instr::Push {
            symbol: symbol.into(),
        }
    }

    fn pop(symbol: &str) -> Instr {
        Instr::Pop {
            symbol: symbol.into(),
            local: false,
        }
    }

    fn define(name: &str, args: &[&str], dynamic: bool) -> Instr {
        Instr::Define {
            name: name.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            dynamic,
            immutable: false,
        }
    }

    fn call(name: &str, argc: usize) -> Instr {
        Instr::Call {
            name: name.into(),
            argc,
        }
    }

    fn count_l2(m: &Machine, pred: impl Fn(&L2) -> bool) -> usize {
        m.emitted().iter().filter(|i| pred(i)).count()
    }

    #[test]
    fn typedef_and_variable_record_shapes() {
        let m = run(&[
            typedef(
                "grid",
                TypeSpec::Array {
                    length: 2,
                    element: Box::new(int_spec(4)),
                },
            ),
            Instr::Variable {
                symbol: "grid".into(),
            },
        ]);
        match m.variables.get("grid") {
            Some(Shape::Array { elements }) => {
                assert_eq!(elements.len(), 2);
                assert!(matches!(elements[0], Shape::Integer { .. }));
            }
            other => panic!("expected array shape, got {other:?}"),
        }
        assert_eq!(count_l2(&m, |i| matches!(i, L2::Variable { .. })), 2);
    }

    #[test]
    fn calls_inline_the_stored_body() {
        let m = run(&[
            define("double", &["x"], false),
            push("x"),
            push("x"),
            Instr::Add,
            Instr::Return { count: 1 },
            Instr::Constant(Const::Integer(2)),
            call("double", 1),
        ]);
        assert_eq!(m.stack.len(), 1);
        assert_eq!(count_l2(&m, |i| matches!(i, L2::Add)), 1);
        // a second call re-executes the body
        let m = run(&[
            define("double", &["x"], false),
            push("x"),
            push("x"),
            Instr::Add,
            Instr::Return { count: 1 },
            Instr::Constant(Const::Integer(2)),
            call("double", 1),
            Instr::Constant(Const::Integer(3)),
            call("double", 1),
        ]);
        assert_eq!(count_l2(&m, |i| matches!(i, L2::Add)), 2);
    }

    #[test]
    fn recursion_is_detected_with_a_trace() {
        let mut m = Machine::new();
        for i in [
            define("loop", &["x"], false),
            push("x"),
            call("loop", 1),
            Instr::Return { count: 0 },
            Instr::Constant(Const::Integer(1)),
        ] {
            m.call(&i).unwrap();
        }
        let err = m.call(&call("loop", 1)).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("level 3"));
        assert!(message.contains("recursive function call detected"));
        assert!(message.contains("loop (#"));
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        let mut m = Machine::new();
        for i in [
            define("pair", &["x", "y"], false),
            Instr::Return { count: 0 },
            Instr::Constant(Const::Integer(1)),
        ] {
            m.call(&i).unwrap();
        }
        let err = m.call(&call("pair", 1)).unwrap_err();
        assert!(err
            .to_string()
            .contains("takes 2 arguments but received 1"));
    }

    #[test]
    fn dynamic_functions_write_through_their_caller() {
        // helper rebinds `acc`; with a dynamic helper the outer frame's
        // binding changes, with a static helper it does not.
        let program = |dynamic: bool| {
            vec![
                define("helper", &[], dynamic),
                Instr::Constant(Const::Boolean(false)),
                Instr::Pop {
                    symbol: "acc".into(),
                    local: false,
                },
                Instr::Return { count: 0 },
                define("outer", &[], false),
                Instr::Constant(Const::Boolean(true)),
                Instr::Pop {
                    symbol: "acc".into(),
                    local: true,
                },
                call("helper", 0),
                push("acc"),
                Instr::Return { count: 1 },
                call("outer", 0),
                pop("result"),
                Instr::Variable {
                    symbol: "result".into(),
                },
            ]
        };
        let constant_symbol = |m: &Machine, value: bool| {
            let mut found = None;
            for window in m.emitted().windows(2) {
                if let [L2::Constant(Const::Boolean(b)), L2::Pop { symbol, .. }] = window {
                    if *b == value {
                        found = Some(symbol.clone());
                    }
                }
            }
            found.unwrap()
        };

        let m = run(&program(true));
        let exposed = match m.variables.get("result") {
            Some(Shape::Boolean { symbol }) => symbol.clone(),
            other => panic!("expected boolean shape, got {other:?}"),
        };
        assert_eq!(exposed, constant_symbol(&m, false));

        let m = run(&program(false));
        let exposed = match m.variables.get("result") {
            Some(Shape::Boolean { symbol }) => symbol.clone(),
            other => panic!("expected boolean shape, got {other:?}"),
        };
        assert_eq!(exposed, constant_symbol(&m, true));
    }

    #[test]
    fn each_calls_once_per_element() {
        let m = run(&[
            define("check", &["x"], false),
            push("x"),
            Instr::Invariant,
            Instr::Return { count: 0 },
            typedef("a", TypeSpec::Boolean),
            typedef("b", TypeSpec::Boolean),
            typedef("c", TypeSpec::Boolean),
            push("a"),
            push("b"),
            push("c"),
            Instr::Collect { count: 3 },
            Instr::Pointer {
                name: "check".into(),
            },
            Instr::Each,
        ]);
        assert_eq!(count_l2(&m, |i| matches!(i, L2::Invariant)), 3);
    }

    #[test]
    fn each_pair_visits_ordered_pairs() {
        let m = run(&[
            define("rel", &["x", "y"], false),
            push("x"),
            push("y"),
            Instr::Equal,
            Instr::Not,
            Instr::Invariant,
            Instr::Return { count: 0 },
            typedef("a", int_spec(4)),
            typedef("b", int_spec(4)),
            typedef("c", int_spec(4)),
            push("a"),
            push("b"),
            push("c"),
            Instr::Collect { count: 3 },
            Instr::Pointer { name: "rel".into() },
            Instr::EachPair,
        ]);
        assert_eq!(count_l2(&m, |i| matches!(i, L2::Invariant)), 3);
    }

    #[test]
    fn each_combination_passes_arrays() {
        let m = run(&[
            define("first", &["combo"], false),
            push("combo"),
            Instr::Fetch { index: 0 },
            Instr::Invariant,
            Instr::Return { count: 0 },
            typedef("a", TypeSpec::Boolean),
            typedef("b", TypeSpec::Boolean),
            typedef("c", TypeSpec::Boolean),
            typedef("d", TypeSpec::Boolean),
            push("a"),
            push("b"),
            push("c"),
            push("d"),
            Instr::Collect { count: 4 },
            Instr::Pointer {
                name: "first".into(),
            },
            Instr::EachCombination { size: 2 },
        ]);
        assert_eq!(count_l2(&m, |i| matches!(i, L2::Invariant)), 6);
    }

    #[test]
    fn each_cons_visits_consecutive_windows() {
        let m = run(&[
            define("adjacent", &["window"], false),
            push("window"),
            Instr::Fetch { index: 1 },
            Instr::Invariant,
            Instr::Return { count: 0 },
            typedef("a", TypeSpec::Boolean),
            typedef("b", TypeSpec::Boolean),
            typedef("c", TypeSpec::Boolean),
            typedef("d", TypeSpec::Boolean),
            push("a"),
            push("b"),
            push("c"),
            push("d"),
            Instr::Collect { count: 4 },
            Instr::Pointer {
                name: "adjacent".into(),
            },
            Instr::EachCons { size: 2 },
        ]);
        assert_eq!(count_l2(&m, |i| matches!(i, L2::Invariant)), 3);
    }

    #[test]
    fn each_slice_chunks_the_array() {
        let m = run(&[
            define("lead", &["chunk"], false),
            push("chunk"),
            Instr::Fetch { index: 0 },
            Instr::Invariant,
            Instr::Return { count: 0 },
            typedef("a", TypeSpec::Boolean),
            typedef("b", TypeSpec::Boolean),
            typedef("c", TypeSpec::Boolean),
            typedef("d", TypeSpec::Boolean),
            typedef("e", TypeSpec::Boolean),
            push("a"),
            push("b"),
            push("c"),
            push("d"),
            push("e"),
            Instr::Collect { count: 5 },
            Instr::Pointer {
                name: "lead".into(),
            },
            Instr::EachSlice { size: 2 },
        ]);
        // five members in chunks of two: [a b], [c d], [e]
        assert_eq!(count_l2(&m, |i| matches!(i, L2::Invariant)), 3);
    }

    #[test]
    fn each_slice_final_chunk_is_short() {
        let mut m = Machine::new();
        for i in [
            define("second", &["chunk"], false),
            push("chunk"),
            Instr::Fetch { index: 1 },
            Instr::Invariant,
            Instr::Return { count: 0 },
            typedef("a", TypeSpec::Boolean),
            typedef("b", TypeSpec::Boolean),
            typedef("c", TypeSpec::Boolean),
            push("a"),
            push("b"),
            push("c"),
            Instr::Collect { count: 3 },
            Instr::Pointer {
                name: "second".into(),
            },
        ] {
            m.call(&i).unwrap();
        }
        // the final chunk is [c] alone, so fetching index 1 fails
        let err = m.call(&Instr::EachSlice { size: 2 }).unwrap_err();
        assert!(err.to_string().contains("out of bounds"));
    }

    #[test]
    fn reduce_folds_left() {
        let m = run(&[
            define("plus", &["x", "y"], false),
            push("x"),
            push("y"),
            Instr::Add,
            Instr::Return { count: 1 },
            typedef("a", int_spec(4)),
            typedef("b", int_spec(4)),
            typedef("c", int_spec(4)),
            push("a"),
            push("b"),
            push("c"),
            Instr::Collect { count: 3 },
            Instr::Pointer {
                name: "plus".into(),
            },
            Instr::Reduce {
                with_initial: false,
            },
        ]);
        assert_eq!(m.stack.len(), 1);
        assert_eq!(count_l2(&m, |i| matches!(i, L2::Add)), 2);
    }

    #[test]
    fn immutable_functions_cannot_be_redefined() {
        let mut m = Machine::new();
        for i in [
            Instr::Define {
                name: "get".into(),
                args: vec!["a".into(), "i".into()],
                dynamic: false,
                immutable: true,
            },
            Instr::Return { count: 1 },
            define("get", &["a"], false),
        ] {
            m.call(&i).unwrap();
        }
        let err = m.call(&Instr::Return { count: 1 }).unwrap_err();
        assert!(err.to_string().contains("cannot redefine"));
    }

    #[test]
    fn fetch_bounds_are_static() {
        let mut m = Machine::new();
        for i in [
            typedef("a", int_spec(4)),
            push("a"),
            Instr::Collect { count: 1 },
        ] {
            m.call(&i).unwrap();
        }
        let err = m.call(&Instr::Fetch { index: 2 }).unwrap_err();
        assert!(err.to_string().contains("out of bounds"));
    }

    #[test]
    fn nested_get_lowers_per_column() {
        let m = run(&[
            typedef(
                "grid",
                TypeSpec::Array {
                    length: 3,
                    element: Box::new(TypeSpec::Array {
                        length: 2,
                        element: Box::new(int_spec(4)),
                    }),
                },
            ),
            push("grid"),
            Instr::Constant(Const::Integer(1)),
            Instr::Get,
        ]);
        assert_eq!(count_l2(&m, |i| matches!(i, L2::Get)), 2);
        match m.context.get(m.stack.last().unwrap()) {
            Some(Value::Array(members)) => assert_eq!(members.len(), 2),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn return_outside_definition_fails() {
        let mut m = Machine::new();
        let err = m.call(&Instr::Return { count: 0 }).unwrap_err();
        assert!(err.to_string().contains("return outside"));
    }

    #[test]
    fn assignment_retruncates_to_the_declared_width() {
        let m = run(&[
            typedef("x", int_spec(4)),
            Instr::Constant(Const::Integer(100)),
            pop("x"),
        ]);
        match m.read("x") {
            Ok(Value::Integer { width, .. }) => assert_eq!(width, Some(4)),
            other => panic!("expected integer, got {other:?}"),
        }
        assert_eq!(
            count_l2(&m, |i| matches!(
                i,
                L2::Pop {
                    width: Some(4),
                    ..
                }
            )),
            1
        );
    }
}
