/// The Level 2 stack machine: bit-blasting arithmetic into Level 1 gates.
use std::collections::BTreeMap;

use cnf::Instr as L1;
use cnf::{BitGroup, GroupKind, Metadata, Registry};
use rustc_hash::FxHashMap;

use crate::encoding;
use crate::error::{Error, ErrorKind};
use crate::instruction::{Const, Instr};

/// A Level 2 value: Booleans and integers name Level 1 bit symbols,
/// arrays name other Level 2 symbols.
#[derive(Debug, Clone)]
enum Value {
    Boolean(String),
    Integer(Vec<String>),
    Array(Vec<String>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "a boolean",
            Value::Integer(_) => "an integer",
            Value::Array(_) => "an array",
        }
    }
}

pub struct Machine {
    registry: Registry,
    stack: Vec<String>,
    table: FxHashMap<String, Value>,
    /// Integer symbols whose value is statically known, for eager bounds
    /// checks and constant-index selection.
    constants: FxHashMap<String, i64>,
    out: Vec<L1>,
    true_bit: Option<String>,
    false_bit: Option<String>,
    variables: BTreeMap<String, BitGroup>,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        Self {
            registry: Registry::new("2"),
            stack: Vec::new(),
            table: FxHashMap::default(),
            constants: FxHashMap::default(),
            out: Vec::new(),
            true_bit: None,
            false_bit: None,
            variables: BTreeMap::new(),
        }
    }

    /// Process one instruction, tagging any failure with it.
    pub fn call(&mut self, instr: &Instr) -> Result<(), Error> {
        self.exec(instr).map_err(|kind| Error::at(instr, kind))
    }

    /// Batch entry point: run every instruction, then hand the emitted
    /// Level 1 program and enriched metadata to the caller.
    pub fn compile(
        instructions: &[Instr],
        metadata: Metadata,
    ) -> Result<(Metadata, Vec<L1>), Error> {
        let mut machine = Machine::new();
        for instr in instructions {
            machine.call(instr)?;
        }
        Ok(machine.finish(metadata))
    }

    pub fn finish(self, mut metadata: Metadata) -> (Metadata, Vec<L1>) {
        metadata.level2_variables = self.variables;
        (metadata, self.out)
    }

    pub fn emitted(&self) -> &[L1] {
        &self.out
    }

    // ========================================================================
    // Instruction dispatch
    // ========================================================================

    fn exec(&mut self, instr: &Instr) -> Result<(), ErrorKind> {
        match instr {
            Instr::Boolean { symbol } => {
                let bit = self.reserve_bit();
                self.constants.remove(symbol);
                self.table.insert(symbol.clone(), Value::Boolean(bit));
                Ok(())
            }
            Instr::Integer { symbol, width } => {
                if *width == 0 {
                    return Err(ErrorKind::Structure(
                        "integer width must be at least 1".into(),
                    ));
                }
                let bits = (0..*width).map(|_| self.reserve_bit()).collect();
                self.constants.remove(symbol);
                self.table.insert(symbol.clone(), Value::Integer(bits));
                Ok(())
            }
            Instr::Push { symbol } => {
                if !self.table.contains_key(symbol) {
                    return Err(ErrorKind::UndefinedSymbol(symbol.clone()));
                }
                self.stack.push(symbol.clone());
                Ok(())
            }
            Instr::Pop { symbol, width } => {
                let name = self.pop_name()?;
                let value = self.lookup(&name)?.clone();
                let coerced = match width {
                    Some(w) => match value {
                        Value::Integer(bits) => Value::Integer(resize(&bits, *w as usize)),
                        other => {
                            return Err(ErrorKind::TypeError {
                                expected: "an integer",
                                found: other.kind(),
                            })
                        }
                    },
                    None => value,
                };
                self.constants.remove(symbol);
                if let Some(&c) = self.constants.get(&name) {
                    let keeps = match width {
                        Some(w) => encoding::fits(c, *w),
                        None => true,
                    };
                    if keeps {
                        self.constants.insert(symbol.clone(), c);
                    }
                }
                self.table.insert(symbol.clone(), coerced);
                Ok(())
            }
            Instr::Constant(Const::Boolean(b)) => {
                let bit = self.constant(*b);
                let name = self.bind(Value::Boolean(bit));
                self.stack.push(name);
                Ok(())
            }
            Instr::Constant(Const::Integer(v)) => {
                let width = encoding::width_for(*v);
                let bits = self.const_bits(*v, width)?;
                let name = self.bind(Value::Integer(bits));
                self.constants.insert(name.clone(), *v);
                self.stack.push(name);
                Ok(())
            }
            Instr::Not => {
                let a = self.pop_boolean()?;
                let out = self.not_bit(&a);
                self.push_value(Value::Boolean(out));
                Ok(())
            }
            Instr::And => {
                let b = self.pop_boolean()?;
                let a = self.pop_boolean()?;
                let out = self.and_bit(&a, &b);
                self.push_value(Value::Boolean(out));
                Ok(())
            }
            Instr::Or => {
                let b = self.pop_boolean()?;
                let a = self.pop_boolean()?;
                let out = self.or_bit(&a, &b);
                self.push_value(Value::Boolean(out));
                Ok(())
            }
            Instr::Equal => {
                let b = self.pop_value()?;
                let a = self.pop_value()?;
                let out = match (&a, &b) {
                    (Value::Boolean(x), Value::Boolean(y)) => {
                        let (x, y) = (x.clone(), y.clone());
                        self.eq_bit(&x, &y)
                    }
                    (Value::Integer(x), Value::Integer(y)) => {
                        let (x, y) = (x.clone(), y.clone());
                        self.eq_bits(&x, &y)
                    }
                    _ => {
                        return Err(ErrorKind::TypeError {
                            expected: a.kind(),
                            found: b.kind(),
                        })
                    }
                };
                self.push_value(Value::Boolean(out));
                Ok(())
            }
            Instr::Add => {
                let b = self.pop_integer()?;
                let a = self.pop_integer()?;
                let bits = self.widen_add(&a, &b);
                self.push_value(Value::Integer(bits));
                Ok(())
            }
            Instr::Subtract => {
                let b = self.pop_integer()?;
                let a = self.pop_integer()?;
                let bits = self.widen_sub(&a, &b);
                self.push_value(Value::Integer(bits));
                Ok(())
            }
            Instr::Multiply => {
                let b = self.pop_integer()?;
                let a = self.pop_integer()?;
                let bits = self.mul_bits(&a, &b);
                self.push_value(Value::Integer(bits));
                Ok(())
            }
            Instr::Divide => {
                let b = self.pop_integer()?;
                let a = self.pop_integer()?;
                let (q, _) = self.divmod_bits(&a, &b)?;
                self.push_value(Value::Integer(q));
                Ok(())
            }
            Instr::Modulo => {
                let b = self.pop_integer()?;
                let a = self.pop_integer()?;
                let (_, r) = self.divmod_bits(&a, &b)?;
                self.push_value(Value::Integer(r));
                Ok(())
            }
            Instr::Divmod => {
                let b = self.pop_integer()?;
                let a = self.pop_integer()?;
                let (q, r) = self.divmod_bits(&a, &b)?;
                self.push_value(Value::Integer(q));
                self.push_value(Value::Integer(r));
                Ok(())
            }
            Instr::Negate => {
                let a = self.pop_integer()?;
                let bits = self.negate_bits(&a);
                self.push_value(Value::Integer(bits));
                Ok(())
            }
            Instr::Absolute => {
                let a = self.pop_integer()?;
                let bits = self.abs_bits(&a);
                self.push_value(Value::Integer(bits));
                Ok(())
            }
            Instr::LessThan => {
                let b = self.pop_integer()?;
                let a = self.pop_integer()?;
                let out = self.lt_bits(&a, &b);
                self.push_value(Value::Boolean(out));
                Ok(())
            }
            Instr::GreaterThan => {
                let b = self.pop_integer()?;
                let a = self.pop_integer()?;
                let out = self.lt_bits(&b, &a);
                self.push_value(Value::Boolean(out));
                Ok(())
            }
            Instr::LessEqual => {
                let b = self.pop_integer()?;
                let a = self.pop_integer()?;
                let gt = self.lt_bits(&b, &a);
                let out = self.not_bit(&gt);
                self.push_value(Value::Boolean(out));
                Ok(())
            }
            Instr::GreaterEqual => {
                let b = self.pop_integer()?;
                let a = self.pop_integer()?;
                let lt = self.lt_bits(&a, &b);
                let out = self.not_bit(&lt);
                self.push_value(Value::Boolean(out));
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
                let e = self.pop_value()?;
                let t = self.pop_value()?;
                let c = match self.pop_value()? {
                    Value::Boolean(bit) => bit,
                    other => {
                        return Err(ErrorKind::TypeError {
                            expected: "a boolean",
                            found: other.kind(),
                        })
                    }
                };
                let out = match (&t, &e) {
                    (Value::Boolean(x), Value::Boolean(y)) => {
                        let (x, y) = (x.clone(), y.clone());
                        Value::Boolean(self.mux_bit(&c, &x, &y))
                    }
                    (Value::Integer(x), Value::Integer(y)) => {
                        let (x, y) = (x.clone(), y.clone());
                        Value::Integer(self.mux_bits(&c, &x, &y))
                    }
                    _ => {
                        return Err(ErrorKind::TypeError {
                            expected: t.kind(),
                            found: e.kind(),
                        })
                    }
                };
                self.push_value(out);
                Ok(())
            }
            Instr::Invariant => {
                let bit = self.pop_boolean()?;
                self.invariant_bit(&bit);
                Ok(())
            }
            Instr::Variable { symbol } => {
                let group = match self.lookup(symbol)?.clone() {
                    Value::Boolean(bit) => BitGroup {
                        kind: GroupKind::Boolean,
                        symbols: vec![bit],
                    },
                    Value::Integer(bits) => BitGroup {
                        kind: GroupKind::Integer,
                        symbols: bits,
                    },
                    Value::Array(_) => {
                        return Err(ErrorKind::Structure(
                            "cannot expose an array symbol directly".into(),
                        ))
                    }
                };
                for bit in &group.symbols {
                    self.emit(L1::Variable(bit.clone()));
                }
                self.variables.insert(symbol.clone(), group);
                Ok(())
            }
            Instr::Collect { count } => {
                let mut members = Vec::with_capacity(*count);
                for _ in 0..*count {
                    members.push(self.pop_name()?);
                }
                members.reverse();
                let name = self.bind(Value::Array(members));
                self.stack.push(name);
                Ok(())
            }
            Instr::Fetch { index } => {
                let members = self.pop_array()?;
                let member = members.get(*index).cloned().ok_or(
                    ErrorKind::IndexOutOfBounds {
                        index: *index as i64,
                        length: members.len(),
                    },
                )?;
                self.stack.push(member);
                Ok(())
            }
            Instr::Get => self.get(),
        }
    }

    /// Dynamic array selection: bounds invariant plus a mux chain over
    /// the members. A statically known index short-circuits to the
    /// member itself, failing eagerly when out of range.
    fn get(&mut self) -> Result<(), ErrorKind> {
        let index_name = self.pop_name()?;
        let index = match self.lookup(&index_name)?.clone() {
            Value::Integer(bits) => bits,
            other => {
                return Err(ErrorKind::TypeError {
                    expected: "an integer",
                    found: other.kind(),
                })
            }
        };
        let members = self.pop_array()?;
        let length = members.len();
        if length == 0 {
            return Err(ErrorKind::Structure("get from an empty array".into()));
        }

        if let Some(&c) = self.constants.get(&index_name) {
            if c < 0 || c >= length as i64 {
                return Err(ErrorKind::IndexOutOfBounds {
                    index: c,
                    length,
                });
            }
            self.stack.push(members[c as usize].clone());
            return Ok(());
        }

        // 0 <= index < length
        let len_bits = self.const_bits(length as i64, encoding::width_for(length as i64))?;
        let sign = index[0].clone();
        let non_negative = self.not_bit(&sign);
        let below = self.lt_bits(&index, &len_bits);
        let in_range = self.and_bit(&non_negative, &below);
        self.invariant_bit(&in_range);

        let values: Vec<Value> = members
            .iter()
            .map(|m| self.lookup(m).cloned())
            .collect::<Result<_, _>>()?;
        let result = match &values[0] {
            Value::Boolean(_) => {
                let bits: Vec<String> = values
                    .iter()
                    .map(|v| match v {
                        Value::Boolean(bit) => Ok(bit.clone()),
                        other => Err(ErrorKind::TypeError {
                            expected: "a boolean",
                            found: other.kind(),
                        }),
                    })
                    .collect::<Result<_, _>>()?;
                let mut acc = bits[0].clone();
                for (k, bit) in bits.iter().enumerate().skip(1) {
                    let sel = self.select_bit(&index, k as i64)?;
                    acc = self.mux_bit(&sel, bit, &acc);
                }
                Value::Boolean(acc)
            }
            Value::Integer(_) => {
                let groups: Vec<Vec<String>> = values
                    .iter()
                    .map(|v| match v {
                        Value::Integer(bits) => Ok(bits.clone()),
                        other => Err(ErrorKind::TypeError {
                            expected: "an integer",
                            found: other.kind(),
                        }),
                    })
                    .collect::<Result<_, _>>()?;
                let mut acc = groups[0].clone();
                for (k, bits) in groups.iter().enumerate().skip(1) {
                    let sel = self.select_bit(&index, k as i64)?;
                    acc = self.mux_bits(&sel, bits, &acc);
                }
                Value::Integer(acc)
            }
            Value::Array(_) => {
                return Err(ErrorKind::Structure(
                    "array members must be scalars for get".into(),
                ))
            }
        };
        self.push_value(result);
        Ok(())
    }

    fn select_bit(&mut self, index: &[String], k: i64) -> Result<String, ErrorKind> {
        let k_bits = self.const_bits(k, encoding::width_for(k))?;
        Ok(self.eq_bits(index, &k_bits))
    }

    // ========================================================================
    // Stack and symbol-table helpers
    // ========================================================================

    fn lookup(&self, symbol: &str) -> Result<&Value, ErrorKind> {
        self.table
            .get(symbol)
            .ok_or_else(|| ErrorKind::UndefinedSymbol(symbol.to_string()))
    }

    fn pop_name(&mut self) -> Result<String, ErrorKind> {
        self.stack.pop().ok_or(ErrorKind::StackUnderflow)
    }

    fn pop_value(&mut self) -> Result<Value, ErrorKind> {
        let name = self.pop_name()?;
        self.lookup(&name).cloned()
    }

    fn pop_boolean(&mut self) -> Result<String, ErrorKind> {
        match self.pop_value()? {
            Value::Boolean(bit) => Ok(bit),
            other => Err(ErrorKind::TypeError {
                expected: "a boolean",
                found: other.kind(),
            }),
        }
    }

    fn pop_integer(&mut self) -> Result<Vec<String>, ErrorKind> {
        match self.pop_value()? {
            Value::Integer(bits) => Ok(bits),
            other => Err(ErrorKind::TypeError {
                expected: "an integer",
                found: other.kind(),
            }),
        }
    }

    fn pop_array(&mut self) -> Result<Vec<String>, ErrorKind> {
        match self.pop_value()? {
            Value::Array(members) => Ok(members),
            other => Err(ErrorKind::TypeError {
                expected: "an array",
                found: other.kind(),
            }),
        }
    }

    fn bind(&mut self, value: Value) -> String {
        let name = self.registry.next_symbol();
        self.table.insert(name.clone(), value);
        name
    }

    fn push_value(&mut self, value: Value) {
        let name = self.bind(value);
        self.stack.push(name);
    }

    fn emit(&mut self, instr: L1) {
        self.out.push(instr);
    }

    // ========================================================================
    // Bit-level gate emission
    // ========================================================================

    /// Mint a bit symbol and reserve a Level 1 literal for it without
    /// constraining it.
    fn reserve_bit(&mut self) -> String {
        let name = self.registry.next_symbol();
        self.emit(L1::Push(name.clone()));
        self.emit(L1::Pop(name.clone()));
        name
    }

    /// Memoized constant bit, one per polarity per compilation.
    fn constant(&mut self, value: bool) -> String {
        let memo = if value { &self.true_bit } else { &self.false_bit };
        if let Some(name) = memo {
            return name.clone();
        }
        let name = self.registry.next_symbol();
        self.emit(if value { L1::True } else { L1::False });
        self.emit(L1::Pop(name.clone()));
        if value {
            self.true_bit = Some(name.clone());
        } else {
            self.false_bit = Some(name.clone());
        }
        name
    }

    fn const_bits(&mut self, value: i64, width: u32) -> Result<Vec<String>, ErrorKind> {
        Ok(encoding::encode(value, width)?
            .into_iter()
            .map(|b| self.constant(b))
            .collect())
    }

    fn gate1(&mut self, a: &str, ops: &[L1]) -> String {
        self.emit(L1::Push(a.to_string()));
        for op in ops {
            self.emit(op.clone());
        }
        let name = self.registry.next_symbol();
        self.emit(L1::Pop(name.clone()));
        name
    }

    fn gate2(&mut self, a: &str, b: &str, ops: &[L1]) -> String {
        self.emit(L1::Push(a.to_string()));
        self.emit(L1::Push(b.to_string()));
        for op in ops {
            self.emit(op.clone());
        }
        let name = self.registry.next_symbol();
        self.emit(L1::Pop(name.clone()));
        name
    }

    fn not_bit(&mut self, a: &str) -> String {
        self.gate1(a, &[L1::Not])
    }

    fn and_bit(&mut self, a: &str, b: &str) -> String {
        self.gate2(a, b, &[L1::And])
    }

    fn or_bit(&mut self, a: &str, b: &str) -> String {
        self.gate2(a, b, &[L1::Or])
    }

    fn eq_bit(&mut self, a: &str, b: &str) -> String {
        self.gate2(a, b, &[L1::Equal])
    }

    fn xor_bit(&mut self, a: &str, b: &str) -> String {
        self.gate2(a, b, &[L1::Equal, L1::Not])
    }

    fn mux_bit(&mut self, c: &str, t: &str, e: &str) -> String {
        self.emit(L1::Push(c.to_string()));
        self.emit(L1::Push(t.to_string()));
        self.emit(L1::Push(e.to_string()));
        self.emit(L1::If);
        let name = self.registry.next_symbol();
        self.emit(L1::Pop(name.clone()));
        name
    }

    fn invariant_bit(&mut self, bit: &str) {
        self.emit(L1::Push(bit.to_string()));
        self.emit(L1::Invariant);
    }

    // ========================================================================
    // Bit-vector arithmetic (MSB first)
    // ========================================================================

    /// Ripple-carry addition over equal-width operands. The final carry
    /// out is discarded, so callers widen first when overflow matters.
    fn add_bits(&mut self, a: &[String], b: &[String], carry_in: bool) -> Vec<String> {
        debug_assert_eq!(a.len(), b.len());
        let width = a.len();
        let mut carry = self.constant(carry_in);
        let mut out = vec![String::new(); width];
        for i in (0..width).rev() {
            let half = self.xor_bit(&a[i], &b[i]);
            out[i] = self.xor_bit(&half, &carry);
            let c1 = self.and_bit(&a[i], &b[i]);
            let c2 = self.and_bit(&half, &carry);
            carry = self.or_bit(&c1, &c2);
        }
        out
    }

    fn widen_add(&mut self, a: &[String], b: &[String]) -> Vec<String> {
        let width = a.len().max(b.len()) + 1;
        let a = resize(a, width);
        let b = resize(b, width);
        self.add_bits(&a, &b, false)
    }

    /// a - b as a + !b + 1, at one bit wider than the wider operand.
    fn widen_sub(&mut self, a: &[String], b: &[String]) -> Vec<String> {
        let width = a.len().max(b.len()) + 1;
        let a = resize(a, width);
        let b = resize(b, width);
        let not_b: Vec<String> = b.iter().map(|bit| self.not_bit(bit)).collect();
        self.add_bits(&a, &not_b, true)
    }

    fn negate_bits(&mut self, a: &[String]) -> Vec<String> {
        let width = a.len() + 1;
        let a = resize(a, width);
        let not_a: Vec<String> = a.iter().map(|bit| self.not_bit(bit)).collect();
        let zero_bit = self.constant(false);
        let zero = vec![zero_bit; width];
        self.add_bits(&not_a, &zero, true)
    }

    fn abs_bits(&mut self, a: &[String]) -> Vec<String> {
        let width = a.len() + 1;
        let extended = resize(a, width);
        let negated = self.negate_bits(a);
        let sign = extended[0].clone();
        self.mux_pairs(&sign, &negated, &extended)
    }

    /// Shift-and-add multiplication at the full product width, so the
    /// result never wraps.
    fn mul_bits(&mut self, a: &[String], b: &[String]) -> Vec<String> {
        let width = a.len() + b.len();
        let a = resize(a, width);
        let b = resize(b, width);
        let zero_bit = self.constant(false);
        let mut acc = vec![zero_bit.clone(); width];
        for shift in 0..width {
            let b_bit = b[width - 1 - shift].clone();
            let mut partial = vec![zero_bit.clone(); width];
            for significance in shift..width {
                let a_bit = a[width - 1 - (significance - shift)].clone();
                partial[width - 1 - significance] = self.and_bit(&a_bit, &b_bit);
            }
            acc = self.add_bits(&acc, &partial, false);
        }
        acc
    }

    /// Equality after sign extension to a common width.
    fn eq_bits(&mut self, a: &[String], b: &[String]) -> String {
        let width = a.len().max(b.len());
        let a = resize(a, width);
        let b = resize(b, width);
        let mut acc = self.eq_bit(&a[0], &b[0]);
        for i in 1..width {
            let pair = self.eq_bit(&a[i], &b[i]);
            acc = self.and_bit(&acc, &pair);
        }
        acc
    }

    /// a < b is the sign of the widened difference.
    fn lt_bits(&mut self, a: &[String], b: &[String]) -> String {
        let diff = self.widen_sub(a, b);
        diff[0].clone()
    }

    fn mux_bits(&mut self, c: &str, t: &[String], e: &[String]) -> Vec<String> {
        let width = t.len().max(e.len());
        let t = resize(t, width);
        let e = resize(e, width);
        self.mux_pairs(c, &t, &e)
    }

    fn mux_pairs(&mut self, c: &str, t: &[String], e: &[String]) -> Vec<String> {
        t.iter()
            .zip(e.iter())
            .map(|(x, y)| self.mux_bit(c, x, y))
            .collect()
    }

    /// Division by constraint: mint free quotient and remainder bits and
    /// pin them down with invariants. Truncating convention, quotient
    /// toward zero, remainder carrying the dividend's sign:
    ///
    ///   b != 0
    ///   a == q * b + r
    ///   |r| < |b|
    ///   r == 0 or sign(r) == sign(a)
    fn divmod_bits(
        &mut self,
        a: &[String],
        b: &[String],
    ) -> Result<(Vec<String>, Vec<String>), ErrorKind> {
        let q: Vec<String> = (0..a.len() + 1).map(|_| self.reserve_bit()).collect();
        let r: Vec<String> = (0..b.len()).map(|_| self.reserve_bit()).collect();

        let zero = self.const_bits(0, b.len() as u32)?;
        let b_zero = self.eq_bits(b, &zero);
        let b_nonzero = self.not_bit(&b_zero);
        self.invariant_bit(&b_nonzero);

        let product = self.mul_bits(&q, b);
        let sum = self.widen_add(&product, &r);
        let reconstructs = self.eq_bits(&sum, a);
        self.invariant_bit(&reconstructs);

        let abs_r = self.abs_bits(&r);
        let abs_b = self.abs_bits(b);
        let remainder_small = self.lt_bits(&abs_r, &abs_b);
        self.invariant_bit(&remainder_small);

        let r_zero = self.eq_bits(&r, &zero);
        let (r_sign, a_sign) = (r[0].clone(), a[0].clone());
        let same_sign = self.eq_bit(&r_sign, &a_sign);
        let sign_ok = self.or_bit(&r_zero, &same_sign);
        self.invariant_bit(&sign_ok);

        Ok((q, r))
    }
}

/// Sign extend or truncate to `width`. Extension repeats the sign bit
/// symbol; truncation keeps the low bits.
fn resize(bits: &[String], width: usize) -> Vec<String> {
    if bits.len() >= width {
        bits[bits.len() - width..].to_vec()
    } else {
        let mut out = vec![bits[0].clone(); width - bits.len()];
        out.extend_from_slice(bits);
        out
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

    fn int(symbol: &str, width: u32) -> Instr {
        Instr::Integer {
            symbol: symbol.into(),
            width,
        }
    }

    fn push(symbol: &str) -> Instr {
        Instr::Push {
            symbol: symbol.into(),
        }
    }

    fn pop(symbol: &str) -> Instr {
        Instr::Pop {
            symbol: symbol.into(),
            width: None,
        }
    }

    #[test]
    fn push_of_undeclared_symbol_fails() {
        let mut m = Machine::new();
        let err = m.call(&push("ghost")).unwrap_err();
        assert!(err.to_string().contains("level 2"));
        assert!(err.to_string().contains("undefined symbol `ghost`"));
    }

    #[test]
    fn add_of_boolean_is_a_type_error() {
        let mut m = Machine::new();
        m.call(&Instr::Boolean { symbol: "p".into() }).unwrap();
        m.call(&int("a", 4)).unwrap();
        m.call(&push("a")).unwrap();
        m.call(&push("p")).unwrap();
        let err = m.call(&Instr::Add).unwrap_err();
        assert!(err
            .to_string()
            .contains("expected an integer, found a boolean"));
    }

    #[test]
    fn constants_are_tracked_through_pop() {
        let m = run(&[Instr::Constant(Const::Integer(5)), pop("x")]);
        assert_eq!(m.constants.get("x"), Some(&5));
    }

    #[test]
    fn declaration_clears_a_stale_constant() {
        let m = run(&[Instr::Constant(Const::Integer(5)), pop("x"), int("x", 4)]);
        assert_eq!(m.constants.get("x"), None);
    }

    #[test]
    fn pop_with_width_truncates() {
        let m = run(&[
            int("a", 4),
            int("b", 4),
            push("a"),
            push("b"),
            Instr::Add,
            Instr::Pop {
                symbol: "c".into(),
                width: Some(4),
            },
        ]);
        match m.table.get("c") {
            Some(Value::Integer(bits)) => assert_eq!(bits.len(), 4),
            other => panic!("expected integer, got {other:?}"),
        }
    }

    #[test]
    fn arithmetic_widens() {
        let m = run(&[
            int("a", 4),
            int("b", 6),
            push("a"),
            push("b"),
            Instr::Add,
            pop("sum"),
            push("a"),
            push("b"),
            Instr::Multiply,
            pop("product"),
            push("a"),
            Instr::Negate,
            pop("negated"),
        ]);
        let width = |name: &str| match m.table.get(name) {
            Some(Value::Integer(bits)) => bits.len(),
            other => panic!("expected integer, got {other:?}"),
        };
        assert_eq!(width("sum"), 7);
        assert_eq!(width("product"), 10);
        assert_eq!(width("negated"), 5);
    }

    #[test]
    fn fetch_out_of_bounds_fails() {
        let mut m = Machine::new();
        m.call(&int("a", 4)).unwrap();
        m.call(&push("a")).unwrap();
        m.call(&Instr::Collect { count: 1 }).unwrap();
        let err = m.call(&Instr::Fetch { index: 3 }).unwrap_err();
        assert!(err.to_string().contains("out of bounds"));
    }

    #[test]
    fn get_with_static_index_in_range_selects_member() {
        let mut m = Machine::new();
        for name in ["a", "b"] {
            m.call(&int(name, 4)).unwrap();
        }
        m.call(&push("a")).unwrap();
        m.call(&push("b")).unwrap();
        m.call(&Instr::Collect { count: 2 }).unwrap();
        m.call(&Instr::Constant(Const::Integer(1))).unwrap();
        m.call(&Instr::Get).unwrap();
        // the selected member aliases b: popping it yields b's bits
        m.call(&pop("picked")).unwrap();
        let picked = match m.table.get("picked") {
            Some(Value::Integer(bits)) => bits.clone(),
            other => panic!("expected integer, got {other:?}"),
        };
        let b = match m.table.get("b") {
            Some(Value::Integer(bits)) => bits.clone(),
            other => panic!("expected integer, got {other:?}"),
        };
        assert_eq!(picked, b);
    }

    #[test]
    fn get_with_static_index_out_of_range_fails() {
        let mut m = Machine::new();
        m.call(&int("a", 4)).unwrap();
        m.call(&push("a")).unwrap();
        m.call(&Instr::Collect { count: 1 }).unwrap();
        m.call(&Instr::Constant(Const::Integer(5))).unwrap();
        let err = m.call(&Instr::Get).unwrap_err();
        assert!(err
            .to_string()
            .contains("index 5 is out of bounds for an array of length 1"));
    }

    #[test]
    fn divmod_pushes_quotient_then_remainder() {
        let mut m = Machine::new();
        m.call(&int("a", 4)).unwrap();
        m.call(&int("b", 4)).unwrap();
        m.call(&push("a")).unwrap();
        m.call(&push("b")).unwrap();
        m.call(&Instr::Divmod).unwrap();
        assert_eq!(m.stack.len(), 2);
        m.call(&pop("r")).unwrap();
        m.call(&pop("q")).unwrap();
        let width = |name: &str| match m.table.get(name) {
            Some(Value::Integer(bits)) => bits.len(),
            other => panic!("expected integer, got {other:?}"),
        };
        assert_eq!(width("q"), 5);
        assert_eq!(width("r"), 4);
    }

    #[test]
    fn variable_records_bit_group_msb_first() {
        let m = run(&[int("a", 3), Instr::Variable { symbol: "a".into() }]);
        let group = m.variables.get("a").unwrap();
        assert_eq!(group.kind, GroupKind::Integer);
        assert_eq!(group.symbols.len(), 3);
        let exposed: Vec<_> = m
            .emitted()
            .iter()
            .filter(|i| matches!(i, L1::Variable(_)))
            .collect();
        assert_eq!(exposed.len(), 3);
    }

    #[test]
    fn invariant_on_integer_is_a_type_error() {
        let mut m = Machine::new();
        m.call(&int("a", 4)).unwrap();
        m.call(&push("a")).unwrap();
        let err = m.call(&Instr::Invariant).unwrap_err();
        assert!(err
            .to_string()
            .contains("expected a boolean, found an integer"));
    }
}
