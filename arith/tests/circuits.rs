//! End-to-end checks of the emitted circuits: compile a Level 2 program
//! down to DIMACS, fix the inputs, propagate, and read the outputs back.

use arith::{decode, encode, Const, Instr, Machine};
use cnf::sim::Simulation;
use cnf::{Lit, Metadata, Output};

fn compile(instrs: &[Instr]) -> Output {
    let (metadata, level1) = Machine::compile(instrs, Metadata::new()).unwrap();
    cnf::Machine::compile(&level1, metadata).unwrap()
}

fn literals(output: &Output, name: &str) -> Vec<Lit> {
    let group = output.metadata.level2_variables.get(name).unwrap();
    group
        .symbols
        .iter()
        .map(|bit| *output.metadata.level1_variables.get(bit).unwrap())
        .collect()
}

fn assume_int(sim: &mut Simulation, output: &Output, name: &str, value: i64) {
    let lits = literals(output, name);
    let bits = encode(value, lits.len() as u32).unwrap();
    for (lit, bit) in lits.iter().zip(bits) {
        sim.assume(if bit { *lit } else { -lit });
    }
}

fn read_int(sim: &Simulation, output: &Output, name: &str) -> i64 {
    let bits: Vec<bool> = literals(output, name)
        .iter()
        .map(|&lit| sim.value(lit).unwrap())
        .collect();
    decode(&bits)
}

fn read_bool(sim: &Simulation, output: &Output, name: &str) -> bool {
    let lits = literals(output, name);
    assert_eq!(lits.len(), 1);
    sim.value(lits[0]).unwrap()
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

fn var(symbol: &str) -> Instr {
    Instr::Variable {
        symbol: symbol.into(),
    }
}

/// Declare two width-4 inputs, apply `op`, expose everything.
fn binary_program(op: Instr) -> Vec<Instr> {
    vec![
        int("a", 4),
        int("b", 4),
        var("a"),
        var("b"),
        push("a"),
        push("b"),
        op,
        pop("out"),
        var("out"),
    ]
}

fn eval_binary(op: Instr, a: i64, b: i64) -> (Simulation, Output) {
    let output = compile(&binary_program(op));
    let mut sim = Simulation::from_dimacs(&output.dimacs);
    assume_int(&mut sim, &output, "a", a);
    assume_int(&mut sim, &output, "b", b);
    sim.propagate().unwrap();
    (sim, output)
}

#[test]
fn addition() {
    for (a, b) in [(3, 4), (-8, -8), (7, 7), (-1, 1)] {
        let (sim, output) = eval_binary(Instr::Add, a, b);
        assert_eq!(read_int(&sim, &output, "out"), a + b, "{a} + {b}");
    }
}

#[test]
fn subtraction() {
    for (a, b) in [(3, 5), (-8, 7), (0, -8)] {
        let (sim, output) = eval_binary(Instr::Subtract, a, b);
        assert_eq!(read_int(&sim, &output, "out"), a - b, "{a} - {b}");
    }
}

#[test]
fn multiplication() {
    for (a, b) in [(3, -2), (-8, -8), (7, 7), (5, 0)] {
        let (sim, output) = eval_binary(Instr::Multiply, a, b);
        assert_eq!(read_int(&sim, &output, "out"), a * b, "{a} * {b}");
    }
}

#[test]
fn negation_and_absolute() {
    for (op, f) in [
        (Instr::Negate, (|v: i64| -v) as fn(i64) -> i64),
        (Instr::Absolute, |v: i64| v.abs()),
    ] {
        for a in [-8i64, -3, 0, 7] {
            let output = compile(&[
                int("a", 4),
                var("a"),
                push("a"),
                op.clone(),
                pop("out"),
                var("out"),
            ]);
            let mut sim = Simulation::from_dimacs(&output.dimacs);
            assume_int(&mut sim, &output, "a", a);
            sim.propagate().unwrap();
            assert_eq!(read_int(&sim, &output, "out"), f(a));
        }
    }
}

#[test]
fn comparisons() {
    let cases: [(Instr, fn(i64, i64) -> bool); 4] = [
        (Instr::LessThan, |a, b| a < b),
        (Instr::GreaterThan, |a, b| a > b),
        (Instr::LessEqual, |a, b| a <= b),
        (Instr::GreaterEqual, |a, b| a >= b),
    ];
    for (op, f) in cases {
        for (a, b) in [(2, 3), (3, 2), (4, 4), (-8, 7), (7, -8)] {
            let (sim, output) = eval_binary(op.clone(), a, b);
            assert_eq!(read_bool(&sim, &output, "out"), f(a, b), "{op} {a} {b}");
        }
    }
}

#[test]
fn integer_equality() {
    for (a, b) in [(5, 5), (5, -5), (-8, -8)] {
        let (sim, output) = eval_binary(Instr::Equal, a, b);
        assert_eq!(read_bool(&sim, &output, "out"), a == b);
    }
}

#[test]
fn truncation_wraps_on_pop() {
    // 7 + 7 = 14 at width 5, truncated back into a width-4 symbol: -2
    let output = compile(&[
        int("a", 4),
        int("b", 4),
        var("a"),
        var("b"),
        push("a"),
        push("b"),
        Instr::Add,
        Instr::Pop {
            symbol: "out".into(),
            width: Some(4),
        },
        var("out"),
    ]);
    let mut sim = Simulation::from_dimacs(&output.dimacs);
    assume_int(&mut sim, &output, "a", 7);
    assume_int(&mut sim, &output, "b", 7);
    sim.propagate().unwrap();
    assert_eq!(read_int(&sim, &output, "out"), -2);
}

#[test]
fn dynamic_get_selects_by_index() {
    let output = compile(&[
        int("a", 4),
        int("b", 4),
        int("c", 4),
        int("i", 3),
        var("a"),
        var("b"),
        var("c"),
        var("i"),
        push("a"),
        push("b"),
        push("c"),
        Instr::Collect { count: 3 },
        push("i"),
        Instr::Get,
        pop("out"),
        var("out"),
    ]);
    for (index, want) in [(0i64, 5i64), (1, -3), (2, 7)] {
        let mut sim = Simulation::from_dimacs(&output.dimacs);
        assume_int(&mut sim, &output, "a", 5);
        assume_int(&mut sim, &output, "b", -3);
        assume_int(&mut sim, &output, "c", 7);
        assume_int(&mut sim, &output, "i", index);
        sim.propagate().unwrap();
        assert_eq!(read_int(&sim, &output, "out"), want);
    }
}

#[test]
fn dynamic_get_out_of_range_conflicts() {
    let output = compile(&[
        int("a", 4),
        int("i", 3),
        var("a"),
        var("i"),
        push("a"),
        Instr::Collect { count: 1 },
        push("i"),
        Instr::Get,
        pop("out"),
    ]);
    let mut sim = Simulation::from_dimacs(&output.dimacs);
    assume_int(&mut sim, &output, "a", 5);
    assume_int(&mut sim, &output, "i", 2);
    assert!(sim.propagate().is_err());
}

fn divmod_program() -> Vec<Instr> {
    vec![
        int("a", 4),
        int("b", 4),
        var("a"),
        var("b"),
        push("a"),
        push("b"),
        Instr::Divmod,
        pop("r"),
        pop("q"),
        var("q"),
        var("r"),
    ]
}

#[test]
fn divmod_accepts_the_truncating_solution() {
    // q toward zero, r carries the dividend's sign
    for (a, b, q, r) in [
        (7i64, 2i64, 3i64, 1i64),
        (-7, 2, -3, -1),
        (7, -2, -3, 1),
        (-7, -2, 3, -1),
        (6, 3, 2, 0),
    ] {
        let output = compile(&divmod_program());
        let mut sim = Simulation::from_dimacs(&output.dimacs);
        assume_int(&mut sim, &output, "a", a);
        assume_int(&mut sim, &output, "b", b);
        assume_int(&mut sim, &output, "q", q);
        assume_int(&mut sim, &output, "r", r);
        sim.propagate().unwrap();
        assert!(sim.all_clauses_satisfied(), "{a} divmod {b}");
    }
}

#[test]
fn divmod_rejects_the_floored_solution() {
    // floored division of -7 by 2 would give (-4, 1)
    let output = compile(&divmod_program());
    let mut sim = Simulation::from_dimacs(&output.dimacs);
    assume_int(&mut sim, &output, "a", -7);
    assume_int(&mut sim, &output, "b", 2);
    assume_int(&mut sim, &output, "q", -4);
    assume_int(&mut sim, &output, "r", 1);
    assert!(sim.propagate().is_err());
}

#[test]
fn divmod_rejects_division_by_zero() {
    let output = compile(&divmod_program());
    let mut sim = Simulation::from_dimacs(&output.dimacs);
    assume_int(&mut sim, &output, "b", 0);
    assert!(sim.propagate().is_err());
}

#[test]
fn if_selects_between_integers() {
    let output = compile(&[
        Instr::Boolean { symbol: "c".into() },
        int("a", 4),
        int("b", 4),
        var("c"),
        var("a"),
        var("b"),
        push("c"),
        push("a"),
        push("b"),
        Instr::If,
        pop("out"),
        var("out"),
    ]);
    for (cond, want) in [(true, 5i64), (false, -3i64)] {
        let mut sim = Simulation::from_dimacs(&output.dimacs);
        let c = literals(&output, "c")[0];
        sim.assume(if cond { c } else { -c });
        assume_int(&mut sim, &output, "a", 5);
        assume_int(&mut sim, &output, "b", -3);
        sim.propagate().unwrap();
        assert_eq!(read_int(&sim, &output, "out"), want);
    }
}
