/// The standard library: operator functions pre-registered as
/// immutable Level 3 definitions before any user code runs.
///
/// Surface operators, indexing and the ternary all lower to calls of
/// these, so redefining `+` is rejected the same way redefining any
/// immutable function is.
use rustc_hash::FxHashMap;
use structures::{Const, Instr};

/// Build the prelude instruction stream and the table of how many
/// values each function leaves on the stack.
pub fn prelude() -> (Vec<Instr>, FxHashMap<String, usize>) {
    let mut out = Vec::new();
    let mut returns = FxHashMap::default();

    let mut seed = |name: &str, body: Vec<Instr>, count: usize| {
        out.extend(body);
        returns.insert(name.to_string(), count);
    };

    seed("+", binary("+", &[Instr::Add]), 1);
    seed("-", binary("-", &[Instr::Subtract]), 1);
    seed("*", binary("*", &[Instr::Multiply]), 1);
    seed("/", binary("/", &[Instr::Divide]), 1);
    seed("%", binary("%", &[Instr::Modulo]), 1);
    seed("<", binary("<", &[Instr::LessThan]), 1);
    seed(">", binary(">", &[Instr::GreaterThan]), 1);
    seed("<=", binary("<=", &[Instr::LessEqual]), 1);
    seed(">=", binary(">=", &[Instr::GreaterEqual]), 1);
    seed("==", binary("==", &[Instr::Equal]), 1);
    seed("!=", binary("!=", &[Instr::Equal, Instr::Not]), 1);
    seed("&&", binary("&&", &[Instr::And]), 1);
    seed("||", binary("||", &[Instr::Or]), 1);

    seed("!", unary("!", &[Instr::Not]), 1);
    seed("-@", unary("-@", &[Instr::Negate]), 1);
    seed("abs", unary("abs", &[Instr::Absolute]), 1);
    seed("length", unary("length", &[Instr::Length]), 1);

    seed("get", fetch("get"), 1);
    seed("[]", fetch("[]"), 1);

    // Pops else, then, cond.
    seed(
        "if",
        vec![
            define("if", &["c", "t", "e"], false),
            push("c"),
            push("t"),
            push("e"),
            Instr::If,
            Instr::Return { count: 1 },
        ],
        1,
    );

    // Pushes the quotient, then the remainder.
    seed(
        "divmod",
        vec![
            define("divmod", &["a", "b"], false),
            push("a"),
            push("b"),
            Instr::Divmod,
            Instr::Return { count: 2 },
        ],
        2,
    );

    seed("each", iterator("each", Instr::Each), 0);
    seed("eachPair", iterator("eachPair", Instr::EachPair), 0);

    // `uniq?` accumulates pairwise distinctness through a dynamic
    // helper that writes back into the accumulator one frame up.
    seed(
        "uniq?:pair",
        vec![
            define("uniq?:pair", &["x", "y"], true),
            push("memo"),
            push("x"),
            push("y"),
            Instr::Equal,
            Instr::Not,
            Instr::And,
            Instr::Pop {
                symbol: "memo".into(),
                local: false,
            },
            Instr::Return { count: 0 },
        ],
        0,
    );
    seed(
        "uniq?",
        vec![
            define("uniq?", &["xs"], false),
            Instr::Constant(Const::Boolean(true)),
            Instr::Pop {
                symbol: "memo".into(),
                local: true,
            },
            push("xs"),
            Instr::Pointer {
                name: "uniq?:pair".into(),
            },
            Instr::EachPair,
            push("memo"),
            Instr::Return { count: 1 },
        ],
        1,
    );

    (out, returns)
}

fn define(name: &str, args: &[&str], dynamic: bool) -> Instr {
    Instr::Define {
        name: name.into(),
        args: args.iter().map(|a| a.to_string()).collect(),
        dynamic,
        immutable: true,
    }
}

fn push(symbol: &str) -> Instr {
    Instr::Push {
        symbol: symbol.into(),
    }
}

fn unary(name: &str, ops: &[Instr]) -> Vec<Instr> {
    let mut body = vec![define(name, &["a"], false), push("a")];
    body.extend_from_slice(ops);
    body.push(Instr::Return { count: 1 });
    body
}

fn binary(name: &str, ops: &[Instr]) -> Vec<Instr> {
    let mut body = vec![define(name, &["a", "b"], false), push("a"), push("b")];
    body.extend_from_slice(ops);
    body.push(Instr::Return { count: 1 });
    body
}

fn fetch(name: &str) -> Vec<Instr> {
    vec![
        define(name, &["xs", "i"], false),
        push("xs"),
        push("i"),
        Instr::Get,
        Instr::Return { count: 1 },
    ]
}

fn iterator(name: &str, op: Instr) -> Vec<Instr> {
    vec![
        define(name, &["xs", "fn"], false),
        push("xs"),
        push("fn"),
        op,
        Instr::Return { count: 0 },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_definition_is_balanced() {
        let (out, _) = prelude();
        let mut depth = 0usize;
        for instr in &out {
            match instr {
                Instr::Define { .. } => depth += 1,
                Instr::Return { .. } => depth -= 1,
                _ => assert!(depth > 0, "instruction outside a definition"),
            }
        }
        assert_eq!(depth, 0);
    }

    #[test]
    fn return_counts_match_the_table() {
        let (out, returns) = prelude();
        let mut current: Option<&str> = None;
        for instr in &out {
            match instr {
                Instr::Define { name, .. } => current = Some(name),
                Instr::Return { count } => {
                    let name = current.take().unwrap();
                    assert_eq!(returns[name], *count, "return count for `{name}`");
                }
                _ => {}
            }
        }
    }

    #[test]
    fn the_prelude_loads_into_a_fresh_machine() {
        let (out, _) = prelude();
        let mut machine = structures::Machine::new();
        for instr in &out {
            machine.call(instr).unwrap();
        }
        assert!(machine.emitted().is_empty());
    }
}
