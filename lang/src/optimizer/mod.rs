//! Peephole optimizer over symbolic instructions.
//!
//! Passes own the instruction list and report whether they changed anything.
//! A round runs them in a fixed order; rounds repeat until nothing changes or
//! the configured bound is hit.

mod copy_prop;
mod dce;
mod fold;
mod jumps;

use tracing::{debug, warn};

use crate::{instruction::Instruction, options::Options};

pub type Pass = fn(Vec<Instruction>) -> (Vec<Instruction>, bool);

const ROUND: &[(&str, Pass)] = &[
    ("copy propagation", copy_prop::run),
    ("constant folding", fold::run),
    ("copy propagation", copy_prop::run),
    ("jump threading", jumps::run),
    ("noop removal", remove_noops),
    ("dead code elimination", dce::run),
];

pub fn optimize(mut code: Vec<Instruction>, options: &Options) -> Vec<Instruction> {
    let before = code.len();
    for round in 0..options.max_rounds {
        let mut changed = false;
        for (name, pass) in ROUND {
            let (next, pass_changed) = pass(code);
            code = next;
            if pass_changed {
                debug!(round, pass = name, instructions = code.len(), "changed");
            }
            changed |= pass_changed;
        }
        if !changed {
            debug!(rounds = round + 1, before, after = code.len(), "optimized");
            return code;
        }
    }
    warn!(
        max_rounds = options.max_rounds,
        "optimizer stopped before reaching a fixed point"
    );
    code
}

fn remove_noops(code: Vec<Instruction>) -> (Vec<Instruction>, bool) {
    let before = code.len();
    let code: Vec<_> = code
        .into_iter()
        .filter(|i| !matches!(i, Instruction::Noop))
        .collect();
    let changed = code.len() != before;
    (code, changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{generator, parser, source::Sources};

    fn optimized(src: &str) -> Vec<Instruction> {
        let mut sources = Sources::default();
        let file_idx = sources.add("test.mlc", src);
        let program = parser::parse(&sources, file_idx).unwrap();
        let options = Options::default();
        optimize(generator::generate(&program, &options).unwrap(), &options)
    }

    fn render(code: &[Instruction]) -> Vec<String> {
        code.iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn while_loop_is_tightened() {
        let code = optimized("x = 1\nwhile (x < 3) { x += 1 }\nprint(x)");
        assert_eq!(
            render(&code),
            [
                "set x 1",
                "__l0_s:",
                "jump __l0_e greaterThanEq x 3",
                "op add x x 1",
                "__l0_c:",
                "jump __l0_s always _ _",
                "__l0_e:",
                "print x",
            ]
        );
    }

    #[test]
    fn reaches_a_fixed_point() {
        let sources = [
            "x = 1\nwhile (x < 3) { x += 1 }\nprint(x)",
            "fn sq(a: num) -> num { return a * a }\nlet y = sq(3) + sq(4)\nprint(y)",
            "let n = cell1[0]\nfor i in 0..n { cell1[i] = i * 2 }\nif (n > 2) { print(\"big\") } else { print(\"small\") }",
        ];
        for src in sources {
            let code = optimized(src);
            let again = optimize(code.clone(), &Options::default());
            assert_eq!(code, again, "{}", src);
        }
    }

    #[test]
    fn round_limit_is_respected() {
        let code = vec![
            Instruction::set("__t0", crate::instruction::Operand::Number(1.0)),
            Instruction::set("x", crate::instruction::Operand::var("__t0")),
        ];
        let options = Options {
            max_rounds: 0,
            ..Options::default()
        };
        assert_eq!(optimize(code.clone(), &options), code);
    }

    #[test]
    fn noops_are_removed() {
        let (code, changed) = remove_noops(vec![Instruction::Noop, Instruction::Noop]);
        assert!(changed);
        assert!(code.is_empty());
    }
}
