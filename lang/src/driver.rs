//! Runs the phases in order for one file or a whole set of sources.

use anyhow::Context;
use tracing::info_span;

use crate::{
    error::Error,
    generator,
    instruction::Instruction,
    linker::{self, Unit},
    optimizer,
    options::Options,
    parser,
    source::{FileIndex, Sources},
};

/// Parses, generates and (unless disabled) optimizes one source file.
pub fn compile_source(
    sources: &Sources,
    file_idx: FileIndex,
    options: &Options,
) -> Result<Vec<Instruction>, Error> {
    let path = sources.files[file_idx].path.display().to_string();
    let program = info_span!("parse", %path).in_scope(|| parser::parse(sources, file_idx))?;
    let code = info_span!("generate", %path).in_scope(|| generator::generate(&program, options))?;
    if !options.optimize {
        return Ok(code);
    }
    Ok(info_span!("optimize", %path).in_scope(|| optimizer::optimize(code, options)))
}

/// Compiles every loaded file and links them, in load order, into one
/// program. `.mlog` files are passed through untouched.
pub fn build(sources: &Sources, options: &Options) -> anyhow::Result<String> {
    let units = sources
        .files
        .iter_enumerated()
        .map(|(file_idx, file)| {
            if file.is_precompiled() {
                return Ok(Unit::Precompiled(file.source.clone()));
            }
            compile_source(sources, file_idx, options)
                .map(Unit::Compiled)
                .map_err(|e| anyhow::anyhow!("{}", e.into_user(sources)))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    info_span!("link", units = units.len())
        .in_scope(|| linker::link(&units))
        .context("linking failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::{self, Config, Outcome, Value};

    fn build_one(src: &str, options: &Options) -> String {
        let mut sources = Sources::default();
        sources.add("main.mlc", src);
        build(&sources, options).unwrap()
    }

    fn run(src: &str, options: &Options, config: &Config) -> Outcome {
        emulator::run(&build_one(src, options), config).unwrap()
    }

    fn unoptimized() -> Options {
        Options {
            optimize: false,
            ..Options::default()
        }
    }

    /// Optimized and unoptimized builds agree on everything the program
    /// can observe.
    fn assert_equivalent(src: &str, config: &Config) -> (Outcome, Outcome) {
        let plain = run(src, &unoptimized(), config);
        let optimized = run(src, &Options::default(), config);
        assert_eq!(plain.user_variables(), optimized.user_variables(), "{}", src);
        assert_eq!(plain.printed, optimized.printed, "{}", src);
        assert_eq!(plain.devices, optimized.devices, "{}", src);
        assert!(optimized.steps <= plain.steps, "{}", src);
        (plain, optimized)
    }

    const PROGRAMS: &[&str] = &[
        "x = 1\nwhile (x < 3) { x += 1 }\nprint(x)",
        "let total = 0\nfor i in 0..10 { if (i % 2 == 0) { continue }\ntotal += i }\nprint(total)",
        "let s = 0\nfor i in 1..4 { s += i * i }\nprint(s)",
        "fn sq(a: num) -> num { return a * a }\nlet y = sq(3) + sq(4)\nprint(y)",
        "let n = 0\nfor (let k = 0; k < 5; k += 1) { if (k == 3) { break }\nn = n + k }\nprint(n)",
        "let a = 10\nlet b = 3\nlet q = a // b\nlet r = a % b\nlet p = 2 ** 5\nlet neg = -a\nlet bits = ~5 & 7\nprint(q, r, p, neg, bits)",
        "let c = 0\nlet i = 0\nwhile (i < 4) { if (i == 1 || i == 2) { c += 10 } else { c += 1 }\ni += 1 }\nprint(c)",
        "fn pick(a, b) { if (a > b) { return a }\nreturn b }\nlet m = pick(2, 7) + pick(9, 1)\nprint(m)",
        "let t = \"hi\"\nif (!0) { print(t) }\nlet u = t == \"hi\"\nprint(u)",
    ];

    #[test]
    fn while_example_end_to_end() {
        assert_eq!(
            build_one("x = 1\nwhile (x < 3) { x += 1 }\nprint(x)", &Options::default()),
            "set x 1\njump 4 greaterThanEq x 3\nop add x x 1\njump 1 always _ _\nprint x\n"
        );
    }

    #[test]
    fn optimization_preserves_behaviour() {
        for src in PROGRAMS {
            assert_equivalent(src, &Config::default());
        }
    }

    #[test]
    fn expected_results() {
        let outputs: Vec<_> = PROGRAMS
            .iter()
            .map(|src| run(src, &Options::default(), &Config::default()).printed)
            .collect();
        assert_eq!(
            outputs,
            ["3", "25", "14", "25", "3", "3132-102", "22", "16", "hi1"]
        );
    }

    #[test]
    fn memory_programs() {
        let config = Config::default().memory("cell1", 8).message("message1");
        let src = "for i in 0..8 { cell1[i] = i * 2 }\n\
                   let sum = 0\n\
                   let j = 0\n\
                   while (j < 8) { sum += cell1[j]\nj += 1 }\n\
                   print(\"sum \", sum)\n\
                   printflush(message1)";
        let (_, optimized) = assert_equivalent(src, &config);
        assert_eq!(optimized.message("message1"), Some("sum 56"));
        assert_eq!(
            optimized.memory("cell1"),
            Some(&[0.0, 2.0, 4.0, 6.0, 8.0, 10.0, 12.0, 14.0][..])
        );
        assert_eq!(optimized.variables["sum"], Value::Num(56.0));
    }

    #[test]
    fn no_unreachable_lines_after_optimization() {
        for src in PROGRAMS {
            let text = build_one(src, &Options::default());
            let lines: Vec<_> = text.lines().collect();
            let mut live = vec![false; lines.len()];
            let mut stack = vec![0];
            while let Some(idx) = stack.pop() {
                if idx >= lines.len() || live[idx] {
                    continue;
                }
                live[idx] = true;
                let words: Vec<_> = lines[idx].split(' ').collect();
                let falls_through = match words[0] {
                    "jump" => {
                        stack.push(words[1].parse().unwrap());
                        words[2] != "always"
                    }
                    "end" | "stop" => false,
                    _ => words.get(1) != Some(&"@counter"),
                };
                // Calls come back to the line after their jump.
                let returns_here = idx > 0 && lines[idx - 1].contains(" @counter 1");
                if falls_through || returns_here {
                    stack.push(idx + 1);
                }
            }
            assert!(live.iter().all(|l| *l), "{}\n{}", src, text);
        }
    }

    #[test]
    fn files_are_linked_in_order() {
        let mut sources = Sources::default();
        sources.add("a.mlc", "let a = 0\nwhile (a < 2) { a += 1 }\nprint(a)");
        sources.add("b.mlog", "# hand written\nset b 5\njump 3 always _ _\nset b 6\nprint b\n");
        sources.add("c.mlc", "print(\"done\")");
        let text = build(&sources, &Options::default()).unwrap();
        assert_eq!(
            text,
            "set a 0\n\
             jump 4 greaterThanEq a 2\n\
             op add a a 1\n\
             jump 1 always _ _\n\
             print a\n\
             set b 5\n\
             jump 8 always _ _\n\
             set b 6\n\
             print b\n\
             print \"done\"\n"
        );
        let outcome = emulator::run(&text, &Config::default()).unwrap();
        assert_eq!(outcome.variables["b"], Value::Num(5.0));
        assert_eq!(outcome.printed, "25done");
    }

    #[test]
    fn a_unit_that_runs_off_its_end_restarts_itself() {
        let mut sources = Sources::default();
        sources.add("a.mlog", "set a 1\njump 9 equal a 1\nset a 2\n");
        sources.add("b.mlog", "set b 1\njump 7 always _ _\nset b 2\n");
        let text = build(&sources, &Options::default()).unwrap();
        assert_eq!(
            text,
            "set a 1\njump 0 equal a 1\nset a 2\nset b 1\njump 3 always _ _\nset b 2\n"
        );
    }

    #[test]
    fn errors_point_at_source() {
        let mut sources = Sources::default();
        sources.add("main.mlc", "let a = 1\nlet a = 2\n");
        let message = build(&sources, &Options::default()).unwrap_err().to_string();
        assert!(message.starts_with("main.mlc:2:"), "{}", message);
    }
}
