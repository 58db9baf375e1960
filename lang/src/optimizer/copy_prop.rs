//! Copy propagation and single-use elimination of compiler temporaries.
//!
//! User variables are never touched: their final values are observable.

use std::collections::HashMap;

use itertools::Itertools;

use crate::instruction::{is_temporary, Instruction, Opcode, Operand, Param, COUNTER};

/// How many instructions ahead a copy may be forwarded.
pub const WINDOW: usize = 16;

/// Opcodes that write exactly one variable, so their result can be
/// redirected to its final destination.
const SINGLE_OUTPUT: &[Opcode] = &[
    Opcode::Set,
    Opcode::Op,
    Opcode::Sensor,
    Opcode::Read,
    Opcode::Radar,
    Opcode::URadar,
    Opcode::GetLink,
    Opcode::Lookup,
    Opcode::PackColor,
];

/// Number of slots mentioning each temporary.
fn temp_counts(code: &[Instruction]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for instruction in code {
        let reads = instruction.inputs().into_iter().filter_map(Operand::as_variable);
        let writes = instruction.as_native().into_iter().flat_map(|n| n.outputs());
        for name in reads.chain(writes).filter(|n| is_temporary(n)) {
            *counts.entry(name.to_owned()).or_insert(0) += 1;
        }
    }
    counts
}

pub fn run(code: Vec<Instruction>) -> (Vec<Instruction>, bool) {
    let mut counts = temp_counts(&code);
    let mut code: Vec<Option<Instruction>> = code.into_iter().map(Some).collect();
    let mut changed = false;

    for idx in 0..code.len() {
        let Some(instruction) = code[idx].clone() else {
            continue;
        };

        if let Some((temp, value)) = forwardable(&instruction, &counts) {
            if let Some(use_idx) = find_use(&code, idx, temp, value) {
                if let Some(user) = code[use_idx].as_mut() {
                    for operand in user.inputs_mut() {
                        if operand.is_variable(temp) {
                            *operand = value.clone();
                        }
                    }
                }
                counts.remove(temp);
                code[idx] = None;
                changed = true;
                continue;
            }
        }

        if is_unused(&instruction, &counts) {
            for name in instruction.inputs().into_iter().filter_map(Operand::as_variable) {
                if let Some(count) = counts.get_mut(name) {
                    *count -= 1;
                }
            }
            code[idx] = None;
            changed = true;
            continue;
        }

        if let Some((set_idx, temp, target)) = redirect(&code, idx, &instruction, &counts) {
            if let Some(Instruction::Native(native)) = code[idx].as_mut() {
                for param in native.params.iter_mut() {
                    if matches!(param, Param::Out(name) if *name == temp) {
                        *param = Param::Out(target.clone());
                    }
                }
            }
            counts.remove(&temp);
            code[set_idx] = None;
            changed = true;
        }
    }

    (code.into_iter().flatten().collect(), changed)
}

/// `set t v` where `t` is a temporary mentioned only here and at one use.
fn forwardable<'i>(
    instruction: &'i Instruction,
    counts: &HashMap<String, usize>,
) -> Option<(&'i str, &'i Operand)> {
    let (temp, value) = instruction.as_native()?.as_set()?;
    if !is_temporary(temp) || counts.get(temp) != Some(&2) {
        return None;
    }
    if value.is_variable(temp) || value.is_variable(COUNTER) {
        return None;
    }
    Some((temp, value))
}

/// The single straight-line reader of `temp` after `def`, if `value` still
/// holds there.
fn find_use(code: &[Option<Instruction>], def: usize, temp: &str, value: &Operand) -> Option<usize> {
    let source = value.as_variable();
    // Builtins change without an explicit write, so they only reach the
    // very next instruction.
    let volatile = source.is_some_and(|s| s.starts_with('@'));
    code.iter()
        .enumerate()
        .skip(def + 1)
        .filter_map(|(idx, i)| Some((idx, i.as_ref()?)))
        .take(WINDOW)
        .find_map(|(idx, instruction)| {
            if instruction.reads(temp) {
                return Some(Some(idx));
            }
            let barrier = matches!(
                instruction,
                Instruction::Label(_) | Instruction::Jump(_) | Instruction::JumpIf { .. }
            ) || instruction.writes(COUNTER)
                || source.is_some_and(|s| instruction.writes(s))
                || volatile;
            barrier.then_some(None)
        })
        .flatten()
}

/// Pure instructions whose only outputs are temporaries nobody reads.
fn is_unused(instruction: &Instruction, counts: &HashMap<String, usize>) -> bool {
    let Some(native) = instruction.as_native() else {
        return false;
    };
    if !native.opcode.is_pure() {
        return false;
    }
    let mut outputs = native.outputs().peekable();
    outputs.peek().is_some() && outputs.all(|name| is_temporary(name) && counts.get(name) == Some(&1))
}

/// A single-output native writing temporary `t`, directly followed by
/// `set x t`: returns the index of that `set`, `t` and `x`.
fn redirect(
    code: &[Option<Instruction>],
    idx: usize,
    instruction: &Instruction,
    counts: &HashMap<String, usize>,
) -> Option<(usize, String, String)> {
    let native = instruction.as_native()?;
    if !SINGLE_OUTPUT.contains(&native.opcode) {
        return None;
    }
    let (temp,) = native.outputs().collect_tuple()?;
    if !is_temporary(temp) || counts.get(temp) != Some(&2) {
        return None;
    }
    let (set_idx, next) = code
        .iter()
        .enumerate()
        .skip(idx + 1)
        .find_map(|(i, c)| Some((i, c.as_ref()?)))?;
    let (target, value) = next.as_native()?.as_set()?;
    if !value.is_variable(temp) || target == temp {
        return None;
    }
    Some((set_idx, temp.to_owned(), target.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Label, Operator};

    fn num(n: f64) -> Operand {
        Operand::Number(n)
    }

    fn var(name: &str) -> Operand {
        Operand::var(name)
    }

    #[test]
    fn copies_are_forwarded_to_their_use() {
        let code = vec![
            Instruction::set("__t0", var("a")),
            Instruction::op(Operator::Add, "x", var("__t0"), Some(num(1.0))),
        ];
        let (code, changed) = run(code);
        assert!(changed);
        assert_eq!(
            code,
            [Instruction::op(Operator::Add, "x", var("a"), Some(num(1.0)))]
        );
    }

    #[test]
    fn labels_and_writes_stop_forwarding() {
        let across_label = vec![
            Instruction::set("__t0", var("a")),
            Instruction::Label(Label("l".into())),
            Instruction::set("x", var("__t0")),
        ];
        let (code, _) = run(across_label.clone());
        assert_eq!(code, across_label);

        let overwritten = vec![
            Instruction::set("__t0", var("a")),
            Instruction::set("a", num(2.0)),
            Instruction::op(Operator::Add, "x", var("__t0"), Some(num(1.0))),
        ];
        let (code, changed) = run(overwritten.clone());
        assert!(!changed);
        assert_eq!(code, overwritten);
    }

    #[test]
    fn results_are_written_directly() {
        let code = vec![
            Instruction::op(Operator::Mul, "__t3", var("y"), Some(num(6.0))),
            Instruction::set("z", var("__t3")),
        ];
        let (code, changed) = run(code);
        assert!(changed);
        assert_eq!(
            code,
            [Instruction::op(Operator::Mul, "z", var("y"), Some(num(6.0)))]
        );
    }

    #[test]
    fn unused_pure_results_are_dropped() {
        let code = vec![
            Instruction::native(
                Opcode::Read,
                vec![
                    Param::Out("__t0".into()),
                    Param::In(var("cell1")),
                    Param::In(num(0.0)),
                ],
            ),
            Instruction::native(Opcode::End, vec![]),
        ];
        let (code, changed) = run(code);
        assert!(changed);
        assert_eq!(code, [Instruction::native(Opcode::End, vec![])]);
    }

    #[test]
    fn user_variables_are_kept() {
        let code = vec![
            Instruction::set("a", num(1.0)),
            Instruction::set("b", var("a")),
        ];
        let (result, changed) = run(code.clone());
        assert!(!changed);
        assert_eq!(result, code);
    }

    #[test]
    fn counter_is_never_forwarded() {
        let code = vec![
            Instruction::set("__t0", var(COUNTER)),
            Instruction::native(Opcode::Print, vec![Param::In(var("y"))]),
            Instruction::set("x", var("__t0")),
        ];
        let (result, _) = run(code.clone());
        assert_eq!(result, code);
    }
}
