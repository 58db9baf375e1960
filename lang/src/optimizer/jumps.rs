//! Jump threading and static resolution of jumps.

use std::collections::HashMap;

use crate::instruction::{Instruction, Label};

/// Bound on how many chained jumps are followed.
const MAX_HOPS: usize = 16;

fn label_positions(code: &[Instruction]) -> HashMap<Label, usize> {
    code.iter()
        .enumerate()
        .filter_map(|(idx, i)| match i {
            Instruction::Label(label) => Some((label.clone(), idx)),
            _ => None,
        })
        .collect()
}

/// The first instruction at or after `idx` that is not a label or a noop.
fn next_effective(code: &[Instruction], idx: usize) -> Option<&Instruction> {
    code[idx..]
        .iter()
        .find(|i| !matches!(i, Instruction::Label(_) | Instruction::Noop))
}

/// Follows unconditional jumps starting at `label`.
fn final_target(code: &[Instruction], labels: &HashMap<Label, usize>, label: &Label) -> Label {
    let mut current = label.clone();
    for _ in 0..MAX_HOPS {
        let Some(&pos) = labels.get(&current) else {
            break;
        };
        match next_effective(code, pos) {
            Some(Instruction::Jump(next)) if *next != current => current = next.clone(),
            _ => break,
        }
    }
    current
}

/// Whether `label` is reached from `idx` by falling through labels and noops.
fn falls_into(code: &[Instruction], idx: usize, label: &Label) -> bool {
    code[idx + 1..]
        .iter()
        .take_while(|i| matches!(i, Instruction::Label(_) | Instruction::Noop))
        .any(|i| matches!(i, Instruction::Label(l) if l == label))
}

pub fn run(mut code: Vec<Instruction>) -> (Vec<Instruction>, bool) {
    let labels = label_positions(&code);
    let mut changed = false;

    for idx in 0..code.len() {
        let Some(target) = code[idx].target() else {
            continue;
        };
        let threaded = final_target(&code, &labels, target);
        if threaded != *target {
            if let Some(target) = code[idx].target_mut() {
                *target = threaded;
            }
            changed = true;
        }

        if let Instruction::JumpIf {
            target,
            condition,
            lhs,
            rhs,
        } = &code[idx]
        {
            if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
                if let Some(taken) = condition.fold(a, b) {
                    code[idx] = if taken {
                        Instruction::Jump(target.clone())
                    } else {
                        Instruction::Noop
                    };
                    changed = true;
                }
            }
        }

        let trampoline = idx > 0 && code[idx - 1].is_call_setup();
        if let Some(target) = code[idx].target() {
            if !trampoline && falls_into(&code, idx, target) {
                code[idx] = Instruction::Noop;
                changed = true;
            }
        }
    }
    (code, changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Condition, Operand, Operator, COUNTER};

    fn label(name: &str) -> Label {
        Label(name.to_owned())
    }

    fn print(name: &str) -> Instruction {
        Instruction::native(
            crate::instruction::Opcode::Print,
            vec![crate::instruction::Param::In(Operand::var(name))],
        )
    }

    #[test]
    fn chains_are_threaded() {
        let code = vec![
            Instruction::Jump(label("a")),
            print("x"),
            Instruction::Label(label("a")),
            Instruction::Noop,
            Instruction::Jump(label("b")),
            print("y"),
            Instruction::Label(label("b")),
            print("z"),
        ];
        let (code, changed) = run(code);
        assert!(changed);
        assert_eq!(code[0], Instruction::Jump(label("b")));
    }

    #[test]
    fn cycles_terminate() {
        let code = vec![
            Instruction::Label(label("a")),
            Instruction::Jump(label("b")),
            Instruction::Label(label("b")),
            Instruction::Jump(label("a")),
        ];
        let _ = run(code);
    }

    #[test]
    fn literal_conditions_resolve() {
        let code = vec![
            Instruction::JumpIf {
                target: label("end"),
                condition: Condition::LessThan,
                lhs: Operand::Number(1.0),
                rhs: Operand::Number(2.0),
            },
            Instruction::JumpIf {
                target: label("end"),
                condition: Condition::GreaterThan,
                lhs: Operand::Number(1.0),
                rhs: Operand::Number(2.0),
            },
            Instruction::JumpIf {
                target: label("end"),
                condition: Condition::Equal,
                lhs: Operand::Number(1.0),
                rhs: Operand::Number(1.0),
            },
            print("x"),
            Instruction::Label(label("end")),
        ];
        let (code, changed) = run(code);
        assert!(changed);
        assert_eq!(code[0], Instruction::Jump(label("end")));
        assert_eq!(code[1], Instruction::Noop);
        assert!(matches!(code[2], Instruction::JumpIf { .. }));
    }

    #[test]
    fn jumps_to_the_next_line_vanish() {
        let code = vec![
            Instruction::Jump(label("next")),
            Instruction::Label(label("next")),
            print("x"),
        ];
        let (code, _) = run(code);
        assert_eq!(code[0], Instruction::Noop);
    }

    #[test]
    fn trampolines_stay() {
        let code = vec![
            Instruction::op(
                Operator::Add,
                "__f_f_ret",
                Operand::var(COUNTER),
                Some(Operand::Number(1.0)),
            ),
            Instruction::Jump(label("__f_f")),
            Instruction::Label(label("__f_f")),
            Instruction::set(COUNTER, Operand::var("__f_f_ret")),
        ];
        let (result, changed) = run(code.clone());
        assert!(!changed);
        assert_eq!(result, code);
    }
}
