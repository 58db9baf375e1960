//! Removes instructions that cannot be reached from the first line.

use std::collections::HashMap;

use crate::instruction::{Instruction, Label};

fn reachable(code: &[Instruction]) -> Vec<bool> {
    let labels: HashMap<&Label, usize> = code
        .iter()
        .enumerate()
        .filter_map(|(idx, i)| match i {
            Instruction::Label(label) => Some((label, idx)),
            _ => None,
        })
        .collect();

    let mut live = vec![false; code.len()];
    let mut stack = vec![0];
    while let Some(idx) = stack.pop() {
        if idx >= code.len() || live[idx] {
            continue;
        }
        live[idx] = true;
        let instruction = &code[idx];
        if let Some(&target) = instruction.target().and_then(|t| labels.get(t)) {
            stack.push(target);
        }
        // A call returns to the line after its trampoline jump.
        let returns_here = idx > 0 && code[idx - 1].is_call_setup();
        if !instruction.is_terminator() || returns_here {
            stack.push(idx + 1);
        }
    }
    live
}

pub fn run(code: Vec<Instruction>) -> (Vec<Instruction>, bool) {
    let live = reachable(&code);
    let before = code.len();
    let code: Vec<_> = code
        .into_iter()
        .zip(live)
        .filter_map(|(i, live)| live.then_some(i))
        .collect();
    let changed = code.len() != before;
    (code, changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Opcode, Operand, Operator, Param, COUNTER};

    fn print(n: f64) -> Instruction {
        Instruction::native(Opcode::Print, vec![Param::In(Operand::Number(n))])
    }

    #[test]
    fn code_after_terminators_is_dropped() {
        let code = vec![
            print(1.0),
            Instruction::Jump(Label("end".into())),
            print(2.0),
            Instruction::Label(Label("dead".into())),
            print(3.0),
            Instruction::Label(Label("end".into())),
            Instruction::native(Opcode::End, vec![]),
            print(4.0),
        ];
        let (code, changed) = run(code);
        assert!(changed);
        assert_eq!(
            code,
            [
                print(1.0),
                Instruction::Jump(Label("end".into())),
                Instruction::Label(Label("end".into())),
                Instruction::native(Opcode::End, vec![]),
            ]
        );
    }

    #[test]
    fn call_continuations_stay() {
        let code = vec![
            Instruction::op(
                Operator::Add,
                "__f_f_ret",
                Operand::var(COUNTER),
                Some(Operand::Number(1.0)),
            ),
            Instruction::Jump(Label("__f_f".into())),
            print(1.0),
            Instruction::native(Opcode::End, vec![]),
            Instruction::Label(Label("__f_f".into())),
            Instruction::set(COUNTER, Operand::var("__f_f_ret")),
        ];
        let (result, changed) = run(code.clone());
        assert!(!changed);
        assert_eq!(result, code);
    }

    #[test]
    fn empty_programs_are_fine() {
        assert_eq!(run(vec![]), (vec![], false));
    }
}
