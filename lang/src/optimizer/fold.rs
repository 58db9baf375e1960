//! Constant folding of `op` instructions over numeric literals.

use crate::instruction::{Instruction, Operand};

pub fn run(code: Vec<Instruction>) -> (Vec<Instruction>, bool) {
    let mut changed = false;
    let code = code
        .into_iter()
        .map(|instruction| match fold(&instruction) {
            Some(folded) => {
                changed = true;
                folded
            }
            None => instruction,
        })
        .collect();
    (code, changed)
}

fn fold(instruction: &Instruction) -> Option<Instruction> {
    let (op, result, a, b) = instruction.as_native()?.as_op()?;
    let a = a.as_number()?;
    let b = match b {
        Some(b) => b.as_number()?,
        None if op.is_unary() => 0.0,
        None => return None,
    };
    let value = op.fold(a, b)?;
    Some(Instruction::set(result, Operand::Number(value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Operator;

    fn op(operator: Operator, a: f64, b: Option<f64>) -> Instruction {
        Instruction::op(operator, "r", Operand::Number(a), b.map(Operand::Number))
    }

    #[test]
    fn literal_operations_become_sets() {
        let (code, changed) = run(vec![
            op(Operator::Add, 2.0, Some(3.0)),
            op(Operator::Floor, 2.5, None),
            op(Operator::Shl, 1.0, Some(3.0)),
        ]);
        assert!(changed);
        let rendered: Vec<_> = code.iter().map(|i| i.to_string()).collect();
        assert_eq!(rendered, ["set r 5", "set r 2", "set r 8"]);
    }

    #[test]
    fn unfoldable_operations_stay() {
        let code = vec![
            op(Operator::Equal, 1.0, Some(1.0)),
            op(Operator::Div, 1.0, Some(0.0)),
            op(Operator::Rand, 10.0, None),
            Instruction::op(Operator::Add, "r", Operand::var("x"), Some(Operand::Number(1.0))),
        ];
        let (result, changed) = run(code.clone());
        assert!(!changed);
        assert_eq!(result, code);
    }

    fn folded(operator: Operator, a: f64, b: Option<f64>) -> f64 {
        let (code, changed) = run(vec![op(operator, a, b)]);
        assert!(changed, "{:?} {} {:?} did not fold", operator, a, b);
        let (_, value) = code[0].as_native().and_then(|n| n.as_set()).unwrap();
        value.as_number().unwrap()
    }

    #[test]
    fn folded_values() {
        let cases = [
            (Operator::Add, 2.0, Some(3.0), 5.0),
            (Operator::Sub, 2.0, Some(5.0), -3.0),
            (Operator::Mul, -3.0, Some(4.0), -12.0),
            (Operator::Div, 7.0, Some(2.0), 3.5),
            (Operator::Idiv, 7.0, Some(2.0), 3.0),
            (Operator::Idiv, -7.0, Some(2.0), -4.0),
            (Operator::Mod, -7.0, Some(3.0), -1.0),
            (Operator::Mod, 7.0, Some(-3.0), 1.0),
            (Operator::Pow, 2.0, Some(10.0), 1024.0),
            (Operator::Pow, 0.0, Some(0.0), 1.0),
            (Operator::Land, 3.0, Some(0.0), 0.0),
            (Operator::Land, 3.0, Some(-2.0), 1.0),
            (Operator::LessThan, 1.0, Some(2.0), 1.0),
            (Operator::LessThanEq, 2.0, Some(2.0), 1.0),
            (Operator::GreaterThan, 1.0, Some(2.0), 0.0),
            (Operator::GreaterThanEq, 2.0, Some(3.0), 0.0),
            (Operator::StrictEqual, 2.0, Some(2.0), 1.0),
            (Operator::StrictEqual, 2.0, Some(2.0000001), 0.0),
            (Operator::Shl, 1.0, Some(4.0), 16.0),
            (Operator::Shl, 1.0, Some(-1.0), -9223372036854775808.0),
            (Operator::Shr, -8.0, Some(1.0), -4.0),
            (Operator::Shr, 8.0, Some(-1.0), 0.0),
            (Operator::Or, 2.9, Some(4.0), 6.0),
            (Operator::And, 6.0, Some(3.0), 2.0),
            (Operator::Xor, 6.0, Some(3.0), 5.0),
            (Operator::Not, 5.0, None, -6.0),
            (Operator::Max, 3.0, Some(-1.0), 3.0),
            (Operator::Min, 3.0, Some(-1.0), -1.0),
            (Operator::Angle, 0.0, Some(1.0), 90.0),
            (Operator::Angle, 0.0, Some(-1.0), 270.0),
            (Operator::Len, 3.0, Some(4.0), 5.0),
            (Operator::Abs, -2.5, None, 2.5),
            (Operator::Log, 1.0, None, 0.0),
            (Operator::Log10, 1000.0, None, 3.0),
            (Operator::Floor, -2.5, None, -3.0),
            (Operator::Ceil, -2.5, None, -2.0),
            (Operator::Sqrt, 16.0, None, 4.0),
            (Operator::Sin, 90.0, None, 1.0),
            (Operator::Cos, 180.0, None, -1.0),
            (Operator::Tan, 45.0, None, 1.0),
            (Operator::Asin, 1.0, None, 90.0),
            (Operator::Acos, 1.0, None, 0.0),
            (Operator::Atan, 1.0, None, 45.0),
        ];
        for (operator, a, b, expected) in cases {
            let value = folded(operator, a, b);
            assert!(
                (value - expected).abs() <= 1e-9 * expected.abs().max(1.0),
                "{:?} {} {:?} gave {}, expected {}",
                operator,
                a,
                b,
                value,
                expected
            );
        }
        for operator in Operator::ALL.iter().filter(|o| o.is_foldable()) {
            assert!(
                cases.iter().any(|(o, ..)| o == operator),
                "no case for {:?}",
                operator
            );
        }
    }

    #[test]
    fn non_finite_results_stay() {
        let code = vec![
            op(Operator::Sqrt, -1.0, None),
            op(Operator::Log, 0.0, None),
            op(Operator::Pow, 10.0, Some(400.0)),
        ];
        let (result, changed) = run(code.clone());
        assert!(!changed);
        assert_eq!(result, code);
    }
}
