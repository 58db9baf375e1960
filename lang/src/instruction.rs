//! Symbolic instructions shared by the generator, optimizer and linker.
//!
//! Native instructions carry the kind of every parameter slot, so passes can
//! tell inputs, outputs and configuration words apart without parsing text.

use std::fmt::Display;

use itertools::Itertools;

/// Name of the variable holding the program counter.
pub const COUNTER: &str = "@counter";

/// Prefix of compiler-synthesized variables and labels.
pub const TEMP_PREFIX: &str = "__t";

pub fn is_temporary(name: &str) -> bool {
    name.strip_prefix(TEMP_PREFIX)
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// Renders a number the way the VM prints it back.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

macro_rules! opcodes {
    {
        $(($ident:ident, $name:literal, $arity:literal),)*
    } => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($ident,)*
        }

        impl Opcode {
            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$ident => $name,)*
                }
            }

            pub fn arity(self) -> usize {
                match self {
                    $(Opcode::$ident => $arity,)*
                }
            }
        }
    };
}

opcodes! {
    (Read, "read", 3),
    (Write, "write", 3),
    (Draw, "draw", 7),
    (Print, "print", 1),
    (DrawFlush, "drawflush", 1),
    (PrintFlush, "printflush", 1),
    (GetLink, "getlink", 2),
    (Control, "control", 6),
    (Radar, "radar", 7),
    (Sensor, "sensor", 3),
    (Set, "set", 2),
    (Op, "op", 4),
    (Lookup, "lookup", 3),
    (PackColor, "packcolor", 5),
    (Wait, "wait", 1),
    (Stop, "stop", 0),
    (End, "end", 0),
    (UBind, "ubind", 1),
    (UControl, "ucontrol", 6),
    (URadar, "uradar", 7),
    (ULocate, "ulocate", 8),
}

impl Opcode {
    /// Instructions whose only effect is writing their outputs.
    pub fn is_pure(self) -> bool {
        matches!(
            self,
            Opcode::Set
                | Opcode::Op
                | Opcode::Sensor
                | Opcode::Read
                | Opcode::Lookup
                | Opcode::PackColor
                | Opcode::GetLink
        )
    }
}

macro_rules! operators {
    {
        $(($ident:ident, $name:literal, $unary:literal),)*
    } => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Operator {
            $($ident,)*
        }

        impl Operator {
            pub const ALL: &'static [Operator] = &[
                $(Operator::$ident,)*
            ];

            pub fn name(self) -> &'static str {
                match self {
                    $(Operator::$ident => $name,)*
                }
            }

            pub fn is_unary(self) -> bool {
                match self {
                    $(Operator::$ident => $unary,)*
                }
            }
        }
    };
}

operators! {
    (Add, "add", false),
    (Sub, "sub", false),
    (Mul, "mul", false),
    (Div, "div", false),
    (Idiv, "idiv", false),
    (Mod, "mod", false),
    (Pow, "pow", false),
    (Equal, "equal", false),
    (NotEqual, "notEqual", false),
    (Land, "land", false),
    (LessThan, "lessThan", false),
    (LessThanEq, "lessThanEq", false),
    (GreaterThan, "greaterThan", false),
    (GreaterThanEq, "greaterThanEq", false),
    (StrictEqual, "strictEqual", false),
    (Shl, "shl", false),
    (Shr, "shr", false),
    (Or, "or", false),
    (And, "and", false),
    (Xor, "xor", false),
    (Not, "not", true),
    (Max, "max", false),
    (Min, "min", false),
    (Angle, "angle", false),
    (Len, "len", false),
    (Noise, "noise", false),
    (Abs, "abs", true),
    (Log, "log", true),
    (Log10, "log10", true),
    (Floor, "floor", true),
    (Ceil, "ceil", true),
    (Sqrt, "sqrt", true),
    (Rand, "rand", true),
    (Sin, "sin", true),
    (Cos, "cos", true),
    (Tan, "tan", true),
    (Asin, "asin", true),
    (Acos, "acos", true),
    (Atan, "atan", true),
}

fn truth(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

impl Operator {
    pub fn from_name(name: &str) -> Option<Operator> {
        Operator::ALL.iter().copied().find(|o| o.name() == name)
    }

    /// Whether the result on two numeric literals can be computed ahead of
    /// time. The coercing equality operators compare mixed types at runtime
    /// and always stay as instructions.
    pub fn is_foldable(self) -> bool {
        !matches!(
            self,
            Operator::Equal | Operator::NotEqual | Operator::Rand | Operator::Noise
        )
    }

    /// Numeric semantics of the VM. `None` for operators that are not a pure
    /// function of their operands.
    pub fn eval(self, a: f64, b: f64) -> Option<f64> {
        let long = |x: f64| x as i64;
        let value = match self {
            Operator::Add => a + b,
            Operator::Sub => a - b,
            Operator::Mul => a * b,
            Operator::Div => a / b,
            Operator::Idiv => (a / b).floor(),
            Operator::Mod => a % b,
            Operator::Pow => a.powf(b),
            Operator::Equal => truth((a - b).abs() < 0.000001),
            Operator::NotEqual => truth((a - b).abs() >= 0.000001),
            Operator::Land => truth(a != 0.0 && b != 0.0),
            Operator::LessThan => truth(a < b),
            Operator::LessThanEq => truth(a <= b),
            Operator::GreaterThan => truth(a > b),
            Operator::GreaterThanEq => truth(a >= b),
            Operator::StrictEqual => truth(a == b),
            Operator::Shl => long(a).wrapping_shl(long(b) as u32) as f64,
            Operator::Shr => long(a).wrapping_shr(long(b) as u32) as f64,
            Operator::Or => (long(a) | long(b)) as f64,
            Operator::And => (long(a) & long(b)) as f64,
            Operator::Xor => (long(a) ^ long(b)) as f64,
            Operator::Not => !long(a) as f64,
            Operator::Max => a.max(b),
            Operator::Min => a.min(b),
            Operator::Angle => {
                let angle = b.atan2(a).to_degrees();
                if angle < 0.0 {
                    angle + 360.0
                } else {
                    angle
                }
            }
            Operator::Len => a.hypot(b),
            Operator::Abs => a.abs(),
            Operator::Log => a.ln(),
            Operator::Log10 => a.log10(),
            Operator::Floor => a.floor(),
            Operator::Ceil => a.ceil(),
            Operator::Sqrt => a.sqrt(),
            Operator::Sin => a.to_radians().sin(),
            Operator::Cos => a.to_radians().cos(),
            Operator::Tan => a.to_radians().tan(),
            Operator::Asin => a.asin().to_degrees(),
            Operator::Acos => a.acos().to_degrees(),
            Operator::Atan => a.atan().to_degrees(),
            Operator::Rand | Operator::Noise => return None,
        };
        Some(value)
    }

    /// Compile-time evaluation: foldable operators with a finite result.
    pub fn fold(self, a: f64, b: f64) -> Option<f64> {
        if !self.is_foldable() {
            return None;
        }
        self.eval(a, b).filter(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Equal,
    NotEqual,
    LessThan,
    LessThanEq,
    GreaterThan,
    GreaterThanEq,
    StrictEqual,
    Always,
}

impl Condition {
    pub const ALL: &'static [Condition] = &[
        Condition::Equal,
        Condition::NotEqual,
        Condition::LessThan,
        Condition::LessThanEq,
        Condition::GreaterThan,
        Condition::GreaterThanEq,
        Condition::StrictEqual,
        Condition::Always,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Condition::Always => "always",
            _ => self.as_operator().map(Operator::name).unwrap_or_default(),
        }
    }

    pub fn from_name(name: &str) -> Option<Condition> {
        Condition::ALL.iter().copied().find(|c| c.name() == name)
    }

    pub fn as_operator(self) -> Option<Operator> {
        Some(match self {
            Condition::Equal => Operator::Equal,
            Condition::NotEqual => Operator::NotEqual,
            Condition::LessThan => Operator::LessThan,
            Condition::LessThanEq => Operator::LessThanEq,
            Condition::GreaterThan => Operator::GreaterThan,
            Condition::GreaterThanEq => Operator::GreaterThanEq,
            Condition::StrictEqual => Operator::StrictEqual,
            Condition::Always => return None,
        })
    }

    pub fn from_operator(op: Operator) -> Option<Condition> {
        Condition::ALL
            .iter()
            .copied()
            .find(|c| c.as_operator() == Some(op))
    }

    /// The condition that holds exactly when `self` does not.
    pub fn negate(self) -> Option<Condition> {
        Some(match self {
            Condition::Equal => Condition::NotEqual,
            Condition::NotEqual => Condition::Equal,
            Condition::LessThan => Condition::GreaterThanEq,
            Condition::LessThanEq => Condition::GreaterThan,
            Condition::GreaterThan => Condition::LessThanEq,
            Condition::GreaterThanEq => Condition::LessThan,
            Condition::StrictEqual | Condition::Always => return None,
        })
    }

    /// Static outcome on two numeric literals, if the condition is foldable.
    pub fn fold(self, a: f64, b: f64) -> Option<bool> {
        match self.as_operator() {
            None => Some(true),
            Some(op) => op.fold(a, b).map(|v| v != 0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Number(f64),
    String(String),
    Null,
    Variable(String),
}

impl Operand {
    pub fn var(name: impl Into<String>) -> Operand {
        Operand::Variable(name.into())
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Operand::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_variable(&self) -> Option<&str> {
        match self {
            Operand::Variable(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_variable(&self, name: &str) -> bool {
        self.as_variable() == Some(name)
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Number(n) => write!(f, "{}", format_number(*n)),
            Operand::String(s) => write!(f, "\"{}\"", s),
            Operand::Null => write!(f, "null"),
            Operand::Variable(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    In(Operand),
    Out(String),
    Config(String),
    Unused,
}

impl Display for Param {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Param::In(operand) => write!(f, "{}", operand),
            Param::Out(name) | Param::Config(name) => write!(f, "{}", name),
            Param::Unused => write!(f, "_"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Native {
    pub opcode: Opcode,
    pub params: Vec<Param>,
}

impl Native {
    /// Pads `params` with unused slots up to the opcode's arity.
    pub fn new(opcode: Opcode, mut params: Vec<Param>) -> Self {
        debug_assert!(params.len() <= opcode.arity());
        params.resize(opcode.arity(), Param::Unused);
        Self { opcode, params }
    }

    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.params.iter().filter_map(|p| match p {
            Param::Out(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn inputs(&self) -> impl Iterator<Item = &Operand> {
        self.params.iter().filter_map(|p| match p {
            Param::In(operand) => Some(operand),
            _ => None,
        })
    }

    pub fn as_set(&self) -> Option<(&str, &Operand)> {
        match (self.opcode, self.params.as_slice()) {
            (Opcode::Set, [Param::Out(name), Param::In(value)]) => Some((name, value)),
            _ => None,
        }
    }

    pub fn as_op(&self) -> Option<(Operator, &str, &Operand, Option<&Operand>)> {
        let (Opcode::Op, [Param::Config(op), Param::Out(result), Param::In(a), b]) =
            (self.opcode, self.params.as_slice())
        else {
            return None;
        };
        let op = Operator::from_name(op)?;
        let b = match b {
            Param::In(b) => Some(b),
            _ => None,
        };
        Some((op, result, a, b))
    }
}

impl Display for Native {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.params.is_empty() {
            write!(f, "{}", self.opcode.name())
        } else {
            write!(f, "{} {}", self.opcode.name(), self.params.iter().join(" "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub String);

impl Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Native(Native),
    Label(Label),
    Jump(Label),
    JumpIf {
        target: Label,
        condition: Condition,
        lhs: Operand,
        rhs: Operand,
    },
    Noop,
}

impl Instruction {
    pub fn native(opcode: Opcode, params: Vec<Param>) -> Instruction {
        Instruction::Native(Native::new(opcode, params))
    }

    pub fn set(name: impl Into<String>, value: Operand) -> Instruction {
        Instruction::native(Opcode::Set, vec![Param::Out(name.into()), Param::In(value)])
    }

    pub fn op(operator: Operator, result: impl Into<String>, a: Operand, b: Option<Operand>) -> Instruction {
        Instruction::native(
            Opcode::Op,
            vec![
                Param::Config(operator.name().to_owned()),
                Param::Out(result.into()),
                Param::In(a),
                b.map_or(Param::Unused, Param::In),
            ],
        )
    }

    pub fn as_native(&self) -> Option<&Native> {
        match self {
            Instruction::Native(native) => Some(native),
            _ => None,
        }
    }

    /// Every operand the instruction reads.
    pub fn inputs(&self) -> Vec<&Operand> {
        match self {
            Instruction::Native(native) => native.inputs().collect(),
            Instruction::JumpIf { lhs, rhs, .. } => vec![lhs, rhs],
            _ => vec![],
        }
    }

    pub fn inputs_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Instruction::Native(native) => native
                .params
                .iter_mut()
                .filter_map(|p| match p {
                    Param::In(operand) => Some(operand),
                    _ => None,
                })
                .collect(),
            Instruction::JumpIf { lhs, rhs, .. } => vec![lhs, rhs],
            _ => vec![],
        }
    }

    pub fn reads(&self, name: &str) -> bool {
        self.inputs().iter().any(|o| o.is_variable(name))
    }

    pub fn writes(&self, name: &str) -> bool {
        self.as_native()
            .is_some_and(|native| native.outputs().any(|o| o == name))
    }

    /// `op add <fn>_ret @counter 1`: stores the return address of a call
    /// whose jump follows on the next line.
    pub fn is_call_setup(&self) -> bool {
        let Some((Operator::Add, result, a, Some(b))) = self.as_native().and_then(Native::as_op)
        else {
            return false;
        };
        result.ends_with("_ret") && a.is_variable(COUNTER) && b.as_number() == Some(1.0)
    }

    /// Whether execution never falls through to the next instruction.
    pub fn is_terminator(&self) -> bool {
        match self {
            Instruction::Jump(_) => true,
            Instruction::Native(native) => {
                matches!(native.opcode, Opcode::End | Opcode::Stop) || native.outputs().any(|o| o == COUNTER)
            }
            _ => false,
        }
    }

    pub fn target(&self) -> Option<&Label> {
        match self {
            Instruction::Jump(target) | Instruction::JumpIf { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn target_mut(&mut self) -> Option<&mut Label> {
        match self {
            Instruction::Jump(target) | Instruction::JumpIf { target, .. } => Some(target),
            _ => None,
        }
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instruction::Native(native) => write!(f, "{}", native),
            Instruction::Label(label) => write!(f, "{}:", label),
            Instruction::Jump(target) => write!(f, "jump {} always _ _", target),
            Instruction::JumpIf {
                target,
                condition,
                lhs,
                rhs,
            } => write!(f, "jump {} {} {} {}", target, condition.name(), lhs, rhs),
            Instruction::Noop => write!(f, "noop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natives_are_padded_to_arity() {
        let print = Instruction::native(Opcode::Print, vec![Param::In(Operand::var("x"))]);
        assert_eq!(print.to_string(), "print x");
        let abs = Instruction::op(Operator::Abs, "r", Operand::Number(-2.0), None);
        assert_eq!(abs.to_string(), "op abs r -2 _");
        let control = Instruction::native(
            Opcode::Control,
            vec![
                Param::Config("enabled".into()),
                Param::In(Operand::var("switch1")),
                Param::In(Operand::Number(0.0)),
            ],
        );
        assert_eq!(control.to_string(), "control enabled switch1 0 _ _ _");
        assert_eq!(Instruction::native(Opcode::End, vec![]).to_string(), "end");
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.5), "-0.5");
        assert_eq!(format_number(1e20), "100000000000000000000");
        assert_eq!(Operand::String("hi".into()).to_string(), "\"hi\"");
    }

    #[test]
    fn equality_is_never_folded() {
        assert_eq!(Operator::Equal.fold(1.0, 1.0), None);
        assert_eq!(Operator::NotEqual.fold(1.0, 2.0), None);
        assert_eq!(Operator::StrictEqual.fold(1.0, 1.0), Some(1.0));
        assert_eq!(Condition::Equal.fold(1.0, 1.0), None);
        assert_eq!(Condition::LessThan.fold(1.0, 2.0), Some(true));
    }

    #[test]
    fn operator_semantics() {
        assert_eq!(Operator::Idiv.eval(7.0, 2.0), Some(3.0));
        assert_eq!(Operator::Idiv.eval(-7.0, 2.0), Some(-4.0));
        assert_eq!(Operator::Mod.eval(-7.0, 3.0), Some(-1.0));
        assert_eq!(Operator::Shl.eval(1.0, 4.0), Some(16.0));
        assert_eq!(Operator::Not.eval(0.0, 0.0), Some(-1.0));
        let angle = Operator::Angle.eval(0.0, -1.0).unwrap();
        assert!((angle - 270.0).abs() < 1e-9);
        assert_eq!(Operator::Div.fold(1.0, 0.0), None);
        assert_eq!(Operator::Rand.fold(1.0, 0.0), None);
    }

    #[test]
    fn call_setup_is_recognized() {
        let setup = Instruction::op(
            Operator::Add,
            "__f_foo_ret",
            Operand::var(COUNTER),
            Some(Operand::Number(1.0)),
        );
        assert!(setup.is_call_setup());
        let other = Instruction::op(Operator::Add, "x", Operand::var(COUNTER), Some(Operand::Number(1.0)));
        assert!(!other.is_call_setup());
    }

    #[test]
    fn counter_writes_terminate_blocks() {
        assert!(Instruction::set(COUNTER, Operand::var("__f_f_ret")).is_terminator());
        assert!(Instruction::Jump(Label("l".into())).is_terminator());
        assert!(!Instruction::set("x", Operand::Number(1.0)).is_terminator());
    }

    #[test]
    fn temporaries() {
        assert!(is_temporary("__t0"));
        assert!(is_temporary("__t12"));
        assert!(!is_temporary("__t"));
        assert!(!is_temporary("__f_foo_ret"));
        assert!(!is_temporary("x"));
    }
}
