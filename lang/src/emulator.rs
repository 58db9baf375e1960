//! A small mlog interpreter for checking compiled programs.
//!
//! Only the instructions a processor needs on its own are modelled: data
//! movement, arithmetic, jumps, memory cells and message blocks. Anything
//! touching units or the world reports [`ErrorKind::Unsupported`].

use std::collections::BTreeMap;
use std::fmt::Display;

use tracing::debug;

use crate::instruction::{format_number, Condition, Operator, COUNTER};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Num(f64),
    Str(String),
    Null,
    /// A linked block, by link name.
    Device(String),
}

impl Value {
    /// Numeric view: objects are truthy, `null` is zero.
    pub fn num(&self) -> f64 {
        match self {
            Value::Num(n) => *n,
            Value::Null => 0.0,
            Value::Str(_) | Value::Device(_) => 1.0,
        }
    }

    fn is_object(&self) -> bool {
        !matches!(self, Value::Num(_))
    }

    fn loosely_equals(&self, other: &Value) -> bool {
        if self.is_object() && other.is_object() {
            self == other
        } else {
            (self.num() - other.num()).abs() < 0.000001
        }
    }

    fn strictly_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Num(a), Value::Num(b)) => a == b,
            _ => self == other,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Num(n) => write!(f, "{}", format_number(*n)),
            Value::Str(s) => write!(f, "{}", s),
            Value::Null => write!(f, "null"),
            Value::Device(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Device {
    Memory(Vec<f64>),
    Message(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    #[error("cannot parse {0:?}")]
    Parse(String),
    #[error("{0} is not supported")]
    Unsupported(String),
    #[error("{0:?} is not a device")]
    NotADevice(String),
    #[error("step limit of {0} exceeded")]
    StepLimit(usize),
}

#[derive(Debug, thiserror::Error)]
#[error("at line {line}: {kind}")]
pub struct Error {
    pub line: usize,
    pub kind: ErrorKind,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Linked blocks in link order.
    pub devices: Vec<(String, Device)>,
    pub step_limit: usize,
    /// Stop on a transfer to line 0, which is where linked programs jump
    /// once they are done.
    pub halt_on_wrap: bool,
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            devices: vec![],
            step_limit: 100_000,
            halt_on_wrap: true,
            seed: 0x2545_f491_4f6c_dd1d,
        }
    }
}

impl Config {
    pub fn memory(mut self, name: impl Into<String>, size: usize) -> Self {
        self.devices.push((name.into(), Device::Memory(vec![0.0; size])));
        self
    }

    pub fn message(mut self, name: impl Into<String>) -> Self {
        self.devices.push((name.into(), Device::Message(String::new())));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub variables: BTreeMap<String, Value>,
    /// Everything printed, whether flushed or not.
    pub printed: String,
    pub devices: Vec<(String, Device)>,
    pub steps: usize,
}

impl Outcome {
    /// Variables written by the program itself, without compiler internals.
    pub fn user_variables(&self) -> BTreeMap<&str, &Value> {
        self.variables
            .iter()
            .filter(|(name, _)| !name.starts_with("__"))
            .map(|(name, value)| (name.as_str(), value))
            .collect()
    }

    pub fn message(&self, name: &str) -> Option<&str> {
        self.devices.iter().find_map(|(n, d)| match d {
            Device::Message(text) if n == name => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn memory(&self, name: &str) -> Option<&[f64]> {
        self.devices.iter().find_map(|(n, d)| match d {
            Device::Memory(cells) if n == name => Some(cells.as_slice()),
            _ => None,
        })
    }
}

enum Flow {
    Next,
    Jump(usize),
    Halt,
}

struct Machine {
    variables: BTreeMap<String, Value>,
    devices: Vec<(String, Device)>,
    buffer: String,
    printed: String,
    seed: u64,
    pc: usize,
    transfer: Option<usize>,
}

pub fn run(program: &str, config: &Config) -> Result<Outcome, Error> {
    let lines = program
        .lines()
        .enumerate()
        .map(|(line, text)| {
            tokenize(text).ok_or_else(|| Error {
                line,
                kind: ErrorKind::Parse(text.to_owned()),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut machine = Machine {
        variables: BTreeMap::new(),
        devices: config.devices.clone(),
        buffer: String::new(),
        printed: String::new(),
        seed: config.seed.max(1),
        pc: 0,
        transfer: None,
    };

    let mut steps = 0;
    while machine.pc < lines.len() {
        if steps == config.step_limit {
            return Err(Error {
                line: machine.pc,
                kind: ErrorKind::StepLimit(config.step_limit),
            });
        }
        steps += 1;
        let flow = machine.step(&lines[machine.pc]).map_err(|kind| Error {
            line: machine.pc,
            kind,
        })?;
        match flow {
            Flow::Next => machine.pc += 1,
            Flow::Jump(0) if config.halt_on_wrap => break,
            Flow::Jump(target) => machine.pc = target,
            Flow::Halt => break,
        }
    }
    debug!(steps, "emulation finished");

    Ok(Outcome {
        variables: machine.variables,
        printed: machine.printed,
        devices: machine.devices,
        steps,
    })
}

/// Splits a line into words, keeping quoted strings whole. `None` on an
/// unterminated string.
fn tokenize(line: &str) -> Option<Vec<String>> {
    let mut tokens = vec![];
    let mut chars = line.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            break;
        };
        let mut token = String::new();
        if first == '"' {
            token.push(chars.next()?);
            loop {
                let c = chars.next()?;
                token.push(c);
                if c == '"' {
                    break;
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                token.push(c);
            }
        }
        tokens.push(token);
    }
    Some(tokens)
}

fn literal(token: &str) -> Option<Value> {
    match token {
        "null" => Some(Value::Null),
        "true" => Some(Value::Num(1.0)),
        "false" => Some(Value::Num(0.0)),
        _ => {
            if let Some(s) = token.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
                Some(Value::Str(s.to_owned()))
            } else if token.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.') {
                token.parse().ok().map(Value::Num)
            } else {
                None
            }
        }
    }
}

fn compare(condition: Condition, a: &Value, b: &Value) -> bool {
    match condition {
        Condition::Always => true,
        Condition::Equal => a.loosely_equals(b),
        Condition::NotEqual => !a.loosely_equals(b),
        Condition::StrictEqual => a.strictly_equals(b),
        _ => condition
            .as_operator()
            .and_then(|op| op.eval(a.num(), b.num()))
            .is_some_and(|v| v != 0.0),
    }
}

impl Machine {
    fn value(&self, token: &str) -> Value {
        if let Some(value) = literal(token) {
            return value;
        }
        match token {
            COUNTER => Value::Num((self.pc + 1) as f64),
            "@pi" => Value::Num(std::f64::consts::PI),
            "@e" => Value::Num(std::f64::consts::E),
            _ => self
                .variables
                .get(token)
                .cloned()
                .or_else(|| {
                    self.devices
                        .iter()
                        .any(|(name, _)| name == token)
                        .then(|| Value::Device(token.to_owned()))
                })
                .unwrap_or(Value::Null),
        }
    }

    fn assign(&mut self, name: &str, value: Value) {
        if name == COUNTER {
            self.transfer = Some(value.num().max(0.0) as usize);
        } else {
            self.variables.insert(name.to_owned(), value);
        }
    }

    fn device(&mut self, token: &str) -> Result<&mut Device, ErrorKind> {
        let Value::Device(name) = self.value(token) else {
            return Err(ErrorKind::NotADevice(token.to_owned()));
        };
        self.devices
            .iter_mut()
            .find(|(n, _)| *n == name)
            .map(|(_, device)| device)
            .ok_or(ErrorKind::NotADevice(name))
    }

    fn random(&mut self) -> f64 {
        self.seed ^= self.seed << 13;
        self.seed ^= self.seed >> 7;
        self.seed ^= self.seed << 17;
        (self.seed >> 11) as f64 / (1u64 << 53) as f64
    }

    fn operation(&mut self, name: &str, a: &Value, b: &Value) -> Result<Value, ErrorKind> {
        let op = Operator::from_name(name).ok_or_else(|| ErrorKind::Parse(name.to_owned()))?;
        let result = match op {
            Operator::Equal => f64::from(u8::from(a.loosely_equals(b))),
            Operator::NotEqual => f64::from(u8::from(!a.loosely_equals(b))),
            Operator::StrictEqual => f64::from(u8::from(a.strictly_equals(b))),
            Operator::Rand => self.random() * a.num(),
            Operator::Noise => 0.0,
            _ => op.eval(a.num(), b.num()).unwrap_or(f64::NAN),
        };
        Ok(if result.is_finite() {
            Value::Num(result)
        } else {
            Value::Null
        })
    }

    fn step(&mut self, words: &[String]) -> Result<Flow, ErrorKind> {
        let arg = |i: usize| words.get(i).map(String::as_str).unwrap_or("_");
        self.transfer = None;

        match arg(0) {
            "_" | "noop" | "wait" => {}
            "end" | "stop" => return Ok(Flow::Halt),
            "set" => {
                let value = self.value(arg(2));
                self.assign(arg(1), value);
            }
            "op" => {
                let (a, b) = (self.value(arg(3)), self.value(arg(4)));
                let result = self.operation(arg(1), &a, &b)?;
                self.assign(arg(2), result);
            }
            "jump" => {
                let target = arg(1)
                    .parse::<usize>()
                    .map_err(|_| ErrorKind::Parse(words.join(" ")))?;
                let condition =
                    Condition::from_name(arg(2)).ok_or_else(|| ErrorKind::Parse(words.join(" ")))?;
                let (a, b) = (self.value(arg(3)), self.value(arg(4)));
                if compare(condition, &a, &b) {
                    return Ok(Flow::Jump(target));
                }
            }
            "read" => {
                let index = self.value(arg(3)).num();
                let cell = match self.device(arg(2))? {
                    Device::Memory(cells) => cells.get(index as usize).copied(),
                    Device::Message(_) => None,
                };
                if let (Some(cell), true) = (cell, index >= 0.0) {
                    self.assign(arg(1), Value::Num(cell));
                }
            }
            "write" => {
                let value = self.value(arg(1)).num();
                let index = self.value(arg(3)).num();
                if let Device::Memory(cells) = self.device(arg(2))? {
                    if let (Some(cell), true) = (cells.get_mut(index as usize), index >= 0.0) {
                        *cell = value;
                    }
                }
            }
            "print" => {
                let text = self.value(arg(1)).to_string();
                self.buffer.push_str(&text);
                self.printed.push_str(&text);
            }
            "printflush" => {
                let text = std::mem::take(&mut self.buffer);
                if let Device::Message(message) = self.device(arg(1))? {
                    *message = text;
                }
            }
            "getlink" => {
                let index = self.value(arg(2)).num();
                let link = self
                    .devices
                    .get(index as usize)
                    .filter(|_| index >= 0.0)
                    .map_or(Value::Null, |(name, _)| Value::Device(name.clone()));
                self.assign(arg(1), link);
            }
            "sensor" => {
                let property = arg(3).to_owned();
                let value = match (self.device(arg(2))?, property.as_str()) {
                    (Device::Memory(cells), "@memoryCapacity") => Value::Num(cells.len() as f64),
                    (Device::Message(text), "@bufferSize") => Value::Num(text.len() as f64),
                    (_, "@memoryCapacity" | "@bufferSize") => Value::Null,
                    _ => return Err(ErrorKind::Unsupported(format!("sensor {}", property))),
                };
                self.assign(arg(1), value);
            }
            opcode => return Err(ErrorKind::Unsupported(opcode.to_owned())),
        }

        Ok(match self.transfer.take() {
            Some(target) => Flow::Jump(target),
            None => Flow::Next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_default(program: &str) -> Outcome {
        run(program, &Config::default()).unwrap()
    }

    #[test]
    fn while_loop() {
        let outcome = run_default(
            "set x 1\njump 4 greaterThanEq x 3\nop add x x 1\njump 1 always _ _\nprint x\n",
        );
        assert_eq!(outcome.variables["x"], Value::Num(3.0));
        assert_eq!(outcome.printed, "3");
    }

    #[test]
    fn counter_reads_next_line_and_writes_transfer() {
        let outcome = run_default(
            "jump 3 always _ _\n\
             set y 7\n\
             set @counter r\n\
             op add r @counter 1\n\
             jump 1 always _ _\n\
             set done 1\n",
        );
        assert_eq!(outcome.variables["r"], Value::Num(5.0));
        assert_eq!(outcome.variables["y"], Value::Num(7.0));
        assert_eq!(outcome.variables["done"], Value::Num(1.0));
        assert!(!outcome.variables.contains_key(COUNTER));
    }

    #[test]
    fn memory_and_messages() {
        let config = Config::default().memory("cell1", 4).message("message1");
        let outcome = run(
            "write 5 cell1 2\n\
             read a cell1 2\n\
             write 1 cell1 99\n\
             read b cell1 -1\n\
             sensor cap cell1 @memoryCapacity\n\
             getlink l 1\n\
             print \"a is \"\n\
             print a\n\
             printflush l\n\
             print \"rest\"\n",
            &config,
        )
        .unwrap();
        assert_eq!(outcome.variables["a"], Value::Num(5.0));
        assert!(!outcome.variables.contains_key("b"));
        assert_eq!(outcome.variables["cap"], Value::Num(4.0));
        assert_eq!(outcome.variables["l"], Value::Device("message1".into()));
        assert_eq!(outcome.message("message1"), Some("a is 5"));
        assert_eq!(outcome.memory("cell1"), Some(&[0.0, 0.0, 5.0, 0.0][..]));
        assert_eq!(outcome.printed, "a is 5rest");
    }

    #[test]
    fn equality_semantics() {
        let outcome = run_default(
            "op equal a null 0\n\
             op strictEqual b null 0\n\
             op equal c \"x\" \"x\"\n\
             op equal d \"x\" 1\n\
             op div e 1 0\n\
             op notEqual f 0.1 0.1000000001\n",
        );
        let get = |name: &str| outcome.variables[name].clone();
        assert_eq!(get("a"), Value::Num(1.0));
        assert_eq!(get("b"), Value::Num(0.0));
        assert_eq!(get("c"), Value::Num(1.0));
        assert_eq!(get("d"), Value::Num(1.0));
        assert_eq!(get("e"), Value::Null);
        assert_eq!(get("f"), Value::Num(0.0));
    }

    #[test]
    fn wrapping_and_limits() {
        let outcome = run_default("set x 1\njump 0 always _ _\nset x 2\n");
        assert_eq!(outcome.variables["x"], Value::Num(1.0));

        let config = Config {
            halt_on_wrap: false,
            step_limit: 50,
            ..Config::default()
        };
        let err = run("op add x x 1\njump 0 always _ _\n", &config).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::StepLimit(50)));
    }

    #[test]
    fn strings_keep_their_spaces() {
        assert_eq!(
            tokenize("print \"a  b\" x").unwrap(),
            ["print", "\"a  b\"", "x"]
        );
        assert!(tokenize("print \"open").is_none());
    }

    #[test]
    fn errors() {
        let err = run("set x 1\nucontrol idle 0 0 0 0 0\n", &Config::default()).unwrap_err();
        assert_eq!(err.line, 1);
        assert!(matches!(err.kind, ErrorKind::Unsupported(_)));

        let err = run("read x y 0\n", &Config::default()).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::NotADevice(_)));

        let err = run("jump somewhere always _ _\n", &Config::default()).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Parse(_)));
    }

    #[test]
    fn random_stays_in_range() {
        let outcome = run_default("op rand a 10 _\nop rand b 10 _\n");
        for name in ["a", "b"] {
            let n = outcome.variables[name].num();
            assert!((0.0..10.0).contains(&n));
        }
    }
}
