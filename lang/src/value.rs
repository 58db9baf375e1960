use std::rc::Rc;

use crate::{
    error::ErrorKind,
    generator::Session,
    instruction::{Instruction, Opcode, Operand, Param},
    types::Type,
};

/// Sensor properties that can also be written, through `control`.
pub const CONTROLLABLE: &[&str] = &["enabled", "config", "color"];

/// What a name or an expression evaluates to during generation.
///
/// Device reads and sensors stay lazy until [`Value::get`] so that an
/// assignment target can be written instead of read.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    String(String),
    Null,
    Variable(Variable),
    /// `cell[index]`.
    Indexed { cell: Operand, index: Operand },
    /// `object.property`.
    Sensor {
        object: Operand,
        property: String,
        ty: Type,
    },
    Function(Rc<Function>),
    Native(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Name in the generated code, which may differ from the source name.
    pub name: String,
    pub ty: Type,
    pub constant: bool,
}

impl Variable {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Variable {
            name: name.into(),
            ty,
            constant: false,
        }
    }

    pub fn constant(name: impl Into<String>, ty: Type) -> Self {
        Variable {
            name: name.into(),
            ty,
            constant: true,
        }
    }
}

/// A user function and the globals of its calling convention.
#[derive(Debug, PartialEq)]
pub struct Function {
    pub name: String,
    /// Unique mlog prefix, `__f_<name>` unless that was taken.
    pub prefix: String,
    pub params: Vec<Type>,
    pub ret: Type,
}

impl Function {
    pub fn entry(&self) -> String {
        self.prefix.clone()
    }

    pub fn arg(&self, idx: usize) -> String {
        format!("{}_arg_{}", self.prefix, idx)
    }

    /// Holds the line to return to.
    pub fn ret_addr(&self) -> String {
        format!("{}_ret", self.prefix)
    }

    pub fn ret_value(&self) -> String {
        format!("{}_retv", self.prefix)
    }
}

impl Value {
    pub fn ty(&self) -> Type {
        match self {
            Value::Number(_) => Type::NUM,
            Value::String(_) => Type::STR,
            Value::Null => Type::NULL,
            Value::Variable(v) => v.ty,
            Value::Indexed { .. } => Type::NUM,
            Value::Sensor { ty, .. } => *ty,
            Value::Function(_) | Value::Native(_) => Type::ANY,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Value::Number(_) | Value::String(_) | Value::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The operand holding this value, emitting a read first if needed.
    pub fn get(&self, session: &mut Session) -> Result<Operand, ErrorKind> {
        Ok(match self {
            Value::Number(n) => Operand::Number(*n),
            Value::String(s) => Operand::String(s.clone()),
            Value::Null => Operand::Null,
            Value::Variable(v) => Operand::var(&v.name),
            Value::Indexed { cell, index } => {
                let tmp = session.temp();
                session.emit(Instruction::native(
                    Opcode::Read,
                    vec![
                        Param::Out(tmp.clone()),
                        Param::In(cell.clone()),
                        Param::In(index.clone()),
                    ],
                ));
                Operand::var(tmp)
            }
            Value::Sensor {
                object, property, ..
            } => {
                let tmp = session.temp();
                session.emit(Instruction::native(
                    Opcode::Sensor,
                    vec![
                        Param::Out(tmp.clone()),
                        Param::In(object.clone()),
                        Param::In(Operand::var(format!("@{}", property))),
                    ],
                ));
                Operand::var(tmp)
            }
            Value::Function(f) => return Err(ErrorKind::NotAValue { name: f.name.clone() }),
            Value::Native(name) => return Err(ErrorKind::NotAValue { name: name.to_string() }),
        })
    }

    /// Stores `value` into this location.
    pub fn set(&self, session: &mut Session, value: Operand) -> Result<(), ErrorKind> {
        match self {
            Value::Variable(v) if !v.constant => {
                session.emit(Instruction::set(&v.name, value));
            }
            Value::Indexed { cell, index } => {
                session.emit(Instruction::native(
                    Opcode::Write,
                    vec![
                        Param::In(value),
                        Param::In(cell.clone()),
                        Param::In(index.clone()),
                    ],
                ));
            }
            Value::Sensor {
                object, property, ..
            } if CONTROLLABLE.contains(&property.as_str()) => {
                session.emit(Instruction::native(
                    Opcode::Control,
                    vec![
                        Param::Config(property.clone()),
                        Param::In(object.clone()),
                        Param::In(value),
                    ],
                ));
            }
            _ => return Err(ErrorKind::WriteToConst { name: self.describe() }),
        }
        Ok(())
    }

    /// Short rendering for error messages.
    pub fn describe(&self) -> String {
        match self {
            Value::Number(n) => crate::instruction::format_number(*n),
            Value::String(s) => format!("{:?}", s),
            Value::Null => "null".to_owned(),
            Value::Variable(v) => v.name.clone(),
            Value::Indexed { cell, index } => format!("{}[{}]", cell, index),
            Value::Sensor {
                object, property, ..
            } => format!("{}.{}", object, property),
            Value::Function(f) => f.name.clone(),
            Value::Native(name) => name.to_string(),
        }
    }
}
