//! Resolves labels to line numbers and concatenates units into one program.

use std::collections::BTreeMap;

use itertools::Itertools;
use tracing::debug;

use crate::instruction::Instruction;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("in unit {unit}, label {label:?} not found")]
    UnknownLabel { unit: usize, label: String },
    #[error("in unit {unit}, label {label:?} already defined")]
    DuplicateLabel { unit: usize, label: String },
    #[error("in unit {unit}, line {line}: invalid jump {text:?}")]
    InvalidJumpInstruction {
        unit: usize,
        line: usize,
        text: String,
    },
}

/// One independently compiled piece of the final program.
#[derive(Debug, Clone, PartialEq)]
pub enum Unit {
    Compiled(Vec<Instruction>),
    /// Hand-written mlog, passed through with its jumps relocated.
    Precompiled(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Line {
    Jump {
        target: usize,
        /// Condition and operands; `None` jumps unconditionally.
        condition: Option<String>,
    },
    Text(String),
}

pub fn link(units: &[Unit]) -> Result<String, Error> {
    let mut lines = vec![];
    for (unit_idx, unit) in units.iter().enumerate() {
        let resolved = link_unit(unit_idx, unit)?;
        let offset = lines.len();
        debug!(unit = unit_idx, offset, lines = resolved.len(), "linking unit");
        lines.extend(resolved.into_iter().map(|line| match line {
            Line::Jump { target, condition } => Line::Jump {
                target: target + offset,
                condition,
            },
            text => text,
        }));
    }

    Ok(lines
        .iter()
        .map(|line| match line {
            Line::Jump {
                target,
                condition: None,
            } => format!("jump {} always _ _\n", target),
            Line::Jump {
                target,
                condition: Some(condition),
            } => format!("jump {} {}\n", target, condition),
            Line::Text(text) => format!("{}\n", text),
        })
        .collect())
}

/// Lines of one unit as if it were the whole program. Past-the-end targets
/// wrap to the unit's first line, like the VM does.
fn link_unit(unit_idx: usize, unit: &Unit) -> Result<Vec<Line>, Error> {
    let mut lines = match unit {
        Unit::Compiled(code) => resolve(unit_idx, code)?,
        Unit::Precompiled(text) => parse(unit_idx, text)?,
    };
    clamp(&mut lines);
    if matches!(lines.last(), Some(Line::Jump { target: 0, condition: None })) {
        lines.pop();
        clamp(&mut lines);
    }
    Ok(lines)
}

fn resolve(unit: usize, code: &[Instruction]) -> Result<Vec<Line>, Error> {
    let mut labels = BTreeMap::new();
    let mut line = 0;
    for instruction in code {
        match instruction {
            Instruction::Label(label) => {
                if labels.insert(label.0.as_str(), line).is_some() {
                    return Err(Error::DuplicateLabel {
                        unit,
                        label: label.0.clone(),
                    });
                }
            }
            Instruction::Noop => {}
            _ => line += 1,
        }
    }

    let lookup = |label: &crate::instruction::Label| {
        labels
            .get(label.0.as_str())
            .copied()
            .ok_or_else(|| Error::UnknownLabel {
                unit,
                label: label.0.clone(),
            })
    };

    code.iter()
        .filter_map(|instruction| match instruction {
            Instruction::Label(_) | Instruction::Noop => None,
            Instruction::Jump(target) => Some(lookup(target).map(|target| Line::Jump {
                target,
                condition: None,
            })),
            Instruction::JumpIf {
                target,
                condition,
                lhs,
                rhs,
            } => Some(lookup(target).map(|target| Line::Jump {
                target,
                condition: Some(format!("{} {} {}", condition.name(), lhs, rhs)),
            })),
            Instruction::Native(native) => Some(Ok(Line::Text(native.to_string()))),
        })
        .collect()
}

/// Splits hand-written mlog into lines. Blank lines and `#` comments are
/// not instructions and are dropped.
fn parse(unit: usize, text: &str) -> Result<Vec<Line>, Error> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .enumerate()
        .map(|(idx, line)| {
            let mut words = line.split_whitespace();
            if words.next() != Some("jump") {
                return Ok(Line::Text(line.to_owned()));
            }
            let invalid = || Error::InvalidJumpInstruction {
                unit,
                line: idx,
                text: line.to_owned(),
            };
            let target = words
                .next()
                .and_then(|t| t.parse::<usize>().ok())
                .ok_or_else(invalid)?;
            let rest = words.collect_vec();
            let condition = match rest.first() {
                None | Some(&"always") => None,
                Some(_) => Some(rest.join(" ")),
            };
            Ok(Line::Jump { target, condition })
        })
        .collect()
}
