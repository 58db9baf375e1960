use std::rc::Rc;

use itertools::Itertools;
use tracing::warn;

use super::{At, Session};
use crate::{
    ast::{BinaryOp, Expression, ExpressionKind, Identifier, UnaryOp},
    error::{Error, ErrorKind},
    instruction::{Instruction, Label, Operand, Operator, Param, COUNTER},
    natives::{self, Slot},
    types::Type,
    value::{Function, Value, Variable},
};

fn incompatible(context: impl Into<String>, reason: impl Into<String>) -> ErrorKind {
    ErrorKind::IncompatibleTypes {
        context: context.into(),
        reason: reason.into(),
    }
}

impl Session {
    pub(super) fn expr(&mut self, expr: &Expression) -> Result<Value, Error> {
        let span = expr.span;
        match &expr.kind {
            ExpressionKind::Number(n) => Ok(Value::Number(*n)),
            ExpressionKind::String(s) => Ok(Value::String(s.clone())),
            ExpressionKind::Null => Ok(Value::Null),
            ExpressionKind::Identifier(name) => self.scope.lookup(name).at(span),
            ExpressionKind::Binary { op, lhs, rhs } => {
                let lhs = self.expr(lhs)?;
                let rhs = self.expr(rhs)?;
                self.binary(*op, lhs, rhs, span)
            }
            ExpressionKind::Unary { op, operand } => {
                let value = self.expr(operand)?;
                self.unary(*op, value, span)
            }
            ExpressionKind::Call { name, args } => self.call(name, args, true),
            ExpressionKind::Index { target, index } => {
                let cell = self.expr(target)?;
                if !cell.ty().overlaps(Type::BLOCK) {
                    return Err(incompatible("indexing", format!("{} is not a memory block", cell.ty())).at(target.span));
                }
                let cell = cell.get(self).at(target.span)?;
                let idx = self.expr(index)?;
                if !idx.ty().overlaps(Type::NUM | Type::NULL) {
                    return Err(incompatible("indexing", format!("{} is not an index", idx.ty())).at(index.span));
                }
                let index = idx.get(self).at(index.span)?;
                Ok(Value::Indexed { cell, index })
            }
            ExpressionKind::Property { object, property } => {
                let target = self.expr(object)?;
                if !target.ty().overlaps(Type::OBJECT) {
                    return Err(incompatible(
                        format!("property {}", property.name),
                        format!("{} cannot be sensed", target.ty()),
                    )
                    .at(object.span));
                }
                let ty = self.property_type(&property.name).at(property.span)?;
                let object = target.get(self).at(object.span)?;
                Ok(Value::Sensor {
                    object,
                    property: property.name.clone(),
                    ty,
                })
            }
        }
    }

    /// Sensor properties, plus the amount of any item or liquid.
    fn property_type(&self, property: &str) -> Result<Type, ErrorKind> {
        if let Some(ty) = natives::sensor_type(property) {
            return Ok(ty);
        }
        match self.scope.lookup(&format!("@{}", property)).map(|v| v.ty()) {
            Ok(ty) if ty == Type::ITEM_TYPE || ty == Type::LIQUID_TYPE => Ok(Type::NUM),
            _ => Err(ErrorKind::UndefinedSymbol {
                name: property.to_owned(),
            }),
        }
    }

    /// Evaluates both sides of a binary operator down to operands.
    pub(super) fn operands(
        &mut self,
        op: BinaryOp,
        lhs: &Expression,
        rhs: &Expression,
    ) -> Result<(Operand, Operand), Error> {
        let a = self.expr(lhs)?;
        self.check_operand(op, &a).at(lhs.span)?;
        let a = a.get(self).at(lhs.span)?;
        let b = self.expr(rhs)?;
        self.check_operand(op, &b).at(rhs.span)?;
        let b = b.get(self).at(rhs.span)?;
        Ok((a, b))
    }

    fn check_operand(&self, op: BinaryOp, value: &Value) -> Result<(), ErrorKind> {
        let expected = op.operand_type();
        if value.ty().overlaps(expected) {
            Ok(())
        } else {
            Err(incompatible(
                format!("operator {}", op.operator().name()),
                format!("expected {}, found {}", expected, value.ty()),
            ))
        }
    }

    pub(super) fn binary(
        &mut self,
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
        span: crate::source::FileSpan,
    ) -> Result<Value, Error> {
        self.check_operand(op, &lhs).at(span)?;
        self.check_operand(op, &rhs).at(span)?;
        let operator = op.operator();
        if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
            if let Some(folded) = operator.fold(a, b) {
                return Ok(Value::Number(folded));
            }
        }
        let a = lhs.get(self).at(span)?;
        let b = rhs.get(self).at(span)?;
        let result = self.temp();
        self.emit(Instruction::op(operator, &result, a, Some(b)));
        Ok(Value::Variable(Variable::new(result, Type::NUM)))
    }

    fn unary(&mut self, op: UnaryOp, value: Value, span: crate::source::FileSpan) -> Result<Value, Error> {
        if matches!(op, UnaryOp::Neg | UnaryOp::BitNot) && !value.ty().overlaps(Type::NUM | Type::NULL) {
            return Err(incompatible("unary operator", format!("{} is not a number", value.ty())).at(span));
        }
        let (operator, a, b) = match (op, value.as_number()) {
            (UnaryOp::Neg, Some(n)) => return Ok(Value::Number(-n)),
            (UnaryOp::BitNot, Some(n)) => {
                if let Some(folded) = Operator::Not.fold(n, 0.0) {
                    return Ok(Value::Number(folded));
                }
                (Operator::Not, Operand::Number(n), None)
            }
            (UnaryOp::Neg, None) => {
                let a = value.get(self).at(span)?;
                (Operator::Sub, Operand::Number(0.0), Some(a))
            }
            (UnaryOp::Not, _) => {
                let a = value.get(self).at(span)?;
                (Operator::Equal, a, Some(Operand::Number(0.0)))
            }
            (UnaryOp::BitNot, None) => (Operator::Not, value.get(self).at(span)?, None),
        };
        let result = self.temp();
        self.emit(Instruction::op(operator, &result, a, b));
        Ok(Value::Variable(Variable::new(result, Type::NUM)))
    }

    /// Calls a user function or a native. The value is `null` when there is
    /// nothing to return or `want_value` is unset.
    pub(super) fn call(
        &mut self,
        name: &Identifier,
        args: &[Expression],
        want_value: bool,
    ) -> Result<Value, Error> {
        match self.scope.lookup(&name.name).at(name.span)? {
            Value::Function(function) => self.call_function(function, name, args, want_value),
            Value::Native(native) => self.call_native(native, name, args),
            _ => Err(ErrorKind::NotCallable {
                name: name.name.clone(),
            }
            .at(name.span)),
        }
    }

    fn call_function(
        &mut self,
        function: Rc<Function>,
        name: &Identifier,
        args: &[Expression],
        want_value: bool,
    ) -> Result<Value, Error> {
        if args.len() != function.params.len() {
            return Err(ErrorKind::InvalidArgCount {
                name: function.name.clone(),
                expected: function.params.len().to_string(),
                found: args.len(),
            }
            .at(name.span));
        }
        if self
            .function
            .as_ref()
            .is_some_and(|current| Rc::ptr_eq(current, &function))
        {
            warn!(
                function = %function.name,
                "recursive call overwrites the return address of the caller"
            );
        }

        let mut operands = Vec::with_capacity(args.len());
        for (arg, ty) in args.iter().zip(&function.params) {
            let value = self.expr(arg)?;
            if !value.ty().is_in(*ty) {
                return Err(ErrorKind::TypeMismatch {
                    expected: *ty,
                    found: value.ty(),
                }
                .at(arg.span));
            }
            operands.push(value.get(self).at(arg.span)?);
        }
        for (idx, operand) in operands.into_iter().enumerate() {
            self.emit(Instruction::set(function.arg(idx), operand));
        }
        self.emit(Instruction::op(
            Operator::Add,
            function.ret_addr(),
            Operand::var(COUNTER),
            Some(Operand::Number(1.0)),
        ));
        self.emit(Instruction::Jump(Label(function.entry())));

        if !want_value {
            return Ok(Value::Null);
        }
        let result = self.temp();
        self.emit(Instruction::set(&result, Operand::var(function.ret_value())));
        Ok(Value::Variable(Variable::new(result, function.ret)))
    }

    fn call_native(
        &mut self,
        native: &'static str,
        name: &Identifier,
        args: &[Expression],
    ) -> Result<Value, Error> {
        let (signature, args) = if natives::has_modes(native) {
            let Some((first, rest)) = args.split_first() else {
                return Err(ErrorKind::InvalidArgCount {
                    name: native.to_owned(),
                    expected: "a mode and its".to_owned(),
                    found: 0,
                }
                .at(name.span));
            };
            let mode = match &first.kind {
                ExpressionKind::Identifier(mode) => natives::lookup(native, Some(mode.as_str())),
                _ => None,
            };
            let Some(signature) = mode else {
                return Err(incompatible(
                    format!("{} mode", native),
                    format!("expected one of {}", natives::modes(native).join(", ")),
                )
                .at(first.span));
            };
            (signature, rest)
        } else {
            let signature = natives::lookup(native, None).ok_or_else(|| {
                ErrorKind::NotCallable {
                    name: native.to_owned(),
                }
                .at(name.span)
            })?;
            (signature, args)
        };
        let display_name = match signature.mode {
            Some(mode) => format!("{} {}", native, mode),
            None => native.to_owned(),
        };

        if signature.variadic {
            if args.is_empty() {
                return Err(ErrorKind::InvalidArgCount {
                    name: display_name,
                    expected: "at least 1".to_owned(),
                    found: 0,
                }
                .at(name.span));
            }
            for arg in args {
                let value = self.expr(arg)?;
                let operand = value.get(self).at(arg.span)?;
                self.emit(Instruction::native(signature.opcode, vec![Param::In(operand)]));
            }
            return Ok(Value::Null);
        }

        if args.len() != signature.arity() {
            return Err(ErrorKind::InvalidArgCount {
                name: display_name,
                expected: signature.arity().to_string(),
                found: args.len(),
            }
            .at(name.span));
        }

        let mut args = args.iter();
        let mut params = Vec::with_capacity(signature.slots.len());
        let mut result = Value::Null;
        for slot in signature.slots {
            let param = match *slot {
                Slot::Fixed(word) => Param::Config(word.to_owned()),
                Slot::Ret(ty) => {
                    let tmp = self.temp();
                    result = Value::Variable(Variable::new(&tmp, ty));
                    Param::Out(tmp)
                }
                Slot::Config(words) => {
                    let arg = args.next().expect("arity checked");
                    match &arg.kind {
                        ExpressionKind::Identifier(word) if words.contains(&word.as_str()) => {
                            Param::Config(word.clone())
                        }
                        _ => {
                            return Err(incompatible(
                                format!("argument to {}", display_name),
                                format!("expected one of {}", words.join(", ")),
                            )
                            .at(arg.span))
                        }
                    }
                }
                Slot::In(ty) => {
                    let arg = args.next().expect("arity checked");
                    let value = self.expr(arg)?;
                    if !value.ty().overlaps(ty) {
                        return Err(incompatible(
                            format!("argument to {}", display_name),
                            format!("expected {}, found {}", ty, value.ty()),
                        )
                        .at(arg.span));
                    }
                    Param::In(value.get(self).at(arg.span)?)
                }
                Slot::Out(ty) => {
                    let arg = args.next().expect("arity checked");
                    let var = self.output(arg, ty, &display_name)?;
                    Param::Out(var.name)
                }
            };
            params.push(param);
        }
        self.emit(Instruction::native(signature.opcode, params));
        Ok(result)
    }

    /// The variable an output slot writes, declared on first use.
    fn output(&mut self, arg: &Expression, ty: Type, native: &str) -> Result<Variable, Error> {
        let ExpressionKind::Identifier(name) = &arg.kind else {
            return Err(incompatible(format!("argument to {}", native), "expected a variable").at(arg.span));
        };
        match self.scope.lookup(name) {
            Ok(Value::Variable(var)) if !var.constant => {
                if !ty.overlaps(var.ty) {
                    return Err(incompatible(
                        format!("argument to {}", native),
                        format!("{} cannot hold {}", var.ty, ty),
                    )
                    .at(arg.span));
                }
                Ok(var)
            }
            Ok(_) => Err(incompatible(
                format!("argument to {}", native),
                format!("{} is not a settable variable", name),
            )
            .at(arg.span)),
            Err(ErrorKind::UndefinedSymbol { .. }) if !name.starts_with('@') => {
                self.declare_variable(name, ty).at(arg.span)
            }
            Err(e) => Err(e.at(arg.span)),
        }
    }
}
