//! Lowers the AST to symbolic instructions.
//!
//! Control flow becomes labels and jumps, expressions become temporaries, and
//! user functions follow a fixed calling convention through global variables:
//!
//! ```text
//! jump <skip>
//! __f_f:
//! <body>
//! set @counter __f_f_ret
//! <skip>:
//! ```
//!
//! A call sets `__f_f_arg_<i>`, stores `@counter + 1` in `__f_f_ret` and jumps
//! to `__f_f`; the returned value is left in `__f_f_retv`. There is a single
//! return slot per function, so recursion is not supported.

mod expr;

use std::{collections::BTreeSet, rc::Rc};

use tracing::debug;

use crate::{
    ast::{Expression, ExpressionKind, FunctionDecl, Identifier, Program, Statement, StatementKind},
    error::{Error, ErrorKind},
    instruction::{Condition, Instruction, Label, Operand, Operator, COUNTER, TEMP_PREFIX},
    natives,
    options::Options,
    scope::Scope,
    source::FileSpan,
    types::Type,
    value::{Function, Value, Variable},
};

pub fn generate(program: &Program, options: &Options) -> Result<Vec<Instruction>, Error> {
    let mut session = Session::new(options);
    session.statements(&program.statements)?;
    debug!(
        instructions = session.code.len(),
        temporaries = session.temps,
        "generated"
    );
    Ok(session.code)
}

trait At<T> {
    fn at(self, span: FileSpan) -> Result<T, Error>;
}

impl<T> At<T> for Result<T, ErrorKind> {
    fn at(self, span: FileSpan) -> Result<T, Error> {
        self.map_err(|kind| kind.at(span))
    }
}

struct Loop {
    cont: Label,
    end: Label,
}

/// Mutable state of one compilation.
pub struct Session {
    pub code: Vec<Instruction>,
    scope: Scope,
    loops: Vec<Loop>,
    function: Option<Rc<Function>>,
    temps: usize,
    labels: usize,
    /// Every mlog name handed out to a declaration.
    names: BTreeSet<String>,
    unroll_limit: usize,
}

impl Session {
    pub fn new(options: &Options) -> Self {
        Session {
            code: vec![],
            scope: Scope::new(),
            loops: vec![],
            function: None,
            temps: 0,
            labels: 0,
            names: BTreeSet::new(),
            unroll_limit: options.unroll_limit,
        }
    }

    pub fn emit(&mut self, instruction: Instruction) {
        self.code.push(instruction);
    }

    pub fn temp(&mut self) -> String {
        let name = format!("{}{}", TEMP_PREFIX, self.temps);
        self.temps += 1;
        name
    }

    fn label(&mut self) -> String {
        let base = format!("__l{}", self.labels);
        self.labels += 1;
        base
    }

    fn loop_labels(&mut self) -> (Label, Label, Label) {
        let base = self.label();
        (
            Label(format!("{}_s", base)),
            Label(format!("{}_c", base)),
            Label(format!("{}_e", base)),
        )
    }

    fn unique(&mut self, base: String) -> String {
        let mut name = base.clone();
        let mut n = 0;
        while self.names.contains(&name) {
            n += 1;
            name = format!("{}_{}", base, n);
        }
        self.names.insert(name.clone());
        name
    }

    /// Picks the mlog name of a new declaration of `name`.
    fn variable_name(&mut self, name: &str) -> String {
        let base = match &self.function {
            Some(f) => format!("{}_{}", f.prefix, name),
            None => name.to_owned(),
        };
        self.unique(base)
    }

    fn declare_variable(&mut self, name: &str, ty: Type) -> Result<Variable, ErrorKind> {
        if self.scope.lookup_local(name).is_some() {
            return Err(ErrorKind::AlreadyDefined {
                name: name.to_owned(),
            });
        }
        let var = Variable::new(self.variable_name(name), ty);
        self.scope.declare(name, Value::Variable(var.clone()))?;
        Ok(var)
    }

    fn block(&mut self, statements: &[Statement]) -> Result<(), Error> {
        self.scope.push();
        self.statements(statements)?;
        self.scope.pop();
        Ok(())
    }

    /// Functions are declared before anything else in their block, so they
    /// can be called ahead of their definition.
    fn statements(&mut self, statements: &[Statement]) -> Result<(), Error> {
        for statement in statements {
            if let StatementKind::Function(decl) = &statement.kind {
                self.hoist(decl)?;
            }
        }
        statements.iter().try_for_each(|s| self.statement(s))
    }

    fn hoist(&mut self, decl: &FunctionDecl) -> Result<(), Error> {
        let prefix = self.unique(format!("__f_{}", decl.name.name));
        let function = Function {
            name: decl.name.name.clone(),
            prefix,
            params: decl
                .params
                .iter()
                .map(|p| p.ty.unwrap_or(Type::ANY))
                .collect(),
            ret: decl.ret.unwrap_or(Type::ANY),
        };
        self.scope
            .declare(&decl.name.name, Value::Function(Rc::new(function)))
            .at(decl.name.span)
    }

    fn statement(&mut self, statement: &Statement) -> Result<(), Error> {
        let span = statement.span;
        match &statement.kind {
            StatementKind::Let {
                name,
                ty,
                value,
                constant,
            } => self.declaration(name, *ty, value.as_ref(), *constant),
            StatementKind::Assign { target, op, value } => self.assignment(target, *op, value),
            StatementKind::Expression(expr) => {
                if let ExpressionKind::Call { name, args } = &expr.kind {
                    self.call(name, args, false)?;
                } else {
                    let value = self.expr(expr)?;
                    value.get(self).at(expr.span)?;
                }
                Ok(())
            }
            StatementKind::If {
                condition,
                then,
                otherwise,
            } => {
                let base = self.label();
                let end = Label(format!("{}_e", base));
                match otherwise {
                    None => {
                        self.condition(condition, &end)?;
                        self.block(then)?;
                    }
                    Some(otherwise) => {
                        let other = Label(format!("{}_else", base));
                        self.condition(condition, &other)?;
                        self.block(then)?;
                        self.emit(Instruction::Jump(end.clone()));
                        self.emit(Instruction::Label(other));
                        self.block(otherwise)?;
                    }
                }
                self.emit(Instruction::Label(end));
                Ok(())
            }
            StatementKind::While { condition, body } => {
                let (start, cont, end) = self.loop_labels();
                self.emit(Instruction::Label(start.clone()));
                self.condition(condition, &end)?;
                self.loop_body(body, &cont, &end)?;
                self.emit(Instruction::Label(cont));
                self.emit(Instruction::Jump(start));
                self.emit(Instruction::Label(end));
                Ok(())
            }
            StatementKind::For {
                init,
                condition,
                step,
                body,
            } => {
                self.scope.push();
                if let Some(init) = init {
                    self.statement(init)?;
                }
                let (start, cont, end) = self.loop_labels();
                self.emit(Instruction::Label(start.clone()));
                if let Some(condition) = condition {
                    self.condition(condition, &end)?;
                }
                self.loop_body(body, &cont, &end)?;
                self.emit(Instruction::Label(cont));
                if let Some(step) = step {
                    self.statement(step)?;
                }
                self.emit(Instruction::Jump(start));
                self.emit(Instruction::Label(end));
                self.scope.pop();
                Ok(())
            }
            StatementKind::Range {
                var,
                start,
                end,
                body,
            } => self.range(var, start, end, body),
            StatementKind::Function(decl) => self.function(decl),
            StatementKind::Break => {
                let target = self.innermost_loop("break", span)?.end.clone();
                self.emit(Instruction::Jump(target));
                Ok(())
            }
            StatementKind::Continue => {
                let target = self.innermost_loop("continue", span)?.cont.clone();
                self.emit(Instruction::Jump(target));
                Ok(())
            }
            StatementKind::Return(value) => {
                let Some(function) = self.function.clone() else {
                    return Err(ErrorKind::InvalidControlFlow {
                        statement: "return",
                        context: "a function",
                    }
                    .at(span));
                };
                if let Some(value) = value {
                    let result = self.expr(value)?;
                    if !result.ty().is_in(function.ret) {
                        return Err(ErrorKind::TypeMismatch {
                            expected: function.ret,
                            found: result.ty(),
                        }
                        .at(value.span));
                    }
                    let operand = result.get(self).at(value.span)?;
                    self.emit(Instruction::set(function.ret_value(), operand));
                }
                self.emit(Instruction::set(COUNTER, Operand::var(function.ret_addr())));
                Ok(())
            }
        }
    }

    fn innermost_loop(&self, statement: &'static str, span: FileSpan) -> Result<&Loop, Error> {
        self.loops.last().ok_or_else(|| {
            ErrorKind::InvalidControlFlow {
                statement,
                context: "a loop",
            }
            .at(span)
        })
    }

    fn loop_body(&mut self, body: &[Statement], cont: &Label, end: &Label) -> Result<(), Error> {
        self.loops.push(Loop {
            cont: cont.clone(),
            end: end.clone(),
        });
        self.block(body)?;
        self.loops.pop();
        Ok(())
    }

    fn declaration(
        &mut self,
        name: &Identifier,
        ty: Option<Type>,
        value: Option<&Expression>,
        constant: bool,
    ) -> Result<(), Error> {
        let value = match value {
            Some(expr) => Some((self.expr(expr)?, expr.span)),
            None => None,
        };
        let found = value.as_ref().map_or(Type::NULL, |(v, _)| v.ty());
        let declared = match ty {
            Some(ty) => ty,
            None if found == Type::NULL => Type::ANY,
            None => found,
        };
        if !found.is_in(declared) {
            return Err(ErrorKind::TypeMismatch {
                expected: declared,
                found,
            }
            .at(value.map_or(name.span, |(_, span)| span)));
        }
        if self.scope.lookup_local(&name.name).is_some() {
            return Err(ErrorKind::AlreadyDefined {
                name: name.name.clone(),
            }
            .at(name.span));
        }

        // Constant literals are substituted at every use.
        if let Some((literal, _)) = value.as_ref().filter(|(v, _)| constant && v.is_literal()) {
            return self
                .scope
                .declare(&name.name, literal.clone())
                .at(name.span);
        }

        let operand = match &value {
            Some((v, span)) => v.get(self).at(*span)?,
            None => Operand::Null,
        };
        let mlog = self.variable_name(&name.name);
        self.emit(Instruction::set(&mlog, operand));
        let var = Variable {
            name: mlog,
            ty: declared,
            constant,
        };
        self.scope
            .declare(&name.name, Value::Variable(var))
            .at(name.span)
    }

    fn assignment(
        &mut self,
        target: &Expression,
        op: Option<crate::ast::BinaryOp>,
        value: &Expression,
    ) -> Result<(), Error> {
        let slot = match &target.kind {
            ExpressionKind::Identifier(name) => match self.scope.lookup(name) {
                Ok(slot) => slot,
                Err(ErrorKind::UndefinedSymbol { .. }) if op.is_none() && !name.starts_with('@') => {
                    let result = self.expr(value)?;
                    let ty = match result.ty() {
                        Type::NULL => Type::ANY,
                        ty => ty,
                    };
                    let operand = result.get(self).at(value.span)?;
                    let var = self.declare_variable(name, ty).at(target.span)?;
                    self.emit(Instruction::set(var.name, operand));
                    return Ok(());
                }
                Err(e) => return Err(e.at(target.span)),
            },
            _ => self.expr(target)?,
        };

        let result = match op {
            None => self.expr(value)?,
            Some(op) => {
                let rhs = self.expr(value)?;
                self.binary(op, slot.clone(), rhs, value.span)?
            }
        };

        let found = result.ty();
        match &slot {
            Value::Variable(var) if !var.constant && !found.is_in(var.ty) => {
                return Err(ErrorKind::TypeMismatch {
                    expected: var.ty,
                    found,
                }
                .at(value.span));
            }
            Value::Indexed { .. } if !found.overlaps(Type::NUM | Type::NULL) => {
                return Err(ErrorKind::IncompatibleTypes {
                    context: "memory write".to_owned(),
                    reason: format!("{} is not a number", found),
                }
                .at(value.span));
            }
            Value::Sensor { property, ty, .. } if !found.overlaps(*ty) => {
                return Err(ErrorKind::IncompatibleTypes {
                    context: format!("write to {}", property),
                    reason: format!("expected {}, found {}", ty, found),
                }
                .at(value.span));
            }
            _ => {}
        }
        let operand = result.get(self).at(value.span)?;
        slot.set(self, operand).at(target.span)
    }

    /// Jumps to `otherwise` when `condition` is false and falls through
    /// when it holds.
    fn condition(&mut self, condition: &Expression, otherwise: &Label) -> Result<(), Error> {
        if let ExpressionKind::Binary { op, lhs, rhs } = &condition.kind {
            let comparison = Condition::from_operator(op.operator())
                .and_then(|c| Some((c, c.negate()?)));
            if let Some((holds, fails)) = comparison {
                let (a, b) = self.operands(*op, lhs, rhs)?;
                if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
                    if let Some(result) = holds.fold(x, y) {
                        if !result {
                            self.emit(Instruction::Jump(otherwise.clone()));
                        }
                        return Ok(());
                    }
                }
                self.emit(Instruction::JumpIf {
                    target: otherwise.clone(),
                    condition: fails,
                    lhs: a,
                    rhs: b,
                });
                return Ok(());
            }
        }

        let value = self.expr(condition)?;
        let truthy = match &value {
            Value::Number(n) => Some(*n != 0.0),
            Value::String(_) => Some(true),
            Value::Null => Some(false),
            _ => None,
        };
        match truthy {
            Some(true) => {}
            Some(false) => self.emit(Instruction::Jump(otherwise.clone())),
            None => {
                let operand = value.get(self).at(condition.span)?;
                self.emit(Instruction::JumpIf {
                    target: otherwise.clone(),
                    condition: Condition::Equal,
                    lhs: operand,
                    rhs: Operand::Number(0.0),
                });
            }
        }
        Ok(())
    }

    fn range(
        &mut self,
        var: &Identifier,
        start: &Expression,
        end: &Expression,
        body: &[Statement],
    ) -> Result<(), Error> {
        let first = self.expr(start)?;
        let last = self.expr(end)?;
        for (value, span) in [(&first, start.span), (&last, end.span)] {
            if !value.ty().is_in(Type::NUM) {
                return Err(ErrorKind::TypeMismatch {
                    expected: Type::NUM,
                    found: value.ty(),
                }
                .at(span));
            }
        }

        if let (Some(a), Some(b)) = (first.as_number(), last.as_number()) {
            let integral = a.fract() == 0.0 && b.fract() == 0.0;
            if integral
                && self.unroll_limit > 0
                && b - a <= self.unroll_limit as f64
                && !declares_function(body)
                && !writes_variable(body, &var.name)
            {
                return self.unrolled(var, a as i64, b as i64, body);
            }
        }

        let first = first.get(self).at(start.span)?;
        // The bound is read once, before the first iteration.
        let last = match last {
            Value::Variable(v) => {
                let tmp = self.temp();
                self.emit(Instruction::set(&tmp, Operand::var(v.name)));
                Operand::var(tmp)
            }
            other => other.get(self).at(end.span)?,
        };

        self.scope.push();
        let counter = self.declare_variable(&var.name, Type::NUM).at(var.span)?;
        self.emit(Instruction::set(&counter.name, first));
        let (head, cont, exit) = self.loop_labels();
        self.emit(Instruction::Label(head.clone()));
        self.emit(Instruction::JumpIf {
            target: exit.clone(),
            condition: Condition::GreaterThanEq,
            lhs: Operand::var(&counter.name),
            rhs: last,
        });
        self.loop_body(body, &cont, &exit)?;
        self.emit(Instruction::Label(cont));
        self.emit(Instruction::op(
            Operator::Add,
            &counter.name,
            Operand::var(&counter.name),
            Some(Operand::Number(1.0)),
        ));
        self.emit(Instruction::Jump(head));
        self.emit(Instruction::Label(exit));
        self.scope.pop();
        Ok(())
    }

    /// Emits the body once per iteration, each with its own `continue`
    /// target.
    fn unrolled(&mut self, var: &Identifier, start: i64, end: i64, body: &[Statement]) -> Result<(), Error> {
        self.scope.push();
        let counter = self.declare_variable(&var.name, Type::NUM).at(var.span)?;
        let base = self.label();
        let exit = Label(format!("{}_e", base));
        for (n, k) in (start..end).enumerate() {
            let cont = Label(format!("{}_{}_c", base, n));
            self.emit(Instruction::set(&counter.name, Operand::Number(k as f64)));
            self.loop_body(body, &cont, &exit)?;
            self.emit(Instruction::Label(cont));
        }
        self.emit(Instruction::Label(exit));
        // Same final value as the rolled loop.
        self.emit(Instruction::set(
            &counter.name,
            Operand::Number(start.max(end) as f64),
        ));
        self.scope.pop();
        Ok(())
    }

    fn function(&mut self, decl: &FunctionDecl) -> Result<(), Error> {
        let Some(Value::Function(function)) = self.scope.lookup_local(&decl.name.name).cloned()
        else {
            return Err(ErrorKind::UndefinedSymbol {
                name: decl.name.name.clone(),
            }
            .at(decl.name.span));
        };
        debug!(name = %function.name, prefix = %function.prefix, "function");

        let skip = Label(format!("{}_skip", self.label()));
        self.emit(Instruction::Jump(skip.clone()));
        self.emit(Instruction::Label(Label(function.entry())));

        let outer_function = self.function.replace(function.clone());
        let outer_loops = std::mem::take(&mut self.loops);
        self.scope.push();
        for (idx, (param, ty)) in decl.params.iter().zip(&function.params).enumerate() {
            self.scope
                .declare(
                    &param.name.name,
                    Value::Variable(Variable::new(function.arg(idx), *ty)),
                )
                .at(param.name.span)?;
        }
        self.statements(&decl.body)?;
        self.scope.pop();
        self.loops = outer_loops;
        self.function = outer_function;

        self.emit(Instruction::set(COUNTER, Operand::var(function.ret_addr())));
        self.emit(Instruction::Label(skip));
        Ok(())
    }
}

fn any_statement(body: &[Statement], pred: &mut impl FnMut(&Statement) -> bool) -> bool {
    body.iter().any(|statement| {
        if pred(statement) {
            return true;
        }
        match &statement.kind {
            StatementKind::If {
                then, otherwise, ..
            } => {
                any_statement(then, pred)
                    || otherwise.as_deref().is_some_and(|o| any_statement(o, pred))
            }
            StatementKind::While { body, .. } | StatementKind::Range { body, .. } => {
                any_statement(body, pred)
            }
            StatementKind::For {
                init, step, body, ..
            } => {
                init.as_deref().is_some_and(|s| any_statement(std::slice::from_ref(s), pred))
                    || step.as_deref().is_some_and(|s| any_statement(std::slice::from_ref(s), pred))
                    || any_statement(body, pred)
            }
            StatementKind::Function(decl) => any_statement(&decl.body, pred),
            _ => false,
        }
    })
}

fn declares_function(body: &[Statement]) -> bool {
    any_statement(body, &mut |s| matches!(s.kind, StatementKind::Function(_)))
}

/// Whether `body` may assign `name`, either directly or by passing it to a
/// native that writes its arguments.
fn writes_variable(body: &[Statement], name: &str) -> bool {
    fn passes(expr: &Expression, name: &str) -> bool {
        match &expr.kind {
            ExpressionKind::Call { name: callee, args } => args.iter().any(|arg| {
                let named = matches!(&arg.kind, ExpressionKind::Identifier(n) if n == name);
                (named && natives::writes_arguments(&callee.name)) || passes(arg, name)
            }),
            ExpressionKind::Binary { lhs, rhs, .. } => passes(lhs, name) || passes(rhs, name),
            ExpressionKind::Unary { operand, .. } => passes(operand, name),
            ExpressionKind::Index { target, index } => passes(target, name) || passes(index, name),
            ExpressionKind::Property { object, .. } => passes(object, name),
            _ => false,
        }
    }

    any_statement(body, &mut |s| match &s.kind {
        StatementKind::Assign { target, value, .. } => {
            matches!(&target.kind, ExpressionKind::Identifier(n) if n == name)
                || passes(target, name)
                || passes(value, name)
        }
        StatementKind::Let { value, .. } => value.as_ref().is_some_and(|v| passes(v, name)),
        StatementKind::Expression(expr) => passes(expr, name),
        StatementKind::If { condition, .. } | StatementKind::While { condition, .. } => {
            passes(condition, name)
        }
        StatementKind::For { condition, .. } => {
            condition.as_ref().is_some_and(|c| passes(c, name))
        }
        StatementKind::Range { start, end, .. } => passes(start, name) || passes(end, name),
        StatementKind::Return(value) => value.as_ref().is_some_and(|v| passes(v, name)),
        _ => false,
    })
}
