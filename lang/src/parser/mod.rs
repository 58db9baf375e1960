use itertools::Itertools;
use pest::{
    iterators::{Pair, Pairs},
    pratt_parser::{Assoc, Op, PrattParser},
    Parser,
};
use pest_derive::Parser;

use crate::{
    ast::{
        BinaryOp, Expression, ExpressionKind, FunctionDecl, Identifier, Param, Program, Statement,
        StatementKind, UnaryOp,
    },
    error::{Error, ErrorKind},
    source::{FileIndex, FileSpan, Sources},
    types::Type,
};

#[derive(Parser)]
#[grammar = "parser/mlogc.pest"]
struct MlogcParser;

pub fn parse(sources: &Sources, file_idx: FileIndex) -> Result<Program, Error> {
    let source = &sources.files[file_idx].source;
    let mut pairs =
        MlogcParser::parse(Rule::program, source).map_err(|e| syntax_error(file_idx, e))?;
    let program = pairs.next().unwrap();
    Factory::new(file_idx).program(program)
}

fn syntax_error(file_idx: FileIndex, e: pest::error::Error<Rule>) -> Error {
    let (start, end) = match e.location {
        pest::error::InputLocation::Pos(pos) => (pos, pos),
        pest::error::InputLocation::Span(span) => span,
    };
    ErrorKind::Syntax(e.variant.message().into_owned()).at(FileSpan {
        file_idx,
        start,
        end,
    })
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_fn
            | Rule::kw_let
            | Rule::kw_const
            | Rule::kw_if
            | Rule::kw_else
            | Rule::kw_while
            | Rule::kw_for
            | Rule::kw_in
            | Rule::kw_break
            | Rule::kw_continue
            | Rule::kw_return
    )
}

/// Inner pairs of `p`, without keyword tokens.
fn children(p: Pair<Rule>) -> Vec<Pair<Rule>> {
    p.into_inner().filter(|p| !is_keyword(p.as_rule())).collect()
}

struct Factory {
    file_idx: FileIndex,
    pratt: PrattParser<Rule>,
}

impl Factory {
    fn new(file_idx: FileIndex) -> Self {
        let pratt = PrattParser::new()
            .op(Op::infix(Rule::op_or, Assoc::Left))
            .op(Op::infix(Rule::op_land, Assoc::Left))
            .op(Op::infix(Rule::op_bor, Assoc::Left))
            .op(Op::infix(Rule::op_xor, Assoc::Left))
            .op(Op::infix(Rule::op_band, Assoc::Left))
            .op(Op::infix(Rule::op_eq, Assoc::Left)
                | Op::infix(Rule::op_ne, Assoc::Left)
                | Op::infix(Rule::op_strict_eq, Assoc::Left))
            .op(Op::infix(Rule::op_lt, Assoc::Left)
                | Op::infix(Rule::op_le, Assoc::Left)
                | Op::infix(Rule::op_gt, Assoc::Left)
                | Op::infix(Rule::op_ge, Assoc::Left))
            .op(Op::infix(Rule::op_shl, Assoc::Left) | Op::infix(Rule::op_shr, Assoc::Left))
            .op(Op::infix(Rule::op_add, Assoc::Left) | Op::infix(Rule::op_sub, Assoc::Left))
            .op(Op::infix(Rule::op_mul, Assoc::Left)
                | Op::infix(Rule::op_div, Assoc::Left)
                | Op::infix(Rule::op_idiv, Assoc::Left)
                | Op::infix(Rule::op_mod, Assoc::Left))
            .op(Op::prefix(Rule::op_neg) | Op::prefix(Rule::op_not) | Op::prefix(Rule::op_bnot))
            .op(Op::infix(Rule::op_pow, Assoc::Right))
            .op(Op::postfix(Rule::index) | Op::postfix(Rule::property));
        Self { file_idx, pratt }
    }

    fn span(&self, p: &Pair<Rule>) -> FileSpan {
        FileSpan::from_ast(self.file_idx, p.as_span())
    }

    fn program(&self, p: Pair<Rule>) -> Result<Program, Error> {
        assert_eq!(p.as_rule(), Rule::program);
        let statements: Result<Vec<Statement>, Error> = p
            .into_inner()
            .filter(|p| p.as_rule() == Rule::statement)
            .map(|p| self.statement(p))
            .collect();
        Ok(Program {
            statements: statements?,
        })
    }

    fn block(&self, p: Pair<Rule>) -> Result<Vec<Statement>, Error> {
        assert_eq!(p.as_rule(), Rule::block);
        p.into_inner().map(|p| self.statement(p)).collect()
    }

    fn statement(&self, p: Pair<Rule>) -> Result<Statement, Error> {
        assert_eq!(p.as_rule(), Rule::statement);
        let inner = p.into_inner().exactly_one().unwrap();
        self.statement_inner(inner)
    }

    fn statement_inner(&self, p: Pair<Rule>) -> Result<Statement, Error> {
        let span = self.span(&p);
        let kind = match p.as_rule() {
            Rule::fn_decl => StatementKind::Function(self.fn_decl(p)?),
            Rule::let_decl => self.let_decl(p, false)?,
            Rule::const_decl => self.let_decl(p, true)?,
            Rule::if_stmt => self.if_stmt(p)?,
            Rule::while_stmt => {
                let (condition, body) = children(p).into_iter().collect_tuple().unwrap();
                StatementKind::While {
                    condition: self.expr(condition)?,
                    body: self.block(body)?,
                }
            }
            Rule::range_stmt => {
                let (var, start, end, body) = children(p).into_iter().collect_tuple().unwrap();
                StatementKind::Range {
                    var: self.identifier(var),
                    start: self.expr(start)?,
                    end: self.expr(end)?,
                    body: self.block(body)?,
                }
            }
            Rule::for_stmt => self.for_stmt(p)?,
            Rule::break_stmt => StatementKind::Break,
            Rule::continue_stmt => StatementKind::Continue,
            Rule::return_stmt => {
                let value = children(p).into_iter().next().map(|e| self.expr(e)).transpose()?;
                StatementKind::Return(value)
            }
            Rule::assign_stmt => self.assign_stmt(p)?,
            Rule::expr_stmt => {
                StatementKind::Expression(self.expr(p.into_inner().exactly_one().unwrap())?)
            }
            rule => panic!("invalid statement: {:?}", rule),
        };
        Ok(Statement { span, kind })
    }

    fn fn_decl(&self, p: Pair<Rule>) -> Result<FunctionDecl, Error> {
        assert_eq!(p.as_rule(), Rule::fn_decl);
        let mut name = None;
        let mut params = vec![];
        let mut ret = None;
        let mut body = vec![];
        for pair in children(p) {
            match pair.as_rule() {
                Rule::identifier => name = Some(self.identifier(pair)),
                Rule::params => {
                    for param in pair.into_inner() {
                        let mut inner = param.into_inner();
                        let name = self.identifier(inner.next().unwrap());
                        let ty = inner.next().map(|t| self.type_expr(t)).transpose()?;
                        params.push(Param { name, ty });
                    }
                }
                Rule::ret_type => {
                    ret = Some(self.type_expr(pair.into_inner().exactly_one().unwrap())?)
                }
                Rule::block => body = self.block(pair)?,
                rule => panic!("invalid function item: {:?}", rule),
            }
        }
        Ok(FunctionDecl {
            name: name.unwrap(),
            params,
            ret,
            body,
        })
    }

    fn let_decl(&self, p: Pair<Rule>, constant: bool) -> Result<StatementKind, Error> {
        let mut name = None;
        let mut ty = None;
        let mut value = None;
        for pair in children(p) {
            match pair.as_rule() {
                Rule::identifier => name = Some(self.identifier(pair)),
                Rule::type_expr => ty = Some(self.type_expr(pair)?),
                Rule::expr => value = Some(self.expr(pair)?),
                rule => panic!("invalid declaration item: {:?}", rule),
            }
        }
        Ok(StatementKind::Let {
            name: name.unwrap(),
            ty,
            value,
            constant,
        })
    }

    fn if_stmt(&self, p: Pair<Rule>) -> Result<StatementKind, Error> {
        assert_eq!(p.as_rule(), Rule::if_stmt);
        let mut pairs = children(p).into_iter();
        let condition = self.expr(pairs.next().unwrap())?;
        let then = self.block(pairs.next().unwrap())?;
        let otherwise = match pairs.next() {
            None => None,
            Some(else_clause) => {
                let inner = children(else_clause).into_iter().exactly_one().unwrap();
                match inner.as_rule() {
                    Rule::block => Some(self.block(inner)?),
                    Rule::if_stmt => Some(vec![self.statement_inner(inner)?]),
                    rule => panic!("invalid else clause: {:?}", rule),
                }
            }
        };
        Ok(StatementKind::If {
            condition,
            then,
            otherwise,
        })
    }

    fn for_stmt(&self, p: Pair<Rule>) -> Result<StatementKind, Error> {
        let (init, cond, step, body) = children(p).into_iter().collect_tuple().unwrap();
        let init = init
            .into_inner()
            .next()
            .map(|s| self.statement_inner(s))
            .transpose()?;
        let condition = cond.into_inner().next().map(|e| self.expr(e)).transpose()?;
        let step = step
            .into_inner()
            .next()
            .map(|s| self.statement_inner(s))
            .transpose()?;
        Ok(StatementKind::For {
            init: init.map(Box::new),
            condition,
            step: step.map(Box::new),
            body: self.block(body)?,
        })
    }

    fn assign_stmt(&self, p: Pair<Rule>) -> Result<StatementKind, Error> {
        let (target, op, value) = p.into_inner().collect_tuple().unwrap();
        let target_span = self.span(&target);
        let target = self.parse_expr(target.into_inner())?;
        if !matches!(
            target.kind,
            ExpressionKind::Identifier(_)
                | ExpressionKind::Index { .. }
                | ExpressionKind::Property { .. }
        ) {
            return Err(ErrorKind::Syntax("invalid assignment target".to_owned()).at(target_span));
        }
        let op = match op.as_str() {
            "=" => None,
            "+=" => Some(BinaryOp::Add),
            "-=" => Some(BinaryOp::Sub),
            "*=" => Some(BinaryOp::Mul),
            "/=" => Some(BinaryOp::Div),
            "//=" => Some(BinaryOp::Idiv),
            "%=" => Some(BinaryOp::Mod),
            "**=" => Some(BinaryOp::Pow),
            "&=" => Some(BinaryOp::BitAnd),
            "|=" => Some(BinaryOp::BitOr),
            "^=" => Some(BinaryOp::Xor),
            "<<=" => Some(BinaryOp::Shl),
            ">>=" => Some(BinaryOp::Shr),
            other => panic!("invalid assignment operator: {}", other),
        };
        Ok(StatementKind::Assign {
            target,
            op,
            value: self.expr(value)?,
        })
    }

    fn identifier(&self, p: Pair<Rule>) -> Identifier {
        assert_eq!(p.as_rule(), Rule::identifier);
        Identifier {
            span: self.span(&p),
            name: p.as_str().to_owned(),
        }
    }

    fn type_expr(&self, p: Pair<Rule>) -> Result<Type, Error> {
        assert_eq!(p.as_rule(), Rule::type_expr);
        let mut ty: Option<Type> = None;
        for name in p.into_inner() {
            let Some(t) = Type::from_name(name.as_str()) else {
                return Err(
                    ErrorKind::Syntax(format!("unknown type {:?}", name.as_str())).at(self.span(&name)),
                );
            };
            ty = Some(ty.map_or(t, |acc| acc | t));
        }
        Ok(ty.unwrap())
    }

    fn expr(&self, p: Pair<Rule>) -> Result<Expression, Error> {
        assert_eq!(p.as_rule(), Rule::expr);
        self.parse_expr(p.into_inner())
    }

    fn parse_expr(&self, pairs: Pairs<Rule>) -> Result<Expression, Error> {
        self.pratt
            .map_primary(|p| self.primary(p))
            .map_prefix(|op, operand| {
                let operand = operand?;
                let op_span = self.span(&op);
                let op = match op.as_rule() {
                    Rule::op_neg => UnaryOp::Neg,
                    Rule::op_not => UnaryOp::Not,
                    Rule::op_bnot => UnaryOp::BitNot,
                    rule => panic!("invalid prefix operator: {:?}", rule),
                };
                Ok(Expression {
                    span: join(op_span, operand.span),
                    kind: ExpressionKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                })
            })
            .map_infix(|lhs, op, rhs| {
                let (lhs, rhs) = (lhs?, rhs?);
                let op = match op.as_rule() {
                    Rule::op_or => BinaryOp::LogicalOr,
                    Rule::op_land => BinaryOp::LogicalAnd,
                    Rule::op_bor => BinaryOp::BitOr,
                    Rule::op_xor => BinaryOp::Xor,
                    Rule::op_band => BinaryOp::BitAnd,
                    Rule::op_eq => BinaryOp::Eq,
                    Rule::op_ne => BinaryOp::Ne,
                    Rule::op_strict_eq => BinaryOp::StrictEq,
                    Rule::op_lt => BinaryOp::Lt,
                    Rule::op_le => BinaryOp::Le,
                    Rule::op_gt => BinaryOp::Gt,
                    Rule::op_ge => BinaryOp::Ge,
                    Rule::op_shl => BinaryOp::Shl,
                    Rule::op_shr => BinaryOp::Shr,
                    Rule::op_add => BinaryOp::Add,
                    Rule::op_sub => BinaryOp::Sub,
                    Rule::op_mul => BinaryOp::Mul,
                    Rule::op_div => BinaryOp::Div,
                    Rule::op_idiv => BinaryOp::Idiv,
                    Rule::op_mod => BinaryOp::Mod,
                    Rule::op_pow => BinaryOp::Pow,
                    rule => panic!("invalid infix operator: {:?}", rule),
                };
                Ok(Expression {
                    span: join(lhs.span, rhs.span),
                    kind: ExpressionKind::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                })
            })
            .map_postfix(|lhs, op| {
                let lhs = lhs?;
                let span = join(lhs.span, self.span(&op));
                let kind = match op.as_rule() {
                    Rule::index => ExpressionKind::Index {
                        target: Box::new(lhs),
                        index: Box::new(self.expr(op.into_inner().exactly_one().unwrap())?),
                    },
                    Rule::property => ExpressionKind::Property {
                        object: Box::new(lhs),
                        property: self.identifier(op.into_inner().exactly_one().unwrap()),
                    },
                    rule => panic!("invalid postfix operator: {:?}", rule),
                };
                Ok(Expression { span, kind })
            })
            .parse(pairs)
    }

    fn primary(&self, p: Pair<Rule>) -> Result<Expression, Error> {
        let span = self.span(&p);
        let kind = match p.as_rule() {
            Rule::expr => return self.expr(p),
            Rule::call => {
                let (name, args) = p.into_inner().collect_tuple().unwrap();
                let args: Result<Vec<Expression>, Error> =
                    args.into_inner().map(|a| self.expr(a)).collect();
                ExpressionKind::Call {
                    name: self.identifier(name),
                    args: args?,
                }
            }
            Rule::number => ExpressionKind::Number(parse_number(p.as_str()).ok_or_else(|| {
                ErrorKind::Syntax(format!("invalid number {:?}", p.as_str())).at(span)
            })?),
            Rule::string => {
                let s = p.as_str();
                ExpressionKind::String(s[1..s.len() - 1].to_owned())
            }
            Rule::null_lit => ExpressionKind::Null,
            Rule::true_lit => ExpressionKind::Number(1.0),
            Rule::false_lit => ExpressionKind::Number(0.0),
            Rule::identifier | Rule::builtin_var => ExpressionKind::Identifier(p.as_str().to_owned()),
            rule => panic!("invalid primary expression: {:?}", rule),
        };
        Ok(Expression { span, kind })
    }
}

fn join(a: FileSpan, b: FileSpan) -> FileSpan {
    FileSpan {
        file_idx: a.file_idx,
        start: a.start.min(b.start),
        end: a.end.max(b.end),
    }
}

fn parse_number(text: &str) -> Option<f64> {
    if let Some(hex) = text.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok().map(|n| n as f64)
    } else if let Some(bin) = text.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).ok().map(|n| n as f64)
    } else {
        text.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(src: &str) -> Result<Program, Error> {
        let mut sources = Sources::default();
        let file_idx = sources.add("test.mlc", src);
        parse(&sources, file_idx)
    }

    #[test]
    fn parses_statements_without_separators() {
        let program = parse_str("x = 1\nwhile (x < 3) { x += 1 }\nprint(x)").unwrap();
        assert_eq!(program.statements.len(), 3);
        assert!(matches!(
            program.statements[0].kind,
            StatementKind::Assign { op: None, .. }
        ));
        let StatementKind::While { body, .. } = &program.statements[1].kind else {
            panic!("expected while loop");
        };
        assert!(matches!(
            body[0].kind,
            StatementKind::Assign {
                op: Some(BinaryOp::Add),
                ..
            }
        ));
        assert!(matches!(
            program.statements[2].kind,
            StatementKind::Expression(Expression {
                kind: ExpressionKind::Call { .. },
                ..
            })
        ));
    }

    #[test]
    fn operator_precedence() {
        let program = parse_str("y = 1 + 2 * 3 ** 2").unwrap();
        let StatementKind::Assign { value, .. } = &program.statements[0].kind else {
            panic!("expected assignment");
        };
        let ExpressionKind::Binary { op, rhs, .. } = &value.kind else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinaryOp::Add);
        let ExpressionKind::Binary { op, rhs, .. } = &rhs.kind else {
            panic!("expected product");
        };
        assert_eq!(*op, BinaryOp::Mul);
        assert!(matches!(
            rhs.kind,
            ExpressionKind::Binary {
                op: BinaryOp::Pow,
                ..
            }
        ));
    }

    #[test]
    fn keywords_are_not_identifier_prefixes() {
        let program = parse_str("letter = 1\nreturned = letter\nformat = 2").unwrap();
        assert_eq!(program.statements.len(), 3);
        for statement in &program.statements {
            assert!(matches!(statement.kind, StatementKind::Assign { .. }));
        }
    }

    #[test]
    fn functions_ranges_and_types() {
        let src = r#"
            fn add(a: num, b: num | null) -> num {
                return a + b
            }
            for i in 0..4 { cell1[i] = add(i, 1) }
            for (let j = 0; j < 2; j += 1) { switch1.enabled = j }
            if (@unit === null) { print("none") } else if (1) { end() } else { wait(1) }
        "#;
        let program = parse_str(src).unwrap();
        assert_eq!(program.statements.len(), 4);
        let StatementKind::Function(decl) = &program.statements[0].kind else {
            panic!("expected function");
        };
        assert_eq!(decl.name.name, "add");
        assert_eq!(decl.params[1].ty, Some(Type::NUM | Type::NULL));
        assert_eq!(decl.ret, Some(Type::NUM));
        assert!(matches!(program.statements[1].kind, StatementKind::Range { .. }));
        assert!(matches!(program.statements[2].kind, StatementKind::For { .. }));
        let StatementKind::If { otherwise, .. } = &program.statements[3].kind else {
            panic!("expected if");
        };
        assert!(matches!(
            otherwise.as_ref().unwrap()[0].kind,
            StatementKind::If { .. }
        ));
    }

    #[test]
    fn numbers() {
        assert_eq!(parse_number("0x1F"), Some(31.0));
        assert_eq!(parse_number("0b101"), Some(5.0));
        assert_eq!(parse_number("1.5e2"), Some(150.0));
    }

    #[test]
    fn syntax_errors_carry_a_span() {
        let err = parse_str("x = (1 +").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Syntax(_)));
        assert!(err.span.is_some());
    }

    #[test]
    fn rejects_unknown_types_and_bad_targets() {
        let err = parse_str("let x: float = 1").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Syntax(_)));
        let err = parse_str("1 + 2 = 3").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Syntax(_)));
    }
}
