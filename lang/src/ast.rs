use crate::{instruction::Operator, source::FileSpan, types::Type};

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub name: String,
    pub span: FileSpan,
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub span: FileSpan,
    pub kind: StatementKind,
}

#[derive(Debug, Clone)]
pub enum StatementKind {
    Let {
        name: Identifier,
        ty: Option<Type>,
        value: Option<Expression>,
        constant: bool,
    },
    /// `target = value`, or `target op= value` when `op` is set.
    Assign {
        target: Expression,
        op: Option<BinaryOp>,
        value: Expression,
    },
    Expression(Expression),
    If {
        condition: Expression,
        then: Vec<Statement>,
        otherwise: Option<Vec<Statement>>,
    },
    While {
        condition: Expression,
        body: Vec<Statement>,
    },
    For {
        init: Option<Box<Statement>>,
        condition: Option<Expression>,
        step: Option<Box<Statement>>,
        body: Vec<Statement>,
    },
    /// `for var in start..end`, end exclusive.
    Range {
        var: Identifier,
        start: Expression,
        end: Expression,
        body: Vec<Statement>,
    },
    Function(FunctionDecl),
    Break,
    Continue,
    Return(Option<Expression>),
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: Identifier,
    pub params: Vec<Param>,
    pub ret: Option<Type>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: Identifier,
    pub ty: Option<Type>,
}

#[derive(Debug, Clone)]
pub struct Expression {
    pub span: FileSpan,
    pub kind: ExpressionKind,
}

#[derive(Debug, Clone)]
pub enum ExpressionKind {
    Number(f64),
    String(String),
    Null,
    /// Plain names as well as `@`-prefixed builtins.
    Identifier(String),
    Binary {
        op: BinaryOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Call {
        name: Identifier,
        args: Vec<Expression>,
    },
    Index {
        target: Box<Expression>,
        index: Box<Expression>,
    },
    Property {
        object: Box<Expression>,
        property: Identifier,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Idiv,
    Mod,
    Pow,
    Eq,
    Ne,
    StrictEq,
    Lt,
    Le,
    Gt,
    Ge,
    LogicalAnd,
    LogicalOr,
    BitAnd,
    BitOr,
    Xor,
    Shl,
    Shr,
}

impl BinaryOp {
    pub fn operator(self) -> Operator {
        match self {
            BinaryOp::Add => Operator::Add,
            BinaryOp::Sub => Operator::Sub,
            BinaryOp::Mul => Operator::Mul,
            BinaryOp::Div => Operator::Div,
            BinaryOp::Idiv => Operator::Idiv,
            BinaryOp::Mod => Operator::Mod,
            BinaryOp::Pow => Operator::Pow,
            BinaryOp::Eq => Operator::Equal,
            BinaryOp::Ne => Operator::NotEqual,
            BinaryOp::StrictEq => Operator::StrictEqual,
            BinaryOp::Lt => Operator::LessThan,
            BinaryOp::Le => Operator::LessThanEq,
            BinaryOp::Gt => Operator::GreaterThan,
            BinaryOp::Ge => Operator::GreaterThanEq,
            BinaryOp::LogicalAnd => Operator::Land,
            BinaryOp::LogicalOr | BinaryOp::BitOr => Operator::Or,
            BinaryOp::BitAnd => Operator::And,
            BinaryOp::Xor => Operator::Xor,
            BinaryOp::Shl => Operator::Shl,
            BinaryOp::Shr => Operator::Shr,
        }
    }

    /// Operand types the operator accepts.
    pub fn operand_type(self) -> Type {
        match self {
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::StrictEq => Type::ANY,
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => Type::ANY,
            _ => Type::NUM | Type::NULL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}
