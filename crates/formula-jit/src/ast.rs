//! Expression tree produced by the parser and transformed by the optimizer
//! passes.
//!
//! Every pass consumes the tree through exhaustive matches, so adding a node
//! kind forces each of fold/dedup/emit to handle it.

use std::hash::{Hash, Hasher};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
            BinaryOp::Eq => "=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }

    /// Comparison and logical operators yield the boolean sentinels.
    pub fn is_boolean(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::And
                | BinaryOp::Or
        )
    }
}

/// Built-in scalar functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Func {
    Exp,
    Ln,
    Log,
    Sin,
    Cos,
    Sqrt,
}

impl Func {
    /// Case-insensitive lookup against the fixed function table.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "exp" => Some(Func::Exp),
            "ln" => Some(Func::Ln),
            "log" => Some(Func::Log),
            "sin" => Some(Func::Sin),
            "cos" => Some(Func::Cos),
            "sqrt" => Some(Func::Sqrt),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Func::Exp => "exp",
            Func::Ln => "ln",
            Func::Log => "log",
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Sqrt => "sqrt",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Func::Log => 2,
            _ => 1,
        }
    }

    pub fn id(self) -> u32 {
        match self {
            Func::Exp => 0,
            Func::Ln => 1,
            Func::Log => 2,
            Func::Sin => 3,
            Func::Cos => 4,
            Func::Sqrt => 5,
        }
    }

    pub fn from_id(id: u32) -> Self {
        match id {
            0 => Func::Exp,
            1 => Func::Ln,
            2 => Func::Log,
            3 => Func::Sin,
            4 => Func::Cos,
            5 => Func::Sqrt,
            _ => unreachable!("invalid function id"),
        }
    }
}

/// Built-in vector aggregates. The first argument is vector-typed; `SubTotal`
/// additionally takes two scalar bound expressions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggFunc {
    Mean,
    Sum,
    Count,
    SubTotal,
}

impl AggFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "mean" => Some(AggFunc::Mean),
            "sum" => Some(AggFunc::Sum),
            "count" => Some(AggFunc::Count),
            "subtotal" => Some(AggFunc::SubTotal),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AggFunc::Mean => "mean",
            AggFunc::Sum => "sum",
            AggFunc::Count => "count",
            AggFunc::SubTotal => "subTotal",
        }
    }

    /// Total argument count, including the vector argument.
    pub fn arity(self) -> usize {
        match self {
            AggFunc::SubTotal => 3,
            _ => 1,
        }
    }

    pub fn id(self) -> u32 {
        match self {
            AggFunc::Mean => 0,
            AggFunc::Sum => 1,
            AggFunc::Count => 2,
            AggFunc::SubTotal => 3,
        }
    }

    pub fn from_id(id: u32) -> Self {
        match id {
            0 => AggFunc::Mean,
            1 => AggFunc::Sum,
            2 => AggFunc::Count,
            3 => AggFunc::SubTotal,
            _ => unreachable!("invalid aggregate id"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f64),
    /// Runtime scalar argument slot `n` (`X<n>`).
    ScalarVar(usize),
    /// Runtime vector argument slot `n` (`X<n>{}`).
    VectorVar(usize),
    /// Inline vector literal. Elements are scalar expressions or nested
    /// vector-typed expressions; aggregates see the flattened stream.
    Vector(Vec<Expr>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        func: Func,
        args: Vec<Expr>,
    },
    Aggregate {
        func: AggFunc,
        vector: Box<Expr>,
        /// `subTotal` bound expressions; empty for the unary aggregates.
        args: Vec<Expr>,
    },
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// Reference to a calculated constant produced by the folding pass.
    CalcConst(usize),
    /// Reference to a scalar-valued cache slot filled by an extracted
    /// subterm sequence (including extracted aggregates).
    SubtermRef(usize),
    /// Reference to a vector-valued cache slot filled by an extracted
    /// vector-term sequence.
    VectorRef(usize),
}

impl Expr {
    /// Whether this node produces a vector value.
    pub fn is_vector(&self) -> bool {
        match self {
            Expr::VectorVar(_) | Expr::Vector(_) | Expr::VectorRef(_) => true,
            _ => false,
        }
    }

    /// Whether any node in this subtree touches vector machinery (vector
    /// variables, literals, or aggregates).
    pub fn contains_vector(&self) -> bool {
        match self {
            Expr::VectorVar(_) | Expr::Vector(_) | Expr::Aggregate { .. } => true,
            Expr::Number(_)
            | Expr::ScalarVar(_)
            | Expr::CalcConst(_)
            | Expr::SubtermRef(_)
            | Expr::VectorRef(_) => false,
            Expr::Unary { expr, .. } => expr.contains_vector(),
            Expr::Binary { left, right, .. } => left.contains_vector() || right.contains_vector(),
            Expr::Call { args, .. } => args.iter().any(Expr::contains_vector),
            Expr::If {
                cond,
                then,
                otherwise,
            } => cond.contains_vector() || then.contains_vector() || otherwise.contains_vector(),
        }
    }

    /// Whether this subtree reads any runtime argument.
    pub fn references_variables(&self) -> bool {
        match self {
            Expr::ScalarVar(_) | Expr::VectorVar(_) => true,
            Expr::Number(_) | Expr::CalcConst(_) => false,
            // Extracted subterms stand in for variable-bearing trees.
            Expr::SubtermRef(_) | Expr::VectorRef(_) => true,
            Expr::Vector(items) => items.iter().any(Expr::references_variables),
            Expr::Unary { expr, .. } => expr.references_variables(),
            Expr::Binary { left, right, .. } => {
                left.references_variables() || right.references_variables()
            }
            Expr::Call { args, .. } => args.iter().any(Expr::references_variables),
            Expr::Aggregate { vector, args, .. } => {
                vector.references_variables() || args.iter().any(Expr::references_variables)
            }
            Expr::If {
                cond,
                then,
                otherwise,
            } => {
                cond.references_variables()
                    || then.references_variables()
                    || otherwise.references_variables()
            }
        }
    }

    /// Number of nodes in this subtree. Used to pick maximal repeats first
    /// during subterm extraction.
    pub fn size(&self) -> usize {
        match self {
            Expr::Number(_)
            | Expr::ScalarVar(_)
            | Expr::VectorVar(_)
            | Expr::CalcConst(_)
            | Expr::SubtermRef(_)
            | Expr::VectorRef(_) => 1,
            Expr::Vector(items) => 1 + items.iter().map(Expr::size).sum::<usize>(),
            Expr::Unary { expr, .. } => 1 + expr.size(),
            Expr::Binary { left, right, .. } => 1 + left.size() + right.size(),
            Expr::Call { args, .. } => 1 + args.iter().map(Expr::size).sum::<usize>(),
            Expr::Aggregate { vector, args, .. } => {
                1 + vector.size() + args.iter().map(Expr::size).sum::<usize>()
            }
            Expr::If {
                cond,
                then,
                otherwise,
            } => 1 + cond.size() + then.size() + otherwise.size(),
        }
    }

    /// Canonical structural hash: node kind plus recursively hashed children,
    /// order-sensitive. Collisions are resolved by the caller with a full
    /// structural equality check, never by hash alone.
    pub fn structural_hash(&self) -> u64 {
        let mut hasher = ahash::AHasher::default();
        self.hash_into(&mut hasher);
        hasher.finish()
    }

    fn hash_into<H: Hasher>(&self, h: &mut H) {
        match self {
            Expr::Number(n) => {
                0u8.hash(h);
                n.to_bits().hash(h);
            }
            Expr::ScalarVar(i) => {
                1u8.hash(h);
                i.hash(h);
            }
            Expr::VectorVar(i) => {
                2u8.hash(h);
                i.hash(h);
            }
            Expr::Vector(items) => {
                3u8.hash(h);
                items.len().hash(h);
                for item in items {
                    item.hash_into(h);
                }
            }
            Expr::Unary { op, expr } => {
                4u8.hash(h);
                op.hash(h);
                expr.hash_into(h);
            }
            Expr::Binary { op, left, right } => {
                5u8.hash(h);
                op.hash(h);
                left.hash_into(h);
                right.hash_into(h);
            }
            Expr::Call { func, args } => {
                6u8.hash(h);
                func.hash(h);
                for arg in args {
                    arg.hash_into(h);
                }
            }
            Expr::Aggregate { func, vector, args } => {
                7u8.hash(h);
                func.hash(h);
                vector.hash_into(h);
                for arg in args {
                    arg.hash_into(h);
                }
            }
            Expr::If {
                cond,
                then,
                otherwise,
            } => {
                8u8.hash(h);
                cond.hash_into(h);
                then.hash_into(h);
                otherwise.hash_into(h);
            }
            Expr::CalcConst(i) => {
                9u8.hash(h);
                i.hash(h);
            }
            Expr::SubtermRef(i) => {
                10u8.hash(h);
                i.hash(h);
            }
            Expr::VectorRef(i) => {
                11u8.hash(h);
                i.hash(h);
            }
        }
    }
}
