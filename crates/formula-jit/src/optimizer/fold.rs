//! Constant sub-expression recognition.
//!
//! Bottom-up fold of any subtree that references no runtime variables.
//! Operator-only constant subtrees (sign, arithmetic, comparisons, logical
//! operators) collapse to a bare literal at compile time. Maximal constant
//! subtrees that involve a function call, an aggregate, or `^` become
//! *calculated constants*: they are emitted into a one-shot command sequence
//! and referenced by slot, so the transcendental work runs once per
//! evaluation instead of once per occurrence.

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::{FALSE_VALUE, TRUE_VALUE};

/// Output of the folding pass: the rewritten tree plus the extracted
/// calculated-constant subtrees, index-aligned with [`Expr::CalcConst`].
pub struct FoldOutcome {
    pub expr: Expr,
    pub calc: Vec<Expr>,
}

enum Folded {
    /// Subtree references runtime variables; kept as rewritten.
    Dynamic(Expr),
    /// Subtree collapsed to a literal value.
    Literal(f64),
    /// Subtree is constant but still requires one-time computation.
    Computed(Expr),
}

impl Folded {
    fn is_constant(&self) -> bool {
        !matches!(self, Folded::Dynamic(_))
    }

    /// Reassemble the expression without assigning a slot. Only used while
    /// the subtree is still being absorbed by a constant ancestor.
    fn into_expr(self) -> Expr {
        match self {
            Folded::Dynamic(e) | Folded::Computed(e) => e,
            Folded::Literal(v) => Expr::Number(v),
        }
    }
}

pub fn fold(expr: Expr) -> FoldOutcome {
    let mut calc = Vec::new();
    let folded = fold_node(expr, &mut calc);
    let expr = finalize(folded, &mut calc);
    FoldOutcome { expr, calc }
}

/// A maximal scalar `Computed` subtree gets a calculated-constant slot;
/// everything else is embedded directly. Calculated-constant slots hold
/// scalars, so a constant vector literal is embedded as a tree and only its
/// computed scalar elements get slots; the emitter pools its literal
/// elements as a vector constant.
fn finalize(folded: Folded, calc: &mut Vec<Expr>) -> Expr {
    match folded {
        Folded::Dynamic(e) => e,
        Folded::Literal(v) => Expr::Number(v),
        Folded::Computed(e) => {
            if e.is_vector() {
                return finalize_vector(e, calc);
            }
            let slot = calc.len();
            calc.push(e);
            Expr::CalcConst(slot)
        }
    }
}

/// Embed a constant vector literal, assigning slots to its const-computed
/// scalar elements.
fn finalize_vector(expr: Expr, calc: &mut Vec<Expr>) -> Expr {
    match expr {
        Expr::Vector(items) => Expr::Vector(
            items
                .into_iter()
                .map(|item| match item {
                    Expr::Number(_) => item,
                    nested if nested.is_vector() => finalize_vector(nested, calc),
                    computed => finalize(Folded::Computed(computed), calc),
                })
                .collect(),
        ),
        other => other,
    }
}

fn fold_node(expr: Expr, calc: &mut Vec<Expr>) -> Folded {
    match expr {
        Expr::Number(v) => Folded::Literal(v),
        Expr::ScalarVar(_) | Expr::VectorVar(_) => Folded::Dynamic(expr),
        // Folding runs before dedup, so reference nodes normally do not
        // occur here; keep them dynamic if they ever do.
        Expr::CalcConst(_) | Expr::SubtermRef(_) | Expr::VectorRef { .. } => Folded::Dynamic(expr),
        Expr::Unary { op, expr } => {
            let inner = fold_node(*expr, calc);
            match (op, inner) {
                (UnaryOp::Neg, Folded::Literal(v)) => Folded::Literal(-v),
                (UnaryOp::Not, Folded::Literal(v)) => Folded::Literal(logical_not(v)),
                (op, Folded::Computed(e)) => Folded::Computed(Expr::Unary {
                    op,
                    expr: Box::new(e),
                }),
                (op, Folded::Dynamic(e)) => Folded::Dynamic(Expr::Unary {
                    op,
                    expr: Box::new(e),
                }),
            }
        }
        Expr::Binary { op, left, right } => {
            let l = fold_node(*left, calc);
            let r = fold_node(*right, calc);
            if let (Folded::Literal(a), Folded::Literal(b)) = (&l, &r) {
                // `^` stays a runtime computation, like the function calls
                // it usually accompanies.
                if op != BinaryOp::Pow {
                    return Folded::Literal(apply_literal(op, *a, *b));
                }
            }
            if l.is_constant() && r.is_constant() {
                return Folded::Computed(Expr::Binary {
                    op,
                    left: Box::new(l.into_expr()),
                    right: Box::new(r.into_expr()),
                });
            }
            Folded::Dynamic(Expr::Binary {
                op,
                left: Box::new(finalize(l, calc)),
                right: Box::new(finalize(r, calc)),
            })
        }
        Expr::Call { func, args } => {
            let folded: Vec<Folded> = args.into_iter().map(|a| fold_node(a, calc)).collect();
            if folded.iter().all(Folded::is_constant) {
                Folded::Computed(Expr::Call {
                    func,
                    args: folded.into_iter().map(Folded::into_expr).collect(),
                })
            } else {
                Folded::Dynamic(Expr::Call {
                    func,
                    args: folded.into_iter().map(|f| finalize(f, calc)).collect(),
                })
            }
        }
        Expr::Aggregate { func, vector, args } => {
            let v = fold_node(*vector, calc);
            let folded: Vec<Folded> = args.into_iter().map(|a| fold_node(a, calc)).collect();
            if v.is_constant() && folded.iter().all(Folded::is_constant) {
                Folded::Computed(Expr::Aggregate {
                    func,
                    vector: Box::new(v.into_expr()),
                    args: folded.into_iter().map(Folded::into_expr).collect(),
                })
            } else {
                Folded::Dynamic(Expr::Aggregate {
                    func,
                    vector: Box::new(finalize(v, calc)),
                    args: folded.into_iter().map(|f| finalize(f, calc)).collect(),
                })
            }
        }
        Expr::Vector(items) => {
            let folded: Vec<Folded> = items.into_iter().map(|i| fold_node(i, calc)).collect();
            if folded.iter().all(Folded::is_constant) {
                // A constant vector literal stays a literal tree. The
                // emitter pools all-literal vectors as vector constants, so
                // there is nothing to precompute unless an element needs
                // one-time work.
                Folded::Computed(Expr::Vector(
                    folded.into_iter().map(Folded::into_expr).collect(),
                ))
            } else {
                Folded::Dynamic(Expr::Vector(
                    folded.into_iter().map(|f| finalize(f, calc)).collect(),
                ))
            }
        }
        Expr::If {
            cond,
            then,
            otherwise,
        } => {
            let c = fold_node(*cond, calc);
            let t = fold_node(*then, calc);
            let o = fold_node(*otherwise, calc);
            if c.is_constant() && t.is_constant() && o.is_constant() {
                if let (Folded::Literal(cv), Folded::Literal(tv), Folded::Literal(ov)) =
                    (&c, &t, &o)
                {
                    return Folded::Literal(if *cv == FALSE_VALUE { *ov } else { *tv });
                }
                return Folded::Computed(Expr::If {
                    cond: Box::new(c.into_expr()),
                    then: Box::new(t.into_expr()),
                    otherwise: Box::new(o.into_expr()),
                });
            }
            Folded::Dynamic(Expr::If {
                cond: Box::new(finalize(c, calc)),
                then: Box::new(finalize(t, calc)),
                otherwise: Box::new(finalize(o, calc)),
            })
        }
    }
}

fn logical_not(v: f64) -> f64 {
    if v == FALSE_VALUE {
        TRUE_VALUE
    } else {
        FALSE_VALUE
    }
}

pub(crate) fn apply_literal(op: BinaryOp, a: f64, b: f64) -> f64 {
    let to_bool = |v: f64| v != FALSE_VALUE;
    let from_bool = |v: bool| if v { TRUE_VALUE } else { FALSE_VALUE };
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Pow => a.powf(b),
        BinaryOp::Eq => from_bool(a == b),
        BinaryOp::Lt => from_bool(a < b),
        BinaryOp::Le => from_bool(a <= b),
        BinaryOp::Gt => from_bool(a > b),
        BinaryOp::Ge => from_bool(a >= b),
        BinaryOp::And => from_bool(to_bool(a) && to_bool(b)),
        BinaryOp::Or => from_bool(to_bool(a) || to_bool(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn bin(op: BinaryOp, l: Expr, r: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(l),
            right: Box::new(r),
        }
    }

    #[test]
    fn literal_arithmetic_collapses() {
        let out = fold(bin(
            BinaryOp::Add,
            Expr::Number(2.0),
            bin(BinaryOp::Mul, Expr::Number(3.0), Expr::Number(4.0)),
        ));
        assert_eq!(out.expr, Expr::Number(14.0));
        assert!(out.calc.is_empty());
    }

    #[test]
    fn function_on_constants_becomes_calculated() {
        // exp(pi/2): the division folds, the call is deferred to a
        // calculated-constant slot.
        let out = fold(Expr::Call {
            func: crate::ast::Func::Exp,
            args: vec![bin(
                BinaryOp::Div,
                Expr::Number(std::f64::consts::PI),
                Expr::Number(2.0),
            )],
        });
        assert_eq!(out.expr, Expr::CalcConst(0));
        assert_eq!(
            out.calc,
            vec![Expr::Call {
                func: crate::ast::Func::Exp,
                args: vec![Expr::Number(std::f64::consts::PI / 2.0)],
            }]
        );
    }

    #[test]
    fn constant_subtree_under_dynamic_parent_is_maximal() {
        // x0 + 2*exp(1): the whole right side is one calculated constant.
        let rhs = bin(
            BinaryOp::Mul,
            Expr::Number(2.0),
            Expr::Call {
                func: crate::ast::Func::Exp,
                args: vec![Expr::Number(1.0)],
            },
        );
        let out = fold(bin(BinaryOp::Add, Expr::ScalarVar(0), rhs));
        assert_eq!(out.calc.len(), 1);
        let Expr::Binary { right, .. } = out.expr else {
            panic!("expected binary root");
        };
        assert_eq!(*right, Expr::CalcConst(0));
    }

    #[test]
    fn dynamic_subtrees_are_untouched() {
        let e = bin(BinaryOp::Add, Expr::ScalarVar(0), Expr::Number(1.0));
        let out = fold(e.clone());
        assert_eq!(out.expr, e);
        assert!(out.calc.is_empty());
    }

    #[test]
    fn constant_conditional_folds_to_branch() {
        let out = fold(Expr::If {
            cond: Box::new(bin(BinaryOp::Lt, Expr::Number(1.0), Expr::Number(2.0))),
            then: Box::new(Expr::Number(10.0)),
            otherwise: Box::new(Expr::Number(20.0)),
        });
        assert_eq!(out.expr, Expr::Number(10.0));
    }
}
