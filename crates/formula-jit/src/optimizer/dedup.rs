//! Identical-subterm and identical-vector recognition.
//!
//! Both passes share one extraction engine: subtrees are keyed by a
//! canonical structural hash (operator plus recursively hashed children,
//! order-sensitive), hash collisions are resolved with an explicit
//! structural-equality check, and any composite subtree occurring two or
//! more times is hoisted into its own one-shot sequence.
//!
//! Extraction repeats to a fixpoint, always hoisting the largest repeated
//! subtree first. Occurrences that only exist inside the occurrences of a
//! larger repeat therefore collapse together with it and are not extracted
//! separately, while a repeat that also occurs on its own is still hoisted
//! and referenced from the larger representative. The resulting sequences
//! are ordered so that a later sequence only ever references an earlier
//! cached result.

use crate::ast::Expr;
use ahash::AHashMap;

/// An extracted subterm in evaluation order. Cache slots are assigned per
/// value space in this order, so the n-th scalar-valued sequence fills
/// scalar cache slot n (and likewise for vectors).
pub struct SubtermDef {
    pub expr: Expr,
    pub vector_valued: bool,
    /// True when the vector pass extracted this subterm (vector literals
    /// and aggregates); used for the vector-subterm counter.
    pub from_vector_pass: bool,
}

pub struct DedupOutcome {
    pub expr: Expr,
    pub subterms: Vec<SubtermDef>,
}

/// Run the enabled dedup passes over the tree (excluding its root).
pub fn dedup(expr: Expr, scalar_pass: bool, vector_pass: bool) -> DedupOutcome {
    if !scalar_pass && !vector_pass {
        return DedupOutcome {
            expr,
            subterms: Vec::new(),
        };
    }

    let mut main = expr;
    // Provisional defs, indexed by the ids stored in reference nodes.
    let mut defs: Vec<ProtoDef> = Vec::new();

    loop {
        let Some(best) = best_candidate(&main, &defs, scalar_pass, vector_pass) else {
            break;
        };
        let pid = defs.len();
        let vector_valued = best.is_vector();
        let reference = if vector_valued {
            Expr::VectorRef(pid)
        } else {
            Expr::SubtermRef(pid)
        };
        main = substitute(main, &best, &reference, true);
        for def in &mut defs {
            let tree = std::mem::replace(&mut def.expr, Expr::Number(0.0));
            def.expr = substitute(tree, &best, &reference, true);
        }
        let from_vector_pass = matches_vector_pass(&best);
        defs.push(ProtoDef {
            expr: best,
            vector_valued,
            from_vector_pass,
        });
    }

    // Order sequences so dependencies come first, then assign cache slots
    // per value space in that order.
    let order = topo_order(&defs);
    let mut slot_map = vec![0usize; defs.len()];
    let (mut next_scalar, mut next_vector) = (0usize, 0usize);
    for &pid in &order {
        let slot = if defs[pid].vector_valued {
            let s = next_vector;
            next_vector += 1;
            s
        } else {
            let s = next_scalar;
            next_scalar += 1;
            s
        };
        slot_map[pid] = slot;
    }

    let main = remap_refs(main, &slot_map);
    let subterms = order
        .into_iter()
        .map(|pid| {
            let def = &defs[pid];
            SubtermDef {
                expr: remap_refs(def.expr.clone(), &slot_map),
                vector_valued: def.vector_valued,
                from_vector_pass: def.from_vector_pass,
            }
        })
        .collect();

    DedupOutcome {
        expr: main,
        subterms,
    }
}

struct ProtoDef {
    expr: Expr,
    vector_valued: bool,
    from_vector_pass: bool,
}

fn matches_vector_pass(e: &Expr) -> bool {
    matches!(e, Expr::Vector(_) | Expr::Aggregate { .. })
}

fn matches_scalar_pass(e: &Expr) -> bool {
    matches!(
        e,
        Expr::Unary { .. } | Expr::Binary { .. } | Expr::Call { .. } | Expr::If { .. }
    ) && !e.contains_vector()
}

struct Candidate {
    repr: Expr,
    count: usize,
    size: usize,
    order: usize,
}

/// Find the largest subtree occurring at least twice across the main tree
/// and all representative trees, excluding every tree's root.
fn best_candidate(
    main: &Expr,
    defs: &[ProtoDef],
    scalar_pass: bool,
    vector_pass: bool,
) -> Option<Expr> {
    let mut buckets: AHashMap<u64, Vec<Candidate>> = AHashMap::new();
    let mut order = 0usize;
    collect(main, true, scalar_pass, vector_pass, &mut buckets, &mut order);
    for def in defs {
        collect(
            &def.expr,
            true,
            scalar_pass,
            vector_pass,
            &mut buckets,
            &mut order,
        );
    }

    buckets
        .into_values()
        .flatten()
        .filter(|c| c.count >= 2)
        .max_by(|a, b| a.size.cmp(&b.size).then(b.order.cmp(&a.order)))
        .map(|c| c.repr)
}

fn collect(
    expr: &Expr,
    is_root: bool,
    scalar_pass: bool,
    vector_pass: bool,
    buckets: &mut AHashMap<u64, Vec<Candidate>>,
    order: &mut usize,
) {
    let eligible = (vector_pass && matches_vector_pass(expr))
        || (scalar_pass && matches_scalar_pass(expr));
    if !is_root && eligible {
        let hash = expr.structural_hash();
        let bucket = buckets.entry(hash).or_default();
        match bucket.iter_mut().find(|c| c.repr == *expr) {
            Some(c) => c.count += 1,
            None => {
                bucket.push(Candidate {
                    repr: expr.clone(),
                    count: 1,
                    size: expr.size(),
                    order: *order,
                });
            }
        }
        *order += 1;
    }

    match expr {
        Expr::Number(_)
        | Expr::ScalarVar(_)
        | Expr::VectorVar(_)
        | Expr::CalcConst(_)
        | Expr::SubtermRef(_)
        | Expr::VectorRef(_) => {}
        Expr::Vector(items) => {
            for item in items {
                collect(item, false, scalar_pass, vector_pass, buckets, order);
            }
        }
        Expr::Unary { expr, .. } => collect(expr, false, scalar_pass, vector_pass, buckets, order),
        Expr::Binary { left, right, .. } => {
            collect(left, false, scalar_pass, vector_pass, buckets, order);
            collect(right, false, scalar_pass, vector_pass, buckets, order);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                collect(arg, false, scalar_pass, vector_pass, buckets, order);
            }
        }
        Expr::Aggregate { vector, args, .. } => {
            collect(vector, false, scalar_pass, vector_pass, buckets, order);
            for arg in args {
                collect(arg, false, scalar_pass, vector_pass, buckets, order);
            }
        }
        Expr::If {
            cond,
            then,
            otherwise,
        } => {
            collect(cond, false, scalar_pass, vector_pass, buckets, order);
            collect(then, false, scalar_pass, vector_pass, buckets, order);
            collect(otherwise, false, scalar_pass, vector_pass, buckets, order);
        }
    }
}

/// Replace every occurrence of `target` (excluding the tree root) with the
/// reference node. Replaced occurrences are not descended into.
fn substitute(expr: Expr, target: &Expr, reference: &Expr, is_root: bool) -> Expr {
    if !is_root && expr == *target {
        return reference.clone();
    }
    match expr {
        Expr::Number(_)
        | Expr::ScalarVar(_)
        | Expr::VectorVar(_)
        | Expr::CalcConst(_)
        | Expr::SubtermRef(_)
        | Expr::VectorRef(_) => expr,
        Expr::Vector(items) => Expr::Vector(
            items
                .into_iter()
                .map(|i| substitute(i, target, reference, false))
                .collect(),
        ),
        Expr::Unary { op, expr } => Expr::Unary {
            op,
            expr: Box::new(substitute(*expr, target, reference, false)),
        },
        Expr::Binary { op, left, right } => Expr::Binary {
            op,
            left: Box::new(substitute(*left, target, reference, false)),
            right: Box::new(substitute(*right, target, reference, false)),
        },
        Expr::Call { func, args } => Expr::Call {
            func,
            args: args
                .into_iter()
                .map(|a| substitute(a, target, reference, false))
                .collect(),
        },
        Expr::Aggregate { func, vector, args } => Expr::Aggregate {
            func,
            vector: Box::new(substitute(*vector, target, reference, false)),
            args: args
                .into_iter()
                .map(|a| substitute(a, target, reference, false))
                .collect(),
        },
        Expr::If {
            cond,
            then,
            otherwise,
        } => Expr::If {
            cond: Box::new(substitute(*cond, target, reference, false)),
            then: Box::new(substitute(*then, target, reference, false)),
            otherwise: Box::new(substitute(*otherwise, target, reference, false)),
        },
    }
}

fn collect_ref_ids(expr: &Expr, out: &mut Vec<usize>) {
    match expr {
        Expr::SubtermRef(i) | Expr::VectorRef(i) => out.push(*i),
        Expr::Number(_) | Expr::ScalarVar(_) | Expr::VectorVar(_) | Expr::CalcConst(_) => {}
        Expr::Vector(items) => {
            for item in items {
                collect_ref_ids(item, out);
            }
        }
        Expr::Unary { expr, .. } => collect_ref_ids(expr, out),
        Expr::Binary { left, right, .. } => {
            collect_ref_ids(left, out);
            collect_ref_ids(right, out);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                collect_ref_ids(arg, out);
            }
        }
        Expr::Aggregate { vector, args, .. } => {
            collect_ref_ids(vector, out);
            for arg in args {
                collect_ref_ids(arg, out);
            }
        }
        Expr::If {
            cond,
            then,
            otherwise,
        } => {
            collect_ref_ids(cond, out);
            collect_ref_ids(then, out);
            collect_ref_ids(otherwise, out);
        }
    }
}

/// Dependencies-first ordering of the provisional defs.
fn topo_order(defs: &[ProtoDef]) -> Vec<usize> {
    fn visit(pid: usize, defs: &[ProtoDef], visited: &mut [bool], out: &mut Vec<usize>) {
        if visited[pid] {
            return;
        }
        visited[pid] = true;
        let mut deps = Vec::new();
        collect_ref_ids(&defs[pid].expr, &mut deps);
        for dep in deps {
            visit(dep, defs, visited, out);
        }
        out.push(pid);
    }

    let mut visited = vec![false; defs.len()];
    let mut out = Vec::with_capacity(defs.len());
    for pid in 0..defs.len() {
        visit(pid, defs, &mut visited, &mut out);
    }
    out
}

/// Rewrite provisional reference ids to final per-space cache slots.
fn remap_refs(expr: Expr, slot_map: &[usize]) -> Expr {
    match expr {
        Expr::SubtermRef(pid) => Expr::SubtermRef(slot_map[pid]),
        Expr::VectorRef(pid) => Expr::VectorRef(slot_map[pid]),
        Expr::Number(_) | Expr::ScalarVar(_) | Expr::VectorVar(_) | Expr::CalcConst(_) => expr,
        Expr::Vector(items) => Expr::Vector(
            items
                .into_iter()
                .map(|i| remap_refs(i, slot_map))
                .collect(),
        ),
        Expr::Unary { op, expr } => Expr::Unary {
            op,
            expr: Box::new(remap_refs(*expr, slot_map)),
        },
        Expr::Binary { op, left, right } => Expr::Binary {
            op,
            left: Box::new(remap_refs(*left, slot_map)),
            right: Box::new(remap_refs(*right, slot_map)),
        },
        Expr::Call { func, args } => Expr::Call {
            func,
            args: args
                .into_iter()
                .map(|a| remap_refs(a, slot_map))
                .collect(),
        },
        Expr::Aggregate { func, vector, args } => Expr::Aggregate {
            func,
            vector: Box::new(remap_refs(*vector, slot_map)),
            args: args
                .into_iter()
                .map(|a| remap_refs(a, slot_map))
                .collect(),
        },
        Expr::If {
            cond,
            then,
            otherwise,
        } => Expr::If {
            cond: Box::new(remap_refs(*cond, slot_map)),
            then: Box::new(remap_refs(*then, slot_map)),
            otherwise: Box::new(remap_refs(*otherwise, slot_map)),
        },
    }
}
