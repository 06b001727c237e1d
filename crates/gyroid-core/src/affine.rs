//! Affine-sum canonicalisation.
//!
//! [`Tree::collect_affine`] re-associates sums and scalar products into a
//! canonical affine form: a sum of atoms scaled by constant coefficients,
//! plus a constant term. Descent runs through `+`, `-`, unary `-`, products
//! with a constant factor, and division by a constant; every other operator
//! ends a region and becomes an atom. Atoms are canonicalised recursively
//! before their coefficients merge, so structurally equal atoms built from
//! different records still combine.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::node::TreeOp;
use crate::opcode::Opcode;
use crate::rewrite::{rebuild, resolve};
use crate::tree::Tree;

enum Frame {
    Visit(Tree),
    Build(Tree),
}

/// One step of affine descent: children with their relative scales, or an
/// atom ending the region.
enum Step {
    Two((Tree, f32), (Tree, f32)),
    One(Tree, f32),
    Atom,
}

fn affine_step(t: &Tree) -> Step {
    match &t.data().op {
        TreeOp::Binary(Opcode::Add, lhs, rhs) => {
            Step::Two((lhs.clone(), 1.0), (rhs.clone(), 1.0))
        }
        TreeOp::Binary(Opcode::Sub, lhs, rhs) => {
            Step::Two((lhs.clone(), 1.0), (rhs.clone(), -1.0))
        }
        TreeOp::Unary(Opcode::Neg, arg) => Step::One(arg.clone(), -1.0),
        TreeOp::Binary(Opcode::Mul, lhs, rhs) => match (lhs.value(), rhs.value()) {
            (_, Some(c)) => Step::One(lhs.clone(), c),
            (Some(c), _) => Step::One(rhs.clone(), c),
            _ => Step::Atom,
        },
        TreeOp::Binary(Opcode::Div, lhs, rhs) => match rhs.value() {
            Some(c) => Step::One(lhs.clone(), 1.0 / c),
            None => Step::Atom,
        },
        _ => Step::Atom,
    }
}

fn is_affine(t: &Tree) -> bool {
    !matches!(affine_step(t), Step::Atom)
}

/// Atoms of the affine region rooted at `t`, in first-encounter order.
fn frontier(t: &Tree) -> Vec<Tree> {
    let mut atoms = Vec::new();
    let mut seen = FxHashSet::default();
    let mut stack = vec![t.clone()];
    while let Some(n) = stack.pop() {
        if n.value().is_some() || !seen.insert(n.id()) {
            continue;
        }
        match affine_step(&n) {
            Step::Two((a, _), (b, _)) => {
                stack.push(b);
                stack.push(a);
            }
            Step::One(a, _) => stack.push(a),
            Step::Atom => atoms.push(n),
        }
    }
    atoms
}

/// Accumulates the region rooted at `t` into scaled atoms plus a constant.
///
/// Coefficients are keyed by the canonicalised atom, so atoms that collect
/// to the same record merge additively.
fn gather(t: &Tree, memo: &FxHashMap<usize, Tree>) -> (Vec<(Tree, f32)>, f32) {
    let mut constant = 0.0f32;
    let mut terms: Vec<(Tree, f32)> = Vec::new();
    let mut slots: FxHashMap<usize, usize> = FxHashMap::default();
    let mut stack: Vec<(Tree, f32)> = vec![(t.clone(), 1.0)];
    while let Some((n, scale)) = stack.pop() {
        if let Some(v) = n.value() {
            constant += scale * v;
            continue;
        }
        match affine_step(&n) {
            Step::Two((a, sa), (b, sb)) => {
                stack.push((b, scale * sb));
                stack.push((a, scale * sa));
            }
            Step::One(a, sa) => stack.push((a, scale * sa)),
            Step::Atom => {
                let atom = resolve(memo, &n);
                let slot = *slots.entry(atom.id()).or_insert_with(|| {
                    terms.push((atom, 0.0));
                    terms.len() - 1
                });
                terms[slot].1 += scale;
            }
        }
    }
    (terms, constant)
}

fn scaled(atom: &Tree, coeff: f32) -> Tree {
    if coeff == 1.0 {
        atom.clone()
    } else {
        Tree::binary(Opcode::Mul, atom.clone(), Tree::constant(coeff))
    }
}

/// Right-associated sum of pre-built terms.
fn sum(terms: Vec<Tree>) -> Option<Tree> {
    let mut acc: Option<Tree> = None;
    for term in terms.into_iter().rev() {
        acc = Some(match acc {
            Some(rest) => Tree::binary(Opcode::Add, term, rest),
            None => term,
        });
    }
    acc
}

/// Emits the canonical tree for a gathered region.
///
/// Terms sort ascending by coefficient, stable on first encounter; the
/// constant, when nonzero, joins the additive side keyed by its value.
/// Negative-coefficient atoms collect into a subtrahend ordered by
/// coefficient magnitude.
fn build_affine(t: &Tree, memo: &FxHashMap<usize, Tree>) -> Tree {
    let (terms, constant) = gather(t, memo);

    let mut additive: Vec<(f32, Tree)> = Vec::new();
    let mut subtractive: Vec<(f32, Tree)> = Vec::new();
    for (atom, coeff) in terms {
        if coeff == 0.0 {
            continue;
        }
        if coeff < 0.0 {
            subtractive.push((-coeff, scaled(&atom, -coeff)));
        } else {
            additive.push((coeff, scaled(&atom, coeff)));
        }
    }
    if additive.is_empty() && subtractive.is_empty() {
        return Tree::constant(constant);
    }
    if constant != 0.0 {
        additive.push((constant, Tree::constant(constant)));
    }
    let by_key = |a: &(f32, Tree), b: &(f32, Tree)| a.0.total_cmp(&b.0);
    additive.sort_by(by_key);
    subtractive.sort_by(by_key);

    let pos = sum(additive.into_iter().map(|(_, t)| t).collect());
    let neg = sum(subtractive.into_iter().map(|(_, t)| t).collect());
    match (pos, neg) {
        (Some(pos), Some(neg)) => Tree::binary(Opcode::Sub, pos, neg),
        (Some(pos), None) => pos,
        (None, Some(neg)) => Tree::unary(Opcode::Neg, neg),
        (None, None) => Tree::constant(constant),
    }
}

impl Tree {
    /// Rewrites the graph into canonical affine-sum form.
    ///
    /// Sums and scalar products re-associate; atoms with merged zero
    /// coefficients drop out; a lone atom with coefficient one collapses to
    /// the atom itself. Operators outside the affine fragment are kept,
    /// with their subtrees collected recursively.
    #[must_use]
    pub fn collect_affine(&self) -> Tree {
        let mut memo: FxHashMap<usize, Tree> = FxHashMap::default();
        let mut seen: FxHashSet<usize> = FxHashSet::default();
        let mut stack = vec![Frame::Visit(self.clone())];
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Visit(t) => {
                    if !seen.insert(t.id()) {
                        continue;
                    }
                    let constant = t.value().is_some();
                    stack.push(Frame::Build(t.clone()));
                    if constant {
                        continue;
                    }
                    if is_affine(&t) {
                        for atom in frontier(&t) {
                            stack.push(Frame::Visit(atom));
                        }
                    } else {
                        for child in t.children().into_iter().rev() {
                            stack.push(Frame::Visit(child));
                        }
                    }
                }
                Frame::Build(t) => {
                    let out = if t.value().is_some() {
                        t.clone()
                    } else if is_affine(&t) {
                        build_affine(&t, &memo)
                    } else {
                        rebuild(&memo, &t)
                    };
                    memo.insert(t.id(), out);
                }
            }
        }
        resolve(&memo, self)
    }

    /// The composed optimisation pipeline: flatten, re-intern, then
    /// collect affine terms.
    #[must_use]
    pub fn optimized(&self) -> Tree {
        self.flatten().unique().collect_affine()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_atom_coefficients_merge() {
        let c = Tree::z().cos();
        let t = Tree::x() * 2.0 + Tree::y() * 5.0 + &c + 5.0 * &c;
        assert_eq!(
            t.collect_affine().to_string(),
            "(+ (* x 2) (* y 5) (* (cos z) 6))"
        );
    }

    #[test]
    fn test_negative_constant_stays_additive() {
        let t = (Tree::z() - 10.0).max(-Tree::z());
        assert_eq!(t.collect_affine().to_string(), "(max (+ -10 z) (- z))");
    }

    #[test]
    fn test_duplicate_subtrees_merge() {
        let a = 2.0 * Tree::x() + Tree::y();
        let b = 2.0 * Tree::x() + Tree::y();
        let t = a + b;
        assert_eq!(t.collect_affine().to_string(), "(+ (* y 2) (* x 4))");
    }

    #[test]
    fn test_multiplication_is_opaque() {
        let a = 2.0 * Tree::x() + Tree::y();
        let b = 2.0 * Tree::x() + Tree::y();
        // a and b intern to the same record, so the product is a square.
        let t = a * b;
        assert_eq!(t.collect_affine().to_string(), "(square (+ y (* x 2)))");
    }

    #[test]
    fn test_atom_shared_with_region() {
        let a = Tree::x() + 2.0 * Tree::y();
        let c = 3.0 * a.cos();
        let t = &a + c;
        assert_eq!(
            t.collect_affine().to_string(),
            "(+ x (* y 2) (* (cos (+ x (* y 2))) 3))"
        );
    }

    #[test]
    fn test_constant_term_sorts_by_value() {
        let a = Tree::x() + 2.0 * Tree::y() + 7.0;
        let c = 3.0 * a.sin().cos();
        let t = &a + c;
        assert_eq!(
            t.collect_affine().to_string(),
            "(+ x (* y 2) (* (cos (sin (+ x (* y 2) 7))) 3) 7)"
        );
    }

    #[test]
    fn test_terms_sort_ascending_by_coefficient() {
        let t = Tree::x()
            + 2.0 * Tree::y()
            + 3.0 * Tree::x().cos()
            + 4.0 * Tree::y().cos();
        assert_eq!(
            t.collect_affine().to_string(),
            "(+ x (* y 2) (* (cos x) 3) (* (cos y) 4))"
        );
    }

    #[test]
    fn test_min_max_are_opaque() {
        let a = -Tree::z();
        let b = Tree::z() - 10.0;
        let c = -Tree::z();
        let d = Tree::z() - 100.0;
        let t = a.max(b).min(c.max(d));

        assert_eq!(
            t.collect_affine().to_string(),
            "(min (max (- z) (+ -10 z)) (max (- z) (+ -100 z)))"
        );
    }

    #[test]
    fn test_negated_atom_squares() {
        let a = -Tree::z();
        let t = &a * &a;
        assert_eq!(t.collect_affine().to_string(), "(square (- z))");
    }

    #[test]
    fn test_division_by_constant_scales() {
        let z = Tree::z();
        let t = -0.091 - (z - 2.7) / 0.6;
        assert_eq!(t.to_string(), "(- -0.091 (/ (- z 2.7) 0.6))");
        assert_eq!(t.collect_affine().to_string(), "(- 4.409 (* z 1.66667))");
    }

    #[test]
    fn test_cancellation_drops_atoms() {
        let t = (Tree::x() + Tree::y()) - Tree::x();
        assert_eq!(t.collect_affine(), Tree::y());

        let z = &Tree::x() - &Tree::x();
        assert_eq!(z.collect_affine().value(), Some(0.0));
    }

    #[test]
    fn test_optimized_pipeline() {
        let t = (-Tree::z())
            .max(Tree::z() - 10.0)
            .min((-Tree::z()).max(Tree::z() - 100.0));
        assert_eq!(
            t.optimized().to_string(),
            "(min (max (- z) (+ -10 z)) (max (- z) (+ -100 z)))"
        );
    }

    #[test]
    fn test_remapped_optimized_pipeline() {
        // X - X only cancels once the remap has been realised.
        let t = (Tree::y() + Tree::x()).remap(Tree::x(), Tree::x(), Tree::z()) - Tree::x();
        assert_eq!(t.optimized(), Tree::x());
    }
}
