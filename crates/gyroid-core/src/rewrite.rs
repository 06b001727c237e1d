//! Structure-preserving rewrites: flatten and unique.
//!
//! Both passes walk a graph bottom-up and rebuild it through the smart
//! constructors, so interning and the identity rules re-apply on the way
//! up. The input graph is never mutated; rewrites return new handles and
//! share unchanged subtrees with the original.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::node::TreeOp;
use crate::opcode::Opcode;
use crate::tree::Tree;

enum Frame {
    Visit(Tree),
    Build(Tree),
}

/// Looks up a rewritten node, falling back to the original handle.
pub(crate) fn resolve(memo: &FxHashMap<usize, Tree>, t: &Tree) -> Tree {
    memo.get(&t.id()).cloned().unwrap_or_else(|| t.clone())
}

/// Rebuilds one node with children taken from the memo table.
///
/// Goes through the smart constructors, so identity collapses and constant
/// folds re-apply. Returns the original handle when no child changed.
pub(crate) fn rebuild(memo: &FxHashMap<usize, Tree>, t: &Tree) -> Tree {
    match &t.data().op {
        TreeOp::Unary(op, a) => {
            let ra = resolve(memo, a);
            if ra == *a {
                t.clone()
            } else {
                Tree::unary(*op, ra)
            }
        }
        TreeOp::Binary(op, lhs, rhs) => {
            let rl = resolve(memo, lhs);
            let rr = resolve(memo, rhs);
            if rl == *lhs && rr == *rhs {
                t.clone()
            } else {
                Tree::binary(*op, rl, rr)
            }
        }
        TreeOp::ConstVar(body) => {
            let rb = resolve(memo, body);
            if rb == *body {
                t.clone()
            } else {
                rb.with_const_vars()
            }
        }
        TreeOp::Remap { body, x, y, z } => {
            let rb = resolve(memo, body);
            let rx = resolve(memo, x);
            let ry = resolve(memo, y);
            let rz = resolve(memo, z);
            if rb == *body && rx == *x && ry == *y && rz == *z {
                t.clone()
            } else {
                rb.remap(rx, ry, rz)
            }
        }
        TreeOp::Const(_) | TreeOp::Axis(_) | TreeOp::Var(_) | TreeOp::Oracle(_) => t.clone(),
    }
}

impl Tree {
    /// Eagerly applies every pending remap reachable from this node.
    ///
    /// The result contains no `Remap` nodes. Nested remaps compose
    /// outer-over-inner: the inner one is realised first, then the outer
    /// substitution runs over its output. A graph with no reachable remap
    /// is returned unchanged, by handle.
    #[must_use]
    pub fn flatten(&self) -> Tree {
        if !self.has_remap() {
            return self.clone();
        }
        let mut memo: FxHashMap<usize, Tree> = FxHashMap::default();
        let mut seen: FxHashSet<usize> = FxHashSet::default();
        let mut stack = vec![Frame::Visit(self.clone())];
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Visit(t) => {
                    // Remap-free subtrees pass through untouched.
                    if !t.has_remap() || !seen.insert(t.id()) {
                        continue;
                    }
                    stack.push(Frame::Build(t.clone()));
                    for child in t.children().into_iter().rev() {
                        stack.push(Frame::Visit(child));
                    }
                }
                Frame::Build(t) => {
                    let out = match &t.data().op {
                        TreeOp::Remap { body, x, y, z } => {
                            let rx = resolve(&memo, x);
                            let ry = resolve(&memo, y);
                            let rz = resolve(&memo, z);
                            substitute(&resolve(&memo, body), &rx, &ry, &rz)
                        }
                        _ => rebuild(&memo, &t),
                    };
                    memo.insert(t.id(), out);
                }
            }
        }
        resolve(&memo, self)
    }

    /// Rebuilds every reachable node through the smart constructors.
    ///
    /// Restores structural uniqueness for graphs that entered the process
    /// without interning, and lets the identity rules collapse subtrees
    /// that became equal on the way up. Graphs already built through the
    /// constructors come back unchanged, by handle.
    #[must_use]
    pub fn unique(&self) -> Tree {
        let mut memo: FxHashMap<usize, Tree> = FxHashMap::default();
        for t in self.walk() {
            let out = rebuild(&memo, &t);
            memo.insert(t.id(), out);
        }
        resolve(&memo, self)
    }
}

/// Replaces axis leaves in a remap-free body.
///
/// Interior nodes rebuild through the smart constructors, so substituting a
/// constant re-folds arithmetic on the way up. Subtrees without an axis
/// leaf are shared with the input.
fn substitute(body: &Tree, x: &Tree, y: &Tree, z: &Tree) -> Tree {
    if !body.has_xyz() {
        return body.clone();
    }
    let mut memo: FxHashMap<usize, Tree> = FxHashMap::default();
    let mut seen: FxHashSet<usize> = FxHashSet::default();
    let mut stack = vec![Frame::Visit(body.clone())];
    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Visit(t) => {
                if !t.has_xyz() || !seen.insert(t.id()) {
                    continue;
                }
                stack.push(Frame::Build(t.clone()));
                for child in t.children().into_iter().rev() {
                    stack.push(Frame::Visit(child));
                }
            }
            Frame::Build(t) => {
                let out = match t.op() {
                    Opcode::VarX => x.clone(),
                    Opcode::VarY => y.clone(),
                    Opcode::VarZ => z.clone(),
                    _ => rebuild(&memo, &t),
                };
                memo.insert(t.id(), out);
            }
        }
    }
    resolve(&memo, body)
}
