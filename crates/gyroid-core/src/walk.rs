//! Post-order traversal.
//!
//! [`Tree::walk`] yields every record reachable from a root exactly once,
//! children before parents, lhs before rhs. The traversal keeps an explicit
//! frame stack so graphs tens of thousands of nodes deep cannot overflow
//! the call stack.

use rustc_hash::FxHashSet;

use crate::tree::Tree;

enum Frame {
    Visit(Tree),
    Emit(Tree),
}

/// Iterator over the unique reachable nodes of a tree, in post-order.
///
/// A node shared between several parents is emitted at its first visit.
pub struct Walk {
    stack: Vec<Frame>,
    seen: FxHashSet<usize>,
}

impl Tree {
    /// Deterministic post-order iterator over the reachable unique nodes.
    #[must_use]
    pub fn walk(&self) -> Walk {
        Walk {
            stack: vec![Frame::Visit(self.clone())],
            seen: FxHashSet::default(),
        }
    }
}

impl Iterator for Walk {
    type Item = Tree;

    fn next(&mut self) -> Option<Tree> {
        while let Some(frame) = self.stack.pop() {
            match frame {
                Frame::Visit(t) => {
                    if !self.seen.insert(t.id()) {
                        continue;
                    }
                    let children = t.children();
                    self.stack.push(Frame::Emit(t));
                    // Reversed push so the lhs is processed first.
                    for child in children.into_iter().rev() {
                        if !self.seen.contains(&child.id()) {
                            self.stack.push(Frame::Visit(child));
                        }
                    }
                }
                Frame::Emit(t) => return Some(t),
            }
        }
        None
    }
}

impl std::iter::FusedIterator for Walk {}
