//! Node records stored behind tree handles.
//!
//! Records are immutable once built. Each one carries a tagged operation,
//! plus an 8-bit flag set summarising the subtree below it; the flags let
//! rewrite passes skip subtrees that cannot be affected.

use std::sync::Arc;

use smallvec::{smallvec, SmallVec};

use crate::opcode::Opcode;
use crate::oracle::OracleClause;
use crate::tree::Tree;

/// Subtree contains an axis leaf.
pub const HAS_XYZ: u8 = 1 << 0;
/// Subtree contains a deferred remap.
pub const HAS_REMAP: u8 = 1 << 1;
/// Subtree contains an oracle leaf.
pub const HAS_ORACLE: u8 = 1 << 2;

/// One of the three coordinate axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// The X axis.
    X,
    /// The Y axis.
    Y,
    /// The Z axis.
    Z,
}

impl Axis {
    pub(crate) fn opcode(self) -> Opcode {
        match self {
            Axis::X => Opcode::VarX,
            Axis::Y => Opcode::VarY,
            Axis::Z => Opcode::VarZ,
        }
    }
}

/// Tagged operation of a node record.
pub(crate) enum TreeOp {
    /// Literal, compared by bit pattern.
    Const(f32),
    /// Axis leaf; a process-wide singleton per axis.
    Axis(Axis),
    /// Free variable; the id is fresh per [`Tree::var`] call.
    Var(u64),
    /// Unary operation.
    Unary(Opcode, Tree),
    /// Binary operation.
    Binary(Opcode, Tree, Tree),
    /// Deferred substitution of the axes inside `body`.
    Remap {
        /// Subtree the substitution applies to.
        body: Tree,
        /// Replacement for X.
        x: Tree,
        /// Replacement for Y.
        y: Tree,
        /// Replacement for Z.
        z: Tree,
    },
    /// Marks free variables below as constants for evaluation.
    ConstVar(Tree),
    /// Opaque leaf; compared by clause identity.
    Oracle(Arc<dyn OracleClause>),
}

/// Heap record referenced by [`Tree`] handles.
pub(crate) struct TreeData {
    pub op: TreeOp,
    pub flags: u8,
}

impl TreeData {
    /// Builds a record, deriving flags from the children.
    pub fn new(op: TreeOp) -> TreeData {
        let flags = match &op {
            TreeOp::Const(_) | TreeOp::Var(_) => 0,
            TreeOp::Axis(_) => HAS_XYZ,
            TreeOp::Oracle(_) => HAS_ORACLE,
            TreeOp::Unary(_, t) | TreeOp::ConstVar(t) => t.flags(),
            TreeOp::Binary(_, lhs, rhs) => lhs.flags() | rhs.flags(),
            TreeOp::Remap { body, x, y, z } => {
                body.flags() | x.flags() | y.flags() | z.flags() | HAS_REMAP
            }
        };
        TreeData { op, flags }
    }

    pub fn opcode(&self) -> Opcode {
        match &self.op {
            TreeOp::Const(_) => Opcode::Constant,
            TreeOp::Axis(axis) => axis.opcode(),
            TreeOp::Var(_) => Opcode::VarFree,
            TreeOp::Unary(op, _) | TreeOp::Binary(op, _, _) => *op,
            TreeOp::Remap { .. } => Opcode::Remap,
            TreeOp::ConstVar(_) => Opcode::ConstVar,
            TreeOp::Oracle(_) => Opcode::Oracle,
        }
    }

    pub fn as_const(&self) -> Option<f32> {
        match &self.op {
            TreeOp::Const(value) => Some(*value),
            _ => None,
        }
    }

    /// Child handles, lhs before rhs; remap order is body, x, y, z.
    pub fn children(&self) -> SmallVec<[Tree; 4]> {
        match &self.op {
            TreeOp::Const(_) | TreeOp::Axis(_) | TreeOp::Var(_) | TreeOp::Oracle(_) => {
                SmallVec::new()
            }
            TreeOp::Unary(_, t) | TreeOp::ConstVar(t) => smallvec![t.clone()],
            TreeOp::Binary(_, lhs, rhs) => smallvec![lhs.clone(), rhs.clone()],
            TreeOp::Remap { body, x, y, z } => {
                smallvec![body.clone(), x.clone(), y.clone(), z.clone()]
            }
        }
    }

    /// Disassembles the record into raw child references.
    ///
    /// Used by the iterative handle destructor, which must take ownership of
    /// the children without running their `Drop` glue.
    pub fn into_children(self) -> SmallVec<[Arc<TreeData>; 4]> {
        match self.op {
            TreeOp::Const(_) | TreeOp::Axis(_) | TreeOp::Var(_) | TreeOp::Oracle(_) => {
                SmallVec::new()
            }
            TreeOp::Unary(_, t) | TreeOp::ConstVar(t) => smallvec![t.into_arc()],
            TreeOp::Binary(_, lhs, rhs) => smallvec![lhs.into_arc(), rhs.into_arc()],
            TreeOp::Remap { body, x, y, z } => {
                smallvec![body.into_arc(), x.into_arc(), y.into_arc(), z.into_arc()]
            }
        }
    }
}

/// Structural key for the hash-cons table.
///
/// Children are identified by record address, and constants by raw bit
/// pattern, so `+0.0`/`-0.0` and distinct NaN payloads stay distinct.
/// Axes (singletons), free variables, and oracles never get a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum NodeKey {
    Const(u32),
    Unary(Opcode, usize),
    Binary(Opcode, usize, usize),
    Remap(usize, usize, usize, usize),
    ConstVar(usize),
}

impl NodeKey {
    pub fn from_data(data: &TreeData) -> Option<NodeKey> {
        match &data.op {
            TreeOp::Const(value) => Some(NodeKey::Const(value.to_bits())),
            TreeOp::Unary(op, t) => Some(NodeKey::Unary(*op, t.id())),
            TreeOp::Binary(op, lhs, rhs) => Some(NodeKey::Binary(*op, lhs.id(), rhs.id())),
            TreeOp::Remap { body, x, y, z } => {
                Some(NodeKey::Remap(body.id(), x.id(), y.id(), z.id()))
            }
            TreeOp::ConstVar(t) => Some(NodeKey::ConstVar(t.id())),
            TreeOp::Axis(_) | TreeOp::Var(_) | TreeOp::Oracle(_) => None,
        }
    }
}
