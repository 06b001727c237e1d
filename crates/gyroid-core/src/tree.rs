//! Tree handles and smart constructors.
//!
//! A [`Tree`] is a counted, thread-safe owning reference to an immutable
//! node record. Handles have value semantics: cloning bumps the count,
//! dropping releases it, and equality is record identity. All construction
//! funnels through the smart constructors here, which apply the local
//! identity and constant-folding rules before consulting the hash-cons
//! table, so structurally equal nodes share one record.

use std::cmp::Ordering;
use std::mem::ManuallyDrop;
use std::sync::{Arc, LazyLock};

use smallvec::SmallVec;

use crate::intern;
use crate::node::{Axis, NodeKey, TreeData, TreeOp, HAS_ORACLE, HAS_REMAP, HAS_XYZ};
use crate::opcode::Opcode;
use crate::oracle::OracleClause;

/// Shared handle to an expression node.
///
/// `Tree` is `Send + Sync`; graphs may be built, shared, and dropped from
/// any number of threads concurrently.
pub struct Tree(ManuallyDrop<Arc<TreeData>>);

static AXIS_X: LazyLock<Tree> = LazyLock::new(|| Tree::leaf(TreeOp::Axis(Axis::X)));
static AXIS_Y: LazyLock<Tree> = LazyLock::new(|| Tree::leaf(TreeOp::Axis(Axis::Y)));
static AXIS_Z: LazyLock<Tree> = LazyLock::new(|| Tree::leaf(TreeOp::Axis(Axis::Z)));

impl Tree {
    /// Subtree contains an axis leaf.
    pub const HAS_XYZ: u8 = HAS_XYZ;
    /// Subtree contains a deferred remap.
    pub const HAS_REMAP: u8 = HAS_REMAP;
    /// Subtree contains an oracle leaf.
    pub const HAS_ORACLE: u8 = HAS_ORACLE;

    fn from_arc(arc: Arc<TreeData>) -> Tree {
        Tree(ManuallyDrop::new(arc))
    }

    /// Allocates a record that bypasses the hash-cons table.
    fn leaf(op: TreeOp) -> Tree {
        Tree::from_arc(Arc::new(TreeData::new(op)))
    }

    /// Allocates through the table; structurally equal nodes share a record.
    fn intern_node(op: TreeOp) -> Tree {
        let data = TreeData::new(op);
        match NodeKey::from_data(&data) {
            Some(key) => Tree::from_arc(intern::intern(key, move || data)),
            None => Tree::from_arc(Arc::new(data)),
        }
    }

    pub(crate) fn data(&self) -> &TreeData {
        &self.0
    }

    /// Surrenders the handle without running its destructor.
    pub(crate) fn into_arc(self) -> Arc<TreeData> {
        let mut this = ManuallyDrop::new(self);
        // Safety: `this` is never touched again; the wrapper suppresses
        // the outer Drop so the count moves rather than dropping.
        unsafe { ManuallyDrop::take(&mut this.0) }
    }

    // === Leaf constructors ===

    /// The X axis singleton.
    #[must_use]
    pub fn x() -> Tree {
        AXIS_X.clone()
    }

    /// The Y axis singleton.
    #[must_use]
    pub fn y() -> Tree {
        AXIS_Y.clone()
    }

    /// The Z axis singleton.
    #[must_use]
    pub fn z() -> Tree {
        AXIS_Z.clone()
    }

    /// An interned constant, keyed by bit pattern.
    ///
    /// `+0.0` and `-0.0` are distinct records, as are NaNs with different
    /// payloads.
    #[must_use]
    pub fn constant(value: f32) -> Tree {
        let key = NodeKey::Const(value.to_bits());
        Tree::from_arc(intern::intern(key, move || TreeData::new(TreeOp::Const(value))))
    }

    /// A fresh free variable. Never deduplicated.
    #[must_use]
    pub fn var() -> Tree {
        Tree::leaf(TreeOp::Var(intern::fresh_var_id()))
    }

    /// Wraps an opaque oracle clause as a leaf. Never deduplicated.
    #[must_use]
    pub fn oracle(clause: Arc<dyn OracleClause>) -> Tree {
        Tree::leaf(TreeOp::Oracle(clause))
    }

    // === Smart constructors ===

    /// Builds a unary operation, folding constants and applying the
    /// `-(-x) = x` and `abs(abs(x)) = abs(x)` identities.
    #[must_use]
    pub fn unary(op: Opcode, t: Tree) -> Tree {
        debug_assert_eq!(op.arity(), 1);
        if let Some(value) = t.value() {
            return Tree::constant(eval_unary(op, value));
        }
        match op {
            Opcode::Neg => {
                if let TreeOp::Unary(Opcode::Neg, inner) = &t.data().op {
                    return inner.clone();
                }
            }
            Opcode::Abs => {
                if t.op() == Opcode::Abs {
                    return t;
                }
            }
            _ => {}
        }
        Tree::intern_node(TreeOp::Unary(op, t))
    }

    /// Builds a binary operation through the identity and folding rules.
    ///
    /// Every rule is a bounded local rewrite on handle identity or constant
    /// inspection; none recurses into the operands.
    #[must_use]
    pub fn binary(op: Opcode, lhs: Tree, rhs: Tree) -> Tree {
        debug_assert_eq!(op.arity(), 2);
        let lc = lhs.value();
        let rc = rhs.value();
        match op {
            Opcode::Add => {
                if rc == Some(0.0) {
                    return lhs;
                }
                if lc == Some(0.0) {
                    return rhs;
                }
                if let TreeOp::Unary(Opcode::Neg, inner) = &rhs.data().op {
                    let inner = inner.clone();
                    return Tree::binary(Opcode::Sub, lhs, inner);
                }
            }
            Opcode::Sub => {
                if rc == Some(0.0) {
                    return lhs;
                }
                if lc == Some(0.0) {
                    return Tree::unary(Opcode::Neg, rhs);
                }
            }
            Opcode::Mul => {
                if rc == Some(1.0) {
                    return lhs;
                }
                if lc == Some(1.0) {
                    return rhs;
                }
                if rc == Some(0.0) || lc == Some(0.0) {
                    return Tree::constant(0.0);
                }
                if rc == Some(-1.0) {
                    return Tree::unary(Opcode::Neg, lhs);
                }
                if lc == Some(-1.0) {
                    return Tree::unary(Opcode::Neg, rhs);
                }
                if lhs == rhs {
                    return Tree::unary(Opcode::Square, lhs);
                }
            }
            Opcode::Pow | Opcode::NthRoot => {
                if rc == Some(1.0) {
                    return lhs;
                }
            }
            Opcode::Min | Opcode::Max => {
                if lhs == rhs {
                    return lhs;
                }
            }
            _ => {}
        }
        if let (Some(a), Some(b)) = (lc, rc) {
            return Tree::constant(eval_binary(op, a, b));
        }
        Tree::intern_node(TreeOp::Binary(op, lhs, rhs))
    }

    /// Defers substitution of the axes inside `self`.
    ///
    /// O(1): the body is wrapped, not traversed. [`Tree::flatten`] realises
    /// the substitution later.
    #[must_use]
    pub fn remap(&self, x: Tree, y: Tree, z: Tree) -> Tree {
        Tree::intern_node(TreeOp::Remap {
            body: self.clone(),
            x,
            y,
            z,
        })
    }

    /// Wraps `self` so evaluators treat free variables as constants.
    #[must_use]
    pub fn with_const_vars(&self) -> Tree {
        Tree::intern_node(TreeOp::ConstVar(self.clone()))
    }

    // === Accessors ===

    /// Record identity; the fast equality used by every pass.
    #[must_use]
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// Opcode of the node.
    #[must_use]
    pub fn op(&self) -> Opcode {
        self.data().opcode()
    }

    /// Constant value, for constant nodes.
    #[must_use]
    pub fn value(&self) -> Option<f32> {
        self.data().as_const()
    }

    /// First child: unary operand, binary lhs, or wrapper body.
    #[must_use]
    pub fn lhs(&self) -> Option<&Tree> {
        match &self.data().op {
            TreeOp::Unary(_, t) | TreeOp::ConstVar(t) => Some(t),
            TreeOp::Binary(_, lhs, _) => Some(lhs),
            TreeOp::Remap { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Second child of a binary node.
    #[must_use]
    pub fn rhs(&self) -> Option<&Tree> {
        match &self.data().op {
            TreeOp::Binary(_, _, rhs) => Some(rhs),
            _ => None,
        }
    }

    /// Child handles, lhs before rhs; remap order is body, x, y, z.
    #[must_use]
    pub fn children(&self) -> SmallVec<[Tree; 4]> {
        self.data().children()
    }

    /// Subtree summary bits.
    #[must_use]
    pub fn flags(&self) -> u8 {
        self.data().flags
    }

    /// True if an axis leaf is reachable.
    #[must_use]
    pub fn has_xyz(&self) -> bool {
        self.flags() & HAS_XYZ != 0
    }

    /// True if a deferred remap is reachable.
    #[must_use]
    pub fn has_remap(&self) -> bool {
        self.flags() & HAS_REMAP != 0
    }

    /// True if an oracle leaf is reachable.
    #[must_use]
    pub fn has_oracle(&self) -> bool {
        self.flags() & HAS_ORACLE != 0
    }

    /// Number of live handles to this record.
    ///
    /// The hash-cons table holds weak references only, so it does not
    /// contribute; each axis singleton's internal handle contributes one.
    #[must_use]
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Number of unique nodes reachable from this one.
    #[must_use]
    pub fn size(&self) -> usize {
        self.walk().count()
    }

    // === Method sugar over the smart constructors ===

    /// Absolute value.
    #[must_use]
    pub fn abs(&self) -> Tree {
        Tree::unary(Opcode::Abs, self.clone())
    }

    /// `self * self`, as a single node.
    #[must_use]
    pub fn square(&self) -> Tree {
        Tree::unary(Opcode::Square, self.clone())
    }

    /// Square root.
    #[must_use]
    pub fn sqrt(&self) -> Tree {
        Tree::unary(Opcode::Sqrt, self.clone())
    }

    /// Sine.
    #[must_use]
    pub fn sin(&self) -> Tree {
        Tree::unary(Opcode::Sin, self.clone())
    }

    /// Cosine.
    #[must_use]
    pub fn cos(&self) -> Tree {
        Tree::unary(Opcode::Cos, self.clone())
    }

    /// Tangent.
    #[must_use]
    pub fn tan(&self) -> Tree {
        Tree::unary(Opcode::Tan, self.clone())
    }

    /// Arcsine.
    #[must_use]
    pub fn asin(&self) -> Tree {
        Tree::unary(Opcode::Asin, self.clone())
    }

    /// Arccosine.
    #[must_use]
    pub fn acos(&self) -> Tree {
        Tree::unary(Opcode::Acos, self.clone())
    }

    /// Arctangent.
    #[must_use]
    pub fn atan(&self) -> Tree {
        Tree::unary(Opcode::Atan, self.clone())
    }

    /// Natural exponential.
    #[must_use]
    pub fn exp(&self) -> Tree {
        Tree::unary(Opcode::Exp, self.clone())
    }

    /// Natural logarithm.
    #[must_use]
    pub fn ln(&self) -> Tree {
        Tree::unary(Opcode::Log, self.clone())
    }

    /// Reciprocal.
    #[must_use]
    pub fn recip(&self) -> Tree {
        Tree::unary(Opcode::Recip, self.clone())
    }

    /// Minimum of two subtrees.
    #[must_use]
    pub fn min<T: Into<Tree>>(&self, rhs: T) -> Tree {
        Tree::binary(Opcode::Min, self.clone(), rhs.into())
    }

    /// Maximum of two subtrees.
    #[must_use]
    pub fn max<T: Into<Tree>>(&self, rhs: T) -> Tree {
        Tree::binary(Opcode::Max, self.clone(), rhs.into())
    }

    /// `self` raised to `rhs`.
    #[must_use]
    pub fn pow<T: Into<Tree>>(&self, rhs: T) -> Tree {
        Tree::binary(Opcode::Pow, self.clone(), rhs.into())
    }

    /// `rhs`-th root of `self`.
    #[must_use]
    pub fn nth_root<T: Into<Tree>>(&self, rhs: T) -> Tree {
        Tree::binary(Opcode::NthRoot, self.clone(), rhs.into())
    }

    /// Two-argument arctangent, `self` as y.
    #[must_use]
    pub fn atan2<T: Into<Tree>>(&self, rhs: T) -> Tree {
        Tree::binary(Opcode::Atan2, self.clone(), rhs.into())
    }

    /// Floating-point remainder.
    #[must_use]
    pub fn modulo<T: Into<Tree>>(&self, rhs: T) -> Tree {
        Tree::binary(Opcode::Mod, self.clone(), rhs.into())
    }

    /// Three-way comparison: -1, 0, 1, or NaN when unordered.
    #[must_use]
    pub fn compare<T: Into<Tree>>(&self, rhs: T) -> Tree {
        Tree::binary(Opcode::Compare, self.clone(), rhs.into())
    }
}

fn eval_unary(op: Opcode, v: f32) -> f32 {
    match op {
        Opcode::Neg => -v,
        Opcode::Abs => v.abs(),
        Opcode::Square => v * v,
        Opcode::Sqrt => v.sqrt(),
        Opcode::Sin => v.sin(),
        Opcode::Cos => v.cos(),
        Opcode::Tan => v.tan(),
        Opcode::Asin => v.asin(),
        Opcode::Acos => v.acos(),
        Opcode::Atan => v.atan(),
        Opcode::Exp => v.exp(),
        Opcode::Log => v.ln(),
        Opcode::Recip => v.recip(),
        _ => unreachable!("not a unary opcode: {op:?}"),
    }
}

fn eval_binary(op: Opcode, a: f32, b: f32) -> f32 {
    match op {
        Opcode::Add => a + b,
        Opcode::Sub => a - b,
        Opcode::Mul => a * b,
        Opcode::Div => a / b,
        Opcode::Min => a.min(b),
        Opcode::Max => a.max(b),
        Opcode::Atan2 => a.atan2(b),
        Opcode::Pow => a.powf(b),
        Opcode::NthRoot => a.powf(b.recip()),
        Opcode::Mod => a % b,
        Opcode::Compare => match a.partial_cmp(&b) {
            Some(Ordering::Less) => -1.0,
            Some(Ordering::Equal) => 0.0,
            Some(Ordering::Greater) => 1.0,
            None => f32::NAN,
        },
        _ => unreachable!("not a binary opcode: {op:?}"),
    }
}

impl Clone for Tree {
    fn clone(&self) -> Tree {
        Tree::from_arc(Arc::clone(&self.0))
    }
}

impl Drop for Tree {
    fn drop(&mut self) {
        // Safety: `self.0` is never used after take; Drop runs once.
        let arc = unsafe { ManuallyDrop::take(&mut self.0) };
        release(arc);
    }
}

/// Iterative release, safe for graphs of arbitrary depth.
///
/// A record reaching count zero is first detached from the hash-cons table,
/// then disassembled; its children join the work stack instead of dropping
/// recursively.
fn release(root: Arc<TreeData>) {
    let mut stack: Vec<Arc<TreeData>> = vec![root];
    while let Some(node) = stack.pop() {
        if Arc::strong_count(&node) == 1 {
            intern::forget(&node);
        }
        if let Some(data) = Arc::into_inner(node) {
            stack.extend(data.into_children());
        }
    }
}

impl PartialEq for Tree {
    fn eq(&self, other: &Tree) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Tree {}

impl std::hash::Hash for Tree {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_usize(self.id());
    }
}

impl From<f32> for Tree {
    fn from(value: f32) -> Tree {
        Tree::constant(value)
    }
}

impl From<&Tree> for Tree {
    fn from(t: &Tree) -> Tree {
        t.clone()
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $opcode:expr) => {
        impl std::ops::$trait<Tree> for Tree {
            type Output = Tree;
            fn $method(self, rhs: Tree) -> Tree {
                Tree::binary($opcode, self, rhs)
            }
        }

        impl std::ops::$trait<&Tree> for Tree {
            type Output = Tree;
            fn $method(self, rhs: &Tree) -> Tree {
                Tree::binary($opcode, self, rhs.clone())
            }
        }

        impl std::ops::$trait<Tree> for &Tree {
            type Output = Tree;
            fn $method(self, rhs: Tree) -> Tree {
                Tree::binary($opcode, self.clone(), rhs)
            }
        }

        impl std::ops::$trait<&Tree> for &Tree {
            type Output = Tree;
            fn $method(self, rhs: &Tree) -> Tree {
                Tree::binary($opcode, self.clone(), rhs.clone())
            }
        }

        impl std::ops::$trait<f32> for Tree {
            type Output = Tree;
            fn $method(self, rhs: f32) -> Tree {
                Tree::binary($opcode, self, Tree::constant(rhs))
            }
        }

        impl std::ops::$trait<f32> for &Tree {
            type Output = Tree;
            fn $method(self, rhs: f32) -> Tree {
                Tree::binary($opcode, self.clone(), Tree::constant(rhs))
            }
        }

        impl std::ops::$trait<Tree> for f32 {
            type Output = Tree;
            fn $method(self, rhs: Tree) -> Tree {
                Tree::binary($opcode, Tree::constant(self), rhs)
            }
        }

        impl std::ops::$trait<&Tree> for f32 {
            type Output = Tree;
            fn $method(self, rhs: &Tree) -> Tree {
                Tree::binary($opcode, Tree::constant(self), rhs.clone())
            }
        }
    };
}

impl_binary_op!(Add, add, Opcode::Add);
impl_binary_op!(Sub, sub, Opcode::Sub);
impl_binary_op!(Mul, mul, Opcode::Mul);
impl_binary_op!(Div, div, Opcode::Div);

impl std::ops::Neg for Tree {
    type Output = Tree;
    fn neg(self) -> Tree {
        Tree::unary(Opcode::Neg, self)
    }
}

impl std::ops::Neg for &Tree {
    type Output = Tree;
    fn neg(self) -> Tree {
        Tree::unary(Opcode::Neg, self.clone())
    }
}
