//! Operator codes.
//!
//! Every node kind is tagged with an [`Opcode`]. The discriminant values
//! double as the wire bytes of the archive format, so they are stable and
//! must never be renumbered. All per-operator metadata (arity, print symbol,
//! commutativity, identity elements) lives here; no other module branches on
//! a raw opcode integer.

/// Operator code for a tree node.
///
/// Discriminants are the archive wire bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Placeholder; never appears in a constructed tree.
    Invalid = 0,

    /// An `f32` literal.
    Constant = 1,
    /// The X coordinate axis.
    VarX = 2,
    /// The Y coordinate axis.
    VarY = 3,
    /// The Z coordinate axis.
    VarZ = 4,
    /// A free variable with a fresh identity.
    VarFree = 5,
    /// Wrapper marking free variables as constants for evaluation.
    ConstVar = 6,

    /// `x * x`
    Square = 7,
    /// Square root.
    Sqrt = 8,
    /// Negation.
    Neg = 9,
    /// Sine.
    Sin = 10,
    /// Cosine.
    Cos = 11,
    /// Tangent.
    Tan = 12,
    /// Arcsine.
    Asin = 13,
    /// Arccosine.
    Acos = 14,
    /// Arctangent.
    Atan = 15,
    /// Natural exponential.
    Exp = 16,
    /// Absolute value.
    Abs = 17,
    /// Natural logarithm.
    Log = 18,
    /// Reciprocal.
    Recip = 19,

    /// Addition.
    Add = 20,
    /// Multiplication.
    Mul = 21,
    /// Minimum.
    Min = 22,
    /// Maximum.
    Max = 23,
    /// Subtraction.
    Sub = 24,
    /// Division.
    Div = 25,
    /// Two-argument arctangent.
    Atan2 = 26,
    /// Exponentiation.
    Pow = 27,
    /// `lhs^(1/rhs)`
    NthRoot = 28,
    /// Floating-point remainder.
    Mod = 29,
    /// Three-way comparison returning -1, 0, 1, or NaN.
    Compare = 30,

    /// Opaque user-supplied clause.
    Oracle = 31,
    /// Deferred axis substitution.
    Remap = 32,
}

impl Opcode {
    /// Number of child subtrees the operator takes.
    #[must_use]
    pub fn arity(self) -> usize {
        match self {
            Opcode::Invalid
            | Opcode::Constant
            | Opcode::VarX
            | Opcode::VarY
            | Opcode::VarZ
            | Opcode::VarFree
            | Opcode::Oracle => 0,
            Opcode::ConstVar
            | Opcode::Square
            | Opcode::Sqrt
            | Opcode::Neg
            | Opcode::Sin
            | Opcode::Cos
            | Opcode::Tan
            | Opcode::Asin
            | Opcode::Acos
            | Opcode::Atan
            | Opcode::Exp
            | Opcode::Abs
            | Opcode::Log
            | Opcode::Recip => 1,
            Opcode::Add
            | Opcode::Mul
            | Opcode::Min
            | Opcode::Max
            | Opcode::Sub
            | Opcode::Div
            | Opcode::Atan2
            | Opcode::Pow
            | Opcode::NthRoot
            | Opcode::Mod
            | Opcode::Compare => 2,
            Opcode::Remap => 4,
        }
    }

    /// Symbol used by the s-expression printer.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Opcode::Invalid => "invalid",
            Opcode::Constant => "const",
            Opcode::VarX => "x",
            Opcode::VarY => "y",
            Opcode::VarZ => "z",
            Opcode::VarFree => "var-free",
            Opcode::ConstVar => "const-var",
            Opcode::Square => "square",
            Opcode::Sqrt => "sqrt",
            Opcode::Neg | Opcode::Sub => "-",
            Opcode::Sin => "sin",
            Opcode::Cos => "cos",
            Opcode::Tan => "tan",
            Opcode::Asin => "asin",
            Opcode::Acos => "acos",
            Opcode::Atan => "atan",
            Opcode::Exp => "exp",
            Opcode::Abs => "abs",
            Opcode::Log => "log",
            Opcode::Recip => "recip",
            Opcode::Add => "+",
            Opcode::Mul => "*",
            Opcode::Min => "min",
            Opcode::Max => "max",
            Opcode::Div => "/",
            Opcode::Atan2 => "atan2",
            Opcode::Pow => "pow",
            Opcode::NthRoot => "nth-root",
            Opcode::Mod => "mod",
            Opcode::Compare => "compare",
            Opcode::Oracle => "oracle",
            Opcode::Remap => "remap",
        }
    }

    /// True for operators where argument order is irrelevant.
    #[must_use]
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Opcode::Add | Opcode::Mul | Opcode::Min | Opcode::Max
        )
    }

    /// True for operators that chain into a variadic form.
    ///
    /// Drives the printer's collapse of nested same-operator nodes.
    #[must_use]
    pub fn is_associative(self) -> bool {
        matches!(
            self,
            Opcode::Add | Opcode::Mul | Opcode::Min | Opcode::Max
        )
    }

    /// Right identity element, where one exists.
    ///
    /// `x op identity == x` for every finite `x`.
    #[must_use]
    pub fn right_identity(self) -> Option<f32> {
        match self {
            Opcode::Add | Opcode::Sub => Some(0.0),
            Opcode::Mul | Opcode::Div | Opcode::Pow | Opcode::NthRoot => Some(1.0),
            _ => None,
        }
    }

    /// Decodes a wire byte back into an opcode.
    #[must_use]
    pub fn from_u8(byte: u8) -> Option<Opcode> {
        Some(match byte {
            0 => Opcode::Invalid,
            1 => Opcode::Constant,
            2 => Opcode::VarX,
            3 => Opcode::VarY,
            4 => Opcode::VarZ,
            5 => Opcode::VarFree,
            6 => Opcode::ConstVar,
            7 => Opcode::Square,
            8 => Opcode::Sqrt,
            9 => Opcode::Neg,
            10 => Opcode::Sin,
            11 => Opcode::Cos,
            12 => Opcode::Tan,
            13 => Opcode::Asin,
            14 => Opcode::Acos,
            15 => Opcode::Atan,
            16 => Opcode::Exp,
            17 => Opcode::Abs,
            18 => Opcode::Log,
            19 => Opcode::Recip,
            20 => Opcode::Add,
            21 => Opcode::Mul,
            22 => Opcode::Min,
            23 => Opcode::Max,
            24 => Opcode::Sub,
            25 => Opcode::Div,
            26 => Opcode::Atan2,
            27 => Opcode::Pow,
            28 => Opcode::NthRoot,
            29 => Opcode::Mod,
            30 => Opcode::Compare,
            31 => Opcode::Oracle,
            32 => Opcode::Remap,
            _ => return None,
        })
    }
}
