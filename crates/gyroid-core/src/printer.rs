//! S-expression dump.
//!
//! Used for debugging and as the structural oracle in tests. Nested
//! applications of an associative operator collapse into variadic form, so
//! `((x + y) + z)` prints as `(+ x y z)`. Constants print in `%g` style:
//! six significant digits, trailing zeros trimmed.

use std::fmt;

use crate::node::{Axis, TreeOp};
use crate::opcode::Opcode;
use crate::tree::Tree;

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_node(f, self)
    }
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_node(f, self)
    }
}

fn write_node(f: &mut fmt::Formatter<'_>, t: &Tree) -> fmt::Result {
    match &t.data().op {
        TreeOp::Const(v) => write_const(f, *v),
        TreeOp::Axis(Axis::X) => f.write_str("x"),
        TreeOp::Axis(Axis::Y) => f.write_str("y"),
        TreeOp::Axis(Axis::Z) => f.write_str("z"),
        TreeOp::Var(_) => f.write_str("var-free"),
        TreeOp::Oracle(clause) => write!(f, "'{}", clause.name()),
        TreeOp::Unary(op, arg) => {
            write!(f, "({} ", op.symbol())?;
            write_node(f, arg)?;
            f.write_str(")")
        }
        TreeOp::Binary(op, lhs, rhs) => {
            write!(f, "({}", op.symbol())?;
            write_operand(f, *op, lhs)?;
            write_operand(f, *op, rhs)?;
            f.write_str(")")
        }
        TreeOp::Remap { body, x, y, z } => write!(f, "(remap {body} {x} {y} {z})"),
        TreeOp::ConstVar(body) => write!(f, "(const-var {body})"),
    }
}

/// Writes one operand, splicing same-operator children of associative
/// operators into the enclosing form.
fn write_operand(f: &mut fmt::Formatter<'_>, op: Opcode, t: &Tree) -> fmt::Result {
    if op.is_associative() {
        if let TreeOp::Binary(child_op, lhs, rhs) = &t.data().op {
            if *child_op == op {
                write_operand(f, op, lhs)?;
                return write_operand(f, op, rhs);
            }
        }
    }
    f.write_str(" ")?;
    write_node(f, t)
}

/// `%g`-style rendering with six significant digits.
fn write_const(f: &mut fmt::Formatter<'_>, v: f32) -> fmt::Result {
    if v.is_nan() {
        return f.write_str("nan");
    }
    if v.is_infinite() {
        return f.write_str(if v > 0.0 { "inf" } else { "-inf" });
    }
    if v == 0.0 {
        return f.write_str(if v.is_sign_negative() { "-0" } else { "0" });
    }
    let sci = format!("{v:e}");
    let exp = sci
        .split('e')
        .nth(1)
        .and_then(|e| e.parse::<i32>().ok())
        .unwrap_or(0);
    if (-4..6).contains(&exp) {
        let decimals = usize::try_from((5 - exp).max(0)).unwrap_or(0);
        let fixed = format!("{v:.decimals$}");
        if decimals > 0 {
            f.write_str(fixed.trim_end_matches('0').trim_end_matches('.'))
        } else {
            f.write_str(&fixed)
        }
    } else {
        let mantissa = format!("{:.5}", v / 10f32.powi(exp));
        let mantissa = mantissa.trim_end_matches('0').trim_end_matches('.');
        write!(f, "{mantissa}e{exp:+03}")
    }
}
