//! End-to-end scenarios on large and deeply nested graphs.
//!
//! Every pass in the crate claims to tolerate graphs tens of thousands of
//! levels deep; these tests build such graphs and push them through the
//! whole pipeline.

use gyroid_core::{Opcode, Tree};

const DEPTH: usize = 32_768;

#[test]
fn deep_remap_leaves_original_untouched() {
    let mut t = Tree::x();
    let y = Tree::y();
    for i in 0..DEPTH {
        t = t + &y * (i as f32);
    }

    let z = t.remap(Tree::z(), Tree::x(), Tree::y()).flatten();

    // The original is unchanged.
    assert_eq!(t.op(), Opcode::Add);
    assert_eq!(t.lhs().unwrap().op(), Opcode::Add);
    assert_eq!(t.rhs().unwrap().op(), Opcode::Mul);
    assert_eq!(t.rhs().unwrap().lhs().unwrap().op(), Opcode::VarY);
    assert_eq!(t.rhs().unwrap().rhs().unwrap().op(), Opcode::Constant);
    assert_eq!(
        t.lhs().unwrap().rhs().unwrap().lhs().unwrap().op(),
        Opcode::VarY
    );

    // The substitution went through: X became Z and Y became X.
    assert_eq!(z.op(), Opcode::Add);
    assert_eq!(z.lhs().unwrap().op(), Opcode::Add);
    assert_eq!(z.rhs().unwrap().op(), Opcode::Mul);
    assert_eq!(z.rhs().unwrap().lhs().unwrap().op(), Opcode::VarX);
    assert_eq!(z.rhs().unwrap().rhs().unwrap().op(), Opcode::Constant);
    assert_eq!(
        z.lhs().unwrap().rhs().unwrap().lhs().unwrap().op(),
        Opcode::VarX
    );
}

#[test]
fn deep_walk_and_size() {
    let mut t = Tree::x();
    for i in 2..=DEPTH {
        t = t + Tree::y() * (i as f32);
    }
    let unique_nodes = 3 * (DEPTH - 1) + 2;
    assert_eq!(t.size(), unique_nodes);
    assert_eq!(t.walk().count(), unique_nodes);
}

#[test]
fn deep_unique_and_collect_affine() {
    let mut t = Tree::x();
    for i in 2..=DEPTH {
        t = t + Tree::y() * (i as f32);
    }
    assert_eq!(t.unique(), t);

    // Affine collection folds the whole spine into one scaled term plus
    // nothing else: sum(i..=DEPTH) scales of Y plus a bare X.
    let collected = t.collect_affine();
    assert_eq!(collected.op(), Opcode::Add);
    assert_eq!(*collected.lhs().unwrap(), Tree::x());
    let y_term = collected.rhs().unwrap();
    assert_eq!(y_term.op(), Opcode::Mul);
    assert_eq!(*y_term.lhs().unwrap(), Tree::y());
}

#[test]
fn deep_serialize_roundtrip() {
    let mut t = Tree::x();
    for i in 2..=1024 {
        t = (t + Tree::y() * (i as f32)).min(Tree::z() - (i as f32));
    }
    let mut buf = Vec::new();
    t.serialize(&mut buf).unwrap();
    let back = Tree::deserialize(buf.as_slice()).unwrap();
    assert_eq!(back, t);
}

#[test]
fn deep_drop_is_iterative() {
    let mut t = Tree::var();
    for _ in 0..DEPTH {
        t = t.min(Tree::var());
    }
    drop(t);
}
