//! # gyroid-core
//!
//! Expression-graph core for a CAD modeller whose shapes are implicit
//! scalar functions of X, Y, and Z.
//!
//! This crate provides:
//! - Atomically reference-counted, immutable expression DAGs
//! - Process-wide hash-consing with O(1) structural equality
//! - Smart constructors with constant folding and identity collapses
//! - Lazy axis substitution (`remap`) with eager realisation (`flatten`)
//! - Affine-sum canonicalisation and a composed optimisation pipeline
//! - A bit-exact binary archive and an s-expression dump
//!
//! ## Design Principles
//!
//! - **Value semantics**: handles clone and drop freely; equality is record
//!   identity, and structurally equal expressions share one record
//! - **Thread safety**: graphs build, share, and drop from any thread
//! - **Bounded stacks**: every pass over a graph is iterative, so depth
//!   never translates into call-stack depth
//!
//! ## Quick Start
//!
//! ```rust
//! use gyroid_core::Tree;
//!
//! let sphere = (Tree::x().square() + Tree::y().square() + Tree::z().square())
//!     .sqrt()
//!     - 1.0;
//! assert_eq!(sphere.to_string(), "(- (sqrt (+ (square x) (square y) (square z))) 1)");
//!
//! let shifted = sphere.remap(Tree::x() + 0.5, Tree::y(), Tree::z()).flatten();
//! assert!(!shifted.has_remap());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod affine;
mod archive;
mod intern;
mod node;
mod opcode;
mod oracle;
mod printer;
mod rewrite;
mod tree;
mod walk;

#[cfg(test)]
mod proptests;

pub use archive::DeserializeError;
pub use opcode::Opcode;
pub use oracle::{oracle_factory, register_oracle, OracleClause, OracleError, OracleFactory};
pub use tree::Tree;
pub use walk::Walk;
