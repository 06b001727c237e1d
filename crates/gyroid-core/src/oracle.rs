//! Opaque oracle clauses.
//!
//! An oracle is a user-supplied leaf whose semantics are defined entirely by
//! its callbacks; the core never looks inside one. Clauses are compared by
//! identity, printed by name, and archived through a process-wide registry
//! keyed by that name.

use std::io::{Read, Write};
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use rustc_hash::FxBuildHasher;

/// Error type produced by oracle callbacks.
pub type OracleError = Box<dyn std::error::Error + Send + Sync>;

/// Capability set for an opaque oracle leaf.
///
/// Implementations must be cheap to share; the tree holds them behind an
/// `Arc`, so cloning a tree never clones the clause itself.
pub trait OracleClause: Send + Sync {
    /// Textual tag, used by the printer (`'Name`) and as the registry key.
    fn name(&self) -> &str;

    /// Writes the clause's archive payload.
    ///
    /// The default payload is empty, which suits stateless clauses.
    fn serialize(&self, out: &mut dyn Write) -> std::io::Result<()> {
        let _ = out;
        Ok(())
    }
}

/// Reconstructs a clause from its archive payload.
pub type OracleFactory = fn(&mut dyn Read) -> Result<Arc<dyn OracleClause>, OracleError>;

static REGISTRY: LazyLock<DashMap<String, OracleFactory, FxBuildHasher>> =
    LazyLock::new(|| DashMap::with_hasher(FxBuildHasher::default()));

/// Registers a factory for clauses named `name`.
///
/// Later registrations replace earlier ones.
pub fn register_oracle(name: &str, factory: OracleFactory) {
    REGISTRY.insert(name.to_owned(), factory);
}

/// Looks up the factory for a clause name, if one was registered.
#[must_use]
pub fn oracle_factory(name: &str) -> Option<OracleFactory> {
    REGISTRY.get(name).map(|entry| *entry.value())
}
