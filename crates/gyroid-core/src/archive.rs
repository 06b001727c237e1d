//! Bit-exact binary archive.
//!
//! Layout: a `'T'` magic byte, two quoted metadata strings (name and
//! docstring), one record per unique reachable node with children emitted
//! before parents, then a double `0xFF` terminator. Records open with the
//! opcode wire byte; constants carry little-endian IEEE-754 bits, interior
//! nodes carry little-endian `u32` back-references into the emitted
//! sequence, written in reverse child order. Deserialisation rebuilds
//! through the smart constructors, so interning and the identity rules
//! apply uniformly to loaded graphs.

use std::io::{self, Read, Write};

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::node::TreeOp;
use crate::opcode::Opcode;
use crate::oracle;
use crate::tree::Tree;

const MAGIC: u8 = b'T';
const TERMINATOR: u8 = 0xFF;
const QUOTE: u8 = b'"';
const ESCAPE: u8 = b'\\';

/// Structured deserialisation failure, carrying the stream offset at which
/// it was detected.
#[derive(Debug, Error)]
pub enum DeserializeError {
    /// The stream does not open with the `'T'` magic byte.
    #[error("bad magic byte {found:#04x}")]
    BadMagic {
        /// Byte found instead of the magic.
        found: u8,
    },

    /// The stream ended before the terminator.
    #[error("unexpected end of stream at offset {offset}")]
    UnexpectedEof {
        /// Offset of the truncation.
        offset: u64,
    },

    /// A record opened with a byte outside the opcode table.
    #[error("unknown opcode {opcode:#04x} at offset {offset}")]
    UnknownOpcode {
        /// The offending byte.
        opcode: u8,
        /// Offset of the byte.
        offset: u64,
    },

    /// A back-reference pointed past the records read so far.
    #[error("node index {index} out of bounds at offset {offset}")]
    BadIndex {
        /// The out-of-bounds index.
        index: u32,
        /// Offset of the index field.
        offset: u64,
    },

    /// A metadata or oracle string was unquoted or not UTF-8.
    #[error("malformed string at offset {offset}")]
    BadString {
        /// Offset of the string.
        offset: u64,
    },

    /// Only one of the two terminator bytes was present.
    #[error("bad terminator byte {found:#04x} at offset {offset}")]
    BadTerminator {
        /// Byte found instead of the second `0xFF`.
        found: u8,
        /// Offset of the byte.
        offset: u64,
    },

    /// The stream terminated without any node records.
    #[error("stream contains no nodes")]
    Empty,

    /// An oracle record named a clause with no registered factory.
    #[error("no oracle registered under {name:?}")]
    UnknownOracle {
        /// The unresolved clause name.
        name: String,
    },

    /// An oracle factory reported its own failure.
    #[error("oracle {name:?} failed to deserialize")]
    Oracle {
        /// Clause name whose factory failed.
        name: String,
        /// The factory's error.
        #[source]
        source: oracle::OracleError,
    },

    /// Underlying reader failure other than clean truncation.
    #[error("i/o error")]
    Io(#[from] io::Error),
}

/// Reader wrapper that tracks the stream offset for error reporting.
struct CountingReader<R> {
    inner: R,
    offset: u64,
}

impl<R: Read> CountingReader<R> {
    fn new(inner: R) -> CountingReader<R> {
        CountingReader { inner, offset: 0 }
    }

    fn read_bytes<const N: usize>(&mut self) -> Result<[u8; N], DeserializeError> {
        let mut buf = [0u8; N];
        let offset = self.offset;
        self.read_exact(&mut buf).map_err(|err| {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                DeserializeError::UnexpectedEof { offset }
            } else {
                DeserializeError::Io(err)
            }
        })?;
        Ok(buf)
    }

    fn read_u8(&mut self) -> Result<u8, DeserializeError> {
        Ok(self.read_bytes::<1>()?[0])
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

impl Tree {
    /// Serialises the graph with empty metadata.
    ///
    /// # Errors
    ///
    /// Propagates sink and oracle-callback failures.
    pub fn serialize<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.serialize_with_meta(out, "", "")
    }

    /// Serialises the graph with a name and docstring.
    ///
    /// # Errors
    ///
    /// Propagates sink and oracle-callback failures.
    pub fn serialize_with_meta<W: Write>(
        &self,
        out: &mut W,
        name: &str,
        doc: &str,
    ) -> io::Result<()> {
        out.write_all(&[MAGIC])?;
        write_string(out, name)?;
        write_string(out, doc)?;

        let order = emit_order(self);
        assert!(order.len() < u32::MAX as usize, "graph too large to archive");
        let mut index: FxHashMap<usize, u32> = FxHashMap::default();
        for (i, node) in order.iter().enumerate() {
            write_record(out, node, &index)?;
            index.insert(node.id(), i as u32);
        }
        out.write_all(&[TERMINATOR, TERMINATOR])
    }

    /// Reads a graph serialised by [`Tree::serialize`].
    ///
    /// Nodes are rebuilt through the smart constructors; free variables get
    /// fresh identities, and oracle clauses resolve through the registry.
    ///
    /// # Errors
    ///
    /// Returns a [`DeserializeError`] describing the malformation and the
    /// offset at which it was found.
    pub fn deserialize<R: Read>(source: R) -> Result<Tree, DeserializeError> {
        let mut r = CountingReader::new(source);
        let magic = r.read_u8()?;
        if magic != MAGIC {
            return Err(DeserializeError::BadMagic { found: magic });
        }
        let _name = read_string(&mut r)?;
        let _doc = read_string(&mut r)?;

        let mut nodes: Vec<Tree> = Vec::new();
        loop {
            let offset = r.offset;
            let byte = r.read_u8()?;
            if byte == TERMINATOR {
                let offset = r.offset;
                let second = r.read_u8()?;
                if second != TERMINATOR {
                    return Err(DeserializeError::BadTerminator {
                        found: second,
                        offset,
                    });
                }
                break;
            }
            let op = Opcode::from_u8(byte)
                .ok_or(DeserializeError::UnknownOpcode { opcode: byte, offset })?;
            let node = match op {
                Opcode::Constant => Tree::constant(f32::from_le_bytes(r.read_bytes()?)),
                Opcode::VarX => Tree::x(),
                Opcode::VarY => Tree::y(),
                Opcode::VarZ => Tree::z(),
                Opcode::VarFree => Tree::var(),
                Opcode::ConstVar => read_node(&mut r, &nodes)?.with_const_vars(),
                Opcode::Oracle => {
                    let name = read_string(&mut r)?;
                    let factory = oracle::oracle_factory(&name)
                        .ok_or_else(|| DeserializeError::UnknownOracle { name: name.clone() })?;
                    let clause = factory(&mut r)
                        .map_err(|source| DeserializeError::Oracle { name, source })?;
                    Tree::oracle(clause)
                }
                Opcode::Remap => {
                    let z = read_node(&mut r, &nodes)?;
                    let y = read_node(&mut r, &nodes)?;
                    let x = read_node(&mut r, &nodes)?;
                    let body = read_node(&mut r, &nodes)?;
                    body.remap(x, y, z)
                }
                Opcode::Invalid => {
                    return Err(DeserializeError::UnknownOpcode { opcode: byte, offset })
                }
                op if op.arity() == 1 => Tree::unary(op, read_node(&mut r, &nodes)?),
                op => {
                    let rhs = read_node(&mut r, &nodes)?;
                    let lhs = read_node(&mut r, &nodes)?;
                    Tree::binary(op, lhs, rhs)
                }
            };
            nodes.push(node);
        }
        nodes.pop().ok_or(DeserializeError::Empty)
    }
}

/// Wire order: children before parents, shared nodes at their last
/// post-order position. Computed as the reverse of a first-visit DFS that
/// explores children last-to-first.
fn emit_order(root: &Tree) -> Vec<Tree> {
    let mut order = Vec::new();
    let mut seen = FxHashSet::default();
    let mut stack = vec![root.clone()];
    while let Some(t) = stack.pop() {
        if !seen.insert(t.id()) {
            continue;
        }
        stack.extend(t.children());
        order.push(t);
    }
    order.reverse();
    order
}

fn write_record<W: Write>(
    out: &mut W,
    node: &Tree,
    index: &FxHashMap<usize, u32>,
) -> io::Result<()> {
    out.write_all(&[node.op() as u8])?;
    match &node.data().op {
        TreeOp::Const(v) => out.write_all(&v.to_le_bytes()),
        TreeOp::Axis(_) | TreeOp::Var(_) => Ok(()),
        TreeOp::Unary(_, arg) => write_index(out, index, arg),
        TreeOp::Binary(_, lhs, rhs) => {
            write_index(out, index, rhs)?;
            write_index(out, index, lhs)
        }
        TreeOp::Remap { body, x, y, z } => {
            write_index(out, index, z)?;
            write_index(out, index, y)?;
            write_index(out, index, x)?;
            write_index(out, index, body)
        }
        TreeOp::ConstVar(body) => write_index(out, index, body),
        TreeOp::Oracle(clause) => {
            write_string(out, clause.name())?;
            clause.serialize(out)
        }
    }
}

fn write_index<W: Write>(
    out: &mut W,
    index: &FxHashMap<usize, u32>,
    t: &Tree,
) -> io::Result<()> {
    // Children always precede parents in the emitted order.
    out.write_all(&index[&t.id()].to_le_bytes())
}

fn read_node<R: Read>(
    r: &mut CountingReader<R>,
    nodes: &[Tree],
) -> Result<Tree, DeserializeError> {
    let offset = r.offset;
    let index = u32::from_le_bytes(r.read_bytes()?);
    nodes
        .get(index as usize)
        .cloned()
        .ok_or(DeserializeError::BadIndex { index, offset })
}

fn write_string<W: Write>(out: &mut W, s: &str) -> io::Result<()> {
    out.write_all(&[QUOTE])?;
    for &b in s.as_bytes() {
        if b == QUOTE || b == ESCAPE {
            out.write_all(&[ESCAPE])?;
        }
        out.write_all(&[b])?;
    }
    out.write_all(&[QUOTE])
}

fn read_string<R: Read>(r: &mut CountingReader<R>) -> Result<String, DeserializeError> {
    let start = r.offset;
    if r.read_u8()? != QUOTE {
        return Err(DeserializeError::BadString { offset: start });
    }
    let mut bytes = Vec::new();
    loop {
        match r.read_u8()? {
            QUOTE => break,
            ESCAPE => bytes.push(r.read_u8()?),
            b => bytes.push(b),
        }
    }
    String::from_utf8(bytes).map_err(|_| DeserializeError::BadString { offset: start })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::oracle::{register_oracle, OracleClause};

    #[test]
    fn test_basic_byte_layout() {
        let a = Tree::x().min(Tree::y());
        let mut out = Vec::new();
        a.serialize(&mut out).unwrap();
        assert_eq!(
            out,
            vec![
                b'T', b'"', b'"', b'"', b'"',
                Opcode::VarX as u8,
                Opcode::VarY as u8,
                Opcode::Min as u8, 1, 0, 0, 0, 0, 0, 0, 0,
                0xFF, 0xFF,
            ]
        );
    }

    #[test]
    fn test_local_reference_byte_layout() {
        let a = Tree::x().min(Tree::y() + Tree::x());
        let mut out = Vec::new();
        a.serialize(&mut out).unwrap();
        assert_eq!(
            out,
            vec![
                b'T', b'"', b'"', b'"', b'"',
                Opcode::VarY as u8,
                Opcode::VarX as u8,
                Opcode::Add as u8, 1, 0, 0, 0, 0, 0, 0, 0,
                Opcode::Min as u8, 2, 0, 0, 0, 1, 0, 0, 0,
                0xFF, 0xFF,
            ]
        );
    }

    #[test]
    fn test_roundtrip_simple() {
        let mut out = Vec::new();
        Tree::x().min(Tree::y()).serialize(&mut out).unwrap();

        let a = Tree::deserialize(out.as_slice()).unwrap();
        assert_eq!(a.op(), Opcode::Min);
        assert_eq!(*a.lhs().unwrap(), Tree::x());
        assert_eq!(*a.rhs().unwrap(), Tree::y());
    }

    #[test]
    fn test_roundtrip_constant() {
        let mut out = Vec::new();
        Tree::x().min(Tree::constant(2.5)).serialize(&mut out).unwrap();

        let a = Tree::deserialize(out.as_slice()).unwrap();
        assert_eq!(a.op(), Opcode::Min);
        assert_eq!(a.rhs().unwrap().value(), Some(2.5));
        // Interning applies on load: the whole graph is the same records.
        assert_eq!(a, Tree::x().min(Tree::constant(2.5)));
    }

    #[test]
    fn test_roundtrip_variable() {
        let mut out = Vec::new();
        Tree::x().min(Tree::var()).serialize(&mut out).unwrap();

        let a = Tree::deserialize(out.as_slice()).unwrap();
        assert_eq!(a.op(), Opcode::Min);
        assert_eq!(a.rhs().unwrap().op(), Opcode::VarFree);
    }

    #[test]
    fn test_shared_variable_stays_shared() {
        let v = Tree::var();
        let mut out = Vec::new();
        (&v + &v * 2.0).serialize(&mut out).unwrap();

        let a = Tree::deserialize(out.as_slice()).unwrap();
        // One VAR_FREE record, so the two uses share one fresh variable.
        assert_eq!(a.size(), 4);
        assert_eq!(a.lhs().unwrap(), a.rhs().unwrap().lhs().unwrap());
    }

    #[test]
    fn test_roundtrip_remap_and_const_var() {
        let t = (Tree::x() + Tree::var())
            .remap(Tree::y(), Tree::z() * 2.0, Tree::x())
            .with_const_vars();
        let mut out = Vec::new();
        t.serialize(&mut out).unwrap();

        let a = Tree::deserialize(out.as_slice()).unwrap();
        assert_eq!(a.to_string(), t.to_string());
    }

    #[test]
    fn test_roundtrip_metadata() {
        let mut out = Vec::new();
        Tree::x()
            .serialize_with_meta(&mut out, "gyroid \"shell\"", "escaped \\ name")
            .unwrap();
        let a = Tree::deserialize(out.as_slice()).unwrap();
        assert_eq!(a, Tree::x());
    }

    #[test]
    fn test_roundtrip_oracle() {
        struct SphereOracle;
        impl OracleClause for SphereOracle {
            fn name(&self) -> &str {
                "SphereOracle"
            }
        }
        register_oracle("SphereOracle", |_| Ok(Arc::new(SphereOracle)));

        let t = Tree::x() + Tree::oracle(Arc::new(SphereOracle));
        let mut out = Vec::new();
        t.serialize(&mut out).unwrap();

        let a = Tree::deserialize(out.as_slice()).unwrap();
        assert_eq!(a.to_string(), "(+ x 'SphereOracle)");
        assert!(a.has_oracle());
    }

    #[test]
    fn test_unregistered_oracle() {
        struct GhostOracle;
        impl OracleClause for GhostOracle {
            fn name(&self) -> &str {
                "GhostOracle"
            }
        }

        let t = Tree::oracle(Arc::new(GhostOracle));
        let mut out = Vec::new();
        t.serialize(&mut out).unwrap();

        match Tree::deserialize(out.as_slice()) {
            Err(DeserializeError::UnknownOracle { name }) => assert_eq!(name, "GhostOracle"),
            other => panic!("expected UnknownOracle, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_magic() {
        match Tree::deserialize(&b"Q\"\"\"\"\xFF\xFF"[..]) {
            Err(DeserializeError::BadMagic { found }) => assert_eq!(found, b'Q'),
            other => panic!("expected BadMagic, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_stream() {
        let mut out = Vec::new();
        Tree::x().min(Tree::y()).serialize(&mut out).unwrap();
        out.truncate(10);

        match Tree::deserialize(out.as_slice()) {
            Err(DeserializeError::UnexpectedEof { .. }) => {}
            other => panic!("expected UnexpectedEof, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_opcode() {
        let stream = [b'T', b'"', b'"', b'"', b'"', 0x63, 0xFF, 0xFF];
        match Tree::deserialize(&stream[..]) {
            Err(DeserializeError::UnknownOpcode { opcode: 0x63, offset: 5 }) => {}
            other => panic!("expected UnknownOpcode at 5, got {other:?}"),
        }
    }

    #[test]
    fn test_index_out_of_bounds() {
        let stream = [
            b'T', b'"', b'"', b'"', b'"',
            Opcode::VarX as u8,
            Opcode::Neg as u8, 7, 0, 0, 0,
            0xFF, 0xFF,
        ];
        match Tree::deserialize(&stream[..]) {
            Err(DeserializeError::BadIndex { index: 7, .. }) => {}
            other => panic!("expected BadIndex, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_terminator_byte() {
        let stream = [b'T', b'"', b'"', b'"', b'"', Opcode::VarX as u8, 0xFF, 0x00];
        match Tree::deserialize(&stream[..]) {
            Err(DeserializeError::BadTerminator { found: 0x00, .. }) => {}
            other => panic!("expected BadTerminator, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_stream() {
        let stream = [b'T', b'"', b'"', b'"', b'"', 0xFF, 0xFF];
        match Tree::deserialize(&stream[..]) {
            Err(DeserializeError::Empty) => {}
            other => panic!("expected Empty, got {other:?}"),
        }
    }
}
