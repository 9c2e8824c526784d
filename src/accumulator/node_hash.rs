//! [NodeHash] is the digest type committed to by every node in the forest.
//! It is a wrapper around `[u8; 32]` with some useful methods.
//! # Examples
//! Building from a str
//! ```
//! use std::str::FromStr;
//!
//! use grove::accumulator::node_hash::NodeHash;
//! let hash = NodeHash::from_str(
//!     "0000000000000000000000000000000000000000000000000000000000000000",
//! )
//! .unwrap();
//! assert!(hash.is_empty());
//! ```
//! Building from an array
//! ```
//! use grove::accumulator::node_hash::NodeHash;
//! let hash1 = NodeHash::new([1; 32]);
//! // ... or ...
//! let hash2 = NodeHash::from([1; 32]);
//! assert_eq!(hash1, hash2);
//! ```
use std::fmt::Debug;
use std::fmt::Display;
use std::str::FromStr;

use bitcoin_hashes::hex;
#[cfg(feature = "with-serde")]
use serde::Deserialize;
#[cfg(feature = "with-serde")]
use serde::Serialize;

/// A 32 byte digest of one node in the forest. For leaves this is the hash
/// of the element committed to; for internal nodes it is the parent hash of
/// the two children.
///
/// The all-zero value is reserved: it means "absent" and never collides
/// with a real digest in practice. Deleted leaves, vacated forest slots and
/// unknown pollard data are all represented by it.
#[derive(Eq, PartialEq, Copy, Clone, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "with-serde", derive(Serialize, Deserialize))]
pub struct NodeHash([u8; 32]);

/// A short fingerprint of a [NodeHash], used as a compact key in the
/// position maps. Twelve bytes keeps the maps small while making an
/// accidental collision vanishingly unlikely.
#[derive(Eq, PartialEq, Copy, Clone, Hash, PartialOrd, Ord, Debug)]
#[cfg_attr(feature = "with-serde", derive(Serialize, Deserialize))]
pub struct MiniHash([u8; 12]);

impl NodeHash {
    /// Creates a new NodeHash from a 32 byte array.
    pub fn new(inner: [u8; 32]) -> Self {
        NodeHash(inner)
    }

    /// The reserved all-zero hash, meaning "absent".
    pub fn empty() -> Self {
        NodeHash([0; 32])
    }

    /// Whether this is the reserved absent value.
    /// # Example
    /// ```
    /// use grove::accumulator::node_hash::NodeHash;
    /// assert!(NodeHash::empty().is_empty());
    /// assert!(!NodeHash::new([1; 32]).is_empty());
    /// ```
    pub fn is_empty(&self) -> bool {
        self.0 == [0; 32]
    }

    /// The 12 byte fingerprint of this hash.
    pub fn mini(&self) -> MiniHash {
        let mut inner = [0; 12];
        inner.copy_from_slice(&self.0[..12]);
        MiniHash(inner)
    }

    /// Writes the raw 32 bytes to a writer.
    pub fn write<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: std::io::Write,
    {
        writer.write_all(&self.0)
    }

    /// Reads 32 raw bytes from a reader.
    pub fn read<R>(reader: &mut R) -> std::io::Result<Self>
    where
        R: std::io::Read,
    {
        let mut inner = [0; 32];
        reader.read_exact(&mut inner)?;
        Ok(NodeHash(inner))
    }
}

impl AsRef<[u8]> for NodeHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for NodeHash {
    fn from(hash: [u8; 32]) -> Self {
        NodeHash(hash)
    }
}

impl From<&[u8; 32]> for NodeHash {
    fn from(hash: &[u8; 32]) -> Self {
        NodeHash(*hash)
    }
}

impl From<bitcoin_hashes::sha256::Hash> for NodeHash {
    fn from(hash: bitcoin_hashes::sha256::Hash) -> Self {
        use bitcoin_hashes::Hash;
        NodeHash(hash.to_byte_array())
    }
}

impl Display for NodeHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        if self.is_empty() {
            return write!(f, "empty");
        }
        let mut s = String::new();
        for byte in self.0.iter() {
            s.push_str(&format!("{byte:02x}"));
        }
        write!(f, "{s}")
    }
}

impl Debug for NodeHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        Display::fmt(self, f)
    }
}

impl FromStr for NodeHash {
    type Err = hex::HexToArrayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner: [u8; 32] = hex::FromHex::from_hex(s)?;
        Ok(NodeHash(inner))
    }
}

/// Hashes one byte with sha256. Only useful to build deterministic leaves
/// in tests and benchmarks.
pub fn hash_from_u8(value: u8) -> NodeHash {
    use bitcoin_hashes::sha256;
    use bitcoin_hashes::Hash;
    use bitcoin_hashes::HashEngine;
    let mut engine = sha256::Hash::engine();

    engine.input(&[value]);

    sha256::Hash::from_engine(engine).into()
}
