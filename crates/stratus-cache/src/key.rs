//! Cache key derivation.

use hickory_proto::op::Message;
use hickory_proto::serialize::binary::BinEncodable;
use std::fmt;

/// Opaque cache key derived from a query's question section.
///
/// Two queries that are "the same question" for caching purposes (same
/// name modulo ASCII case, same type, same class) produce equal
/// fingerprints.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Box<[u8]>);

impl Fingerprint {
    /// Reconstructs a fingerprint from its byte form.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes.into_boxed_slice())
    }

    /// Returns the byte form.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint(")?;
        for b in self.0.iter() {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

/// Derives the cache key for a query.
///
/// Returns `None`, meaning "do not cache", when the query does not carry
/// exactly one question, or when the name cannot be encoded. The key is
/// the lowercased wire form of the name followed by the type and class.
pub fn fingerprint(query: &Message) -> Option<Fingerprint> {
    let [question] = query.queries() else {
        return None;
    };

    let name = question.name().to_lowercase().to_bytes().ok()?;

    let mut bytes = Vec::with_capacity(name.len() + 4);
    bytes.extend_from_slice(&name);
    bytes.extend_from_slice(&u16::from(question.query_type()).to_be_bytes());
    bytes.extend_from_slice(&u16::from(question.query_class()).to_be_bytes());
    Some(Fingerprint::from_bytes(bytes))
}
