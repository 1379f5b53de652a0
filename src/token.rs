//! Token ring primitives.
//!
//! A [`Token`] is an opaque, totally ordered key image on the partitioner's
//! ring. A [`Range`] is a half-open, wrapping interval `(start, end]` on
//! that ring — the shape every repair and compaction range argument in this
//! crate is expressed in. [`AbstractBounds`] generalizes to the closed
//! variant ([`Bounds`]) used by legacy range-slice commands.
//!
//! This module has no I/O and no dependency on the rest of the crate; it is
//! pure ring arithmetic plus the two partitioner strategies `Validator`
//! chooses between.

use std::hash::{Hash, Hasher};

// ------------------------------------------------------------------------------------------------
// Token
// ------------------------------------------------------------------------------------------------

/// A partitioner-defined, totally ordered key image on the ring.
///
/// Tokens wrap at `u128::MAX`: the ring has no distinguished zero other
/// than by convention (`Token::MIN`/`Token::MAX` bound the ring but do not
/// imply a partitioner-specific minimum key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub u128);

impl Token {
    pub const MIN: Token = Token(u128::MIN);
    pub const MAX: Token = Token(u128::MAX);
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

// ------------------------------------------------------------------------------------------------
// Partitioner
// ------------------------------------------------------------------------------------------------

/// Maps raw row keys to ring [`Token`]s.
///
/// Two families exist in real systems: order-preserving partitioners (ring
/// order matches key byte order; useful for range scans but produces hot
/// spots) and hash partitioners (uniform ring distribution, no key-order
/// relationship).
pub trait Partitioner: Send + Sync {
    /// Computes the ring token for a raw row key.
    fn token_for(&self, key: &[u8]) -> Token;

    /// `true` iff `a < b` (as raw bytes) implies `token_for(a) <= token_for(b)`.
    fn preserves_order(&self) -> bool;
}

/// Hash-based partitioner: tokens are a stable 128-bit hash of the key.
///
/// Ring-uniform but not order-preserving. This is the default partitioner
/// for random-distribution workloads, assigning each key a cryptographic
/// hash token. It does not reproduce Cassandra's exact Murmur3 bit
/// pattern — only a stable, uniform hash is required here.
#[derive(Debug, Default, Clone, Copy)]
pub struct Murmur3Partitioner;

impl Partitioner for Murmur3Partitioner {
    fn token_for(&self, key: &[u8]) -> Token {
        // 128 bits from two independent 64-bit hashes of the key, each
        // salted differently so the halves are not trivially correlated.
        let mut h1 = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut h1);
        0xA5A5_5A5A_u64.hash(&mut h1);
        let lo = h1.finish();

        let mut h2 = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut h2);
        0x5A5A_A5A5_u64.hash(&mut h2);
        let hi = h2.finish();

        Token(((hi as u128) << 64) | lo as u128)
    }

    fn preserves_order(&self) -> bool {
        false
    }
}

/// Order-preserving partitioner: the token is the key's bytes, left-padded
/// with zero bytes and truncated/padded to 16 bytes, interpreted big-endian.
///
/// Ring order then matches key byte order exactly for keys that share a
/// 16-byte prefix; this is sufficient for the sampling strategy in
/// `Validator::prepare`, which only needs ring order to agree with key
/// order, not an injective mapping.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrderPreservingPartitioner;

impl Partitioner for OrderPreservingPartitioner {
    fn token_for(&self, key: &[u8]) -> Token {
        let mut buf = [0u8; 16];
        let n = key.len().min(16);
        buf[..n].copy_from_slice(&key[..n]);
        Token(u128::from_be_bytes(buf))
    }

    fn preserves_order(&self) -> bool {
        true
    }
}

// ------------------------------------------------------------------------------------------------
// DecoratedKey
// ------------------------------------------------------------------------------------------------

/// A row's ring position paired with its raw key.
///
/// Ordered by `(token, raw_key)` — two different keys that happen to hash
/// to the same token are still totally ordered by their raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoratedKey {
    pub token: Token,
    pub key: Vec<u8>,
}

impl DecoratedKey {
    pub fn new(partitioner: &dyn Partitioner, key: impl Into<Vec<u8>>) -> Self {
        let key = key.into();
        let token = partitioner.token_for(&key);
        Self { token, key }
    }

    /// Encodes this key as `token.to_be_bytes() ++ raw_key` so that
    /// byte-lexicographic order on the result exactly matches
    /// [`DecoratedKey`]'s own `(token, key)` order.
    ///
    /// Used by the SSTable layer, whose on-disk blocks are sorted and
    /// searched by raw byte comparison — storing this encoding instead of
    /// the bare raw key lets that machinery stay token-order-correct
    /// without itself knowing about tokens.
    pub fn to_storage_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + self.key.len());
        buf.extend_from_slice(&self.token.0.to_be_bytes());
        buf.extend_from_slice(&self.key);
        buf
    }

    /// Inverse of [`DecoratedKey::to_storage_bytes`].
    pub fn from_storage_bytes(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() >= 16, "storage key shorter than token prefix");
        let mut token_bytes = [0u8; 16];
        let n = bytes.len().min(16);
        token_bytes[..n].copy_from_slice(&bytes[..n]);
        let token = Token(u128::from_be_bytes(token_bytes));
        let key = bytes.get(16..).map(|s| s.to_vec()).unwrap_or_default();
        Self { token, key }
    }
}

impl PartialOrd for DecoratedKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DecoratedKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.token, &self.key).cmp(&(other.token, &other.key))
    }
}

impl crate::encoding::Encode for Token {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), crate::encoding::EncodingError> {
        self.0.encode_to(buf)
    }
}

impl crate::encoding::Decode for Token {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), crate::encoding::EncodingError> {
        let (raw, n) = u128::decode_from(buf)?;
        Ok((Token(raw), n))
    }
}

impl crate::encoding::Encode for DecoratedKey {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), crate::encoding::EncodingError> {
        self.token.encode_to(buf)?;
        self.key.encode_to(buf)?;
        Ok(())
    }
}

impl crate::encoding::Decode for DecoratedKey {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), crate::encoding::EncodingError> {
        let mut offset = 0;
        let (token, n) = Token::decode_from(&buf[offset..])?;
        offset += n;
        let (key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        Ok((Self { token, key }, offset))
    }
}

// ------------------------------------------------------------------------------------------------
// AbstractBounds — Range (wrapping, half-open) and Bounds (closed)
// ------------------------------------------------------------------------------------------------

/// A half-open, possibly-wrapping interval `(start, end]` on the ring.
///
/// `start == end` denotes the full ring (every token is contained), which
/// is the convention this crate uses for "no filter" / whole-ring repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range<T = Token> {
    pub start: T,
    pub end: T,
}

impl Range<Token> {
    pub const fn new(start: Token, end: Token) -> Self {
        Self { start, end }
    }

    /// The entire ring.
    pub const FULL: Range<Token> = Range {
        start: Token::MIN,
        end: Token::MIN,
    };

    pub fn is_full(&self) -> bool {
        self.start == self.end
    }

    /// `true` iff `token` falls in `(start, end]` (wrapping), or the range
    /// is the full ring.
    pub fn contains(&self, token: Token) -> bool {
        if self.is_full() {
            return true;
        }
        if self.start < self.end {
            token > self.start && token <= self.end
        } else {
            // Wraps around Token::MAX/MIN.
            token > self.start || token <= self.end
        }
    }

    /// Splits `self` into one or two non-wrapping, closed `[lo, hi]`
    /// segments on the underlying `u128` domain.
    ///
    /// Treats the open start bound as closed for this internal
    /// representation — a harmless over-approximation affecting at most
    /// the single boundary token, acceptable for the set operations below.
    pub(crate) fn closed_segments(&self) -> Vec<(Token, Token)> {
        if self.start < self.end {
            vec![(self.start, self.end)]
        } else {
            vec![(self.start, Token::MAX), (Token::MIN, self.end)]
        }
    }

    /// `true` iff the two ranges share at least one token.
    pub fn intersects(&self, other: &Range<Token>) -> bool {
        if self.is_full() || other.is_full() {
            return true;
        }
        self.closed_segments().iter().any(|&(a, b)| {
            other
                .closed_segments()
                .iter()
                .any(|&(c, d)| a <= d && c <= b)
        })
    }

    /// Subtracts `other` from `self`, returning the (zero, one, or two)
    /// sub-ranges of `self` not covered by `other`.
    ///
    /// Returns `self` unchanged if the two ranges do not intersect.
    pub fn difference(&self, other: &Range<Token>) -> Vec<Range<Token>> {
        if other.is_full() {
            return Vec::new();
        }
        if self.is_full() {
            // Whole ring minus `other` is the complement of `other`.
            return vec![Range::new(other.end, other.start)];
        }

        let mut segs = self.closed_segments();
        for &(c, d) in &other.closed_segments() {
            let mut next = Vec::new();
            for (a, b) in segs {
                next.extend(subtract_closed((a, b), (c, d)));
            }
            segs = next;
        }

        segs.into_iter().map(|(a, b)| Range::new(a, b)).collect()
    }
}

/// Subtracts closed interval `(c, d)` from closed interval `(a, b)` on the
/// plain `u128` domain (no ring wraparound — callers pre-split into
/// non-wrapping segments).
fn subtract_closed(ab: (Token, Token), cd: (Token, Token)) -> Vec<(Token, Token)> {
    let (a, b) = ab;
    let (c, d) = cd;
    if d < a || c > b {
        return vec![(a, b)];
    }
    let mut out = Vec::new();
    if c > a {
        out.push((a, Token(c.0.saturating_sub(1))));
    }
    if d < b {
        out.push((Token(d.0.saturating_add(1)), b));
    }
    out
}

/// A closed interval `[start, end]`, used by legacy (pre-wrapping) range
/// commands. Carried for wire compatibility only — `Range<Token>` is used
/// everywhere internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds<T = Token> {
    pub start: T,
    pub end: T,
}

/// Tagged union mirroring the original system's `AbstractBounds`
/// hierarchy: a closed [`Bounds`] or a wrapping, half-open [`Range`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbstractBounds<T = Token> {
    Bounds(Bounds<T>),
    Range(Range<T>),
}

// ------------------------------------------------------------------------------------------------
// Tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn murmur3_partitioner_is_stable_and_uniform_ish() {
        let p = Murmur3Partitioner;
        assert_eq!(p.token_for(b"hello"), p.token_for(b"hello"));
        assert_ne!(p.token_for(b"hello"), p.token_for(b"world"));
        assert!(!p.preserves_order());
    }

    #[test]
    fn order_preserving_partitioner_respects_key_order() {
        let p = OrderPreservingPartitioner;
        assert!(p.preserves_order());
        assert!(p.token_for(b"a") < p.token_for(b"b"));
        assert!(p.token_for(b"aa") < p.token_for(b"ab"));
    }

    #[test]
    fn decorated_key_orders_by_token_then_key() {
        let a = DecoratedKey {
            token: Token(1),
            key: b"z".to_vec(),
        };
        let b = DecoratedKey {
            token: Token(1),
            key: b"a".to_vec(),
        };
        let c = DecoratedKey {
            token: Token(2),
            key: b"a".to_vec(),
        };
        assert!(b < a);
        assert!(a < c);
    }

    #[test]
    fn range_contains_non_wrapping() {
        let r = Range::new(Token(10), Token(20));
        assert!(!r.contains(Token(10)));
        assert!(r.contains(Token(11)));
        assert!(r.contains(Token(20)));
        assert!(!r.contains(Token(21)));
    }

    #[test]
    fn range_contains_wrapping() {
        let r = Range::new(Token(90), Token(10));
        assert!(r.contains(Token(95)));
        assert!(r.contains(Token(5)));
        assert!(!r.contains(Token(50)));
    }

    #[test]
    fn full_range_contains_everything() {
        let r = Range::FULL;
        assert!(r.contains(Token(0)));
        assert!(r.contains(Token::MAX));
        assert!(r.contains(Token(123_456)));
    }

    #[test]
    fn disjoint_ranges_do_not_intersect() {
        let a = Range::new(Token(0), Token(10));
        let b = Range::new(Token(20), Token(30));
        assert!(!a.intersects(&b));
        assert!(!b.intersects(&a));
    }

    #[test]
    fn overlapping_ranges_intersect() {
        let a = Range::new(Token(0), Token(10));
        let b = Range::new(Token(5), Token(15));
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
    }

    #[test]
    fn difference_removes_middle_segment() {
        let a = Range::new(Token(0), Token(100));
        let b = Range::new(Token(40), Token(60));
        let diff = a.difference(&b);
        assert_eq!(diff.len(), 2);
        assert_eq!(diff[0], Range::new(Token(0), Token(39)));
        assert_eq!(diff[1], Range::new(Token(61), Token(100)));
    }

    #[test]
    fn difference_of_disjoint_ranges_is_self() {
        let a = Range::new(Token(0), Token(10));
        let b = Range::new(Token(50), Token(60));
        assert_eq!(a.difference(&b), vec![a]);
    }

    #[test]
    fn storage_bytes_round_trip_and_preserve_order() {
        let a = DecoratedKey {
            token: Token(5),
            key: b"a".to_vec(),
        };
        let b = DecoratedKey {
            token: Token(5),
            key: b"b".to_vec(),
        };
        let c = DecoratedKey {
            token: Token(6),
            key: b"a".to_vec(),
        };
        assert!(a.to_storage_bytes() < b.to_storage_bytes());
        assert!(b.to_storage_bytes() < c.to_storage_bytes());
        assert_eq!(DecoratedKey::from_storage_bytes(&a.to_storage_bytes()), a);
    }

    #[test]
    fn decorated_key_encode_round_trips() {
        use crate::encoding::{Decode, Encode};
        let key = DecoratedKey {
            token: Token(0xdead_beef),
            key: b"row-key".to_vec(),
        };
        let mut buf = Vec::new();
        key.encode_to(&mut buf).unwrap();
        let (decoded, consumed) = DecoratedKey::decode_from(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, key);
    }

    #[test]
    fn difference_full_minus_range_is_complement() {
        let full = Range::FULL;
        let b = Range::new(Token(10), Token(20));
        let diff = full.difference(&b);
        assert_eq!(diff, vec![Range::new(Token(20), Token(10))]);
    }
}
