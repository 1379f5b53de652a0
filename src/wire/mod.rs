//! Wire messages exchanged between repair session peers, and the
//! version-gated serializer that frames them.
//!
//! Grounded on the crate's own hand-rolled `encoding::{Encode, Decode}`
//! traits (see `src/encoding/mod.rs`) — the same zero-dependency framing
//! the manifest and WAL use for durable records is reused here for
//! over-the-wire records, rather than reaching for a second serialization
//! stack. The version-band gate (`ProtocolVersion`) is this crate's stand
//! in for a real `IVersionedSerializer` registry: each message picks the
//! oldest version able to carry it and refuses to encode for anything
//! older.

use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::merkle::MerkleTree;
use crate::token::{Range, Token};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WireError {
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("message requires protocol version >= {required}, negotiated {negotiated}")]
    UnsupportedVersion { required: u32, negotiated: u32 },

    #[error("unknown message tag {0}")]
    UnknownTag(u32),
}

/// A negotiated wire protocol version. Named bands mirror the points at
/// which this crate's message set changed shape; anything encoded for an
/// older band must degrade gracefully or be rejected, never silently
/// truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtocolVersion(pub u32);

impl ProtocolVersion {
    /// Before streaming repair carried a session id: tree exchange only.
    pub const V_PRE11: ProtocolVersion = ProtocolVersion(6);
    /// Adds `session_id` to every repair message.
    pub const V11: ProtocolVersion = ProtocolVersion(7);
    /// Adds range-qualified streaming (`RangeSliceCommand`).
    pub const V12: ProtocolVersion = ProtocolVersion(8);
    /// Adds `SnapshotCommand` for repair-time snapshot isolation.
    pub const V20: ProtocolVersion = ProtocolVersion(9);

    pub const CURRENT: ProtocolVersion = Self::V20;

    fn require(self, min: ProtocolVersion) -> Result<(), WireError> {
        if self < min {
            return Err(WireError::UnsupportedVersion {
                required: min.0,
                negotiated: self.0,
            });
        }
        Ok(())
    }
}

impl Encode for ProtocolVersion {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.0.encode_to(buf)
    }
}

impl Decode for ProtocolVersion {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (v, n) = u32::decode_from(buf)?;
        Ok((ProtocolVersion(v), n))
    }
}

// ------------------------------------------------------------------------------------------------
// Wire-transmissible Merkle tree
// ------------------------------------------------------------------------------------------------

/// A flattened snapshot of a [`MerkleTree`]'s leaf level: enough to
/// reconstruct an equivalent tree on the receiving end via
/// [`to_tree`](WireMerkleTree::to_tree).
#[derive(Debug, Clone, PartialEq)]
pub struct WireMerkleTree {
    pub range: Range<Token>,
    pub max_depth: usize,
    pub leaves: Vec<(Range<Token>, [u8; 32])>,
}

impl WireMerkleTree {
    pub fn from_tree(tree: &MerkleTree, max_depth: usize) -> Self {
        let ranges = tree.leaf_ranges();
        let hashes = tree.leaf_hashes();
        Self {
            range: tree.range(),
            max_depth,
            leaves: ranges.into_iter().zip(hashes).collect(),
        }
    }

    /// Reconstructs a tree with the same leaf boundaries and hashes this
    /// snapshot carries, by replaying the same `split`/`fold_leaf`
    /// sequence a fresh tree's builder would have used.
    pub fn to_tree(&self) -> MerkleTree {
        let mut tree = MerkleTree::new(self.range, self.max_depth);
        for (range, _) in self.leaves.iter().take(self.leaves.len().saturating_sub(1)) {
            tree.split(range.end);
        }
        for (i, (_, hash)) in self.leaves.iter().enumerate() {
            tree.fold_leaf(i, *hash);
        }
        tree
    }
}

fn count_overflow(len: usize) -> EncodingError {
    EncodingError::LengthOverflow(format!("leaf count {len} exceeds u32::MAX"))
}

impl Encode for WireMerkleTree {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.range.start.0.encode_to(buf)?;
        self.range.end.0.encode_to(buf)?;
        (self.max_depth as u64).encode_to(buf)?;
        let count = u32::try_from(self.leaves.len()).map_err(|_| count_overflow(self.leaves.len()))?;
        count.encode_to(buf)?;
        for (range, hash) in &self.leaves {
            range.start.0.encode_to(buf)?;
            range.end.0.encode_to(buf)?;
            hash.to_vec().encode_to(buf)?;
        }
        Ok(())
    }
}

impl Decode for WireMerkleTree {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (start, n) = u128::decode_from(&buf[offset..])?;
        offset += n;
        let (end, n) = u128::decode_from(&buf[offset..])?;
        offset += n;
        let (max_depth, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (count, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let mut leaves = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (s, n) = u128::decode_from(&buf[offset..])?;
            offset += n;
            let (e, n) = u128::decode_from(&buf[offset..])?;
            offset += n;
            let (h, n) = Vec::<u8>::decode_from(&buf[offset..])?;
            offset += n;
            if h.len() != 32 {
                return Err(EncodingError::LengthOverflow(
                    "merkle leaf hash must be 32 bytes".into(),
                ));
            }
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&h);
            leaves.push((Range::new(Token(s), Token(e)), hash));
        }
        Ok((
            Self {
                range: Range::new(Token(start), Token(end)),
                max_depth: max_depth as usize,
                leaves,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Messages
// ------------------------------------------------------------------------------------------------

/// Requests a Merkle tree for `range` over `keyspace.table` from a peer,
/// valid from [`ProtocolVersion::V_PRE11`] onward. The session id field is
/// only populated from [`ProtocolVersion::V11`] onward; `endpoint` and
/// `gc_before` only travel on the wire from [`ProtocolVersion::V20`]
/// onward, matching the version the requester's own `SnapshotCommand`
/// support was added in.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeRequest {
    pub session_id: Option<Uuid>,
    pub endpoint: String,
    pub gc_before: i32,
    pub keyspace: String,
    pub table: String,
    pub range: Range<Token>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeResponse {
    pub session_id: Option<Uuid>,
    pub tree: WireMerkleTree,
}

/// Result of a pairwise tree comparison: the ranges a requester should
/// stream to resolve disagreement with one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRequest {
    pub session_id: Uuid,
    pub src: String,
    pub dst: String,
    pub ranges: Vec<Range<Token>>,
}

/// Streams the rows covering `ranges` of `keyspace.table` from `src` to
/// `dst` as part of a repair session. Requires
/// [`ProtocolVersion::V12`] — earlier versions had no range-qualified
/// streaming and always shipped a whole table.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeSliceCommand {
    pub session_id: Uuid,
    pub keyspace: String,
    pub table: String,
    pub ranges: Vec<Range<Token>>,
}

/// Asks a peer to take a point-in-time snapshot of `keyspace.table` before
/// validating it, so the tree reflects a consistent view even if writes
/// continue concurrently. Requires [`ProtocolVersion::V20`].
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotCommand {
    pub session_id: Uuid,
    pub keyspace: String,
    pub table: String,
}

macro_rules! encode_string_pair {
    ($buf:expr, $a:expr, $b:expr) => {{
        $a.to_string().encode_to($buf)?;
        $b.to_string().encode_to($buf)?;
    }};
}

impl TreeRequest {
    pub fn encode(&self, version: ProtocolVersion) -> Result<Vec<u8>, WireError> {
        version.require(ProtocolVersion::V_PRE11)?;
        let mut buf = Vec::new();
        if version >= ProtocolVersion::V11 {
            self.session_id.unwrap_or_default().as_bytes().to_vec().encode_to(&mut buf)?;
        }
        if version >= ProtocolVersion::V20 {
            self.endpoint.encode_to(&mut buf)?;
            self.gc_before.encode_to(&mut buf)?;
        }
        encode_string_pair!(&mut buf, self.keyspace, self.table);
        self.range.start.0.encode_to(&mut buf)?;
        self.range.end.0.encode_to(&mut buf)?;
        Ok(buf)
    }

    pub fn decode(buf: &[u8], version: ProtocolVersion) -> Result<Self, WireError> {
        version.require(ProtocolVersion::V_PRE11)?;
        let mut offset = 0;
        let session_id = if version >= ProtocolVersion::V11 {
            let (raw, n) = Vec::<u8>::decode_from(&buf[offset..])?;
            offset += n;
            Some(uuid_from_bytes(&raw)?)
        } else {
            None
        };
        let (endpoint, gc_before) = if version >= ProtocolVersion::V20 {
            let (endpoint, n) = String::decode_from(&buf[offset..])?;
            offset += n;
            let (gc_before, n) = i32::decode_from(&buf[offset..])?;
            offset += n;
            (endpoint, gc_before)
        } else {
            (String::new(), 0)
        };
        let (keyspace, n) = String::decode_from(&buf[offset..])?;
        offset += n;
        let (table, n) = String::decode_from(&buf[offset..])?;
        offset += n;
        let (start, n) = u128::decode_from(&buf[offset..])?;
        offset += n;
        let (end, _) = u128::decode_from(&buf[offset..])?;
        Ok(Self {
            session_id,
            endpoint,
            gc_before,
            keyspace,
            table,
            range: Range::new(Token(start), Token(end)),
        })
    }
}

fn uuid_from_bytes(raw: &[u8]) -> Result<Uuid, WireError> {
    let bytes: [u8; 16] = raw
        .try_into()
        .map_err(|_| EncodingError::LengthOverflow("session id must be 16 bytes".into()))?;
    Ok(Uuid::from_bytes(bytes))
}

impl TreeResponse {
    pub fn encode(&self, version: ProtocolVersion) -> Result<Vec<u8>, WireError> {
        version.require(ProtocolVersion::V_PRE11)?;
        let mut buf = Vec::new();
        if version >= ProtocolVersion::V11 {
            self.session_id.unwrap_or_default().as_bytes().to_vec().encode_to(&mut buf)?;
        }
        self.tree.encode_to(&mut buf)?;
        Ok(buf)
    }

    pub fn decode(buf: &[u8], version: ProtocolVersion) -> Result<Self, WireError> {
        version.require(ProtocolVersion::V_PRE11)?;
        let mut offset = 0;
        let session_id = if version >= ProtocolVersion::V11 {
            let (raw, n) = Vec::<u8>::decode_from(&buf[offset..])?;
            offset += n;
            Some(uuid_from_bytes(&raw)?)
        } else {
            None
        };
        let (tree, _) = WireMerkleTree::decode_from(&buf[offset..])?;
        Ok(Self { session_id, tree })
    }
}

impl RangeSliceCommand {
    pub fn encode(&self, version: ProtocolVersion) -> Result<Vec<u8>, WireError> {
        version.require(ProtocolVersion::V12)?;
        let mut buf = Vec::new();
        self.session_id.as_bytes().to_vec().encode_to(&mut buf)?;
        encode_string_pair!(&mut buf, self.keyspace, self.table);
        let count = u32::try_from(self.ranges.len()).map_err(|_| count_overflow(self.ranges.len()))?;
        count.encode_to(&mut buf)?;
        for r in &self.ranges {
            r.start.0.encode_to(&mut buf)?;
            r.end.0.encode_to(&mut buf)?;
        }
        Ok(buf)
    }

    pub fn decode(buf: &[u8], version: ProtocolVersion) -> Result<Self, WireError> {
        version.require(ProtocolVersion::V12)?;
        let mut offset = 0;
        let (raw, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let session_id = uuid_from_bytes(&raw)?;
        let (keyspace, n) = String::decode_from(&buf[offset..])?;
        offset += n;
        let (table, n) = String::decode_from(&buf[offset..])?;
        offset += n;
        let (count, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let mut ranges = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (s, n) = u128::decode_from(&buf[offset..])?;
            offset += n;
            let (e, n) = u128::decode_from(&buf[offset..])?;
            offset += n;
            ranges.push(Range::new(Token(s), Token(e)));
        }
        Ok(Self {
            session_id,
            keyspace,
            table,
            ranges,
        })
    }
}

impl SnapshotCommand {
    pub fn encode(&self, version: ProtocolVersion) -> Result<Vec<u8>, WireError> {
        version.require(ProtocolVersion::V20)?;
        let mut buf = Vec::new();
        self.session_id.as_bytes().to_vec().encode_to(&mut buf)?;
        encode_string_pair!(&mut buf, self.keyspace, self.table);
        Ok(buf)
    }

    pub fn decode(buf: &[u8], version: ProtocolVersion) -> Result<Self, WireError> {
        version.require(ProtocolVersion::V20)?;
        let mut offset = 0;
        let (raw, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let session_id = uuid_from_bytes(&raw)?;
        let (keyspace, n) = String::decode_from(&buf[offset..])?;
        offset += n;
        let (table, _) = String::decode_from(&buf[offset..])?;
        Ok(Self {
            session_id,
            keyspace,
            table,
        })
    }
}

/// Per-message minimum version, used by [`SyncRequest`] which is internal
/// (never wire-encoded — it is the differencer's own output, consumed
/// in-process by the coordinator) and therefore carries no encoding at
/// all; listed here only to keep the message catalogue in one place.
pub fn minimum_version_for(tag: &str) -> Option<ProtocolVersion> {
    match tag {
        "TreeRequest" | "TreeResponse" => Some(ProtocolVersion::V_PRE11),
        "RangeSliceCommand" => Some(ProtocolVersion::V12),
        "SnapshotCommand" => Some(ProtocolVersion::V20),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> MerkleTree {
        let mut t = MerkleTree::new(Range::new(Token(0), Token(1000)), 3);
        t.init();
        for i in 0..t.leaf_ranges().len() {
            t.fold_leaf(i, [i as u8; 32]);
        }
        t
    }

    #[test]
    fn wire_merkle_tree_round_trips_through_to_tree() {
        let tree = sample_tree();
        let wire = WireMerkleTree::from_tree(&tree, 3);
        let rebuilt = wire.to_tree();
        assert_eq!(tree.digest(), rebuilt.digest());
        assert_eq!(tree.leaf_ranges(), rebuilt.leaf_ranges());
    }

    #[test]
    fn wire_merkle_tree_encode_decode_round_trips() {
        let tree = sample_tree();
        let wire = WireMerkleTree::from_tree(&tree, 3);
        let mut buf = Vec::new();
        wire.encode_to(&mut buf).unwrap();
        let (decoded, _) = WireMerkleTree::decode_from(&buf).unwrap();
        assert_eq!(wire, decoded);
    }

    #[test]
    fn tree_request_pre11_has_no_session_id_on_the_wire() {
        let req = TreeRequest {
            session_id: Some(Uuid::new_v4()),
            endpoint: "10.0.0.1".into(),
            gc_before: 42,
            keyspace: "ks".into(),
            table: "t".into(),
            range: Range::new(Token(0), Token(10)),
        };
        let buf = req.encode(ProtocolVersion::V_PRE11).unwrap();
        let back = TreeRequest::decode(&buf, ProtocolVersion::V_PRE11).unwrap();
        assert_eq!(back.session_id, None);
        assert_eq!(back.endpoint, "");
        assert_eq!(back.gc_before, 0);
        assert_eq!(back.keyspace, "ks");
    }

    #[test]
    fn tree_request_v11_round_trips_session_id() {
        let id = Uuid::new_v4();
        let req = TreeRequest {
            session_id: Some(id),
            endpoint: "10.0.0.1".into(),
            gc_before: 7,
            keyspace: "ks".into(),
            table: "t".into(),
            range: Range::new(Token(0), Token(10)),
        };
        let buf = req.encode(ProtocolVersion::V11).unwrap();
        let back = TreeRequest::decode(&buf, ProtocolVersion::V11).unwrap();
        assert_eq!(back.session_id, Some(id));
        assert_eq!(back.endpoint, "", "endpoint/gc_before only travel from V20 onward");
    }

    #[test]
    fn tree_request_v20_round_trips_endpoint_and_gc_before() {
        let id = Uuid::new_v4();
        let req = TreeRequest {
            session_id: Some(id),
            endpoint: "10.0.0.7".into(),
            gc_before: 1_700_000_000,
            keyspace: "ks".into(),
            table: "t".into(),
            range: Range::new(Token(0), Token(10)),
        };
        let buf = req.encode(ProtocolVersion::V20).unwrap();
        let back = TreeRequest::decode(&buf, ProtocolVersion::V20).unwrap();
        assert_eq!(back.endpoint, "10.0.0.7");
        assert_eq!(back.gc_before, 1_700_000_000);
    }

    #[test]
    fn range_slice_command_rejected_below_v12() {
        let cmd = RangeSliceCommand {
            session_id: Uuid::new_v4(),
            keyspace: "ks".into(),
            table: "t".into(),
            ranges: vec![Range::new(Token(0), Token(10))],
        };
        assert!(matches!(
            cmd.encode(ProtocolVersion::V11),
            Err(WireError::UnsupportedVersion { .. })
        ));
        assert!(cmd.encode(ProtocolVersion::V12).is_ok());
    }

    #[test]
    fn snapshot_command_requires_v20() {
        let cmd = SnapshotCommand {
            session_id: Uuid::new_v4(),
            keyspace: "ks".into(),
            table: "t".into(),
        };
        assert!(cmd.encode(ProtocolVersion::V12).is_err());
        let buf = cmd.encode(ProtocolVersion::V20).unwrap();
        let back = SnapshotCommand::decode(&buf, ProtocolVersion::V20).unwrap();
        assert_eq!(back.table, "t");
    }
}
