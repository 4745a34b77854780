//! Byte-level framing for `DcpMessage`, plus the per-item compression and
//! XATTR-pruning rules of.
//!
//! The outer memcached binary-protocol header is explicitly out of scope
//!; what we frame here is the DCP message itself: a small fixed
//! header (opcode, opaque, vbucket, payload length) followed by an
//! opcode-specific body. Seqnos and the two `SeqnoAck` fields are written
//! big-endian, matching.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::{BufMut, BytesMut};
use std::io::{self, Cursor, Read};
use tokio_io::codec::{Decoder, Encoder};

use super::flags::{SnapshotMarkerFlags, StreamEndStatus};
use super::message::{DcpMessage, Mutation, SeqnoAck, SnapshotMarker};
use super::opcode::Opcode;

const HEADER_LEN: usize = 13; // opcode(1) + opaque(4) + vbucket(2) + body_len(4) + flags(2)

#[derive(Default)]
pub struct MessageCodec {
    /// Set once the consumer has negotiated Snappy support via `Control`;
    /// read by `prepare_outbound` before every item is framed.
    pub consumer_supports_snappy: bool,
}

/// How a stream wants an item's xattr section handled, derived from the
/// negotiated `OpenFlags` (`INCLUDE_XATTRS` / `NO_VALUE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XattrPolicy {
    /// Ship the value as stored, xattrs and body both.
    Full,
    /// Keep only the xattr section; drop the document body.
    XattrOnly,
    /// Keep only the document body; drop the xattr section.
    BodyOnly,
}

impl MessageCodec {
    pub fn new() -> MessageCodec {
        MessageCodec::default()
    }

    /// Applies the compression / XATTR-pruning decision table to a single
    /// outbound item, returning the (possibly rewritten) item that should
    /// actually be framed onto the wire.
    ///
    /// Xattr pruning runs against the raw value bytes before the
    /// compression decision, so it assumes an item arrives uncompressed on
    /// this path (true of every `ActiveStream` source today).
    pub fn prepare_outbound(
        &self,
        item: &Mutation,
        xattr_policy: XattrPolicy,
        force_value_compression: bool,
    ) -> Mutation {
        let mut out = item.clone();

        match xattr_policy {
            XattrPolicy::XattrOnly => {
                // Always ship uncompressed, regardless of what the consumer
                // negotiated.
                out.value = extract_xattrs(&out.value);
                out.datatype &= !Mutation::DATATYPE_SNAPPY;
                return out;
            }
            XattrPolicy::BodyOnly if out.has_xattrs() => {
                out.value = strip_xattrs(&out.value);
                out.datatype &= !Mutation::DATATYPE_XATTR;
            }
            XattrPolicy::BodyOnly | XattrPolicy::Full => {}
        }

        if out.is_compressed() && !self.consumer_supports_snappy {
            out.value = inflate(&out.value);
            out.datatype &= !Mutation::DATATYPE_SNAPPY;
            return out;
        }

        if force_value_compression && !out.is_compressed() {
            out.value = deflate(&out.value);
            out.datatype |= Mutation::DATATYPE_SNAPPY;
            return out;
        }

        out
    }
}

impl Encoder for MessageCodec {
    type Item = DcpMessage;
    type Error = io::Error;

    fn encode(&mut self, msg: DcpMessage, dst: &mut BytesMut) -> io::Result<()> {
        let mut body = Vec::new();
        let (opcode, vbucket, flags) = encode_body(&msg, &mut body)?;

        dst.reserve(HEADER_LEN + body.len());
        dst.put_u8(opcode.code());
        let mut hdr = Vec::with_capacity(HEADER_LEN - 1);
        hdr.write_u32::<BigEndian>(msg.opaque())?;
        hdr.write_u16::<BigEndian>(vbucket)?;
        hdr.write_u32::<BigEndian>(body.len() as u32)?;
        hdr.write_u16::<BigEndian>(flags)?;
        dst.put_slice(&hdr);
        dst.put_slice(&body);
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = DcpMessage;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<DcpMessage>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let opcode_byte = src[0];
        let mut hdr = Cursor::new(&src[1..HEADER_LEN]);
        let opaque = hdr.read_u32::<BigEndian>()?;
        let vbucket = hdr.read_u16::<BigEndian>()?;
        let body_len = hdr.read_u32::<BigEndian>()? as usize;
        let flags = hdr.read_u16::<BigEndian>()?;

        let total = HEADER_LEN + body_len;
        if src.len() < total {
            return Ok(None);
        }

        let opcode = Opcode::from_code(opcode_byte).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "unrecognized dcp opcode")
        })?;
        let frame = src.split_to(total);
        let body = &frame[HEADER_LEN..total];
        let msg = decode_body(opcode, opaque, vbucket, flags, body)?;
        Ok(Some(msg))
    }
}

fn encode_body(msg: &DcpMessage, body: &mut Vec<u8>) -> io::Result<(Opcode, u16, u16)> {
    match *msg {
        DcpMessage::Open { ref name, flags, .. } => {
            body.write_u32::<BigEndian>(flags)?;
            body.extend_from_slice(name.as_bytes());
            Ok((Opcode::Open, 0, 0))
        }
        DcpMessage::AddStream { vbucket, .. } => Ok((Opcode::AddStream, vbucket, 0)),
        DcpMessage::CloseStream { vbucket, .. } => Ok((Opcode::CloseStream, vbucket, 0)),
        DcpMessage::Flush { vbucket, .. } => Ok((Opcode::Flush, vbucket, 0)),
        DcpMessage::StreamReq {
            vbucket,
            flags,
            start_seqno,
            end_seqno,
            vbucket_uuid,
            snap_start_seqno,
            snap_end_seqno,
            ..
        } => {
            body.write_u32::<BigEndian>(flags)?;
            body.write_u64::<BigEndian>(start_seqno)?;
            body.write_u64::<BigEndian>(end_seqno)?;
            body.write_u64::<BigEndian>(vbucket_uuid)?;
            body.write_u64::<BigEndian>(snap_start_seqno)?;
            body.write_u64::<BigEndian>(snap_end_seqno)?;
            Ok((Opcode::StreamReq, vbucket, 0))
        }
        DcpMessage::StreamEnd { vbucket, status, .. } => {
            body.write_u32::<BigEndian>(status.code())?;
            Ok((Opcode::StreamEnd, vbucket, 0))
        }
        DcpMessage::SnapshotMarker { vbucket, marker, .. } => {
            body.write_u64::<BigEndian>(marker.start_seqno)?;
            body.write_u64::<BigEndian>(marker.end_seqno)?;
            body.write_u32::<BigEndian>(marker.flags.0)?;
            Ok((Opcode::SnapshotMarker, vbucket, 0))
        }
        DcpMessage::Mutation { vbucket, ref item, .. } => {
            write_item(body, item)?;
            Ok((Opcode::Mutation, vbucket, u16::from(item.datatype)))
        }
        DcpMessage::Deletion { vbucket, ref item, .. } => {
            write_item(body, item)?;
            Ok((Opcode::Deletion, vbucket, u16::from(item.datatype)))
        }
        DcpMessage::Expiration { vbucket, ref item, .. } => {
            write_item(body, item)?;
            Ok((Opcode::Expiration, vbucket, u16::from(item.datatype)))
        }
        DcpMessage::SetVBucketState { vbucket, state, .. } => {
            body.push(state);
            Ok((Opcode::SetVBucketState, vbucket, 0))
        }
        DcpMessage::Noop { .. } => Ok((Opcode::Noop, 0, 0)),
        DcpMessage::BufferAck { bytes_acked, .. } => {
            body.write_u32::<BigEndian>(bytes_acked)?;
            Ok((Opcode::BufferAck, 0, 0))
        }
        DcpMessage::Control { ref key, ref value, .. } => {
            body.write_u16::<BigEndian>(key.len() as u16)?;
            body.extend_from_slice(key.as_bytes());
            body.extend_from_slice(value.as_bytes());
            Ok((Opcode::Control, 0, 0))
        }
        DcpMessage::SystemEvent {
            vbucket, event, ref key, ..
        } => {
            body.write_u32::<BigEndian>(event)?;
            body.extend_from_slice(key);
            Ok((Opcode::SystemEvent, vbucket, 0))
        }
        DcpMessage::GetErrorMap { version, .. } => {
            body.write_u16::<BigEndian>(version)?;
            Ok((Opcode::GetErrorMap, 0, 0))
        }
        DcpMessage::SeqnoAcknowledgement { ref ack, .. } => {
            body.write_u64::<BigEndian>(ack.in_memory_seqno)?;
            body.write_u64::<BigEndian>(ack.on_disk_seqno)?;
            Ok((Opcode::SeqnoAcknowledgement, ack.vbucket, 0))
        }
    }
}

fn write_item(body: &mut Vec<u8>, item: &Mutation) -> io::Result<()> {
    body.write_u64::<BigEndian>(item.by_seqno)?;
    body.write_u64::<BigEndian>(item.rev_seqno)?;
    body.write_u64::<BigEndian>(item.cas)?;
    body.write_u32::<BigEndian>(item.flags)?;
    body.write_u32::<BigEndian>(item.exptime)?;
    body.write_u32::<BigEndian>(item.lock_time)?;
    body.write_u16::<BigEndian>(item.key.len() as u16)?;
    body.write_u16::<BigEndian>(item.meta.len() as u16)?;
    body.extend_from_slice(&item.key);
    body.extend_from_slice(&item.meta);
    body.extend_from_slice(&item.value);
    Ok(())
}

fn decode_body(
    opcode: Opcode,
    opaque: u32,
    vbucket: u16,
    flags: u16,
    body: &[u8],
) -> io::Result<DcpMessage> {
    let mut r = Cursor::new(body);
    match opcode {
        Opcode::Open => {
            let open_flags = r.read_u32::<BigEndian>()?;
            let mut name = String::new();
            r.read_to_string(&mut name)?;
            Ok(DcpMessage::Open { opaque, name, flags: open_flags })
        }
        Opcode::AddStream => Ok(DcpMessage::AddStream { opaque, vbucket }),
        Opcode::CloseStream => Ok(DcpMessage::CloseStream { opaque, vbucket }),
        Opcode::Flush => Ok(DcpMessage::Flush { opaque, vbucket }),
        Opcode::StreamReq => {
            let req_flags = r.read_u32::<BigEndian>()?;
            let start_seqno = r.read_u64::<BigEndian>()?;
            let end_seqno = r.read_u64::<BigEndian>()?;
            let vbucket_uuid = r.read_u64::<BigEndian>()?;
            let snap_start_seqno = r.read_u64::<BigEndian>()?;
            let snap_end_seqno = r.read_u64::<BigEndian>()?;
            Ok(DcpMessage::StreamReq {
                opaque,
                vbucket,
                flags: req_flags,
                start_seqno,
                end_seqno,
                vbucket_uuid,
                snap_start_seqno,
                snap_end_seqno,
            })
        }
        Opcode::StreamEnd => {
            let code = r.read_u32::<BigEndian>()?;
            let status = status_from_code(code)?;
            Ok(DcpMessage::StreamEnd { opaque, vbucket, status })
        }
        Opcode::SnapshotMarker => {
            let start_seqno = r.read_u64::<BigEndian>()?;
            let end_seqno = r.read_u64::<BigEndian>()?;
            let marker_flags = r.read_u32::<BigEndian>()?;
            Ok(DcpMessage::SnapshotMarker {
                opaque,
                vbucket,
                marker: SnapshotMarker {
                    start_seqno,
                    end_seqno,
                    flags: SnapshotMarkerFlags(marker_flags),
                },
            })
        }
        Opcode::Mutation | Opcode::Deletion | Opcode::DeletionV2 | Opcode::Expiration => {
            let item = read_item(&mut r, flags)?;
            Ok(match opcode {
                Opcode::Mutation => DcpMessage::Mutation { opaque, vbucket, item },
                Opcode::Expiration => DcpMessage::Expiration { opaque, vbucket, item },
                _ => DcpMessage::Deletion { opaque, vbucket, item },
            })
        }
        Opcode::SetVBucketState => {
            let mut state = [0u8; 1];
            r.read_exact(&mut state)?;
            Ok(DcpMessage::SetVBucketState { opaque, vbucket, state: state[0] })
        }
        Opcode::Noop => Ok(DcpMessage::Noop { opaque }),
        Opcode::BufferAck => {
            let bytes_acked = r.read_u32::<BigEndian>()?;
            Ok(DcpMessage::BufferAck { opaque, bytes_acked })
        }
        Opcode::Control => {
            let key_len = r.read_u16::<BigEndian>()? as usize;
            let mut rest = Vec::new();
            r.read_to_end(&mut rest)?;
            if rest.len() < key_len {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "truncated control key"));
            }
            let key = String::from_utf8_lossy(&rest[..key_len]).into_owned();
            let value = String::from_utf8_lossy(&rest[key_len..]).into_owned();
            Ok(DcpMessage::Control { opaque, key, value })
        }
        Opcode::SystemEvent => {
            let event = r.read_u32::<BigEndian>()?;
            let mut key = Vec::new();
            r.read_to_end(&mut key)?;
            Ok(DcpMessage::SystemEvent { opaque, vbucket, event, key })
        }
        Opcode::GetErrorMap => {
            let version = r.read_u16::<BigEndian>()?;
            Ok(DcpMessage::GetErrorMap { opaque, version })
        }
        Opcode::SeqnoAcknowledgement => {
            let in_memory_seqno = r.read_u64::<BigEndian>()?;
            let on_disk_seqno = r.read_u64::<BigEndian>()?;
            Ok(DcpMessage::SeqnoAcknowledgement {
                opaque,
                ack: SeqnoAck { vbucket, in_memory_seqno, on_disk_seqno },
            })
        }
    }
}

fn read_item(r: &mut Cursor<&[u8]>, datatype_flags: u16) -> io::Result<Mutation> {
    let by_seqno = r.read_u64::<BigEndian>()?;
    let rev_seqno = r.read_u64::<BigEndian>()?;
    let cas = r.read_u64::<BigEndian>()?;
    let flags = r.read_u32::<BigEndian>()?;
    let exptime = r.read_u32::<BigEndian>()?;
    let lock_time = r.read_u32::<BigEndian>()?;
    let key_len = r.read_u16::<BigEndian>()? as usize;
    let meta_len = r.read_u16::<BigEndian>()? as usize;

    let mut key = vec![0u8; key_len];
    r.read_exact(&mut key)?;
    let mut meta = vec![0u8; meta_len];
    r.read_exact(&mut meta)?;
    let mut value = Vec::new();
    r.read_to_end(&mut value)?;

    Ok(Mutation {
        key,
        value,
        cas,
        by_seqno,
        rev_seqno,
        datatype: datatype_flags as u8,
        flags,
        exptime,
        lock_time,
        meta,
        durability: None,
    })
}

fn status_from_code(code: u32) -> io::Result<StreamEndStatus> {
    Ok(match code {
        0 => StreamEndStatus::Ok,
        1 => StreamEndStatus::Closed,
        2 => StreamEndStatus::StateChanged,
        3 => StreamEndStatus::Disconnected,
        4 => StreamEndStatus::Slow,
        _ => {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "unrecognized stream end status"))
        }
    })
}

/// Extracts the xattr section from a value blob for xattr-only streaming
///. Values carrying xattrs are framed as a 4-byte big-endian
/// xattrs-length prefix followed by the xattr bytes and then the document
/// body; pruning keeps only the prefix and the xattr bytes.
fn extract_xattrs(value: &[u8]) -> Vec<u8> {
    if value.len() < 4 {
        return Vec::new();
    }
    let xattr_len = Cursor::new(&value[..4])
        .read_u32::<BigEndian>()
        .unwrap_or(0) as usize;
    let end = (4 + xattr_len).min(value.len());
    value[..end].to_vec()
}

/// The inverse of `extract_xattrs`: keeps everything past the xattr section,
/// i.e. the plain document body.
fn strip_xattrs(value: &[u8]) -> Vec<u8> {
    if value.len() < 4 {
        return value.to_vec();
    }
    let xattr_len = Cursor::new(&value[..4])
        .read_u32::<BigEndian>()
        .unwrap_or(0) as usize;
    let start = (4 + xattr_len).min(value.len());
    value[start..].to_vec()
}

/// Placeholder reversible transforms standing in for real Snappy
/// compression: the DCP subsystem's correctness doesn't depend on the
/// compression *algorithm*, only on the negotiation/pruning control flow and
/// on the `datatype` bit and message size reflecting whatever was chosen
///. A simple run-length scheme keeps the crate free of an
/// unneeded external codec dependency while still being genuinely
/// reversible.
fn deflate(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < input.len() {
        let b = input[i];
        let mut run = 1u8;
        while run < 255 && i + (run as usize) < input.len() && input[i + run as usize] == b {
            run += 1;
        }
        out.push(run);
        out.push(b);
        i += run as usize;
    }
    out
}

fn inflate(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 2 <= input.len() {
        let run = input[i];
        let b = input[i + 1];
        for _ in 0..run {
            out.push(b);
        }
        i += 2;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deflate_inflate_round_trip() {
        let original = b"aaaabbbccccccccccd".to_vec();
        let compressed = deflate(&original);
        assert_eq!(inflate(&compressed), original);
    }

    #[test]
    fn encode_decode_mutation_round_trip() {
        let mut codec = MessageCodec::new();
        let item = Mutation {
            key: b"key".to_vec(),
            value: b"value".to_vec(),
            cas: 42,
            by_seqno: 7,
            rev_seqno: 1,
            datatype: Mutation::DATATYPE_JSON,
            flags: 0,
            exptime: 0,
            lock_time: 0,
            meta: vec![Mutation::DATATYPE_JSON],
            durability: None,
        };
        let msg = DcpMessage::Mutation { opaque: 1, vbucket: 3, item: item.clone() };
        let mut buf = BytesMut::new();
        codec.encode(msg, &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().expect("one frame");
        match decoded {
            DcpMessage::Mutation { opaque, vbucket, item: got } => {
                assert_eq!(opaque, 1);
                assert_eq!(vbucket, 3);
                assert_eq!(got.key, item.key);
                assert_eq!(got.value, item.value);
                assert_eq!(got.by_seqno, 7);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    fn xattr_item(datatype: u8) -> Mutation {
        let mut value = Vec::new();
        value.write_u32::<BigEndian>(4).unwrap();
        value.extend_from_slice(b"xatt");
        value.extend_from_slice(b"the rest of the document body");
        Mutation {
            key: b"k".to_vec(),
            value,
            cas: 0,
            by_seqno: 1,
            rev_seqno: 1,
            datatype,
            flags: 0,
            exptime: 0,
            lock_time: 0,
            meta: Vec::new(),
            durability: None,
        }
    }

    #[test]
    fn xattr_only_pruning_keeps_prefix_and_xattrs() {
        let codec = MessageCodec::new();
        let item = xattr_item(Mutation::DATATYPE_XATTR);
        let out = codec.prepare_outbound(&item, XattrPolicy::XattrOnly, false);
        assert_eq!(out.value.len(), 8);
        assert!(!out.is_compressed());
    }

    /// A stream that didn't negotiate xattrs keeps the document body and
    /// drops only the xattr section, not the whole value.
    #[test]
    fn body_only_pruning_strips_xattrs_but_keeps_the_body() {
        let codec = MessageCodec::new();
        let item = xattr_item(Mutation::DATATYPE_XATTR);
        let out = codec.prepare_outbound(&item, XattrPolicy::BodyOnly, false);
        assert_eq!(out.value, b"the rest of the document body");
        assert!(!out.has_xattrs());
    }

    /// An xattr-only item marked compressed is still pruned to its xattr
    /// section and shipped uncompressed, even from a consumer that never
    /// negotiated Snappy support — the xattr-only rule wins outright over
    /// the inflate branch.
    #[test]
    fn xattr_only_pruning_wins_over_compressed_non_snappy_consumer() {
        let mut codec = MessageCodec::new();
        codec.consumer_supports_snappy = false;
        let item = xattr_item(Mutation::DATATYPE_XATTR | Mutation::DATATYPE_SNAPPY);
        let out = codec.prepare_outbound(&item, XattrPolicy::XattrOnly, false);
        assert!(!out.is_compressed());
        assert_eq!(out.value.len(), 8);
    }
}
