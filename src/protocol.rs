//! Wire framing for the peer protocol.
//!
//! Every message on the wire is a **guide frame** (one big-endian `u32`
//! giving the byte length of what follows) and then a **payload frame**:
//! a 4-byte ASCII code, an 8-byte space-padded format string, a
//! fixed-width argument section and a variable-width argument section.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::{PeerSyncError, ProtocolViolation, Result};

/// Number of format-string slots a payload carries.
const MAX_PARAM: usize = 8;

/// The four message codes the protocol knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    /// Worker-count handshake.
    Cont,
    /// Start-of-block marker.
    Send,
    /// A chunk of block data.
    Pakg,
    /// End-of-block marker.
    Vrfy,
}

impl Code {
    fn as_bytes(self) -> &'static [u8; 4] {
        match self {
            Code::Cont => b"CONT",
            Code::Send => b"SEND",
            Code::Pakg => b"PAKG",
            Code::Vrfy => b"VRFY",
        }
    }

    fn from_bytes(bytes: [u8; 4]) -> std::result::Result<Code, ProtocolViolation> {
        match &bytes {
            b"CONT" => Ok(Code::Cont),
            b"SEND" => Ok(Code::Send),
            b"PAKG" => Ok(Code::Pakg),
            b"VRFY" => Ok(Code::Vrfy),
            _ => Err(ProtocolViolation::UnknownCode(bytes)),
        }
    }
}

/// A single typed argument, one slot of a payload's variable argument list.
///
/// `U64` widens `SEND`'s `file_size` and `PAKG`'s `position` past a
/// 4 GiB-capped `u32`, using format char `Q` for an 8-byte big-endian
/// integer.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Format char `I`.
    U32(u32),
    /// Format char `Q`.
    U64(u64),
    /// Format char `d`.
    F64(f64),
    /// Format char `?`.
    Bool(bool),
    /// Format char `$`: a length-prefixed UTF-8 string.
    Str(String),
    /// Format char `#`: a length-prefixed byte blob.
    Bytes(Vec<u8>),
}

impl Value {
    fn format_char(&self) -> u8 {
        match self {
            Value::U32(_) => b'I',
            Value::U64(_) => b'Q',
            Value::F64(_) => b'd',
            Value::Bool(_) => b'?',
            Value::Str(_) => b'$',
            Value::Bytes(_) => b'#',
        }
    }
}

/// Pack a `Code` and its arguments into a guide-framed payload, ready to
/// write to a socket with a single `write_all`.
pub fn pack(code: Code, args: &[Value]) -> Result<Vec<u8>> {
    if args.len() > MAX_PARAM {
        return Err(PeerSyncError::Pack(format!(
            "{} arguments exceeds max of {}",
            args.len(),
            MAX_PARAM
        )));
    }

    let mut format = vec![b' '; MAX_PARAM];
    let mut fixed = Vec::new();
    let mut variable = Vec::new();

    for (i, arg) in args.iter().enumerate() {
        format[i] = arg.format_char();
        match arg {
            Value::U32(v) => fixed.write_u32::<BigEndian>(*v).expect("write to Vec"),
            Value::U64(v) => fixed.write_u64::<BigEndian>(*v).expect("write to Vec"),
            Value::F64(v) => fixed.write_f64::<BigEndian>(*v).expect("write to Vec"),
            Value::Bool(v) => fixed.push(if *v { 1 } else { 0 }),
            Value::Str(s) => {
                fixed
                    .write_u32::<BigEndian>(s.len() as u32)
                    .expect("write to Vec");
                variable.extend_from_slice(s.as_bytes());
            }
            Value::Bytes(b) => {
                fixed
                    .write_u32::<BigEndian>(b.len() as u32)
                    .expect("write to Vec");
                variable.extend_from_slice(b);
            }
        }
    }

    let mut payload = Vec::with_capacity(4 + MAX_PARAM + fixed.len() + variable.len());
    payload.extend_from_slice(code.as_bytes());
    payload.extend_from_slice(&format);
    payload.extend_from_slice(&fixed);
    payload.extend_from_slice(&variable);

    let mut framed = Vec::with_capacity(4 + payload.len());
    framed
        .write_u32::<BigEndian>(payload.len() as u32)
        .expect("write to Vec");
    framed.extend_from_slice(&payload);
    Ok(framed)
}

/// A decoded payload: its code plus the arguments in format-string order.
pub struct Packet {
    /// The 4-byte message code.
    pub code: Code,
    /// Arguments in wire order.
    pub args: Vec<Value>,
}

/// Read exactly one guide frame plus its payload from `reader` and decode
/// it. Returns `Ok(None)` if the peer closed the connection cleanly before
/// sending a guide frame (zero-byte read). A payload read that comes up
/// short after a successful guide read is a `ProtocolViolation::Truncated`,
/// never a silent `None`.
pub fn read_packet<R: Read>(reader: &mut R) -> Result<Option<Packet>> {
    let mut guide = [0u8; 4];
    match read_full_or_eof(reader, &mut guide)? {
        false => return Ok(None),
        true => {}
    }
    let len = u32::from_be_bytes(guide) as usize;

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .map_err(|_| PeerSyncError::Protocol(ProtocolViolation::Truncated))?;

    Ok(Some(decode_payload(&payload)?))
}

/// Like `Read::read_exact`, but distinguishes "zero bytes available, peer
/// hung up cleanly" (`Ok(false)`) from "some bytes came then the stream
/// died" (an `Err`, surfaced as a protocol violation by the caller).
fn read_full_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut read = 0;
    while read < buf.len() {
        match reader.read(&mut buf[read..]) {
            Ok(0) => {
                if read == 0 {
                    return Ok(false);
                }
                return Err(PeerSyncError::Protocol(ProtocolViolation::Truncated));
            }
            Ok(n) => read += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(PeerSyncError::TransientNetwork(e)),
        }
    }
    Ok(true)
}

fn decode_payload(payload: &[u8]) -> Result<Packet> {
    if payload.len() < 4 + MAX_PARAM {
        return Err(PeerSyncError::Protocol(ProtocolViolation::Truncated));
    }

    let mut code_bytes = [0u8; 4];
    code_bytes.copy_from_slice(&payload[0..4]);
    let code = Code::from_bytes(code_bytes)?;

    let format = &payload[4..4 + MAX_PARAM];
    let mut cursor = 4 + MAX_PARAM;

    // First pass: consume the fixed-width section, recording where
    // variable-width lengths were found so we know how much to take from
    // the trailing variable section (and in what order).
    let mut args = Vec::with_capacity(MAX_PARAM);
    let mut var_lens: Vec<(usize, bool)> = Vec::new(); // (len, is_str)

    for &ch in format {
        match ch {
            b' ' => break,
            b'I' => {
                let v = take_u32(payload, &mut cursor)?;
                args.push(Value::U32(v));
            }
            b'Q' => {
                let v = take_u64(payload, &mut cursor)?;
                args.push(Value::U64(v));
            }
            b'd' => {
                let v = take_f64(payload, &mut cursor)?;
                args.push(Value::F64(v));
            }
            b'?' => {
                let v = take_u8(payload, &mut cursor)?;
                args.push(Value::Bool(v != 0));
            }
            b'$' => {
                let len = take_u32(payload, &mut cursor)? as usize;
                var_lens.push((len, true));
                args.push(Value::Str(String::new())); // placeholder, filled below
            }
            b'#' => {
                let len = take_u32(payload, &mut cursor)? as usize;
                var_lens.push((len, false));
                args.push(Value::Bytes(Vec::new())); // placeholder, filled below
            }
            other => {
                return Err(PeerSyncError::Protocol(ProtocolViolation::BadFormatChar(
                    other,
                )))
            }
        }
    }

    // Second pass: fill in the placeholders from the variable-width
    // section, in the same left-to-right order they appeared.
    let mut var_iter = var_lens.into_iter();
    for arg in args.iter_mut() {
        match arg {
            Value::Str(_) => {
                let (len, _) = var_iter.next().expect("placeholder without length");
                let bytes = take_bytes(payload, &mut cursor, len)?;
                let s = String::from_utf8(bytes)
                    .map_err(|_| PeerSyncError::Unpack("non-utf8 string argument".to_string()))?;
                *arg = Value::Str(s);
            }
            Value::Bytes(_) => {
                let (len, _) = var_iter.next().expect("placeholder without length");
                let bytes = take_bytes(payload, &mut cursor, len)?;
                *arg = Value::Bytes(bytes);
            }
            _ => {}
        }
    }

    Ok(Packet { code, args })
}

fn take_u32(payload: &[u8], cursor: &mut usize) -> Result<u32> {
    let bytes = take_bytes(payload, cursor, 4)?;
    Ok(u32::from_be_bytes(bytes.try_into().expect("length 4")))
}

fn take_u64(payload: &[u8], cursor: &mut usize) -> Result<u64> {
    let bytes = take_bytes(payload, cursor, 8)?;
    Ok(u64::from_be_bytes(bytes.try_into().expect("length 8")))
}

fn take_f64(payload: &[u8], cursor: &mut usize) -> Result<f64> {
    let bytes = take_bytes(payload, cursor, 8)?;
    Ok(f64::from_be_bytes(bytes.try_into().expect("length 8")))
}

fn take_u8(payload: &[u8], cursor: &mut usize) -> Result<u8> {
    let bytes = take_bytes(payload, cursor, 1)?;
    Ok(bytes[0])
}

fn take_bytes(payload: &[u8], cursor: &mut usize, len: usize) -> Result<Vec<u8>> {
    if *cursor + len > payload.len() {
        return Err(PeerSyncError::Protocol(ProtocolViolation::Truncated));
    }
    let out = payload[*cursor..*cursor + len].to_vec();
    *cursor += len;
    Ok(out)
}

/// Write a packet to `writer` in one shot.
pub fn write_packet<W: Write>(writer: &mut W, code: Code, args: &[Value]) -> Result<()> {
    let framed = pack(code, args)?;
    writer.write_all(&framed).map_err(PeerSyncError::TransientNetwork)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(code: Code, args: Vec<Value>) {
        let framed = pack(code, &args).expect("pack");
        let mut cursor = io::Cursor::new(framed);
        let packet = read_packet(&mut cursor)
            .expect("read_packet")
            .expect("non-empty");
        assert_eq!(packet.code, code);
        assert_eq!(packet.args, args);
    }

    #[test]
    fn round_trips_cont() {
        round_trip(Code::Cont, vec![Value::U32(4), Value::Bool(false)]);
        round_trip(Code::Cont, vec![Value::U32(0), Value::Bool(true)]);
    }

    #[test]
    fn round_trips_send() {
        round_trip(
            Code::Send,
            vec![
                Value::Str("share/hello.txt".to_string()),
                Value::U32(3),
                Value::U64(96 * 1024 * 1024),
            ],
        );
    }

    #[test]
    fn round_trips_pakg() {
        round_trip(
            Code::Pakg,
            vec![Value::U64(32 * 1024 * 1024), Value::Bytes(vec![0u8; 13])],
        );
    }

    #[test]
    fn round_trips_u64_past_u32_range() {
        round_trip(Code::Send, vec![Value::U64(u32::MAX as u64 + 42)]);
    }

    #[test]
    fn round_trips_vrfy_with_no_args() {
        round_trip(Code::Vrfy, vec![]);
    }

    #[test]
    fn round_trips_empty_string_and_bytes() {
        round_trip(
            Code::Send,
            vec![Value::Str(String::new()), Value::U32(0), Value::U32(0)],
        );
        round_trip(Code::Pakg, vec![Value::U32(0), Value::Bytes(vec![])]);
    }

    #[test]
    fn pack_is_deterministic() {
        let args = vec![Value::Str("a/b.txt".to_string()), Value::U32(1), Value::U32(2)];
        let a = pack(Code::Send, &args).unwrap();
        let b = pack(Code::Send, &args).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn pack_rejects_too_many_arguments() {
        let args = vec![Value::U32(0); MAX_PARAM + 1];
        assert!(pack(Code::Send, &args).is_err());
    }

    #[test]
    fn unpack_rejects_unknown_code() {
        let mut framed = pack(Code::Vrfy, &[]).unwrap();
        // Corrupt the code field (bytes 4..8 of the payload, i.e. after the
        // 4-byte guide frame).
        framed[4..8].copy_from_slice(b"ZZZZ");
        let mut cursor = io::Cursor::new(framed);
        let err = read_packet(&mut cursor).unwrap_err();
        match err {
            PeerSyncError::Protocol(ProtocolViolation::UnknownCode(_)) => {}
            other => panic!("expected UnknownCode, got {:?}", other),
        }
    }

    #[test]
    fn unpack_rejects_truncated_payload() {
        let mut framed = pack(
            Code::Send,
            &[Value::Str("x".to_string()), Value::U32(1), Value::U32(1)],
        )
        .unwrap();
        framed.truncate(framed.len() - 2);
        let mut cursor = io::Cursor::new(framed);
        let err = read_packet(&mut cursor).unwrap_err();
        match err {
            PeerSyncError::Protocol(ProtocolViolation::Truncated) => {}
            other => panic!("expected Truncated, got {:?}", other),
        }
    }

    #[test]
    fn empty_read_yields_none_not_error() {
        let mut cursor = io::Cursor::new(Vec::<u8>::new());
        let result = read_packet(&mut cursor).expect("clean eof is not an error");
        assert!(result.is_none());
    }
}
