//! Binary event encoding.
//!
//! Layout, little-endian throughout:
//!
//! ```text
//! u8   flags          FLAG_DATA when a data section follows
//! i64  timestamp
//! u32  data length    only present with FLAG_DATA
//! data section, repeated:
//!   i16  property id
//!   u8   value tag    TAG_STRING | TAG_INTEGER | TAG_FLOAT | TAG_BOOLEAN
//!   ...  payload      string: u32 length + UTF-8; integer: i64; float: f64; boolean: u8
//! ```
//!
//! Entries are written in ascending property-id order, so equal events
//! always encode to identical bytes.

use sky_types::{PropertyId, Value};

use crate::event::Event;

/// The event carries a data section.
pub const FLAG_DATA: u8 = 0x02;

pub const TAG_STRING: u8 = 0x01;
pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_FLOAT: u8 = 0x03;
pub const TAG_BOOLEAN: u8 = 0x04;

const HEADER_LEN: usize = 1 + 8;
const DATA_LEN_LEN: usize = 4;
const ENTRY_HEADER_LEN: usize = 2 + 1;

/// Errors produced while decoding an event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("truncated event: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("unknown event flags: {0:#04x}")]
    UnknownFlags(u8),

    #[error("unknown value tag {tag:#04x} for property {property}")]
    UnknownTag { property: PropertyId, tag: u8 },

    #[error("invalid UTF-8 in string value for property {0}")]
    InvalidUtf8(PropertyId),

    #[error("data section too large: {0} bytes")]
    TooLarge(usize),

    #[error("entry overruns the declared {0}-byte data section")]
    DataOverrun(usize),
}

/// Returns the exact number of bytes [`encode`] produces for `event`.
pub fn encoded_len(event: &Event) -> usize {
    if event.is_empty() {
        return HEADER_LEN;
    }
    HEADER_LEN + DATA_LEN_LEN + data_len(event)
}

fn data_len(event: &Event) -> usize {
    event
        .values()
        .map(|(_, value)| ENTRY_HEADER_LEN + payload_len(value))
        .sum()
}

fn payload_len(value: &Value) -> usize {
    match value {
        Value::String(s) => 4 + s.len(),
        Value::Integer(_) | Value::Float(_) => 8,
        Value::Boolean(_) => 1,
    }
}

/// Encodes an event.
///
/// # Errors
///
/// Returns `CodecError::TooLarge` if the data section exceeds `u32::MAX`
/// bytes.
pub fn encode(event: &Event) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(encoded_len(event));

    if event.is_empty() {
        buf.push(0);
        buf.extend_from_slice(&event.timestamp().to_le_bytes());
        return Ok(buf);
    }

    let len = data_len(event);
    let len_u32 = u32::try_from(len).map_err(|_| CodecError::TooLarge(len))?;

    buf.push(FLAG_DATA);
    buf.extend_from_slice(&event.timestamp().to_le_bytes());
    buf.extend_from_slice(&len_u32.to_le_bytes());

    for (id, value) in event.values() {
        buf.extend_from_slice(&id.to_le_bytes());
        match value {
            Value::String(s) => {
                let n = u32::try_from(s.len()).map_err(|_| CodecError::TooLarge(s.len()))?;
                buf.push(TAG_STRING);
                buf.extend_from_slice(&n.to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            Value::Integer(i) => {
                buf.push(TAG_INTEGER);
                buf.extend_from_slice(&i.to_le_bytes());
            }
            Value::Float(f) => {
                buf.push(TAG_FLOAT);
                buf.extend_from_slice(&f.to_le_bytes());
            }
            Value::Boolean(b) => {
                buf.push(TAG_BOOLEAN);
                buf.push(u8::from(*b));
            }
        }
    }

    Ok(buf)
}

/// Decodes one event from the start of `bytes`.
///
/// Returns the event and the number of bytes consumed; trailing bytes are
/// left untouched.
///
/// # Errors
///
/// Returns a [`CodecError`] for truncated input, unknown flags, unknown
/// value tags, or an entry that runs past the declared data length.
pub fn decode(bytes: &[u8]) -> Result<(Event, usize), CodecError> {
    let mut reader = Reader { bytes, pos: 0 };

    let flags = reader.u8()?;
    let timestamp = i64::from_le_bytes(reader.array()?);
    let mut event = Event::new(timestamp);

    match flags {
        0 => return Ok((event, reader.pos)),
        FLAG_DATA => {}
        other => return Err(CodecError::UnknownFlags(other)),
    }

    let len = u32::from_le_bytes(reader.array()?) as usize;
    let data = reader.take(len)?;
    decode_entries(data, &mut event).map_err(|e| match e {
        CodecError::Truncated { .. } => CodecError::DataOverrun(len),
        other => other,
    })?;

    Ok((event, reader.pos))
}

/// Decodes entries from exactly the declared data section.
fn decode_entries(data: &[u8], event: &mut Event) -> Result<(), CodecError> {
    let mut reader = Reader { bytes: data, pos: 0 };
    while reader.pos < data.len() {
        let id = PropertyId::from_le_bytes(reader.array()?);
        let value = match reader.u8()? {
            TAG_STRING => {
                let n = u32::from_le_bytes(reader.array()?) as usize;
                let raw = reader.take(n)?;
                let s = std::str::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8(id))?;
                Value::String(s.to_string())
            }
            TAG_INTEGER => Value::Integer(i64::from_le_bytes(reader.array()?)),
            TAG_FLOAT => Value::Float(f64::from_le_bytes(reader.array()?)),
            TAG_BOOLEAN => Value::Boolean(reader.u8()? != 0),
            tag => return Err(CodecError::UnknownTag { property: id, tag }),
        };
        event.set(id, value);
    }
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn ensure(&self, n: usize) -> Result<(), CodecError> {
        let available = self.bytes.len() - self.pos;
        if n > available {
            return Err(CodecError::Truncated {
                needed: n,
                available,
            });
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.ensure(n)?;
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: i64 = 1_325_376_000_000;

    /// An event with no data is just the flags byte and the timestamp.
    const EMPTY_EVENT: [u8; 9] = [0x00, 0x00, 0xD0, 0x90, 0x96, 0x34, 0x01, 0x00, 0x00];

    /// Properties 1 = "foo" and 2 = "bar".
    const STRING_EVENT: [u8; 33] = [
        0x02, 0x00, 0xD0, 0x90, 0x96, 0x34, 0x01, 0x00, 0x00, // flags, timestamp
        0x14, 0x00, 0x00, 0x00, // data length = 20
        0x01, 0x00, 0x01, 0x03, 0x00, 0x00, 0x00, 0x66, 0x6F, 0x6F, // 1: "foo"
        0x02, 0x00, 0x01, 0x03, 0x00, 0x00, 0x00, 0x62, 0x61, 0x72, // 2: "bar"
    ];

    fn string_event() -> Event {
        let mut event = Event::new(TS);
        event.set(2, Value::String("bar".into()));
        event.set(1, Value::String("foo".into()));
        event
    }

    #[test]
    fn empty_event_layout() {
        let event = Event::new(TS);
        assert_eq!(encoded_len(&event), EMPTY_EVENT.len());
        assert_eq!(encode(&event).unwrap(), EMPTY_EVENT);

        let (decoded, consumed) = decode(&EMPTY_EVENT).unwrap();
        assert_eq!(consumed, EMPTY_EVENT.len());
        assert_eq!(decoded.timestamp(), TS);
        assert!(decoded.is_empty());
    }

    #[test]
    fn string_event_layout() {
        let event = string_event();
        assert_eq!(encoded_len(&event), STRING_EVENT.len());
        assert_eq!(encode(&event).unwrap(), STRING_EVENT);

        let (decoded, consumed) = decode(&STRING_EVENT).unwrap();
        assert_eq!(consumed, STRING_EVENT.len());
        assert_eq!(decoded, event);
    }

    #[test]
    fn mixed_value_types() {
        let mut event = Event::new(-5);
        event.set(-1, Value::Boolean(true));
        event.set(1, Value::Integer(-42));
        event.set(2, Value::Float(2.5));

        let bytes = encode(&event).unwrap();
        assert_eq!(bytes.len(), encoded_len(&event));
        let (decoded, _) = decode(&bytes).unwrap();
        assert_eq!(decoded, event);
        assert_eq!(decoded.values().map(|(id, _)| id).collect::<Vec<_>>(), vec![-1, 1, 2]);
    }

    #[test]
    fn trailing_bytes_are_not_consumed() {
        let mut bytes = STRING_EVENT.to_vec();
        bytes.extend_from_slice(&[0xFF, 0xFF]);
        let (_, consumed) = decode(&bytes).unwrap();
        assert_eq!(consumed, STRING_EVENT.len());
    }

    #[test]
    fn truncated_input_is_rejected() {
        for cut in [0, 5, 12, 20, STRING_EVENT.len() - 1] {
            assert!(
                matches!(decode(&STRING_EVENT[..cut]), Err(CodecError::Truncated { .. })),
                "cut at {cut} should be truncated"
            );
        }
    }

    #[test]
    fn entries_must_fit_the_declared_length() {
        // Declares a 1-byte data section, then an 11-byte integer entry.
        let mut bytes = vec![FLAG_DATA];
        bytes.extend_from_slice(&1i64.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1i16.to_le_bytes());
        bytes.push(TAG_INTEGER);
        bytes.extend_from_slice(&42i64.to_le_bytes());

        assert_eq!(decode(&bytes).unwrap_err(), CodecError::DataOverrun(1));

        // The same entry with its length declared correctly decodes.
        bytes[9..13].copy_from_slice(&11u32.to_le_bytes());
        let (decoded, consumed) = decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.get(1), Some(&Value::Integer(42)));
    }

    #[test]
    fn unknown_flags_and_tags_are_rejected() {
        let mut bytes = STRING_EVENT;
        bytes[0] = 0x01;
        assert_eq!(decode(&bytes).unwrap_err(), CodecError::UnknownFlags(0x01));

        let mut bytes = STRING_EVENT;
        bytes[15] = 0x09;
        assert_eq!(
            decode(&bytes).unwrap_err(),
            CodecError::UnknownTag {
                property: 1,
                tag: 0x09
            }
        );
    }
}
