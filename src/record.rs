//! Fixed-width record header, packed buffer layout, and the cursor that
//! walks a buffer record by record (component C1).
//!
//! Wire format (little-endian, identical on every node):
//!
//! ```text
//! offset 0 : flags byte   (bit0 use_explicit_target, bit1 is_forward)
//! offset 1 : padding
//! offset 2 : message_id   (u32)
//! offset 6 : function_id  (u32)
//! offset 10: src_index    (DataId: row u32, field u32)
//! offset 18: size         (u32, payload length excluding this header)
//! offset 22: payload[size]
//! ```

use byteorder::{ByteOrder, LittleEndian};

use crate::error::DispatchError;

/// Serialized width of a [`DataId`] on the wire.
pub const DATA_ID_LEN: usize = 8;

/// Fixed width of [`RecordHeader`] on the wire.
pub const HEADER_LEN: usize = 1 + 1 + 4 + 4 + DATA_ID_LEN + 4;

/// Width of a buffer's leading "used length" field.
pub const PREFIX_LEN: usize = 4;

const FLAG_USE_EXPLICIT_TARGET: u8 = 0b01;
const FLAG_IS_FORWARD: u8 = 0b10;

/// `(row, field)` identifier of an element instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DataId {
    pub row: u32,
    pub field: u32,
}

impl DataId {
    pub fn new(row: u32, field: u32) -> Self {
        Self { row, field }
    }

    pub fn encode(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= DATA_ID_LEN);
        LittleEndian::write_u32(&mut out[0..4], self.row);
        LittleEndian::write_u32(&mut out[4..8], self.field);
    }

    pub fn decode(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= DATA_ID_LEN);
        Self {
            row: LittleEndian::read_u32(&buf[0..4]),
            field: LittleEndian::read_u32(&buf[4..8]),
        }
    }
}

/// Direction of a record along its message binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Source element (`e1`) -> target element (`e2`).
    Forward,
    /// Target element (`e2`) -> source element (`e1`).
    Reverse,
}

/// The fixed-width portion of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub use_explicit_target: bool,
    pub direction: Direction,
    pub message_id: u32,
    pub function_id: u32,
    pub src_index: DataId,
    /// Payload length in bytes, excluding this header. Includes the trailing
    /// `DataId` when `use_explicit_target` is set.
    pub size: u32,
}

impl RecordHeader {
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut flags = 0u8;
        if self.use_explicit_target {
            flags |= FLAG_USE_EXPLICIT_TARGET;
        }
        if self.direction == Direction::Forward {
            flags |= FLAG_IS_FORWARD;
        }
        let start = out.len();
        out.resize(start + HEADER_LEN, 0);
        out[start] = flags;
        out[start + 1] = 0; // padding
        LittleEndian::write_u32(&mut out[start + 2..start + 6], self.message_id);
        LittleEndian::write_u32(&mut out[start + 6..start + 10], self.function_id);
        self.src_index.encode(&mut out[start + 10..start + 18]);
        LittleEndian::write_u32(&mut out[start + 18..start + 22], self.size);
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DispatchError> {
        if buf.len() < HEADER_LEN {
            return Err(DispatchError::CorruptBuffer("truncated record header"));
        }
        let flags = buf[0];
        Ok(Self {
            use_explicit_target: flags & FLAG_USE_EXPLICIT_TARGET != 0,
            direction: if flags & FLAG_IS_FORWARD != 0 {
                Direction::Forward
            } else {
                Direction::Reverse
            },
            message_id: LittleEndian::read_u32(&buf[2..6]),
            function_id: LittleEndian::read_u32(&buf[6..10]),
            src_index: DataId::decode(&buf[10..18]),
            size: LittleEndian::read_u32(&buf[18..22]),
        })
    }
}

/// Appends `header` followed by `payload` to `out`.
pub fn emit(out: &mut Vec<u8>, header: &RecordHeader, payload: &[u8]) {
    header.encode(out);
    out.extend_from_slice(payload);
}

/// Resets a buffer to just its length prefix (`prefix_size` bytes, no records).
pub fn reset_buffer(buf: &mut Vec<u8>) {
    buf.clear();
    buf.resize(PREFIX_LEN, 0);
    LittleEndian::write_u32(&mut buf[0..PREFIX_LEN], PREFIX_LEN as u32);
}

/// Reads a buffer's used-length prefix.
pub fn used_len(buf: &[u8]) -> Result<u32, DispatchError> {
    if buf.len() < PREFIX_LEN {
        return Err(DispatchError::PreconditionViolation(
            "buffer shorter than its own length prefix".into(),
        ));
    }
    Ok(LittleEndian::read_u32(&buf[0..PREFIX_LEN]))
}

/// Overwrites a buffer's used-length prefix with its current byte length.
pub fn finalize_len(buf: &mut [u8]) {
    let len = buf.len() as u32;
    LittleEndian::write_u32(&mut buf[0..PREFIX_LEN], len);
}

/// Zeroes a buffer's used-length prefix in place, leaving the bytes after it untouched.
pub fn clear_len_prefix(buf: &mut [u8]) {
    LittleEndian::write_u32(&mut buf[0..PREFIX_LEN], 0);
}

/// Walks the records in `buffer` starting after the length prefix, calling
/// `visitor(header, payload)` for each one in append order. Touches each
/// record exactly once; never copies payload bytes.
pub fn walk<'a>(
    buffer: &'a [u8],
    mut visitor: impl FnMut(RecordHeader, &'a [u8]) -> Result<(), DispatchError>,
) -> Result<(), DispatchError> {
    let declared_len = used_len(buffer)? as usize;
    if declared_len > buffer.len() {
        log::error!(
            "walk: declared used length {declared_len} exceeds buffer size {}",
            buffer.len()
        );
        return Err(DispatchError::CorruptBuffer(
            "declared used length exceeds buffer size",
        ));
    }

    let mut cursor = PREFIX_LEN;
    while cursor < declared_len {
        let header = RecordHeader::decode(&buffer[cursor..])?;
        let record_len = HEADER_LEN
            .checked_add(header.size as usize)
            .ok_or(DispatchError::CorruptBuffer("record size overflow"))?;
        let record_end = cursor
            .checked_add(record_len)
            .ok_or(DispatchError::CorruptBuffer("record size overflow"))?;
        if record_end > declared_len {
            log::error!(
                "walk: record at offset {cursor} of size {} advances past declared length {declared_len}",
                header.size
            );
            return Err(DispatchError::CorruptBuffer(
                "record size advances past declared used length",
            ));
        }
        let payload = &buffer[cursor + HEADER_LEN..record_end];
        visitor(header, payload)?;
        cursor = record_end;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(message_id: u32, size: u32) -> RecordHeader {
        RecordHeader {
            use_explicit_target: false,
            direction: Direction::Forward,
            message_id,
            function_id: 7,
            src_index: DataId::new(1, 0),
            size,
        }
    }

    #[test]
    fn emit_then_decode_round_trips() {
        let mut out = Vec::new();
        let h = header(42, 3);
        emit(&mut out, &h, b"abc");
        let decoded = RecordHeader::decode(&out).unwrap();
        assert_eq!(decoded, h);
        assert_eq!(&out[HEADER_LEN..], b"abc");
    }

    #[test]
    fn walk_visits_records_in_order() {
        let mut buf = Vec::new();
        reset_buffer(&mut buf);
        emit(&mut buf, &header(1, 1), b"A");
        emit(&mut buf, &header(2, 2), b"BB");
        finalize_len(&mut buf);

        let mut seen = Vec::new();
        walk(&buf, |h, payload| {
            seen.push((h.message_id, payload.to_vec()));
            Ok(())
        })
        .unwrap();

        assert_eq!(seen, vec![(1, b"A".to_vec()), (2, b"BB".to_vec())]);
    }

    #[test]
    fn walk_rejects_declared_length_past_buffer_end() {
        let mut buf = Vec::new();
        reset_buffer(&mut buf);
        emit(&mut buf, &header(1, 1), b"A");
        LittleEndian::write_u32(&mut buf[0..PREFIX_LEN], buf.len() as u32 + 100);

        let err = walk(&buf, |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, DispatchError::CorruptBuffer(_)));
    }

    #[test]
    fn walk_rejects_size_overrunning_buffer() {
        let mut buf = Vec::new();
        reset_buffer(&mut buf);
        emit(&mut buf, &header(1, 200), b"A"); // declares 200 bytes but only wrote 1
        finalize_len(&mut buf);

        let err = walk(&buf, |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, DispatchError::CorruptBuffer(_)));
    }

    #[test]
    fn explicit_target_suffix_is_appended_after_payload() {
        let mut out = Vec::new();
        let target = DataId::new(9, 2);
        let mut payload = b"hello".to_vec();
        payload.extend_from_slice(&{
            let mut buf = [0u8; DATA_ID_LEN];
            target.encode(&mut buf);
            buf
        });
        let h = RecordHeader {
            use_explicit_target: true,
            direction: Direction::Reverse,
            message_id: 5,
            function_id: 6,
            src_index: DataId::new(0, 0),
            size: payload.len() as u32,
        };
        emit(&mut out, &h, &payload);

        walk_one(&out, |header, body| {
            assert!(header.use_explicit_target);
            let suffix = &body[body.len() - DATA_ID_LEN..];
            assert_eq!(DataId::decode(suffix), target);
        });
    }

    fn walk_one(record_bytes: &[u8], check: impl FnOnce(RecordHeader, &[u8])) {
        let header = RecordHeader::decode(record_bytes).unwrap();
        let body = &record_bytes[HEADER_LEN..HEADER_LEN + header.size as usize];
        check(header, body);
    }
}
