// Reply value objects
// Decoded forms of the packets a backend sends back, plus encoders for the
// ones the proxy has to synthesize (merged OK, ERR, rows after merging).

use super::{put_lenenc_bytes, put_lenenc_int, Packet, PacketError, Reader};
use bytes::{BufMut, Bytes, BytesMut};

const OK_MARKER: u8 = 0x00;
const EOF_MARKER: u8 = 0xfe;
const ERR_MARKER: u8 = 0xff;
const NULL_VALUE: u8 = 0xfb;

/// OK packet: the reply to a statement that returns no rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub insert_id: u64,
    pub status: u16,
    pub warnings: u16,
    pub message: String,
}

impl OkPacket {
    pub fn new(affected_rows: u64, insert_id: u64) -> Self {
        Self {
            affected_rows,
            insert_id,
            ..Self::default()
        }
    }

    pub fn read(packet: &Packet) -> Result<Self, PacketError> {
        let mut r = Reader::new(packet.payload());
        let marker = r.u8()?;
        if marker != OK_MARKER {
            return Err(PacketError::UnexpectedMarker(marker));
        }
        let affected_rows = r.lenenc_int()?;
        let insert_id = r.lenenc_int()?;
        let status = r.u16()?;
        let warnings = r.u16()?;
        let message = String::from_utf8_lossy(r.rest()).into_owned();
        Ok(Self {
            affected_rows,
            insert_id,
            status,
            warnings,
            message,
        })
    }

    pub fn to_packet(&self, sequence: u8) -> Packet {
        let mut buf = BytesMut::with_capacity(16 + self.message.len());
        buf.put_u8(OK_MARKER);
        put_lenenc_int(&mut buf, self.affected_rows);
        put_lenenc_int(&mut buf, self.insert_id);
        buf.put_u16_le(self.status);
        buf.put_u16_le(self.warnings);
        buf.put_slice(self.message.as_bytes());
        Packet::new(sequence, buf.freeze())
    }
}

/// ERR packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPacket {
    pub code: u16,
    pub sql_state: String,
    pub message: String,
}

impl ErrorPacket {
    pub fn new(code: u16, sql_state: &str, message: impl Into<String>) -> Self {
        Self {
            code,
            sql_state: sql_state.to_string(),
            message: message.into(),
        }
    }

    pub fn read(packet: &Packet) -> Result<Self, PacketError> {
        let mut r = Reader::new(packet.payload());
        let marker = r.u8()?;
        if marker != ERR_MARKER {
            return Err(PacketError::UnexpectedMarker(marker));
        }
        let code = r.u16()?;
        // The SQL state is only present in the 4.1 protocol, behind a '#'
        let sql_state = if r.peek() == Some(b'#') {
            r.u8()?;
            String::from_utf8_lossy(r.bytes(5)?).into_owned()
        } else {
            "HY000".to_string()
        };
        let message = String::from_utf8_lossy(r.rest()).into_owned();
        Ok(Self {
            code,
            sql_state,
            message,
        })
    }

    pub fn to_packet(&self, sequence: u8) -> Packet {
        let mut buf = BytesMut::with_capacity(9 + self.message.len());
        buf.put_u8(ERR_MARKER);
        buf.put_u16_le(self.code);
        buf.put_u8(b'#');
        let mut state = [b'0'; 5];
        for (dst, src) in state.iter_mut().zip(self.sql_state.bytes()) {
            *dst = src;
        }
        buf.put_slice(&state);
        buf.put_slice(self.message.as_bytes());
        Packet::new(sequence, buf.freeze())
    }
}

/// EOF packet closing a field list or a row stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EofPacket {
    pub warnings: u16,
    pub status: u16,
}

impl EofPacket {
    pub fn read(packet: &Packet) -> Result<Self, PacketError> {
        let mut r = Reader::new(packet.payload());
        let marker = r.u8()?;
        if marker != EOF_MARKER {
            return Err(PacketError::UnexpectedMarker(marker));
        }
        Ok(Self {
            warnings: r.u16()?,
            status: r.u16()?,
        })
    }

    pub fn to_packet(&self, sequence: u8) -> Packet {
        let mut buf = BytesMut::with_capacity(5);
        buf.put_u8(EOF_MARKER);
        buf.put_u16_le(self.warnings);
        buf.put_u16_le(self.status);
        Packet::new(sequence, buf.freeze())
    }
}

/// First packet of a result set: the number of columns that follow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultSetHeader {
    pub field_count: u64,
}

impl ResultSetHeader {
    pub fn read(packet: &Packet) -> Result<Self, PacketError> {
        let mut r = Reader::new(packet.payload());
        Ok(Self {
            field_count: r.lenenc_int()?,
        })
    }

    pub fn to_packet(&self, sequence: u8) -> Packet {
        let mut buf = BytesMut::with_capacity(9);
        put_lenenc_int(&mut buf, self.field_count);
        Packet::new(sequence, buf.freeze())
    }
}

/// Column definition (protocol 4.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPacket {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub charset: u16,
    pub length: u32,
    pub column_type: u8,
    pub flags: u16,
    pub decimals: u8,
}

impl FieldPacket {
    pub fn new(name: &str, column_type: u8) -> Self {
        Self {
            schema: String::new(),
            table: String::new(),
            name: name.to_string(),
            charset: 33,
            length: 255,
            column_type,
            flags: 0,
            decimals: 0,
        }
    }

    pub fn read(packet: &Packet) -> Result<Self, PacketError> {
        let mut r = Reader::new(packet.payload());
        // Names arrive in the connection charset, which need not be UTF-8
        let text = |raw: &[u8]| String::from_utf8_lossy(raw).into_owned();
        let _catalog = r.lenenc_bytes()?;
        let schema = text(r.lenenc_bytes()?);
        let table = text(r.lenenc_bytes()?);
        let _org_table = r.lenenc_bytes()?;
        let name = text(r.lenenc_bytes()?);
        let _org_name = r.lenenc_bytes()?;
        let _fixed_len = r.lenenc_int()?;
        let charset = r.u16()?;
        let length = r.u32()?;
        let column_type = r.u8()?;
        let flags = r.u16()?;
        let decimals = r.u8()?;
        Ok(Self {
            schema,
            table,
            name,
            charset,
            length,
            column_type,
            flags,
            decimals,
        })
    }

    pub fn to_packet(&self, sequence: u8) -> Packet {
        let mut buf = BytesMut::with_capacity(32 + self.name.len() * 2);
        put_lenenc_bytes(&mut buf, b"def");
        put_lenenc_bytes(&mut buf, self.schema.as_bytes());
        put_lenenc_bytes(&mut buf, self.table.as_bytes());
        put_lenenc_bytes(&mut buf, self.table.as_bytes());
        put_lenenc_bytes(&mut buf, self.name.as_bytes());
        put_lenenc_bytes(&mut buf, self.name.as_bytes());
        put_lenenc_int(&mut buf, 0x0c);
        buf.put_u16_le(self.charset);
        buf.put_u32_le(self.length);
        buf.put_u8(self.column_type);
        buf.put_u16_le(self.flags);
        buf.put_u8(self.decimals);
        buf.put_u16_le(0);
        Packet::new(sequence, buf.freeze())
    }
}

/// One text-protocol row: a length-encoded string per column, or NULL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDataPacket {
    pub values: Vec<Option<Bytes>>,
}

impl RowDataPacket {
    pub fn new(values: Vec<Option<Bytes>>) -> Self {
        Self { values }
    }

    pub fn read(packet: &Packet, field_count: usize) -> Result<Self, PacketError> {
        let payload = packet.payload();
        let mut r = Reader::new(payload.as_ref());
        let mut values = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            if r.peek() == Some(NULL_VALUE) {
                r.u8()?;
                values.push(None);
            } else {
                let raw = r.lenenc_bytes()?;
                // Slice the shared payload instead of copying each column
                values.push(Some(payload.slice_ref(raw)));
            }
        }
        Ok(Self { values })
    }

    pub fn to_packet(&self, sequence: u8) -> Packet {
        let size: usize = self
            .values
            .iter()
            .map(|v| v.as_ref().map_or(1, |b| b.len() + 9))
            .sum();
        let mut buf = BytesMut::with_capacity(size);
        for value in &self.values {
            match value {
                Some(bytes) => put_lenenc_bytes(&mut buf, bytes),
                None => buf.put_u8(NULL_VALUE),
            }
        }
        Packet::new(sequence, buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_packet_large_counts() {
        let ok = OkPacket {
            affected_rows: 70_000,
            insert_id: 1 << 40,
            status: 0x0002,
            warnings: 1,
            message: "Rows matched: 3".to_string(),
        };
        let decoded = OkPacket::read(&ok.to_packet(4)).unwrap();
        assert_eq!(decoded, ok);
    }

    #[test]
    fn test_ok_read_rejects_error_packet() {
        let err = ErrorPacket::new(1146, "42S02", "no such table").to_packet(1);
        assert_eq!(
            OkPacket::read(&err),
            Err(PacketError::UnexpectedMarker(0xff))
        );
    }

    #[test]
    fn test_error_packet_layout() {
        let packet = ErrorPacket::new(1064, "42000", "bad").to_packet(1);
        assert_eq!(
            packet.payload().as_ref(),
            &[0xff, 0x28, 0x04, b'#', b'4', b'2', b'0', b'0', b'0', b'b', b'a', b'd']
        );
        let decoded = ErrorPacket::read(&packet).unwrap();
        assert_eq!(decoded.code, 1064);
        assert_eq!(decoded.sql_state, "42000");
        assert_eq!(decoded.message, "bad");
    }

    #[test]
    fn test_field_packet_keeps_name_and_type() {
        let field = FieldPacket::new("user_id", 0x08);
        let decoded = FieldPacket::read(&field.to_packet(2)).unwrap();
        assert_eq!(decoded.name, "user_id");
        assert_eq!(decoded.column_type, 0x08);
    }

    #[test]
    fn test_field_name_outside_utf8() {
        // latin1 "prénom"
        let mut buf = BytesMut::new();
        put_lenenc_bytes(&mut buf, b"def");
        put_lenenc_bytes(&mut buf, b"shop");
        put_lenenc_bytes(&mut buf, b"users");
        put_lenenc_bytes(&mut buf, b"users");
        put_lenenc_bytes(&mut buf, b"pr\xe9nom");
        put_lenenc_bytes(&mut buf, b"pr\xe9nom");
        put_lenenc_int(&mut buf, 0x0c);
        buf.put_u16_le(8);
        buf.put_u32_le(80);
        buf.put_u8(0xfd);
        buf.put_u16_le(0);
        buf.put_u8(0);
        buf.put_u16_le(0);

        let field = FieldPacket::read(&Packet::new(2, buf.freeze())).unwrap();
        assert_eq!(field.name, "pr\u{fffd}nom");
        assert_eq!(field.table, "users");
        assert_eq!(field.column_type, 0xfd);
    }

    #[test]
    fn test_row_with_null_column() {
        let row = RowDataPacket::new(vec![
            Some(Bytes::from_static(b"42")),
            None,
            Some(Bytes::from_static(b"")),
        ]);
        let decoded = RowDataPacket::read(&row.to_packet(7), 3).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn test_row_shorter_than_field_count() {
        let row = RowDataPacket::new(vec![Some(Bytes::from_static(b"1"))]);
        assert!(RowDataPacket::read(&row.to_packet(1), 2).is_err());
    }
}
