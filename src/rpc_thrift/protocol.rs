use std::io::{self, Read, Write};

use crate::models::protocol::Protocol;

const BINARY_VERSION_1: u32 = 0x8001_0000;
const BINARY_VERSION_MASK: u32 = 0xffff_0000;
const COMPACT_PROTOCOL_ID: u8 = 0x82;
const COMPACT_VERSION: u8 = 1;
const COMPACT_VERSION_MASK: u8 = 0x1f;
const COMPACT_TYPE_SHIFT: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 1,
    Reply = 2,
    Exception = 3,
    Oneway = 4,
}

impl MessageType {
    fn from_u8(v: u8) -> io::Result<Self> {
        match v {
            1 => Ok(MessageType::Call),
            2 => Ok(MessageType::Reply),
            3 => Ok(MessageType::Exception),
            4 => Ok(MessageType::Oneway),
            other => Err(invalid(format!("unknown message type {}", other))),
        }
    }
}

/// Thrift field types, numbered as on the binary wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Stop = 0,
    Bool = 2,
    Byte = 3,
    Double = 4,
    I16 = 6,
    I32 = 8,
    I64 = 10,
    String = 11,
    Struct = 12,
    Map = 13,
    Set = 14,
    List = 15,
}

impl FieldType {
    fn from_binary(v: u8) -> io::Result<Self> {
        Ok(match v {
            0 => FieldType::Stop,
            2 => FieldType::Bool,
            3 => FieldType::Byte,
            4 => FieldType::Double,
            6 => FieldType::I16,
            8 => FieldType::I32,
            10 => FieldType::I64,
            11 => FieldType::String,
            12 => FieldType::Struct,
            13 => FieldType::Map,
            14 => FieldType::Set,
            15 => FieldType::List,
            other => return Err(invalid(format!("unknown field type {}", other))),
        })
    }

    fn to_compact(self) -> u8 {
        match self {
            FieldType::Stop => 0,
            FieldType::Bool => 1,
            FieldType::Byte => 3,
            FieldType::I16 => 4,
            FieldType::I32 => 5,
            FieldType::I64 => 6,
            FieldType::Double => 7,
            FieldType::String => 8,
            FieldType::List => 9,
            FieldType::Set => 10,
            FieldType::Map => 11,
            FieldType::Struct => 12,
        }
    }

    fn from_compact(v: u8) -> io::Result<Self> {
        Ok(match v {
            0 => FieldType::Stop,
            1 | 2 => FieldType::Bool,
            3 => FieldType::Byte,
            4 => FieldType::I16,
            5 => FieldType::I32,
            6 => FieldType::I64,
            7 => FieldType::Double,
            8 => FieldType::String,
            9 => FieldType::List,
            10 => FieldType::Set,
            11 => FieldType::Map,
            12 => FieldType::Struct,
            other => return Err(invalid(format!("unknown compact type {}", other))),
        })
    }
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn zigzag32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

fn zigzag64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

fn unzigzag32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

fn unzigzag64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

/// 协议编解码器，生成的 Thrift 存根通过它读写消息
///
/// Encodes primitives with the binary or compact wire format chosen by
/// [`Protocol`]. The compact format tracks field-id deltas per struct and
/// folds boolean field values into the field header.
pub struct ThriftProtocol<T> {
    protocol: Protocol,
    transport: T,
    write_last_field: i16,
    write_field_stack: Vec<i16>,
    pending_bool_field: Option<i16>,
    read_last_field: i16,
    read_field_stack: Vec<i16>,
    pending_bool_value: Option<bool>,
}

impl<T> ThriftProtocol<T> {
    pub fn new(protocol: Protocol, transport: T) -> Self {
        Self {
            protocol,
            transport,
            write_last_field: 0,
            write_field_stack: Vec::new(),
            pending_bool_field: None,
            read_last_field: 0,
            read_field_stack: Vec::new(),
            pending_bool_value: None,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }
}

impl<T: Write> ThriftProtocol<T> {
    fn write_byte(&mut self, b: u8) -> io::Result<()> {
        self.transport.write_all(&[b])
    }

    fn write_varint(&mut self, mut n: u64) -> io::Result<()> {
        let mut buf = [0u8; 10];
        let mut i = 0;
        loop {
            if n & !0x7f == 0 {
                buf[i] = n as u8;
                i += 1;
                break;
            }
            buf[i] = ((n & 0x7f) | 0x80) as u8;
            n >>= 7;
            i += 1;
        }
        self.transport.write_all(&buf[..i])
    }

    pub fn write_message_begin(&mut self, name: &str, kind: MessageType, seq: i32) -> io::Result<()> {
        match self.protocol {
            Protocol::Binary => {
                self.transport
                    .write_all(&(BINARY_VERSION_1 | kind as u32).to_be_bytes())?;
                self.write_string(name)?;
                self.write_i32(seq)
            }
            Protocol::Compact => {
                self.write_byte(COMPACT_PROTOCOL_ID)?;
                self.write_byte((COMPACT_VERSION & COMPACT_VERSION_MASK) | ((kind as u8) << COMPACT_TYPE_SHIFT))?;
                self.write_varint(seq as u32 as u64)?;
                self.write_string(name)
            }
        }
    }

    pub fn write_struct_begin(&mut self) {
        self.write_field_stack.push(self.write_last_field);
        self.write_last_field = 0;
    }

    pub fn write_struct_end(&mut self) {
        self.write_last_field = self.write_field_stack.pop().unwrap_or(0);
    }

    pub fn write_field_begin(&mut self, kind: FieldType, id: i16) -> io::Result<()> {
        match self.protocol {
            Protocol::Binary => {
                self.write_byte(kind as u8)?;
                self.transport.write_all(&id.to_be_bytes())
            }
            Protocol::Compact if kind == FieldType::Bool => {
                self.pending_bool_field = Some(id);
                Ok(())
            }
            Protocol::Compact => self.write_compact_field_header(kind.to_compact(), id),
        }
    }

    fn write_compact_field_header(&mut self, compact_type: u8, id: i16) -> io::Result<()> {
        let delta = id as i32 - self.write_last_field as i32;
        if (1..=15).contains(&delta) {
            self.write_byte(((delta as u8) << 4) | compact_type)?;
        } else {
            self.write_byte(compact_type)?;
            self.write_varint(zigzag32(id as i32) as u64)?;
        }
        self.write_last_field = id;
        Ok(())
    }

    pub fn write_field_stop(&mut self) -> io::Result<()> {
        self.write_byte(FieldType::Stop as u8)
    }

    pub fn write_bool(&mut self, b: bool) -> io::Result<()> {
        match self.protocol {
            Protocol::Binary => self.write_byte(b as u8),
            Protocol::Compact => {
                let compact_type = if b { 1 } else { 2 };
                match self.pending_bool_field.take() {
                    Some(id) => self.write_compact_field_header(compact_type, id),
                    None => self.write_byte(compact_type),
                }
            }
        }
    }

    pub fn write_i16(&mut self, n: i16) -> io::Result<()> {
        match self.protocol {
            Protocol::Binary => self.transport.write_all(&n.to_be_bytes()),
            Protocol::Compact => self.write_varint(zigzag32(n as i32) as u64),
        }
    }

    pub fn write_i32(&mut self, n: i32) -> io::Result<()> {
        match self.protocol {
            Protocol::Binary => self.transport.write_all(&n.to_be_bytes()),
            Protocol::Compact => self.write_varint(zigzag32(n) as u64),
        }
    }

    pub fn write_i64(&mut self, n: i64) -> io::Result<()> {
        match self.protocol {
            Protocol::Binary => self.transport.write_all(&n.to_be_bytes()),
            Protocol::Compact => self.write_varint(zigzag64(n)),
        }
    }

    pub fn write_binary(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.protocol {
            Protocol::Binary => {
                let len = i32::try_from(bytes.len())
                    .map_err(|_| invalid(format!("binary of {} bytes too large", bytes.len())))?;
                self.transport.write_all(&len.to_be_bytes())?;
            }
            Protocol::Compact => self.write_varint(bytes.len() as u64)?,
        }
        self.transport.write_all(bytes)
    }

    pub fn write_string(&mut self, s: &str) -> io::Result<()> {
        self.write_binary(s.as_bytes())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.transport.flush()
    }
}

impl<T: Read> ThriftProtocol<T> {
    fn read_byte(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.transport.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_array<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.transport.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_varint(&mut self) -> io::Result<u64> {
        let mut result = 0u64;
        for shift in (0..64).step_by(7) {
            let b = self.read_byte()?;
            result |= ((b & 0x7f) as u64) << shift;
            if b & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(invalid("varint longer than 10 bytes".into()))
    }

    pub fn read_message_begin(&mut self) -> io::Result<(String, MessageType, i32)> {
        match self.protocol {
            Protocol::Binary => {
                let header = u32::from_be_bytes(self.read_array()?);
                if header & BINARY_VERSION_MASK != BINARY_VERSION_1 {
                    return Err(invalid(format!("bad binary message header {:#x}", header)));
                }
                let kind = MessageType::from_u8((header & 0xff) as u8)?;
                let name = self.read_string()?;
                let seq = self.read_i32()?;
                Ok((name, kind, seq))
            }
            Protocol::Compact => {
                let id = self.read_byte()?;
                if id != COMPACT_PROTOCOL_ID {
                    return Err(invalid(format!("bad compact protocol id {:#x}", id)));
                }
                let version_and_type = self.read_byte()?;
                if version_and_type & COMPACT_VERSION_MASK != COMPACT_VERSION {
                    return Err(invalid(format!("bad compact version {}", version_and_type & COMPACT_VERSION_MASK)));
                }
                let kind = MessageType::from_u8(version_and_type >> COMPACT_TYPE_SHIFT)?;
                let seq = self.read_varint()? as u32 as i32;
                let name = self.read_string()?;
                Ok((name, kind, seq))
            }
        }
    }

    pub fn read_struct_begin(&mut self) {
        self.read_field_stack.push(self.read_last_field);
        self.read_last_field = 0;
    }

    pub fn read_struct_end(&mut self) {
        self.read_last_field = self.read_field_stack.pop().unwrap_or(0);
    }

    /// Returns the next field header; `FieldType::Stop` ends the struct.
    pub fn read_field_begin(&mut self) -> io::Result<(FieldType, i16)> {
        match self.protocol {
            Protocol::Binary => {
                let kind = FieldType::from_binary(self.read_byte()?)?;
                if kind == FieldType::Stop {
                    return Ok((kind, 0));
                }
                let id = i16::from_be_bytes(self.read_array()?);
                Ok((kind, id))
            }
            Protocol::Compact => {
                let header = self.read_byte()?;
                if header == 0 {
                    return Ok((FieldType::Stop, 0));
                }
                let compact_type = header & 0x0f;
                let delta = (header >> 4) as i16;
                let id = if delta != 0 {
                    self.read_last_field.wrapping_add(delta)
                } else {
                    unzigzag32(self.read_varint()? as u32) as i16
                };
                self.read_last_field = id;
                let kind = FieldType::from_compact(compact_type)?;
                if kind == FieldType::Bool {
                    self.pending_bool_value = Some(compact_type == 1);
                }
                Ok((kind, id))
            }
        }
    }

    pub fn read_bool(&mut self) -> io::Result<bool> {
        match self.protocol {
            Protocol::Binary => Ok(self.read_byte()? != 0),
            Protocol::Compact => match self.pending_bool_value.take() {
                Some(v) => Ok(v),
                None => Ok(self.read_byte()? == 1),
            },
        }
    }

    pub fn read_i16(&mut self) -> io::Result<i16> {
        match self.protocol {
            Protocol::Binary => Ok(i16::from_be_bytes(self.read_array()?)),
            Protocol::Compact => Ok(unzigzag32(self.read_varint()? as u32) as i16),
        }
    }

    pub fn read_i32(&mut self) -> io::Result<i32> {
        match self.protocol {
            Protocol::Binary => Ok(i32::from_be_bytes(self.read_array()?)),
            Protocol::Compact => Ok(unzigzag32(self.read_varint()? as u32)),
        }
    }

    pub fn read_i64(&mut self) -> io::Result<i64> {
        match self.protocol {
            Protocol::Binary => Ok(i64::from_be_bytes(self.read_array()?)),
            Protocol::Compact => Ok(unzigzag64(self.read_varint()?)),
        }
    }

    pub fn read_binary(&mut self) -> io::Result<Vec<u8>> {
        let len = match self.protocol {
            Protocol::Binary => {
                let len = i32::from_be_bytes(self.read_array()?);
                usize::try_from(len).map_err(|_| invalid(format!("negative length {}", len)))?
            }
            Protocol::Compact => self.read_varint()? as usize,
        };
        let mut buf = vec![0u8; len];
        self.transport.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn read_string(&mut self) -> io::Result<String> {
        String::from_utf8(self.read_binary()?).map_err(|e| invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(protocol: Protocol, f: impl FnOnce(&mut ThriftProtocol<Vec<u8>>) -> io::Result<()>) -> Vec<u8> {
        let mut p = ThriftProtocol::new(protocol, Vec::new());
        f(&mut p).unwrap();
        p.into_inner()
    }

    #[test]
    fn test_integer_encoding_differs_by_protocol() {
        assert_eq!(encode(Protocol::Binary, |p| p.write_i32(300)), vec![0, 0, 1, 0x2c]);
        // zigzag(300) = 600 = 0b100_1011000
        assert_eq!(encode(Protocol::Compact, |p| p.write_i32(300)), vec![0xd8, 0x04]);
        assert_eq!(encode(Protocol::Compact, |p| p.write_i64(-1)), vec![0x01]);
        assert_eq!(encode(Protocol::Binary, |p| p.write_string("ab")), vec![0, 0, 0, 2, b'a', b'b']);
        assert_eq!(encode(Protocol::Compact, |p| p.write_string("ab")), vec![2, b'a', b'b']);
    }

    #[test]
    fn test_message_headers() {
        let binary = encode(Protocol::Binary, |p| p.write_message_begin("getTableNames", MessageType::Call, 7));
        assert_eq!(&binary[..4], &[0x80, 0x01, 0x00, 0x01]);

        let compact = encode(Protocol::Compact, |p| p.write_message_begin("getTableNames", MessageType::Call, 7));
        assert_eq!(&compact[..3], &[0x82, 0x21, 0x07]);

        for (protocol, bytes) in [(Protocol::Binary, binary), (Protocol::Compact, compact)] {
            let mut p = ThriftProtocol::new(protocol, bytes.as_slice());
            let (name, kind, seq) = p.read_message_begin().unwrap();
            assert_eq!(name, "getTableNames");
            assert_eq!(kind, MessageType::Call);
            assert_eq!(seq, 7);
        }
    }

    #[test]
    fn test_reading_with_wrong_protocol_fails() {
        let compact = encode(Protocol::Compact, |p| p.write_message_begin("get", MessageType::Reply, 1));
        let mut p = ThriftProtocol::new(Protocol::Binary, compact.as_slice());
        let err = p.read_message_begin().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_compact_struct_fields() {
        let bytes = encode(Protocol::Compact, |p| {
            p.write_struct_begin();
            p.write_field_begin(FieldType::String, 1)?;
            p.write_string("row")?;
            p.write_field_begin(FieldType::Bool, 2)?;
            p.write_bool(true)?;
            p.write_field_begin(FieldType::I64, 40)?;
            p.write_i64(1_700_000_000_000)?;
            p.write_field_stop()?;
            p.write_struct_end();
            Ok(())
        });
        // delta headers for ids 1 and 2, long form for 40
        assert_eq!(bytes[0], 0x18);
        assert_eq!(bytes[5], 0x11);
        assert_eq!(&bytes[6..8], &[0x06, 0x50]);

        let mut p = ThriftProtocol::new(Protocol::Compact, bytes.as_slice());
        p.read_struct_begin();
        assert_eq!(p.read_field_begin().unwrap(), (FieldType::String, 1));
        assert_eq!(p.read_string().unwrap(), "row");
        assert_eq!(p.read_field_begin().unwrap(), (FieldType::Bool, 2));
        assert!(p.read_bool().unwrap());
        assert_eq!(p.read_field_begin().unwrap(), (FieldType::I64, 40));
        assert_eq!(p.read_i64().unwrap(), 1_700_000_000_000);
        assert_eq!(p.read_field_begin().unwrap().0, FieldType::Stop);
        p.read_struct_end();
    }

    #[test]
    fn test_binary_struct_fields() {
        let bytes = encode(Protocol::Binary, |p| {
            p.write_field_begin(FieldType::I16, 3)?;
            p.write_i16(-2)?;
            p.write_field_begin(FieldType::Bool, 4)?;
            p.write_bool(false)?;
            p.write_field_stop()
        });
        assert_eq!(bytes, vec![6, 0, 3, 0xff, 0xfe, 2, 0, 4, 0, 0]);

        let mut p = ThriftProtocol::new(Protocol::Binary, bytes.as_slice());
        assert_eq!(p.read_field_begin().unwrap(), (FieldType::I16, 3));
        assert_eq!(p.read_i16().unwrap(), -2);
        assert_eq!(p.read_field_begin().unwrap(), (FieldType::Bool, 4));
        assert!(!p.read_bool().unwrap());
        assert_eq!(p.read_field_begin().unwrap().0, FieldType::Stop);
    }
}
