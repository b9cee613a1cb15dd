use smallvec::SmallVec;

use super::FrameDecodeError;

const TYPE_BOOL_TRUE: u8 = 0;
const TYPE_BOOL_FALSE: u8 = 1;
const TYPE_BYTE: u8 = 2;
const TYPE_SHORT: u8 = 3;
const TYPE_INT: u8 = 4;
const TYPE_LONG: u8 = 5;
const TYPE_BYTES: u8 = 6;
const TYPE_STRING: u8 = 7;
const TYPE_TIMESTAMP: u8 = 8;
const TYPE_UUID: u8 = 9;

/// A typed header value borrowed from the frame buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue<'a> {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Bytes(&'a [u8]),
    String(&'a str),
    Timestamp(i64),
    Uuid([u8; 16]),
}

impl<'a> HeaderValue<'a> {
    #[must_use]
    pub fn as_str(&self) -> Option<&'a str> {
        match self {
            HeaderValue::String(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header<'a> {
    pub name: &'a str,
    pub value: HeaderValue<'a>,
}

pub(crate) type Headers<'a> = SmallVec<[Header<'a>; 4]>;

pub(crate) fn header_str<'a>(headers: &Headers<'a>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|header| header.name == name)
        .and_then(|header| header.value.as_str())
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], FrameDecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                FrameDecodeError::Header(format!(
                    "header block truncated at offset {} (need {len} bytes)",
                    self.pos
                ))
            })?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], FrameDecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn take_u8(&mut self) -> Result<u8, FrameDecodeError> {
        Ok(self.take(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16, FrameDecodeError> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    fn take_utf8(&mut self, len: usize) -> Result<&'a str, FrameDecodeError> {
        std::str::from_utf8(self.take(len)?)
            .map_err(|e| FrameDecodeError::Header(format!("header text is not UTF-8: {e}")))
    }
}

/// Parse the header block of one frame.
pub(crate) fn parse_headers(buf: &[u8]) -> Result<Headers<'_>, FrameDecodeError> {
    let mut cursor = Cursor { buf, pos: 0 };
    let mut headers = Headers::new();

    while cursor.pos < buf.len() {
        let name_len = usize::from(cursor.take_u8()?);
        if name_len == 0 {
            return Err(FrameDecodeError::Header("empty header name".to_string()));
        }
        let name = cursor.take_utf8(name_len)?;
        let value_type = cursor.take_u8()?;
        let value = match value_type {
            TYPE_BOOL_TRUE => HeaderValue::Bool(true),
            TYPE_BOOL_FALSE => HeaderValue::Bool(false),
            TYPE_BYTE => HeaderValue::Byte(i8::from_be_bytes(cursor.take_array()?)),
            TYPE_SHORT => HeaderValue::Short(i16::from_be_bytes(cursor.take_array()?)),
            TYPE_INT => HeaderValue::Int(i32::from_be_bytes(cursor.take_array()?)),
            TYPE_LONG => HeaderValue::Long(i64::from_be_bytes(cursor.take_array()?)),
            TYPE_BYTES => {
                let len = usize::from(cursor.take_u16()?);
                HeaderValue::Bytes(cursor.take(len)?)
            }
            TYPE_STRING => {
                let len = usize::from(cursor.take_u16()?);
                HeaderValue::String(cursor.take_utf8(len)?)
            }
            TYPE_TIMESTAMP => HeaderValue::Timestamp(i64::from_be_bytes(cursor.take_array()?)),
            TYPE_UUID => HeaderValue::Uuid(cursor.take_array()?),
            other => {
                return Err(FrameDecodeError::Header(format!(
                    "unknown header value type {other} for '{name}'"
                )))
            }
        };
        headers.push(Header { name, value });
    }

    Ok(headers)
}

/// Append one string-typed header in wire form.
pub(crate) fn push_string_header(out: &mut Vec<u8>, name: &str, value: &str) {
    let name_len = u8::try_from(name.len()).unwrap_or(u8::MAX);
    let value_len = u16::try_from(value.len()).unwrap_or(u16::MAX);
    out.push(name_len);
    out.extend_from_slice(&name.as_bytes()[..usize::from(name_len)]);
    out.push(TYPE_STRING);
    out.extend_from_slice(&value_len.to_be_bytes());
    out.extend_from_slice(&value.as_bytes()[..usize::from(value_len)]);
}
