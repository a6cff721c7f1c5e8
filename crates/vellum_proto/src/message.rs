//! IPP message wire codec.
//!
//! Message layout (Network Byte Order / Big Endian):
//!
//! ```text
//! [VER-MAJOR:1][VER-MINOR:1][OP-OR-STATUS:2][REQUEST-ID:4]
//! ( group-delimiter-tag:1
//!   ( value-tag:1 [name-len:2][name][value-len:2][value] )* )*
//! [END-OF-ATTRIBUTES:1 = 0x03]
//! [opaque payload ...]
//! ```
//!
//! A value with a zero-length name extends the preceding attribute (1setOf).
//! Collections nest through begCollection / memberAttrName / endCollection.

use crate::attribute::{AttrList, Attribute};
use crate::error::{ProtoError, Result};
use crate::operation::Operation;
use crate::status::StatusCode;
use crate::tags::{GroupTag, ValueTag};
use crate::value::{AttrValue, IppDateTime};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read};

/// Hard cap on a single attribute value.
const MAX_VALUE_LEN: usize = 32767;
/// Wire limit on attribute names.
const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq)]
pub struct IppMessage {
    /// Protocol version (major, minor).
    pub version: (u8, u8),
    /// Operation code on requests, status code on responses.
    pub code: u16,
    pub request_id: i32,
    pub attrs: AttrList,
    /// Opaque trailing payload (document data).
    pub payload: Vec<u8>,
}

impl IppMessage {
    pub fn request(version: (u8, u8), op: Operation, request_id: i32) -> Self {
        Self {
            version,
            code: op.as_u16(),
            request_id,
            attrs: AttrList::new(),
            payload: Vec::new(),
        }
    }

    pub fn response(version: (u8, u8), status: StatusCode, request_id: i32) -> Self {
        Self {
            version,
            code: status.as_u16(),
            request_id,
            attrs: AttrList::new(),
            payload: Vec::new(),
        }
    }

    pub fn operation(&self) -> Option<Operation> {
        Operation::from_u16(self.code)
    }

    pub fn status(&self) -> Option<StatusCode> {
        StatusCode::from_u16(self.code)
    }

    /// True when the peer speaks IPP/1.x.
    pub fn is_1x(&self) -> bool {
        self.version.0 == 1
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(256 + self.payload.len());
        out.push(self.version.0);
        out.push(self.version.1);
        out.extend_from_slice(&self.code.to_be_bytes());
        out.extend_from_slice(&self.request_id.to_be_bytes());
        for group in self.attrs.groups() {
            out.push(group.tag.as_u8());
            for attr in &group.attrs {
                encode_attr(&mut out, attr)?;
            }
        }
        out.push(GroupTag::End.as_u8());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 9 {
            return Err(ProtoError::Truncated {
                expected: 9,
                got: data.len(),
            });
        }
        let mut cur = Cursor::new(data);
        let major = cur.read_u8().unwrap();
        let minor = cur.read_u8().unwrap();
        let code = cur.read_u16::<BigEndian>().unwrap();
        let request_id = cur.read_i32::<BigEndian>().unwrap();
        if request_id < 0 {
            return Err(ProtoError::BadRequestId(request_id));
        }

        let mut attrs = AttrList::new();
        let mut in_group = false;
        loop {
            let tag = read_u8(&mut cur)?;
            if tag == GroupTag::End.as_u8() {
                break;
            }
            if GroupTag::is_delimiter(tag) {
                attrs.open_group(GroupTag::from_u8(tag)?);
                in_group = true;
                continue;
            }
            let vtag = ValueTag::from_u8(tag)?;
            if matches!(vtag, ValueTag::MemberAttrName | ValueTag::EndCollection) {
                return Err(ProtoError::MemberOutsideCollection);
            }
            let name = read_name(&mut cur)?;
            let value = decode_value(&mut cur, vtag)?;
            if name.is_empty() {
                append_set_value(&mut attrs, value)?;
            } else {
                if !in_group {
                    return Err(ProtoError::ValueOutsideGroup);
                }
                push_decoded(&mut attrs, Attribute::new(name, value));
            }
        }

        let pos = cur.position() as usize;
        let payload = data[pos..].to_vec();
        Ok(Self {
            version: (major, minor),
            code,
            request_id,
            attrs,
            payload,
        })
    }
}

fn push_decoded(attrs: &mut AttrList, attr: Attribute) {
    let group = attrs
        .groups()
        .last()
        .map(|g| g.tag)
        .expect("decoder opened a group");
    attrs.push_raw(group, attr);
}

fn append_set_value(attrs: &mut AttrList, value: AttrValue) -> Result<()> {
    let last = attrs
        .last_attr_mut()
        .ok_or(ProtoError::OrphanValue)?;
    last.values.push(value);
    Ok(())
}

fn encode_attr(out: &mut Vec<u8>, attr: &Attribute) -> Result<()> {
    if attr.name.len() > MAX_NAME_LEN {
        return Err(ProtoError::NameTooLong(attr.name.len()));
    }
    for (idx, value) in attr.values.iter().enumerate() {
        let name: &str = if idx == 0 { &attr.name } else { "" };
        encode_value(out, name, value)?;
    }
    Ok(())
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn encode_value(out: &mut Vec<u8>, name: &str, value: &AttrValue) -> Result<()> {
    let tag = value.tag();
    out.push(tag.as_u8());
    put_u16(out, name.len() as u16);
    out.extend_from_slice(name.as_bytes());
    match value {
        AttrValue::Integer(v) | AttrValue::Enum(v) => {
            put_u16(out, 4);
            put_i32(out, *v);
        }
        AttrValue::Boolean(v) => {
            put_u16(out, 1);
            out.push(u8::from(*v));
        }
        AttrValue::OctetString(bytes) => {
            check_len(tag, bytes.len())?;
            put_u16(out, bytes.len() as u16);
            out.extend_from_slice(bytes);
        }
        AttrValue::DateTime(dt) => {
            put_u16(out, 11);
            put_u16(out, dt.year);
            out.extend_from_slice(&[
                dt.month,
                dt.day,
                dt.hour,
                dt.minute,
                dt.second,
                dt.deciseconds,
                dt.utc_dir,
                dt.utc_hours,
                dt.utc_minutes,
            ]);
        }
        AttrValue::Resolution { xres, yres, units } => {
            put_u16(out, 9);
            put_i32(out, *xres);
            put_i32(out, *yres);
            out.push(*units as u8);
        }
        AttrValue::Range { lower, upper } => {
            put_u16(out, 8);
            put_i32(out, *lower);
            put_i32(out, *upper);
        }
        AttrValue::TextLang { lang, text } | AttrValue::NameLang { lang, name: text } => {
            let total = 4 + lang.len() + text.len();
            check_len(tag, total)?;
            put_u16(out, total as u16);
            put_u16(out, lang.len() as u16);
            out.extend_from_slice(lang.as_bytes());
            put_u16(out, text.len() as u16);
            out.extend_from_slice(text.as_bytes());
        }
        AttrValue::Text(s)
        | AttrValue::Name(s)
        | AttrValue::Keyword(s)
        | AttrValue::Uri(s)
        | AttrValue::UriScheme(s)
        | AttrValue::Charset(s)
        | AttrValue::Language(s)
        | AttrValue::MimeType(s)
        | AttrValue::MemberAttrName(s) => {
            check_len(tag, s.len())?;
            put_u16(out, s.len() as u16);
            out.extend_from_slice(s.as_bytes());
        }
        AttrValue::Collection(members) => {
            put_u16(out, 0);
            for member in members {
                // memberAttrName carries the member's name as its value
                out.push(ValueTag::MemberAttrName.as_u8());
                put_u16(out, 0);
                put_u16(out, member.name.len() as u16);
                out.extend_from_slice(member.name.as_bytes());
                for value in &member.values {
                    encode_value(out, "", value)?;
                }
            }
            out.push(ValueTag::EndCollection.as_u8());
            put_u16(out, 0);
            put_u16(out, 0);
        }
        AttrValue::NoValue
        | AttrValue::Unknown
        | AttrValue::Unsupported
        | AttrValue::DeleteAttribute => {
            put_u16(out, 0);
        }
    }
    Ok(())
}

fn check_len(tag: ValueTag, len: usize) -> Result<()> {
    let max = tag.max_len().min(MAX_VALUE_LEN);
    if len > max {
        return Err(ProtoError::ValueTooLong {
            tag: tag.as_u8(),
            got: len,
            max,
        });
    }
    Ok(())
}

fn read_u8(cur: &mut Cursor<&[u8]>) -> Result<u8> {
    cur.read_u8().map_err(|_| ProtoError::Truncated {
        expected: cur.position() as usize + 1,
        got: cur.get_ref().len(),
    })
}

fn read_u16(cur: &mut Cursor<&[u8]>) -> Result<u16> {
    cur.read_u16::<BigEndian>()
        .map_err(|_| ProtoError::Truncated {
            expected: cur.position() as usize + 2,
            got: cur.get_ref().len(),
        })
}

fn read_exact(cur: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    cur.read_exact(&mut buf).map_err(|_| ProtoError::Truncated {
        expected: cur.position() as usize + len,
        got: cur.get_ref().len(),
    })?;
    Ok(buf)
}

fn read_name(cur: &mut Cursor<&[u8]>) -> Result<String> {
    let len = read_u16(cur)? as usize;
    if len > MAX_NAME_LEN {
        return Err(ProtoError::NameTooLong(len));
    }
    let bytes = read_exact(cur, len)?;
    String::from_utf8(bytes).map_err(|_| ProtoError::BadUtf8("attribute name".into()))
}

fn read_string(cur: &mut Cursor<&[u8]>, tag: ValueTag) -> Result<String> {
    let len = read_u16(cur)? as usize;
    check_len(tag, len)?;
    let bytes = read_exact(cur, len)?;
    String::from_utf8(bytes).map_err(|_| ProtoError::BadUtf8(format!("tag 0x{:02x}", tag.as_u8())))
}

fn decode_value(cur: &mut Cursor<&[u8]>, tag: ValueTag) -> Result<AttrValue> {
    match tag {
        ValueTag::Integer | ValueTag::Enum => {
            expect_len(cur, tag, 4)?;
            let v = cur.read_i32::<BigEndian>().map_err(truncated(cur))?;
            Ok(if tag == ValueTag::Integer {
                AttrValue::Integer(v)
            } else {
                AttrValue::Enum(v)
            })
        }
        ValueTag::Boolean => {
            expect_len(cur, tag, 1)?;
            let v = read_u8(cur)?;
            Ok(AttrValue::Boolean(v != 0))
        }
        ValueTag::OctetString => {
            let len = read_u16(cur)? as usize;
            check_len(tag, len)?;
            Ok(AttrValue::OctetString(read_exact(cur, len)?))
        }
        ValueTag::DateTime => {
            expect_len(cur, tag, 11)?;
            let year = read_u16(cur)?;
            let rest = read_exact(cur, 9)?;
            Ok(AttrValue::DateTime(IppDateTime {
                year,
                month: rest[0],
                day: rest[1],
                hour: rest[2],
                minute: rest[3],
                second: rest[4],
                deciseconds: rest[5],
                utc_dir: rest[6],
                utc_hours: rest[7],
                utc_minutes: rest[8],
            }))
        }
        ValueTag::Resolution => {
            expect_len(cur, tag, 9)?;
            let xres = cur.read_i32::<BigEndian>().map_err(truncated(cur))?;
            let yres = cur.read_i32::<BigEndian>().map_err(truncated(cur))?;
            let units = cur.read_i8().map_err(truncated(cur))?;
            Ok(AttrValue::Resolution { xres, yres, units })
        }
        ValueTag::RangeOfInteger => {
            expect_len(cur, tag, 8)?;
            let lower = cur.read_i32::<BigEndian>().map_err(truncated(cur))?;
            let upper = cur.read_i32::<BigEndian>().map_err(truncated(cur))?;
            Ok(AttrValue::Range { lower, upper })
        }
        ValueTag::TextWithLanguage | ValueTag::NameWithLanguage => {
            let total = read_u16(cur)? as usize;
            check_len(tag, total)?;
            let lang_len = read_u16(cur)? as usize;
            let lang = String::from_utf8(read_exact(cur, lang_len)?)
                .map_err(|_| ProtoError::BadUtf8("language".into()))?;
            let text_len = read_u16(cur)? as usize;
            let text = String::from_utf8(read_exact(cur, text_len)?)
                .map_err(|_| ProtoError::BadUtf8("text".into()))?;
            if total != 4 + lang_len + text_len {
                return Err(ProtoError::BadValueLength {
                    tag: tag.as_u8(),
                    got: total,
                });
            }
            Ok(if tag == ValueTag::TextWithLanguage {
                AttrValue::TextLang { lang, text }
            } else {
                AttrValue::NameLang { lang, name: text }
            })
        }
        ValueTag::Text => Ok(AttrValue::Text(read_string(cur, tag)?)),
        ValueTag::Name => Ok(AttrValue::Name(read_string(cur, tag)?)),
        ValueTag::Keyword => Ok(AttrValue::Keyword(read_string(cur, tag)?)),
        ValueTag::Uri => Ok(AttrValue::Uri(read_string(cur, tag)?)),
        ValueTag::UriScheme => Ok(AttrValue::UriScheme(read_string(cur, tag)?)),
        ValueTag::Charset => Ok(AttrValue::Charset(read_string(cur, tag)?)),
        ValueTag::NaturalLanguage => Ok(AttrValue::Language(read_string(cur, tag)?)),
        ValueTag::MimeMediaType => Ok(AttrValue::MimeType(read_string(cur, tag)?)),
        ValueTag::MemberAttrName => Ok(AttrValue::MemberAttrName(read_string(cur, tag)?)),
        ValueTag::BegCollection => {
            expect_len(cur, tag, 0)?;
            decode_collection(cur)
        }
        ValueTag::EndCollection => Err(ProtoError::MemberOutsideCollection),
        ValueTag::NoValue => {
            expect_len(cur, tag, 0)?;
            Ok(AttrValue::NoValue)
        }
        ValueTag::Unknown => {
            expect_len(cur, tag, 0)?;
            Ok(AttrValue::Unknown)
        }
        ValueTag::Unsupported => {
            expect_len(cur, tag, 0)?;
            Ok(AttrValue::Unsupported)
        }
        ValueTag::DeleteAttribute => {
            expect_len(cur, tag, 0)?;
            Ok(AttrValue::DeleteAttribute)
        }
    }
}

fn decode_collection(cur: &mut Cursor<&[u8]>) -> Result<AttrValue> {
    let mut members: Vec<Attribute> = Vec::new();
    loop {
        let raw = read_u8(cur).map_err(|_| ProtoError::UnterminatedCollection)?;
        let tag = ValueTag::from_u8(raw)?;
        // every entry inside a collection carries an empty attribute name
        let name_len = read_u16(cur)? as usize;
        read_exact(cur, name_len)?;
        match tag {
            ValueTag::EndCollection => {
                let value_len = read_u16(cur)? as usize;
                read_exact(cur, value_len)?;
                return Ok(AttrValue::Collection(members));
            }
            ValueTag::MemberAttrName => {
                let member_name = read_string(cur, tag)?;
                members.push(Attribute {
                    name: member_name,
                    tag: ValueTag::NoValue,
                    values: Vec::new(),
                });
            }
            other => {
                let value = decode_value(cur, other)?;
                let member = members
                    .last_mut()
                    .ok_or(ProtoError::MemberOutsideCollection)?;
                if member.values.is_empty() {
                    member.tag = value.tag();
                }
                member.values.push(value);
            }
        }
    }
}

fn expect_len(cur: &mut Cursor<&[u8]>, tag: ValueTag, expected: usize) -> Result<()> {
    let len = read_u16(cur)? as usize;
    if len != expected {
        return Err(ProtoError::BadValueLength {
            tag: tag.as_u8(),
            got: len,
        });
    }
    Ok(())
}

fn truncated<'a, 'b>(cur: &'a Cursor<&'b [u8]>) -> impl Fn(std::io::Error) -> ProtoError {
    let expected = cur.position() as usize;
    let got = cur.get_ref().len();
    move |_| ProtoError::Truncated { expected, got }
}
