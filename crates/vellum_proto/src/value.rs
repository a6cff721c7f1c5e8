//! Typed attribute values.

use crate::attribute::Attribute;
use crate::tags::ValueTag;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// RFC 2579 DateAndTime, the 11-octet wire layout kept field-by-field so a
/// decoded value re-encodes byte-identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IppDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub deciseconds: u8,
    pub utc_dir: u8,
    pub utc_hours: u8,
    pub utc_minutes: u8,
}

impl IppDateTime {
    pub fn from_utc(when: DateTime<Utc>) -> Self {
        Self {
            year: when.year().clamp(0, u16::MAX as i32) as u16,
            month: when.month() as u8,
            day: when.day() as u8,
            hour: when.hour() as u8,
            minute: when.minute() as u8,
            second: when.second() as u8,
            deciseconds: (when.timestamp_subsec_millis() / 100) as u8,
            utc_dir: b'+',
            utc_hours: 0,
            utc_minutes: 0,
        }
    }
}

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Integer(i32),
    Boolean(bool),
    Enum(i32),
    OctetString(Vec<u8>),
    DateTime(IppDateTime),
    Resolution { xres: i32, yres: i32, units: i8 },
    Range { lower: i32, upper: i32 },
    Text(String),
    TextLang { lang: String, text: String },
    Name(String),
    NameLang { lang: String, name: String },
    Keyword(String),
    Uri(String),
    UriScheme(String),
    Charset(String),
    Language(String),
    MimeType(String),
    MemberAttrName(String),
    Collection(Vec<Attribute>),
    NoValue,
    Unknown,
    Unsupported,
    DeleteAttribute,
}

impl AttrValue {
    /// Wire tag this value encodes under.
    pub fn tag(&self) -> ValueTag {
        match self {
            AttrValue::Integer(_) => ValueTag::Integer,
            AttrValue::Boolean(_) => ValueTag::Boolean,
            AttrValue::Enum(_) => ValueTag::Enum,
            AttrValue::OctetString(_) => ValueTag::OctetString,
            AttrValue::DateTime(_) => ValueTag::DateTime,
            AttrValue::Resolution { .. } => ValueTag::Resolution,
            AttrValue::Range { .. } => ValueTag::RangeOfInteger,
            AttrValue::Text(_) => ValueTag::Text,
            AttrValue::TextLang { .. } => ValueTag::TextWithLanguage,
            AttrValue::Name(_) => ValueTag::Name,
            AttrValue::NameLang { .. } => ValueTag::NameWithLanguage,
            AttrValue::Keyword(_) => ValueTag::Keyword,
            AttrValue::Uri(_) => ValueTag::Uri,
            AttrValue::UriScheme(_) => ValueTag::UriScheme,
            AttrValue::Charset(_) => ValueTag::Charset,
            AttrValue::Language(_) => ValueTag::NaturalLanguage,
            AttrValue::MimeType(_) => ValueTag::MimeMediaType,
            AttrValue::MemberAttrName(_) => ValueTag::MemberAttrName,
            AttrValue::Collection(_) => ValueTag::BegCollection,
            AttrValue::NoValue => ValueTag::NoValue,
            AttrValue::Unknown => ValueTag::Unknown,
            AttrValue::Unsupported => ValueTag::Unsupported,
            AttrValue::DeleteAttribute => ValueTag::DeleteAttribute,
        }
    }

    pub fn as_integer(&self) -> Option<i32> {
        match self {
            AttrValue::Integer(v) | AttrValue::Enum(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            AttrValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Any character-string payload, regardless of syntax.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s)
            | AttrValue::Name(s)
            | AttrValue::Keyword(s)
            | AttrValue::Uri(s)
            | AttrValue::UriScheme(s)
            | AttrValue::Charset(s)
            | AttrValue::Language(s)
            | AttrValue::MimeType(s)
            | AttrValue::MemberAttrName(s) => Some(s),
            AttrValue::TextLang { text, .. } => Some(text),
            AttrValue::NameLang { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn as_range(&self) -> Option<(i32, i32)> {
        match self {
            AttrValue::Range { lower, upper } => Some((*lower, *upper)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_matches_variant() {
        assert_eq!(AttrValue::Integer(1).tag(), ValueTag::Integer);
        assert_eq!(AttrValue::Keyword("none".into()).tag(), ValueTag::Keyword);
        assert_eq!(AttrValue::NoValue.tag(), ValueTag::NoValue);
    }

    #[test]
    fn string_accessor_covers_syntaxes() {
        assert_eq!(AttrValue::Uri("ipp://h/".into()).as_str(), Some("ipp://h/"));
        assert_eq!(
            AttrValue::TextLang {
                lang: "en".into(),
                text: "hi".into()
            }
            .as_str(),
            Some("hi")
        );
        assert_eq!(AttrValue::Integer(3).as_str(), None);
    }

    #[test]
    fn datetime_from_utc_is_utc() {
        let dt = IppDateTime::from_utc(Utc::now());
        assert_eq!(dt.utc_dir, b'+');
        assert_eq!(dt.utc_hours, 0);
        assert!(dt.month >= 1 && dt.month <= 12);
    }
}
