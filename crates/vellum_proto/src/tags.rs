//! Delimiter (group) and value-syntax tags.

use crate::error::{ProtoError, Result};
use serde::{Deserialize, Serialize};

/// Delimiter tags bounding attribute groups on the wire.
///
/// `Zero` never appears on the wire; it marks a group separator so that two
/// consecutive groups with the same tag stay distinct (job listings emit one
/// job group per job).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum GroupTag {
    Zero = 0x00,
    Operation = 0x01,
    Job = 0x02,
    End = 0x03,
    Printer = 0x04,
    Unsupported = 0x05,
    Subscription = 0x06,
    EventNotification = 0x07,
}

impl GroupTag {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(GroupTag::Zero),
            0x01 => Ok(GroupTag::Operation),
            0x02 => Ok(GroupTag::Job),
            0x03 => Ok(GroupTag::End),
            0x04 => Ok(GroupTag::Printer),
            0x05 => Ok(GroupTag::Unsupported),
            0x06 => Ok(GroupTag::Subscription),
            0x07 => Ok(GroupTag::EventNotification),
            _ => Err(ProtoError::BadGroupTag(value)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// True for tags that delimit groups rather than carry values.
    pub fn is_delimiter(value: u8) -> bool {
        value < 0x10
    }
}

/// Value-syntax tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValueTag {
    Unsupported = 0x10,
    Unknown = 0x12,
    NoValue = 0x13,
    DeleteAttribute = 0x16,
    Integer = 0x21,
    Boolean = 0x22,
    Enum = 0x23,
    OctetString = 0x30,
    DateTime = 0x31,
    Resolution = 0x32,
    RangeOfInteger = 0x33,
    BegCollection = 0x34,
    TextWithLanguage = 0x35,
    NameWithLanguage = 0x36,
    EndCollection = 0x37,
    Text = 0x41,
    Name = 0x42,
    Keyword = 0x44,
    Uri = 0x45,
    UriScheme = 0x46,
    Charset = 0x47,
    NaturalLanguage = 0x48,
    MimeMediaType = 0x49,
    MemberAttrName = 0x4a,
}

impl ValueTag {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x10 => Ok(ValueTag::Unsupported),
            0x12 => Ok(ValueTag::Unknown),
            0x13 => Ok(ValueTag::NoValue),
            0x16 => Ok(ValueTag::DeleteAttribute),
            0x21 => Ok(ValueTag::Integer),
            0x22 => Ok(ValueTag::Boolean),
            0x23 => Ok(ValueTag::Enum),
            0x30 => Ok(ValueTag::OctetString),
            0x31 => Ok(ValueTag::DateTime),
            0x32 => Ok(ValueTag::Resolution),
            0x33 => Ok(ValueTag::RangeOfInteger),
            0x34 => Ok(ValueTag::BegCollection),
            0x35 => Ok(ValueTag::TextWithLanguage),
            0x36 => Ok(ValueTag::NameWithLanguage),
            0x37 => Ok(ValueTag::EndCollection),
            0x41 => Ok(ValueTag::Text),
            0x42 => Ok(ValueTag::Name),
            0x44 => Ok(ValueTag::Keyword),
            0x45 => Ok(ValueTag::Uri),
            0x46 => Ok(ValueTag::UriScheme),
            0x47 => Ok(ValueTag::Charset),
            0x48 => Ok(ValueTag::NaturalLanguage),
            0x49 => Ok(ValueTag::MimeMediaType),
            0x4a => Ok(ValueTag::MemberAttrName),
            _ => Err(ProtoError::BadValueTag(value)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Out-of-band tags carry a zero-length value.
    pub fn is_out_of_band(self) -> bool {
        matches!(
            self,
            ValueTag::Unsupported
                | ValueTag::Unknown
                | ValueTag::NoValue
                | ValueTag::DeleteAttribute
        )
    }

    /// Character-string syntaxes and their maximum lengths in octets.
    pub fn max_len(self) -> usize {
        match self {
            ValueTag::Text | ValueTag::TextWithLanguage => 1023,
            ValueTag::Name | ValueTag::NameWithLanguage => 255,
            ValueTag::Keyword | ValueTag::MemberAttrName => 255,
            ValueTag::Uri => 1023,
            ValueTag::UriScheme => 63,
            ValueTag::Charset => 63,
            ValueTag::NaturalLanguage => 63,
            ValueTag::MimeMediaType => 255,
            _ => 32767,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_tag_roundtrip() {
        for raw in 0x00u8..=0x07 {
            let tag = GroupTag::from_u8(raw).unwrap();
            assert_eq!(tag.as_u8(), raw);
        }
        assert!(GroupTag::from_u8(0x08).is_err());
    }

    #[test]
    fn value_tag_roundtrip() {
        for raw in [
            0x10u8, 0x12, 0x13, 0x16, 0x21, 0x22, 0x23, 0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36,
            0x37, 0x41, 0x42, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49, 0x4a,
        ] {
            let tag = ValueTag::from_u8(raw).unwrap();
            assert_eq!(tag.as_u8(), raw);
        }
        assert!(ValueTag::from_u8(0xff).is_err());
    }

    #[test]
    fn delimiter_range() {
        assert!(GroupTag::is_delimiter(0x03));
        assert!(!GroupTag::is_delimiter(0x21));
    }
}
