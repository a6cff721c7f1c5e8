//! Attribute records and ordered attribute groups.
//!
//! A request or response carries an ordered sequence of groups; each group is
//! an ordered list of attributes. Names may repeat across groups but stay
//! unique within a group: the builder API replaces on re-append, while the
//! decoder preserves whatever the peer sent so the dispatcher can judge it.

use crate::error::{ProtoError, Result};
use crate::tags::{GroupTag, ValueTag};
use crate::value::{AttrValue, IppDateTime};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

/// Attributes the generic copy path must never forward; each has a dedicated
/// code path in the scheduler.
pub const NEVER_COPIED: &[&str] = &[
    "document-password",
    "job-authorization-uri",
    "job-password",
    "job-password-encryption",
    "job-printer-uri",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub tag: ValueTag,
    pub values: Vec<AttrValue>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: AttrValue) -> Self {
        let tag = value.tag();
        Self {
            name: name.into(),
            tag,
            values: vec![value],
        }
    }

    pub fn set_of(name: impl Into<String>, values: Vec<AttrValue>) -> Self {
        let tag = values
            .first()
            .map(AttrValue::tag)
            .unwrap_or(ValueTag::NoValue);
        Self {
            name: name.into(),
            tag,
            values,
        }
    }

    pub fn integer(name: impl Into<String>, value: i32) -> Self {
        Self::new(name, AttrValue::Integer(value))
    }

    pub fn boolean(name: impl Into<String>, value: bool) -> Self {
        Self::new(name, AttrValue::Boolean(value))
    }

    pub fn enum_value(name: impl Into<String>, value: i32) -> Self {
        Self::new(name, AttrValue::Enum(value))
    }

    pub fn keyword(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, AttrValue::Keyword(value.into()))
    }

    pub fn keywords<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::set_of(
            name,
            values
                .into_iter()
                .map(|v| AttrValue::Keyword(v.into()))
                .collect(),
        )
    }

    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, AttrValue::Text(value.into()))
    }

    pub fn name_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, AttrValue::Name(value.into()))
    }

    pub fn uri(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, AttrValue::Uri(value.into()))
    }

    pub fn charset(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, AttrValue::Charset(value.into()))
    }

    pub fn language(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, AttrValue::Language(value.into()))
    }

    pub fn mime_type(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, AttrValue::MimeType(value.into()))
    }

    pub fn range(name: impl Into<String>, lower: i32, upper: i32) -> Self {
        Self::new(name, AttrValue::Range { lower, upper })
    }

    pub fn date_time(name: impl Into<String>, when: DateTime<Utc>) -> Self {
        Self::new(name, AttrValue::DateTime(IppDateTime::from_utc(when)))
    }

    pub fn no_value(name: impl Into<String>) -> Self {
        Self::new(name, AttrValue::NoValue)
    }

    pub fn first(&self) -> Option<&AttrValue> {
        self.values.first()
    }

    pub fn as_integer(&self) -> Option<i32> {
        self.first().and_then(AttrValue::as_integer)
    }

    pub fn as_boolean(&self) -> Option<bool> {
        self.first().and_then(AttrValue::as_boolean)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.first().and_then(AttrValue::as_str)
    }

    /// Collect every character-string value.
    pub fn strings(&self) -> Vec<&str> {
        self.values.iter().filter_map(AttrValue::as_str).collect()
    }

    /// Syntax validation per attribute tag: length limits, printable names,
    /// keyword/charset character sets, parseable URIs, sane ranges.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > 255 {
            return Err(self.invalid("name must be 1..=255 octets"));
        }
        if !self.name.bytes().all(|b| (0x21..=0x7e).contains(&b)) {
            return Err(self.invalid("name contains non-printable octets"));
        }
        for value in &self.values {
            self.validate_value(value)?;
        }
        Ok(())
    }

    fn validate_value(&self, value: &AttrValue) -> Result<()> {
        let tag = value.tag();
        if let Some(s) = value.as_str() {
            if s.len() > tag.max_len() {
                return Err(self.invalid("value exceeds maximum length"));
            }
        }
        match value {
            AttrValue::Keyword(s) | AttrValue::MemberAttrName(s) => {
                if s.is_empty()
                    || !s
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "-_.".contains(c))
                {
                    return Err(self.invalid("keyword contains invalid characters"));
                }
            }
            AttrValue::Charset(s) => {
                if s.is_empty() || !s.chars().all(|c| c.is_ascii_graphic() && !c.is_uppercase()) {
                    return Err(self.invalid("charset contains invalid characters"));
                }
            }
            AttrValue::Language(s) | AttrValue::UriScheme(s) => {
                if s.is_empty() || !s.chars().all(|c| c.is_ascii_graphic()) {
                    return Err(self.invalid("value contains invalid characters"));
                }
            }
            AttrValue::Uri(s) => {
                if Url::parse(s).is_err() {
                    return Err(self.invalid("malformed uri"));
                }
            }
            AttrValue::MimeType(s) => {
                if s.is_empty() || !s.chars().all(|c| c.is_ascii_graphic()) {
                    return Err(self.invalid("malformed mime media type"));
                }
            }
            AttrValue::Resolution { units, .. } => {
                if *units != 3 && *units != 4 {
                    return Err(self.invalid("resolution units must be dpi or dpcm"));
                }
            }
            AttrValue::Range { lower, upper } => {
                if lower > upper {
                    return Err(self.invalid("range lower bound exceeds upper bound"));
                }
            }
            AttrValue::Collection(members) => {
                for member in members {
                    member.validate()?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> ProtoError {
        ProtoError::InvalidAttribute {
            name: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrGroup {
    pub tag: GroupTag,
    pub attrs: Vec<Attribute>,
}

impl AttrGroup {
    pub fn new(tag: GroupTag) -> Self {
        Self {
            tag,
            attrs: Vec::new(),
        }
    }

    pub fn find(&self, name: &str) -> Option<&Attribute> {
        self.attrs.iter().find(|a| a.name == name)
    }
}

/// Ordered sequence of attribute groups.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AttrList {
    groups: Vec<AttrGroup>,
    #[serde(skip)]
    sealed: bool,
}

impl AttrList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn groups(&self) -> &[AttrGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.attrs.is_empty())
    }

    /// Seal the current group so the next append with the same tag starts a
    /// fresh group. Used between per-job / per-printer groups in listings.
    pub fn separator(&mut self) {
        self.sealed = true;
    }

    /// Append an attribute to the trailing group with `group` tag, starting a
    /// new group when the tag changes or after a separator. Re-appending a
    /// name within one group replaces the previous record.
    pub fn append(&mut self, group: GroupTag, attr: Attribute) -> &mut Attribute {
        let start_new = self.sealed
            || match self.groups.last() {
                Some(last) => last.tag != group,
                None => true,
            };
        if start_new {
            self.groups.push(AttrGroup::new(group));
            self.sealed = false;
        }
        let target = self.groups.last_mut().unwrap();
        if let Some(pos) = target.attrs.iter().position(|a| a.name == attr.name) {
            target.attrs[pos] = attr;
            &mut target.attrs[pos]
        } else {
            target.attrs.push(attr);
            target.attrs.last_mut().unwrap()
        }
    }

    /// Decoder path: push preserving duplicates and arrival order.
    pub(crate) fn push_raw(&mut self, group: GroupTag, attr: Attribute) {
        match self.groups.last_mut() {
            Some(last) if last.tag == group => last.attrs.push(attr),
            _ => {
                let mut g = AttrGroup::new(group);
                g.attrs.push(attr);
                self.groups.push(g);
            }
        }
    }

    pub(crate) fn open_group(&mut self, group: GroupTag) {
        self.groups.push(AttrGroup::new(group));
    }

    pub(crate) fn last_attr_mut(&mut self) -> Option<&mut Attribute> {
        self.groups.last_mut().and_then(|g| g.attrs.last_mut())
    }

    /// First attribute with this name in any group.
    pub fn find(&self, name: &str) -> Option<&Attribute> {
        self.groups.iter().find_map(|g| g.find(name))
    }

    /// First attribute with this name within groups of the given tag.
    pub fn find_in(&self, group: GroupTag, name: &str) -> Option<&Attribute> {
        self.groups
            .iter()
            .filter(|g| g.tag == group)
            .find_map(|g| g.find(name))
    }

    /// Remove and return an attribute from groups of the given tag.
    pub fn take_in(&mut self, group: GroupTag, name: &str) -> Option<Attribute> {
        for g in self.groups.iter_mut().filter(|g| g.tag == group) {
            if let Some(pos) = g.attrs.iter().position(|a| a.name == name) {
                return Some(g.attrs.remove(pos));
            }
        }
        None
    }

    pub fn remove(&mut self, name: &str) {
        for g in &mut self.groups {
            g.attrs.retain(|a| a.name != name);
        }
    }

    /// Iterate `(group, attribute)` pairs in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (GroupTag, &Attribute)> {
        self.groups
            .iter()
            .flat_map(|g| g.attrs.iter().map(move |a| (g.tag, a)))
    }

    /// Copy attributes into `dst`, preserving group structure.
    ///
    /// `requested` limits the copy to named attributes when present.
    /// Collection-valued attributes are withheld from 1.x peers unless named
    /// explicitly, and the dedicated-path attributes in [`NEVER_COPIED`] are
    /// withheld from everyone.
    pub fn copy_into(
        &self,
        dst: &mut AttrList,
        requested: Option<&HashSet<String>>,
        to_1x: bool,
        exclude: &[&str],
    ) {
        for group in &self.groups {
            dst.separator();
            for attr in &group.attrs {
                if NEVER_COPIED.contains(&attr.name.as_str()) {
                    continue;
                }
                if exclude.contains(&attr.name.as_str()) {
                    continue;
                }
                let explicitly_requested =
                    requested.map(|set| set.contains(&attr.name)).unwrap_or(false);
                if let Some(set) = requested {
                    if !set.contains(&attr.name) {
                        continue;
                    }
                }
                if to_1x && attr.tag == ValueTag::BegCollection && !explicitly_requested {
                    continue;
                }
                dst.append(group.tag, attr.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_groups_by_tag() {
        let mut list = AttrList::new();
        list.append(GroupTag::Operation, Attribute::charset("attributes-charset", "utf-8"));
        list.append(GroupTag::Operation, Attribute::text("status-message", "ok"));
        list.append(GroupTag::Job, Attribute::integer("job-id", 1));
        assert_eq!(list.groups().len(), 2);
        assert_eq!(list.groups()[0].attrs.len(), 2);
    }

    #[test]
    fn separator_splits_same_tag_groups() {
        let mut list = AttrList::new();
        list.append(GroupTag::Job, Attribute::integer("job-id", 1));
        list.separator();
        list.append(GroupTag::Job, Attribute::integer("job-id", 2));
        assert_eq!(list.groups().len(), 2);
        assert_eq!(list.groups()[1].attrs[0].as_integer(), Some(2));
    }

    #[test]
    fn append_replaces_within_group() {
        let mut list = AttrList::new();
        list.append(GroupTag::Job, Attribute::integer("job-priority", 10));
        list.append(GroupTag::Job, Attribute::integer("job-priority", 90));
        assert_eq!(list.groups().len(), 1);
        assert_eq!(list.find("job-priority").unwrap().as_integer(), Some(90));
    }

    #[test]
    fn validate_rejects_long_name() {
        let attr = Attribute::integer("x".repeat(256), 1);
        assert!(attr.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_uri() {
        let attr = Attribute::uri("printer-uri", "not a uri");
        assert!(attr.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_range() {
        let attr = Attribute::range("page-ranges", 9, 3);
        assert!(attr.validate().is_err());
    }

    #[test]
    fn copy_never_forwards_password_attrs() {
        let mut src = AttrList::new();
        src.append(GroupTag::Job, Attribute::text("document-password", "s"));
        src.append(GroupTag::Job, Attribute::integer("copies", 2));
        let mut dst = AttrList::new();
        src.copy_into(&mut dst, None, false, &[]);
        assert!(dst.find("document-password").is_none());
        assert_eq!(dst.find("copies").unwrap().as_integer(), Some(2));
    }

    #[test]
    fn copy_withholds_collections_from_1x() {
        let mut src = AttrList::new();
        src.append(
            GroupTag::Job,
            Attribute::new(
                "media-col",
                AttrValue::Collection(vec![Attribute::keyword("media-type", "stationery")]),
            ),
        );
        let mut dst = AttrList::new();
        src.copy_into(&mut dst, None, true, &[]);
        assert!(dst.find("media-col").is_none());

        let mut requested = HashSet::new();
        requested.insert("media-col".to_string());
        let mut dst = AttrList::new();
        src.copy_into(&mut dst, Some(&requested), true, &[]);
        assert!(dst.find("media-col").is_some());
    }
}
