//! Core domain types for the Turn/IP protocol catalog.

use serde::{Deserialize, Serialize};

/// Row label used for tooling references to Scapy layers.
pub const SCAPY_FIELD: &str = "Scapy";

/// Label column content for the second and later links of one field.
pub const CONTINUATION_LABEL: &str = "";

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

/// A labeled reference URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub label: String,
    pub url: String,
}

impl Link {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
        }
    }
}

/// All links produced by one stored field, in store order.
///
/// The first link is rendered under the field name, the rest as
/// continuation rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkField {
    /// Field name as it appears in the label column.
    pub field: String,
    pub links: Vec<Link>,
}

impl LinkField {
    /// Label column content for the link at `index`.
    pub fn row_label(&self, index: usize) -> &str {
        if index == 0 {
            &self.field
        } else {
            CONTINUATION_LABEL
        }
    }
}

// ---------------------------------------------------------------------------
// ProtocolRecord
// ---------------------------------------------------------------------------

/// Canonical, validated description of one protocol.
///
/// Built once per run by the normalizer and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolRecord {
    /// Unique, non-empty protocol name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Free-form port specifications such as `502/tcp`.
    #[serde(default)]
    pub ports: Vec<String>,
    /// Opaque cost/difficulty descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Tooling references and other link-valued fields, in the order they
    /// were first seen in the stored record.
    #[serde(default)]
    pub link_fields: Vec<LinkField>,
    /// Entries of the "Other" list.
    #[serde(default)]
    pub other_links: Vec<Link>,
}

impl ProtocolRecord {
    /// Create a record with only a name set.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            ports: Vec::new(),
            access: None,
            keywords: Vec::new(),
            description: None,
            link_fields: Vec::new(),
            other_links: Vec::new(),
        }
    }

    /// The Scapy tooling reference, if the record has one.
    pub fn scapy_reference(&self) -> Option<&LinkField> {
        self.link_fields
            .iter()
            .find(|f| f.field.eq_ignore_ascii_case(SCAPY_FIELD))
    }

    /// The name followed by every alias.
    pub fn names(&self) -> Vec<&str> {
        let mut names = vec![self.name.as_str()];
        if let Some(alias) = &self.alias {
            names.extend(alias.split(',').map(str::trim).filter(|a| !a.is_empty()));
        }
        names
    }
}

// ---------------------------------------------------------------------------
// ResourceRecord
// ---------------------------------------------------------------------------

/// An entry of the generic resources collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// RawRecord
// ---------------------------------------------------------------------------

/// A document exactly as read from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Store identifier, used in error reports.
    pub id: String,
    /// Loosely-typed body; key order is the stored order.
    pub body: serde_json::Value,
}

impl RawRecord {
    pub fn new(id: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            body,
        }
    }
}

// ---------------------------------------------------------------------------
// TocEntry
// ---------------------------------------------------------------------------

/// A single line of the catalog's table of contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    /// Display title (the protocol name).
    pub title: String,
    /// Heading anchor, without the leading `#`.
    pub anchor: String,
}

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

/// How per-record schema errors are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// Abort on the first bad record.
    #[default]
    Strict,
    /// Skip bad records, report them together, publish the rest.
    Lenient,
}

impl std::str::FromStr for GenerationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            other => Err(format!("unknown mode '{other}': expected 'strict' or 'lenient'")),
        }
    }
}

impl std::fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strict => f.write_str("strict"),
            Self::Lenient => f.write_str("lenient"),
        }
    }
}

/// Order in which the store returns records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordOrder {
    /// Insertion order.
    #[default]
    Insertion,
    /// By stored `name`, case-insensitive.
    Name,
}
