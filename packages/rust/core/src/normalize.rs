//! Schema normalization: loosely-typed store documents → canonical records.
//!
//! Stored protocol documents have no fixed shape. Fields may be missing,
//! hold a single value where a list is expected, use different casing, or be
//! free-form extra columns such as a second tooling reference. Everything is
//! validated here once; the resulting [`ProtocolRecord`] is immutable.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};
use url::Url;

use turnip_shared::{
    GenerationMode, Link, LinkField, ProtocolRecord, RawRecord, ResourceRecord, Result,
    SCAPY_FIELD, SchemaError, SchemaErrorKind,
};

/// Fields with a fixed meaning. Everything else is an extra column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum KnownField {
    Name,
    Alias,
    Ports,
    Access,
    Keywords,
    Description,
    Scapy,
    Other,
}

impl KnownField {
    fn classify(key: &str) -> Option<Self> {
        match key.to_ascii_lowercase().as_str() {
            "name" => Some(Self::Name),
            "alias" | "aliases" => Some(Self::Alias),
            "port" | "ports" => Some(Self::Ports),
            "access" => Some(Self::Access),
            "keyword" | "keywords" => Some(Self::Keywords),
            "description" => Some(Self::Description),
            "scapy" => Some(Self::Scapy),
            "other" | "others" => Some(Self::Other),
            _ => None,
        }
    }

    /// Single-valued fields may only appear once per document.
    fn is_scalar(self) -> bool {
        matches!(
            self,
            Self::Name | Self::Alias | Self::Access | Self::Description
        )
    }
}

/// Successfully normalized protocols plus the errors skipped in lenient mode.
#[derive(Debug, Clone)]
pub struct Normalized<T> {
    pub records: Vec<T>,
    pub errors: Vec<SchemaError>,
}

impl<T> Default for Normalized<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            errors: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Protocols
// ---------------------------------------------------------------------------

/// Normalize one stored protocol document.
#[instrument(skip_all, fields(record_id = %raw.id))]
pub fn normalize(raw: &RawRecord) -> std::result::Result<ProtocolRecord, SchemaError> {
    let obj = raw
        .body
        .as_object()
        .ok_or_else(|| SchemaError::new(SchemaErrorKind::NotAnObject, &raw.id))?;

    let name = read_name(obj).ok_or_else(|| {
        SchemaError::new(SchemaErrorKind::MissingName, &raw.id).with_field("name")
    })?;

    let fail = |kind: SchemaErrorKind, field: &str, detail: &str| {
        SchemaError::new(kind, &raw.id)
            .with_name(&name)
            .with_field(field)
            .with_detail(detail)
    };

    let mut record = ProtocolRecord::named(&name);
    let mut seen: Vec<KnownField> = Vec::new();

    for (key, value) in obj {
        // Store bookkeeping such as `_id`.
        if key.starts_with('_') {
            continue;
        }

        let Some(field) = KnownField::classify(key) else {
            normalize_extra_column(&mut record, key, value);
            continue;
        };

        if field.is_scalar() && seen.contains(&field) {
            return Err(fail(
                SchemaErrorKind::InvalidField,
                key.as_str(),
                "field appears more than once",
            ));
        }
        seen.push(field);

        match field {
            KnownField::Name => {}
            KnownField::Alias => {
                let aliases = text_list(value).ok_or_else(|| {
                    fail(
                        SchemaErrorKind::InvalidField,
                        key.as_str(),
                        "expected a string or a list of strings",
                    )
                })?;
                record.alias = (!aliases.is_empty()).then(|| aliases.join(", "));
            }
            KnownField::Ports | KnownField::Keywords => {
                let items = text_list(value).ok_or_else(|| {
                    fail(
                        SchemaErrorKind::InvalidField,
                        key.as_str(),
                        "expected a string or a list of strings",
                    )
                })?;
                if field == KnownField::Ports {
                    record.ports.extend(items);
                } else {
                    record.keywords.extend(items);
                }
            }
            KnownField::Access | KnownField::Description => {
                let text = scalar_text(value).ok_or_else(|| {
                    fail(SchemaErrorKind::InvalidField, key.as_str(), "expected a single value")
                })?;
                if field == KnownField::Access {
                    record.access = text;
                } else {
                    record.description = text;
                }
            }
            KnownField::Scapy => {
                let links = parse_links(value).ok_or_else(|| {
                    fail(
                        SchemaErrorKind::InvalidLink,
                        key.as_str(),
                        "expected a link or a list of links",
                    )
                })?;
                push_link_field(&mut record, SCAPY_FIELD, links);
            }
            KnownField::Other => {
                let links = parse_links(value).ok_or_else(|| {
                    fail(
                        SchemaErrorKind::InvalidLink,
                        key.as_str(),
                        "expected a link or a list of links",
                    )
                })?;
                record.other_links.extend(links);
            }
        }
    }

    debug!(
        name = %record.name,
        link_fields = record.link_fields.len(),
        other_links = record.other_links.len(),
        "normalized protocol"
    );
    Ok(record)
}

/// Normalize every stored protocol and reject duplicate names.
///
/// In strict mode the first error aborts; in lenient mode failing records are
/// skipped and their errors collected.
#[instrument(skip_all, fields(count = raws.len(), mode = %mode))]
pub fn normalize_all(raws: &[RawRecord], mode: GenerationMode) -> Result<Normalized<ProtocolRecord>> {
    let mut out = Normalized::default();
    let mut first_seen: HashMap<String, String> = HashMap::new();

    for raw in raws {
        let result = normalize(raw).and_then(|record| {
            match first_seen.get(&record.name) {
                Some(first_id) => Err(SchemaError::new(SchemaErrorKind::DuplicateName, &raw.id)
                    .with_name(&record.name)
                    .with_field("name")
                    .with_detail(format!("already defined by record {first_id}"))),
                None => {
                    first_seen.insert(record.name.clone(), raw.id.clone());
                    Ok(record)
                }
            }
        });

        match result {
            Ok(record) => out.records.push(record),
            Err(e) => record_error(&mut out.errors, e, mode)?,
        }
    }

    Ok(out)
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// Normalize one stored resource document (`name`, `url`, optional `description`).
pub fn normalize_resource(raw: &RawRecord) -> std::result::Result<ResourceRecord, SchemaError> {
    let obj = raw
        .body
        .as_object()
        .ok_or_else(|| SchemaError::new(SchemaErrorKind::NotAnObject, &raw.id))?;

    let name = read_name(obj).ok_or_else(|| {
        SchemaError::new(SchemaErrorKind::MissingName, &raw.id).with_field("name")
    })?;

    let url = lookup(obj, "url")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|u| is_web_url(u))
        .ok_or_else(|| {
            SchemaError::new(SchemaErrorKind::InvalidLink, &raw.id)
                .with_name(&name)
                .with_field("url")
                .with_detail("expected an absolute http(s) URL")
        })?;

    let description = match lookup(obj, "description") {
        Some(value) => scalar_text(value).ok_or_else(|| {
            SchemaError::new(SchemaErrorKind::InvalidField, &raw.id)
                .with_name(&name)
                .with_field("description")
                .with_detail("expected a single value")
        })?,
        None => None,
    };

    Ok(ResourceRecord {
        name,
        url: url.to_string(),
        description,
    })
}

/// Normalize every stored resource, honoring `mode` like [`normalize_all`].
pub fn normalize_resources(
    raws: &[RawRecord],
    mode: GenerationMode,
) -> Result<Normalized<ResourceRecord>> {
    let mut out = Normalized::default();
    for raw in raws {
        match normalize_resource(raw) {
            Ok(resource) => out.records.push(resource),
            Err(e) => record_error(&mut out.errors, e, mode)?,
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn record_error(errors: &mut Vec<SchemaError>, err: SchemaError, mode: GenerationMode) -> Result<()> {
    match mode {
        GenerationMode::Strict => Err(err.into()),
        GenerationMode::Lenient => {
            warn!(error = %err, "skipping record");
            errors.push(err);
            Ok(())
        }
    }
}

/// Case-insensitive key lookup.
fn lookup<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

fn read_name(obj: &Map<String, Value>) -> Option<String> {
    lookup(obj, "name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(String::from)
}

/// Free-form columns: kept when they carry links, dropped otherwise.
fn normalize_extra_column(record: &mut ProtocolRecord, key: &str, value: &Value) {
    if is_empty_value(value) {
        debug!(field = key, "ignoring empty extra column");
        return;
    }
    match parse_links(value) {
        Some(links) => push_link_field(record, key, links),
        None => warn!(
            protocol = %record.name,
            field = key,
            "dropping extra column without link values"
        ),
    }
}

/// Append links to the field named `label`, creating it on first sight so
/// rows keep the order in which fields were observed.
fn push_link_field(record: &mut ProtocolRecord, label: &str, links: Vec<Link>) {
    if links.is_empty() {
        return;
    }
    match record
        .link_fields
        .iter_mut()
        .find(|f| f.field.eq_ignore_ascii_case(label))
    {
        Some(existing) => existing.links.extend(links),
        None => record.link_fields.push(LinkField {
            field: label.to_string(),
            links,
        }),
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// A single string, number or bool as trimmed text. Empty text is `None`.
/// Returns `None` in the outer option for lists and objects.
fn scalar_text(value: &Value) -> Option<Option<String>> {
    match value {
        Value::Null => Some(None),
        Value::String(s) => {
            let s = s.trim();
            Some((!s.is_empty()).then(|| s.to_string()))
        }
        Value::Number(n) => Some(Some(n.to_string())),
        Value::Bool(b) => Some(Some(b.to_string())),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// A string (one element, never split) or a list of strings. Numbers are
/// accepted as text and empty entries dropped.
fn text_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(_) | Value::Number(_) | Value::Null => {
                        out.extend(scalar_text(item)?);
                    }
                    _ => return None,
                }
            }
            Some(out)
        }
        Value::Object(_) | Value::Bool(_) => None,
        scalar => Some(scalar_text(scalar)?.into_iter().collect()),
    }
}

/// A link-shaped value or a list of them. Empty values yield no links.
fn parse_links(value: &Value) -> Option<Vec<Link>> {
    if is_empty_value(value) {
        return Some(Vec::new());
    }
    if let Some(link) = parse_link(value) {
        return Some(vec![link]);
    }
    match value {
        Value::Array(items) => items.iter().map(parse_link).collect(),
        _ => None,
    }
}

/// One link: `{"label"|"name"|"title": .., "url": ..}`, `[label, url]`, or a
/// bare URL string.
fn parse_link(value: &Value) -> Option<Link> {
    match value {
        Value::String(s) => {
            let url = s.trim();
            is_web_url(url).then(|| Link::new(url, url))
        }
        Value::Object(map) => {
            let url = lookup(map, "url")?.as_str()?.trim();
            if !is_web_url(url) {
                return None;
            }
            let label = ["label", "name", "title"]
                .iter()
                .filter_map(|k| lookup(map, k).and_then(Value::as_str))
                .map(str::trim)
                .find(|l| !l.is_empty())
                .unwrap_or(url);
            Some(Link::new(label, url))
        }
        Value::Array(pair) if pair.len() == 2 => {
            let label = pair[0].as_str()?.trim();
            let url = pair[1].as_str()?.trim();
            // Two bare URLs form a list, not a pair.
            if is_web_url(label) || !is_web_url(url) {
                return None;
            }
            Some(Link::new(if label.is_empty() { url } else { label }, url))
        }
        _ => None,
    }
}

fn is_web_url(s: &str) -> bool {
    Url::parse(s)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}
