//! Protocol lookup by name or alias.

use turnip_shared::ProtocolRecord;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("no protocol matches '{0}'")]
    NotFound(String),

    #[error("'{query}' matches several protocols: {}", .names.join(", "))]
    Ambiguous { query: String, names: Vec<String> },
}

/// Find the protocol whose name or alias matches `query`, ignoring case.
///
/// An exact match on a name or alias wins. Otherwise `query` must be a
/// substring of exactly one protocol's names.
pub fn find_protocol<'a>(
    records: &'a [ProtocolRecord],
    query: &str,
) -> Result<&'a ProtocolRecord, LookupError> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Err(LookupError::NotFound(query.to_string()));
    }

    if let Some(exact) = records.iter().find(|r| {
        r.names()
            .iter()
            .any(|n| n.to_lowercase() == needle)
    }) {
        return Ok(exact);
    }

    let partial: Vec<&ProtocolRecord> = records
        .iter()
        .filter(|r| r.names().iter().any(|n| n.to_lowercase().contains(&needle)))
        .collect();

    match partial.as_slice() {
        [] => Err(LookupError::NotFound(query.to_string())),
        [only] => Ok(*only),
        many => Err(LookupError::Ambiguous {
            query: query.to_string(),
            names: many.iter().map(|r| r.name.clone()).collect(),
        }),
    }
}
