//! Table of contents and heading anchors.
//!
//! Every protocol heading gets an anchor derived from its name. Anchors must
//! be unique across the index, and must not shadow the index's own section
//! headings, otherwise TOC links silently jump to the wrong block.

use std::collections::HashMap;

use tracing::{debug, instrument};

use turnip_shared::{AssemblyError, ProtocolRecord, TocEntry};

/// Derive the heading anchor for a name.
///
/// Lowercases, turns spaces into hyphens and drops every character outside
/// `[a-z0-9-]`. `KNXnet/IP` becomes `knxnetip`.
pub fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c == ' ' { '-' } else { c })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect()
}

/// Build one TOC entry per record, in record order.
///
/// Fails on the first name whose anchor is empty, reserved, or already used
/// by an earlier record.
#[instrument(skip_all, fields(count = records.len()))]
pub fn build_toc(
    records: &[ProtocolRecord],
    reserved: &[String],
) -> Result<Vec<TocEntry>, AssemblyError> {
    let mut owners: HashMap<String, &str> = HashMap::with_capacity(records.len());
    let mut toc = Vec::with_capacity(records.len());

    for record in records {
        let anchor = slugify(&record.name);

        if anchor.is_empty() {
            return Err(AssemblyError::EmptyAnchor {
                name: record.name.clone(),
            });
        }
        if reserved.contains(&anchor) {
            return Err(AssemblyError::ReservedAnchor {
                anchor,
                name: record.name.clone(),
            });
        }
        if let Some(first) = owners.get(&anchor) {
            return Err(AssemblyError::AnchorCollision {
                anchor,
                first: (*first).to_string(),
                second: record.name.clone(),
            });
        }

        owners.insert(anchor.clone(), &record.name);
        toc.push(TocEntry {
            title: record.name.clone(),
            anchor,
        });
    }

    debug!(entries = toc.len(), "TOC built");
    Ok(toc)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn records(names: &[&str]) -> Vec<ProtocolRecord> {
        names.iter().map(|n| ProtocolRecord::named(*n)).collect()
    }

    #[test]
    fn slugify_handles_common_names() {
        assert_eq!(slugify("KNXnet/IP"), "knxnetip");
        assert_eq!(slugify("Modbus TCP"), "modbus-tcp");
        assert_eq!(slugify("IEC 60870-5-104"), "iec-60870-5-104");
        assert_eq!(slugify("S7comm+"), "s7comm");
        assert_eq!(slugify("Ünïcode"), "ncode");
    }

    #[test]
    fn toc_follows_record_order() {
        let toc = build_toc(&records(&["Modbus", "BACnet/IP", "DNP3"]), &[]).unwrap();
        let anchors: Vec<_> = toc.iter().map(|e| e.anchor.as_str()).collect();
        assert_eq!(anchors, vec!["modbus", "bacnetip", "dnp3"]);
        assert_eq!(toc[1].title, "BACnet/IP");
    }

    #[test]
    fn names_differing_only_by_case_collide() {
        let err = build_toc(&records(&["Test", "test"]), &[]).unwrap_err();
        assert_eq!(
            err,
            AssemblyError::AnchorCollision {
                anchor: "test".into(),
                first: "Test".into(),
                second: "test".into(),
            }
        );
    }

    #[test]
    fn punctuation_only_names_have_no_anchor() {
        let err = build_toc(&records(&["Modbus", "//"]), &[]).unwrap_err();
        assert_eq!(err, AssemblyError::EmptyAnchor { name: "//".into() });
    }

    #[test]
    fn reserved_anchors_are_rejected() {
        let err = build_toc(&records(&["Resources"]), &["resources".to_string()]).unwrap_err();
        assert!(matches!(err, AssemblyError::ReservedAnchor { .. }));
        assert!(build_toc(&records(&["Resources"]), &[]).is_ok());
    }
}
