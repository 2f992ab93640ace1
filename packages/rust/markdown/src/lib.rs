//! Markdown rendering for the protocol catalog.
//!
//! Turns a canonical [`ProtocolRecord`] into the fixed heading + attribute
//! table + "Other" list block, and renders the catalog's table of contents
//! and resources list. Every function here is pure: the same input always
//! yields byte-identical output.

mod table;

use tracing::{debug, instrument};

use turnip_shared::{ProtocolRecord, ResourceRecord, TocEntry};

pub use table::{
    escape_cell, escape_link_label, parse_attribute_table, parse_link, render_link, single_line,
    unescape_cell, unescape_link_label,
};

use table::AttributeTable;

/// Canonical attribute rows, in render order.
pub const ROW_NAME: &str = "Name";
pub const ROW_ALIAS: &str = "Alias";
pub const ROW_PORT: &str = "Port";
pub const ROW_ACCESS: &str = "Access";
pub const ROW_KEYWORDS: &str = "Keywords";
pub const ROW_DESCRIPTION: &str = "Description";

/// Heading of the index section listing generic resources.
pub const RESOURCES_HEADING: &str = "Resources";

/// Title of the per-protocol link list.
pub const OTHER_HEADING: &str = "Other";

/// Separator for multi-value cells.
const LIST_SEPARATOR: &str = ", ";

// ---------------------------------------------------------------------------
// Protocol blocks
// ---------------------------------------------------------------------------

/// Render one protocol as a markdown block.
///
/// Layout:
/// 1. `## <name>` heading
/// 2. Attribute table: Name, Alias, Port, Access, Keywords, Description,
///    then one row per link of each link field (continuation rows carry an
///    empty label)
/// 3. `**Other**` list of links, omitted when there are none
///
/// The block carries no trailing newline.
#[instrument(skip_all, fields(name = %record.name))]
pub fn render_protocol(record: &ProtocolRecord) -> String {
    let mut table = AttributeTable::new();
    table.row(ROW_NAME, &record.name);
    table.row(ROW_ALIAS, record.alias.as_deref().unwrap_or_default());
    table.row(ROW_PORT, &record.ports.join(LIST_SEPARATOR));
    table.row(ROW_ACCESS, record.access.as_deref().unwrap_or_default());
    table.row(ROW_KEYWORDS, &record.keywords.join(LIST_SEPARATOR));
    table.row(
        ROW_DESCRIPTION,
        record.description.as_deref().unwrap_or_default(),
    );

    for field in &record.link_fields {
        for (i, link) in field.links.iter().enumerate() {
            table.row(field.row_label(i), &render_link(link));
        }
    }

    let mut md = format!("## {}\n\n{}", single_line(&record.name), table.to_markdown());

    if !record.other_links.is_empty() {
        md.push_str(&format!("\n\n**{OTHER_HEADING}**\n"));
        for link in &record.other_links {
            md.push_str(&format!("\n- {}", render_link(link)));
        }
    }

    debug!(len = md.len(), "rendered protocol block");
    md
}

// ---------------------------------------------------------------------------
// Catalog sections
// ---------------------------------------------------------------------------

/// Render the table of contents as a markdown list of anchor links.
pub fn render_toc(entries: &[TocEntry]) -> String {
    entries
        .iter()
        .map(|entry| {
            format!("- [{}](#{})", escape_link_label(&entry.title), entry.anchor)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render the resources section. Returns an empty string for no resources.
pub fn render_resources(resources: &[ResourceRecord]) -> String {
    if resources.is_empty() {
        return String::new();
    }

    let mut md = format!("## {RESOURCES_HEADING}\n");
    for resource in resources {
        let link = turnip_shared::Link::new(&resource.name, &resource.url);
        md.push_str(&format!("\n- {}", render_link(&link)));
        if let Some(description) = resource.description.as_deref().filter(|d| !d.is_empty()) {
            md.push_str(&format!(": {}", single_line(description)));
        }
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnip_shared::{Link, LinkField, SCAPY_FIELD};

    fn knx() -> ProtocolRecord {
        ProtocolRecord {
            name: "KNXnet/IP".into(),
            alias: Some("KNX".into()),
            ports: vec!["3671/tcp".into()],
            access: Some("loutre".into()),
            keywords: vec!["BMS".into(), "building automation".into()],
            description: None,
            link_fields: vec![],
            other_links: vec![
                Link::new("KNX association", "https://knx.org"),
                Link::new("KNX association", "https://knx.org/1"),
                Link::new("Again", "https://knx.org/2"),
            ],
        }
    }

    fn cell<'a>(rows: &'a [(String, String)], label: &str) -> &'a str {
        rows.iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v.as_str())
            .unwrap_or_else(|| panic!("missing row {label}"))
    }

    #[test]
    fn render_knx_example() {
        let md = render_protocol(&knx());
        let rows = parse_attribute_table(&md);

        assert!(md.starts_with("## KNXnet/IP\n\n| Name | KNXnet/IP |\n|---|---|\n"));
        assert_eq!(cell(&rows, "Port"), "3671/tcp");
        assert_eq!(cell(&rows, "Keywords"), "BMS, building automation");
        assert!(md.ends_with(
            "**Other**\n\n- [KNX association](https://knx.org)\n- [KNX association](https://knx.org/1)\n- [Again](https://knx.org/2)"
        ));
        assert_eq!(md.matches("\n- [").count(), 3);
    }

    #[test]
    fn canonical_rows_always_present_in_order() {
        let md = render_protocol(&ProtocolRecord::named("DNP3"));
        let labels: Vec<_> = parse_attribute_table(&md)
            .into_iter()
            .map(|(label, _)| label)
            .collect();
        assert_eq!(
            labels,
            vec!["Name", "Alias", "Port", "Access", "Keywords", "Description"]
        );
        assert!(md.contains("| Access |  |"));
        assert!(!md.contains("**Other**"));
    }

    #[test]
    fn link_fields_render_continuation_rows() {
        let mut record = ProtocolRecord::named("EtherNet/IP");
        record.link_fields.push(LinkField {
            field: SCAPY_FIELD.into(),
            links: vec![
                Link::new("enipTCP.py", "https://example.com/enipTCP.py"),
                Link::new("enip.py", "https://example.com/enip.py"),
            ],
        });
        record.link_fields.push(LinkField {
            field: "Wireshark".into(),
            links: vec![],
        });

        let md = render_protocol(&record);
        assert!(md.contains(
            "| Description |  |\n| Scapy | [enipTCP.py](https://example.com/enipTCP.py) |\n|  | [enip.py](https://example.com/enip.py) |"
        ));
        assert!(!md.contains("Wireshark"));
    }

    #[test]
    fn pipes_in_values_are_escaped() {
        let mut record = ProtocolRecord::named("Weird|Proto");
        record.description = Some("one | two".into());
        let md = render_protocol(&record);
        assert!(md.contains("| Name | Weird\\|Proto |"));
        assert!(md.contains("| Description | one \\| two |"));

        let rows = parse_attribute_table(&md);
        assert_eq!(cell(&rows, "Description"), "one | two");
    }

    #[test]
    fn rendering_is_deterministic() {
        let record = knx();
        assert_eq!(render_protocol(&record), render_protocol(&record));
    }

    #[test]
    fn round_trip_canonical_fields() {
        let mut record = knx();
        record.description = Some("Building automation over IP".into());
        record.link_fields.push(LinkField {
            field: SCAPY_FIELD.into(),
            links: vec![Link::new("knx.py", "https://example.com/knx.py")],
        });

        let rows = parse_attribute_table(&render_protocol(&record));
        assert_eq!(cell(&rows, ROW_NAME), record.name);
        assert_eq!(cell(&rows, ROW_ALIAS), "KNX");
        assert_eq!(cell(&rows, ROW_PORT), record.ports.join(", "));
        assert_eq!(cell(&rows, ROW_ACCESS), "loutre");
        assert_eq!(cell(&rows, ROW_DESCRIPTION), "Building automation over IP");
        assert_eq!(
            parse_link(cell(&rows, SCAPY_FIELD)),
            Some(Link::new("knx.py", "https://example.com/knx.py"))
        );
    }

    #[test]
    fn toc_lists_anchors_in_order() {
        let toc = render_toc(&[
            TocEntry {
                title: "Modbus".into(),
                anchor: "modbus".into(),
            },
            TocEntry {
                title: "BACnet/IP".into(),
                anchor: "bacnetip".into(),
            },
        ]);
        assert_eq!(toc, "- [Modbus](#modbus)\n- [BACnet/IP](#bacnetip)");
    }

    #[test]
    fn toc_escapes_backslashes_and_brackets() {
        let toc = render_toc(&[TocEntry {
            title: "Foo\\ [v2]".into(),
            anchor: "foo-v2".into(),
        }]);
        assert_eq!(toc, "- [Foo\\\\ \\[v2\\]](#foo-v2)");
        let link = parse_link(toc.trim_start_matches("- ")).unwrap();
        assert_eq!(link.label, "Foo\\ [v2]");
    }

    #[test]
    fn resources_section() {
        assert_eq!(render_resources(&[]), "");

        let md = render_resources(&[
            ResourceRecord {
                name: "ICS protocol list".into(),
                url: "https://example.com/ics".into(),
                description: Some("Community list".into()),
            },
            ResourceRecord {
                name: "Wireshark".into(),
                url: "https://www.wireshark.org".into(),
                description: None,
            },
        ]);
        assert_eq!(
            md,
            "## Resources\n\n- [ICS protocol list](https://example.com/ics): Community list\n- [Wireshark](https://www.wireshark.org)"
        );
    }
}
