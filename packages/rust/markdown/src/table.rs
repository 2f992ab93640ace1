//! Two-column markdown attribute tables and inline link syntax.
//!
//! Cells are escaped so that no value can break the table: pipes become
//! `\|` and line breaks collapse to a single space. The reverse helpers
//! exist so rendered blocks can be read back.

use std::sync::LazyLock;

use regex::Regex;
use turnip_shared::Link;

/// An ordered list of `(label, value)` rows rendered as a two-column table.
///
/// The first row doubles as the table header.
#[derive(Debug, Default)]
pub(crate) struct AttributeTable {
    rows: Vec<(String, String)>,
}

impl AttributeTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a row. Values are escaped at render time.
    pub(crate) fn row(&mut self, label: &str, value: &str) {
        self.rows.push((label.to_string(), value.to_string()));
    }

    pub(crate) fn to_markdown(&self) -> String {
        let mut md = String::new();
        for (i, (label, value)) in self.rows.iter().enumerate() {
            md.push_str(&format!("| {} | {} |\n", escape_cell(label), escape_cell(value)));
            if i == 0 {
                md.push_str("|---|---|\n");
            }
        }
        // Callers own separators.
        md.truncate(md.trim_end_matches('\n').len());
        md
    }
}

// ---------------------------------------------------------------------------
// Cell escaping
// ---------------------------------------------------------------------------

/// Collapse line breaks so the text fits on one markdown line.
pub fn single_line(s: &str) -> String {
    s.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// Escape a value for use inside a table cell.
pub fn escape_cell(s: &str) -> String {
    single_line(s).replace('|', "\\|")
}

/// Reverse [`escape_cell`] (line breaks are not restored).
pub fn unescape_cell(s: &str) -> String {
    s.replace("\\|", "|")
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

/// Escape a link label: backslashes first, then brackets.
pub fn escape_link_label(s: &str) -> String {
    single_line(s)
        .replace('\\', "\\\\")
        .replace('[', "\\[")
        .replace(']', "\\]")
}

/// Reverse [`escape_link_label`]: `\x` becomes `x`.
pub fn unescape_link_label(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            _ => out.push(c),
        }
    }
    out
}

/// Render a markdown inline link, escaping the label and URL delimiters.
pub fn render_link(link: &Link) -> String {
    let label = escape_link_label(&link.label);
    let url = link
        .url
        .trim()
        .replace(' ', "%20")
        .replace('(', "%28")
        .replace(')', "%29");
    format!("[{label}]({url})")
}

/// Parse a single inline link produced by [`render_link`].
///
/// URL percent-escapes are left as they are.
pub fn parse_link(s: &str) -> Option<Link> {
    static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^\[((?:\\.|[^\]\\])*)\]\(([^)]*)\)$").expect("valid regex")
    });

    let caps = LINK_RE.captures(s.trim())?;
    Some(Link::new(unescape_link_label(&caps[1]), &caps[2]))
}

// ---------------------------------------------------------------------------
// Table parsing
// ---------------------------------------------------------------------------

/// Read every `(label, value)` row of the first two-column table in `block`,
/// unescaping cells. The delimiter row is skipped.
pub fn parse_attribute_table(block: &str) -> Vec<(String, String)> {
    static ROW_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\|(.*)\|$").expect("valid regex"));
    static DELIM_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\|(\s*:?-+:?\s*\|)+$").expect("valid regex"));

    let mut rows = Vec::new();
    let mut in_table = false;

    for line in block.lines() {
        let line = line.trim_end();
        let Some(caps) = ROW_RE.captures(line) else {
            if in_table {
                break;
            }
            continue;
        };
        in_table = true;

        if DELIM_RE.is_match(line) {
            continue;
        }

        let cells = split_cells(&caps[1]);
        if cells.len() != 2 {
            continue;
        }
        rows.push((unescape_cell(cells[0].trim()), unescape_cell(cells[1].trim())));
    }

    rows
}

/// Split the inside of a table row on unescaped pipes.
fn split_cells(inner: &str) -> Vec<&str> {
    let bytes = inner.as_bytes();
    let mut cells = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' if bytes.get(i + 1) == Some(&b'|') => i += 2,
            b'|' => {
                cells.push(&inner[start..i]);
                start = i + 1;
                i += 1;
            }
            _ => i += 1,
        }
    }
    cells.push(&inner[start..]);
    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_cell_escapes_pipes_and_newlines() {
        assert_eq!(escape_cell("a|b"), "a\\|b");
        assert_eq!(escape_cell("line one\nline two"), "line one line two");
        assert_eq!(escape_cell("crlf\r\nend"), "crlf end");
    }

    #[test]
    fn unescape_reverses_escape() {
        for s in ["plain", "a|b", "a\\|b", "||", "trailing\\"] {
            assert_eq!(unescape_cell(&escape_cell(s)), s);
        }
    }

    #[test]
    fn table_first_row_is_header() {
        let mut table = AttributeTable::new();
        table.row("Name", "Modbus");
        table.row("Alias", "");
        assert_eq!(table.to_markdown(), "| Name | Modbus |\n|---|---|\n| Alias |  |");
    }

    #[test]
    fn render_link_escapes_delimiters() {
        let link = Link::new("spec [draft]", "https://example.com/a b(1)");
        assert_eq!(
            render_link(&link),
            "[spec \\[draft\\]](https://example.com/a%20b%281%29)"
        );
    }

    #[test]
    fn parse_link_reads_rendered_link() {
        let link = Link::new("KNX [assoc]", "https://knx.org");
        assert_eq!(parse_link(&render_link(&link)), Some(link));
        assert_eq!(parse_link("not a link"), None);
    }

    #[test]
    fn backslashes_in_labels_round_trip() {
        let link = Link::new("C:\\", "https://example.com");
        assert_eq!(render_link(&link), "[C:\\\\](https://example.com)");
        assert_eq!(parse_link(&render_link(&link)), Some(link));

        let tricky = Link::new("a\\]b\\\\[", "https://example.com");
        assert_eq!(parse_link(&render_link(&tricky)), Some(tricky));
    }

    #[test]
    fn parse_attribute_table_handles_escaped_pipes() {
        let block = "## X\n\n| Name | X |\n|---|---|\n| Alias | a\\|b |\n| Access |  |\n\nafter";
        let rows = parse_attribute_table(block);
        assert_eq!(
            rows,
            vec![
                ("Name".to_string(), "X".to_string()),
                ("Alias".to_string(), "a|b".to_string()),
                ("Access".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn split_cells_keeps_escaped_pipes() {
        assert_eq!(split_cells(" a | b\\|c "), vec![" a ", " b\\|c "]);
    }
}
