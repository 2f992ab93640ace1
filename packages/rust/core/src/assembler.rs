//! Catalog assembler.
//!
//! Takes stored protocol and resource documents, normalizes them, renders each
//! protocol block and concatenates everything into the index document (and,
//! optionally, one document per protocol). Nothing here touches the
//! filesystem; the publisher owns writing.

use std::path::PathBuf;

use tracing::{info, instrument};

use turnip_markdown::{render_protocol, render_resources, render_toc};
use turnip_publisher::Document;
use turnip_shared::{GenerateConfig, GenerationMode, RawRecord, Result, SchemaError, TocEntry};

use crate::normalize::{normalize_all, normalize_resources};
use crate::toc::{build_toc, slugify};

/// Options controlling catalog assembly.
#[derive(Debug, Clone)]
pub struct AssembleOptions {
    pub mode: GenerationMode,
    /// Top-level heading of the index document.
    pub title: String,
    /// Index file name, relative to the output root.
    pub index_file: String,
    /// Emit `<protocols_dir>/<slug>.md` for every protocol.
    pub per_protocol: bool,
    pub protocols_dir: String,
    /// Render the resources section.
    pub include_resources: bool,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            mode: GenerationMode::Strict,
            title: "Turn/IP".into(),
            index_file: "README.md".into(),
            per_protocol: false,
            protocols_dir: "protocols".into(),
            include_resources: true,
        }
    }
}

impl From<&GenerateConfig> for AssembleOptions {
    fn from(config: &GenerateConfig) -> Self {
        Self {
            mode: config.mode,
            title: config.title.clone(),
            index_file: config.index_file.clone(),
            per_protocol: config.per_protocol,
            protocols_dir: config.protocols_dir.clone(),
            include_resources: config.include_resources,
        }
    }
}

/// The assembled, not yet published, catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    /// Index document: title, TOC, every protocol block, resources.
    pub index: Document,
    /// Per-protocol documents, empty unless requested.
    pub pages: Vec<Document>,
    /// TOC entries in body order.
    pub toc: Vec<TocEntry>,
    /// Records skipped in lenient mode.
    pub errors: Vec<SchemaError>,
}

impl Catalog {
    /// Number of protocols rendered.
    pub fn protocol_count(&self) -> usize {
        self.toc.len()
    }

    /// Every document to publish, index first.
    pub fn into_documents(self) -> Vec<Document> {
        let mut docs = Vec::with_capacity(1 + self.pages.len());
        docs.push(self.index);
        docs.extend(self.pages);
        docs
    }
}

/// Assemble the catalog from stored documents.
///
/// Schema errors abort in strict mode and are collected in lenient mode.
/// Anchor problems abort in both modes.
#[instrument(skip_all, fields(protocols = protocols.len(), resources = resources.len(), mode = %options.mode))]
pub fn assemble(
    protocols: &[RawRecord],
    resources: &[RawRecord],
    options: &AssembleOptions,
) -> Result<Catalog> {
    let normalized = normalize_all(protocols, options.mode)?;
    let mut errors = normalized.errors;
    let records = normalized.records;

    let resources = if options.include_resources {
        let normalized = normalize_resources(resources, options.mode)?;
        errors.extend(normalized.errors);
        normalized.records
    } else {
        Vec::new()
    };

    let reserved = reserved_anchors(&options.title, !resources.is_empty());
    let toc = build_toc(&records, &reserved)?;
    let blocks: Vec<String> = records.iter().map(render_protocol).collect();

    let mut sections = vec![format!("# {}", turnip_markdown::single_line(&options.title))];
    if !toc.is_empty() {
        sections.push(render_toc(&toc));
    }
    sections.extend(blocks.iter().cloned());
    let resources_md = render_resources(&resources);
    if !resources_md.is_empty() {
        sections.push(resources_md);
    }
    let index = Document::new(&options.index_file, format!("{}\n", sections.join("\n\n")));

    let pages = if options.per_protocol {
        toc.iter()
            .zip(&blocks)
            .map(|(entry, block)| {
                let path = PathBuf::from(&options.protocols_dir).join(format!("{}.md", entry.anchor));
                Document::new(path, format!("{block}\n"))
            })
            .collect()
    } else {
        Vec::new()
    };

    info!(
        rendered = toc.len(),
        skipped = errors.len(),
        pages = pages.len(),
        "catalog assembled"
    );

    Ok(Catalog {
        index,
        pages,
        toc,
        errors,
    })
}

/// Anchors of the index's own headings, which protocols may not reuse.
pub(crate) fn reserved_anchors(title: &str, with_resources: bool) -> Vec<String> {
    let mut reserved = vec![slugify(title)];
    if with_resources {
        reserved.push(slugify(turnip_markdown::RESOURCES_HEADING));
    }
    reserved.retain(|anchor| !anchor.is_empty());
    reserved
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
