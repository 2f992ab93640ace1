//! End-to-end `generate` pipeline: store → normalize → assemble → publish.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{info, instrument};

use turnip_publisher::{Document, PublishResult};
use turnip_shared::{
    AssemblyError, GenerateConfig, GenerationMode, ProtocolRecord, RawRecord, Result, SchemaError,
    TurnipError,
};
use turnip_storage::Storage;

use crate::assembler::{AssembleOptions, assemble, reserved_anchors};
use crate::normalize::{Normalized, normalize_all, normalize_resources};
use crate::toc::build_toc;

/// Result of the `generate` pipeline.
#[derive(Debug)]
pub struct GenerateResult {
    /// Path of the published index document.
    pub index_path: PathBuf,
    pub manifest_path: PathBuf,
    /// Number of protocols rendered.
    pub protocol_count: usize,
    /// Number of per-protocol documents published.
    pub page_count: usize,
    /// Records skipped in lenient mode.
    pub errors: Vec<SchemaError>,
    /// Total elapsed time.
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when the pipeline completes.
    fn done(&self, result: &GenerateResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _result: &GenerateResult) {}
}

/// Run the full `generate` pipeline against an open store.
///
/// 1. Fetch protocol and resource documents (bounded by `timeout_secs`)
/// 2. Normalize, render and assemble the catalog
/// 3. Stage every document (bounded by `timeout_secs`)
/// 4. Move staged documents into place and write the manifest
///
/// Any error before step 4 leaves the previous output untouched.
#[instrument(skip_all, fields(out = %config.output_dir.display(), mode = %config.mode))]
pub async fn generate(
    storage: &Storage,
    config: &GenerateConfig,
    progress: &dyn ProgressReporter,
) -> Result<GenerateResult> {
    config.validate()?;
    let start = Instant::now();

    info!(store = %config.store_path.display(), "starting generate pipeline");

    // --- Phase 1: Fetch ---
    progress.phase("Reading records");
    let (protocols, resources) = fetch_records(storage, config).await?;

    // --- Phase 2: Assemble ---
    progress.phase("Assembling catalog");
    let catalog = assemble(&protocols, &resources, &AssembleOptions::from(config))?;
    let protocol_count = catalog.protocol_count();
    let page_count = catalog.pages.len();
    let errors = catalog.errors.clone();

    // --- Phase 3: Publish ---
    progress.phase("Publishing");
    let published = publish_documents(config, catalog.into_documents(), protocol_count).await?;

    let result = GenerateResult {
        index_path: published.output_root.join(&config.index_file),
        manifest_path: published.manifest_path,
        protocol_count,
        page_count,
        errors,
        elapsed: start.elapsed(),
    };

    progress.done(&result);

    info!(
        protocol_count = result.protocol_count,
        page_count = result.page_count,
        skipped = result.errors.len(),
        elapsed_ms = result.elapsed.as_millis(),
        "generate pipeline complete"
    );

    Ok(result)
}

// ---------------------------------------------------------------------------
// Check
// ---------------------------------------------------------------------------

/// Every problem found in the store, without publishing anything.
#[derive(Debug, Default)]
pub struct CheckReport {
    /// Number of stored protocol documents.
    pub stored: usize,
    /// Number of protocols that normalize cleanly.
    pub valid: usize,
    pub schema_errors: Vec<SchemaError>,
    /// First anchor problem among the valid protocols.
    pub assembly_error: Option<AssemblyError>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.schema_errors.is_empty() && self.assembly_error.is_none()
    }
}

/// Normalize everything leniently and report all schema and anchor problems.
#[instrument(skip_all)]
pub async fn check(storage: &Storage, config: &GenerateConfig) -> Result<CheckReport> {
    let (protocols, resources) = fetch_records(storage, config).await?;

    let normalized = normalize_all(&protocols, GenerationMode::Lenient)?;
    let resources = normalize_resources(&resources, GenerationMode::Lenient)?;

    let reserved = reserved_anchors(&config.title, !resources.records.is_empty());
    let assembly_error = build_toc(&normalized.records, &reserved).err();

    let mut schema_errors = normalized.errors;
    schema_errors.extend(resources.errors);

    info!(
        stored = protocols.len(),
        valid = normalized.records.len(),
        errors = schema_errors.len(),
        "check complete"
    );

    Ok(CheckReport {
        stored: protocols.len(),
        valid: normalized.records.len(),
        schema_errors,
        assembly_error,
    })
}

/// Every protocol that normalizes cleanly, plus the errors of those that
/// don't.
pub async fn load_protocols(
    storage: &Storage,
    config: &GenerateConfig,
) -> Result<Normalized<ProtocolRecord>> {
    let protocols = with_timeout(
        "store query",
        config.timeout_secs,
        storage.fetch_protocols(config.order),
    )
    .await?;
    normalize_all(&protocols, GenerationMode::Lenient)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn fetch_records(
    storage: &Storage,
    config: &GenerateConfig,
) -> Result<(Vec<RawRecord>, Vec<RawRecord>)> {
    with_timeout("store query", config.timeout_secs, async {
        let protocols = storage.fetch_protocols(config.order).await?;
        let resources = if config.include_resources {
            storage.fetch_resources(config.order).await?
        } else {
            Vec::new()
        };
        Ok((protocols, resources))
    })
    .await
}

/// Stage on the blocking pool under the deadline, then finalize.
///
/// If the deadline passes, the staging task runs to completion in the
/// background and its output is dropped, which removes the staging directory.
async fn publish_documents(
    config: &GenerateConfig,
    documents: Vec<Document>,
    protocol_count: usize,
) -> Result<PublishResult> {
    publish_within(
        &config.output_dir,
        Duration::from_secs(config.timeout_secs),
        documents,
        protocol_count,
    )
    .await
}

async fn publish_within(
    output_dir: &Path,
    deadline: Duration,
    documents: Vec<Document>,
    protocol_count: usize,
) -> Result<PublishResult> {
    let root = output_dir.to_path_buf();
    let task = tokio::task::spawn_blocking(move || turnip_publisher::stage(&root, &documents));

    let staged = with_deadline("publish", deadline, async {
        task.await
            .map_err(|e| TurnipError::io(output_dir, std::io::Error::other(e)))?
    })
    .await?;

    staged.finalize(protocol_count)
}

async fn with_timeout<T>(
    stage: &'static str,
    secs: u64,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    with_deadline(stage, Duration::from_secs(secs), fut).await
}

async fn with_deadline<T>(
    stage: &'static str,
    deadline: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| TurnipError::Timeout {
            stage,
            secs: deadline.as_secs(),
        })?
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use turnip_publisher::{MANIFEST_FILE, read_manifest};
    use turnip_shared::{AppConfig, ErrorCategory};
    use uuid::Uuid;

    struct Fixture {
        dir: PathBuf,
        storage: Storage,
        config: GenerateConfig,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    async fn fixture(protocols: Vec<serde_json::Value>) -> Fixture {
        let dir = std::env::temp_dir().join(format!("turnip-pipeline-test-{}", Uuid::now_v7()));
        let mut config = GenerateConfig::from(&AppConfig::default());
        config.store_path = dir.join("turnip.db");
        config.output_dir = dir.join("out");

        let storage = Storage::open(&config.store_path).await.unwrap();
        for doc in &protocols {
            storage.insert_protocol(doc).await.unwrap();
        }
        Fixture {
            dir,
            storage,
            config,
        }
    }

    #[tokio::test]
    async fn generate_publishes_index_and_manifest() {
        let mut fx = fixture(vec![
            json!({"name": "Modbus", "port": "502/tcp"}),
            json!({"name": "KNXnet/IP", "port": ["3671/tcp"], "keywords": ["BMS", "building automation"]}),
        ])
        .await;
        fx.config.per_protocol = true;

        let result = generate(&fx.storage, &fx.config, &SilentProgress).await.unwrap();
        assert_eq!(result.protocol_count, 2);
        assert_eq!(result.page_count, 2);
        assert!(result.errors.is_empty());

        let index = std::fs::read_to_string(&result.index_path).unwrap();
        assert!(index.starts_with("# Turn/IP\n\n- [Modbus](#modbus)\n- [KNXnet/IP](#knxnetip)\n"));
        assert!(fx.config.output_dir.join("protocols/knxnetip.md").exists());
        assert_eq!(result.manifest_path, fx.config.output_dir.join(MANIFEST_FILE));

        let manifest = read_manifest(&fx.config.output_dir).unwrap().unwrap();
        assert_eq!(manifest.protocol_count, 2);
        assert_eq!(manifest.files.len(), 3);
    }

    #[tokio::test]
    async fn strict_schema_error_publishes_nothing() {
        let fx = fixture(vec![json!({"name": "Modbus"}), json!({"alias": "nameless"})]).await;

        let err = generate(&fx.storage, &fx.config, &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Schema);
        assert!(!fx.config.output_dir.join("README.md").exists());
    }

    #[tokio::test]
    async fn lenient_reports_errors_and_publishes_rest() {
        let mut fx = fixture(vec![
            json!({"name": "Modbus"}),
            json!({"alias": "nameless"}),
            json!({"name": "DNP3"}),
        ])
        .await;
        fx.config.mode = GenerationMode::Lenient;

        let result = generate(&fx.storage, &fx.config, &SilentProgress).await.unwrap();
        assert_eq!(result.protocol_count, 2);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].record_id, "2");
    }

    #[tokio::test]
    async fn anchor_collision_keeps_previous_output() {
        let fx = fixture(vec![json!({"name": "Modbus"})]).await;
        generate(&fx.storage, &fx.config, &SilentProgress).await.unwrap();
        let before = std::fs::read_to_string(fx.config.output_dir.join("README.md")).unwrap();

        fx.storage.insert_protocol(&json!({"name": "MODBUS"})).await.unwrap();
        let err = generate(&fx.storage, &fx.config, &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Assembly);

        let after = std::fs::read_to_string(fx.config.output_dir.join("README.md")).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut fx = fixture(vec![]).await;
        fx.config.timeout_secs = 0;
        let err = generate(&fx.storage, &fx.config, &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Config);
    }

    #[tokio::test]
    async fn check_reports_every_problem() {
        let fx = fixture(vec![
            json!({"name": "Test"}),
            json!({"name": "test"}),
            json!({"alias": "nameless"}),
            json!({"name": "DNP3", "scapy": 7}),
        ])
        .await;

        let report = check(&fx.storage, &fx.config).await.unwrap();
        assert_eq!(report.stored, 4);
        assert_eq!(report.valid, 2);
        assert_eq!(report.schema_errors.len(), 2);
        assert!(matches!(
            report.assembly_error,
            Some(AssemblyError::AnchorCollision { .. })
        ));
        assert!(!report.is_clean());
        assert!(!fx.config.output_dir.exists());
    }

    #[tokio::test]
    async fn load_protocols_skips_bad_records() {
        let fx = fixture(vec![json!({"name": "Modbus"}), json!({"alias": "nameless"})]).await;
        let loaded = load_protocols(&fx.storage, &fx.config).await.unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records[0].name, "Modbus");
        assert_eq!(loaded.errors.len(), 1);
    }

    #[tokio::test]
    async fn timeout_maps_to_timeout_error() {
        let err = with_timeout("store query", 1, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            TurnipError::Timeout {
                stage: "store query",
                secs: 1
            }
        ));
    }

    #[tokio::test]
    async fn publish_deadline_keeps_previous_output() {
        let fx = fixture(vec![json!({"name": "Modbus"})]).await;
        generate(&fx.storage, &fx.config, &SilentProgress).await.unwrap();
        let out = &fx.config.output_dir;
        let before = std::fs::read_to_string(out.join("README.md")).unwrap();

        let mut documents = vec![Document::new("README.md", "# Replaced\n")];
        documents.extend(
            (0..2000).map(|i| Document::new(format!("protocols/p{i}.md"), format!("## P{i}\n"))),
        );
        let err = publish_within(out, Duration::ZERO, documents, 2001)
            .await
            .unwrap_err();
        assert!(
            matches!(err, TurnipError::Timeout { stage: "publish", .. }),
            "unexpected error: {err}"
        );
        assert_eq!(err.category(), ErrorCategory::Io);
        assert_eq!(std::fs::read_to_string(out.join("README.md")).unwrap(), before);

        // The abandoned staging task cleans up after itself once it finishes.
        let staging_left = || {
            std::fs::read_dir(out)
                .unwrap()
                .filter_map(|e| e.ok())
                .any(|e| e.file_name().to_string_lossy().starts_with(".turnip-staging-"))
        };
        for _ in 0..200 {
            if !staging_left() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!staging_left());
        assert!(!out.join("protocols").exists());
        assert_eq!(read_manifest(out).unwrap().unwrap().protocol_count, 1);
    }
}
