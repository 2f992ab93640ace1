//! CLI command definitions, routing, and tracing setup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use tracing::{info, warn};

use turnip_core::{GenerateResult, ProgressReporter, find_protocol};
use turnip_shared::{
    AppConfig, GenerateConfig, GenerationMode, RawRecord, init_config, load_config,
    load_config_from,
};
use turnip_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Turn/IP: a catalog of industrial network protocols.
#[derive(Parser)]
#[command(
    name = "turnip",
    version,
    about = "Generate the Turn/IP industrial protocol catalog from the record store.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.turnip/turnip.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Record store location, shared by every store-backed command.
#[derive(clap::Args)]
pub(crate) struct StoreArgs {
    /// Record store database file.
    #[arg(long, env = "TURNIP_DB")]
    pub db: Option<PathBuf>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Generate and publish the catalog.
    Generate {
        #[command(flatten)]
        store: StoreArgs,

        /// Output directory.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Error handling: strict or lenient.
        #[arg(short, long)]
        mode: Option<GenerationMode>,

        /// Also write one document per protocol.
        #[arg(long)]
        per_protocol: bool,

        /// Deadline in seconds for the store query and for staging.
        #[arg(long)]
        timeout: Option<u64>,

        /// Title of the index document.
        #[arg(long)]
        title: Option<String>,

        /// Leave out the resources section.
        #[arg(long)]
        no_resources: bool,
    },

    /// Report every schema and anchor problem without publishing.
    Check {
        #[command(flatten)]
        store: StoreArgs,
    },

    /// List protocol names in store order.
    List {
        #[command(flatten)]
        store: StoreArgs,
    },

    /// Print the rendered block of one protocol, looked up by name or alias.
    Show {
        /// Name, alias, or unique part of one.
        query: String,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Load protocols and resources from a JSON file into the store.
    Import {
        /// JSON file: `{ "protocols": [...], "resources": [...] }`.
        file: PathBuf,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "turnip=info",
        1 => "turnip=debug",
        _ => "turnip=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Generate {
            store,
            out,
            mode,
            per_protocol,
            timeout,
            title,
            no_resources,
        } => {
            let mut config = resolve(config_path, &store)?;
            if let Some(out) = out {
                config.output_dir = out;
            }
            if let Some(mode) = mode {
                config.mode = mode;
            }
            if per_protocol {
                config.per_protocol = true;
            }
            if let Some(secs) = timeout {
                config.timeout_secs = secs;
            }
            if let Some(title) = title {
                config.title = title;
            }
            if no_resources {
                config.include_resources = false;
            }
            cmd_generate(&config).await
        }
        Command::Check { store } => cmd_check(&resolve(config_path, &store)?).await,
        Command::List { store } => cmd_list(&resolve(config_path, &store)?).await,
        Command::Show { query, store } => cmd_show(&resolve(config_path, &store)?, &query).await,
        Command::Import { file, store } => cmd_import(&resolve(config_path, &store)?, &file).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

/// Load the config file (explicit path or default location).
fn load_app_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

/// Merge config file values with the store flag into the runtime view.
fn resolve(config_path: Option<&Path>, store: &StoreArgs) -> Result<GenerateConfig> {
    let app = load_app_config(config_path)?;
    let mut config = GenerateConfig::from(&app);
    if let Some(db) = &store.db {
        config.store_path = db.clone();
    }
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_generate(config: &GenerateConfig) -> Result<()> {
    info!(
        store = %config.store_path.display(),
        out = %config.output_dir.display(),
        mode = %config.mode,
        "generating catalog"
    );

    let storage = Storage::open_readonly(&config.store_path).await?;
    let reporter = CliProgress::new();
    let result = turnip_core::generate(&storage, config, &reporter).await?;

    for err in &result.errors {
        eprintln!("  skipped: {err}");
    }

    // Print summary
    println!();
    println!("  Catalog published!");
    println!("  Protocols: {}", result.protocol_count);
    if result.page_count > 0 {
        println!("  Pages:     {}", result.page_count);
    }
    if !result.errors.is_empty() {
        println!("  Skipped:   {}", result.errors.len());
    }
    println!("  Index:     {}", result.index_path.display());
    println!("  Manifest:  {}", result.manifest_path.display());
    println!("  Time:      {:.1}s", result.elapsed.as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_check(config: &GenerateConfig) -> Result<()> {
    let storage = Storage::open_readonly(&config.store_path).await?;
    let report = turnip_core::check(&storage, config).await?;

    for err in &report.schema_errors {
        println!("  schema:   {err}");
    }
    if let Some(err) = &report.assembly_error {
        println!("  assembly: {err}");
    }
    println!(
        "  {} of {} stored protocols are valid",
        report.valid, report.stored
    );

    if report.is_clean() {
        Ok(())
    } else {
        let problems =
            report.schema_errors.len() + usize::from(report.assembly_error.is_some());
        Err(eyre!("{problems} problem(s) found in the record store"))
    }
}

async fn cmd_list(config: &GenerateConfig) -> Result<()> {
    let storage = Storage::open_readonly(&config.store_path).await?;
    for name in storage.protocol_names().await? {
        println!("{name}");
    }
    Ok(())
}

async fn cmd_show(config: &GenerateConfig, query: &str) -> Result<()> {
    let storage = Storage::open_readonly(&config.store_path).await?;
    let loaded = turnip_core::load_protocols(&storage, config).await?;
    if !loaded.errors.is_empty() {
        warn!(
            skipped = loaded.errors.len(),
            "some stored protocols are invalid and were not searched"
        );
    }

    let record = find_protocol(&loaded.records, query)?;
    println!("{}", turnip_markdown::render_protocol(record));
    Ok(())
}

/// Import file layout.
#[derive(Debug, Default, Deserialize)]
struct ImportFile {
    #[serde(default)]
    protocols: Vec<serde_json::Value>,
    #[serde(default)]
    resources: Vec<serde_json::Value>,
}

async fn cmd_import(config: &GenerateConfig, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .map_err(|e| eyre!("cannot read '{}': {e}", file.display()))?;
    let import: ImportFile = serde_json::from_str(&content)
        .map_err(|e| eyre!("invalid import file '{}': {e}", file.display()))?;

    let storage = Storage::open(&config.store_path).await?;

    // Names compare case-insensitively: case-only variants share an anchor.
    let mut taken: HashSet<String> = storage
        .protocol_names()
        .await?
        .iter()
        .map(|n| n.to_lowercase())
        .collect();

    // Validate everything before writing anything.
    let mut problems = Vec::new();
    for (i, doc) in import.protocols.iter().enumerate() {
        let raw = RawRecord::new(format!("protocols[{i}]"), doc.clone());
        match turnip_core::normalize(&raw) {
            Ok(record) => {
                if !taken.insert(record.name.to_lowercase()) {
                    problems.push(format!("protocol '{}' already exists", record.name));
                }
            }
            Err(e) => problems.push(e.to_string()),
        }
    }
    for (i, doc) in import.resources.iter().enumerate() {
        let raw = RawRecord::new(format!("resources[{i}]"), doc.clone());
        if let Err(e) = turnip_core::normalize_resource(&raw) {
            problems.push(e.to_string());
        }
    }

    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("  rejected: {problem}");
        }
        return Err(eyre!(
            "import aborted: {} invalid record(s), nothing was written",
            problems.len()
        ));
    }

    for doc in &import.protocols {
        storage.insert_protocol(doc).await?;
    }
    for doc in &import.resources {
        storage.insert_resource(doc).await?;
    }

    info!(
        protocols = import.protocols.len(),
        resources = import.resources.len(),
        store = %config.store_path.display(),
        "import complete"
    );
    println!(
        "Imported {} protocol(s) and {} resource(s) into {}",
        import.protocols.len(),
        import.resources.len(),
        config.store_path.display()
    );
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = load_app_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn done(&self, _result: &GenerateResult) {
        self.spinner.finish_and_clear();
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        // Failed runs never reach `done`.
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn generate_flags_parse() {
        let cli = Cli::try_parse_from([
            "turnip",
            "generate",
            "--db",
            "store.db",
            "--mode",
            "lenient",
            "--per-protocol",
            "--timeout",
            "5",
        ])
        .unwrap();

        match cli.command {
            Command::Generate {
                store,
                mode,
                per_protocol,
                timeout,
                ..
            } => {
                assert_eq!(store.db, Some(PathBuf::from("store.db")));
                assert_eq!(mode, Some(GenerationMode::Lenient));
                assert!(per_protocol);
                assert_eq!(timeout, Some(5));
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(Cli::try_parse_from(["turnip", "generate", "--mode", "loose"]).is_err());
    }

    #[test]
    fn import_file_defaults_missing_sections() {
        let import: ImportFile = serde_json::from_str(r#"{"protocols": [{"name": "Modbus"}]}"#).unwrap();
        assert_eq!(import.protocols.len(), 1);
        assert!(import.resources.is_empty());
    }
}
