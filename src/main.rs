//! # Commons Uploader CLI (`cup`)
//!
//! Search categories and entities, check target names, log in and upload
//! JPEG/PNG files in chunks to a MediaWiki media repository.
//!
//! ## Usage
//!
//! ```bash
//! cup --config ./config/cup.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cup categories <query>` | Category prefix search merged with `--select`ed names |
//! | `cup entities <query>` | Entity full-text search merged with `--select`ed ids |
//! | `cup exists <name>` | Whether `File:<name>` already exists |
//! | `cup login` | Verify credentials |
//! | `cup upload <path> --name <base>` | Chunked upload with categories and entities |
//!
//! ## Examples
//!
//! ```bash
//! # Categories starting with "Sunsets in", keeping one selected
//! cup categories "Sunsets in" --select "Le Morne Brabant"
//!
//! # Upload with metadata; the password comes from the environment
//! CUP_PASSWORD=... cup upload ./sunset.jpg --name "Sunset over Le Morne" \
//!     --category "Sunsets in Mauritius" --entity Q1160 --username "Alice@uploader"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, warn};

use commons_uploader::config::{self, Config};
use commons_uploader::exists::{FileExistsProbe, ProbeOutcome};
use commons_uploader::logging::{self, LogFormat, DEFAULT_LOG_LEVEL};
use commons_uploader::media::ImageFormat;
use commons_uploader::models::{CategoryRef, EntityRef, Selectable, UploadRequest};
use commons_uploader::progress::{ProgressEvent, ProgressMode};
use commons_uploader::search::{QueryOutcome, SearchCoordinator, SearchSnapshot};
use commons_uploader::session::Session;
use commons_uploader::traits::SearchSource;
use commons_uploader::upload::UploadOrchestrator;
use commons_uploader::wiki::{CategorySearch, EntitySearch, WikiApi};

/// Default config location, used only when it exists.
const DEFAULT_CONFIG_PATH: &str = "./config/cup.toml";

/// Commons Uploader CLI: search, then upload media files in chunks.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Without it, `./config/cup.toml` is read if present, otherwise the
/// built-in defaults apply.
#[derive(Parser)]
#[command(
    name = "cup",
    about = "Search categories and entities, then upload media files to a MediaWiki site",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level filter (overridden by `RUST_LOG`).
    #[arg(long, global = true, default_value = DEFAULT_LOG_LEVEL)]
    log_level: String,

    /// Log line format.
    #[arg(long, global = true, value_enum, default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Search categories by name prefix.
    ///
    /// Selected categories that are not among the hits are listed after
    /// them, marked `[x]`.
    Categories {
        query: String,

        /// Category names to keep selected.
        #[arg(long)]
        select: Vec<String>,
    },

    /// Search linked-data entities by full text.
    Entities {
        query: String,

        /// Entity page ids to keep selected.
        #[arg(long)]
        select: Vec<u64>,
    },

    /// Check whether a file page already exists.
    Exists {
        /// Full file name including extension, e.g. `Sunset.jpg`.
        name: String,
    },

    /// Log in and report the canonical user name.
    Login {
        #[command(flatten)]
        credentials: Credentials,
    },

    /// Upload a JPEG or PNG file.
    ///
    /// The file is logged in, checked for a name clash, stashed chunk by
    /// chunk, then published with its categories and depicted entities.
    Upload {
        path: PathBuf,

        /// Target file name without extension.
        #[arg(long)]
        name: String,

        /// Category to add (repeatable).
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Depicted entity, as `Q<number>` (repeatable).
        #[arg(long = "entity", value_parser = parse_entity)]
        entities: Vec<EntityRef>,

        /// Description placed in the information block.
        #[arg(long, default_value = "")]
        description: String,

        /// Upload even if a file with the same name exists.
        #[arg(long)]
        allow_overwrite: bool,

        /// Progress output on stderr. Defaults to `human` on a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        #[command(flatten)]
        credentials: Credentials,
    },
}

#[derive(clap::Args)]
struct Credentials {
    /// Account name; falls back to `auth.username` from the config.
    #[arg(long)]
    username: Option<String>,

    #[arg(long, env = "CUP_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

impl Credentials {
    fn resolve(&self, cfg: &Config) -> Result<(String, String)> {
        let username = self
            .username
            .clone()
            .or_else(|| cfg.auth.username.clone())
            .context("no username: pass --username or set auth.username")?;
        let password = self
            .password
            .clone()
            .context("no password: pass --password or set CUP_PASSWORD")?;
        Ok((username, password))
    }
}

/// Accepts `Q1160` or `1160`.
fn parse_entity(raw: &str) -> Result<EntityRef, String> {
    let digits = raw.strip_prefix(&['Q', 'q'][..]).unwrap_or(raw);
    let id: u64 = digits
        .parse()
        .map_err(|_| format!("'{}' is not an entity id like Q1160", raw))?;
    Ok(EntityRef::new(id, format!("Q{}", id), ""))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level, cli.log_format)?;
    let cfg = load(cli.config.as_deref())?;

    match cli.command {
        Commands::Categories { query, select } => {
            let api = Arc::new(WikiApi::new(&cfg.api)?);
            let source = CategorySearch::new(api, cfg.search.category_limit);
            let selected = select.into_iter().map(CategoryRef::new).collect();
            run_search(&cfg, source, &query, selected, |c: &CategoryRef| {
                c.name().to_string()
            })
            .await?;
        }
        Commands::Entities { query, select } => {
            let api = Arc::new(WikiApi::new(&cfg.api)?);
            let source = EntitySearch::new(api, cfg.search.entity_limit);
            let selected = select
                .into_iter()
                .map(|id| EntityRef::new(id, "", ""))
                .collect();
            run_search(&cfg, source, &query, selected, describe_entity).await?;
        }
        Commands::Exists { name } => {
            let api = WikiApi::new(&cfg.api)?;
            let probe = FileExistsProbe::new(api);
            match probe.check(&name).await? {
                ProbeOutcome::Answered { exists: true } => println!("{}: exists", name.trim()),
                ProbeOutcome::Answered { exists: false } => {
                    println!("{}: available", name.trim())
                }
                ProbeOutcome::Cleared | ProbeOutcome::Superseded => bail!("file name is empty"),
            }
        }
        Commands::Login { credentials } => {
            let (username, password) = credentials.resolve(&cfg)?;
            let session = Session::new(Arc::new(WikiApi::new(&cfg.api)?));
            let name = session.login(&username, &password).await?;
            println!("Logged in as {}", name);
        }
        Commands::Upload {
            path,
            name,
            categories,
            entities,
            description,
            allow_overwrite,
            progress,
            credentials,
        } => {
            let request = read_request(&path, &name)
                .await?
                .with_categories(categories.into_iter().map(CategoryRef::new).collect())
                .with_entities(entities)
                .with_description(description);
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            run_upload(&cfg, request, &credentials, allow_overwrite, mode).await?;
        }
    }

    Ok(())
}

/// Explicit `--config` must load; the default path is optional.
fn load(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => config::load_config(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            config::load_config(Path::new(DEFAULT_CONFIG_PATH))
        }
        None => {
            debug!("no config file, using defaults");
            Ok(Config::default())
        }
    }
}

async fn run_search<S: SearchSource>(
    cfg: &Config,
    source: S,
    query: &str,
    selected: Vec<S::Item>,
    describe: impl Fn(&S::Item) -> String,
) -> Result<()> {
    let coordinator = SearchCoordinator::new(source, cfg.search.min_query_chars);
    for item in selected {
        coordinator.toggle_selection(item);
    }

    let delay = Duration::from_millis(cfg.search.debounce_ms);
    if coordinator.set_query_debounced(query, delay).await? == QueryOutcome::Cleared {
        eprintln!(
            "Query shorter than {} characters; showing selection only.",
            cfg.search.min_query_chars
        );
    }

    print_snapshot(&coordinator.snapshot(), describe);
    Ok(())
}

fn print_snapshot<T: Selectable>(snapshot: &SearchSnapshot<T>, describe: impl Fn(&T) -> String) {
    if snapshot.display.is_empty() {
        println!("No results.");
        return;
    }
    for entry in &snapshot.display {
        let id = entry.item.id();
        let mark = if snapshot.selected.iter().any(|s| s.id() == id) {
            "[x]"
        } else {
            "[ ]"
        };
        println!("{} {}", mark, describe(&entry.item));
    }
}

fn describe_entity(entity: &EntityRef) -> String {
    if entity.description.is_empty() {
        entity.display_name().into_owned()
    } else {
        format!("{}: {}", entity.display_name(), entity.description)
    }
}

/// Read the file and validate it locally, before any network call.
async fn read_request(path: &Path, name: &str) -> Result<UploadRequest> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if bytes.is_empty() {
        bail!("{} is empty", path.display());
    }
    let format = ImageFormat::detect(&bytes);
    let request = UploadRequest::new(bytes, name, format);
    if request.target_filename().is_none() {
        if name.trim().is_empty() {
            bail!("--name must not be empty");
        }
        bail!("{} is not a JPEG or PNG image", path.display());
    }
    Ok(request)
}

async fn run_upload(
    cfg: &Config,
    request: UploadRequest,
    credentials: &Credentials,
    allow_overwrite: bool,
    mode: ProgressMode,
) -> Result<()> {
    let (username, password) = credentials.resolve(cfg)?;
    let filename = request
        .target_filename()
        .context("upload request has no valid target name")?;
    let total_bytes = request.payload.as_ref().map_or(0, Vec::len) as u64;

    let api = Arc::new(WikiApi::new(&cfg.api)?);
    let session = Session::new(api.clone());
    session.login(&username, &password).await?;
    if !session.upload_enabled() {
        bail!("upload is not enabled for this session");
    }

    if !allow_overwrite {
        let probe = FileExistsProbe::new(api.clone());
        if probe.check(&filename).await? == (ProbeOutcome::Answered { exists: true }) {
            bail!(
                "File:{} already exists; pick another --name or pass --allow-overwrite",
                filename
            );
        }
    }

    let uploader = UploadOrchestrator::new(api, session.tokens(), &cfg.upload);
    let mut updates = uploader.subscribe();
    let reporter = mode.reporter();
    let chunk_size = cfg.upload.chunk_size as u64;
    let label = filename.clone();
    let watcher = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let progress = updates.borrow_and_update().clone();
            reporter.report(&ProgressEvent {
                filename: &label,
                total_bytes,
                chunk_size,
                progress: &progress,
            });
            if progress.is_terminal() {
                break;
            }
        }
    });

    let result = uploader.start_upload(request).await;
    if let Err(err) = watcher.await {
        warn!(error = %err, "progress reporter stopped abnormally");
    }
    let published = result?;
    println!("Uploaded File:{}", published.filename);
    Ok(())
}
