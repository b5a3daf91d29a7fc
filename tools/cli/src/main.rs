//! ossportable CLI - Command line interface for multi-provider object storage.
//!
//! Manages saved bucket connections and runs object operations against
//! any of the supported providers through the portal API server.

mod ui;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ossportable_app::{ConfirmationGate, ConnectionStore, ToastQueue};
use ossportable_common::{ConnectionId, Credentials, Provider};
use ossportable_storage::{
    BucketEntry, BucketTarget, ClientConfig, Connection, ConnectionForm, HttpStorageClient,
    MetadataPatch, UploadFile,
};

use crate::ui::{spawn_prompter, ToastRenderer};

#[derive(Parser)]
#[command(name = "ossportable")]
#[command(about = "ossportable - One client for GCS, S3, OBS, OSS and Azure Blob")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: <config dir>/ossportable/config.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// API server address; overrides the config file.
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Answer "yes" to every confirmation.
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Which bucket an object command addresses.
#[derive(Args)]
struct BucketArgs {
    /// Provider: gcp, aws, huawei, alibaba or azure.
    #[arg(short, long)]
    provider: Option<Provider>,

    /// Saved connection id to take bucket and credentials from.
    #[arg(short, long, conflicts_with_all = ["bucket", "credentials"])]
    connection: Option<ConnectionId>,

    /// Bucket name.
    #[arg(short, long, requires = "credentials")]
    bucket: Option<String>,

    /// Credential blob, or @FILE to read it from a file.
    #[arg(long)]
    credentials: Option<String>,
}

/// Fields of a connection form.
#[derive(Args)]
struct FormArgs {
    /// Display name.
    #[arg(short, long)]
    name: String,

    /// Bucket name.
    #[arg(short, long)]
    bucket: String,

    /// Credential blob, or @FILE to read it from a file.
    #[arg(long)]
    credentials: String,

    /// Extra provider-specific field (repeatable).
    #[arg(long = "field", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    fields: Vec<(String, String)>,
}

#[derive(Subcommand)]
enum Commands {
    /// List saved connections of every provider.
    Connections {
        /// Print as JSON (credentials omitted).
        #[arg(long)]
        json: bool,
    },

    /// Check bucket credentials without saving them.
    Test {
        #[arg(short, long)]
        provider: Provider,

        #[arg(short, long)]
        bucket: String,

        /// Credential blob, or @FILE.
        #[arg(long)]
        credentials: String,
    },

    /// Save a new connection.
    Add {
        #[arg(short, long)]
        provider: Provider,

        #[command(flatten)]
        form: FormArgs,
    },

    /// Replace a saved connection's fields.
    Update {
        #[arg(short, long)]
        provider: Provider,

        /// Connection id.
        id: ConnectionId,

        #[command(flatten)]
        form: FormArgs,
    },

    /// Delete a saved connection.
    Remove {
        #[arg(short, long)]
        provider: Provider,

        /// Connection id.
        id: ConnectionId,
    },

    /// List folders and objects under a prefix.
    Browse {
        #[command(flatten)]
        bucket: BucketArgs,

        /// Prefix to list (e.g., "photos/2024/").
        #[arg(default_value = "")]
        prefix: String,

        /// Continue a previous listing.
        #[arg(long, conflicts_with = "all")]
        page_token: Option<String>,

        /// Follow page tokens to the end of the listing.
        #[arg(long)]
        all: bool,
    },

    /// Print a time-limited download URL.
    Url {
        #[command(flatten)]
        bucket: BucketArgs,

        object: String,
    },

    /// Delete an object.
    Delete {
        #[command(flatten)]
        bucket: BucketArgs,

        object: String,
    },

    /// Copy an object within its bucket.
    Copy {
        #[command(flatten)]
        bucket: BucketArgs,

        source: String,

        destination: String,
    },

    /// Move (copy, then delete) an object within its bucket.
    Move {
        #[command(flatten)]
        bucket: BucketArgs,

        source: String,

        destination: String,
    },

    /// Upload local files under a prefix.
    Upload {
        #[command(flatten)]
        bucket: BucketArgs,

        /// Key prefix for the uploaded files.
        #[arg(long, default_value = "")]
        prefix: String,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show object count and total size.
    Stats {
        #[command(flatten)]
        bucket: BucketArgs,
    },

    /// Read or change object metadata.
    Meta {
        #[command(subcommand)]
        command: MetaCommands,
    },

    /// Flat object listing (single page, possibly truncated).
    Objects {
        #[command(flatten)]
        bucket: BucketArgs,
    },

    /// Generate shell completions.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum MetaCommands {
    /// Print an object's metadata.
    Get {
        #[command(flatten)]
        bucket: BucketArgs,

        object: String,
    },

    /// Patch an object's metadata; unspecified fields are left alone.
    Set {
        #[command(flatten)]
        bucket: BucketArgs,

        object: String,

        #[arg(long)]
        content_type: Option<String>,

        #[arg(long)]
        cache_control: Option<String>,

        /// User metadata entry; replaces the whole user map (repeatable).
        #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        metadata: Vec<(String, String)>,

        /// Replace the user map with an empty one.
        #[arg(long, conflicts_with = "metadata")]
        clear_metadata: bool,
    },
}

fn parse_key_val(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "ossportable", &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(cli.config.as_deref(), cli.base_url.as_deref())?;
    info!("Using API server {}", config.base_url);
    let client = HttpStorageClient::new(&config).context("Failed to create storage client")?;

    let toasts = ToastQueue::global().clone();
    let gate = ConfirmationGate::global().clone();
    let renderer = ToastRenderer::spawn(&toasts);
    let prompter = spawn_prompter(gate.clone(), cli.yes);

    let app = App {
        store: ConnectionStore::new(Arc::new(client)),
        toasts: toasts.clone(),
        gate,
    };
    let outcome = app.run(cli.command).await;
    prompter.abort();

    let code = match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            toasts.error(format!("{:#}", e));
            ExitCode::FAILURE
        }
    };
    renderer.finish(&toasts);
    Ok(code)
}

/// Flag, then explicit file, then the default file if present, then defaults.
fn load_config(path: Option<&Path>, base_url: Option<&str>) -> Result<ClientConfig> {
    let mut config = match path {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => match ClientConfig::default_path().filter(|p| p.exists()) {
            Some(path) => ClientConfig::load(&path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ClientConfig::default(),
        },
    };

    if let Some(base_url) = base_url {
        config.base_url = ClientConfig::with_base_url(base_url)?.base_url;
    }
    Ok(config)
}

/// Literal credentials, or the contents of the file after `@`.
fn read_credentials(raw: &str) -> Result<Credentials> {
    match raw.strip_prefix('@') {
        Some(path) => {
            let blob = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read credentials from {}", path))?;
            Ok(Credentials::new(blob.trim_end()))
        }
        None => Ok(Credentials::new(raw)),
    }
}

fn build_form(args: FormArgs) -> Result<ConnectionForm> {
    let credentials = read_credentials(&args.credentials)?;
    Ok(args
        .fields
        .into_iter()
        .fold(ConnectionForm::new(args.name, args.bucket, credentials), |form, (k, v)| {
            form.with_field(k, v)
        }))
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

struct App {
    store: ConnectionStore,
    toasts: ToastQueue,
    gate: ConfirmationGate,
}

impl App {
    async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Connections { json } => self.cmd_connections(json).await,

            Commands::Test {
                provider,
                bucket,
                credentials,
            } => self.cmd_test(provider, &bucket, &credentials).await,

            Commands::Add { provider, form } => self.cmd_add(provider, form).await,

            Commands::Update { provider, id, form } => self.cmd_update(provider, &id, form).await,

            Commands::Remove { provider, id } => self.cmd_remove(provider, &id).await,

            Commands::Browse {
                bucket,
                prefix,
                page_token,
                all,
            } => self.cmd_browse(bucket, &prefix, page_token, all).await,

            Commands::Url { bucket, object } => self.cmd_url(bucket, &object).await,

            Commands::Delete { bucket, object } => self.cmd_delete(bucket, &object).await,

            Commands::Copy {
                bucket,
                source,
                destination,
            } => self.cmd_copy(bucket, &source, &destination, false).await,

            Commands::Move {
                bucket,
                source,
                destination,
            } => self.cmd_copy(bucket, &source, &destination, true).await,

            Commands::Upload {
                bucket,
                prefix,
                files,
            } => self.cmd_upload(bucket, &prefix, &files).await,

            Commands::Stats { bucket } => self.cmd_stats(bucket).await,

            Commands::Meta { command } => match command {
                MetaCommands::Get { bucket, object } => self.cmd_meta_get(bucket, &object).await,
                MetaCommands::Set {
                    bucket,
                    object,
                    content_type,
                    cache_control,
                    metadata,
                    clear_metadata,
                } => {
                    let mut patch = MetadataPatch {
                        content_type,
                        cache_control,
                        metadata: None,
                    };
                    if clear_metadata || !metadata.is_empty() {
                        patch.metadata = Some(metadata.into_iter().collect::<BTreeMap<_, _>>());
                    }
                    self.cmd_meta_set(bucket, &object, patch).await
                }
            },

            Commands::Objects { bucket } => self.cmd_objects(bucket).await,

            Commands::Completions { .. } => Ok(()),
        }
    }

    /// Fetch connections, failing only if the whole fetch failed.
    async fn load_connections(&self) -> Result<Vec<Connection>> {
        self.store.fetch_connections().await;
        let state = self.store.snapshot();
        if !state.error.is_empty() {
            anyhow::bail!("{}", state.error);
        }
        Ok(state.connections)
    }

    /// Resolve `--connection` or `--provider/--bucket/--credentials`.
    async fn resolve_target(&self, args: BucketArgs) -> Result<BucketTarget> {
        if let Some(id) = args.connection {
            self.load_connections().await?;
            let connection = self
                .store
                .find(args.provider, &id)
                .with_context(|| format!("No saved connection with id {}", id))?;
            return connection
                .target()
                .with_context(|| format!("Connection {} has no bucket or credentials", id));
        }

        let provider = args
            .provider
            .context("--provider is required unless --connection is given")?;
        let bucket = args
            .bucket
            .context("--bucket is required unless --connection is given")?;
        let credentials = args
            .credentials
            .context("--credentials is required unless --connection is given")?;
        Ok(BucketTarget::new(provider, bucket, read_credentials(&credentials)?))
    }

    /// Report the store's outcome of a connection operation.
    fn report_store_outcome(&self, succeeded: bool) -> Result<()> {
        let state = self.store.snapshot();
        if !succeeded || !state.error.is_empty() {
            anyhow::bail!("{}", state.error);
        }
        if !state.notice.is_empty() {
            self.toasts.success(state.notice);
        }
        Ok(())
    }

    async fn cmd_connections(&self, json: bool) -> Result<()> {
        let connections = self.load_connections().await?;

        if json {
            let redacted: Vec<_> = connections
                .into_iter()
                .map(|mut c| {
                    c.fields.remove("credentials");
                    c
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&redacted)?);
            return Ok(());
        }

        if connections.is_empty() {
            println!("No saved connections.");
            return Ok(());
        }

        println!("{:<8} {:<10} {:<24} BUCKET", "PROVIDER", "ID", "NAME");
        for c in &connections {
            println!(
                "{:<8} {:<10} {:<24} {}",
                c.provider.as_str(),
                c.id.as_ref().map(|id| id.to_string()).unwrap_or_default(),
                c.name().unwrap_or("-"),
                c.bucket().unwrap_or("-")
            );
        }
        Ok(())
    }

    async fn cmd_test(&self, provider: Provider, bucket: &str, credentials: &str) -> Result<()> {
        let credentials = read_credentials(credentials)?;
        self.store.test_connection(provider, bucket, &credentials).await;
        self.report_store_outcome(true)
    }

    async fn cmd_add(&self, provider: Provider, form: FormArgs) -> Result<()> {
        let form = build_form(form)?;
        let saved = self.store.save_connection(provider, &form).await;
        self.report_store_outcome(saved)
    }

    async fn cmd_update(&self, provider: Provider, id: &ConnectionId, form: FormArgs) -> Result<()> {
        let form = build_form(form)?;
        let updated = self.store.update_connection(provider, id, &form).await;
        self.report_store_outcome(updated)
    }

    async fn cmd_remove(&self, provider: Provider, id: &ConnectionId) -> Result<()> {
        let confirmed = self
            .gate
            .confirm(
                format!("Remove {} connection {}?", provider.label(), id),
                Some("Remove connection"),
            )
            .await;
        if !confirmed {
            self.toasts.info("Cancelled");
            return Ok(());
        }

        self.store.remove_connection(provider, id).await;
        let state = self.store.snapshot();
        if !state.error.is_empty() {
            anyhow::bail!("{}", state.error);
        }
        self.toasts.success("Connection removed");
        Ok(())
    }

    async fn cmd_browse(
        &self,
        bucket: BucketArgs,
        prefix: &str,
        page_token: Option<String>,
        all: bool,
    ) -> Result<()> {
        let target = self.resolve_target(bucket).await?;
        let api = self.store.api();

        let (entries, next_page_token) = if all {
            (api.browse_all(&target, prefix).await.context("Browse failed")?, None)
        } else {
            let page = api
                .browse_objects(&target, prefix, page_token.as_deref())
                .await
                .context("Browse failed")?;
            (page.entries, page.next_page_token)
        };

        if entries.is_empty() {
            println!("Nothing under '{}'.", prefix);
        }
        for entry in &entries {
            match entry {
                BucketEntry::Dir { display, .. } => println!("  [DIR]  {}/", display),
                BucketEntry::File {
                    display,
                    size,
                    updated,
                    ..
                } => {
                    let when = updated
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_default();
                    println!("  [FILE] {} ({}) {}", display, format_size(*size), when);
                }
            }
        }
        if let Some(token) = next_page_token {
            println!("\nMore entries: --page-token {}", token);
        }
        Ok(())
    }

    async fn cmd_url(&self, bucket: BucketArgs, object: &str) -> Result<()> {
        let target = self.resolve_target(bucket).await?;
        let url = self
            .store
            .api()
            .get_download_url(&target, object)
            .await
            .context("Failed to get download URL")?;
        println!("{}", url);
        Ok(())
    }

    async fn cmd_delete(&self, bucket: BucketArgs, object: &str) -> Result<()> {
        let target = self.resolve_target(bucket).await?;
        let confirmed = self
            .gate
            .confirm(
                format!("Delete {} from {}?", object, target.bucket),
                Some("Delete object"),
            )
            .await;
        if !confirmed {
            self.toasts.info("Cancelled");
            return Ok(());
        }

        self.store
            .api()
            .delete_object(&target, object)
            .await
            .context("Delete failed")?;
        self.toasts.success(format!("Deleted {}", object));
        Ok(())
    }

    async fn cmd_copy(
        &self,
        bucket: BucketArgs,
        source: &str,
        destination: &str,
        delete_source: bool,
    ) -> Result<()> {
        let target = self.resolve_target(bucket).await?;
        let api = self.store.api();

        if delete_source {
            let confirmed = self
                .gate
                .confirm(
                    format!("Move {} to {}?", source, destination),
                    Some("Move object"),
                )
                .await;
            if !confirmed {
                self.toasts.info("Cancelled");
                return Ok(());
            }
            api.move_object(&target, source, destination)
                .await
                .context("Move failed; the copy may already exist")?;
            self.toasts.success(format!("Moved {} to {}", source, destination));
        } else {
            api.copy_object(&target, source, destination, false)
                .await
                .context("Copy failed")?;
            self.toasts.success(format!("Copied {} to {}", source, destination));
        }
        Ok(())
    }

    async fn cmd_upload(&self, bucket: BucketArgs, prefix: &str, files: &[PathBuf]) -> Result<()> {
        let target = self.resolve_target(bucket).await?;

        let mut uploads = Vec::with_capacity(files.len());
        for path in files {
            let file = UploadFile::from_path(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            debug!(name = %file.name, size = file.data.len(), "queued upload");
            uploads.push(file);
        }
        let count = uploads.len();

        self.store
            .api()
            .upload_objects(&target, prefix, uploads)
            .await
            .context("Upload failed; some files may have been stored, browse the prefix to check")?;
        self.toasts.success(format!(
            "Uploaded {} file(s) to {}/{}",
            count, target.bucket, prefix
        ));
        Ok(())
    }

    async fn cmd_stats(&self, bucket: BucketArgs) -> Result<()> {
        let target = self.resolve_target(bucket).await?;
        let stats = self
            .store
            .api()
            .get_bucket_stats(&target)
            .await
            .context("Failed to get bucket stats")?;

        let bound = if stats.truncated { "at least " } else { "" };
        println!("Bucket: {}", target.bucket);
        println!("  Objects: {}{}", bound, stats.object_count);
        println!("  Size: {}{}", bound, format_size(stats.total_size));
        Ok(())
    }

    async fn cmd_meta_get(&self, bucket: BucketArgs, object: &str) -> Result<()> {
        let target = self.resolve_target(bucket).await?;
        let meta = self
            .store
            .api()
            .get_object_metadata(&target, object)
            .await
            .context("Failed to get metadata")?;

        println!("Object: {}", object);
        println!("  Content-Type: {}", meta.content_type);
        println!("  Cache-Control: {}", meta.cache_control);
        println!("  Size: {}", format_size(meta.size));
        if let Some(updated) = meta.updated {
            println!("  Updated: {}", updated.to_rfc3339());
        }
        println!("  ETag: {}", meta.etag);
        if let Some(md5) = &meta.md5 {
            println!("  MD5: {}", md5);
        }
        for (key, value) in &meta.metadata {
            println!("  {}: {}", key, value);
        }
        Ok(())
    }

    async fn cmd_meta_set(&self, bucket: BucketArgs, object: &str, patch: MetadataPatch) -> Result<()> {
        if patch.is_empty() {
            anyhow::bail!("Nothing to update");
        }
        let target = self.resolve_target(bucket).await?;
        self.store
            .api()
            .update_object_metadata(&target, object, &patch)
            .await
            .context("Failed to update metadata")?;
        self.toasts.success(format!("Metadata of {} updated", object));
        Ok(())
    }

    async fn cmd_objects(&self, bucket: BucketArgs) -> Result<()> {
        let target = self.resolve_target(bucket).await?;
        let listing = self
            .store
            .api()
            .list_objects(&target)
            .await
            .context("Failed to list objects")?;

        for object in &listing.objects {
            println!("{:>10}  {}", format_size(object.size), object.name);
        }
        if listing.truncated {
            println!("\n(listing truncated after {} objects)", listing.objects.len());
        }
        Ok(())
    }
}
