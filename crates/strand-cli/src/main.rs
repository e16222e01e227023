//! Strand CLI - data-integration client
//!
//! Usage:
//!   strand init                          Write a starter strand.toml
//!   strand subscribe <job_id>            Follow a sync job's progress
//!   strand connect <short_name> ...      Connect a source into a collection
//!   strand oauth-callback <source> <code> Finish an OAuth connection
//!   strand collections list              List collections
//!   strand orgs switch <id>              Change the current organization

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strand_api::ApiClient;
use strand_core::{
    generate_readable_id, random_suffix, readable_id_base, validate_collection_details,
    AuthFieldValues, BrowserStorage, CollectionDetails, CreateApiKey,
    CreateOrganization, ReadableIdField, StrandConfig, SyncUpdate,
};
use strand_flow::{ConnectFlow, ConnectOutcome, ConnectRequest, FlowOptions, OAuthCallback};
use strand_stores::Stores;
use strand_sync::{ConnectionState, HttpSseConnector, SyncSubscription};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "strand")]
#[command(author, version, about = "Client for the Strand data-integration backend")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (defaults to ./strand.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default strand.toml
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Follow live progress of a sync job
    Subscribe {
        /// Sync job ID
        job_id: String,
    },

    /// Connect a source into a collection
    Connect {
        /// Source short name (e.g. notion, slack)
        short_name: String,

        /// Collection name
        #[arg(long)]
        collection: String,

        /// Collection readable ID (derived from the name when omitted)
        #[arg(long)]
        readable_id: Option<String>,

        /// Fail if the collection already exists
        #[arg(long)]
        new: bool,

        /// Auth field as key=value (repeatable)
        #[arg(short, long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,

        /// Source connection name
        #[arg(long)]
        name: Option<String>,

        /// Pasted token for local development
        #[arg(long)]
        local_token: Option<String>,

        /// Where to land after an OAuth round trip
        #[arg(long)]
        return_url: Option<String>,
    },

    /// Finish an OAuth connection with the code from the provider
    OauthCallback {
        /// Source short name
        short_name: String,

        /// Authorization code
        code: String,
    },

    /// Show the readable ID derived from a collection name
    ReadableId {
        /// Collection name
        name: String,

        /// Fixed suffix instead of a random one
        #[arg(long)]
        suffix: Option<String>,
    },

    /// Collection management
    Collections {
        #[command(subcommand)]
        action: CollectionCommands,
    },

    /// Source catalogue
    Sources {
        #[command(subcommand)]
        action: SourceCommands,
    },

    /// Source connection management
    Connections {
        #[command(subcommand)]
        action: ConnectionCommands,
    },

    /// List jobs for a sync
    Jobs {
        /// Sync ID
        sync_id: String,
    },

    /// Auth providers
    AuthProviders {
        #[command(subcommand)]
        action: AuthProviderCommands,
    },

    /// Organization management
    Orgs {
        #[command(subcommand)]
        action: OrgCommands,
    },

    /// API key management
    ApiKeys {
        #[command(subcommand)]
        action: ApiKeyCommands,
    },

    /// Usage limits
    Usage {
        #[command(subcommand)]
        action: UsageCommands,
    },
}

#[derive(Subcommand)]
enum CollectionCommands {
    /// List collections
    List,

    /// Create a collection
    Create {
        /// Collection name
        name: String,

        /// Readable ID (derived from the name when omitted)
        #[arg(long)]
        readable_id: Option<String>,
    },
}

#[derive(Subcommand)]
enum SourceCommands {
    /// List available sources
    List,

    /// Show a source's auth requirements
    Show {
        /// Source short name
        short_name: String,
    },
}

#[derive(Subcommand)]
enum ConnectionCommands {
    /// List source connections
    List {
        /// Only connections in this collection
        #[arg(long)]
        collection: Option<String>,
    },

    /// Trigger a sync run
    Run {
        /// Source connection ID
        id: String,

        /// Follow the job's progress
        #[arg(long)]
        follow: bool,
    },

    /// List sync jobs of a source connection
    Jobs {
        /// Source connection ID
        id: String,
    },
}

#[derive(Subcommand)]
enum AuthProviderCommands {
    /// List available auth providers
    List,

    /// List connected auth providers
    Connections,
}

#[derive(Subcommand)]
enum OrgCommands {
    /// List organizations
    List,

    /// Switch the current organization
    Switch {
        /// Organization ID
        id: String,
    },

    /// Create an organization and switch to it
    Create {
        /// Organization name
        name: String,

        /// Description
        #[arg(long)]
        description: Option<String>,
    },
}

#[derive(Subcommand)]
enum ApiKeyCommands {
    /// List API keys
    List,

    /// Create an API key
    Create {
        /// Days until expiry
        #[arg(long)]
        expiration_days: Option<u32>,
    },

    /// Delete an API key
    Delete {
        /// API key ID
        id: String,
    },
}

#[derive(Subcommand)]
enum UsageCommands {
    /// Check whether actions are allowed (name or name=amount)
    Check {
        #[arg(required = true)]
        actions: Vec<String>,
    },
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

fn parse_action(s: &str) -> Result<(String, u64)> {
    match s.split_once('=') {
        Some((name, amount)) => {
            let amount = amount
                .parse()
                .with_context(|| format!("Invalid amount in '{}'", s))?;
            Ok((name.to_string(), amount))
        }
        None => Ok((s.to_string(), 1)),
    }
}

/// Loaded configuration plus the clients built from it
struct Session {
    config: StrandConfig,
    api: ApiClient,
    storage: BrowserStorage,
}

impl Session {
    fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => StrandConfig::load(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => StrandConfig::load_or_default(Path::new("."))?,
        }
        .with_env();

        let api = ApiClient::from_config(&config).context("Failed to create API client")?;
        let storage = BrowserStorage::on_disk(&config.storage.dir);
        Ok(Self {
            config,
            api,
            storage,
        })
    }

    fn stores(&self) -> Stores {
        Stores::new(self.api.clone(), self.storage.clone(), &self.config.cache)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::Init { path } = &cli.command {
        return cmd_init(path);
    }
    if let Commands::ReadableId { name, suffix } = &cli.command {
        return cmd_readable_id(name, suffix.as_deref());
    }

    let ctx = Session::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Init { .. } | Commands::ReadableId { .. } => Ok(()),
        Commands::Subscribe { job_id } => cmd_subscribe(&ctx, &job_id).await,
        Commands::Connect {
            short_name,
            collection,
            readable_id,
            new,
            fields,
            name,
            local_token,
            return_url,
        } => {
            let mut id_field = ReadableIdField::new();
            id_field.set_name(collection);
            if let Some(id) = readable_id {
                id_field.set_readable_id(id);
            }

            let mut request = ConnectRequest::new(short_name, id_field.to_details()).new_collection(new);
            if !fields.is_empty() {
                let mut values = AuthFieldValues::new();
                for (key, value) in fields {
                    values.insert(key, value);
                }
                request = request.with_auth_fields(values);
            }
            if let Some(name) = name {
                request = request.with_connection_name(name);
            }
            if let Some(token) = local_token {
                request = request.with_local_token(token);
            }
            if let Some(url) = return_url {
                request = request.with_return_url(url);
            }
            cmd_connect(&ctx, request).await
        }
        Commands::OauthCallback { short_name, code } => cmd_oauth_callback(&ctx, &short_name, &code).await,
        Commands::Collections { action } => cmd_collections(&ctx, action).await,
        Commands::Sources { action } => cmd_sources(&ctx, action).await,
        Commands::Connections { action } => cmd_connections(&ctx, action).await,
        Commands::Jobs { sync_id } => cmd_jobs(&ctx, &sync_id).await,
        Commands::AuthProviders { action } => cmd_auth_providers(&ctx, action).await,
        Commands::Orgs { action } => cmd_orgs(&ctx, action).await,
        Commands::ApiKeys { action } => cmd_api_keys(&ctx, action).await,
        Commands::Usage { action } => cmd_usage(&ctx, action).await,
    }
}

fn cmd_init(path: &Path) -> Result<()> {
    info!("Initializing Strand in {:?}", path);

    let config_path = StrandConfig::write_default(path).context("Failed to write configuration")?;
    let storage_dir = path.join(&StrandConfig::default().storage.dir);
    std::fs::create_dir_all(&storage_dir)?;

    println!("Initialized Strand in {:?}", path);
    println!("Created:");
    println!("  {}", config_path.display());
    println!("  {}/", storage_dir.display());
    println!("\nEnvironment overrides: VITE_API_URL, VITE_ACCESS_TOKEN, VITE_LOCAL_DEVELOPMENT");
    Ok(())
}

fn cmd_readable_id(name: &str, suffix: Option<&str>) -> Result<()> {
    let suffix = suffix.map(str::to_string).unwrap_or_else(random_suffix);
    let id = generate_readable_id(name, &suffix);

    println!("Base:        {}", readable_id_base(name));
    println!("Readable ID: {}", id);

    let errors = validate_collection_details(&CollectionDetails::new(name).with_readable_id(id));
    for error in &errors {
        println!("  ! {}", error);
    }
    if !errors.is_empty() {
        bail!("Collection details are not valid");
    }
    Ok(())
}

async fn cmd_subscribe(ctx: &Session, job_id: &str) -> Result<()> {
    let connector = Arc::new(HttpSseConnector::new(ctx.api.clone()));
    let subscription = SyncSubscription::new(connector, &ctx.config.subscription);
    let mut changes = subscription.changes();

    println!("Following sync job {} (Ctrl-C to stop)", job_id);
    subscription.set_job(Some(job_id));

    let mut printed = 0u64;
    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                subscription.set_job(None);
                println!("Stopped");
                break;
            }
        }

        let total = subscription.total_received();
        if total > printed {
            let updates = subscription.updates();
            let fresh = ((total - printed) as usize).min(updates.len());
            for update in &updates[updates.len() - fresh..] {
                print_update(update);
            }
            printed = total;
        }

        match subscription.state() {
            ConnectionState::Closed { .. } => {
                println!("Stream closed after {} update(s)", total);
                break;
            }
            ConnectionState::Failed { reason, .. } => bail!("Subscription failed: {}", reason),
            _ => {}
        }
    }
    Ok(())
}

fn print_update(update: &SyncUpdate) {
    let counter = |value: Option<u64>| value.unwrap_or(0);
    print!(
        "inserted {:>6}  updated {:>6}  deleted {:>6}  kept {:>6}  skipped {:>6}",
        counter(update.inserted),
        counter(update.updated),
        counter(update.deleted),
        counter(update.kept),
        counter(update.skipped),
    );
    if update.is_complete {
        print!("  [complete]");
    }
    if update.is_failed {
        print!("  [failed: {}]", update.error.as_deref().unwrap_or("unknown error"));
    }
    println!();
}

async fn cmd_connect(ctx: &Session, request: ConnectRequest) -> Result<()> {
    let flow = ConnectFlow::new(
        ctx.api.clone(),
        ctx.storage.clone(),
        FlowOptions::from_config(&ctx.config),
    );

    match flow.run(&request).await {
        Ok(ConnectOutcome::OAuthRedirect { auth_url }) => {
            println!("Authorize {} in your browser:", request.source_short_name);
            println!("  {}", auth_url);
            println!(
                "\nThen run 'strand oauth-callback {} <code>'",
                request.source_short_name
            );
            Ok(())
        }
        Ok(ConnectOutcome::Connected {
            collection,
            source_connection,
        }) => {
            println!(
                "Connected {} into collection {} ({})",
                source_connection.short_name, collection.name, collection.readable_id
            );
            println!("  Source connection: {}", source_connection.id);
            if let Some(sync_id) = &source_connection.sync_id {
                println!("  Sync: {} (use 'strand jobs {}')", sync_id, sync_id);
            }
            Ok(())
        }
        Err(redirect) => {
            println!("Error page: {}", redirect.url);
            Err(redirect.into())
        }
    }
}

async fn cmd_oauth_callback(ctx: &Session, short_name: &str, code: &str) -> Result<()> {
    let callback = OAuthCallback::new(
        ctx.api.clone(),
        ctx.storage.clone(),
        FlowOptions::from_config(&ctx.config),
    );

    match callback.run(short_name, code).await {
        Ok(outcome) => {
            println!(
                "Connected {} into collection {} ({})",
                short_name, outcome.collection.name, outcome.collection.readable_id
            );
            println!("  Source connection: {}", outcome.source_connection.id);
            println!("  Continue at: {}", outcome.return_url);
            Ok(())
        }
        Err(redirect) => {
            println!("Error page: {}", redirect.url);
            Err(redirect.into())
        }
    }
}

async fn cmd_collections(ctx: &Session, action: CollectionCommands) -> Result<()> {
    match action {
        CollectionCommands::List => {
            let collections = ctx.api.list_collections().await?;
            println!("Collections ({})", collections.len());
            println!("==============");
            for collection in collections {
                println!(
                    "  {:<40} {} [{}]",
                    collection.readable_id,
                    collection.name,
                    collection.status.as_deref().unwrap_or("-")
                );
            }
        }
        CollectionCommands::Create { name, readable_id } => {
            let readable_id = readable_id.unwrap_or_else(|| generate_readable_id(&name, &random_suffix()));
            let details = CollectionDetails::new(name).with_readable_id(readable_id);

            let errors = validate_collection_details(&details);
            if !errors.is_empty() {
                for error in &errors {
                    println!("  ! {}", error);
                }
                bail!("Collection details are not valid");
            }

            let collection = ctx.api.create_collection(&details).await?;
            println!("Created collection {} ({})", collection.name, collection.readable_id);
        }
    }
    Ok(())
}

async fn cmd_sources(ctx: &Session, action: SourceCommands) -> Result<()> {
    match action {
        SourceCommands::List => {
            let sources = ctx.api.list_sources().await?;
            println!("Sources ({})", sources.len());
            println!("==========");
            for source in sources {
                println!(
                    "  {:<24} {:<28} {}",
                    source.short_name,
                    source.display_name(),
                    source.auth_type
                );
            }
        }
        SourceCommands::Show { short_name } => {
            let source = ctx.api.get_source(&short_name).await?;
            println!("{} ({})", source.display_name(), source.short_name);
            println!("  Auth: {}", source.auth_type);
            if let Some(description) = &source.description {
                println!("  {}", description);
            }
            if !source.fields().is_empty() {
                println!("  Fields:");
                for field in source.fields() {
                    let mut flags = Vec::new();
                    if field.required {
                        flags.push("required");
                    }
                    if field.secret {
                        flags.push("secret");
                    }
                    println!("    {:<24} {} {}", field.name, field.label(), flags.join(", "));
                }
            }
        }
    }
    Ok(())
}

async fn cmd_connections(ctx: &Session, action: ConnectionCommands) -> Result<()> {
    match action {
        ConnectionCommands::List { collection } => {
            let connections = ctx.api.list_source_connections(collection.as_deref()).await?;
            println!("Source connections ({})", connections.len());
            for connection in connections {
                println!(
                    "  {}  {:<16} {:<32} {}",
                    connection.id,
                    connection.short_name,
                    connection.name,
                    connection.status.as_deref().unwrap_or("-")
                );
            }
        }
        ConnectionCommands::Run { id, follow } => {
            let job = ctx.api.run_source_connection(&id).await?;
            println!("Started sync job {} ({})", job.id, job.status);
            if follow {
                cmd_subscribe(ctx, &job.id).await?;
            }
        }
        ConnectionCommands::Jobs { id } => {
            let jobs = ctx.api.source_connection_jobs(&id).await?;
            print_jobs(&jobs);
        }
    }
    Ok(())
}

async fn cmd_jobs(ctx: &Session, sync_id: &str) -> Result<()> {
    let jobs = ctx.api.sync_jobs(sync_id).await?;
    print_jobs(&jobs);
    Ok(())
}

fn print_jobs(jobs: &[strand_core::SyncJob]) {
    println!("Sync jobs ({})", jobs.len());
    for job in jobs {
        let started = job
            .started_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {}  {:<12} started {}  +{} ~{} -{}",
            job.id,
            job.status.to_string(),
            started,
            job.entities_inserted.unwrap_or(0),
            job.entities_updated.unwrap_or(0),
            job.entities_deleted.unwrap_or(0),
        );
        if let Some(error) = &job.error {
            println!("    error: {}", error);
        }
    }
}

async fn cmd_auth_providers(ctx: &Session, action: AuthProviderCommands) -> Result<()> {
    let stores = ctx.stores();
    match action {
        AuthProviderCommands::List => {
            let providers = stores.auth_providers.providers(false).await?;
            for provider in providers {
                let connected = stores.auth_providers.is_connected(&provider.short_name).await?;
                println!(
                    "  {:<20} {:<24} {}",
                    provider.short_name,
                    provider.name,
                    if connected { "connected" } else { "" }
                );
            }
        }
        AuthProviderCommands::Connections => {
            let connections = stores.auth_providers.connections(false).await?;
            for connection in connections {
                println!(
                    "  {:<32} {:<20} {}",
                    connection.readable_id, connection.short_name, connection.name
                );
            }
        }
    }
    Ok(())
}

async fn cmd_orgs(ctx: &Session, action: OrgCommands) -> Result<()> {
    let stores = ctx.stores();
    match action {
        OrgCommands::List => {
            let organizations = stores.organizations.organizations(false).await?;
            let current = stores.organizations.current_organization_id();
            for org in organizations {
                let marker = if current.as_deref() == Some(org.id.as_str()) { "*" } else { " " };
                println!(
                    "{} {}  {:<32} {}",
                    marker,
                    org.id,
                    org.name,
                    org.role.as_deref().unwrap_or("")
                );
            }
        }
        OrgCommands::Switch { id } => {
            let org = stores.organizations.switch_organization(&id).await?;
            println!("Switched to {} ({})", org.name, org.id);
        }
        OrgCommands::Create { name, description } => {
            let org = stores
                .organizations
                .create_organization(&CreateOrganization { name, description })
                .await?;
            println!("Created organization {} ({})", org.name, org.id);
        }
    }
    Ok(())
}

async fn cmd_api_keys(ctx: &Session, action: ApiKeyCommands) -> Result<()> {
    match action {
        ApiKeyCommands::List => {
            let keys = ctx.api.list_api_keys().await?;
            for key in keys {
                let expires = key
                    .expiration_date
                    .map(|t| t.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!("  {}  expires {}", key.id, expires);
            }
        }
        ApiKeyCommands::Create { expiration_days } => {
            let key = ctx.api.create_api_key(&CreateApiKey { expiration_days }).await?;
            println!("Created API key {}", key.id);
            if let Some(secret) = &key.decrypted_key {
                println!("  {}", secret);
                println!("Store it now; it will not be shown again.");
            }
        }
        ApiKeyCommands::Delete { id } => {
            ctx.api.delete_api_key(&id).await?;
            println!("Deleted API key {}", id);
        }
    }
    Ok(())
}

async fn cmd_usage(ctx: &Session, action: UsageCommands) -> Result<()> {
    match action {
        UsageCommands::Check { actions } => {
            let actions = actions
                .iter()
                .map(|a| parse_action(a))
                .collect::<Result<BTreeMap<String, u64>>>()?;

            let stores = ctx.stores();
            let response = stores.usage.check_actions(&actions).await?;
            for name in actions.keys() {
                match response.results.get(name) {
                    Some(check) if check.allowed => println!("  {:<24} allowed", name),
                    Some(check) => println!(
                        "  {:<24} blocked ({})",
                        name,
                        check.reason.as_deref().unwrap_or("no reason given")
                    ),
                    None => println!("  {:<24} not reported", name),
                }
            }
        }
    }
    Ok(())
}
