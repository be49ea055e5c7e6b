// ============================================================================
// setkeeper - command-line front end for Destiny 2 collection tracking
// ============================================================================
// Usage:
//   setkeeper login                      Sign in with Bungie.net
//   setkeeper profiles                   Fetch and list every profile
//   setkeeper search "is:exotic is:kinetic"
//   setkeeper sets /curse-of-osiris      Show a set page with owned markers
//   setkeeper watch --track 1345867570   Refresh every 30s while tracking
//   setkeeper cache stats                Show local store statistics
// ============================================================================

use anyhow::{anyhow, Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};

use setkeeper_core::dashboard::should_poll;
use setkeeper_core::sets::{apply_filters, page_for_path, resolve};
use setkeeper_core::{
    fancy_search, fancy_search_terms, AppConfig, BungieOAuth, CloudStorage, Dashboard,
    DestinyClient, DriveStorage, Language, LocalStore, Membership, StoredTokenProvider,
    Telemetry, FETCH_INTERVAL, PAGES,
};

#[derive(Parser)]
#[command(name = "setkeeper", version, about = "Track your Destiny 2 collection from the terminal")]
struct Cli {
    /// Path to the database file (default: ~/.setkeeper/setkeeper.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with Bungie.net in the browser
    Login,

    /// Forget tokens, profiles and settings
    Logout,

    /// Fetch every profile of the signed-in user
    Profiles,

    /// Select another profile for future commands
    Switch {
        #[arg(long = "type")]
        membership_type: i32,
        #[arg(long = "id")]
        membership_id: String,
    },

    /// Search the item catalog
    Search {
        query: String,
        /// Print at most this many items
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// List the registered search terms
    Terms,

    /// Show filters, or toggle one
    Filters {
        #[arg(long)]
        toggle: Option<String>,
    },

    /// Set the definition language (manifest locale code)
    Language {
        code: String,
        #[arg(long)]
        name: Option<String>,
    },

    /// Show Xûr's current stock
    Xur {
        /// Show stock even when Xûr is not around
        #[arg(long)]
        force: bool,
    },

    /// Show a set page
    Sets {
        #[arg(default_value = "/")]
        path: String,
    },

    /// Show the selected profile's inventory
    Inventory,

    /// Refresh periodically while items are tracked
    Watch {
        #[arg(long, value_delimiter = ',')]
        track: Vec<u32>,
    },

    /// Inspect or clear the local store
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show row counts
    Stats,
    /// Clear everything except manifest tables
    Clear,
}

/// Everything a command may need, built once from config
struct App {
    config: AppConfig,
    store: Arc<LocalStore>,
    client: Arc<DestinyClient>,
}

impl App {
    fn new(config: AppConfig, db_path: Option<String>) -> Result<Self> {
        let db_path = db_path.or_else(|| config.db_path.clone());
        let store = Arc::new(LocalStore::open(db_path.as_deref())?);

        let telemetry = Arc::new(Telemetry::new(
            config.stats_url.clone(),
            !config.prevent_stats,
            Some(store.clone()),
        ));
        let tokens = Arc::new(StoredTokenProvider::new(store.clone(), oauth(&config)));
        let client = DestinyClient::with_base_url(
            config.api_base.clone(),
            config.api_key.clone().unwrap_or_default(),
            tokens,
            telemetry,
        )
        .with_store(store.clone());

        Ok(Self {
            config,
            store,
            client: Arc::new(client),
        })
    }

    fn require_api_key(&self) -> Result<()> {
        if self.config.api_key.is_none() {
            anyhow::bail!("SETKEEPER_API_KEY is not set");
        }
        Ok(())
    }

    fn dashboard(&self) -> Dashboard {
        let cloud = self.config.drive_token.clone().map(|token| {
            Arc::new(DriveStorage::with_base_url(self.config.drive_base.clone(), token))
                as Arc<dyn CloudStorage>
        });
        Dashboard::new(self.client.clone(), self.store.clone(), cloud)
    }

    fn language(&self) -> Language {
        match self.store.get_language() {
            Ok(Some(language)) => language,
            _ => self.config.language.clone().unwrap_or_default(),
        }
    }
}

fn oauth(config: &AppConfig) -> Option<BungieOAuth> {
    config.client_id.clone().map(|client_id| {
        BungieOAuth::with_base_url(
            client_id,
            config.client_secret.clone(),
            config.api_base.clone(),
        )
    })
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts))
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("setkeeper=info".parse()?)
                .add_directive("setkeeper_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let app = App::new(AppConfig::from_env(), cli.db_path)?;

    match cli.command {
        Commands::Login => cmd_login(&app).await,
        Commands::Logout => cmd_logout(&app),
        Commands::Profiles => cmd_profiles(&app).await,
        Commands::Switch {
            membership_type,
            membership_id,
        } => cmd_switch(&app, Membership::new(membership_type, membership_id)).await,
        Commands::Search { query, limit } => cmd_search(&app, &query, limit).await,
        Commands::Terms => cmd_terms(),
        Commands::Filters { toggle } => cmd_filters(&app, toggle),
        Commands::Language { code, name } => cmd_language(&app, code, name),
        Commands::Xur { force } => cmd_xur(&app, force).await,
        Commands::Sets { path } => cmd_sets(&app, &path).await,
        Commands::Inventory => cmd_inventory(&app).await,
        Commands::Watch { track } => cmd_watch(&app, &track).await,
        Commands::Cache { command } => match command {
            CacheCommands::Stats => cmd_cache_stats(&app),
            CacheCommands::Clear => cmd_cache_clear(&app),
        },
    }
}

async fn cmd_login(app: &App) -> Result<()> {
    let oauth = oauth(&app.config).ok_or_else(|| anyhow!("SETKEEPER_CLIENT_ID is not set"))?;
    let (url, state) = oauth.get_auth_url();

    println!("Opening browser to sign in with Bungie.net...");
    println!("If nothing opens, visit:\n  {}", url);
    if let Err(e) = open::that(&url) {
        warn!("Could not open browser: {}", e);
    }

    let code = tokio::task::spawn_blocking(move || BungieOAuth::wait_for_callback(&state))
        .await
        .map_err(|e| anyhow!("Callback listener failed: {}", e))??;

    let tokens = oauth.exchange_code(&code).await?;
    app.store.save_auth(&tokens)?;

    println!("Signed in as membership {}", tokens.membership_id);
    println!("Token expires: {}", format_timestamp(tokens.expires_at));
    Ok(())
}

fn cmd_logout(app: &App) -> Result<()> {
    app.dashboard().logout()?;
    println!("Signed out and cleared local data.");
    Ok(())
}

fn print_profiles(dashboard: &Dashboard) {
    let state = dashboard.state();
    let selected = state.profile.as_ref().and_then(|p| p.user_info());

    println!(
        "{:<3} {:<6} {:<22} {:<24} {}",
        "", "TYPE", "MEMBERSHIP ID", "LAST PLAYED", "NAME"
    );
    println!("{}", "-".repeat(80));

    for profile in &state.all_profiles {
        let info = match profile.user_info() {
            Some(info) => info,
            None => continue,
        };
        let marker = if selected.as_ref() == Some(&info) { "*" } else { "" };
        let last_played = profile
            .date_last_played()
            .map(|dt| format_timestamp(dt.timestamp()))
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<3} {:<6} {:<22} {:<24} {}",
            marker,
            info.membership_type,
            info.membership_id,
            last_played,
            info.display_name.as_deref().unwrap_or("-")
        );
    }

    if state.is_cached {
        println!("\n(cached)");
    }
}

async fn refreshed(app: &App) -> Result<Dashboard> {
    app.require_api_key()?;
    let mut dashboard = app.dashboard();
    if let Err(e) = dashboard.refresh().await {
        if let Some(banner) = &dashboard.state().error {
            eprintln!("{}", banner);
        }
        return Err(e);
    }
    Ok(dashboard)
}

async fn cmd_profiles(app: &App) -> Result<()> {
    let dashboard = refreshed(app).await?;
    print_profiles(&dashboard);
    Ok(())
}

async fn cmd_switch(app: &App, membership: Membership) -> Result<()> {
    let mut dashboard = refreshed(app).await?;
    dashboard.switch_profile(&membership).await?;
    print_profiles(&dashboard);
    Ok(())
}

async fn cmd_search(app: &App, query: &str, limit: usize) -> Result<()> {
    app.require_api_key()?;
    let catalog = app.client.load_catalog(&app.language().code).await?;

    let items = match fancy_search(query, &catalog) {
        Some(items) => items,
        None => {
            println!("Query does not filter anything ({} items).", catalog.len());
            return Ok(());
        }
    };

    for item in items.iter().take(limit) {
        println!("{:<12} {}", item.hash, item.name());
    }
    if items.len() > limit {
        println!("... and {} more", items.len() - limit);
    }
    println!("\n{} items match", items.len());
    Ok(())
}

fn cmd_terms() -> Result<()> {
    for term in fancy_search_terms() {
        println!("{}", term);
    }
    println!("itemcategoryhash:<hash>");
    println!("special:<kinetic|energy|power>Catalysts");
    Ok(())
}

fn cmd_filters(app: &App, toggle: Option<String>) -> Result<()> {
    let mut dashboard = app.dashboard();
    if let Some(key) = toggle {
        let enabled = dashboard.toggle_filter(&key);
        println!("{} {}", key, if enabled { "enabled" } else { "disabled" });
    }

    let filters = &dashboard.state().filters;
    if filters.filters.is_empty() {
        println!("No filters set.");
    }
    for (key, enabled) in &filters.filters {
        println!("[{}] {}", if *enabled { "x" } else { " " }, key);
    }
    Ok(())
}

fn cmd_language(app: &App, code: String, name: Option<String>) -> Result<()> {
    let name = name.unwrap_or_else(|| code.clone());
    app.dashboard().set_language(Language { code, name });
    println!("Language set to {}", app.language().code);
    Ok(())
}

async fn cmd_xur(app: &App, force: bool) -> Result<()> {
    let mut latest = None;
    app.client
        .xur(&app.config.xur_url, force, |payload| match payload {
            Ok(payload) => latest = Some(payload),
            Err(e) => warn!("Ignoring unreadable Xûr feed: {:#}", e),
        })
        .await?;

    match latest {
        Some(payload) if !payload.items.is_empty() => {
            if let Some(location) = &payload.location {
                println!("Location: {}", location);
            }
            for hash in &payload.items {
                println!("{}", hash);
            }
        }
        _ => println!("Xûr is not around right now."),
    }
    Ok(())
}

async fn cmd_sets(app: &App, path: &str) -> Result<()> {
    let page = page_for_path(path).with_context(|| {
        let paths: Vec<&str> = PAGES.iter().map(|p| p.path).collect();
        format!("Unknown page {}. Pages: {}", path, paths.join(", "))
    })?;

    app.require_api_key()?;
    let catalog = app.client.load_catalog(&app.language().code).await?;

    let mut dashboard = app.dashboard();
    if !dashboard.load_cached() {
        info!("No cached profile, run `setkeeper profiles` to mark owned items");
    }
    let inventory = dashboard.state().inventory.clone();

    let groups = apply_filters(resolve(page.load()?, &catalog), &catalog, &dashboard.state().filters);
    for group in &groups {
        println!("=== {} ===", group.name);
        for set in &group.sets {
            println!("\n{}", set.name);
            if let Some(description) = &set.description {
                println!("  {}", description);
            }
            for section in &set.sections {
                println!("  {}", section.name);
                for hash in &section.items {
                    let owned = inventory.as_ref().map(|inv| inv.has(*hash)).unwrap_or(false);
                    let name = catalog.find(*hash).map(|item| item.name()).unwrap_or("?");
                    println!("    [{}] {:<12} {}", if owned { "x" } else { " " }, hash, name);
                }
            }
        }
        println!();
    }
    Ok(())
}

async fn cmd_inventory(app: &App) -> Result<()> {
    let dashboard = refreshed(app).await?;
    let snapshot = match &dashboard.state().inventory {
        Some(snapshot) => snapshot,
        None => {
            println!("No profile selected.");
            return Ok(());
        }
    };

    let dismantled = snapshot.inventory.values().filter(|e| e.dismantled).count();
    println!("Items held:      {}", snapshot.inventory.len() - dismantled);
    println!("Dismantled:      {}", dismantled);
    println!("Manually marked: {}", snapshot.manual_inventory.len());
    Ok(())
}

async fn cmd_watch(app: &App, track: &[u32]) -> Result<()> {
    if !should_poll(track) {
        println!("Nothing tracked, nothing to watch. Pass --track <hash,...>");
        return Ok(());
    }

    app.require_api_key()?;
    let mut dashboard = app.dashboard();
    let mut interval = tokio::time::interval(FETCH_INTERVAL);

    loop {
        interval.tick().await;
        if let Err(e) = dashboard.refresh().await {
            warn!("Refresh failed: {:#}", e);
            continue;
        }

        let inventory = dashboard.state().inventory.as_ref();
        let owned = track
            .iter()
            .filter(|hash| inventory.map(|inv| inv.has(**hash)).unwrap_or(false))
            .count();
        println!(
            "[{}] {}/{} tracked items obtained",
            Utc::now().format("%H:%M:%S"),
            owned,
            track.len()
        );
    }
}

fn cmd_cache_stats(app: &App) -> Result<()> {
    let stats = app.store.stats()?;

    println!("=== Setkeeper Local Store ===");
    println!("Database:        {}", app.store.path().display());
    println!();
    println!("Signed in:       {}", stats.authenticated);
    println!("Profiles cached: {}", stats.has_profiles);
    println!("Cached URLs:     {}", stats.cached_urls);
    println!("Settings:        {}", stats.settings);
    println!("Manifest tables: {}", stats.manifest_tables);
    Ok(())
}

fn cmd_cache_clear(app: &App) -> Result<()> {
    app.store.clear_all()?;
    println!("Cleared local store (manifest tables kept).");
    Ok(())
}
