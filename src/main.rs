use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use secrecy::SecretString;

use ocsync::api::{self, ApiError, Credentials, HttpConfig};
use ocsync::config::Config;
use ocsync::login_error::{LoginError, Section};
use ocsync::preferences::{Preference, PreferenceStore};
use ocsync::storage::{Database, DatabaseError, Item, ItemFilter, ItemQuery, ROOT_FOLDER_ID};
use ocsync::sync::{SyncRequest, SyncService, SyncType};
use ocsync::util::{by_line, clean_string, strip_control_chars, time_span, truncate_to_width};

const TITLE_WIDTH: usize = 60;

/// Get the config directory path (~/.config/ocsync/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("ocsync"))
}

#[derive(Parser, Debug)]
#[command(name = "ocsync", about = "Sync a Nextcloud News account into a local database")]
struct Args {
    /// Reset database (delete and recreate)
    #[arg(long, global = true)]
    reset_db: bool,

    /// Use this config file instead of ~/.config/ocsync/config.toml
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in, detect the API level and run an initial sync
    Login {
        /// Nextcloud root URL
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        user: Option<String>,
        /// Read the password from the first line of stdin
        #[arg(long)]
        password_stdin: bool,
    },
    /// Synchronize with the server
    Sync {
        /// Drop the cached ETag and fetch everything
        #[arg(long, conflicts_with = "load_more")]
        initial: bool,
        #[arg(long, conflicts_with = "load_more")]
        changes_only: bool,
        /// Fetch older items
        #[arg(long)]
        load_more: bool,
    },
    /// List folders
    Folders,
    /// List feeds
    Feeds {
        #[arg(long)]
        folder: Option<i64>,
    },
    /// List items (defaults to the last selection)
    Items {
        #[arg(long, conflicts_with_all = ["folder", "starred", "all_unread"])]
        feed: Option<i64>,
        #[arg(long, conflicts_with_all = ["starred", "all_unread"])]
        folder: Option<i64>,
        #[arg(long, conflicts_with = "all_unread")]
        starred: bool,
        #[arg(long)]
        all_unread: bool,
        /// Only unread items
        #[arg(long)]
        unread: bool,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Mark items read (or unread)
    Read {
        #[arg(required = true)]
        ids: Vec<i64>,
        #[arg(long)]
        unread: bool,
    },
    /// Mark every item of a feed read
    MarkFeedRead { feed_id: i64 },
    /// Star items (or remove the star)
    Star {
        #[arg(required = true)]
        ids: Vec<i64>,
        #[arg(long)]
        unstar: bool,
    },
    /// Subscribe to a feed
    AddFeed {
        url: String,
        #[arg(long, default_value_t = ROOT_FOLDER_ID)]
        folder: i64,
    },
    /// Move a feed to another folder (0 = no folder)
    MoveFeed { feed_id: i64, folder_id: i64 },
    /// Unsubscribe from a feed
    DeleteFeed { feed_id: i64 },
    /// Show effective preferences
    Prefs,
    /// Forget the account and all synchronized data
    Logout,
}

struct AppContext {
    db: Database,
    prefs: Arc<PreferenceStore>,
    http: HttpConfig,
}

impl AppContext {
    async fn sync_service(&self) -> Result<SyncService> {
        if !self.prefs.has_credentials() {
            anyhow::bail!("Not logged in. Run `ocsync login` first.");
        }
        let api = api::connect_stored(&self.http, self.db.clone(), Arc::clone(&self.prefs))
            .map_err(api_failure)?;
        Ok(SyncService::new(api, Arc::clone(&self.prefs)).await)
    }
}

/// Attach the user-facing message for an API failure.
fn api_failure(err: ApiError) -> anyhow::Error {
    let login = LoginError::from_api_error(&err);
    let hint = match login.section {
        Section::Url => " (check the server URL)",
        Section::User | Section::Password => " (check username and password)",
        Section::None | Section::Unknown => "",
    };
    let message = format!("{}{}", login.message, hint);
    anyhow::Error::new(err).context(message)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    // Set directory permissions on Unix (user-only access)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(&config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(&config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let db_path = config_dir.join("ocsync.db");
    if args.reset_db && db_path.exists() {
        std::fs::remove_file(&db_path).context("Failed to delete database")?;
        println!("Database reset.");
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: Another ocsync process is using the database. Try again later.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let prefs = match PreferenceStore::load(&config, &db).await {
        Ok(prefs) => prefs,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load stored preferences, using config only");
            PreferenceStore::from_config(&config, &db)
        }
    };

    let ctx = AppContext {
        db: db.clone(),
        prefs: Arc::new(prefs),
        http: HttpConfig::from_config(&config),
    };

    let result = run(&ctx, args.command).await;
    db.close().await;
    result
}

async fn run(ctx: &AppContext, command: Command) -> Result<()> {
    match command {
        Command::Login {
            url,
            user,
            password_stdin,
        } => login(ctx, url, user, password_stdin).await,
        Command::Sync {
            initial,
            changes_only,
            load_more,
        } => {
            let sync_type = if load_more {
                SyncType::LoadMore
            } else if changes_only {
                SyncType::SyncChangesOnly
            } else {
                SyncType::FullSync
            };
            sync(ctx, SyncRequest { sync_type, initial }).await
        }
        Command::Folders => list_folders(ctx).await,
        Command::Feeds { folder } => list_feeds(ctx, folder).await,
        Command::Items {
            feed,
            folder,
            starred,
            all_unread,
            unread,
            limit,
        } => {
            let filter = match (feed, folder, starred, all_unread) {
                (Some(id), _, _, _) => Some(ItemFilter::Feed(id)),
                (_, Some(id), _, _) => Some(ItemFilter::Folder(id)),
                (_, _, true, _) => Some(ItemFilter::Starred),
                (_, _, _, true) => Some(ItemFilter::AllUnread),
                _ => None,
            };
            list_items(ctx, filter, unread, limit).await
        }
        Command::Read { ids, unread } => {
            for id in ids {
                let changed = ctx.db.set_item_unread(id, unread).await?;
                report_change(id, changed, if unread { "unread" } else { "read" });
            }
            Ok(())
        }
        Command::MarkFeedRead { feed_id } => {
            let count = ctx.db.mark_feed_read(feed_id).await?;
            println!("Marked {} item(s) read.", count);
            Ok(())
        }
        Command::Star { ids, unstar } => {
            for id in ids {
                let changed = ctx.db.set_item_starred(id, !unstar).await?;
                report_change(id, changed, if unstar { "unstarred" } else { "starred" });
            }
            Ok(())
        }
        Command::AddFeed { url, folder } => {
            let service = ctx.sync_service().await?;
            let feed = service
                .api()
                .create_feed(&url, folder)
                .await
                .map_err(api_failure)?;
            println!("Added feed {}: {}", feed.id, strip_control_chars(&feed.name));
            Ok(())
        }
        Command::MoveFeed { feed_id, folder_id } => {
            let feed = stored_feed(ctx, feed_id).await?;
            if folder_id != ROOT_FOLDER_ID && ctx.db.get_folder(folder_id).await?.is_none() {
                anyhow::bail!("Folder {} not found", folder_id);
            }
            let service = ctx.sync_service().await?;
            let moved = service
                .api()
                .move_feed(&feed, folder_id)
                .await
                .map_err(api_failure)?;
            println!("Moved feed {} to folder {}.", moved.id, moved.folder_id);
            Ok(())
        }
        Command::DeleteFeed { feed_id } => {
            let feed = stored_feed(ctx, feed_id).await?;
            let service = ctx.sync_service().await?;
            service.api().delete_feed(&feed).await.map_err(api_failure)?;
            println!("Deleted feed {}.", feed_id);
            Ok(())
        }
        Command::Prefs => {
            show_prefs(ctx).await;
            Ok(())
        }
        Command::Logout => logout(ctx).await,
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn login(
    ctx: &AppContext,
    url: Option<String>,
    user: Option<String>,
    password_stdin: bool,
) -> Result<()> {
    let url = url
        .or_else(|| ctx.prefs.string(Preference::Url))
        .context("No server URL: pass --url or set server_url in config.toml")?;
    let user = user
        .or_else(|| ctx.prefs.string(Preference::Username))
        .context("No username: pass --user or set username in config.toml")?;

    let (password, from_stdin) = if password_stdin {
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read password from stdin")?;
        (
            SecretString::from(line.trim_end_matches(['\r', '\n']).to_string()),
            true,
        )
    } else {
        let password = ctx.prefs.password().context(
            "No password: use --password-stdin, set OCSYNC_PASSWORD or password in config.toml",
        )?;
        (password, false)
    };

    let credentials = Credentials::new(&url, &user, password.clone()).map_err(api_failure)?;
    let (level, status) = api::detect_api_level(&credentials, &ctx.http)
        .await
        .map_err(api_failure)?;

    if status.issues.improperly_configured_cron {
        eprintln!("Warning: the server's News cron job is not configured; feeds may be stale.");
    }

    ctx.prefs
        .set_string(Preference::Url, credentials.root_url.as_str())
        .await?;
    ctx.prefs.set_string(Preference::Username, &user).await?;
    if from_stdin {
        use secrecy::ExposeSecret;
        ctx.prefs
            .set_string(Preference::Password, password.expose_secret())
            .await?;
    }
    ctx.prefs
        .set_string(Preference::DetectedApiLevel, level.as_str())
        .await?;

    let service = ctx.sync_service().await?;
    match service.api().user().await {
        Ok(user) => println!(
            "Logged in as {} ({}).",
            strip_control_chars(user.display_name.as_deref().unwrap_or(&user.user_id)),
            level
        ),
        Err(e) => {
            tracing::debug!(error = %e, "Metadata has no user information");
            println!("Logged in ({}).", level);
        }
    }

    let summary = service
        .run(SyncRequest::initial())
        .await
        .map_err(api_failure)?;
    println!(
        "Synchronized {} folders, {} feeds, {} items.",
        summary.folders, summary.feeds, summary.items
    );
    Ok(())
}

async fn sync(ctx: &AppContext, request: SyncRequest) -> Result<()> {
    let service = ctx.sync_service().await?;
    let summary = service.run(request).await.map_err(api_failure)?;

    println!(
        "Synchronized {} folders, {} feeds, {} items.",
        summary.folders, summary.feeds, summary.items
    );
    if summary.skipped_items > 0 {
        println!("Skipped {} item(s) of unknown feeds.", summary.skipped_items);
    }
    if summary.pruned_items > 0 {
        println!("Removed {} item(s) of deleted feeds.", summary.pruned_items);
    }
    Ok(())
}

async fn list_folders(ctx: &AppContext) -> Result<()> {
    let folders = ctx.db.get_folders().await?;
    let feeds = ctx.db.get_feeds().await?;

    let mut unread: HashMap<i64, i64> = HashMap::new();
    for feed in &feeds {
        *unread.entry(feed.folder_id).or_default() += feed.unread_count;
    }

    for folder in &folders {
        println!(
            "{:>6}  {:<40} {:>5}",
            folder.id,
            truncate_to_width(&strip_control_chars(&folder.name), 40),
            unread.get(&folder.id).copied().unwrap_or(0)
        );
    }
    if let Some(count) = unread.get(&ROOT_FOLDER_ID) {
        println!("{:>6}  {:<40} {:>5}", ROOT_FOLDER_ID, "(no folder)", count);
    }
    Ok(())
}

async fn list_feeds(ctx: &AppContext, folder: Option<i64>) -> Result<()> {
    let feeds = match folder {
        Some(folder_id) => ctx.db.get_feeds_in_folder(folder_id).await?,
        None => ctx.db.get_feeds().await?,
    };

    for feed in &feeds {
        let marker = if feed.is_pinned { "*" } else { " " };
        let error = if feed.error_count > 0 { " !" } else { "" };
        println!(
            "{:>6}{} {:<40} {:>5}  folder {}{}",
            feed.id,
            marker,
            truncate_to_width(&strip_control_chars(&feed.name), 40),
            feed.unread_count,
            feed.folder_id,
            error
        );
        if let Some(last_error) = &feed.last_error {
            tracing::debug!(feed_id = feed.id, error = %last_error, "Feed update error");
        }
    }
    Ok(())
}

async fn list_items(
    ctx: &AppContext,
    filter: Option<ItemFilter>,
    unread: bool,
    limit: Option<i64>,
) -> Result<()> {
    let filter = match filter {
        Some(filter) => {
            let (id, is_feed) = filter.to_drawer();
            ctx.prefs.set_long(Preference::StartDrawerItemId, id).await?;
            ctx.prefs.set_bool(Preference::IsFeed, is_feed).await?;
            filter
        }
        None => ItemFilter::from_drawer(
            ctx.prefs
                .long(Preference::StartDrawerItemId)
                .unwrap_or(ocsync::storage::ALL_UNREAD_ID),
            ctx.prefs.bool(Preference::IsFeed),
        ),
    };

    let query = ItemQuery {
        filter,
        only_unread: unread || ctx.prefs.bool(Preference::ShowOnlyUnread),
        sort_field: ctx.prefs.sort_field(),
        order: ctx.prefs.sort_order().await,
        limit,
    };
    let items = ctx.db.get_items(&query).await?;
    let feed_names: HashMap<i64, String> = ctx
        .db
        .get_feeds()
        .await?
        .into_iter()
        .map(|f| (f.id, f.name))
        .collect();

    let now = Utc::now();
    for item in &items {
        print_item(item, &feed_names, now);
    }
    if items.is_empty() {
        println!("No items.");
    }
    Ok(())
}

fn print_item(item: &Item, feed_names: &HashMap<i64, String>, now: chrono::DateTime<Utc>) {
    let state = match (item.unread, item.starred) {
        (true, true) => "U*",
        (true, false) => "U ",
        (false, true) => " *",
        (false, false) => "  ",
    };
    let age = item
        .published_at
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .map(|published| time_span(published, now))
        .unwrap_or_default();
    let title = clean_string(item.title.as_deref().unwrap_or("(untitled)"));
    let feed = feed_names
        .get(&item.feed_id)
        .map(String::as_str)
        .unwrap_or("unknown feed");

    println!(
        "{:>8} {} {:>4}  {}",
        item.id,
        state,
        age,
        truncate_to_width(&strip_control_chars(&title), TITLE_WIDTH)
    );
    println!(
        "{:>16}{}",
        "",
        strip_control_chars(&by_line(feed, item.author.as_deref()))
    );
}

fn report_change(id: i64, changed: bool, state: &str) {
    if changed {
        println!("Item {} marked {}.", id, state);
    } else {
        println!("Item {} already {} (or not found).", id, state);
    }
}

async fn stored_feed(ctx: &AppContext, feed_id: i64) -> Result<ocsync::storage::Feed> {
    ctx.db
        .get_feed(feed_id)
        .await?
        .with_context(|| format!("Feed {} not found, run `ocsync sync` first", feed_id))
}

async fn show_prefs(ctx: &AppContext) {
    for pref in Preference::ALL {
        let value = match pref {
            Preference::Password => ctx
                .prefs
                .password()
                .map(|_| "[REDACTED]".to_string()),
            _ => ctx.prefs.string(pref),
        };
        println!("{:<26} {}", pref.key(), value.as_deref().unwrap_or("-"));
    }
    println!("{:<26} {}", "effective_order", ctx.prefs.sort_order().await.as_str());
    if let Ok(Some(user)) = ctx.db.get_user().await {
        println!("{:<26} {}", "user", strip_control_chars(&user.user_id));
    }
}

async fn logout(ctx: &AppContext) -> Result<()> {
    ctx.db
        .clear_account_data()
        .await
        .context("Failed to clear synchronized data")?;
    for pref in [
        Preference::Username,
        Preference::Password,
        Preference::Url,
        Preference::DetectedApiLevel,
        Preference::Etag,
        Preference::StartDrawerItemId,
        Preference::IsFeed,
        Preference::NeedsUpdateAfterSync,
    ] {
        ctx.prefs.remove(pref).await?;
    }
    println!("Logged out.");
    Ok(())
}
