//! postsync CLI - Command line interface for the offline-first post reader.
//!
//! Reads posts through the local cache, toggles favorites optimistically and
//! reconciles pending favorite intents with the remote when connected.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use postsync_app::{default_config_path, App, AppConfig};
use postsync_common::{Error, Post, PostId};
use postsync_sync::PassOutcome;

#[derive(Parser)]
#[command(name = "postsync")]
#[command(about = "postsync - Offline-first posts with favorite sync")]
#[command(version)]
struct Cli {
    /// Configuration file (default: platform config dir).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Stay disconnected; never probe or call the remote.
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List posts (cached unless --refresh).
    Posts {
        /// Read through from the remote even if posts are cached.
        #[arg(short, long)]
        refresh: bool,
    },

    /// Show comments for a post.
    Comments {
        /// Post identifier.
        post_id: i64,
    },

    /// Toggle the favorite flag of a post.
    Toggle {
        /// Post identifier.
        post_id: i64,
    },

    /// List favorite posts.
    Favorites,

    /// Remove a post from favorites.
    Unfavorite {
        /// Post identifier.
        post_id: i64,
    },

    /// Show favorite intents not yet confirmed by the remote.
    Pending,

    /// Reconcile pending intents now.
    Sync,

    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = load_config(&config_path)?;
    config.offline |= cli.offline;

    if let Commands::Config = cli.command {
        return cmd_config(&config_path, &config);
    }

    let app = App::open(&config).await.context("Failed to open store")?;
    debug!(
        "Connectivity: {}",
        if *app.connectivity().borrow() { "online" } else { "offline" }
    );

    let result = match cli.command {
        Commands::Posts { refresh } => cmd_posts(&app, refresh).await,
        Commands::Comments { post_id } => cmd_comments(&app, PostId::new(post_id)).await,
        Commands::Toggle { post_id } => cmd_toggle(&app, PostId::new(post_id)).await,
        Commands::Favorites => cmd_favorites(&app).await,
        Commands::Unfavorite { post_id } => cmd_unfavorite(&app, PostId::new(post_id)).await,
        Commands::Pending => cmd_pending(&app).await,
        Commands::Sync => cmd_sync(&app).await,
        Commands::Config => Ok(()),
    };

    app.shutdown().await;
    result
}

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))
}

fn print_post(post: &Post, favorite: bool) {
    let marker = if favorite { "*" } else { " " };
    println!("{} {:>4}  {}", marker, post.id, post.title);
}

/// List posts.
async fn cmd_posts(app: &App, refresh: bool) -> Result<()> {
    let posts = app
        .fetch_posts(refresh)
        .await
        .context("Failed to fetch posts")?;

    if let Some(error) = app.last_error().borrow().as_ref() {
        println!("Showing cached posts ({})", error);
    }

    if posts.is_empty() {
        println!("No posts available.");
        return Ok(());
    }

    for post in &posts {
        print_post(post, app.is_favorite(post.id).await?);
    }
    println!("\n{} posts", posts.len());

    Ok(())
}

/// Show comments for a post.
async fn cmd_comments(app: &App, post_id: PostId) -> Result<()> {
    let comments = app
        .fetch_comments(post_id)
        .await
        .context("Failed to fetch comments")?;

    if comments.is_empty() {
        println!("No comments on post {}.", post_id);
    } else {
        println!("Comments on post {}:", post_id);
        for comment in comments {
            println!("  {} <{}>", comment.name, comment.email);
            println!("    {}", comment.body.replace('\n', "\n    "));
        }
    }

    Ok(())
}

/// Resolve a post, loading the post list if it is not cached yet.
async fn resolve_post(app: &App, post_id: PostId) -> Result<Post> {
    match app.post(post_id).await {
        Err(Error::NotFound(_)) => {
            app.fetch_posts(false)
                .await
                .context("Failed to fetch posts")?;
            Ok(app.post(post_id).await?)
        }
        other => Ok(other?),
    }
}

/// Flush pending intents before exit when connected.
async fn flush_pending(app: &App) -> Result<()> {
    if !*app.connectivity().borrow() {
        println!("Offline: change will sync when connected.");
        return Ok(());
    }

    let report = app.sync_now().await?;
    if !report.failed.is_empty() {
        println!("{} intents could not be confirmed and stay pending.", report.failed.len());
    }
    Ok(())
}

/// Toggle the favorite flag of a post.
async fn cmd_toggle(app: &App, post_id: PostId) -> Result<()> {
    let post = resolve_post(app, post_id).await?;
    info!("Toggling favorite for post {}", post_id);

    let favorite = app
        .toggle_favorite(&post)
        .await
        .context("Failed to toggle favorite")?;
    println!(
        "Post {} {}",
        post_id,
        if favorite { "added to favorites" } else { "removed from favorites" }
    );

    flush_pending(app).await
}

/// List favorite posts.
async fn cmd_favorites(app: &App) -> Result<()> {
    let favorites = match app.load_favorites().await {
        Err(e) if e.is_cancelled() => return Ok(()),
        other => other.context("Failed to load favorites")?,
    };

    if favorites.is_empty() {
        println!("No favorites.");
    } else {
        for post in &favorites {
            print_post(post, true);
        }
    }

    Ok(())
}

/// Remove a post from favorites.
async fn cmd_unfavorite(app: &App, post_id: PostId) -> Result<()> {
    app.remove_favorite(post_id)
        .await
        .context("Failed to remove favorite")?;
    println!("Post {} is not a favorite.", post_id);

    flush_pending(app).await
}

/// Show pending intents.
async fn cmd_pending(app: &App) -> Result<()> {
    let pending = app.pending().await;

    if pending.is_empty() {
        println!("Nothing pending.");
        return Ok(());
    }

    let join = |ids: &std::collections::BTreeSet<PostId>| {
        ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    };
    println!("Pending favorites:   [{}]", join(pending.favorites()));
    println!("Pending unfavorites: [{}]", join(pending.unfavorites()));

    Ok(())
}

/// Run a reconciliation pass.
async fn cmd_sync(app: &App) -> Result<()> {
    let report = app.sync_now().await.context("Sync failed")?;

    match report.outcome {
        PassOutcome::Empty => println!("Nothing to sync."),
        PassOutcome::Offline => println!("Offline: pending intents kept."),
        PassOutcome::Interrupted => println!("Connection lost during sync."),
        PassOutcome::Cancelled => println!("Sync cancelled."),
        PassOutcome::Completed => {}
    }
    if report.confirmed() > 0 || !report.failed.is_empty() {
        println!("Sync Results:");
        println!("  Favorites confirmed:   {}", report.favorites_confirmed.len());
        println!("  Unfavorites confirmed: {}", report.unfavorites_confirmed.len());
        println!("  Failed:                {}", report.failed.len());
    }

    Ok(())
}

/// Print the effective configuration.
fn cmd_config(path: &Path, config: &AppConfig) -> Result<()> {
    println!("# {}", path.display());
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
