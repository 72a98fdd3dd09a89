//! CLI entry point for the incremental semantic indexer.
//!
//! Provides commands for indexing, searching and watching a workspace.

use anyhow::{Context, Result, anyhow};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use codevec::display::create_progress_bar;
use codevec::indexing::{FileSystemWatcher, WatchError};
use codevec::{IncrementalIndexer, IndexStats, Settings};
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::Level;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Incremental semantic index for source code
#[derive(Parser)]
#[command(
    name = "codevec",
    version = env!("CARGO_PKG_VERSION"),
    about = "Incremental semantic code index",
    long_about = "Chunk source files, embed the chunks and keep a vector index in step with the working tree.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "debug")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Initialize project
    #[command(about = "Set up .codevec directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Index source files or directories
    #[command(about = "Index changed files under the given paths")]
    Index {
        /// Files or directories to index (defaults to the workspace root)
        paths: Vec<PathBuf>,

        /// Re-embed files even if their content is unchanged
        #[arg(short, long)]
        force: bool,

        /// Files processed concurrently (overrides config)
        #[arg(short, long)]
        threads: Option<usize>,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Semantic search over indexed chunks
    #[command(
        about = "Search indexed code by meaning",
        after_help = "Examples:\n  codevec search \"parse config file\"\n  codevec search \"retry with backoff\" --limit 5 --json"
    )]
    Search {
        /// Natural language or code query
        query: String,

        /// Maximum number of results
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Index once, then re-index files as they change
    #[command(about = "Watch the workspace and re-index on change (Ctrl-C to stop)")]
    Watch {
        /// Directory to index before watching (defaults to the workspace root)
        path: Option<PathBuf>,
    },

    /// Show index statistics
    #[command(about = "Show indexed files, stored chunks and cache size")]
    Stats,

    /// Show current configuration settings
    #[command(about = "Display active settings from .codevec/settings.toml")]
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {e:#}", style("Error:").red().bold());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Init { force } = &cli.command {
        let path = Settings::init_config_file(*force).map_err(|e| anyhow!("{e}"))?;
        println!("Created configuration file at: {}", path.display());
        println!("Edit this file to customize your settings.");
        return Ok(());
    }

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Settings::load().context("loading configuration")?,
    };

    init_tracing(&cli, &settings);

    match cli.command {
        Commands::Init { .. } => Ok(()),

        Commands::Config => {
            let toml = toml::to_string_pretty(&settings).context("rendering settings")?;
            println!("{toml}");
            Ok(())
        }

        Commands::Index {
            paths,
            force,
            threads,
            no_progress,
        } => {
            if let Some(threads) = threads {
                settings.indexing.parallel_threads = threads;
            }
            let mut indexer = open_indexer(settings)?;
            indexer.set_force(force);
            let show_progress = !no_progress && !cli.quiet;
            run_index(&mut indexer, paths, show_progress, cli.quiet).await
        }

        Commands::Search { query, limit, json } => {
            let indexer = open_indexer(settings)?;
            let hits = indexer.search(&query, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
                return Ok(());
            }
            if hits.is_empty() {
                println!("No results.");
            }
            for (rank, hit) in hits.iter().enumerate() {
                let name = hit.name.as_deref().unwrap_or(&hit.kind);
                println!(
                    "{}. {}:{}-{} {} ({:.3})",
                    rank + 1,
                    style(&hit.file_path).cyan(),
                    hit.start_line,
                    hit.end_line,
                    style(name).bold(),
                    hit.score
                );
            }
            Ok(())
        }

        Commands::Watch { path } => {
            if !settings.file_watch.enabled {
                return Err(WatchError::Disabled.into());
            }
            let debounce_ms = settings.file_watch.debounce_ms;
            let mut indexer = open_indexer(settings)?;
            let root = match path {
                Some(path) => anchor(path, &current_dir()?),
                None => indexer.normalizer().root().to_path_buf(),
            };
            report(&indexer.index_directory(&root).await, cli.quiet);

            let indexer = Arc::new(RwLock::new(indexer));
            let watcher = FileSystemWatcher::new(Arc::clone(&indexer), debounce_ms).await?;
            eprintln!("Watching for changes. Press Ctrl+C to stop.");

            tokio::select! {
                result = watcher.watch() => result?,
                _ = tokio::signal::ctrl_c() => {}
            }
            indexer.write().await.persist()?;
            Ok(())
        }

        Commands::Stats => {
            let indexer = open_indexer(settings)?;
            let cache = indexer.cache_stats();
            println!("{}", style("Index Statistics:").bold());
            println!("  Files indexed: {}", indexer.manifest().len());
            println!("  Chunks (manifest): {}", indexer.manifest().total_chunks());
            println!("  Chunks (vector store): {}", indexer.store().len());
            println!("  Cached embeddings: {}", cache.size);
            Ok(())
        }
    }
}

fn init_tracing(cli: &Cli, settings: &Settings) {
    let level = if cli.quiet {
        Level::WARN
    } else if cli.debug || settings.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn open_indexer(settings: Settings) -> Result<IncrementalIndexer> {
    IncrementalIndexer::open(Arc::new(settings)).context("opening index")
}

async fn run_index(
    indexer: &mut IncrementalIndexer,
    paths: Vec<PathBuf>,
    show_progress: bool,
    quiet: bool,
) -> Result<()> {
    let paths = if paths.is_empty() {
        vec![indexer.normalizer().root().to_path_buf()]
    } else {
        from_cwd(paths)?
    };

    let (dirs, files): (Vec<PathBuf>, Vec<PathBuf>) =
        paths.into_iter().partition(|path| path.is_dir());

    for dir in dirs {
        attach_progress(indexer, show_progress, &dir);
        report(&indexer.index_directory(&dir).await, quiet);
    }
    if !files.is_empty() {
        attach_progress(indexer, show_progress, Path::new("files"));
        report(&indexer.index_paths(files).await, quiet);
    }
    Ok(())
}

/// Anchor command-line paths at the current directory.
///
/// The indexer reads relative paths against the workspace root, which is
/// not the current directory when running from a subdirectory.
fn from_cwd(paths: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    let cwd = current_dir()?;
    Ok(paths.into_iter().map(|path| anchor(path, &cwd)).collect())
}

fn current_dir() -> Result<PathBuf> {
    std::env::current_dir().context("reading current directory")
}

fn anchor(path: PathBuf, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn attach_progress(indexer: &mut IncrementalIndexer, show: bool, target: &Path) {
    let progress = show.then(|| create_progress_bar(0, &format!("Indexing {}", target.display())));
    indexer.set_progress(progress);
}

fn report(stats: &IndexStats, quiet: bool) {
    if !quiet {
        stats.display();
    } else if stats.files_failed > 0 {
        eprintln!("{} files failed to index", style(stats.files_failed).red());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use codevec::PathNormalizer;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn relative_arguments_resolve_from_the_current_directory() {
        let root = Path::new("/work/project");
        let cwd = root.join("src");
        let normalizer = PathNormalizer::new(root);

        let keys: Vec<String> = ["main.rs", ".", "../tests/api.rs", "/work/project/lib.rs"]
            .into_iter()
            .map(|arg| normalizer.normalize(anchor(PathBuf::from(arg), &cwd)))
            .collect();

        assert_eq!(keys, vec!["src/main.rs", "src", "tests/api.rs", "lib.rs"]);
    }
}
