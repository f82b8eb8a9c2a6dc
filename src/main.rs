//! # Intel Hub CLI (`hub`)
//!
//! ## Usage
//!
//! ```bash
//! hub --config ./config/hub.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hub init` | Create the SQLite database and run schema migrations |
//! | `hub process` | Ingest report bundles from a directory or ZIP archive |
//! | `hub reprocess <id>` | Force a fresh run of one document |
//! | `hub status` | Extraction coverage counts |
//! | `hub jobs [<id>]` | Batch jobs, or one job with its items |
//! | `hub get <id>` | A document with its extracted intelligence |
//! | `hub brief <id>` | One-page brief of a document |
//! | `hub related <id>` | Documents with similar content |
//! | `hub search` | List and filter the library, or `--semantic` |
//! | `hub databank` | Search extracted items, or `--stats` |
//! | `hub chat "<message>"` | Ask a question (`--mode single|all|minister`) |
//! | `hub analyze <url>` | "So What?" analysis of a news article |
//! | `hub serve` | Start the HTTP API |
//!
//! API keys are read from the environment; a `.env` file in the working
//! directory is loaded first when present.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use intel_hub::chat::{self, ChatRequest};
use intel_hub::databank::{self, DataBankQuery};
use intel_hub::ingest::{self, ProcessArgs};
use intel_hub::models::ChatMode;
use intel_hub::progress::ProgressMode;
use intel_hub::search::{self, LibraryQuery};
use intel_hub::{config, get, jobs, migrate, news, server, stats};

/// Intel Hub: report ingestion, structured extraction, and
/// retrieval-grounded chat.
#[derive(Parser)]
#[command(name = "hub", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hub.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest report bundles.
    ///
    /// Each immediate subdirectory of the reports directory is one bundle.
    /// Bundles already completed with unchanged content are skipped unless
    /// `--force` is given.
    Process {
        /// Reports directory. Defaults to `processing.reports_path`.
        #[arg(long)]
        path: Option<PathBuf>,

        /// ZIP archive of bundles, unpacked to a scratch directory.
        #[arg(long, conflicts_with = "path")]
        archive: Option<PathBuf>,

        /// Maximum number of bundles to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Skip this many bundles (in name order) before processing.
        #[arg(long, default_value_t = 0)]
        start: usize,

        /// Concurrent bundle pipelines. Defaults to `processing.max_concurrent`.
        #[arg(long)]
        concurrent: Option<usize>,

        /// Reprocess bundles that already completed.
        #[arg(long)]
        force: bool,

        /// List the bundles that would be processed and exit.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr.
        #[arg(long, value_enum, default_value_t = ProgressArg::Auto)]
        progress: ProgressArg,
    },

    /// Force a fresh run of one document from its bundle.
    Reprocess {
        /// Document id.
        id: String,
    },

    /// Show extraction coverage counts.
    Status,

    /// List batch jobs, or show one job with its items.
    Jobs {
        /// Job id.
        id: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Print a document with its extracted intelligence.
    Get {
        /// Document id.
        id: String,
    },

    /// Print the one-page brief of a document.
    Brief {
        /// Document id.
        id: String,
    },

    /// Documents whose content is closest to this one.
    Related {
        /// Document id.
        id: String,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// List and filter the library.
    Search {
        /// Text matched against title, summary and source.
        query: Option<String>,

        /// Search passages through the retrieval store instead.
        #[arg(long, requires = "query")]
        semantic: bool,

        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        year: Option<i32>,

        #[arg(long)]
        category: Option<String>,

        /// Document state: pending, processing, completed, failed.
        #[arg(long)]
        state: Option<String>,

        /// Sort field: created_at, year, title.
        #[arg(long)]
        sort: Option<String>,

        /// asc or desc.
        #[arg(long)]
        order: Option<String>,

        #[arg(long)]
        page: Option<i64>,

        #[arg(long)]
        limit: Option<i64>,
    },

    /// Search extracted items across the library.
    Databank {
        /// Text matched against item body and context.
        query: Option<String>,

        /// finding, statistic, quote, insight, recommendation.
        #[arg(long = "type")]
        item_type: Option<String>,

        #[arg(long)]
        document: Option<String>,

        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        tag: Option<String>,

        #[arg(long)]
        page: Option<i64>,

        #[arg(long)]
        limit: Option<i64>,

        /// Print aggregate counts instead of items.
        #[arg(long)]
        stats: bool,
    },

    /// Ask a question over the library.
    Chat {
        message: String,

        /// single, all, or minister. Defaults to the user's preference.
        #[arg(long)]
        mode: Option<ChatMode>,

        /// Document id; required for `single`.
        #[arg(long)]
        document: Option<String>,

        /// Continue an existing conversation.
        #[arg(long)]
        conversation: Option<String>,

        /// Add a web search step to minister mode.
        #[arg(long)]
        web: bool,

        /// Pin a model; disables the fallback.
        #[arg(long)]
        model: Option<String>,

        #[arg(long, default_value = "cli")]
        user: String,
    },

    /// "So What?" analysis of a news article.
    Analyze {
        url: String,

        #[arg(long)]
        title: Option<String>,

        /// Read article text from this file instead of scraping.
        #[arg(long)]
        text_file: Option<PathBuf>,

        /// Ignore a cached analysis.
        #[arg(long)]
        refresh: bool,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    /// Human on a TTY, otherwise off.
    Auto,
    Human,
    Json,
    Off,
}

impl ProgressArg {
    fn mode(self) -> ProgressMode {
        match self {
            ProgressArg::Auto => ProgressMode::default_for_tty(),
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
            ProgressArg::Off => ProgressMode::Off,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("intel_hub=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Process {
            path,
            archive,
            limit,
            start,
            concurrent,
            force,
            dry_run,
            progress,
        } => {
            ingest::run_process(
                &cfg,
                ProcessArgs {
                    path,
                    archive,
                    limit,
                    start,
                    concurrent,
                    force,
                    dry_run,
                    progress: progress.mode(),
                },
            )
            .await?;
        }
        Commands::Reprocess { id } => {
            ingest::run_reprocess(&cfg, &id).await?;
        }
        Commands::Status => {
            stats::run_status(&cfg).await?;
        }
        Commands::Jobs { id, limit } => {
            jobs::run_jobs(&cfg, id.as_deref(), limit).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Brief { id } => {
            get::run_brief(&cfg, &id).await?;
        }
        Commands::Related { id, limit } => {
            search::run_related(&cfg, &id, limit).await?;
        }
        Commands::Search {
            query: Some(query),
            semantic: true,
            limit,
            ..
        } => {
            search::run_semantic_search(&cfg, &query, limit).await?;
        }
        Commands::Search {
            query,
            semantic: _,
            source,
            year,
            category,
            state,
            sort,
            order,
            page,
            limit,
        } => {
            let q = LibraryQuery {
                search: query,
                source,
                year,
                category,
                state,
                sort,
                order,
                page,
                limit,
            };
            search::run_search(&cfg, q).await?;
        }
        Commands::Databank {
            query,
            item_type,
            document,
            source,
            tag,
            page,
            limit,
            stats,
        } => {
            let q = DataBankQuery {
                search: query,
                item_type,
                document_id: document,
                source,
                tag,
                page,
                limit,
            };
            databank::run_databank(&cfg, q, stats).await?;
        }
        Commands::Chat {
            message,
            mode,
            document,
            conversation,
            web,
            model,
            user,
        } => {
            let req = ChatRequest {
                message,
                mode,
                document_id: document,
                conversation_id: conversation,
                web_search: web,
                model,
            };
            chat::run_chat(&cfg, &user, req).await?;
        }
        Commands::Analyze {
            url,
            title,
            text_file,
            refresh,
        } => {
            news::run_analyze(&cfg, &url, title, text_file.as_deref(), refresh).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
