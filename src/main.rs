use anyhow::Context as _;
use clap::{Parser, Subcommand};
use meng::config::Config;
use meng::db::{Database, MessageRecord};
use meng::discord::{self, DiscordThread};
use meng::embedding::EmbeddingClient;
use meng::preferences::{parse_traits, PreferenceUpdate};
use meng::retry::{RetryPolicy, Retrying};
use meng::search::SearchFilter;
use meng::Data;
use serenity::http::Http;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(version, about = "Index Discord history for semantic search")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index the full history of every text channel in a guild
    Index {
        /// Defaults to GUILD_ID
        #[arg(long)]
        guild: Option<u64>,
    },
    /// Find indexed messages similar to a query
    Search {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        channel: Vec<u64>,
        #[arg(long)]
        author: Vec<u64>,
    },
    /// Most recent distinct messages of a user
    History {
        user_id: u64,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Register a thread as owned by a user
    StartThread { thread_id: u64, owner_id: u64 },
    /// Print the conversation history of a managed thread as JSON turns
    Thread { thread_id: u64, author_id: u64 },
    /// Show or update a user's stored preferences
    Prefs {
        user_id: u64,
        #[arg(long)]
        occupation: Option<String>,
        /// Comma-separated
        #[arg(long)]
        traits: Option<String>,
        #[arg(long)]
        info: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    info!("Loaded configuration: {:?}", config);

    if let Some(parent) = Path::new(&config.database_url).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let db = Database::new(&config)?;
    db.execute_init()?;

    let client = EmbeddingClient::new(&config)?;
    let embedder = Arc::new(Retrying::new(client, RetryPolicy::from_config(&config)));
    let http = Arc::new(Http::new(&config.discord_token));

    let data = Data {
        config,
        db,
        embedder,
    };

    match cli.command {
        Command::Index { guild } => {
            let guild_id = guild
                .or(data.config.guild_id)
                .context("No guild given and GUILD_ID is not set")?;
            let channels = discord::text_channels(&http, guild_id).await?;
            let summary = data.indexer().run(&channels).await;
            println!("{}", summary);
        }
        Command::Search {
            query,
            limit,
            channel,
            author,
        } => {
            let mut filter =
                SearchFilter::default().with_limit(limit.unwrap_or(data.config.search_limit));
            for id in channel {
                filter = filter.with_channel(id);
            }
            for id in author {
                filter = filter.with_author(id);
            }
            let results = data.search().search(&query, filter).await?;
            print_records(&results);
        }
        Command::History { user_id, limit } => {
            let limit = limit.unwrap_or(data.config.user_history_limit);
            let history = data.search().user_history(user_id, limit).await?;
            print_records(&history);
        }
        Command::StartThread {
            thread_id,
            owner_id,
        } => {
            data.threads(bot_id(&data.config)?)
                .start_thread(thread_id, owner_id)
                .await?;
            println!("Thread {} is now owned by {}", thread_id, owner_id);
        }
        Command::Thread {
            thread_id,
            author_id,
        } => {
            let threads = data.threads(bot_id(&data.config)?);
            let source = DiscordThread::resolve(http.clone(), thread_id).await?;
            match threads
                .continue_conversation(&source, thread_id, author_id)
                .await?
            {
                Some(history) => {
                    if !history.rejected.is_empty() {
                        info!("Left out messages: {:?}", history.rejected);
                    }
                    println!("{}", serde_json::to_string_pretty(&history.turns)?);
                }
                None => println!("User {} may not continue thread {}", author_id, thread_id),
            }
        }
        Command::Prefs {
            user_id,
            occupation,
            traits,
            info,
        } => {
            let mut updates = Vec::new();
            if let Some(occupation) = occupation {
                updates.push(PreferenceUpdate::Occupation(occupation));
            }
            if let Some(traits) = traits {
                updates.push(PreferenceUpdate::Traits(parse_traits(&traits)));
            }
            if let Some(info) = info {
                updates.push(PreferenceUpdate::AdditionalInformations(info));
            }
            let prefs = data
                .db
                .run_blocking(move |db| {
                    for update in &updates {
                        db.update_user_preferences(user_id, update)?;
                    }
                    db.get_user_preferences(user_id)
                })
                .await?;

            match prefs {
                Some(prefs) => {
                    println!("occupation: {}", prefs.occupation.unwrap_or_default());
                    println!("traits: {}", prefs.traits.unwrap_or_default().join(", "));
                    println!(
                        "additional informations: {}",
                        prefs.additional_informations.unwrap_or_default()
                    );
                }
                None => println!("No preferences stored for {}", user_id),
            }
        }
    }

    Ok(())
}

fn bot_id(config: &Config) -> anyhow::Result<u64> {
    config.bot_id.context("BOT_ID must be set for thread commands")
}

fn print_records(records: &[MessageRecord]) {
    if records.is_empty() {
        println!("No messages found.");
        return;
    }
    for r in records {
        println!(
            "[{}] {} in <#{}>: {}",
            r.created_at.format("%Y-%m-%d %H:%M"),
            r.author_name,
            r.channel_id,
            r.content
        );
    }
}
