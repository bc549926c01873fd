//! Command-line front end for gamerec.
//!
//! Usage:
//!     gamerec recommend 76561198120441502 --count 10
//!     gamerec profile 76561198120441502
//!     gamerec library 76561198120441502 --output data/interactions.csv
//!     gamerec inspect

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use gamerec_backend_steam::{ProfileLookup, SteamClient, SteamConfig, UserProfile};
use gamerec_engine::{ColdStartPolicy, DataPaths, RecommendationView, Recommender, RecommenderConfig};
use gamerec_model::InteractionRecord;
use gamerec_scorer::{ModelExpectations, ScorerConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gamerec")]
#[command(about = "Personalized game recommendations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Interaction table (user_id,item_id[,strength])
    #[arg(long, env = "GAMEREC_INTERACTIONS", default_value = "data/interactions.csv")]
    interactions: PathBuf,

    /// Item catalog (item_id,title,image_url,price)
    #[arg(long, env = "GAMEREC_CATALOG", default_value = "data/catalog.csv")]
    catalog: PathBuf,

    /// Trained model artifact (JSON)
    #[arg(long, env = "GAMEREC_MODEL", default_value = "data/model.json")]
    model: PathBuf,

    /// Required embedding width of the model artifact
    #[arg(long)]
    embedding_dim: Option<usize>,

    /// Steam Web API key
    #[arg(long, env = "STEAM_API_KEY", hide_env_values = true)]
    steam_api_key: Option<String>,

    /// Steam Web API URL
    #[arg(long, default_value = "https://api.steampowered.com")]
    steam_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Recommend games for a Steam user
    Recommend {
        /// Steam id (64-bit)
        user_id: String,

        /// Number of games to recommend
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Size of the top-scored pool to sample from
        #[arg(short, long, default_value = "30")]
        pool: usize,

        /// Seed for reproducible sampling
        #[arg(long)]
        seed: Option<u64>,

        /// How users without history are served
        #[arg(long, value_enum, default_value = "head")]
        cold_start: ColdStartArg,

        /// Also show the user's Steam profile
        #[arg(long)]
        with_profile: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show a Steam user's public profile
    Profile {
        /// Steam id (64-bit)
        user_id: String,
    },

    /// Export a user's owned games as interaction rows
    Library {
        /// Steam id (64-bit)
        user_id: String,

        /// CSV file to write (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only games played in the last two weeks, weighted by recent playtime
        #[arg(long)]
        recent: bool,
    },

    /// Load the model and check it against the catalog
    Inspect,
}

#[derive(Clone, Copy, ValueEnum)]
enum ColdStartArg {
    Head,
    Shuffle,
}

impl From<ColdStartArg> for ColdStartPolicy {
    fn from(arg: ColdStartArg) -> Self {
        match arg {
            ColdStartArg::Head => ColdStartPolicy::Head,
            ColdStartArg::Shuffle => ColdStartPolicy::Shuffle,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    profile: Option<&'a UserProfile>,
    recommendations: &'a RecommendationView,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gamerec=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let paths = DataPaths {
        interactions: cli.interactions.clone(),
        catalog: cli.catalog.clone(),
        model: cli.model.clone(),
    };
    let scorer_config = ScorerConfig {
        expectations: ModelExpectations {
            embedding_dim: cli.embedding_dim,
            ..Default::default()
        },
        ..Default::default()
    };

    match &cli.command {
        Commands::Recommend {
            user_id,
            count,
            pool,
            seed,
            cold_start,
            with_profile,
            format,
        } => {
            let config = RecommenderConfig {
                pool_size: *pool,
                cold_start: (*cold_start).into(),
                ..Default::default()
            };
            let engine = open_engine(&paths, config, scorer_config)?;
            let count = count.unwrap_or(config.default_output_size);

            let profile = if *with_profile {
                fetch_profile(&cli, user_id).await
            } else {
                None
            };

            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(*seed),
                None => StdRng::from_entropy(),
            };
            let view = engine
                .recommend_view(user_id, count, &mut rng)
                .with_context(|| format!("Could not recommend games for {user_id}"))?;

            match format {
                OutputFormat::Json => {
                    let output = JsonOutput {
                        profile: profile.as_ref(),
                        recommendations: &view,
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Text => {
                    if let Some(profile) = &profile {
                        print_profile(profile);
                        println!("---");
                    }
                    println!("{}", view.headline);
                    for line in view.render_lines() {
                        println!("{line}");
                    }
                }
            }
        }
        Commands::Profile { user_id } => {
            let client = steam_client(&cli)?;
            let profile = client.lookup(user_id).await?;
            print_profile(&profile);
        }
        Commands::Library { user_id, output, recent } => {
            let client = steam_client(&cli)?;
            let records = if *recent {
                client.recent_games(user_id).await?
            } else {
                client.owned_games(user_id).await?
            };
            tracing::info!(user_id = %user_id, games = records.len(), recent = *recent, "Fetched games");

            match output {
                Some(path) => {
                    let writer = csv::Writer::from_path(path)
                        .with_context(|| format!("Could not create {}", path.display()))?;
                    write_records(writer, &records)?;
                    println!("Wrote {} rows to {}", records.len(), path.display());
                }
                None => write_records(csv::Writer::from_writer(std::io::stdout()), &records)?,
            }
        }
        Commands::Inspect => {
            run_inspect(&paths, scorer_config)?;
        }
    }

    Ok(())
}

/// Load tables and model up front so a bad artifact fails at startup.
fn open_engine(paths: &DataPaths, config: RecommenderConfig, scorer_config: ScorerConfig) -> Result<Recommender> {
    let engine = Recommender::from_paths(paths, config, scorer_config)?;
    engine
        .warm_up()
        .with_context(|| format!("Could not load model {}", paths.model.display()))?;
    Ok(engine)
}

fn steam_client(cli: &Cli) -> Result<SteamClient> {
    let api_key = cli
        .steam_api_key
        .clone()
        .context("A Steam API key is required (set STEAM_API_KEY or pass --steam-api-key)")?;
    let client = SteamClient::new(SteamConfig {
        base_url: cli.steam_url.clone(),
        api_key,
        ..Default::default()
    })?;
    Ok(client)
}

/// Profile lookup is display-only; failures are logged, not fatal.
async fn fetch_profile(cli: &Cli, user_id: &str) -> Option<UserProfile> {
    let client = match steam_client(cli) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping profile lookup");
            return None;
        }
    };
    match client.lookup(user_id).await {
        Ok(profile) => Some(profile),
        Err(e) => {
            tracing::warn!(backend = client.name(), error = %e, "Profile lookup failed");
            None
        }
    }
}

fn write_records<W: std::io::Write>(mut writer: csv::Writer<W>, records: &[InteractionRecord]) -> Result<()> {
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

fn print_profile(profile: &UserProfile) {
    println!("User:    {}", profile.display_name);
    println!("Profile: {}", profile.profile_url);
    match profile.created_at {
        Some(created) => println!("Joined:  {}", created.format("%Y-%m-%d")),
        None => println!("Joined:  (private)"),
    }
}

fn run_inspect(paths: &DataPaths, scorer_config: ScorerConfig) -> Result<()> {
    let engine = open_engine(paths, RecommenderConfig::default(), scorer_config)?;
    let model = engine.scorer().get()?;
    let catalog = engine.catalog();

    println!("Model:   {}", paths.model.display());
    println!("  embedding dim: {}", model.embedding_dim());
    println!("  users:         {}", model.num_users());
    println!("  items:         {}", model.num_items());

    let missing: Vec<_> = catalog
        .item_ids()
        .iter()
        .copied()
        .filter(|&id| !model.contains_item(id))
        .collect();
    println!("Catalog: {} items", catalog.len());
    if missing.is_empty() {
        println!("  all catalog items are covered by the model");
    } else {
        println!(
            "  {} catalog items are outside the model: {:?}",
            missing.len(),
            &missing[..missing.len().min(10)]
        );
        std::process::exit(1);
    }

    Ok(())
}
