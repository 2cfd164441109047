use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use prefrank::catalog::Candidate;
use prefrank::cli::{CacheAction, Cli, Commands, ConfigAction, DbAction};
use prefrank::config::Config;
use prefrank::embedding::{FastEmbedProvider, PhraseEmbeddingStore, PhraseStoreCell};
use prefrank::error::{PrefrankError, Result};
use prefrank::filtering::FilterSet;
use prefrank::ranking::{EngineSettings, RankingEngine, RankingRequest};
use prefrank::scoring::{LexicalVectorCache, LexicalVectorizer};
use prefrank::storage::{
    CandidateStore, Database, DatabaseOptions, OrderSpec, SortField, SqliteCandidateStore,
};

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Handle commands
    match cli.command {
        Commands::Rank {
            request,
            profile,
            compact,
        } => {
            cmd_rank(cli.config, request, profile, compact)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
        Commands::Cache { action } => {
            cmd_cache(cli.config, action)?;
        }
        Commands::Db { action } => {
            cmd_db(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "prefrank=debug" } else { "prefrank=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Logs go to stderr so JSON output on stdout stays clean
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_rank(
    config_path: Option<PathBuf>,
    request_path: Option<PathBuf>,
    profile: Option<String>,
    compact: bool,
) -> Result<()> {
    let config = load_config(config_path, profile)?;
    let request = read_request(request_path.as_deref())?;

    let database = open_database(&config)?;
    let store = SqliteCandidateStore::new(Arc::clone(&database))
        .with_make_model_cap(config.search.max_per_make_model);
    // Neither phrases nor the model are loaded unless the request reaches coverage-risk
    let provider = FastEmbedProvider::new(&config.embedding.model, config.embedding.batch_size)?;
    let settings = EngineSettings::from_config(&config)?;
    let phrase_db = Arc::clone(&database);
    let dimension = config.embedding.dimension;

    let engine = RankingEngine::with_deferred_phrases(
        Arc::new(store),
        Arc::new(PhraseStoreCell::new()),
        move || PhraseEmbeddingStore::load(&phrase_db, dimension),
        Arc::new(provider),
        settings,
    )
    .with_lexical_cache(Arc::new(LexicalVectorCache::new(database)));

    let response = engine.rank(&request)?;
    let json = if compact {
        serde_json::to_string(&response)
    } else {
        serde_json::to_string_pretty(&response)
    }
    .map_err(|e| PrefrankError::Json {
        source: e,
        context: "Failed to serialize ranking response".to_string(),
    })?;

    println!("{}", json);
    Ok(())
}

fn read_request(path: Option<&Path>) -> Result<RankingRequest> {
    let content = match path {
        Some(path) => std::fs::read_to_string(path).map_err(|e| PrefrankError::Io {
            source: e,
            context: format!("Failed to read request file: {:?}", path),
        })?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| PrefrankError::Io {
                    source: e,
                    context: "Failed to read request from stdin".to_string(),
                })?;
            buf
        }
    };

    serde_json::from_str(&content).map_err(|e| PrefrankError::Json {
        source: e,
        context: "Failed to parse ranking request".to_string(),
    })
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, None)?;
            let json = serde_json::to_string_pretty(&config).map_err(|e| PrefrankError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
        ConfigAction::Path => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };
            println!("{}", path.display());
        }
    }

    Ok(())
}

fn cmd_cache(config_path: Option<PathBuf>, action: CacheAction) -> Result<()> {
    let config = load_config(config_path, None)?;
    let database = open_database(&config)?;
    let cache = LexicalVectorCache::new(Arc::clone(&database));

    match action {
        CacheAction::Rebuild => {
            let store = SqliteCandidateStore::new(database);
            let candidates = store.search(
                &FilterSet::new(),
                u32::MAX,
                &OrderSpec::asc(SortField::Id),
                None,
            )?;
            let written = cache.rebuild(&candidates, &LexicalVectorizer::new())?;
            println!("✓ Rebuilt {} lexical vectors", written);
        }
        CacheAction::Stats => {
            println!("Lexical vectors: {}", cache.len()?);
        }
    }

    Ok(())
}

fn cmd_db(config_path: Option<PathBuf>, action: DbAction) -> Result<()> {
    let config = load_config(config_path, None)?;
    let database = open_database(&config)?;

    match action {
        DbAction::Stats => {
            let stats = database.stats()?;
            println!("Database: {}", config.database_path().display());
            println!("  Candidates:       {}", stats.candidate_count);
            println!("  Phrase vehicles:  {}", stats.phrase_vehicle_count);
            println!("  Review phrases:   {}", stats.phrase_count);
            println!("  Lexical vectors:  {}", stats.lexical_vector_count);
        }
        DbAction::Import { file } => {
            let content = std::fs::read_to_string(&file).map_err(|e| PrefrankError::Io {
                source: e,
                context: format!("Failed to read candidate file: {:?}", file),
            })?;
            let candidates: Vec<Candidate> =
                serde_json::from_str(&content).map_err(|e| PrefrankError::Json {
                    source: e,
                    context: "Failed to parse candidate array".to_string(),
                })?;
            let written = database.upsert_candidates(&candidates)?;
            println!("✓ Imported {} candidates", written);
        }
    }

    Ok(())
}

fn open_database(config: &Config) -> Result<Arc<Database>> {
    let options = DatabaseOptions {
        pool_size: config.storage.pool_size,
        busy_timeout_ms: config.storage.busy_timeout_ms,
    };
    Ok(Arc::new(Database::with_options(
        &config.database_path(),
        options,
    )?))
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'prefrank config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        return Ok(config);
    }

    if let Some(profile) = profile {
        Config::load_with_profile(&path, &profile)
    } else {
        Config::load(&path)
    }
}
