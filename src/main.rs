use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use drover_core::config::{
    AppConfig, DecisionConfig, IntentConfig, InvokeConfig, ModelConfig, StoreConfig, ToolsConfig,
};
use drover_core::traits::{Caller, EmbeddingProvider};
use drover_core::types::UserType;

use drover_agent::{
    AgentDeps, AgentRequest, AgentService, DecisionPipeline, DecisionRequest, IntentPipeline,
    ScreeningPipeline,
};
use drover_llm::ModelInvoker;
use drover_memory::{FlatIndexRetriever, HttpEmbeddingProvider, SqliteStore};
use drover_tools::ToolRegistry;

#[derive(Parser)]
#[command(name = "drover", version, about = "Customer-service agent pipelines for ride-hailing users")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "drover.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a query with the full screening → intent → decision chain
    Ask {
        #[arg(long, default_value = "0")]
        user_id: String,
        /// customer (1) or driver (2)
        #[arg(long, default_value = "customer")]
        user_type: UserType,
        /// The query (read from stdin when omitted)
        #[arg(trailing_var_arg = true)]
        query: Vec<String>,
    },
    /// Run input screening only
    Screen {
        #[arg(long, default_value = "0")]
        user_id: String,
        #[arg(trailing_var_arg = true)]
        query: Vec<String>,
    },
    /// Run intent recognition only
    Intent {
        #[arg(long, default_value = "0")]
        user_id: String,
        #[arg(long, default_value = "customer")]
        user_type: UserType,
        #[arg(trailing_var_arg = true)]
        query: Vec<String>,
    },
    /// Run the decision loop for an already known intent
    Decide {
        #[arg(long, default_value = "0")]
        user_id: String,
        /// Intent label, e.g. "coupon inquiry"
        #[arg(long)]
        intent: String,
        #[arg(trailing_var_arg = true)]
        query: Vec<String>,
    },
    /// Manage the forbidden word list
    Words {
        #[command(subcommand)]
        action: WordsAction,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum WordsAction {
    /// Add one or more words
    Add { words: Vec<String> },
    /// Remove a word
    Remove { word: String },
    /// List all words
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("drover=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "drover", &mut io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;
    let store = Arc::new(open_store(&config)?);

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Words { action } => match action {
            WordsAction::Add { words } => {
                for word in words {
                    if store.add_word(&word)? {
                        println!("added: {}", word.trim());
                    } else {
                        println!("skipped: {}", word.trim());
                    }
                }
            }
            WordsAction::Remove { word } => {
                if store.remove_word(&word)? {
                    println!("removed: {}", word.trim());
                } else {
                    println!("not found: {}", word.trim());
                }
            }
            WordsAction::List => {
                let words = store.words()?;
                if words.is_empty() {
                    println!("No forbidden words.");
                }
                for word in words {
                    println!("{}", word);
                }
            }
        },
        Commands::Ask {
            user_id,
            user_type,
            query,
        } => {
            let deps = AgentDeps {
                model: model_invoker(&config),
                words: store.clone(),
                store,
                embedder: embedder(&config)?,
                retriever: Arc::new(FlatIndexRetriever::from_config(&config.intent)?),
                tools: Arc::new(ToolRegistry::with_builtins(&config.tools)),
            };
            let service = AgentService::from_config(deps, &config)?;
            let response = service
                .handle(AgentRequest {
                    user_id,
                    user_type,
                    query: query_text(query),
                })
                .await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Screen { user_id, query } => {
            let pipeline = ScreeningPipeline::new(model_invoker(&config), store.clone(), store)?;
            let outcome = pipeline.run(&user_id, &query_text(query)).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "is_passed": outcome.is_passed,
                    "reason": outcome.reason,
                    "record_id": outcome.record_id,
                }))?
            );
        }
        Commands::Intent {
            user_id,
            user_type,
            query,
        } => {
            let pipeline = IntentPipeline::new(
                model_invoker(&config),
                embedder(&config)?,
                Arc::new(FlatIndexRetriever::from_config(&config.intent)?),
                store,
                &config.intent,
            )?;
            let outcome = pipeline.run(&user_id, user_type, &query_text(query)).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "is_intent_clear": outcome.is_intent_clear,
                    "output": outcome.output,
                    "cleaned_input": outcome.cleaned_input,
                    "shares": outcome.shares,
                    "record_id": outcome.record_id,
                }))?
            );
        }
        Commands::Decide {
            user_id,
            intent,
            query,
        } => {
            let pipeline = DecisionPipeline::new(
                model_invoker(&config),
                Arc::new(ToolRegistry::with_builtins(&config.tools)),
                store,
                config.decision.max_iterations,
            )?;
            let outcome = pipeline
                .run(DecisionRequest {
                    user_info: json!({ "user_id": user_id }),
                    user_id,
                    user_query: query_text(query),
                    intent,
                    chat_history: String::new(),
                })
                .await?;
            println!("{}", outcome.final_answer);
            for (i, observation) in outcome.observations.iter().enumerate() {
                info!(step = i + 1, %observation, "Observation");
            }
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

/// Joined trailing args, or all of stdin when none were given.
fn query_text(args: Vec<String>) -> String {
    let text = args.join(" ");
    if !text.is_empty() {
        return text;
    }
    io::stdin()
        .lock()
        .lines()
        .map_while(|l| l.ok())
        .collect::<Vec<_>>()
        .join("\n")
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    if let Some(home) = dirs_home().map(|h| h.join(".drover").join("config.toml")) {
        if home.exists() {
            info!(path = %home.display(), "Loading config from home directory");
            return Ok(AppConfig::load(&home)?);
        }
    }
    eprintln!("Warning: No config file found. Set OPENAI_API_KEY or create drover.toml");
    eprintln!("See drover.toml.example for reference.");
    Ok(create_env_config())
}

/// Minimal config from the environment: an OpenAI-compatible endpoint and
/// defaults everywhere else.
fn create_env_config() -> AppConfig {
    let base_url = std::env::var("DROVER_BASE_URL").ok();
    let model_id = std::env::var("DROVER_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

    AppConfig {
        model: ModelConfig {
            provider: "openai".to_string(),
            model_id,
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url,
            max_tokens: 4096,
            temperature: 0.0,
        },
        invoke: InvokeConfig::default(),
        store: StoreConfig::default(),
        intent: IntentConfig::default(),
        decision: DecisionConfig::default(),
        embedding: None,
        tools: ToolsConfig::default(),
    }
}

fn open_store(config: &AppConfig) -> anyhow::Result<SqliteStore> {
    if config.store.path == ":memory:" {
        return Ok(SqliteStore::in_memory()?);
    }
    Ok(SqliteStore::open(&config.store_path())?)
}

fn model_invoker(config: &AppConfig) -> ModelInvoker {
    let caller: Arc<dyn Caller> = drover_llm::create_caller(&config.model);
    ModelInvoker::from_config(caller, &config.invoke)
}

fn embedder(config: &AppConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match &config.embedding {
        Some(embedding) => Ok(Arc::new(HttpEmbeddingProvider::from_config(embedding))),
        None => anyhow::bail!("intent recognition needs an [embedding] section in the config"),
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
