use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tutor_controller::{
    config::Config,
    models::internal::ChatRequest,
    orchestrator::ChatOrchestrator,
    services::{
        llm_bridge_client::LlmBridgeClient, prompt_service::PromptService,
        vector_store::ChromaVectorStore, OllamaProvider,
    },
    storage::{
        self, chroma_client::ChromaClient, memory::ConversationMemory,
        InMemoryConversationMemory, SqliteConversationMemory,
    },
};

#[derive(Parser)]
#[command(name = "tutor-controller", version, about = "Course tutoring chat controller")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask one question and print the result as JSON
    Chat {
        query: String,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        mode: Option<String>,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        no_history: bool,
    },
    /// List pedagogy modes
    Modes,
    /// List sessions, most recently accessed first
    Sessions,
    /// Print a session's conversation
    History {
        session: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Delete a session
    Clear { session: String },
    /// Delete sessions idle longer than the given age
    Prune {
        #[arg(long)]
        max_age_hours: Option<u64>,
    },
    /// Check that prompts, the model bridge and the vector store are reachable
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tutor_controller={}", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let memory = build_memory(&config).await?;
    let prompts = Arc::new(PromptService::from_dir(&config.prompts_dir));

    match cli.command {
        Command::Modes => {
            for listing in prompts.list_available_modes() {
                println!(
                    "{:<12} {:<28} {}",
                    listing.mode, listing.resource_name, listing.description
                );
            }
        }
        Command::Sessions => {
            let mut sessions = memory.list_sessions().await?;
            sessions.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
            for s in sessions {
                println!(
                    "{}  {:>4} msgs  {:>7} tokens  {:<11}  {}  {}",
                    s.session_id,
                    s.message_count,
                    s.total_tokens,
                    s.pedagogy_mode,
                    s.last_accessed.to_rfc3339(),
                    s.title.as_deref().unwrap_or("-")
                );
            }
        }
        Command::History { session, limit } => {
            let rendered = memory.get_formatted_history(&session, limit).await?;
            if rendered.is_empty() {
                println!("No messages for session {}", session);
            } else {
                println!("{}", rendered);
            }
        }
        Command::Clear { session } => {
            if memory.clear_session(&session).await? {
                println!("Cleared session {}", session);
            } else {
                println!("No session {}", session);
            }
        }
        Command::Prune { max_age_hours } => {
            let hours = max_age_hours.unwrap_or(config.session_max_age_hours);
            let removed = memory.prune_old_sessions(hours).await?;
            println!("Pruned {} sessions idle for more than {}h", removed, hours);
        }
        Command::Check => run_checks(&config, &prompts).await?,
        Command::Chat {
            query,
            session,
            mode,
            top_k,
            no_history,
        } => {
            let report = prompts.preload_all_prompts().await;
            if config.strict_prompt_preload && !report.is_complete() {
                anyhow::bail!("Missing mode prompts: {:?}", report.failed);
            }

            let orchestrator = build_orchestrator(&config, memory, prompts);

            let mut request = ChatRequest::new(query);
            request.session_id = session;
            request.pedagogy_mode = mode;
            request.top_k = top_k;
            request.include_history = !no_history;

            let result = orchestrator.chat(request).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

async fn build_memory(config: &Config) -> anyhow::Result<Arc<dyn ConversationMemory>> {
    if config.uses_sqlite() {
        let pool = storage::init_db(&config.database_url).await?;
        tracing::info!("Using sqlite session memory at {}", config.database_url);
        Ok(Arc::new(SqliteConversationMemory::new(pool, config.max_sessions)))
    } else {
        tracing::info!("Using in-memory session memory (not kept between runs)");
        Ok(Arc::new(InMemoryConversationMemory::new(config.max_sessions)))
    }
}

fn build_orchestrator(
    config: &Config,
    memory: Arc<dyn ConversationMemory>,
    prompts: Arc<PromptService>,
) -> ChatOrchestrator {
    let provider = Arc::new(OllamaProvider::new(
        config.ollama_url.clone(),
        config.embedding_model.clone(),
    ));
    let chroma = Arc::new(ChromaClient::new(config.chroma_url.clone()));
    let vector_store = Arc::new(ChromaVectorStore::new(
        provider,
        chroma,
        config.chroma_collection.clone(),
        config.embedding_dim,
    ));
    let model = Arc::new(
        LlmBridgeClient::new(config.llm_bridge_url.clone()).with_model(config.chat_model.clone()),
    );

    ChatOrchestrator::new(memory, vector_store, model, prompts, config.chat_settings())
}

async fn run_checks(config: &Config, prompts: &PromptService) -> anyhow::Result<()> {
    let mut healthy = true;

    let report = prompts.preload_all_prompts().await;
    for mode in &report.loaded {
        println!("ok    prompt {}", mode);
    }
    for (mode, reason) in &report.failed {
        healthy = false;
        println!("FAIL  prompt {}: {}", mode, reason);
    }

    let bridge = LlmBridgeClient::new(config.llm_bridge_url.clone());
    match bridge.health_check().await {
        Ok(true) => println!("ok    llm bridge {}", config.llm_bridge_url),
        Ok(false) => {
            healthy = false;
            println!("FAIL  llm bridge {}: unhealthy", config.llm_bridge_url);
        }
        Err(e) => {
            healthy = false;
            println!("FAIL  llm bridge {}: {}", config.llm_bridge_url, e);
        }
    }

    let chroma = ChromaClient::new(config.chroma_url.clone());
    match chroma.ping().await {
        Ok(()) => println!("ok    chroma {}", config.chroma_url),
        Err(e) => {
            healthy = false;
            println!("FAIL  chroma {}: {}", config.chroma_url, e);
        }
    }

    if !healthy {
        anyhow::bail!("One or more checks failed");
    }
    Ok(())
}
