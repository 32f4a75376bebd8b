//! Parley binary: wires the hosted clients together and runs the server or
//! the terminal chat client.

mod cli;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use parley_api::{start_server, AppState};
use parley_avatar::{AvatarHandle, BroadcastMediaSink, HeyGenClient, SessionOptions};
use parley_core::config::{ApiKeys, ParleyConfig};
use parley_core::types::Sender;
use parley_rag::{LlamaCloudRetriever, OpenAiCompletion, RagChatEngine};
use parley_ui::{ChatController, HttpChatTransport};

use cli::{resolve_port, CliArgs, Command};

type BoxError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = CliArgs::parse();
    let config_file = args.resolve_config_path();
    let loaded = ParleyConfig::load(&config_file);
    let config = loaded.as_ref().cloned().unwrap_or_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(args.resolve_log_filter(&config.general.log_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match &loaded {
        Ok(_) => tracing::info!(path = %config_file.display(), "Configuration loaded"),
        Err(e) if config_file.exists() => {
            tracing::warn!(path = %config_file.display(), error = %e, "Config unreadable; using defaults")
        }
        Err(_) => tracing::info!(path = %config_file.display(), "No config file; using defaults"),
    }

    match args.command.clone().unwrap_or_default() {
        Command::Serve { port, host } => serve(config, port, host).await,
        Command::Chat { url, as_other } => chat(&config, url, as_other).await,
        Command::InitConfig { force } => init_config(&config_file, force),
    }
}

async fn serve(mut config: ParleyConfig, port: Option<u16>, host: Option<String>) -> Result<(), BoxError> {
    tracing::info!("Starting Parley v{}", env!("CARGO_PKG_VERSION"));

    config.general.port = resolve_port(port, config.general.port);
    if let Some(host) = host {
        config.general.host = host;
    }

    let keys = ApiKeys::from_env();

    let retriever = LlamaCloudRetriever::new(&config.retrieval, keys.llama_cloud.clone())?;
    let completion = OpenAiCompletion::new(&config.completion, keys.openai.clone())?;
    tracing::info!(
        index = %config.retrieval.index_name,
        project = %config.retrieval.project_name,
        model = %config.completion.model,
        "RAG clients ready"
    );
    let engine = RagChatEngine::from_config(&config, Arc::new(retriever), Arc::new(completion));

    let mut state = AppState::new(config.clone(), engine);

    if config.avatar.enabled {
        let client = HeyGenClient::new(&config.avatar, keys.heygen.clone())?;
        let media = Arc::new(BroadcastMediaSink::default());
        let handle = AvatarHandle::spawn(
            Arc::new(client),
            media.clone(),
            SessionOptions::from(&config.avatar),
        );
        state = state.with_avatar(handle, media);
        tracing::info!(avatar = %config.avatar.avatar_name, "Avatar support enabled");
    }

    tracing::info!(
        "Chat page at http://{}:{}/",
        config.general.host,
        config.general.port
    );
    start_server(&config, state).await?;
    Ok(())
}

async fn chat(config: &ParleyConfig, url: Option<String>, as_other: bool) -> Result<(), BoxError> {
    let base_url = url.unwrap_or_else(|| {
        format!(
            "http://{}:{}",
            config.general.host,
            resolve_port(None, config.general.port)
        )
    });
    let transport = HttpChatTransport::new(&base_url, config.completion.timeout_secs)?;
    let controller = ChatController::new(Arc::new(transport));
    if as_other {
        controller.set_sender(Sender::Other);
    }

    println!("Chatting with {} (/user, /other to switch sender, /quit to exit)", base_url);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/quit" | "/exit" => break,
            "/user" => controller.set_sender(Sender::User),
            "/other" => controller.set_sender(Sender::Other),
            _ => match controller.submit(&line).await {
                Some(reply) => println!("[{}] {}", reply.sender, reply.content),
                None if !line.trim().is_empty() => println!("(no reply)"),
                None => {}
            },
        }
    }
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<(), BoxError> {
    if path.exists() && !force {
        tracing::warn!(path = %path.display(), "Config file exists; pass --force to overwrite");
        return Ok(());
    }
    ParleyConfig::default().save(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
