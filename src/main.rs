use anyhow::Result;
use clap::Parser;
use log::{info, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;

mod utils;

use parley::client::response::{ChatInfo, ChatResponse};
use parley::engine::{ChatEngine, CliLauncher, EngineConfig};
use parley::state::ChatStore;

/// Command line arguments for Parley
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Parley: the headless core of a desktop chat client.",
    long_about = "Parley spawns a local chat engine, speaks its WebSocket command \
    protocol, and maintains the chat state a view layer renders from.\n\n\
    Without a view attached it prints incoming messages to stdout until Ctrl-C."
)]
struct Args {
    /// Chat engine binary to spawn
    #[arg(long, value_name = "BIN", default_value = "simplex-chat")]
    engine_bin: PathBuf,

    /// First port to try for the engine's WebSocket server
    #[arg(short, long, default_value_t = 5225)]
    port: u16,

    /// Engine database path (defaults to the platform data directory)
    #[arg(short, long, value_name = "PATH")]
    database: Option<PathBuf>,

    /// Display name used when the engine creates its first profile
    #[arg(long, default_value = "parley")]
    display_name: String,

    /// Log file path
    #[arg(long, value_name = "PATH", default_value = "parley.log")]
    log_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    utils::setup_logging(args.log_file.to_str(), LevelFilter::Debug)?;
    info!("Parley starting up");
    info!(
        "System information: {} {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );

    let database = args
        .database
        .unwrap_or_else(EngineConfig::default_database_path);
    if let Some(dir) = database.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let mut config = EngineConfig::new(database);
    config.binary = args.engine_bin.clone();
    config.base_port = args.port;
    config.display_name = args.display_name;

    let launcher = Arc::new(CliLauncher::new(args.engine_bin));
    let mut engine = ChatEngine::new(config, launcher);

    println!("Starting chat engine... please wait...\n");
    let client = engine.start().await?;

    let store = Arc::new(ChatStore::new(Arc::clone(&client)));
    let fold_task = store.spawn().await;
    store.bootstrap().await?;

    if let Some(user) = store.active_user().await {
        println!("Signed in as {}", user.local_display_name);
    }
    if let Some(link) = store.contact_link().await {
        println!("Invitation address:\n{}", link);
    }
    println!("Listening for messages; Ctrl-C to quit.");

    // The view layer proper is out of scope; echo pushes until Ctrl-C.
    let mut events = client.subscribe_all().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(envelope) => print_event(&envelope.resp),
                None => break,
            },
        }
    }

    fold_task.abort();
    engine.shutdown().await;
    info!("Parley shut down");
    Ok(())
}

fn print_event(resp: &ChatResponse) {
    match resp {
        ChatResponse::NewChatItems { chat_items, .. } => {
            for item in chat_items {
                if let Some(text) = item.chat_item.content.text() {
                    match &item.chat_info {
                        ChatInfo::Direct { contact } => {
                            println!("{}> {}", contact.local_display_name, text);
                        }
                        ChatInfo::Group { group_info } => {
                            println!("#{}> {}", group_info.local_display_name, text);
                        }
                        _ => {}
                    }
                }
            }
        }
        ChatResponse::ContactConnected { contact, .. } => {
            println!("* {} is now connected", contact.local_display_name);
        }
        ChatResponse::ReceivedContactRequest {
            contact_request, ..
        } => {
            println!(
                "* contact request from {}",
                contact_request.local_display_name
            );
        }
        _ => {}
    }
}
