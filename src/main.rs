//! RepoBots - chat bots that know a code repository
//!
//! A CLI front end that plays the messaging substrate: lines typed on stdin
//! become inbound messages for one bot, and everything the bot emits is
//! printed to stdout.
//!
//! Exit codes:
//!   0 - Session ended normally
//!   1 - Runtime error (bad config, unknown bot, model client setup, etc.)

mod agent;
mod bots;
mod cli;
mod config;
mod llm;
mod memory;
mod models;
mod scanner;

use anyhow::{Context, Result};
use bots::{BotContext, BotRegistry};
use cli::Args;
use config::{Config, CONFIG_FILE_NAME};
use models::{Conversation, Message, MessageKind, Originator, OutboundMessage};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// What the user sees when a bot fails.
const FAILURE_REPLY: &str = "Something went wrong while handling your message.";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("RepoBots v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    // Exit explicitly: a pending stdin read would otherwise hold the runtime open
    match run(args).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("RepoBots failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .repobots.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to choose the provider, models, repository and agent limits.");
    Ok(())
}

/// Initialize logging based on verbosity settings. `RUST_LOG` wins when set.
fn init_logging(args: &Args) {
    let builder = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let result = match EnvFilter::try_from_default_env() {
        Ok(filter) => tracing::subscriber::set_global_default(builder.with_env_filter(filter).finish()),
        Err(_) => tracing::subscriber::set_global_default(
            builder.with_max_level(args.log_level()).finish(),
        ),
    };
    result.expect("Failed to set tracing subscriber");
}

async fn run(args: Args) -> Result<()> {
    let registry = bots::default_registry();

    if args.list_bots {
        print_bots(&registry);
        return Ok(());
    }

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let handle = config.general.default_bot.clone();
    if registry.get(&handle).is_none() {
        anyhow::bail!(
            "Unknown bot '{}'. Use --list-bots to see the available handles.",
            handle
        );
    }

    let feedback = config.agent.human_feedback;
    let originator = Originator::new(config.general.user_name.clone());
    let ctx = BotContext::from_config(config)?;
    info!(
        "Talking to {} about {}",
        handle,
        ctx.scanner.repo_root().display()
    );

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let conversation = Conversation::new(outbound_tx, inbound_rx);
    let printer = tokio::spawn(print_outbound(outbound_rx));

    match args.message {
        Some(text) => {
            let first = Arc::new(Message::new(originator, text));
            inbound_tx
                .send(first.as_ref().clone())
                .context("Inbound channel closed")?;
            // Feedback replies still come from stdin
            if feedback {
                tokio::spawn(read_stdin(inbound_tx, first.originator.clone(), Some(first)));
            } else {
                drop(inbound_tx);
            }
            serve(&registry, &ctx, &conversation, &handle, true).await;
        }
        None => {
            println!("💬 Talking to {}. Type /reset to start over, /quit to leave.", handle);
            tokio::spawn(read_stdin(inbound_tx, originator, None));
            serve(&registry, &ctx, &conversation, &handle, false).await;
        }
    }

    drop(conversation);
    printer.await.context("Printer task failed")?;
    Ok(())
}

/// Feed inbound messages to the bot until the channel closes.
async fn serve(
    registry: &BotRegistry,
    ctx: &BotContext,
    conversation: &Conversation,
    handle: &str,
    once: bool,
) {
    while let Some(message) = conversation.next_inbound().await {
        if let Err(e) = registry.dispatch(handle, ctx, &message, conversation).await {
            error!("{:#}", e);
            if conversation
                .send(OutboundMessage::final_response(handle, &message, FAILURE_REPLY))
                .is_err()
            {
                warn!("Could not report the failure: outbound channel closed");
            }
        }
        if once {
            break;
        }
    }
    debug!("Dispatcher stopped");
}

/// Turn stdin lines into inbound messages of one conversation.
async fn read_stdin(
    inbound: mpsc::UnboundedSender<Message>,
    originator: Originator,
    mut last: Option<Arc<Message>>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                break;
            }
        };

        let message = match line.trim() {
            "/quit" => break,
            "/reset" => {
                last = None;
                Message::new(originator.clone(), "")
            }
            _ => match last.take() {
                Some(previous) => Message::follow_up(previous, line),
                None => Message::new(originator.clone(), line),
            },
        };

        if !message.is_reset() {
            last = Some(Arc::new(message.clone()));
        }
        if inbound.send(message).is_err() {
            break;
        }
    }
    debug!("Stdin reader stopped");
}

/// Print bot output as it arrives.
async fn print_outbound(mut outbound: mpsc::UnboundedReceiver<OutboundMessage>) {
    while let Some(message) = outbound.recv().await {
        match message.kind {
            MessageKind::Interim => println!("⏳ {}: {}", message.sender, message.content),
            MessageKind::Service { .. } => println!("ℹ️  {}: {}", message.sender, message.content),
            MessageKind::Final => println!("\n🤖 {}:\n{}\n", message.sender, message.content),
        }
        if message.kind.ends_turn() {
            debug!("Turn ended ({})", message.kind);
        }
    }
}

fn print_bots(registry: &BotRegistry) {
    println!("Available bots:\n");
    for bot in registry.list() {
        println!("  {:<16} {}", bot.handle(), bot.description());
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE_NAME);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {:#}", e);
            Ok(Config::default())
        }
    }
}
