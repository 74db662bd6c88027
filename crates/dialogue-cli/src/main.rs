mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};

use dialogue_core::{
    ChatMessage, Conversation, ConversationStore, InboundEvent, MessageSegment, NewConversation,
    Notifier, Role,
};
use dialogue_memory::{CompactionEngine, CompactionStatus};
use dialogue_storage::create_store;

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "infinite-dialogue")]
#[command(version, about = "Keep long conversations going by compacting their history")]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append a message to the origin's current conversation
    Append {
        #[arg(long)]
        origin: String,
        #[arg(long, value_enum, default_value_t = RoleArg::User)]
        role: RoleArg,
        #[arg(long)]
        content: String,
    },
    /// Print the origin's current history
    Show {
        #[arg(long)]
        origin: String,
    },
    /// Run the compaction engine for one inbound message
    Compact {
        #[arg(long)]
        origin: String,
        #[arg(long)]
        group_id: Option<String>,
        #[arg(long)]
        sender_id: Option<String>,
        #[arg(long)]
        message: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RoleArg {
    User,
    Assistant,
    System,
}

impl From<RoleArg> for Role {
    fn from(value: RoleArg) -> Self {
        match value {
            RoleArg::User => Role::User,
            RoleArg::Assistant => Role::Assistant,
            RoleArg::System => Role::System,
        }
    }
}

struct StdoutNotifier;

#[async_trait]
impl Notifier for StdoutNotifier {
    async fn send(&self, origin: &str, chain: Vec<MessageSegment>) -> dialogue_core::Result<()> {
        let text: String = chain.iter().filter_map(MessageSegment::as_text).collect();
        println!("[{}] {}", origin, text);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    let store = create_store(&config.storage()?)
        .await
        .context("Failed to open conversation store")?;

    match cli.command {
        Command::Append {
            origin,
            role,
            content,
        } => {
            let mut conversation = current_or_new(store.as_ref(), &origin).await?;
            conversation.push_message(ChatMessage::new(role.into(), content))?;
            persist(store.as_ref(), &conversation).await?;
            println!(
                "{} now has {} messages",
                conversation.id,
                conversation.messages()?.len()
            );
        }
        Command::Show { origin } => {
            let Some(id) = store.current_conversation_id(&origin).await? else {
                println!("No conversation for {}", origin);
                return Ok(());
            };
            let conversation = store
                .get_conversation(&origin, &id)
                .await?
                .with_context(|| format!("Conversation {} is missing", id))?;
            println!("# {} ({})", origin, conversation.id);
            for message in conversation.messages()? {
                print!("{}", message.transcript_line());
            }
        }
        Command::Compact {
            origin,
            group_id,
            sender_id,
            message,
        } => {
            let registry = config.build_registry()?;
            let engine = CompactionEngine::new(
                config.compaction.clone(),
                store.clone(),
                Arc::new(registry),
                Arc::new(StdoutNotifier),
            );

            let mut event = InboundEvent::with_text(origin, message);
            event.group_id = group_id;
            event.sender_id = sender_id;

            let status = engine.handle_event(&mut event).await;
            print_status(&status);
            println!("{}", event.message_str);
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn current_or_new(store: &dyn ConversationStore, origin: &str) -> Result<Conversation> {
    if let Some(id) = store.current_conversation_id(origin).await? {
        if let Some(conversation) = store.get_conversation(origin, &id).await? {
            return Ok(conversation);
        }
    }

    match store.new_conversation(origin).await? {
        NewConversation::Handle(conversation) => Ok(conversation),
        NewConversation::Id(id) => store
            .get_conversation(origin, &id)
            .await?
            .with_context(|| format!("New conversation {} is missing", id)),
    }
}

async fn persist(store: &dyn ConversationStore, conversation: &Conversation) -> Result<()> {
    match store.persist(conversation).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_benign() => {
            tracing::warn!(error = %e, "Store complained while saving, continuing");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_status(status: &CompactionStatus) {
    match status {
        CompactionStatus::NotAllowed => println!("status: not in whitelist"),
        CompactionStatus::Skipped(reason) => println!("status: skipped ({:?})", reason),
        CompactionStatus::BelowThreshold { len, max } => {
            println!("status: below threshold ({}/{})", len, max)
        }
        CompactionStatus::SummaryFailed { attempts } => {
            println!("status: summary failed after {} attempts", attempts)
        }
        CompactionStatus::Compacted(result) => println!(
            "status: compacted {} messages (rotated: {}, injected: {})",
            result.messages_compacted, result.rotated, result.injected
        ),
    }
}
