//! Message-driven bots.
//!
//! A bot receives one inbound [`Message`] and answers through the
//! [`Conversation`] it is handed. Bots are registered by handle in a
//! [`BotRegistry`] built at start-up.

pub mod list_repo;
pub mod read_file;
pub mod repo_inspector;

pub use list_repo::ListRepoBot;
pub use read_file::ReadFileBot;
pub use repo_inspector::RepoInspectorBot;

use crate::config::Config;
use crate::llm::{build_chat_model, ChatModel};
use crate::memory::{build_embedder, Embedder};
use crate::models::{Conversation, Message};
use crate::scanner::{FileScanner, ScanConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Shared resources every bot can use.
#[derive(Clone)]
pub struct BotContext {
    pub config: Config,
    pub chat: Arc<dyn ChatModel>,
    pub embedder: Arc<dyn Embedder>,
    pub scanner: FileScanner,
}

impl BotContext {
    /// Build the model clients and repository scanner from configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        let chat = build_chat_model(&config.model).context("Failed to create model client")?;
        let embedder =
            build_embedder(&config.model, &config.memory).context("Failed to create embedder")?;
        let scanner = FileScanner::new(
            config.repo.root_dir.clone(),
            ScanConfig::from(&config.repo),
        );

        info!(
            "Using {} backend (fast: {}, slow: {}), embedder: {}",
            chat.backend(),
            config.model.fast_model,
            config.model.slow_model,
            embedder.display_name()
        );

        Ok(Self {
            config,
            chat,
            embedder,
            scanner,
        })
    }
}

/// A message handler.
#[async_trait]
pub trait Bot: Send + Sync {
    /// Unique handle users address the bot by.
    fn handle(&self) -> &str;

    fn description(&self) -> &str;

    /// Answer `message`. Every call ends with a turn-ending message on
    /// `conversation` unless it returns an error.
    async fn fulfill(
        &self,
        ctx: &BotContext,
        message: &Message,
        conversation: &Conversation,
    ) -> Result<()>;
}

/// Handle-keyed table of bots.
#[derive(Default)]
pub struct BotRegistry {
    bots: HashMap<String, Arc<dyn Bot>>,
}

impl BotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bot, replacing any bot with the same handle.
    pub fn register(&mut self, bot: Arc<dyn Bot>) {
        let handle = bot.handle().to_string();
        info!(bot = %handle, "Registered bot");
        self.bots.insert(handle, bot);
    }

    pub fn get(&self, handle: &str) -> Option<&Arc<dyn Bot>> {
        self.bots.get(handle)
    }

    /// All bots, sorted by handle.
    pub fn list(&self) -> Vec<Arc<dyn Bot>> {
        let mut bots: Vec<_> = self.bots.values().cloned().collect();
        bots.sort_by(|a, b| a.handle().cmp(b.handle()));
        bots
    }

    /// Route `message` to the bot registered under `handle`.
    pub async fn dispatch(
        &self,
        handle: &str,
        ctx: &BotContext,
        message: &Message,
        conversation: &Conversation,
    ) -> Result<()> {
        let bot = self
            .get(handle)
            .with_context(|| format!("No bot registered under handle '{}'", handle))?;

        debug!(
            bot = %handle,
            message = %message.id,
            sent_at = %message.created_at,
            fields = message.custom_fields.len(),
            "Dispatching message"
        );
        bot.fulfill(ctx, message, conversation)
            .await
            .with_context(|| format!("Bot '{}' failed to handle message", handle))
    }
}

/// Registry with every built-in bot.
pub fn default_registry() -> BotRegistry {
    let mut registry = BotRegistry::new();
    registry.register(Arc::new(ListRepoBot));
    registry.register(Arc::new(ReadFileBot));
    registry.register(Arc::new(RepoInspectorBot));
    registry
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use crate::models::testing::TestConversation;
    use crate::models::{MessageKind, Originator};
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_default_registry_handles() {
        let registry = default_registry();
        let handles: Vec<String> = registry
            .list()
            .iter()
            .map(|b| b.handle().to_string())
            .collect();
        assert_eq!(handles, vec!["ListRepoTool", "ReadFileBot", "RepoInspector"]);
        assert!(registry.get("RepoInspector").is_some());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_handle() {
        let dir = TempDir::new().unwrap();
        let ctx = testing::context(dir.path(), Arc::new(ScriptedModel::default()));
        let conv = TestConversation::new();
        let message = Message::new(Originator::new("gina"), "hello");

        let err = assert_err!(
            default_registry()
                .dispatch("NoSuchBot", &ctx, &message, &conv.conversation)
                .await
        );
        assert!(err.to_string().contains("NoSuchBot"));
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_handle() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        let ctx = testing::context(dir.path(), Arc::new(ScriptedModel::default()));
        let mut conv = TestConversation::new();
        let message = Message::new(Originator::new("gina"), "what is in here?");

        assert_ok!(
            default_registry()
                .dispatch("ListRepoTool", &ctx, &message, &conv.conversation)
                .await
        );

        let sent = conv.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, MessageKind::Final);
        assert_eq!(sent[0].sender, "ListRepoTool");
    }
}
