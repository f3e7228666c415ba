//! Answers questions about the repository by running the inspector agent.
//!
//! Each message starts a fresh agent with its own memory. A blank message
//! only acknowledges the conversation reset.

use super::{Bot, BotContext};
use crate::agent::{
    AgentConfig, HumanInputTool, InspectorAgent, ListRepoTool, ReadFileTool, Tool, ToolRegistry,
};
use crate::memory::MemoryStore;
use crate::models::{Conversation, Message, OutboundMessage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

const HANDLE: &str = "RepoInspector";

/// Runs the autonomous inspector agent with the message as its goal.
pub struct RepoInspectorBot;

#[async_trait]
impl Bot for RepoInspectorBot {
    fn handle(&self) -> &str {
        HANDLE
    }

    fn description(&self) -> &str {
        "Researches the repository source code to answer your question"
    }

    async fn fulfill(
        &self,
        ctx: &BotContext,
        message: &Message,
        conversation: &Conversation,
    ) -> Result<()> {
        if message.is_reset() {
            conversation.send(OutboundMessage::service_final(
                HANDLE,
                message,
                "```\nCONVERSATION RESTARTED\n```",
            ))?;
            return Ok(());
        }

        debug!(
            "Starting inspector on turn {} of the conversation",
            message.full_conversation().len()
        );
        conversation.send(OutboundMessage::service(
            HANDLE,
            message,
            format!("`{}`", ctx.config.model.slow_model),
        ))?;

        let mut tools = ToolRegistry::new();
        tools.register(Tool::ListRepo(ListRepoTool::new(ctx.scanner.clone())));
        tools.register(Tool::ReadFile(ReadFileTool::new(ctx.scanner.clone())));

        let mut config = AgentConfig::from_config(&ctx.config);
        config.user = Some(message.originator.uuid.to_string());

        let memory = MemoryStore::new(ctx.embedder.clone());
        let mut agent = InspectorAgent::new(config, ctx.chat.clone(), tools, memory);

        if ctx.config.agent.human_feedback {
            let timeout = ctx.config.agent.human_timeout_seconds.map(Duration::from_secs);
            agent = agent.with_feedback(
                HumanInputTool::new(HANDLE, conversation.clone(), message.clone())
                    .with_timeout(timeout),
            );
        }

        let result = agent
            .run(&[message.content.clone()])
            .await
            .context("Inspector agent failed")?;
        info!(
            "Inspector finished: {} transcript entries, {} memories",
            agent.transcript().len(),
            agent.memory().len()
        );

        conversation.send(OutboundMessage::final_response(HANDLE, message, result))?;
        Ok(())
    }
}
