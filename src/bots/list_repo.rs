//! Replies with the repository listing.

use super::{Bot, BotContext};
use crate::models::{Conversation, Message, OutboundMessage};
use anyhow::{Context, Result};
use async_trait::async_trait;

/// Replies with the repository file listing.
pub struct ListRepoBot;

#[async_trait]
impl Bot for ListRepoBot {
    fn handle(&self) -> &str {
        "ListRepoTool"
    }

    fn description(&self) -> &str {
        "Lists every file of the repository"
    }

    async fn fulfill(
        &self,
        ctx: &BotContext,
        message: &Message,
        conversation: &Conversation,
    ) -> Result<()> {
        let listing = ctx
            .scanner
            .list_files()
            .context("Failed to list repository files")?;

        conversation.send(
            OutboundMessage::final_response(self.handle(), message, listing.render_fenced())
                .with_field("file_list", listing.files.clone()),
        )?;
        Ok(())
    }
}
