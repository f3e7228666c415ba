//! Reads one repository file the user asks for.
//!
//! The fast model picks the path out of the request. Its answer is only
//! trusted if it is literally one of the listed files; anything else gets
//! the fallback reply and the disk is never touched.

use super::{Bot, BotContext};
use crate::llm::{ChatMessage, ChatModel, ChatRequest, LlmError};
use crate::models::{Conversation, Message, OutboundMessage};
use crate::scanner::FileListing;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

const FALLBACK: &str = "Please specify a file you want to read.";

const EXTRACT_INSTRUCTIONS: &str = r#"IF THE USER IS ASKING FOR A FILE FROM THE REPO ABOVE, PLEASE RESPOND WITH THE FOLLOWING JSON:
{
    "file": "path/to/file"
}

IF THE USER IS ASKING FOR A FILE THAT IS NOT LISTED ABOVE OR THERE IS NO MENTION OF A FILE IN THE USER'S REQUEST, PLEASE RESPOND WITH THE FOLLOWING JSON:
{
    "file": ""  // empty string
}

YOUR RESPONSE:
{
    "file": ""#;

/// Ask `model` which listed file `request` refers to.
///
/// Returns the trimmed completion, which is empty when the model found no
/// file. The caller must still check the answer against the listing.
pub async fn extract_file_path(
    chat: &dyn ChatModel,
    model: &str,
    listing: &FileListing,
    request: &str,
    user: &str,
) -> Result<String, LlmError> {
    let messages = vec![
        ChatMessage::user(listing.render_fenced()),
        ChatMessage::user(format!("HERE IS A REQUEST FROM A USER:\n\n{}", request)),
        ChatMessage::user(EXTRACT_INSTRUCTIONS),
    ];

    let request = ChatRequest::new(model, messages)
        .temperature(0.0)
        .stop(["\"", "\n"])
        .user(user);

    let completion = chat.complete(request).await?;
    Ok(completion.trim().to_string())
}

/// Replies with the content of the file named in the message.
pub struct ReadFileBot;

#[async_trait]
impl Bot for ReadFileBot {
    fn handle(&self) -> &str {
        "ReadFileBot"
    }

    fn description(&self) -> &str {
        "Reads the repository file named in your message"
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

        let candidate = extract_file_path(
            ctx.chat.as_ref(),
            &ctx.config.model.fast_model,
            &listing,
            &message.content,
            &message.originator.uuid.to_string(),
        )
        .await
        .context("File path extraction failed")?;
        debug!("Extracted file path candidate: {:?}", candidate);

        let Some(path) = listing.resolve(&candidate) else {
            if !candidate.is_empty() {
                warn!("Model named a file that is not in the repo: {}", candidate);
            }
            conversation.send(
                OutboundMessage::final_response(self.handle(), message, FALLBACK)
                    .with_field("success", false),
            )?;
            return Ok(());
        };

        conversation.send(OutboundMessage::interim(self.handle(), message, path))?;

        let reply = match ctx.scanner.read_file(path) {
            Ok(content) => {
                info!("Read {} ({} bytes)", path, content.len());
                OutboundMessage::final_response(self.handle(), message, content)
                    .with_field("success", true)
            }
            Err(e) => {
                warn!("Failed to read {}: {}", path, e);
                OutboundMessage::final_response(
                    self.handle(),
                    message,
                    format!("Failed to read `{}`.", path),
                )
                .with_field("success", false)
            }
        };
        conversation.send(reply)?;
        Ok(())
    }
}
