//! Conversation data models.
//!
//! Inbound messages, outbound bot responses, and the channel pair a bot
//! talks through while handling one message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Who sent a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Originator {
    pub uuid: Uuid,
    pub name: String,
}

impl Originator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

/// An inbound conversational turn.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub originator: Originator,
    pub content: String,
    /// Arbitrary side-channel fields attached by the sender.
    pub custom_fields: Map<String, Value>,
    /// The previous turn of the same conversation, if any.
    pub previous: Option<Arc<Message>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a message that starts a new conversation.
    pub fn new(originator: Originator, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            originator,
            content: content.into(),
            custom_fields: Map::new(),
            previous: None,
            created_at: Utc::now(),
        }
    }

    /// Create the next turn after `previous`, from the same originator.
    pub fn follow_up(previous: Arc<Message>, content: impl Into<String>) -> Self {
        Self {
            previous: Some(previous.clone()),
            ..Self::new(previous.originator.clone(), content)
        }
    }

    /// A blank message marks a conversation reset.
    pub fn is_reset(&self) -> bool {
        self.content.trim().is_empty()
    }

    /// All turns of this conversation, oldest first, ending with `self`.
    pub fn full_conversation(&self) -> Vec<&Message> {
        let mut turns = vec![self];
        let mut cursor = self.previous.as_deref();
        while let Some(msg) = cursor {
            turns.push(msg);
            cursor = msg.previous.as_deref();
        }
        turns.reverse();
        turns
    }
}

/// Kind of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Streamed progress; the turn continues.
    Interim,
    /// Terminates the bot's turn.
    Final,
    /// Meta/status notice. `is_final` tells whether it ends the turn.
    Service { is_final: bool },
}

impl MessageKind {
    pub fn ends_turn(&self) -> bool {
        match self {
            MessageKind::Interim => false,
            MessageKind::Final => true,
            MessageKind::Service { is_final } => *is_final,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Interim => write!(f, "interim"),
            MessageKind::Final => write!(f, "final"),
            MessageKind::Service { .. } => write!(f, "service"),
        }
    }
}

/// A message emitted by a bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub kind: MessageKind,
    /// Handle of the bot that produced the message.
    pub sender: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom_fields: Map<String, Value>,
    /// Id of the inbound message this answers.
    pub in_reply_to: Uuid,
}

impl OutboundMessage {
    pub fn interim(sender: &str, reply_to: &Message, content: impl Into<String>) -> Self {
        Self::with_kind(MessageKind::Interim, sender, reply_to, content)
    }

    pub fn final_response(sender: &str, reply_to: &Message, content: impl Into<String>) -> Self {
        Self::with_kind(MessageKind::Final, sender, reply_to, content)
    }

    /// A status notice for the user that does not end the turn.
    pub fn service(sender: &str, reply_to: &Message, content: impl Into<String>) -> Self {
        Self::with_kind(
            MessageKind::Service { is_final: false },
            sender,
            reply_to,
            content,
        )
    }

    /// A status notice that also ends the turn.
    pub fn service_final(sender: &str, reply_to: &Message, content: impl Into<String>) -> Self {
        Self::with_kind(
            MessageKind::Service { is_final: true },
            sender,
            reply_to,
            content,
        )
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.custom_fields.insert(key.to_string(), value.into());
        self
    }

    fn with_kind(
        kind: MessageKind,
        sender: &str,
        reply_to: &Message,
        content: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            sender: sender.to_string(),
            content: content.into(),
            custom_fields: Map::new(),
            in_reply_to: reply_to.id,
        }
    }
}

/// Errors on the conversation channel.
#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error("conversation closed: no more inbound messages")]
    InboundClosed,
    #[error("conversation closed: outbound receiver dropped")]
    OutboundClosed,
}

/// The channel pair a bot uses while handling a message.
///
/// The inbound side is shared so a handler (through the human-input tool)
/// can wait for the next user message while the dispatcher is busy with it.
#[derive(Clone)]
pub struct Conversation {
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    inbound: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
}

impl Conversation {
    pub fn new(
        outbound: mpsc::UnboundedSender<OutboundMessage>,
        inbound: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        Self {
            outbound,
            inbound: Arc::new(Mutex::new(inbound)),
        }
    }

    /// Emit a message to the user.
    pub fn send(&self, message: OutboundMessage) -> Result<(), ConversationError> {
        self.outbound
            .send(message)
            .map_err(|_| ConversationError::OutboundClosed)
    }

    /// Wait for the next inbound message. Returns `None` once the sender side
    /// is gone.
    pub async fn next_inbound(&self) -> Option<Message> {
        self.inbound.lock().await.recv().await
    }

    /// Wait for the next inbound message, failing if the channel is closed.
    pub async fn wait_for_incoming(&self) -> Result<Message, ConversationError> {
        self.next_inbound()
            .await
            .ok_or(ConversationError::InboundClosed)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A conversation wired to in-memory channels for tests.
    pub struct TestConversation {
        pub conversation: Conversation,
        pub inbound_tx: mpsc::UnboundedSender<Message>,
        pub outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
    }

    impl TestConversation {
        pub fn new() -> Self {
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            Self {
                conversation: Conversation::new(outbound_tx, inbound_rx),
                inbound_tx,
                outbound_rx,
            }
        }

        /// Drain every outbound message emitted so far.
        pub fn drain(&mut self) -> Vec<OutboundMessage> {
            let mut out = Vec::new();
            while let Ok(msg) = self.outbound_rx.try_recv() {
                out.push(msg);
            }
            out
        }
    }
}
