use std::sync::Arc;

use amora_shared::{AppError, AppResult, ErrorCode};

use crate::domain::{ChatMessage, MessageContent, NewChatMessage, OutboundNotice, UserId};
use crate::ports::{HistoryStore, Messenger, SessionStore};

/// Forwards traffic between the two sides of an active session and keeps the
/// durable history in step.
pub struct MessageRelay {
    sessions: Arc<dyn SessionStore>,
    history: Arc<dyn HistoryStore>,
    messenger: Arc<dyn Messenger>,
}

impl MessageRelay {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        history: Arc<dyn HistoryStore>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self { sessions, history, messenger }
    }

    /// Persist and forward one message from `sender` to their current partner.
    ///
    /// The history store assigns the message id. Delivery failures surface to
    /// the sender so the transport can mark the message as undelivered; the
    /// message itself stays in history either way.
    pub async fn relay(&self, sender: UserId, content: MessageContent) -> AppResult<ChatMessage> {
        validate_content(&content)?;

        let session = self
            .sessions
            .active_session(sender)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::NotInChat, "no active chat to send to"))?;

        let message = self
            .history
            .append_message(NewChatMessage {
                sender_id: sender,
                receiver_id: session.partner_id,
                content,
            })
            .await?;

        self.messenger
            .deliver(
                session.partner_id,
                OutboundNotice::ChatMessage {
                    sender_id: sender,
                    message_id: message.message_id,
                    content: message.content.clone(),
                },
            )
            .await?;

        Ok(message)
    }

    /// Ordered replay of the pair's conversation, message_id ascending.
    pub async fn history_with(&self, user: UserId, partner: UserId) -> AppResult<Vec<ChatMessage>> {
        self.history.history(user, partner).await
    }
}

fn validate_content(content: &MessageContent) -> AppResult<()> {
    match content {
        MessageContent::Text { body } if body.trim().is_empty() => Err(AppError::new(
            ErrorCode::EmptyMessage,
            "message text must not be empty",
        )),
        other => match other.content_ref() {
            Some(reference) if reference.trim().is_empty() => Err(AppError::new(
                ErrorCode::EmptyMessage,
                "media reference must not be empty",
            )),
            _ => Ok(()),
        },
    }
}
