use std::sync::Arc;

use log::{error, info};

use crate::error::{FieldErrors, ServiceError};
use crate::models::message::MAX_MESSAGE_LEN;
use crate::models::{Message, MessageView};
use crate::pagination::{PageQuery, Paginated, MESSAGE_LIMIT};
use crate::services::conversation::ConversationService;
use crate::services::{parse_id, Directory};
use crate::store::Store;

pub(crate) fn message_view(message: &Message, directory: &Directory) -> MessageView {
    MessageView {
        id: message.id.to_hex(),
        conversation: message.conversation.to_hex(),
        sender: directory.summary(&message.sender),
        content: message.content.clone(),
        read_by: directory.summaries(&message.read_by),
        created_at: message.created_at,
        updated_at: message.updated_at,
    }
}

fn check_content(content: &str) -> Result<String, ServiceError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ServiceError::Validation(FieldErrors::single(
            "content",
            "message cannot be empty",
        )));
    }
    if content.chars().count() > MAX_MESSAGE_LEN {
        return Err(ServiceError::Validation(FieldErrors::single(
            "content",
            "message must be at most 1000 characters",
        )));
    }
    Ok(content.to_string())
}

#[derive(Clone)]
pub struct MessageService {
    store: Arc<dyn Store>,
}

impl MessageService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        MessageService { store }
    }

    async fn view(&self, message: &Message) -> Result<MessageView, ServiceError> {
        let directory = Directory::load(
            self.store.as_ref(),
            std::iter::once(&message.sender).chain(&message.read_by),
        )
        .await?;
        Ok(message_view(message, &directory))
    }

    /// Stores a message already read by its sender. The conversation's
    /// `lastMessage` is left to the caller; see [`MessageService::send_message`].
    pub async fn create_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<MessageView, ServiceError> {
        let conversation = parse_id(conversation_id, "conversation")?;
        let sender = parse_id(sender_id, "sender")?;
        let content = check_content(content)?;
        if self.store.find_conversation(&conversation).await?.is_none() {
            return Err(ServiceError::ConversationNotFound);
        }

        let message = Message::new(conversation, sender, content);
        self.store.insert_message(&message).await?;
        info!("Message {} stored in conversation {}", message.id, conversation);
        self.view(&message).await
    }

    /// Create the message, then move the conversation pointer. The two writes
    /// are not atomic: if the second fails the message stays stored and the
    /// failure is returned as `LastMessageUpdate` with the message id.
    pub async fn send_message(
        &self,
        conversations: &ConversationService,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<MessageView, ServiceError> {
        let conversation = parse_id(conversation_id, "conversation")?;
        let sender = parse_id(sender_id, "sender")?;
        if !conversations.is_participant(&conversation, &sender).await? {
            return Err(ServiceError::NotAuthorized);
        }

        let message = self.create_message(conversation_id, sender_id, content).await?;
        if let Err(e) = conversations.update_last_message(conversation_id, &message.id).await {
            error!(
                "Message {} stored but conversation {} not updated: {}",
                message.id, conversation_id, e
            );
            return Err(ServiceError::LastMessageUpdate {
                message_id: message.id,
                source: Box::new(e),
            });
        }
        Ok(message)
    }

    /// Adds `user_id` to the readers. Marking twice is a no-op.
    pub async fn mark_as_read(&self, message_id: &str, user_id: &str) -> Result<MessageView, ServiceError> {
        let id = parse_id(message_id, "message")?;
        let user = parse_id(user_id, "user")?;
        let message = self
            .store
            .add_reader(&id, &user)
            .await?
            .ok_or(ServiceError::MessageNotFound)?;
        self.view(&message).await
    }

    /// Newest first.
    pub async fn get_messages_by_conversation(
        &self,
        conversation_id: &str,
        page: PageQuery,
    ) -> Result<Paginated<MessageView>, ServiceError> {
        let conversation = parse_id(conversation_id, "conversation")?;
        let request = page.resolve(MESSAGE_LIMIT);
        let (messages, total) = self.store.find_messages(&conversation, request).await?;
        let directory = Directory::load(
            self.store.as_ref(),
            messages
                .iter()
                .flat_map(|m| std::iter::once(&m.sender).chain(&m.read_by)),
        )
        .await?;
        let data = messages.iter().map(|m| message_view(m, &directory)).collect();
        Ok(Paginated::new(data, total, request))
    }
}
