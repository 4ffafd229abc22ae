use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use mongodb::bson::oid::ObjectId;

use crate::error::ServiceError;
use crate::models::{Conversation, ConversationView, Message, MessageView, UserSet};
use crate::pagination::{PageQuery, Paginated, CONVERSATION_LIMIT};
use crate::services::message::message_view;
use crate::services::{parse_id, Directory};
use crate::store::Store;

#[derive(Clone)]
pub struct ConversationService {
    store: Arc<dyn Store>,
}

impl ConversationService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        ConversationService { store }
    }

    /// Populates participants and the last message (with its sender and readers)
    /// for a batch of conversations in two lookups.
    async fn views(&self, conversations: Vec<Conversation>) -> Result<Vec<ConversationView>, ServiceError> {
        let message_ids: Vec<ObjectId> = conversations.iter().filter_map(|c| c.last_message).collect();
        let messages: HashMap<ObjectId, Message> = self
            .store
            .find_messages_by_ids(&message_ids)
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        let user_ids = conversations
            .iter()
            .flat_map(|c| c.participants.iter())
            .chain(messages.values().flat_map(|m| std::iter::once(&m.sender).chain(&m.read_by)));
        let directory = Directory::load(self.store.as_ref(), user_ids).await?;

        Ok(conversations
            .into_iter()
            .map(|c| {
                let last_message: Option<MessageView> = c
                    .last_message
                    .and_then(|id| messages.get(&id))
                    .map(|m| message_view(m, &directory));
                ConversationView {
                    id: c.id.to_hex(),
                    participants: directory.summaries(&c.participants),
                    last_message,
                    created_at: c.created_at,
                    updated_at: c.updated_at,
                }
            })
            .collect())
    }

    async fn view(&self, conversation: Conversation) -> Result<ConversationView, ServiceError> {
        let mut views = self.views(vec![conversation]).await?;
        views.pop().ok_or(ServiceError::ConversationNotFound)
    }

    /// Returns the existing conversation for this participant set if there is
    /// one, otherwise creates it.
    pub async fn create_conversation(&self, participant_ids: &[String]) -> Result<ConversationView, ServiceError> {
        if participant_ids.len() < 2 {
            return Err(ServiceError::TooFewParticipants);
        }
        let mut participants: Vec<ObjectId> = Vec::with_capacity(participant_ids.len());
        for raw in participant_ids {
            let id = parse_id(raw, "participant")?;
            if !participants.contains(&id) {
                participants.push(id);
            }
        }
        if participants.len() < 2 {
            return Err(ServiceError::TooFewParticipants);
        }

        if let Some(existing) = self.store.find_conversation_by_participants(&participants).await? {
            debug!("Reusing conversation {}", existing.id);
            return self.view(existing).await;
        }

        if self.store.find_users(&participants).await?.len() != participants.len() {
            return Err(ServiceError::UserNotFound);
        }

        let conversation = Conversation::new(participants);
        self.store.insert_conversation(&conversation).await?;
        for participant in &conversation.participants {
            self.store
                .add_to_user_set(participant, UserSet::Conversations, &conversation.id)
                .await?;
        }
        info!(
            "Conversation {} created for {} participants",
            conversation.id,
            conversation.participants.len()
        );
        self.view(conversation).await
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> Result<ConversationView, ServiceError> {
        let id = parse_id(conversation_id, "conversation")?;
        let conversation = self
            .store
            .find_conversation(&id)
            .await?
            .ok_or(ServiceError::ConversationNotFound)?;
        self.view(conversation).await
    }

    /// Conversations the user takes part in, most recently updated first.
    pub async fn get_conversations_by_user_id(
        &self,
        user_id: &str,
        page: PageQuery,
    ) -> Result<Paginated<ConversationView>, ServiceError> {
        let user = parse_id(user_id, "user")?;
        let request = page.resolve(CONVERSATION_LIMIT);
        let (conversations, total) = self.store.find_conversations_for_user(&user, request).await?;
        let data = self.views(conversations).await?;
        Ok(Paginated::new(data, total, request))
    }

    /// Points the conversation at its newest message.
    pub async fn update_last_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<ConversationView, ServiceError> {
        let id = parse_id(conversation_id, "conversation")?;
        let message = parse_id(message_id, "message")?;
        let conversation = self
            .store
            .set_last_message(&id, &message)
            .await?
            .ok_or(ServiceError::ConversationNotFound)?;
        debug!("Conversation {} last message -> {}", id, message);
        self.view(conversation).await
    }

    pub(crate) async fn is_participant(&self, conversation: &ObjectId, user: &ObjectId) -> Result<bool, ServiceError> {
        let conversation = self
            .store
            .find_conversation(conversation)
            .await?
            .ok_or(ServiceError::ConversationNotFound)?;
        Ok(conversation.has_participant(user))
    }
}
