//! In-process backend. Each method takes the lock once, so every call is
//! atomic with respect to the others, matching the single-document
//! guarantees of the database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use mongodb::bson::oid::ObjectId;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::{
    Comment, Conversation, Message, ProfileUpdate, Route, RouteChanges, RouteFilter, User, UserSet,
};
use crate::pagination::PageRequest;
use crate::store::{ConversationStore, MessageStore, RouteStore, StoreResult, UserStore};

#[derive(Default)]
struct State {
    users: HashMap<ObjectId, User>,
    routes: HashMap<ObjectId, Route>,
    conversations: HashMap<ObjectId, Conversation>,
    messages: HashMap<ObjectId, Message>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a conversation as-is, bypassing participant de-duplication.
    pub async fn seed_conversation(&self, conversation: Conversation) {
        self.state
            .write()
            .await
            .conversations
            .insert(conversation.id, conversation);
    }
}

fn window<T: Clone>(items: Vec<&T>, page: PageRequest) -> (Vec<T>, u64) {
    let total = items.len() as u64;
    let data = items
        .into_iter()
        .skip(usize::try_from(page.skip()).unwrap_or(usize::MAX))
        .take(page.limit as usize)
        .cloned()
        .collect();
    (data, total)
}

fn insert_into_set(set: &mut Vec<ObjectId>, value: &ObjectId) -> bool {
    if set.contains(value) {
        false
    } else {
        set.push(*value);
        true
    }
}

fn remove_from_set(set: &mut Vec<ObjectId>, value: &ObjectId) -> bool {
    let before = set.len();
    set.retain(|v| v != value);
    set.len() != before
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut state = self.state.write().await;
        for existing in state.users.values() {
            if existing.email == user.email {
                return Err(StoreError::DuplicateKey { field: "email".into() });
            }
            if existing.username == user.username {
                return Err(StoreError::DuplicateKey { field: "username".into() });
            }
        }
        state.users.insert(user.id, user.clone());
        debug!("memory: inserted user {}", user.id);
        Ok(())
    }

    async fn find_user(&self, id: &ObjectId) -> StoreResult<Option<User>> {
        Ok(self.state.read().await.users.get(id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.username == username).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_users(&self, ids: &[ObjectId]) -> StoreResult<Vec<User>> {
        let state = self.state.read().await;
        Ok(ids.iter().filter_map(|id| state.users.get(id).cloned()).collect())
    }

    async fn search_users(&self, query: &str, limit: u64) -> StoreResult<Vec<User>> {
        let needle = query.to_lowercase();
        let state = self.state.read().await;
        let mut found: Vec<&User> = state
            .users
            .values()
            .filter(|u| {
                u.username.to_lowercase().contains(&needle) || u.name.to_lowercase().contains(&needle)
            })
            .collect();
        found.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(found.into_iter().take(limit as usize).cloned().collect())
    }

    async fn set_password(&self, id: &ObjectId, hash: &str) -> StoreResult<Option<User>> {
        let mut state = self.state.write().await;
        Ok(state.users.get_mut(id).map(|user| {
            user.password = hash.to_string();
            user.updated_at = Utc::now();
            user.clone()
        }))
    }

    async fn update_profile(&self, id: &ObjectId, update: &ProfileUpdate) -> StoreResult<Option<User>> {
        let mut state = self.state.write().await;
        Ok(state.users.get_mut(id).map(|user| {
            update.apply(user);
            user.updated_at = Utc::now();
            user.clone()
        }))
    }

    async fn add_to_user_set(&self, id: &ObjectId, set: UserSet, value: &ObjectId) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .users
            .get_mut(id)
            .map(|user| insert_into_set(user.set_mut(set), value))
            .unwrap_or(false))
    }

    async fn remove_from_user_set(&self, id: &ObjectId, set: UserSet, value: &ObjectId) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .users
            .get_mut(id)
            .map(|user| remove_from_set(user.set_mut(set), value))
            .unwrap_or(false))
    }
}

#[async_trait]
impl RouteStore for MemoryStore {
    async fn insert_route(&self, route: &Route) -> StoreResult<()> {
        self.state.write().await.routes.insert(route.id, route.clone());
        Ok(())
    }

    async fn find_route(&self, id: &ObjectId) -> StoreResult<Option<Route>> {
        Ok(self.state.read().await.routes.get(id).cloned())
    }

    async fn find_routes(&self, filter: &RouteFilter, page: PageRequest) -> StoreResult<(Vec<Route>, u64)> {
        let state = self.state.read().await;
        let mut matching: Vec<&Route> = state.routes.values().filter(|r| filter.matches(r)).collect();
        matching.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(window(matching, page))
    }

    async fn update_route(&self, id: &ObjectId, changes: &RouteChanges) -> StoreResult<Option<Route>> {
        let mut state = self.state.write().await;
        Ok(state.routes.get_mut(id).map(|route| {
            route.apply(changes);
            route.updated_at = Utc::now();
            route.clone()
        }))
    }

    async fn delete_route(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.state.write().await.routes.remove(id).is_some())
    }

    async fn add_like(&self, route: &ObjectId, user: &ObjectId) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .routes
            .get_mut(route)
            .map(|r| insert_into_set(&mut r.likes, user))
            .unwrap_or(false))
    }

    async fn remove_like(&self, route: &ObjectId, user: &ObjectId) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .routes
            .get_mut(route)
            .map(|r| remove_from_set(&mut r.likes, user))
            .unwrap_or(false))
    }

    async fn push_comment(&self, route: &ObjectId, comment: &Comment) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(match state.routes.get_mut(route) {
            Some(r) => {
                r.comments.insert(0, comment.clone());
                true
            }
            None => false,
        })
    }

    async fn pull_comment(&self, route: &ObjectId, comment: &ObjectId) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(match state.routes.get_mut(route) {
            Some(r) => {
                let before = r.comments.len();
                r.comments.retain(|c| &c.id != comment);
                r.comments.len() != before
            }
            None => false,
        })
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn insert_conversation(&self, conversation: &Conversation) -> StoreResult<()> {
        self.state
            .write()
            .await
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(())
    }

    async fn find_conversation(&self, id: &ObjectId) -> StoreResult<Option<Conversation>> {
        Ok(self.state.read().await.conversations.get(id).cloned())
    }

    async fn find_conversation_by_participants(
        &self,
        participants: &[ObjectId],
    ) -> StoreResult<Option<Conversation>> {
        let state = self.state.read().await;
        Ok(state
            .conversations
            .values()
            .find(|c| c.has_exact_participants(participants))
            .cloned())
    }

    async fn find_conversations_for_user(
        &self,
        user: &ObjectId,
        page: PageRequest,
    ) -> StoreResult<(Vec<Conversation>, u64)> {
        let state = self.state.read().await;
        let mut matching: Vec<&Conversation> = state
            .conversations
            .values()
            .filter(|c| c.has_participant(user))
            .collect();
        matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(window(matching, page))
    }

    async fn set_last_message(
        &self,
        conversation: &ObjectId,
        message: &ObjectId,
    ) -> StoreResult<Option<Conversation>> {
        let mut state = self.state.write().await;
        Ok(state.conversations.get_mut(conversation).map(|c| {
            c.last_message = Some(*message);
            c.updated_at = Utc::now();
            c.clone()
        }))
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_message(&self, message: &Message) -> StoreResult<()> {
        self.state.write().await.messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn find_messages_by_ids(&self, ids: &[ObjectId]) -> StoreResult<Vec<Message>> {
        let state = self.state.read().await;
        Ok(ids.iter().filter_map(|id| state.messages.get(id).cloned()).collect())
    }

    async fn find_messages(
        &self,
        conversation: &ObjectId,
        page: PageRequest,
    ) -> StoreResult<(Vec<Message>, u64)> {
        let state = self.state.read().await;
        let mut matching: Vec<&Message> = state
            .messages
            .values()
            .filter(|m| &m.conversation == conversation)
            .collect();
        matching.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(window(matching, page))
    }

    async fn add_reader(&self, message: &ObjectId, user: &ObjectId) -> StoreResult<Option<Message>> {
        let mut state = self.state.write().await;
        Ok(state.messages.get_mut(message).map(|m| {
            insert_into_set(&mut m.read_by, user);
            m.clone()
        }))
    }
}
