//! Storage seam between the services and the document database.
//!
//! Every method is a single round trip. Set mutations (`add_*`/`remove_*`)
//! are conditional single-document updates and report whether they changed
//! anything, so callers can tell "already present" from "applied" without a
//! separate read.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;

use crate::error::StoreError;
use crate::models::{
    Comment, Conversation, Message, ProfileUpdate, Route, RouteChanges, RouteFilter, User, UserSet,
};
use crate::pagination::PageRequest;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `DuplicateKey` when the email or username is taken.
    async fn insert_user(&self, user: &User) -> StoreResult<()>;
    async fn find_user(&self, id: &ObjectId) -> StoreResult<Option<User>>;
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn find_users(&self, ids: &[ObjectId]) -> StoreResult<Vec<User>>;
    /// Case-insensitive substring match on username or name.
    async fn search_users(&self, query: &str, limit: u64) -> StoreResult<Vec<User>>;
    async fn set_password(&self, id: &ObjectId, hash: &str) -> StoreResult<Option<User>>;
    async fn update_profile(&self, id: &ObjectId, update: &ProfileUpdate) -> StoreResult<Option<User>>;
    /// False when the user is missing or already holds `value`.
    async fn add_to_user_set(&self, id: &ObjectId, set: UserSet, value: &ObjectId) -> StoreResult<bool>;
    /// False when the user is missing or does not hold `value`.
    async fn remove_from_user_set(&self, id: &ObjectId, set: UserSet, value: &ObjectId) -> StoreResult<bool>;
}

#[async_trait]
pub trait RouteStore: Send + Sync {
    async fn insert_route(&self, route: &Route) -> StoreResult<()>;
    async fn find_route(&self, id: &ObjectId) -> StoreResult<Option<Route>>;
    /// Newest first, with the total matching count.
    async fn find_routes(&self, filter: &RouteFilter, page: PageRequest) -> StoreResult<(Vec<Route>, u64)>;
    async fn update_route(&self, id: &ObjectId, changes: &RouteChanges) -> StoreResult<Option<Route>>;
    async fn delete_route(&self, id: &ObjectId) -> StoreResult<bool>;
    async fn add_like(&self, route: &ObjectId, user: &ObjectId) -> StoreResult<bool>;
    async fn remove_like(&self, route: &ObjectId, user: &ObjectId) -> StoreResult<bool>;
    /// Inserts at the front of the comment sequence. False when the route is missing.
    async fn push_comment(&self, route: &ObjectId, comment: &Comment) -> StoreResult<bool>;
    async fn pull_comment(&self, route: &ObjectId, comment: &ObjectId) -> StoreResult<bool>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn insert_conversation(&self, conversation: &Conversation) -> StoreResult<()>;
    async fn find_conversation(&self, id: &ObjectId) -> StoreResult<Option<Conversation>>;
    /// The conversation whose participant set equals `participants`, ignoring order.
    async fn find_conversation_by_participants(
        &self,
        participants: &[ObjectId],
    ) -> StoreResult<Option<Conversation>>;
    /// Most recently updated first.
    async fn find_conversations_for_user(
        &self,
        user: &ObjectId,
        page: PageRequest,
    ) -> StoreResult<(Vec<Conversation>, u64)>;
    async fn set_last_message(
        &self,
        conversation: &ObjectId,
        message: &ObjectId,
    ) -> StoreResult<Option<Conversation>>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message(&self, message: &Message) -> StoreResult<()>;
    async fn find_messages_by_ids(&self, ids: &[ObjectId]) -> StoreResult<Vec<Message>>;
    /// Newest first, with the total count for the conversation.
    async fn find_messages(
        &self,
        conversation: &ObjectId,
        page: PageRequest,
    ) -> StoreResult<(Vec<Message>, u64)>;
    /// Add-to-set on `readBy`; returns the message after the update.
    async fn add_reader(&self, message: &ObjectId, user: &ObjectId) -> StoreResult<Option<Message>>;
}

/// Everything the services need from a backend.
pub trait Store: UserStore + RouteStore + ConversationStore + MessageStore {}

impl<T> Store for T where T: UserStore + RouteStore + ConversationStore + MessageStore {}
