pub mod conversation;
pub mod message;
pub mod route;
pub mod user;

use std::collections::{HashMap, HashSet};

use mongodb::bson::oid::ObjectId;

use crate::error::ServiceError;
use crate::models::{User, UserSummary};
use crate::store::Store;

pub use conversation::ConversationService;
pub use message::MessageService;
pub use route::RouteService;
pub use user::UserService;

/// Parses a hex object id, naming its role in the error.
pub(crate) fn parse_id(raw: &str, what: &'static str) -> Result<ObjectId, ServiceError> {
    ObjectId::parse_str(raw.trim()).map_err(|_| ServiceError::InvalidId(what))
}

/// Users loaded in one round trip for populating references.
pub(crate) struct Directory {
    users: HashMap<ObjectId, User>,
}

impl Directory {
    pub(crate) async fn load<'a, I>(store: &dyn Store, ids: I) -> Result<Self, ServiceError>
    where
        I: IntoIterator<Item = &'a ObjectId>,
    {
        let wanted: HashSet<ObjectId> = ids.into_iter().copied().collect();
        let wanted: Vec<ObjectId> = wanted.into_iter().collect();
        let users = store
            .find_users(&wanted)
            .await?
            .into_iter()
            .map(|user| (user.id, user))
            .collect();
        Ok(Directory { users })
    }

    /// Summary for a single reference; unresolved ids keep their id.
    pub(crate) fn summary(&self, id: &ObjectId) -> UserSummary {
        self.users
            .get(id)
            .map(User::summary)
            .unwrap_or_else(|| UserSummary::unresolved(id))
    }

    /// Summaries for a reference set; unresolved ids are dropped.
    pub(crate) fn summaries(&self, ids: &[ObjectId]) -> Vec<UserSummary> {
        ids.iter()
            .filter_map(|id| self.users.get(id).map(User::summary))
            .collect()
    }
}
