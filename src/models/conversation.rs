use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::models::message::MessageView;
use crate::models::user::UserSummary;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub participants: Vec<ObjectId>,
    #[serde(default)]
    pub last_message: Option<ObjectId>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(participants: Vec<ObjectId>) -> Self {
        let now = Utc::now();
        Conversation {
            id: ObjectId::new(),
            participants,
            last_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_participant(&self, user: &ObjectId) -> bool {
        self.participants.contains(user)
    }

    /// Same members regardless of order.
    pub fn has_exact_participants(&self, ids: &[ObjectId]) -> bool {
        self.participants.len() == ids.len() && ids.iter().all(|id| self.has_participant(id))
    }
}

/// A conversation with participants and its latest message populated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    #[serde(rename = "_id")]
    pub id: String,
    pub participants: Vec<UserSummary>,
    pub last_message: Option<MessageView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
