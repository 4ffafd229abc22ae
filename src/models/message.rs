// File: message.rs

use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::models::user::UserSummary;

pub const MAX_MESSAGE_LEN: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub conversation: ObjectId,
    pub sender: ObjectId,
    pub content: String,
    #[serde(default)]
    pub read_by: Vec<ObjectId>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// A new message is already read by its sender.
    pub fn new(conversation: ObjectId, sender: ObjectId, content: String) -> Self {
        let now = Utc::now();
        Message {
            id: ObjectId::new(),
            conversation,
            sender,
            content,
            read_by: vec![sender],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_read_by(&self, user: &ObjectId) -> bool {
        self.read_by.contains(user)
    }
}

/// A message with sender and readers populated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(rename = "_id")]
    pub id: String,
    pub conversation: String,
    pub sender: UserSummary,
    pub content: String,
    pub read_by: Vec<UserSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
