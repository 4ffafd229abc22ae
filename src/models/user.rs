use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// A registered account as stored in the `users` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    pub username: String,
    pub email: String,
    /// bcrypt hash, never the plaintext.
    pub password: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub profile_picture: String,
    #[serde(default)]
    pub followers: Vec<ObjectId>,
    #[serde(default)]
    pub following: Vec<ObjectId>,
    #[serde(default)]
    pub bookmarks: Vec<ObjectId>,
    #[serde(default)]
    pub conversations: Vec<ObjectId>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_protected: bool,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_following(&self, other: &ObjectId) -> bool {
        self.following.contains(other)
    }

    pub fn has_bookmark(&self, route: &ObjectId) -> bool {
        self.bookmarks.contains(route)
    }

    pub fn set(&self, set: UserSet) -> &[ObjectId] {
        match set {
            UserSet::Followers => &self.followers,
            UserSet::Following => &self.following,
            UserSet::Bookmarks => &self.bookmarks,
            UserSet::Conversations => &self.conversations,
        }
    }

    pub fn set_mut(&mut self, set: UserSet) -> &mut Vec<ObjectId> {
        match set {
            UserSet::Followers => &mut self.followers,
            UserSet::Following => &mut self.following,
            UserSet::Bookmarks => &mut self.bookmarks,
            UserSet::Conversations => &mut self.conversations,
        }
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.to_hex(),
            name: self.name.clone(),
            username: self.username.clone(),
            profile_picture: self.profile_picture.clone(),
        }
    }

    /// The externally visible form: everything except the password hash.
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id.to_hex(),
            name: self.name.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            bio: self.bio.clone(),
            profile_picture: self.profile_picture.clone(),
            followers: hex_ids(&self.followers),
            following: hex_ids(&self.following),
            bookmarks: hex_ids(&self.bookmarks),
            conversations: hex_ids(&self.conversations),
            is_admin: self.is_admin,
            is_protected: self.is_protected,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

pub(crate) fn hex_ids(ids: &[ObjectId]) -> Vec<String> {
    ids.iter().map(|id| id.to_hex()).collect()
}

/// The reference sets held on a user document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserSet {
    Followers,
    Following,
    Bookmarks,
    Conversations,
}

impl UserSet {
    pub fn field(&self) -> &'static str {
        match self {
            UserSet::Followers => "followers",
            UserSet::Following => "following",
            UserSet::Bookmarks => "bookmarks",
            UserSet::Conversations => "conversations",
        }
    }
}

/// Reduced view used when populating relations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub username: String,
    pub profile_picture: String,
}

impl UserSummary {
    /// Stand-in for a reference whose document no longer resolves.
    pub fn unresolved(id: &ObjectId) -> Self {
        UserSummary {
            id: id.to_hex(),
            name: String::new(),
            username: String::new(),
            profile_picture: String::new(),
        }
    }
}

/// A user without its password. `C` is the shape of follower/following
/// entries: plain ids, or summaries once populated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser<C = String> {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub username: String,
    pub email: String,
    pub bio: String,
    pub profile_picture: String,
    pub followers: Vec<C>,
    pub following: Vec<C>,
    pub bookmarks: Vec<String>,
    pub conversations: Vec<String>,
    pub is_admin: bool,
    pub is_protected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub type UserProfile = PublicUser<UserSummary>;

impl<C> PublicUser<C> {
    pub fn with_connections<D>(self, followers: Vec<D>, following: Vec<D>) -> PublicUser<D> {
        PublicUser {
            id: self.id,
            name: self.name,
            username: self.username,
            email: self.email,
            bio: self.bio,
            profile_picture: self.profile_picture,
            followers,
            following,
            bookmarks: self.bookmarks,
            conversations: self.conversations,
            is_admin: self.is_admin,
            is_protected: self.is_protected,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Registration payload.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    #[validate(length(min = 1, max = 50, message = "name must be 1-50 characters"))]
    pub name: String,
    #[validate(length(min = 3, max = 30, message = "username must be 3-30 characters"))]
    pub username: String,
    #[validate(email(message = "email is not valid"))]
    pub email: String,
    #[validate(length(min = 6, message = "password must be at least 6 characters"))]
    pub password: String,
    #[serde(default)]
    #[validate(length(max = 500, message = "bio must be at most 500 characters"))]
    pub bio: String,
    #[serde(default)]
    pub profile_picture: String,
}

/// Partial profile edit; `None` leaves a field untouched, `Some("")` clears it.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[validate(length(min = 1, max = 50, message = "name must be 1-50 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 500, message = "bio must be at most 500 characters"))]
    pub bio: Option<String>,
    pub profile_picture: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.bio.is_none() && self.profile_picture.is_none()
    }

    pub fn apply(&self, user: &mut User) {
        if let Some(name) = &self.name {
            user.name = name.clone();
        }
        if let Some(bio) = &self.bio {
            user.bio = bio.clone();
        }
        if let Some(picture) = &self.profile_picture {
            user.profile_picture = picture.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> User {
        let now = Utc::now();
        User {
            id: ObjectId::new(),
            name: "Alice".into(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            password: "$2b$04$hash".into(),
            bio: String::new(),
            profile_picture: String::new(),
            followers: vec![],
            following: vec![],
            bookmarks: vec![],
            conversations: vec![],
            is_admin: false,
            is_protected: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn public_form_has_no_password() {
        let json = serde_json::to_value(sample().to_public()).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["username"], "alice");
        assert!(json["_id"].is_string());
    }

    #[test]
    fn public_form_lists_references_as_hex() {
        let mut user = sample();
        let (follower, route) = (ObjectId::new(), ObjectId::new());
        user.followers.push(follower);
        user.bookmarks.push(route);
        let public = user.to_public();
        assert_eq!(public.followers, vec![follower.to_hex()]);
        assert_eq!(public.bookmarks, vec![route.to_hex()]);
        assert!(public.following.is_empty());
    }

    #[test]
    fn profile_update_keeps_explicit_empty_bio() {
        let mut user = sample();
        user.bio = "old".into();
        let update = ProfileUpdate {
            bio: Some(String::new()),
            ..Default::default()
        };
        update.apply(&mut user);
        assert_eq!(user.bio, "");
        assert_eq!(user.name, "Alice");
    }
}
