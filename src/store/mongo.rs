use async_trait::async_trait;
use chrono::Utc;
use futures_util::TryStreamExt;
use log::{error, info};
use mongodb::bson::{doc, oid::ObjectId, to_bson, DateTime as BsonDateTime, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};

use crate::error::StoreError;
use crate::models::route::EARTH_RADIUS_KM;
use crate::models::{
    Comment, Conversation, Message, ProfileUpdate, Route, RouteChanges, RouteFilter, User, UserSet,
    Visibility,
};
use crate::pagination::PageRequest;
use crate::store::{ConversationStore, MessageStore, RouteStore, StoreResult, UserStore};

const USERS: &str = "users";
const ROUTES: &str = "routes";
const CONVERSATIONS: &str = "conversations";
const MESSAGES: &str = "messages";

pub struct MongoStore {
    pub client: Client,
    pub db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, db_name: &str) -> StoreResult<Self> {
        let client_options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(client_options)?;
        let db = client.database(db_name);
        Ok(MongoStore { client, db })
    }

    /// Unique email/username, legacy-pair geo indexes on route endpoints and
/// the lookup indexes the listings sort on.
    pub async fn ensure_indexes(&self) -> StoreResult<()> {
        let unique = || IndexOptions::builder().unique(true).build();
        self.users()
            .create_index(IndexModel::builder().keys(doc! { "email": 1 }).options(unique()).build())
            .await?;
        self.users()
            .create_index(IndexModel::builder().keys(doc! { "username": 1 }).options(unique()).build())
            .await?;
        self.routes().create_indexes(route_indexes()).await?;
        self.conversations()
            .create_index(IndexModel::builder().keys(doc! { "participants": 1, "updatedAt": -1 }).build())
            .await?;
        self.messages()
            .create_index(IndexModel::builder().keys(doc! { "conversation": 1, "_id": -1 }).build())
            .await?;
        info!("MongoDB indexes ensured on {}", self.db.name());
        Ok(())
    }

    fn users(&self) -> Collection<User> {
        self.db.collection(USERS)
    }

    fn routes(&self) -> Collection<Route> {
        self.db.collection(ROUTES)
    }

    fn conversations(&self) -> Collection<Conversation> {
        self.db.collection(CONVERSATIONS)
    }

    fn messages(&self) -> Collection<Message> {
        self.db.collection(MESSAGES)
    }
}

/// `2dsphere` accepts the `{lng, lat}` legacy pairs and the full
/// longitude range, which a `2d` index bounds to `[-180, 180)`.
fn route_indexes() -> Vec<IndexModel> {
    vec![
        IndexModel::builder().keys(doc! { "creator": 1, "_id": -1 }).build(),
        IndexModel::builder().keys(doc! { "startPoint": "2dsphere" }).build(),
        IndexModel::builder().keys(doc! { "endPoint": "2dsphere" }).build(),
    ]
}

fn now() -> BsonDateTime {
    BsonDateTime::from_chrono(Utc::now())
}

/// Maps an E11000 write error to the offending field.
fn duplicate_key(err: mongodb::error::Error) -> StoreError {
    if let ErrorKind::Write(WriteFailure::WriteError(write_error)) = err.kind.as_ref() {
        if write_error.code == 11000 {
            let field = if write_error.message.contains("email") {
                "email"
            } else if write_error.message.contains("username") {
                "username"
            } else {
                "_id"
            };
            return StoreError::DuplicateKey { field: field.to_string() };
        }
    }
    error!("Error inserting document: {}", err);
    StoreError::Driver(err)
}

fn case_insensitive(query: &str) -> Document {
    doc! { "$regex": regex::escape(query), "$options": "i" }
}

fn within(center: &crate::models::GeoPoint, radius_km: f64) -> Document {
    doc! {
        "$geoWithin": {
            "$centerSphere": [[center.lng, center.lat], radius_km / EARTH_RADIUS_KM]
        }
    }
}

pub(crate) fn route_filter_document(filter: &RouteFilter) -> Document {
    let public = Visibility::Public.as_str();
    match filter {
        RouteFilter::Creator(id) => doc! { "creator": id },
        RouteFilter::Public => doc! { "visibility": public },
        RouteFilter::Search(query) => doc! {
            "visibility": public,
            "$or": [
                { "title": case_insensitive(query) },
                { "description": case_insensitive(query) },
                { "tags": case_insensitive(query) },
            ]
        },
        RouteFilter::Nearby { center, radius_km } => doc! {
            "visibility": public,
            "$or": [
                { "startPoint": within(center, *radius_km) },
                { "endPoint": within(center, *radius_km) },
            ]
        },
        RouteFilter::Feed { viewer, following } => doc! {
            "$or": [
                { "visibility": public },
                { "creator": viewer },
                {
                    "visibility": Visibility::Followers.as_str(),
                    "creator": { "$in": following.clone() },
                },
            ]
        },
        RouteFilter::Ids(ids) => doc! { "_id": { "$in": ids.clone() } },
    }
}

fn route_changes_document(changes: &RouteChanges) -> StoreResult<Document> {
    let mut set = Document::new();
    if let Some(title) = &changes.title {
        set.insert("title", title);
    }
    if let Some(point) = &changes.start_point {
        set.insert("startPoint", to_bson(point)?);
    }
    if let Some(point) = &changes.end_point {
        set.insert("endPoint", to_bson(point)?);
    }
    if let Some(waypoints) = &changes.waypoints {
        set.insert("waypoints", to_bson(waypoints)?);
    }
    if let Some(mode) = &changes.travel_mode {
        set.insert("travelMode", to_bson(mode)?);
    }
    if let Some(description) = &changes.description {
        set.insert("description", description);
    }
    if let Some(distance) = changes.total_distance {
        set.insert("totalDistance", distance);
    }
    if let Some(time) = changes.total_time {
        set.insert("totalTime", time);
    }
    if let Some(visibility) = &changes.visibility {
        set.insert("visibility", visibility.as_str());
    }
    if let Some(tags) = &changes.tags {
        set.insert("tags", tags.clone());
    }
    set.insert("updatedAt", now());
    Ok(set)
}

#[async_trait]
impl UserStore for MongoStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        self.users().insert_one(user).await.map_err(duplicate_key)?;
        Ok(())
    }

    async fn find_user(&self, id: &ObjectId) -> StoreResult<Option<User>> {
        Ok(self.users().find_one(doc! { "_id": id }).await?)
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self.users().find_one(doc! { "username": username }).await?)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self.users().find_one(doc! { "email": email }).await?)
    }

    async fn find_users(&self, ids: &[ObjectId]) -> StoreResult<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let cursor = self.users().find(doc! { "_id": { "$in": ids.to_vec() } }).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn search_users(&self, query: &str, limit: u64) -> StoreResult<Vec<User>> {
        let filter = doc! {
            "$or": [
                { "username": case_insensitive(query) },
                { "name": case_insensitive(query) },
            ]
        };
        let cursor = self
            .users()
            .find(filter)
            .sort(doc! { "username": 1 })
            .limit(limit as i64)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn set_password(&self, id: &ObjectId, hash: &str) -> StoreResult<Option<User>> {
        Ok(self
            .users()
            .find_one_and_update(
                doc! { "_id": id },
                doc! { "$set": { "password": hash, "updatedAt": now() } },
            )
            .return_document(ReturnDocument::After)
            .await?)
    }

    async fn update_profile(&self, id: &ObjectId, update: &ProfileUpdate) -> StoreResult<Option<User>> {
        let mut set = doc! { "updatedAt": now() };
        if let Some(name) = &update.name {
            set.insert("name", name);
        }
        if let Some(bio) = &update.bio {
            set.insert("bio", bio);
        }
        if let Some(picture) = &update.profile_picture {
            set.insert("profilePicture", picture);
        }
        Ok(self
            .users()
            .find_one_and_update(doc! { "_id": id }, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await?)
    }

    async fn add_to_user_set(&self, id: &ObjectId, set: UserSet, value: &ObjectId) -> StoreResult<bool> {
        let field = set.field();
        let result = self
            .users()
            .update_one(
                doc! { "_id": id, field: { "$ne": value } },
                doc! { "$addToSet": { field: value } },
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    async fn remove_from_user_set(&self, id: &ObjectId, set: UserSet, value: &ObjectId) -> StoreResult<bool> {
        let field = set.field();
        let result = self
            .users()
            .update_one(doc! { "_id": id, field: value }, doc! { "$pull": { field: value } })
            .await?;
        Ok(result.modified_count == 1)
    }
}

#[async_trait]
impl RouteStore for MongoStore {
    async fn insert_route(&self, route: &Route) -> StoreResult<()> {
        self.routes().insert_one(route).await?;
        Ok(())
    }

    async fn find_route(&self, id: &ObjectId) -> StoreResult<Option<Route>> {
        Ok(self.routes().find_one(doc! { "_id": id }).await?)
    }

    async fn find_routes(&self, filter: &RouteFilter, page: PageRequest) -> StoreResult<(Vec<Route>, u64)> {
        let filter = route_filter_document(filter);
        let total = self.routes().count_documents(filter.clone()).await?;
        let cursor = self
            .routes()
            .find(filter)
            .sort(doc! { "_id": -1 })
            .skip(page.skip())
            .limit(page.limit as i64)
            .await?;
        Ok((cursor.try_collect().await?, total))
    }

    async fn update_route(&self, id: &ObjectId, changes: &RouteChanges) -> StoreResult<Option<Route>> {
        let set = route_changes_document(changes)?;
        Ok(self
            .routes()
            .find_one_and_update(doc! { "_id": id }, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await?)
    }

    async fn delete_route(&self, id: &ObjectId) -> StoreResult<bool> {
        let result = self.routes().delete_one(doc! { "_id": id }).await?;
        Ok(result.deleted_count == 1)
    }

    async fn add_like(&self, route: &ObjectId, user: &ObjectId) -> StoreResult<bool> {
        let result = self
            .routes()
            .update_one(
                doc! { "_id": route, "likes": { "$ne": user } },
                doc! { "$addToSet": { "likes": user } },
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    async fn remove_like(&self, route: &ObjectId, user: &ObjectId) -> StoreResult<bool> {
        let result = self
            .routes()
            .update_one(doc! { "_id": route, "likes": user }, doc! { "$pull": { "likes": user } })
            .await?;
        Ok(result.modified_count == 1)
    }

    async fn push_comment(&self, route: &ObjectId, comment: &Comment) -> StoreResult<bool> {
        let comment = to_bson(comment)?;
        let result = self
            .routes()
            .update_one(
                doc! { "_id": route },
                doc! { "$push": { "comments": { "$each": [comment], "$position": 0 } } },
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn pull_comment(&self, route: &ObjectId, comment: &ObjectId) -> StoreResult<bool> {
        let result = self
            .routes()
            .update_one(
                doc! { "_id": route },
                doc! { "$pull": { "comments": { "_id": comment } } },
            )
            .await?;
        Ok(result.modified_count == 1)
    }
}

#[async_trait]
impl ConversationStore for MongoStore {
    async fn insert_conversation(&self, conversation: &Conversation) -> StoreResult<()> {
        self.conversations().insert_one(conversation).await?;
        Ok(())
    }

    async fn find_conversation(&self, id: &ObjectId) -> StoreResult<Option<Conversation>> {
        Ok(self.conversations().find_one(doc! { "_id": id }).await?)
    }

    async fn find_conversation_by_participants(
        &self,
        participants: &[ObjectId],
    ) -> StoreResult<Option<Conversation>> {
        let filter = doc! {
            "participants": {
                "$size": participants.len() as i32,
                "$all": participants.to_vec(),
            }
        };
        Ok(self.conversations().find_one(filter).await?)
    }

    async fn find_conversations_for_user(
        &self,
        user: &ObjectId,
        page: PageRequest,
    ) -> StoreResult<(Vec<Conversation>, u64)> {
        let filter = doc! { "participants": user };
        let total = self.conversations().count_documents(filter.clone()).await?;
        let cursor = self
            .conversations()
            .find(filter)
            .sort(doc! { "updatedAt": -1, "_id": -1 })
            .skip(page.skip())
            .limit(page.limit as i64)
            .await?;
        Ok((cursor.try_collect().await?, total))
    }

    async fn set_last_message(
        &self,
        conversation: &ObjectId,
        message: &ObjectId,
    ) -> StoreResult<Option<Conversation>> {
        Ok(self
            .conversations()
            .find_one_and_update(
                doc! { "_id": conversation },
                doc! { "$set": { "lastMessage": message, "updatedAt": now() } },
            )
            .return_document(ReturnDocument::After)
            .await?)
    }
}

#[async_trait]
impl MessageStore for MongoStore {
    async fn insert_message(&self, message: &Message) -> StoreResult<()> {
        self.messages().insert_one(message).await?;
        Ok(())
    }

    async fn find_messages_by_ids(&self, ids: &[ObjectId]) -> StoreResult<Vec<Message>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let cursor = self.messages().find(doc! { "_id": { "$in": ids.to_vec() } }).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn find_messages(
        &self,
        conversation: &ObjectId,
        page: PageRequest,
    ) -> StoreResult<(Vec<Message>, u64)> {
        let filter = doc! { "conversation": conversation };
        let total = self.messages().count_documents(filter.clone()).await?;
        let cursor = self
            .messages()
            .find(filter)
            .sort(doc! { "_id": -1 })
            .skip(page.skip())
            .limit(page.limit as i64)
            .await?;
        Ok((cursor.try_collect().await?, total))
    }

    async fn add_reader(&self, message: &ObjectId, user: &ObjectId) -> StoreResult<Option<Message>> {
        Ok(self
            .messages()
            .find_one_and_update(doc! { "_id": message }, doc! { "$addToSet": { "readBy": user } })
            .return_document(ReturnDocument::After)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GeoPoint;

    #[test]
    fn search_filter_escapes_and_ignores_case() {
        let filter = route_filter_document(&RouteFilter::Search("a.b".into()));
        assert_eq!(filter.get_str("visibility").unwrap(), "public");
        let branches = filter.get_array("$or").unwrap();
        assert_eq!(branches.len(), 3);
        let title = branches[0].as_document().unwrap().get_document("title").unwrap();
        assert_eq!(title.get_str("$regex").unwrap(), r"a\.b");
        assert_eq!(title.get_str("$options").unwrap(), "i");
    }

    #[test]
    fn nearby_filter_uses_radians() {
        let filter = route_filter_document(&RouteFilter::Nearby {
            center: GeoPoint::new(10.0, 20.0),
            radius_km: EARTH_RADIUS_KM,
        });
        let start = filter.get_array("$or").unwrap()[0]
            .as_document()
            .unwrap()
            .get_document("startPoint")
            .unwrap()
            .get_document("$geoWithin")
            .unwrap()
            .get_array("$centerSphere")
            .unwrap()
            .clone();
        assert_eq!(start[1].as_f64(), Some(1.0));
        let center = start[0].as_array().unwrap();
        assert_eq!(center[0].as_f64(), Some(20.0));
        assert_eq!(center[1].as_f64(), Some(10.0));
    }

    #[test]
    fn route_endpoints_get_geo_indexes() {
        let indexes = route_indexes();
        for field in ["startPoint", "endPoint"] {
            assert!(indexes
                .iter()
                .any(|index| index.keys.get_str(field).ok() == Some("2dsphere")));
        }
    }

    #[test]
    fn route_changes_only_set_present_fields() {
        let changes = RouteChanges {
            title: Some("New".into()),
            visibility: Some(Visibility::Private),
            ..Default::default()
        };
        let set = route_changes_document(&changes).unwrap();
        assert_eq!(set.get_str("title").unwrap(), "New");
        assert_eq!(set.get_str("visibility").unwrap(), "private");
        assert!(set.contains_key("updatedAt"));
        assert!(!set.contains_key("description"));
    }
}
