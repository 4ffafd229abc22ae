use std::sync::Arc;

use bcrypt::{hash, verify};
use chrono::Utc;
use log::{debug, info, warn};
use mongodb::bson::oid::ObjectId;
use validator::Validate;

use crate::error::{FieldErrors, ServiceError, StoreError};
use crate::models::{
    NewUser, ProfileUpdate, PublicUser, RouteFilter, RouteSummary, User, UserProfile, UserSet,
    UserSummary,
};
use crate::pagination::{PageQuery, Paginated, MAX_LIMIT, ROUTE_LIMIT};
use crate::services::{parse_id, Directory};
use crate::store::Store;

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn Store>,
    bcrypt_cost: u32,
}

impl UserService {
    pub fn new(store: Arc<dyn Store>, bcrypt_cost: u32) -> Self {
        UserService { store, bcrypt_cost }
    }

    async fn load(&self, id: &ObjectId) -> Result<User, ServiceError> {
        self.store
            .find_user(id)
            .await?
            .ok_or(ServiceError::UserNotFound)
    }

    async fn profile(&self, user: User) -> Result<UserProfile, ServiceError> {
        let directory =
            Directory::load(self.store.as_ref(), user.followers.iter().chain(&user.following)).await?;
        let followers = directory.summaries(&user.followers);
        let following = directory.summaries(&user.following);
        Ok(user.to_public().with_connections(followers, following))
    }

    /// Registers an account. The password is bcrypt-hashed before it is stored.
    pub async fn create_user(&self, input: NewUser) -> Result<PublicUser, ServiceError> {
        let input = NewUser {
            name: input.name.trim().to_string(),
            username: input.username.trim().to_string(),
            email: input.email.trim().to_lowercase(),
            ..input
        };
        input.validate()?;

        if self.store.find_user_by_email(&input.email).await?.is_some() {
            return Err(ServiceError::EmailExists);
        }
        if self.store.find_user_by_username(&input.username).await?.is_some() {
            return Err(ServiceError::UsernameExists);
        }

        let now = Utc::now();
        let user = User {
            id: ObjectId::new(),
            name: input.name,
            username: input.username,
            email: input.email,
            password: hash(&input.password, self.bcrypt_cost)?,
            bio: input.bio,
            profile_picture: input.profile_picture,
            followers: Vec::new(),
            following: Vec::new(),
            bookmarks: Vec::new(),
            conversations: Vec::new(),
            is_admin: false,
            is_protected: false,
            created_at: now,
            updated_at: now,
        };

        // The unique indexes settle a race between the checks above and the insert.
        match self.store.insert_user(&user).await {
            Ok(()) => {}
            Err(StoreError::DuplicateKey { field }) if field == "email" => {
                return Err(ServiceError::EmailExists)
            }
            Err(StoreError::DuplicateKey { field }) if field == "username" => {
                return Err(ServiceError::UsernameExists)
            }
            Err(e) => return Err(e.into()),
        }
        info!("User created: {} ({})", user.username, user.id);
        Ok(user.to_public())
    }

    /// Login by email or username.
    pub async fn authenticate(&self, login: &str, password: &str) -> Result<PublicUser, ServiceError> {
        let login = login.trim();
        let user = if login.contains('@') {
            self.store.find_user_by_email(&login.to_lowercase()).await?
        } else {
            self.store.find_user_by_username(login).await?
        };
        match user {
            Some(user) if verify(password, &user.password).unwrap_or(false) => {
                debug!("User {} authenticated", user.id);
                Ok(user.to_public())
            }
            _ => {
                warn!("Failed login attempt for {}", login);
                Err(ServiceError::InvalidCredentials)
            }
        }
    }

    pub async fn verify_password(&self, user_id: &str, plaintext: &str) -> Result<bool, ServiceError> {
        let id = parse_id(user_id, "user")?;
        let user = self.load(&id).await?;
        Ok(verify(plaintext, &user.password)?)
    }

    pub async fn update_password(
        &self,
        user_id: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<PublicUser, ServiceError> {
        if !self.verify_password(user_id, old_password).await? {
            return Err(ServiceError::InvalidPassword);
        }
        if new_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ServiceError::Validation(FieldErrors::single(
                "newPassword",
                "password must be at least 6 characters",
            )));
        }
        let id = parse_id(user_id, "user")?;
        let hashed = hash(new_password, self.bcrypt_cost)?;
        let user = self
            .store
            .set_password(&id, &hashed)
            .await?
            .ok_or(ServiceError::UserNotFound)?;
        info!("Password updated for user {}", id);
        Ok(user.to_public())
    }

    /// Adds `target` to the user's following set and the user to `target`'s
    /// followers. The follower side is a conditional add-to-set, so of two
    /// concurrent identical calls exactly one succeeds.
    pub async fn follow_user(&self, user_id: &str, target_id: &str) -> Result<UserProfile, ServiceError> {
        let id = parse_id(user_id, "user")?;
        let target = parse_id(target_id, "target user")?;
        if id == target {
            return Err(ServiceError::SelfFollow);
        }
        let user = self.load(&id).await?;
        self.load(&target).await?;
        if user.is_following(&target) {
            return Err(ServiceError::AlreadyFollowing);
        }

        if !self.store.add_to_user_set(&id, UserSet::Following, &target).await? {
            return Err(ServiceError::AlreadyFollowing);
        }
        // No transaction spans the two documents; a failure here leaves the
        // edge one-sided and is reported to the caller.
        self.store.add_to_user_set(&target, UserSet::Followers, &id).await?;
        info!("User {} followed {}", id, target);

        let user = self.load(&id).await?;
        self.profile(user).await
    }

    pub async fn unfollow_user(&self, user_id: &str, target_id: &str) -> Result<UserProfile, ServiceError> {
        let id = parse_id(user_id, "user")?;
        let target = parse_id(target_id, "target user")?;
        if id == target {
            return Err(ServiceError::SelfFollow);
        }
        let user = self.load(&id).await?;
        self.load(&target).await?;
        if !user.is_following(&target) {
            return Err(ServiceError::NotFollowing);
        }

        if !self.store.remove_from_user_set(&id, UserSet::Following, &target).await? {
            return Err(ServiceError::NotFollowing);
        }
        self.store.remove_from_user_set(&target, UserSet::Followers, &id).await?;
        info!("User {} unfollowed {}", id, target);

        let user = self.load(&id).await?;
        self.profile(user).await
    }

    pub async fn get_followers(&self, user_id: &str) -> Result<Vec<UserSummary>, ServiceError> {
        self.connections(user_id, UserSet::Followers).await
    }

    pub async fn get_following(&self, user_id: &str) -> Result<Vec<UserSummary>, ServiceError> {
        self.connections(user_id, UserSet::Following).await
    }

    async fn connections(&self, user_id: &str, set: UserSet) -> Result<Vec<UserSummary>, ServiceError> {
        let id = parse_id(user_id, "user").map_err(|_| ServiceError::UserNotFound)?;
        let user = self.load(&id).await?;
        let ids = user.set(set);
        let directory = Directory::load(self.store.as_ref(), ids).await?;
        Ok(directory.summaries(ids))
    }

    pub async fn bookmark_route(&self, user_id: &str, route_id: &str) -> Result<PublicUser, ServiceError> {
        let id = parse_id(user_id, "user")?;
        let route = parse_id(route_id, "route")?;
        let user = self.load(&id).await?;
        if user.has_bookmark(&route) {
            return Err(ServiceError::AlreadyBookmarked);
        }
        if self.store.find_route(&route).await?.is_none() {
            return Err(ServiceError::RouteNotFound);
        }
        if !self.store.add_to_user_set(&id, UserSet::Bookmarks, &route).await? {
            return Err(ServiceError::AlreadyBookmarked);
        }
        info!("User {} bookmarked route {}", id, route);
        Ok(self.load(&id).await?.to_public())
    }

    pub async fn remove_bookmark(&self, user_id: &str, route_id: &str) -> Result<PublicUser, ServiceError> {
        let id = parse_id(user_id, "user")?;
        let route = parse_id(route_id, "route")?;
        let user = self.load(&id).await?;
        if !user.has_bookmark(&route) {
            return Err(ServiceError::NotBookmarked);
        }
        if !self.store.remove_from_user_set(&id, UserSet::Bookmarks, &route).await? {
            return Err(ServiceError::NotBookmarked);
        }
        info!("User {} removed bookmark {}", id, route);
        Ok(self.load(&id).await?.to_public())
    }

    /// Bookmarked routes that still exist, newest first.
    pub async fn get_bookmarks(
        &self,
        user_id: &str,
        page: PageQuery,
    ) -> Result<Paginated<RouteSummary>, ServiceError> {
        let id = parse_id(user_id, "user")?;
        let user = self.load(&id).await?;
        let request = page.resolve(ROUTE_LIMIT);
        let (routes, total) = self
            .store
            .find_routes(&RouteFilter::Ids(user.bookmarks), request)
            .await?;
        let directory = Directory::load(self.store.as_ref(), routes.iter().map(|r| &r.creator)).await?;
        let data = routes
            .iter()
            .map(|r| RouteSummary::new(r, directory.summary(&r.creator)))
            .collect();
        Ok(Paginated::new(data, total, request))
    }

    pub async fn get_user_by_id(&self, user_id: &str) -> Result<UserProfile, ServiceError> {
        let id = parse_id(user_id, "user")?;
        let user = self.load(&id).await?;
        self.profile(user).await
    }

    /// `None` when no account has this username.
    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<UserProfile>, ServiceError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ServiceError::UsernameRequired);
        }
        match self.store.find_user_by_username(username).await? {
            Some(user) => Ok(Some(self.profile(user).await?)),
            None => {
                debug!("No user named {}", username);
                Ok(None)
            }
        }
    }

    pub async fn search_users(&self, query: &str, limit: u64) -> Result<Vec<UserSummary>, ServiceError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let limit = limit.clamp(1, MAX_LIMIT);
        let users = self.store.search_users(query, limit).await?;
        Ok(users.iter().map(User::summary).collect())
    }

    /// Applies only the fields present in `update`.
    pub async fn update_profile(&self, user_id: &str, update: ProfileUpdate) -> Result<PublicUser, ServiceError> {
        let id = parse_id(user_id, "user")?;
        let update = ProfileUpdate {
            name: update.name.map(|n| n.trim().to_string()),
            ..update
        };
        update.validate()?;
        if update.is_empty() {
            return Ok(self.load(&id).await?.to_public());
        }
        let user = self
            .store
            .update_profile(&id, &update)
            .await?
            .ok_or(ServiceError::UserNotFound)?;
        info!("Profile updated for user {}", id);
        Ok(user.to_public())
    }
}
