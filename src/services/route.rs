use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use mongodb::bson::oid::ObjectId;
use validator::Validate;

use crate::error::{FieldErrors, ServiceError};
use crate::models::route::{DEFAULT_RADIUS_KM, MAX_COMMENT_LEN};
use crate::models::{
    normalize_tags, Comment, CommentView, GeoPoint, NewRoute, Route, RouteChanges, RouteFilter,
    RouteSummary, RouteView, Visibility,
};
use crate::pagination::{PageQuery, Paginated, FEED_LIMIT, ROUTE_LIMIT};
use crate::services::{parse_id, Directory};
use crate::store::Store;

#[derive(Clone)]
pub struct RouteService {
    store: Arc<dyn Store>,
}

fn check_point(field: &str, point: &GeoPoint, errors: &mut FieldErrors) {
    if let Err(e) = point.validate() {
        errors.merge(FieldErrors::from_validation(field, &e));
    }
}

fn check_measure(field: &str, value: f64, errors: &mut FieldErrors) {
    if !value.is_finite() {
        errors.push(field, "must be a finite number");
    }
}

fn into_result(errors: FieldErrors) -> Result<(), ServiceError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ServiceError::Validation(errors))
    }
}

impl RouteService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        RouteService { store }
    }

    async fn load(&self, id: &ObjectId) -> Result<Route, ServiceError> {
        self.store
            .find_route(id)
            .await?
            .ok_or(ServiceError::RouteNotFound)
    }

    /// Creator, likers and comment authors populated to summaries.
    async fn view(&self, route: Route) -> Result<RouteView, ServiceError> {
        let directory = Directory::load(
            self.store.as_ref(),
            std::iter::once(&route.creator)
                .chain(&route.likes)
                .chain(route.comments.iter().map(|c| &c.user)),
        )
        .await?;
        let comments = route
            .comments
            .iter()
            .map(|c| CommentView {
                id: c.id.to_hex(),
                content: c.content.clone(),
                user: directory.summary(&c.user),
                created_at: c.created_at,
            })
            .collect();
        Ok(RouteView {
            id: route.id.to_hex(),
            title: route.title.clone(),
            creator: directory.summary(&route.creator),
            start_point: route.start_point,
            end_point: route.end_point,
            waypoints: route.waypoints.clone(),
            travel_mode: route.travel_mode,
            description: route.description.clone(),
            total_distance: route.total_distance,
            total_time: route.total_time,
            likes: directory.summaries(&route.likes),
            comments,
            like_count: route.like_count(),
            comment_count: route.comment_count(),
            visibility: route.visibility,
            tags: route.tags,
            created_at: route.created_at,
            updated_at: route.updated_at,
        })
    }

    async fn list(&self, filter: RouteFilter, page: PageQuery, default_limit: u64) -> Result<Paginated<RouteSummary>, ServiceError> {
        let request = page.resolve(default_limit);
        let (routes, total) = self.store.find_routes(&filter, request).await?;
        debug!("Route listing {:?}: {} of {}", filter, routes.len(), total);
        let directory = Directory::load(self.store.as_ref(), routes.iter().map(|r| &r.creator)).await?;
        let data = routes
            .iter()
            .map(|r| RouteSummary::new(r, directory.summary(&r.creator)))
            .collect();
        Ok(Paginated::new(data, total, request))
    }

    pub async fn create_route(&self, creator_id: &str, input: NewRoute) -> Result<RouteView, ServiceError> {
        let creator = parse_id(creator_id, "creator")?;
        let input = NewRoute {
            title: input.title.trim().to_string(),
            ..input
        };
        let mut errors = match input.validate() {
            Ok(()) => FieldErrors::default(),
            Err(e) => FieldErrors::from_validation("", &e),
        };
        check_measure("totalDistance", input.total_distance, &mut errors);
        check_measure("totalTime", input.total_time, &mut errors);
        into_result(errors)?;
        if self.store.find_user(&creator).await?.is_none() {
            return Err(ServiceError::UserNotFound);
        }

        let now = Utc::now();
        let route = Route {
            id: ObjectId::new(),
            title: input.title,
            creator,
            start_point: input.start_point,
            end_point: input.end_point,
            waypoints: input.waypoints,
            travel_mode: input.travel_mode,
            description: input.description,
            total_distance: input.total_distance,
            total_time: input.total_time,
            likes: Vec::new(),
            comments: Vec::new(),
            visibility: input.visibility.unwrap_or_default(),
            tags: normalize_tags(&input.tags),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_route(&route).await?;
        info!("Route created: {} by {}", route.id, creator);
        self.view(route).await
    }

    pub async fn get_route(&self, route_id: &str) -> Result<RouteView, ServiceError> {
        let id = parse_id(route_id, "route")?;
        let route = self.load(&id).await?;
        self.view(route).await
    }

    /// Creator-only edit. The creator reference itself never changes.
    pub async fn update_route(
        &self,
        route_id: &str,
        user_id: &str,
        changes: RouteChanges,
    ) -> Result<RouteView, ServiceError> {
        let id = parse_id(route_id, "route")?;
        let user = parse_id(user_id, "user")?;
        let changes = RouteChanges {
            title: changes.title.map(|t| t.trim().to_string()),
            tags: changes.tags.map(|t| normalize_tags(&t)),
            ..changes
        };

        let mut errors = match changes.validate() {
            Ok(()) => FieldErrors::default(),
            Err(e) => FieldErrors::from_validation("", &e),
        };
        if let Some(point) = &changes.start_point {
            check_point("startPoint", point, &mut errors);
        }
        if let Some(point) = &changes.end_point {
            check_point("endPoint", point, &mut errors);
        }
        for (i, point) in changes.waypoints.iter().flatten().enumerate() {
            check_point(&format!("waypoints[{}]", i), point, &mut errors);
        }
        if let Some(distance) = changes.total_distance {
            check_measure("totalDistance", distance, &mut errors);
        }
        if let Some(time) = changes.total_time {
            check_measure("totalTime", time, &mut errors);
        }
        into_result(errors)?;

        let route = self.load(&id).await?;
        if route.creator != user {
            return Err(ServiceError::NotAuthorized);
        }
        if changes.is_empty() {
            return self.view(route).await;
        }
        let route = self
            .store
            .update_route(&id, &changes)
            .await?
            .ok_or(ServiceError::RouteNotFound)?;
        info!("Route updated: {}", id);
        self.view(route).await
    }

    pub async fn delete_route(&self, route_id: &str, user_id: &str) -> Result<(), ServiceError> {
        let id = parse_id(route_id, "route")?;
        let user = parse_id(user_id, "user")?;
        let route = self.load(&id).await?;
        if route.creator != user {
            return Err(ServiceError::NotAuthorized);
        }
        if !self.store.delete_route(&id).await? {
            return Err(ServiceError::RouteNotFound);
        }
        info!("Route deleted: {}", id);
        Ok(())
    }

    /// A single conditional add-to-set on `likes`.
    pub async fn like_route(&self, route_id: &str, user_id: &str) -> Result<RouteView, ServiceError> {
        let id = parse_id(route_id, "route")?;
        let user = parse_id(user_id, "user")?;
        self.load(&id).await?;
        if !self.store.add_like(&id, &user).await? {
            return Err(match self.store.find_route(&id).await? {
                Some(_) => ServiceError::AlreadyLiked,
                None => ServiceError::RouteNotFound,
            });
        }
        info!("User {} liked route {}", user, id);
        self.get_route(route_id).await
    }

    pub async fn unlike_route(&self, route_id: &str, user_id: &str) -> Result<RouteView, ServiceError> {
        let id = parse_id(route_id, "route")?;
        let user = parse_id(user_id, "user")?;
        self.load(&id).await?;
        if !self.store.remove_like(&id, &user).await? {
            return Err(match self.store.find_route(&id).await? {
                Some(_) => ServiceError::NotLiked,
                None => ServiceError::RouteNotFound,
            });
        }
        info!("User {} unliked route {}", user, id);
        self.get_route(route_id).await
    }

    /// Prepends a comment; the newest comment is always first.
    pub async fn add_comment(
        &self,
        route_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<RouteView, ServiceError> {
        let id = parse_id(route_id, "route")?;
        let content = content.trim();
        if content.is_empty() {
            return Err(ServiceError::EmptyComment);
        }
        if content.chars().count() > MAX_COMMENT_LEN {
            return Err(ServiceError::Validation(FieldErrors::single(
                "content",
                "comment must be at most 500 characters",
            )));
        }
        let user = parse_id(user_id, "user")?;

        let comment = Comment {
            id: ObjectId::new(),
            content: content.to_string(),
            user,
            created_at: Utc::now(),
        };
        if !self.store.push_comment(&id, &comment).await? {
            return Err(ServiceError::RouteNotFound);
        }
        info!("Comment {} added to route {}", comment.id, id);
        self.get_route(route_id).await
    }

    /// Only the comment's author may remove it.
    pub async fn remove_comment(
        &self,
        route_id: &str,
        comment_id: &str,
        user_id: &str,
    ) -> Result<RouteView, ServiceError> {
        let id = parse_id(route_id, "route")?;
        let comment_id = parse_id(comment_id, "comment")?;
        let user = parse_id(user_id, "user")?;
        let route = self.load(&id).await?;
        let comment = route.comment(&comment_id).ok_or(ServiceError::CommentNotFound)?;
        if comment.user != user {
            return Err(ServiceError::NotAuthorized);
        }
        if !self.store.pull_comment(&id, &comment_id).await? {
            return Err(ServiceError::CommentNotFound);
        }
        info!("Comment {} removed from route {}", comment_id, id);
        self.get_route(route_id).await
    }

    /// All routes by one creator, any visibility.
    pub async fn get_routes_by_user(&self, user_id: &str, page: PageQuery) -> Result<Paginated<RouteSummary>, ServiceError> {
        let creator = parse_id(user_id, "user")?;
        self.list(RouteFilter::Creator(creator), page, ROUTE_LIMIT).await
    }

    pub async fn get_public_routes(&self, page: PageQuery) -> Result<Paginated<RouteSummary>, ServiceError> {
        self.list(RouteFilter::Public, page, ROUTE_LIMIT).await
    }

    pub async fn search_routes(&self, query: &str, page: PageQuery) -> Result<Paginated<RouteSummary>, ServiceError> {
        let query = query.trim();
        let filter = if query.is_empty() {
            RouteFilter::Public
        } else {
            RouteFilter::Search(query.to_string())
        };
        self.list(filter, page, ROUTE_LIMIT).await
    }

    /// Public routes starting or ending within `radius_km` (default 10) of the point.
    pub async fn get_nearby_routes(
        &self,
        lat: f64,
        lng: f64,
        radius_km: Option<f64>,
        page: PageQuery,
    ) -> Result<Paginated<RouteSummary>, ServiceError> {
        let center = GeoPoint::new(lat, lng);
        let mut errors = FieldErrors::default();
        check_point("", &center, &mut errors);
        let radius_km = radius_km.unwrap_or(DEFAULT_RADIUS_KM);
        if !radius_km.is_finite() || radius_km <= 0.0 {
            errors.push("radius", "radius must be a positive number of kilometres");
        }
        into_result(errors)?;
        self.list(RouteFilter::Nearby { center, radius_km }, page, ROUTE_LIMIT).await
    }

    /// The generic feed. Anonymous viewers get public routes only.
    pub async fn get_feed(&self, viewer_id: Option<&str>, page: PageQuery) -> Result<Paginated<RouteSummary>, ServiceError> {
        let filter = match viewer_id {
            Some(raw) => {
                let viewer = parse_id(raw, "user")?;
                let user = self
                    .store
                    .find_user(&viewer)
                    .await?
                    .ok_or(ServiceError::UserNotFound)?;
                RouteFilter::Feed {
                    viewer,
                    following: user.following,
                }
            }
            None => RouteFilter::Public,
        };
        self.list(filter, page, FEED_LIMIT).await
    }

    /// Whether `viewer` may see the route at all.
    pub async fn can_view(&self, route_id: &str, viewer_id: Option<&str>) -> Result<bool, ServiceError> {
        let route = self.load(&parse_id(route_id, "route")?).await?;
        if route.visibility == Visibility::Public {
            return Ok(true);
        }
        let viewer = match viewer_id {
            Some(raw) => parse_id(raw, "user")?,
            None => return Ok(false),
        };
        if route.creator == viewer {
            return Ok(true);
        }
        if route.visibility == Visibility::Followers {
            let user = self
                .store
                .find_user(&viewer)
                .await?
                .ok_or(ServiceError::UserNotFound)?;
            return Ok(user.is_following(&route.creator));
        }
        Ok(false)
    }
}
