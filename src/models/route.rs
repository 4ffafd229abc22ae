use std::borrow::Cow;

use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::models::user::{hex_ids, UserSummary};

pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const DEFAULT_RADIUS_KM: f64 = 10.0;
pub const MAX_COMMENT_LEN: usize = 500;

/// A coordinate. Longitude is declared first so MongoDB reads the embedded
/// document as a legacy `(x, y)` pair in geo queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lng: f64,
    pub lat: f64,
}

fn out_of_range(message: &'static str) -> ValidationError {
    let mut error = ValidationError::new("range");
    error.message = Some(Cow::Borrowed(message));
    error
}

/// Written by hand because a derived `range` check passes NaN.
impl Validate for GeoPoint {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if !(-180.0..=180.0).contains(&self.lng) {
            errors.add("lng", out_of_range("longitude must be between -180 and 180"));
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            errors.add("lat", out_of_range("latitude must be between -90 and 90"));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        GeoPoint { lng, lat }
    }

    /// Great-circle distance in kilometres (haversine).
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlng = (other.lng - self.lng).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
    }

    /// Spherical-cap containment: is this point within `radius_km` of `center`?
    pub fn within_km(&self, center: &GeoPoint, radius_km: f64) -> bool {
        self.distance_km(center) <= radius_km
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TravelMode {
    Driving,
    Bicycling,
    Transit,
    Walking,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
    Followers,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Followers => "followers",
        }
    }
}

/// A comment embedded in its route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub content: String,
    pub user: ObjectId,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub title: String,
    pub creator: ObjectId,
    pub start_point: GeoPoint,
    pub end_point: GeoPoint,
    #[serde(default)]
    pub waypoints: Vec<GeoPoint>,
    pub travel_mode: TravelMode,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub total_distance: f64,
    #[serde(default)]
    pub total_time: f64,
    #[serde(default)]
    pub likes: Vec<ObjectId>,
    /// Newest first.
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Route {
    pub fn like_count(&self) -> usize {
        self.likes.len()
    }

    pub fn comment_count(&self) -> usize {
        self.comments.len()
    }

    pub fn is_liked_by(&self, user: &ObjectId) -> bool {
        self.likes.contains(user)
    }

    pub fn comment(&self, id: &ObjectId) -> Option<&Comment> {
        self.comments.iter().find(|c| &c.id == id)
    }

    pub fn apply(&mut self, changes: &RouteChanges) {
        if let Some(title) = &changes.title {
            self.title = title.clone();
        }
        if let Some(point) = changes.start_point {
            self.start_point = point;
        }
        if let Some(point) = changes.end_point {
            self.end_point = point;
        }
        if let Some(waypoints) = &changes.waypoints {
            self.waypoints = waypoints.clone();
        }
        if let Some(mode) = changes.travel_mode {
            self.travel_mode = mode;
        }
        if let Some(description) = &changes.description {
            self.description = description.clone();
        }
        if let Some(distance) = changes.total_distance {
            self.total_distance = distance;
        }
        if let Some(time) = changes.total_time {
            self.total_time = time;
        }
        if let Some(visibility) = changes.visibility {
            self.visibility = visibility;
        }
        if let Some(tags) = &changes.tags {
            self.tags = tags.clone();
        }
    }
}

/// Trimmed, lowercased, de-duplicated tags; blanks are dropped.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

/// Route creation payload.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewRoute {
    #[validate(length(min = 1, max = 100, message = "title must be 1-100 characters"))]
    pub title: String,
    #[validate]
    pub start_point: GeoPoint,
    #[validate]
    pub end_point: GeoPoint,
    #[serde(default)]
    #[validate]
    pub waypoints: Vec<GeoPoint>,
    pub travel_mode: TravelMode,
    #[serde(default)]
    #[validate(length(max = 2000, message = "description must be at most 2000 characters"))]
    pub description: String,
    #[serde(default)]
    #[validate(range(min = 0.0, message = "distance cannot be negative"))]
    pub total_distance: f64,
    #[serde(default)]
    #[validate(range(min = 0.0, message = "time cannot be negative"))]
    pub total_time: f64,
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Partial route edit. Points are checked separately since they are optional.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RouteChanges {
    #[validate(length(min = 1, max = 100, message = "title must be 1-100 characters"))]
    pub title: Option<String>,
    pub start_point: Option<GeoPoint>,
    pub end_point: Option<GeoPoint>,
    pub waypoints: Option<Vec<GeoPoint>>,
    pub travel_mode: Option<TravelMode>,
    #[validate(length(max = 2000, message = "description must be at most 2000 characters"))]
    pub description: Option<String>,
    #[validate(range(min = 0.0, message = "distance cannot be negative"))]
    pub total_distance: Option<f64>,
    #[validate(range(min = 0.0, message = "time cannot be negative"))]
    pub total_time: Option<f64>,
    pub visibility: Option<Visibility>,
    pub tags: Option<Vec<String>>,
}

impl RouteChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.start_point.is_none()
            && self.end_point.is_none()
            && self.waypoints.is_none()
            && self.travel_mode.is_none()
            && self.description.is_none()
            && self.total_distance.is_none()
            && self.total_time.is_none()
            && self.visibility.is_none()
            && self.tags.is_none()
    }
}

/// Which routes a listing selects.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteFilter {
    Creator(ObjectId),
    Public,
    /// Case-insensitive substring over title, description and tags; public only.
    Search(String),
    /// Start or end point inside the cap; public only.
    Nearby { center: GeoPoint, radius_km: f64 },
    /// Public routes, the viewer's own, and followers-only routes of followed users.
    Feed {
        viewer: ObjectId,
        following: Vec<ObjectId>,
    },
    Ids(Vec<ObjectId>),
}

impl RouteFilter {
    pub fn matches(&self, route: &Route) -> bool {
        let public = route.visibility == Visibility::Public;
        match self {
            RouteFilter::Creator(id) => &route.creator == id,
            RouteFilter::Public => public,
            RouteFilter::Search(query) => {
                let needle = query.to_lowercase();
                public
                    && (route.title.to_lowercase().contains(&needle)
                        || route.description.to_lowercase().contains(&needle)
                        || route.tags.iter().any(|t| t.to_lowercase().contains(&needle)))
            }
            RouteFilter::Nearby { center, radius_km } => {
                public
                    && (route.start_point.within_km(center, *radius_km)
                        || route.end_point.within_km(center, *radius_km))
            }
            RouteFilter::Feed { viewer, following } => {
                public
                    || &route.creator == viewer
                    || (route.visibility == Visibility::Followers
                        && following.contains(&route.creator))
            }
            RouteFilter::Ids(ids) => ids.contains(&route.id),
        }
    }
}

/// Comment with its author populated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    #[serde(rename = "_id")]
    pub id: String,
    pub content: String,
    pub user: UserSummary,
    pub created_at: DateTime<Utc>,
}

/// A single route with creator, likers and comment authors populated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteView {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub creator: UserSummary,
    pub start_point: GeoPoint,
    pub end_point: GeoPoint,
    pub waypoints: Vec<GeoPoint>,
    pub travel_mode: TravelMode,
    pub description: String,
    pub total_distance: f64,
    pub total_time: f64,
    pub likes: Vec<UserSummary>,
    pub comments: Vec<CommentView>,
    pub like_count: usize,
    pub comment_count: usize,
    pub visibility: Visibility,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Feed entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSummary {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub creator: UserSummary,
    pub start_point: GeoPoint,
    pub end_point: GeoPoint,
    pub travel_mode: TravelMode,
    pub total_distance: f64,
    pub total_time: f64,
    pub likes: Vec<String>,
    pub like_count: usize,
    pub comment_count: usize,
    pub visibility: Visibility,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl RouteSummary {
    pub fn new(route: &Route, creator: UserSummary) -> Self {
        RouteSummary {
            id: route.id.to_hex(),
            title: route.title.clone(),
            creator,
            start_point: route.start_point,
            end_point: route.end_point,
            travel_mode: route.travel_mode,
            total_distance: route.total_distance,
            total_time: route.total_time,
            likes: hex_ids(&route.likes),
            like_count: route.like_count(),
            comment_count: route.comment_count(),
            visibility: route.visibility,
            tags: route.tags.clone(),
            created_at: route.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(visibility: Visibility) -> Route {
        let now = Utc::now();
        Route {
            id: ObjectId::new(),
            title: "Coastal Ride".into(),
            creator: ObjectId::new(),
            start_point: GeoPoint::new(48.8566, 2.3522),
            end_point: GeoPoint::new(48.8049, 2.1204),
            waypoints: vec![],
            travel_mode: TravelMode::Bicycling,
            description: "Along the Seine".into(),
            total_distance: 20.0,
            total_time: 75.0,
            likes: vec![],
            comments: vec![],
            visibility,
            tags: vec!["river".into(), "paris".into()],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn latitude_out_of_range_is_rejected() {
        assert!(GeoPoint::new(91.0, 0.0).validate().is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).validate().is_err());
        assert!(GeoPoint::new(0.0, f64::INFINITY).validate().is_err());
        assert!(GeoPoint::new(90.0, -180.0).validate().is_ok());
        assert!(GeoPoint::new(0.0, 180.5).validate().is_err());
    }

    #[test]
    fn distance_between_paris_and_london() {
        let paris = GeoPoint::new(48.8566, 2.3522);
        let london = GeoPoint::new(51.5074, -0.1278);
        let d = paris.distance_km(&london);
        assert!((d - 343.5).abs() < 2.0, "got {d}");
        assert!(paris.within_km(&paris, 0.0));
    }

    #[test]
    fn tags_are_normalized() {
        let tags = vec![" Hiking ".to_string(), "hiking".into(), "".into(), "ALPS".into()];
        assert_eq!(normalize_tags(&tags), vec!["hiking", "alps"]);
    }

    #[test]
    fn search_matches_title_description_and_tags() {
        let r = route(Visibility::Public);
        assert!(RouteFilter::Search("coastal".into()).matches(&r));
        assert!(RouteFilter::Search("SEINE".into()).matches(&r));
        assert!(RouteFilter::Search("pari".into()).matches(&r));
        assert!(!RouteFilter::Search("desert".into()).matches(&r));
        assert!(!RouteFilter::Search("coastal".into()).matches(&route(Visibility::Private)));
    }

    #[test]
    fn nearby_uses_start_or_end_point() {
        let r = route(Visibility::Public);
        let versailles = GeoPoint::new(48.8049, 2.1204);
        let lyon = GeoPoint::new(45.764, 4.8357);
        assert!(RouteFilter::Nearby { center: versailles, radius_km: 1.0 }.matches(&r));
        assert!(!RouteFilter::Nearby { center: lyon, radius_km: 10.0 }.matches(&r));
    }

    #[test]
    fn feed_respects_visibility() {
        let viewer = ObjectId::new();
        let mut followers_only = route(Visibility::Followers);
        let private = route(Visibility::Private);
        let stranger_feed = RouteFilter::Feed { viewer, following: vec![] };
        assert!(!stranger_feed.matches(&followers_only));
        let follower_feed = RouteFilter::Feed {
            viewer,
            following: vec![followers_only.creator],
        };
        assert!(follower_feed.matches(&followers_only));
        assert!(!follower_feed.matches(&private));
        followers_only.creator = viewer;
        assert!(stranger_feed.matches(&followers_only));
    }

    #[test]
    fn travel_mode_uses_uppercase_names() {
        assert_eq!(serde_json::to_value(TravelMode::Walking).unwrap(), "WALKING");
        assert!(serde_json::from_value::<TravelMode>(serde_json::json!("FLYING")).is_err());
    }
}
