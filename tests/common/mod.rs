#![allow(dead_code)]

use std::sync::Arc;

use trip_track::config::{Config, StoreBackend};
use trip_track::models::{GeoPoint, NewRoute, NewUser, PublicUser, TravelMode, Visibility};
use trip_track::store::MemoryStore;
use trip_track::AppState;

pub fn config() -> Config {
    Config {
        mongo_uri: String::new(),
        database_name: "trip_track_test".into(),
        store_backend: StoreBackend::Memory,
        bcrypt_cost: 4,
    }
}

pub fn state() -> AppState {
    state_with(Arc::new(MemoryStore::new()))
}

pub fn state_with(store: Arc<MemoryStore>) -> AppState {
    AppState::new(store, config())
}

pub fn new_user(username: &str) -> NewUser {
    NewUser {
        name: username.to_uppercase(),
        username: username.to_string(),
        email: format!("{}@example.com", username),
        password: "secret123".into(),
        bio: String::new(),
        profile_picture: String::new(),
    }
}

pub async fn register(state: &AppState, username: &str) -> PublicUser {
    state.users.create_user(new_user(username)).await.unwrap()
}

pub fn new_route(title: &str, start: GeoPoint, visibility: Visibility) -> NewRoute {
    NewRoute {
        title: title.to_string(),
        start_point: start,
        end_point: GeoPoint::new(start.lat + 0.5, start.lng + 0.5),
        waypoints: vec![],
        travel_mode: TravelMode::Driving,
        description: String::new(),
        total_distance: 12.5,
        total_time: 30.0,
        visibility: Some(visibility),
        tags: vec![],
    }
}

pub fn paris() -> GeoPoint {
    GeoPoint::new(48.8566, 2.3522)
}
