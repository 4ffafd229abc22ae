mod common;

use common::{new_user, register, state};
use trip_track::models::ProfileUpdate;
use trip_track::ServiceError;

#[tokio::test]
async fn created_user_is_returned_without_password() {
    let state = state();
    let alice = register(&state, "alice").await;
    let json = serde_json::to_value(&alice).unwrap();
    assert!(json.get("password").is_none());
    assert_eq!(alice.email, "alice@example.com");
    assert!(alice.followers.is_empty());

    let logged_in = state.users.authenticate("alice", "secret123").await.unwrap();
    assert!(serde_json::to_value(&logged_in).unwrap().get("password").is_none());

    let by_name = state.users.get_user_by_username("alice").await.unwrap().unwrap();
    assert!(serde_json::to_value(&by_name).unwrap().get("password").is_none());

    let updated = state
        .users
        .update_profile(&alice.id, ProfileUpdate { bio: Some("hi".into()), ..Default::default() })
        .await
        .unwrap();
    assert!(serde_json::to_value(&updated).unwrap().get("password").is_none());
}

#[tokio::test]
async fn duplicate_email_and_username_are_rejected() {
    let state = state();
    register(&state, "alice").await;

    let mut same_email = new_user("alice2");
    same_email.email = "ALICE@example.com".into();
    assert!(matches!(
        state.users.create_user(same_email).await,
        Err(ServiceError::EmailExists)
    ));

    let mut same_username = new_user("alice");
    same_username.email = "other@example.com".into();
    assert!(matches!(
        state.users.create_user(same_username).await,
        Err(ServiceError::UsernameExists)
    ));
}

#[tokio::test]
async fn invalid_registration_reports_fields() {
    let state = state();
    let mut input = new_user("al");
    input.email = "not-an-email".into();
    match state.users.create_user(input).await {
        Err(ServiceError::Validation(fields)) => {
            assert!(fields.mentions("username"));
            assert!(fields.mentions("email"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn password_verification_and_update() {
    let state = state();
    let alice = register(&state, "alice").await;

    assert!(state.users.verify_password(&alice.id, "secret123").await.unwrap());
    assert!(!state.users.verify_password(&alice.id, "wrong").await.unwrap());
    assert!(matches!(
        state.users.verify_password("bogus", "secret123").await,
        Err(ServiceError::InvalidId(_))
    ));
    assert!(matches!(
        state
            .users
            .verify_password(&mongodb::bson::oid::ObjectId::new().to_hex(), "x")
            .await,
        Err(ServiceError::UserNotFound)
    ));

    assert!(matches!(
        state.users.update_password(&alice.id, "wrong", "newsecret").await,
        Err(ServiceError::InvalidPassword)
    ));
    state
        .users
        .update_password(&alice.id, "secret123", "newsecret")
        .await
        .unwrap();
    assert!(state.users.verify_password(&alice.id, "newsecret").await.unwrap());
    assert!(matches!(
        state.users.authenticate("alice@example.com", "secret123").await,
        Err(ServiceError::InvalidCredentials)
    ));
    assert!(state.users.authenticate("alice@example.com", "newsecret").await.is_ok());
}

#[tokio::test]
async fn follow_is_symmetric_and_not_repeatable() {
    let state = state();
    let alice = register(&state, "alice").await;
    let bob = register(&state, "bob").await;

    let profile = state.users.follow_user(&alice.id, &bob.id).await.unwrap();
    assert_eq!(profile.following.len(), 1);
    assert_eq!(profile.following[0].username, "bob");

    let followers = state.users.get_followers(&bob.id).await.unwrap();
    assert_eq!(followers.len(), 1);
    assert_eq!(followers[0].id, alice.id);
    assert!(state.users.get_following(&bob.id).await.unwrap().is_empty());

    assert!(matches!(
        state.users.follow_user(&alice.id, &bob.id).await,
        Err(ServiceError::AlreadyFollowing)
    ));

    state.users.unfollow_user(&alice.id, &bob.id).await.unwrap();
    assert!(state.users.get_followers(&bob.id).await.unwrap().is_empty());
    assert!(state.users.get_following(&alice.id).await.unwrap().is_empty());
    assert!(matches!(
        state.users.unfollow_user(&alice.id, &bob.id).await,
        Err(ServiceError::NotFollowing)
    ));
}

#[tokio::test]
async fn follow_rejects_self_and_unknown_users() {
    let state = state();
    let alice = register(&state, "alice").await;
    let ghost = mongodb::bson::oid::ObjectId::new().to_hex();

    assert!(matches!(
        state.users.follow_user(&alice.id, &alice.id).await,
        Err(ServiceError::SelfFollow)
    ));
    assert!(matches!(
        state.users.follow_user(&alice.id, &ghost).await,
        Err(ServiceError::UserNotFound)
    ));
    assert!(matches!(
        state.users.get_followers("not-an-id").await,
        Err(ServiceError::UserNotFound)
    ));
}

#[tokio::test]
async fn concurrent_follows_apply_once() {
    let state = state();
    let alice = register(&state, "alice").await;
    let bob = register(&state, "bob").await;

    let (first, second) = tokio::join!(
        state.users.follow_user(&alice.id, &bob.id),
        state.users.follow_user(&alice.id, &bob.id)
    );
    assert_eq!([first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(), 1);
    assert_eq!(state.users.get_followers(&bob.id).await.unwrap().len(), 1);
    assert_eq!(state.users.get_following(&alice.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn username_lookup() {
    let state = state();
    let alice = register(&state, "alice").await;
    let bob = register(&state, "bob").await;
    state.users.follow_user(&bob.id, &alice.id).await.unwrap();

    assert!(matches!(
        state.users.get_user_by_username("   ").await,
        Err(ServiceError::UsernameRequired)
    ));
    assert!(state.users.get_user_by_username("nobody").await.unwrap().is_none());

    let profile = state.users.get_user_by_username("alice").await.unwrap().unwrap();
    assert_eq!(profile.followers.len(), 1);
    assert_eq!(profile.followers[0].username, "bob");
}

#[tokio::test]
async fn profile_update_is_partial() {
    let state = state();
    let alice = register(&state, "alice").await;

    let updated = state
        .users
        .update_profile(
            &alice.id,
            ProfileUpdate { bio: Some("Travels by bike".into()), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(updated.bio, "Travels by bike");
    assert_eq!(updated.name, alice.name);

    let cleared = state
        .users
        .update_profile(&alice.id, ProfileUpdate { bio: Some(String::new()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(cleared.bio, "");

    let ghost = mongodb::bson::oid::ObjectId::new().to_hex();
    assert!(matches!(
        state
            .users
            .update_profile(&ghost, ProfileUpdate { name: Some("X".into()), ..Default::default() })
            .await,
        Err(ServiceError::UserNotFound)
    ));
}

#[tokio::test]
async fn search_users_matches_name_or_username() {
    let state = state();
    register(&state, "alice").await;
    register(&state, "alistair").await;
    register(&state, "bob").await;

    let found = state.users.search_users("ALI", 10).await.unwrap();
    let names: Vec<_> = found.iter().map(|u| u.username.as_str()).collect();
    assert_eq!(names, vec!["alice", "alistair"]);
    assert!(state.users.search_users("  ", 10).await.unwrap().is_empty());
}
