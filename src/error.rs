// src/error.rs

use std::collections::BTreeMap;
use std::fmt;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;
use validator::{ValidationErrors, ValidationErrorsKind};

/// Failures raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Driver(#[from] mongodb::error::Error),

    #[error("duplicate value for unique field `{field}`")]
    DuplicateKey { field: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<mongodb::bson::ser::Error> for StoreError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Field-level validation messages keyed by dotted field path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldErrors(pub BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::default();
        errors.push(field, message);
        errors
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when any recorded path is `field` or ends in `.field`.
    pub fn mentions(&self, field: &str) -> bool {
        self.0
            .keys()
            .any(|key| key == field || key.ends_with(&format!(".{}", field)))
    }

    /// Flattens nested validator output, prefixing every path with `prefix`.
    pub fn from_validation(prefix: &str, errors: &ValidationErrors) -> Self {
        let mut out = FieldErrors::default();
        collect(prefix, errors, &mut out);
        out
    }

    pub fn merge(&mut self, other: FieldErrors) {
        for (field, messages) in other.0 {
            self.0.entry(field).or_default().extend(messages);
        }
    }
}

fn join_path(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", prefix, field)
    }
}

fn collect(prefix: &str, errors: &ValidationErrors, out: &mut FieldErrors) {
    for (field, kind) in errors.errors() {
        let path = join_path(prefix, field);
        match kind {
            ValidationErrorsKind::Field(list) => {
                for err in list {
                    let message = err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("failed `{}` check", err.code));
                    out.push(path.clone(), message);
                }
            }
            ValidationErrorsKind::Struct(inner) => collect(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect(&format!("{}[{}]", path, index), inner, out);
                }
            }
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{}: {}", field, message)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Every failure a service operation can report to its caller.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(FieldErrors),

    #[error("invalid {0} id")]
    InvalidId(&'static str),

    #[error("email already registered")]
    EmailExists,

    #[error("username already taken")]
    UsernameExists,

    #[error("username is required")]
    UsernameRequired,

    #[error("user not found")]
    UserNotFound,

    #[error("current password is incorrect")]
    InvalidPassword,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("users cannot follow themselves")]
    SelfFollow,

    #[error("already following this user")]
    AlreadyFollowing,

    #[error("not following this user")]
    NotFollowing,

    #[error("route already bookmarked")]
    AlreadyBookmarked,

    #[error("route is not bookmarked")]
    NotBookmarked,

    #[error("route not found")]
    RouteNotFound,

    #[error("route already liked")]
    AlreadyLiked,

    #[error("route has not been liked")]
    NotLiked,

    #[error("comment content cannot be empty")]
    EmptyComment,

    #[error("comment not found")]
    CommentNotFound,

    #[error("not authorized to modify this resource")]
    NotAuthorized,

    #[error("a conversation needs at least two participants")]
    TooFewParticipants,

    #[error("conversation not found")]
    ConversationNotFound,

    #[error("message not found")]
    MessageNotFound,

    #[error("password hashing failed: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),

    #[error("message {message_id} was stored but the conversation pointer was not updated: {source}")]
    LastMessageUpdate {
        message_id: String,
        #[source]
        source: Box<ServiceError>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ValidationErrors> for ServiceError {
    fn from(errors: ValidationErrors) -> Self {
        ServiceError::Validation(FieldErrors::from_validation("", &errors))
    }
}

impl ServiceError {
    /// Stable machine-readable code for the error body.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation_error",
            ServiceError::InvalidId(_) => "invalid_id",
            ServiceError::EmailExists => "email_exists",
            ServiceError::UsernameExists => "username_exists",
            ServiceError::UsernameRequired => "username_required",
            ServiceError::UserNotFound => "user_not_found",
            ServiceError::InvalidPassword => "invalid_password",
            ServiceError::InvalidCredentials => "invalid_credentials",
            ServiceError::SelfFollow => "self_follow",
            ServiceError::AlreadyFollowing => "already_following",
            ServiceError::NotFollowing => "not_following",
            ServiceError::AlreadyBookmarked => "already_bookmarked",
            ServiceError::NotBookmarked => "not_bookmarked",
            ServiceError::RouteNotFound => "route_not_found",
            ServiceError::AlreadyLiked => "already_liked",
            ServiceError::NotLiked => "not_liked",
            ServiceError::EmptyComment => "empty_comment",
            ServiceError::CommentNotFound => "comment_not_found",
            ServiceError::NotAuthorized => "not_authorized",
            ServiceError::TooFewParticipants => "too_few_participants",
            ServiceError::ConversationNotFound => "conversation_not_found",
            ServiceError::MessageNotFound => "message_not_found",
            ServiceError::PasswordHash(_) => "password_hash",
            ServiceError::LastMessageUpdate { .. } => "last_message_update",
            ServiceError::Store(_) => "store_error",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ServiceError::UserNotFound
                | ServiceError::RouteNotFound
                | ServiceError::CommentNotFound
                | ServiceError::ConversationNotFound
                | ServiceError::MessageNotFound
        )
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<&'a FieldErrors>,
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidPassword | ServiceError::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            ServiceError::NotAuthorized => StatusCode::FORBIDDEN,
            err if err.is_not_found() => StatusCode::NOT_FOUND,
            ServiceError::PasswordHash(_)
            | ServiceError::LastMessageUpdate { .. }
            | ServiceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let fields = match self {
            ServiceError::Validation(fields) => Some(fields),
            _ => None,
        };
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.kind(),
            message: self.to_string(),
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Inner {
        #[validate(range(min = -90.0, max = 90.0, message = "latitude out of range"))]
        lat: f64,
    }

    #[derive(Validate)]
    struct Outer {
        #[validate(length(min = 1))]
        title: String,
        #[validate]
        point: Inner,
    }

    #[test]
    fn flattens_nested_validation_errors() {
        let outer = Outer {
            title: String::new(),
            point: Inner { lat: 91.0 },
        };
        let err = ServiceError::from(outer.validate().unwrap_err());
        match err {
            ServiceError::Validation(fields) => {
                assert!(fields.mentions("title"));
                assert!(fields.mentions("lat"));
                assert!(fields.to_string().contains("latitude out of range"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn maps_errors_to_status_codes() {
        assert_eq!(ServiceError::EmailExists.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ServiceError::InvalidId("route").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ServiceError::RouteNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ServiceError::NotAuthorized.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ServiceError::InvalidCredentials.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::Store(StoreError::Serialization("bad".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn last_message_failure_keeps_message_id() {
        let err = ServiceError::LastMessageUpdate {
            message_id: "abc".into(),
            source: Box::new(ServiceError::ConversationNotFound),
        };
        assert!(err.to_string().contains("abc"));
        assert_eq!(err.kind(), "last_message_update");
    }
}
