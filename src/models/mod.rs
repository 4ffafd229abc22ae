pub mod conversation;
pub mod message;
pub mod route;
pub mod user;

pub use conversation::{Conversation, ConversationView};
pub use message::{Message, MessageView};
pub use route::{
    normalize_tags, Comment, CommentView, GeoPoint, NewRoute, Route, RouteChanges, RouteFilter,
    RouteSummary, RouteView, TravelMode, Visibility,
};
pub use user::{NewUser, ProfileUpdate, PublicUser, User, UserProfile, UserSet, UserSummary};
