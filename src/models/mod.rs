pub mod score;
pub mod session;
pub mod user;

pub use score::{Score, ScorePath, NO_CEILING};
pub use session::SessionToken;
pub use user::{Class, ClassHeader, User, UserId};
