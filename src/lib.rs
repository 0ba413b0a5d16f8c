pub mod auth;
pub mod catalog;
pub mod cli;
pub mod clock;
pub mod error;
pub mod ledger;
pub mod metering;
pub mod notify;
pub mod registration;
pub mod wifimeter;

pub use error::{Error, Result};
pub use wifimeter::{APP_USER_AGENT, GIT_COMMIT_HASH};
