pub mod db;
pub mod error;
pub mod manager;
pub mod types;

pub use error::SubscriptionError;
pub use manager::{db_time, SubscriptionManager};
pub use types::{NewSubscription, PurgeReport, Subscription, SubscriptionStats, VerificationRecord};
