//! Services module
//!
//! Business logic services that coordinate between the API layer and the store.

pub mod auth;
pub mod digest;
pub mod import;
pub mod metrics;
pub mod objectives;
pub mod quality;
pub mod scheduler;
pub mod tasks;
pub mod users;

pub use auth::MagicLinkService;
pub use digest::{DigestService, LogMailer, Mailer};
pub use import::ImportService;
pub use metrics::MetricsService;
pub use objectives::ObjectivesService;
pub use scheduler::{DigestRunner, DigestScheduler};
pub use tasks::TasksService;
pub use users::UsersService;
