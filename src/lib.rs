pub mod client;
pub mod config;
pub mod credentials;
pub mod email;
pub mod files;
pub mod mailer;
pub mod owners;
pub mod page;
pub mod projects;
pub mod web;

// Re-export commonly used types
pub use client::{ApiClient, ApiError};
pub use config::{Config, SmtpSecurity};
pub use mailer::{MailerError, RunSummary};
pub use owners::{OwnerExtractor, OwnerReport};
