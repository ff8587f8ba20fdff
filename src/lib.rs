#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod auth;
pub mod config;
pub mod dashboard;
pub mod gateway;
pub mod sync;

pub use auth::{Identity, SessionController, SessionState};
pub use config::ConsoleConfig;
pub use dashboard::{Dashboard, DashboardError, Notice, NoticeLevel, PendingDelete, ResourceKind};
pub use gateway::{GatewayError, HttpGateway};
