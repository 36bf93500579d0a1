//! # Conductor Service
//!
//! Signal receivers and the service facade tying the Conductor crates
//! together.
//!
//! ## Overview
//!
//! The conductor-service crate handles:
//! - **Facade**: [`Conductor`] runs every mutating operation and sends the
//!   matching lifecycle signal
//! - **Receivers**: audit logging, role slots, user counts, cloud links,
//!   orders, price estimate cleanup and SSH key propagation
//! - **Integrations**: GeoIP lookups, invitation mail and the cloud backend
//! - **Ambient**: configuration, logging setup, retries and reports
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   mutate    ┌──────────────────────────────┐
//! │  Conductor   │ ──────────→ │ Structure / Inventory / Cost │
//! └──────┬───────┘             └──────────────────────────────┘
//!        │ Signal
//!        ▼
//! ┌──────────────────┐  Event   ┌──────────┐   ┌────────────────┐
//! │ SignalDispatcher │ ───────→ │ EventLog │ + │ MemoryEventBus │
//! └──────────────────┘          └──────────┘   └────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use conductor_service::{init_logging, ConductorConfig, Conductor, ConductorState};
//! use conductor_structure::{Customer, Project, User};
//!
//! async fn example() -> conductor_service::ServiceResult<()> {
//!     init_logging();
//!     let conductor = Conductor::new(ConductorState::new(ConductorConfig::from_env())).await;
//!
//!     let staff = conductor.register_user(User::new("admin", "admin@example.com").staff()).await?;
//!     let customer = conductor.create_customer(staff, Customer::new("Acme")).await?;
//!     conductor.create_project(staff, Project::new(customer.id, "Web")).await?;
//!
//!     println!("{}", conductor.dump_users().await);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod conductor;
pub mod config;
pub mod error;
pub mod geoip;
pub mod handlers;
pub mod mail;
pub mod report;
pub mod retry;
pub mod telemetry;

pub use backend::{CloudBackend, MemoryCloudBackend};
pub use conductor::{Conductor, ConductorState};
pub use config::{ConductorConfig, ConfigError};
pub use error::{ServiceError, ServiceResult};
pub use geoip::{Coordinates, GeoIpClient, GeoIpError};
pub use mail::{InvitationMail, MailError, MailMessage, Mailer, MemoryMailer};
pub use report::dump_users;
pub use retry::{with_retry, with_retry_if, RetryPolicy};
pub use telemetry::{init_logging, init_logging_with_config, LoggingConfig};
