//! Repository Implementations
//!
//! PostgreSQL implementations of the domain repository traits.
//!
//! ## Available Repositories
//!
//! - **PgMessageRepository** - messages plus recipient delivery rows
//! - **PgDeliveryRepository** - monotonic delivery status updates
//! - **PgMembershipRepository** - chat membership lookups
//! - **PgPresenceRepository** - persisted online state and last-seen
//! - **PgCallRepository** - post-call records
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use sqlx::PgPool;
//! use chat_relay::infrastructure::repositories::{PgMembershipRepository, PgMessageRepository};
//!
//! fn setup_repositories(pool: PgPool) {
//!     let message_repo = PgMessageRepository::new(pool.clone());
//!     let member_repo = PgMembershipRepository::new(pool);
//! }
//! ```

pub mod call_repository;
pub mod delivery_repository;
pub mod membership_repository;
pub mod message_repository;
pub mod presence_repository;

pub use call_repository::PgCallRepository;
pub use delivery_repository::PgDeliveryRepository;
pub use membership_repository::PgMembershipRepository;
pub use message_repository::PgMessageRepository;
pub use presence_repository::PgPresenceRepository;
