//! # Domain Entities
//!
//! Core records of the delivery path. Persisted entities map directly to
//! their tables; call sessions and presence counts live in memory (or in the
//! backplane store).
//!
//! - **Message**: an immutable envelope plus edit/delete stamps
//! - **DeliveryRecord**: per-recipient `sent -> delivered -> read` state
//! - **Membership**: which users belong to which chat
//! - **Presence**: online flag and last-seen timestamp
//! - **Call**: live call sessions and post-call records
//!
//! Each entity has an associated repository trait implemented in the
//! infrastructure layer.

mod call;
mod delivery;
mod membership;
mod message;
mod presence;

pub use call::{CallLog, CallRepository, CallSession, UnavailableReason};
pub use delivery::{AdvanceOutcome, DeliveryRecord, DeliveryRepository, DeliveryStatus};
pub use membership::MembershipRepository;
pub use message::{Message, MessageRepository, MessageType, MessageView, MAX_CONTENT_LENGTH};
pub use presence::{Presence, PresenceCounter, PresenceRepository};

#[cfg(test)]
pub use call::MockCallRepository;
#[cfg(test)]
pub use delivery::MockDeliveryRepository;
#[cfg(test)]
pub use membership::MockMembershipRepository;
#[cfg(test)]
pub use message::MockMessageRepository;
#[cfg(test)]
pub use presence::{MockPresenceCounter, MockPresenceRepository};
