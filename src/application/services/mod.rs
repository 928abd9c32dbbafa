//! Application Services
//!
//! Business logic services that coordinate domain operations.
//!
//! ## Available Services
//!
//! - **AuthService**: bearer token verification
//! - **MessageService**: send, edit, delete and history
//! - **ReceiptService**: delivery/read acknowledgments
//! - **PresenceService**: online/offline transitions
//! - **TypingService**: typing indicators with expiry
//! - **CallService**: call signaling relay

pub mod auth_service;
pub mod call_service;
pub mod message_service;
pub mod presence_service;
pub mod receipt_service;
pub mod typing_service;

pub use auth_service::{AuthError, AuthService, Claims, JwtAuthService};
pub use call_service::{CallError, CallService, OfferOutcome, SignalKind};
pub use message_service::{MessageError, MessageService, MessageServiceImpl, SendMessageDto};
pub use presence_service::PresenceService;
pub use receipt_service::{ReceiptError, ReceiptResult, ReceiptService, ReceiptServiceImpl};
pub use typing_service::TypingService;
