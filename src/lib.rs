//! # Chat Relay Library
//!
//! Real-time message-delivery path of a chat product:
//! - WebSocket gateway with per-chat rooms and server-driven heartbeats
//! - Message fan-out, delivery/read receipts, typing and presence
//! - WebRTC call signaling relay
//! - Redis pub/sub backplane for multi-instance deployments
//! - REST endpoints for history reconciliation
//!
//! ## Architecture
//!
//! The crate follows Clean Architecture principles:
//!
//! - **Domain Layer**: Entities, real-time events and repository traits
//! - **Application Layer**: Delivery services and DTOs
//! - **Infrastructure Layer**: PostgreSQL repositories, Redis backplane, metrics
//! - **Presentation Layer**: HTTP handlers and WebSocket gateway
//!
//! ## Module Structure
//!
//! ```text
//! chat_relay/
//! +-- config/         Configuration management
//! +-- domain/         Entities, events and traits
//! +-- application/    Services and DTOs
//! +-- infrastructure/ Database, backplane and metrics
//! +-- presentation/   HTTP routes and WebSocket handlers
//! +-- shared/         Common utilities (errors, snowflake IDs)
//! ```

// Configuration module
pub mod config;

// Domain layer - Core business logic
pub mod domain;

// Application layer - Business services
pub mod application;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
