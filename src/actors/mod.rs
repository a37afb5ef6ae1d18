//! Actor-based monitoring runtime
//!
//! Each concurrent concern runs as an independent async task communicating
//! via Tokio channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!                  ┌─────────────────┐
//!                  │ Runtime (start) │
//!                  └────────┬────────┘
//!                           │ spawns
//!      ┌──────────────┬─────┴──────┬───────────────┐
//!      │              │            │               │
//! ┌────▼─────┐  ┌─────▼─────┐ ┌────▼────┐  ┌───────▼───────┐
//! │ Health   │  │  Alert    │ │ System  │  │  Broadcast    │
//! │ Poller   │  │  Engine   │ │Collector│  │  Hub          │
//! └────┬─────┘  └─────┬─────┘ └────┬────┘  └───────▲───────┘
//!      │              │            │               │
//!      │ health:change│ alert      │ samples       │ subscribes
//!      └──────────────┴────────────┴───────────────┘
//!            broadcast channels / shared aggregator
//! ```
//!
//! ## Actor Types
//!
//! - **HealthPollerActor**: fans out concurrent HTTP probes and owns the
//!   latest result per service
//! - **AlertEngineActor**: evaluates rules and owns the alert lifecycle
//! - **SystemCollectorActor**: samples host CPU/memory into the aggregator
//! - **BroadcastHubActor**: owns client subscriptions and pushes updates
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each actor has an mpsc command channel for control
//!    messages, wrapped by a cloneable handle
//! 2. **Events**: discrete alert/health events publish to broadcast
//!    channels for fan-out
//! 3. **Request/Response**: oneshot channels for synchronous queries

pub mod collector;
pub mod engine;
pub mod health;
pub mod hub;
pub mod messages;
