//! Offline-first resource and mutation synchronization engine.
//!
//! The agent sits between an application and the network: it classifies
//! every intercepted request, satisfies what it can from a versioned local
//! cache, queues failed state-changing requests for replay once
//! connectivity returns, and pushes control messages to connected
//! foreground contexts.

pub mod agent;
pub mod broadcast;
pub mod cache;
pub mod config;
pub mod event;
pub mod lifecycle;
pub mod net;
pub mod observer;
pub mod replay;
pub mod request;
pub mod router;
pub mod strategy;
