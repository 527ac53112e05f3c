// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The tavern game-server node.
//!
//! [`node::run`] is the composition root: it wires the store, the session
//! hub, the domain services, the AI pipeline and the HTTP/WebSocket router
//! together and serves until shutdown. Everything else in this crate is a
//! subsystem it assembles.

pub mod auth;
pub mod error;
pub mod http;
pub mod hub;
pub mod node;
pub mod services;

pub use error::ApiError;
pub use hub::{HubHandle, SessionHub};
pub use node::run;
