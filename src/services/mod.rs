//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business logic and persistence concerns so route
//! handlers can stay focused on protocol translation and auth plumbing.
//! Table-scoped services take the caller's `TableRole` and enforce it
//! themselves before touching the database.

pub mod account;
pub mod character;
pub mod chat;
pub mod dice;
pub mod drag;
pub mod health;
pub mod invitation;
pub mod journal;
pub mod presence;
pub mod scene;
pub mod session;
pub mod sheet_policy;
pub mod table;
pub mod token;
