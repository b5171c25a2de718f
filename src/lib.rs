//! Local-first todo list.
//!
//! Todos live in an embedded SQLite document store ([`db`]) and can be
//! replicated with a Sync Gateway database ([`sync`]). The [`screens`]
//! module holds the view models the CLI drives.

pub mod commands;
pub mod config;
pub mod db;
pub mod models;
pub mod screens;
pub mod sync;
