//! Server-rendered HTML shells.

pub mod views;
