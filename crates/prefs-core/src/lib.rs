//! Core abstractions for the preferences helper: the persistent store and
//! secure key facility contracts the typed layer is built on.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod keys;
pub mod storage;
