//! Concrete collaborators for the preferences helper.
//! A JSON-file preference store and key facilities backed by the OS keyring
//! (or test doubles).

pub mod file_store;
pub mod key_facility;
