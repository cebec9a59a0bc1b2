mod store;

pub use store::{
    InMemoryPreferenceStore, PendingWrite, PrefValue, PreferenceStore, StoreError, SyncMode,
};
