pub mod ports;
pub mod content_store;
pub mod reconcile_use_case;
pub mod fetch_use_case;
