pub mod blob_fs;
pub mod blob_http;
pub mod blob_memory;
pub mod cli_fetcher;
pub mod clock;
pub mod factory;
pub mod message_log;
pub mod record_store;
pub mod remote_fetcher;
