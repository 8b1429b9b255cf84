/// Storage and wire constants shared across the pipeline.

// Blob key suffixes
pub const DEFAULT_ARTIFACT_EXTENSION: &str = "zip";
pub const MISSING_EXTENSION: &str = "missing";

// Metadata tag names carried on artifacts and negative markers
pub const TAG_EXTERNAL_FILE_ID: &str = "externalFileId";
pub const TAG_DISPLAY_NAME: &str = "displayName";
pub const TAG_SHA256: &str = "sha256";

// Default containers (directories or buckets) for the two stores
pub const DEFAULT_CONTENT_CONTAINER: &str = "workshop";
pub const DEFAULT_MISSING_CONTAINER: &str = "workshop-missing";

// Queue names in the transport directory
pub const FETCH_QUEUE: &str = "fetch-requests";
pub const ANALYZE_QUEUE: &str = "analyze-requests";
pub const FETCH_POISON_QUEUE: &str = "fetch-requests-poison";

// Consumer name used when committing offsets on the fetch queue
pub const FETCH_CONSUMER: &str = "workshop-fetcher";

// Reconciliation and fetch timing defaults, in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_MAX_WAIT_SECS: u64 = 60;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 120;

// Worker defaults
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;
pub const DEFAULT_BATCH_SIZE: usize = 16;
pub const DEFAULT_IDLE_POLL_MILLIS: u64 = 1000;

// Remote workshop API
pub const DEFAULT_API_BASE: &str = "https://api.steampowered.com";
pub const PUBLISHED_FILE_DETAILS_PATH: &str = "ISteamRemoteStorage/GetPublishedFileDetails/v1/";

// CLI fetcher
pub const DEFAULT_NOT_FOUND_EXIT_CODE: i32 = 2;

pub const DEFAULT_CONFIG_PATH: &str = "workshop-ingest.toml";
