//! Canonical job store, immutable artifact storage and HTTP plumbing for jobfeed.

pub mod artifacts;
pub mod http;
pub mod postgres;
pub mod store;

pub use artifacts::{ArtifactStore, StoredArtifact};
pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, HttpClientConfig,
    HttpResponse, JsonHttpClient, PacerConfig, RequestPacer, RetryDisposition,
};
pub use postgres::PgCanonicalStore;
pub use store::{CanonicalStore, MemoryStore, StoreError};

pub const CRATE_NAME: &str = "jobfeed-storage";
