//! Fetch capability consumed by download tasks

pub mod http;
pub mod traits;

pub use http::HttpFetcher;
pub use traits::{validate_status, FetchResponse, Fetcher};
