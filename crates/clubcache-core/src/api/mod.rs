//! REST client for the remote relational data service.
//!
//! The cache accepts any async function as a fetcher; this module supplies
//! one for table reads against a PostgREST-style endpoint
//! (`GET <api_url>/rest/v1/<table>?select=...&col=eq.value`).

pub mod client;
pub mod error;

pub use client::{RestClient, TableQuery};
pub use error::ApiError;
