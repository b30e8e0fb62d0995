//! Cache module for storing API responses to disk
//!
//! This module derives cache keys from request identity and persists responses
//! in a directory tree that mirrors those keys. Entries carry an expiry
//! timestamp; expired entries are kept until swept so they can still be served
//! when a refresh fails.

mod fingerprint;
mod store;

pub use fingerprint::{fingerprint, Fingerprint, EXCLUDED_PARAM};
pub use store::{CacheEntry, CacheError, CacheStore, CachedData, EXTENSION};
