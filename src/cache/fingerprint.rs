//! Cache keys derived from request identity
//!
//! A fingerprint is a list of filesystem-safe segments. The cache store
//! turns it into a nested path, so requests that share a path prefix share
//! shard directories on disk.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::request::Method;
use crate::transport::TransportRequest;

/// Query parameter excluded from fingerprints (anti-caching / key tokens)
pub const EXCLUDED_PARAM: &str = "api_key";

/// Segments longer than this are replaced by their digest
const MAX_SEGMENT_LEN: usize = 120;

/// Marks the segment holding the rendered query parameters
const QUERY_MARKER: &str = "@query=";

/// Deterministic cache key for a request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    segments: Vec<String>,
}

impl Fingerprint {
    /// Filesystem-safe segments, outermost first
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The fingerprint as a single `/`-joined key
    pub fn as_key(&self) -> String {
        self.segments.join("/")
    }

    /// Rebuilds a fingerprint from a key produced by [`Fingerprint::as_key`]
    pub fn from_key(key: &str) -> Self {
        Self {
            segments: key
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key())
    }
}

/// Derives the cache key for a request.
///
/// Parameter order and the excluded parameter never change the key. Cookie
/// values are digested so session tokens never land on disk in clear text.
pub fn fingerprint(request: &TransportRequest) -> Fingerprint {
    let url = &request.url;
    let mut segments: Vec<String> = url
        .path_segments()
        .map(|parts| {
            parts
                .filter(|p| !p.is_empty())
                .map(escape_segment)
                .collect()
        })
        .unwrap_or_default();
    if segments.is_empty() {
        segments.push(escape_segment(url.host_str().unwrap_or("_")));
    }

    if !request.cookies.is_empty() {
        // BTreeMap iteration is already sorted and de-duplicated by name
        let rendered = request
            .cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(";");
        segments.push(format!("@cookie={}", &digest(&rendered)[..16]));
    }

    // Query string parameters on the URL itself count too
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .chain(request.params.iter().cloned())
        .filter(|(k, _)| k != EXCLUDED_PARAM)
        .collect();
    params.sort();
    params.dedup();
    if !params.is_empty() {
        // Keys and values are escaped one by one so `=` and `&` only ever
        // appear as separators
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", escape_component(k), escape_component(v)))
            .collect::<Vec<_>>()
            .join("&");
        segments.push(bound_length(format!("{}{}", QUERY_MARKER, query)));
    }

    let mut suffix = String::new();
    if request.method != Method::Get {
        suffix.push('#');
        suffix.push_str(request.method.as_str());
    }
    if let Some(ref body) = request.json {
        suffix.push('#');
        suffix.push_str(&digest(&body.to_string())[..16]);
    }
    if !suffix.is_empty() {
        if let Some(last) = segments.last_mut() {
            last.push_str(&suffix);
        }
    }

    Fingerprint { segments }
}

/// Escapes one key segment so it is a valid, non-special file name.
///
/// `%`, `@`, `#` and `~` are always escaped in input, which keeps them free
/// for the markers this module adds itself.
fn escape_segment(raw: &str) -> String {
    if raw == "." || raw == ".." {
        return raw.replace('.', "%2E");
    }
    bound_length(escape_bytes(raw, b"=&"))
}

/// Escapes a query key or value, including the `=` and `&` separators
fn escape_component(raw: &str) -> String {
    escape_bytes(raw, b"")
}

fn escape_bytes(raw: &str, keep: &[u8]) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' | b',' | b'+' => {
                escaped.push(byte as char)
            }
            other if keep.contains(&other) => escaped.push(other as char),
            other => escaped.push_str(&format!("%{:02X}", other)),
        }
    }
    escaped
}

fn bound_length(segment: String) -> String {
    if segment.len() > MAX_SEGMENT_LEN {
        return format!("~{}", digest(&segment));
    }
    segment
}

fn digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
