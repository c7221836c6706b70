//! Hashing with domain separation
//!
//! - Visitor identity: `SHA-256(salt || address)`, hex-encoded by the caller
//! - Request signing hash: domain-prefixed, length-prefixed canonical encoding
//!   of method, path, timestamp and body digest
//!
//! Integers are big-endian; strings are `U32_BE(len) || UTF-8 bytes`.

use sha2::{Digest, Sha256};

use crate::domain::Hash256;

/// Domain prefix for signed read requests
pub const DOMAIN_REQSIG: &[u8] = b"VA_REQSIG_V1";

/// Encode u32 as big-endian bytes
pub fn u32_be(n: u32) -> [u8; 4] {
    n.to_be_bytes()
}

/// Encode u64 as big-endian bytes
pub fn u64_be(n: u64) -> [u8; 8] {
    n.to_be_bytes()
}

/// Encode string with length prefix: `U32_BE(len) || UTF-8 bytes`
pub fn encode_string(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut result = Vec::with_capacity(4 + bytes.len());
    result.extend_from_slice(&u32_be(bytes.len() as u32));
    result.extend_from_slice(bytes);
    result
}

/// Plain SHA-256
pub fn sha256(data: &[u8]) -> Hash256 {
    Sha256::digest(data).into()
}

/// Salted one-way hash of a client network address.
pub fn hash_visitor_address(salt: &[u8], address: &str) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(address.as_bytes());
    hasher.finalize().into()
}

/// Parameters for computing a request signing hash
#[derive(Debug, Clone, Copy)]
pub struct RequestSigningParams<'a> {
    /// HTTP method, normalized to upper case during hashing
    pub method: &'a str,
    /// Path including query string, exactly as sent
    pub path: &'a str,
    /// Unix seconds claimed by the client
    pub timestamp: i64,
    pub body: &'a [u8],
}

/// Compute the hash a paired device signs for a read request.
///
/// ```text
/// preimage =
///   b"VA_REQSIG_V1" ||
///   enc(METHOD) ||
///   enc(path_and_query) ||
///   U64_BE(timestamp) ||
///   SHA256(body)
/// ```
pub fn compute_request_signing_hash(params: &RequestSigningParams) -> Hash256 {
    let mut hasher = Sha256::new();

    hasher.update(DOMAIN_REQSIG);
    hasher.update(encode_string(&params.method.to_ascii_uppercase()));
    hasher.update(encode_string(params.path));
    // Two's complement keeps pre-epoch timestamps distinct
    hasher.update(u64_be(params.timestamp as u64));
    hasher.update(sha256(params.body));

    hasher.finalize().into()
}
