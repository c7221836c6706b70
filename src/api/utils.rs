//! Utility functions for REST API handlers.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::HeaderMap;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;

use super::{validation_error, ApiError, ErrorCode};
use crate::crypto::{public_key_from_hex, signature_from_hex};
use crate::domain::{PublicKey32, Signature64, SiteId};

/// Header consulted for the client address behind a trusted proxy
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Address used when neither the socket nor a trusted header yields one
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Resolve the client address of a request.
///
/// The first `X-Forwarded-For` entry is honored only when the deployment
/// sits behind a proxy that sets it; otherwise the socket peer is used.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = headers
            .get(FORWARDED_FOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(address) = forwarded {
            return address.to_string();
        }
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string())
}

/// Validate an optional site id from a body or query, defaulting when absent.
pub fn resolve_site_id(raw: Option<&str>) -> Result<SiteId, ApiError> {
    SiteId::parse_or_default(raw).map_err(ApiError::from)
}

/// Decode a hex public key, with or without `0x`.
pub fn decode_public_key(raw: &str) -> Result<PublicKey32, ApiError> {
    public_key_from_hex(raw.trim()).map_err(|_| {
        ApiError::new(
            ErrorCode::InvalidPublicKey,
            "public_key must be 32 hex-encoded bytes",
        )
        .with_field("public_key")
    })
}

/// Decode a hex signature, with or without `0x`.
pub fn decode_signature(raw: &str) -> Result<Signature64, ApiError> {
    signature_from_hex(raw.trim()).map_err(|_| {
        ApiError::new(
            ErrorCode::InvalidSignature,
            "signature must be 64 hex-encoded bytes",
        )
        .with_field("signature")
    })
}

/// Reject a missing or blank required string field.
pub fn require_field<'a>(field: &str, value: &'a str) -> Result<&'a str, ApiError> {
    if value.trim().is_empty() {
        return Err(
            ApiError::new(ErrorCode::MissingRequiredField, format!("{field} is required"))
                .with_field(field),
        );
    }
    Ok(value)
}

/// Parse a JSON body whose fields are all optional. An empty body is the default value.
pub fn parse_optional_json<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        ApiError::new(ErrorCode::InvalidRequestBody, format!("Invalid JSON body: {e}"))
    })
}

pub fn json_rejection(rejection: JsonRejection) -> ApiError {
    ApiError::new(ErrorCode::InvalidRequestBody, rejection.body_text())
}

pub fn query_rejection(rejection: QueryRejection) -> ApiError {
    ApiError::new(ErrorCode::InvalidFieldValue, rejection.body_text())
}

/// Map a date-range validation message to a field error.
pub fn invalid_range(message: String) -> ApiError {
    validation_error("from", message)
}
