// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for the browserd API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiError {
    PoolExhausted,
    AlreadyInUse,
    SessionNotFound,
    SessionBusy,
    InvalidSession,
    NoBrowser,
    NoAgent,
    AgentFailed,
    StartupFailed,
    BadRequest,
    Internal,
}

impl ApiError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::PoolExhausted => 503,
            Self::AlreadyInUse => 503,
            Self::SessionNotFound => 404,
            Self::SessionBusy => 409,
            Self::InvalidSession => 400,
            Self::NoBrowser => 404,
            Self::NoAgent => 404,
            Self::AgentFailed => 500,
            Self::StartupFailed => 500,
            Self::BadRequest => 400,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PoolExhausted => "POOL_EXHAUSTED",
            Self::AlreadyInUse => "ALREADY_IN_USE",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::SessionBusy => "SESSION_BUSY",
            Self::InvalidSession => "INVALID_SESSION",
            Self::NoBrowser => "NO_BROWSER",
            Self::NoAgent => "NO_AGENT",
            Self::AgentFailed => "AGENT_FAILED",
            Self::StartupFailed => "STARTUP_FAILED",
            Self::BadRequest => "BAD_REQUEST",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorResponse { error: message.into() }))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
