//! # Sesamo (passwordless email OTP authentication)
//!
//! `sesamo` implements two-phase passwordless login: a client requests a
//! six-digit code, receives it by email, submits it back, and gets a signed
//! session token asserting the verified address.
//!
//! ## Code Lifecycle
//!
//! - At most one live code exists per normalized email; a new request
//!   silently replaces the previous code.
//! - Codes are bcrypt-hashed before storage and expire after 10 minutes;
//!   verification consumes them (single use).
//! - A wrong guess does not consume the code, but guesses are capped per
//!   issuance; reaching the cap invalidates the code.
//!
//! ## Storage
//!
//! The durable backend keeps one row per identity in Postgres and is safe
//! across instances. Without a DSN the service degrades to process-local
//! storage, announced loudly at startup: codes then survive neither restarts
//! nor load balancing.
//!
//! ## Hardening
//!
//! Unknown and mismatched codes share one opaque response so callers cannot
//! probe which case occurred, limiter failures deny issuance rather than
//! skipping the check, and the token signing secret has no built-in default.

pub mod api;
pub mod cli;
pub mod otp;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
