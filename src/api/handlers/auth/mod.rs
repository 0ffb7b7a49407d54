//! Auth handlers: a thin transport layer over the OTP orchestrator.
//!
//! Every endpoint delegates to `otp::OtpService`; no code lifecycle rule
//! lives in a handler. Unknown and mismatched codes share one opaque 401
//! response so callers cannot tell which case occurred.

pub(crate) mod protected;
pub(crate) mod request_code;
mod state;
pub(crate) mod types;
mod utils;
pub(crate) mod verify_code;

pub use state::{AuthConfig, AuthState};
