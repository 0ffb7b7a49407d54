//! The one-time-code core: generation, hashing, storage, rate limiting,
//! session tokens, and the request/verify orchestrator.

pub mod code;
pub mod models;
pub mod rate_limit;
pub mod service;
pub mod store;
pub mod token;

pub use models::{CodeIssued, OtpError, OtpRecord, VerifiedSession};
pub use service::{OtpConfig, OtpService};
pub use token::TokenService;
