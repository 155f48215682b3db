//! # Gateway Security
//!
//! Cryptographic primitives used by the LLM Inference Gateway.
//!
//! ## Features
//!
//! - **Hashing**: Bearer-token hashing for API key storage and lookup
//!
//! ## Example
//!
//! ```rust,no_run
//! use gateway_security::HashingService;
//!
//! let hash = HashingService::sha256_hex(b"sk-example-key");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod crypto;

pub use crypto::HashingService;
