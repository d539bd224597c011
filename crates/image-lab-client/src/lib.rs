//! Image-lab client SDK.
//!
//! A typed client for the image-lab API, acting on behalf of one user.
//! Client-side credit deductions are guarded per session so that one
//! transaction key is never deducted twice.
//!
//! # Example
//!
//! ```no_run
//! use image_lab_client::{Deduction, ImageLabClient, TransactionKey};
//!
//! # async fn example() -> Result<(), image_lab_client::ClientError> {
//! let client = ImageLabClient::new("http://image-lab:8080", "user-jwt")?;
//!
//! let key = TransactionKey::now("img_123", "cartoon-style");
//! match client.deduct_credits(&key, "cartoon-style", 1, false).await? {
//!     Deduction::Deducted(receipt) => println!("balance: {}", receipt.paid_credits),
//!     Deduction::AlreadyDeducted => println!("already paid for"),
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, ImageLabClient};
pub use error::ClientError;
pub use image_lab_core::TransactionKey;
pub use types::*;
