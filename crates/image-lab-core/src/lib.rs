//! Core types for image-lab.
//!
//! This crate holds the domain model shared by the store, the service and the
//! client SDK:
//!
//! - **Identifiers**: `UserId`, `TransformationId`, `ImageId`, `PaymentId`, `TransactionId`
//! - **Users**: `User` with the rolling free-credit rule
//! - **Credits**: `CreditTransaction`, `ChargePlan`, `TransactionKey`, `DeductionGuard`
//! - **Transformations**: `Transformation`, `TransformationStatus`, `ResultMode`, `TransformResult`
//! - **Catalog**: `EnhancementOption` and industry lookup
//!
//! # Credits
//!
//! Each user gets one free transformation per rolling 30-day window. Beyond
//! that, every catalog option has a fixed cost in paid credits, stored as
//! `i64` and never negative.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod catalog;
pub mod credits;
pub mod error;
pub mod ids;
pub mod industry;
pub mod payment;
pub mod transformation;
pub mod user;

pub use catalog::{
    enhancements_for_industry, find_enhancement, require_enhancement, Backend,
    EnhancementOption, ALL_INDUSTRIES, CATALOG,
};
pub use credits::{
    ChargePlan, ChargeWaiver, CreditTransaction, DeductionGuard, TransactionKey, TransactionType,
};
pub use error::{LabError, Result};
pub use ids::{IdError, ImageId, PaymentId, TransactionId, TransformationId, UserId};
pub use industry::{match_industry, IndustryMatch};
pub use payment::{Payment, PaymentStatus, UserImage};
pub use transformation::{
    ResultMode, SimulationReason, TransformResult, Transformation, TransformationOutcome,
    TransformationStatus, CUSTOM_TRANSFORMATION,
};
pub use user::{FreeCreditCheck, User, FREE_CREDIT_WINDOW_DAYS};
