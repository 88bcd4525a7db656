//! # Studio Credits
//!
//! Credits ledger and booking lifecycle for a class marketplace.
//!
//! Consumers hold credits, spend them to book class instances, and get some
//! or all of them back when a booking is cancelled. Every movement is an
//! immutable [`ledger::CreditTransaction`]; the per-user
//! [`balance::BalanceCache`] is derived from the ledger and can always be
//! reconciled against it.
//!
//! ## Architecture
//!
//! - [`reducer::CreditsReducer`] validates each command against the current
//!   state, applies it, and returns post-commit effects (reminder
//!   scheduling, notifications).
//! - [`Engine`] wraps a [`studio_credits_runtime::Store`], which runs one
//!   command at a time under a write lock. "Check capacity, then take the
//!   seat" and "check balance, then debit" are therefore a single atomic step.
//! - [`jobs`] runs the no-show, completion, discount-summary, and reminder
//!   sweeps on intervals.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use studio_credits::notify::LogNotifier;
//! use studio_credits::{CreditsEnvironment, Engine};
//! use studio_credits_core::environment::SystemClock;
//!
//! # async fn example() -> studio_credits::Result<()> {
//! let engine = Engine::new(CreditsEnvironment::new(
//!     Arc::new(SystemClock),
//!     Arc::new(LogNotifier),
//! ));
//! let user = studio_credits::UserProfile::new("Ada", "ada@example.com");
//! engine.register_user(user.clone()).await?;
//! engine.gift_credits(user.id, 50, Some("welcome".into())).await?;
//! # Ok(())
//! # }
//! ```

pub mod balance;
pub mod booking;
pub mod catalog;
pub mod config;
pub mod discount;
pub mod earnings;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod ledger;
mod lifecycle;
pub mod metrics;
pub mod notify;
pub mod pricing;
pub mod reducer;
pub mod reminders;
pub mod summary;
pub mod sweeps;
pub mod types;

pub use booking::{Booking, BookingStatus, Canceller};
pub use config::Config;
pub use engine::Engine;
pub use error::{CreditsError, Result};
pub use reducer::{CreditsAction, CreditsEnvironment, CreditsOutput, CreditsReducer, CreditsState};
pub use types::{
    BookingId, BusinessId, ClassInstanceId, ClassTemplateId, Credits, Money, UserId, UserProfile,
    VenueId,
};
