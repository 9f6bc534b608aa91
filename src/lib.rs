//! Natural-language browser automation.
//!
//! A command is turned into a [`types::Plan`] by a [`brain::PlanGenerator`],
//! then executed step by step against a live browser by the
//! [`runner::AutomationRunner`]. Read-only scraping goes through the
//! [`extraction::ExtractionRunner`] instead.

pub mod brain;
pub mod config;
pub mod dom;
pub mod error;
pub mod executor;
pub mod extraction;
pub mod face;
pub mod hands;
pub mod locator;
pub mod resolver;
pub mod runner;
pub mod types;

#[cfg(test)]
mod fake;

pub use error::{GenerationError, SessionError, StepError};
pub use extraction::ExtractionRunner;
pub use runner::AutomationRunner;
