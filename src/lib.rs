//! Long-running commercial onboarding saga.
//!
//! Drives a new commercial client from initial quoting to an activated
//! account through a fixed six-stage graph: quoting, facility application,
//! contract & mandate collection, automated analysis, human review, and
//! activation. A saga routinely lives for weeks because most stages block
//! on a human — an applicant signing a form, a reviewer approving a case.
//!
//! The building blocks:
//!
//! - an append-only [`journal`](crate::journal) as the only persistence:
//!   replaying it reconstructs a saga's stage, status, memoized step
//!   outputs and open tickets after a process restart;
//! - a durable-execution [`substrate`](crate::substrate) that runs named
//!   steps at-most-once-successfully and routes external signals by
//!   `(saga, signal name)` correlation key;
//! - parallel [`branch`](crate::branch) joins for the independent parts of
//!   a stage, with a terminating branch abandoning its siblings;
//! - a cooperative [`KillSwitch`] per saga: steps check it at boundaries,
//!   nothing is ever force-killed mid-execution;
//! - human-in-the-loop recovery: a failed step pauses the saga behind a
//!   ticket until an operator answers retry, cancel or continue.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use onboarding_saga::effects::{Effects, RecordingDownstream, RecordingNotifier, StaticChecks};
//! use onboarding_saga::journal::InMemoryJournal;
//! use onboarding_saga::substrate::Substrate;
//! use onboarding_saga::{ApplicantId, SagaContext, SagaId, SagaRunner};
//!
//! # async fn run() -> Result<(), onboarding_saga::SagaError> {
//! let substrate = Arc::new(Substrate::new(Arc::new(InMemoryJournal::new())));
//! let effects = Effects {
//!     notifier: Arc::new(RecordingNotifier::new()),
//!     checks: Arc::new(StaticChecks::all_clear()),
//!     downstream: Arc::new(RecordingDownstream::new()),
//! };
//! let runner = SagaRunner::new(substrate, effects);
//!
//! let context = SagaContext::new(SagaId::new(1), ApplicantId(501), "owner@acme.example", 250_000);
//! let outcome = runner.run(context).await?;
//! println!("saga ended: {outcome}");
//! # Ok(())
//! # }
//! ```
//!
//! External signals are delivered through [`SagaRunner::signal`], recovery
//! tickets resolved through [`SagaRunner::resolve_error`], and the kill
//! switch pulled through [`SagaRunner::terminate`].

#![warn(missing_docs)]

// Identity, errors, cancellation
mod context;
mod errors;
mod killswitch;

// Persistence and execution substrate
pub mod config;
pub mod events;
pub mod instance;
pub mod journal;
pub mod substrate;

// Saga machinery
pub mod branch;
mod control;
pub(crate) mod recovery;
mod sequencer;
pub mod signal;
pub(crate) mod stages;

// Domain
pub mod effects;
pub mod risk;

// Observability
pub mod observer;
pub mod stats;

#[cfg(feature = "test-harness")]
pub mod testkit;

pub use context::{ApplicantId, SagaContext, SagaId};
pub use errors::{SagaError, StepFailure, TerminalOutcome, TerminalStatus};
pub use killswitch::KillSwitch;
pub use sequencer::{SagaHandle, SagaRunner};
