//! # Supervisor
//!
//! Owns the set of running interfacers and keeps it in line with the
//! configuration snapshot.
//!
//! Each pass of the main loop:
//! 1. reconcile when the configuration source reports a change
//! 2. log interfacers whose task has died
//! 3. drive the readiness / watchdog protocol
//!
//! Reconciliation is split into a pure planning step ([`ReconcilePlan`]) and
//! an apply step that tears down, creates and updates in that order.

mod error;
pub mod health;
pub mod reconcile;
mod supervisor;

pub use error::{Result, SupervisorError};
pub use health::{HealthEvent, HealthMonitor, Notifier, SystemdNotifier};
pub use reconcile::{LiveEntry, ReconcilePlan, TeardownReason};
pub use supervisor::{Supervisor, SupervisorOptions};
