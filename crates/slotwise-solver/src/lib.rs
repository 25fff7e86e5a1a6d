//! # slotwise-solver
//!
//! The two scheduling engines of slotwise:
//!
//! - [`ConflictDetector`] — stateless analysis of proposed bookings:
//!   pairwise and bulk conflict detection, next-free-slot search, and a
//!   best-effort conflict-resolution pass.
//! - [`ConstraintSolver`] — backtracking search over service x slot
//!   assignments with forward checking and a weighted
//!   most-constrained-variable ordering, producing ranked multi-service
//!   schedules.
//!
//! Both engines are pure and perform no I/O. Detector operations are
//! plain functions of their inputs and safe to call concurrently; the
//! solver keeps all mutable search state in a per-call context, so a
//! single [`ConstraintSolver`] value can also be shared freely.
//!
//! ## Example
//!
//! ```rust
//! use chrono::NaiveDate;
//! use slotwise_core::Booking;
//! use slotwise_solver::ConflictDetector;
//!
//! let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
//! let existing = vec![
//!     Booking::new("b1", "haircut")
//!         .specialist("anna")
//!         .at(day.and_hms_opt(9, 0, 0).unwrap(), day.and_hms_opt(9, 30, 0).unwrap()),
//! ];
//! let candidate = Booking::new("b2", "beard-trim")
//!     .specialist("anna")
//!     .at(day.and_hms_opt(9, 15, 0).unwrap(), day.and_hms_opt(9, 45, 0).unwrap());
//!
//! let report = ConflictDetector::new().check_booking_conflicts(
//!     &candidate, &existing, None, None, None,
//! );
//! assert!(report.has_conflict);
//! ```

pub mod conflict;
pub mod solver;

pub use conflict::{ConflictDetector, DEFAULT_SEARCH_DAYS, SLOT_STEP_MINUTES};
pub use solver::{ConstraintSolver, OptimizeFor, ScheduleAssignment, SolveError};
