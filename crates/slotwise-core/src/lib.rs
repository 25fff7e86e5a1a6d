//! # slotwise-core
//!
//! Core domain model for the slotwise booking scheduling engine.
//!
//! This crate provides:
//! - Domain types: `Booking`, `ServiceRequest`, `TimeSlot`, `WorkingHours`,
//!   `DependencyRule`
//! - The closed conflict taxonomy: `Conflict` / `ConflictKind`
//! - Report types returned by the analysis engines: `ConflictReport`,
//!   `FeasibilityReport`, `Resolution`, `OpenSlot`
//!
//! ## Example
//!
//! ```rust
//! use chrono::NaiveDate;
//! use slotwise_core::Booking;
//!
//! let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
//! let booking = Booking::new("b1", "haircut")
//!     .specialist("anna")
//!     .resource("chair-1")
//!     .at(day.and_hms_opt(9, 0, 0).unwrap(), day.and_hms_opt(9, 30, 0).unwrap())
//!     .buffers(5, 5);
//! assert_eq!(booking.duration_minutes(), 30);
//! ```

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

// ============================================================================
// Type Aliases
// ============================================================================

/// Unique identifier for a booking
pub type BookingId = String;

/// Unique identifier for a service
pub type ServiceId = String;

/// Unique identifier for a specialist (staff member)
pub type SpecialistId = String;

/// Unique identifier for a resource (room, chair, equipment)
pub type ResourceId = String;

/// Open availability windows per specialist or resource id.
///
/// Windows may span several days; consumers filter to the day they need.
pub type AvailabilityMap = HashMap<String, Vec<TimeSlot>>;

/// Duration in wall-clock minutes
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Duration {
    /// Number of minutes
    pub minutes: i64,
}

impl Duration {
    pub const fn zero() -> Self {
        Self { minutes: 0 }
    }

    pub const fn minutes(m: i64) -> Self {
        Self { minutes: m }
    }

    pub const fn hours(h: i64) -> Self {
        Self { minutes: h * 60 }
    }

    pub fn as_hours(&self) -> f64 {
        self.minutes as f64 / 60.0
    }

    /// Convert to a chrono delta for date arithmetic
    pub fn to_delta(self) -> TimeDelta {
        TimeDelta::minutes(self.minutes)
    }
}

impl std::ops::Add for Duration {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self { minutes: self.minutes + rhs.minutes }
    }
}

impl std::ops::Sub for Duration {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self { minutes: self.minutes - rhs.minutes }
    }
}

// ============================================================================
// TimeSlot
// ============================================================================

/// A half-open wall-clock interval.
///
/// Invariant: `start < end` for any slot used in comparisons.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeSlot {
    /// Create a slot. An inverted interval is a programmer error.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start < end, "inverted interval: {start} >= {end}");
        Self { start, end }
    }

    /// Validating constructor for slots built from untrusted input
    pub fn try_new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self, DomainError> {
        if start < end {
            Ok(Self { start, end })
        } else {
            Err(DomainError::InvalidInterval { start, end })
        }
    }

    /// Strict overlap: touching endpoints do not overlap
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether `other` lies entirely within this slot (endpoints inclusive)
    pub fn contains_range(&self, other: &TimeSlot) -> bool {
        self.start <= other.start && self.end >= other.end
    }

    /// Whether an instant lies within the slot
    pub fn contains_point(&self, instant: NaiveDateTime) -> bool {
        self.start <= instant && instant < self.end
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes((self.end - self.start).num_minutes())
    }

    /// Widen the slot by buffer minutes on each side
    pub fn padded(&self, before_minutes: i64, after_minutes: i64) -> TimeSlot {
        TimeSlot {
            start: self.start - TimeDelta::minutes(before_minutes),
            end: self.end + TimeDelta::minutes(after_minutes),
        }
    }
}

// ============================================================================
// Booking
// ============================================================================

/// An existing or proposed occupancy of a specialist/resources over a slot.
///
/// Bookings are supplied by the caller per call and never persisted by the
/// engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    /// Unique identifier
    pub id: BookingId,
    /// Service being delivered
    pub service_id: ServiceId,
    /// Assigned specialist, if any
    pub specialist_id: Option<SpecialistId>,
    /// Resources occupied for the duration
    pub resources: Vec<ResourceId>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Setup padding in minutes, included in every overlap check
    pub buffer_before: i64,
    /// Teardown padding in minutes, included in every overlap check
    pub buffer_after: i64,
}

impl Booking {
    /// Create a booking with a placeholder interval; set it with [`Booking::at`].
    pub fn new(id: impl Into<String>, service_id: impl Into<String>) -> Self {
        let epoch = NaiveDateTime::default();
        Self {
            id: id.into(),
            service_id: service_id.into(),
            specialist_id: None,
            resources: Vec::new(),
            start: epoch,
            end: epoch + TimeDelta::minutes(1),
            buffer_before: 0,
            buffer_after: 0,
        }
    }

    /// Set the occupied interval
    pub fn at(mut self, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start < end, "inverted booking interval");
        self.start = start;
        self.end = end;
        self
    }

    /// Assign a specialist
    pub fn specialist(mut self, id: impl Into<String>) -> Self {
        self.specialist_id = Some(id.into());
        self
    }

    /// Occupy a resource
    pub fn resource(mut self, id: impl Into<String>) -> Self {
        self.resources.push(id.into());
        self
    }

    /// Set setup/teardown buffers in minutes
    pub fn buffers(mut self, before: i64, after: i64) -> Self {
        self.buffer_before = before;
        self.buffer_after = after;
        self
    }

    /// The occupied interval without buffers
    pub fn slot(&self) -> TimeSlot {
        TimeSlot::new(self.start, self.end)
    }

    /// The occupied interval widened by both buffers
    pub fn buffered_slot(&self) -> TimeSlot {
        self.slot().padded(self.buffer_before, self.buffer_after)
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Whether the two bookings occupy at least one common resource
    pub fn shared_resources(&self, other: &Booking) -> Vec<ResourceId> {
        self.resources
            .iter()
            .filter(|r| other.resources.contains(r))
            .cloned()
            .collect()
    }
}

// ============================================================================
// ServiceRequest
// ============================================================================

/// A service to be scheduled: the solver's variable description.
///
/// Immutable once constructed for a solve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    /// Unique identifier
    pub id: ServiceId,
    /// Human-readable name
    pub name: String,
    /// Service duration
    pub duration: Duration,
    pub buffer_before: i64,
    pub buffer_after: i64,
    /// Resources that must all be free for the whole buffered interval
    pub required_resources: Vec<ResourceId>,
    /// Specialists allowed to deliver the service (empty = no specialist needed)
    pub eligible_specialists: Vec<SpecialistId>,
    /// Prerequisite services that must end at/before this one starts
    pub dependencies: Vec<ServiceId>,
}

impl ServiceRequest {
    pub fn new(id: impl Into<String>, duration: Duration) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            duration,
            buffer_before: 0,
            buffer_after: 0,
            required_resources: Vec::new(),
            eligible_specialists: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    /// Set the service name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set setup/teardown buffers in minutes
    pub fn buffers(mut self, before: i64, after: i64) -> Self {
        self.buffer_before = before;
        self.buffer_after = after;
        self
    }

    /// Require a resource
    pub fn requires_resource(mut self, id: impl Into<String>) -> Self {
        self.required_resources.push(id.into());
        self
    }

    /// Allow a specialist to deliver the service
    pub fn eligible_specialist(mut self, id: impl Into<String>) -> Self {
        self.eligible_specialists.push(id.into());
        self
    }

    /// Add a prerequisite service
    pub fn depends_on(mut self, service_id: impl Into<String>) -> Self {
        self.dependencies.push(service_id.into());
        self
    }
}

// ============================================================================
// WorkingHours
// ============================================================================

/// Open/close schedule for one weekday (0 = Sunday, 6 = Saturday)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    pub weekday: u8,
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub closed: bool,
}

impl WorkingHours {
    pub fn open(weekday: u8, open: NaiveTime, close: NaiveTime) -> Self {
        debug_assert!(weekday <= 6, "weekday out of range: {weekday}");
        debug_assert!(open < close, "opening time not before closing time");
        Self { weekday, open, close, closed: false }
    }

    pub fn closed(weekday: u8) -> Self {
        Self {
            weekday,
            open: NaiveTime::default(),
            close: NaiveTime::default(),
            closed: true,
        }
    }

    /// Find the rule governing a weekday, if one exists
    pub fn for_weekday(rules: &[WorkingHours], weekday: u8) -> Option<&WorkingHours> {
        rules.iter().find(|r| r.weekday == weekday)
    }
}

// ============================================================================
// DependencyRule
// ============================================================================

/// Services that must have a completed booking before this service starts
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DependencyRule {
    pub service_id: ServiceId,
    pub depends_on: Vec<ServiceId>,
}

impl DependencyRule {
    pub fn new(service_id: impl Into<String>, depends_on: Vec<ServiceId>) -> Self {
        Self { service_id: service_id.into(), depends_on }
    }
}

// ============================================================================
// Conflicts
// ============================================================================

/// Category tag of a [`Conflict`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    TimeOverlap,
    Specialist,
    Resource,
    DependencyViolation,
    Availability,
    WorkingHours,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictKind::TimeOverlap => write!(f, "time overlap"),
            ConflictKind::Specialist => write!(f, "specialist conflict"),
            ConflictKind::Resource => write!(f, "resource conflict"),
            ConflictKind::DependencyViolation => write!(f, "dependency violation"),
            ConflictKind::Availability => write!(f, "availability conflict"),
            ConflictKind::WorkingHours => write!(f, "working hours conflict"),
        }
    }
}

/// A detected scheduling conflict.
///
/// Closed taxonomy: exhaustive matches catch missing-case bugs at compile
/// time. `bookings` holds indices into the start-sorted booking list when the
/// conflict came out of a bulk feasibility check; `conflicting_booking_id`
/// names the clashing booking in a pairwise candidate check.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Conflict {
    TimeOverlap {
        description: String,
        bookings: Vec<usize>,
    },
    Specialist {
        specialist_id: SpecialistId,
        description: String,
        conflicting_booking_id: Option<BookingId>,
        bookings: Vec<usize>,
    },
    Resource {
        resource_ids: Vec<ResourceId>,
        description: String,
        conflicting_booking_id: Option<BookingId>,
        bookings: Vec<usize>,
    },
    DependencyViolation {
        service_id: ServiceId,
        missing_prerequisite: ServiceId,
        description: String,
    },
    Availability {
        /// Specialist or resource id whose windows exclude the interval
        subject_id: String,
        description: String,
        bookings: Vec<usize>,
    },
    WorkingHours {
        weekday: u8,
        description: String,
    },
}

impl Conflict {
    pub fn kind(&self) -> ConflictKind {
        match self {
            Conflict::TimeOverlap { .. } => ConflictKind::TimeOverlap,
            Conflict::Specialist { .. } => ConflictKind::Specialist,
            Conflict::Resource { .. } => ConflictKind::Resource,
            Conflict::DependencyViolation { .. } => ConflictKind::DependencyViolation,
            Conflict::Availability { .. } => ConflictKind::Availability,
            Conflict::WorkingHours { .. } => ConflictKind::WorkingHours,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Conflict::TimeOverlap { description, .. }
            | Conflict::Specialist { description, .. }
            | Conflict::Resource { description, .. }
            | Conflict::DependencyViolation { description, .. }
            | Conflict::Availability { description, .. }
            | Conflict::WorkingHours { description, .. } => description,
        }
    }

    /// Fixed resolution order: dependency violations first, then
    /// availability, specialist, resource; the remaining kinds last.
    pub fn resolution_priority(&self) -> u8 {
        match self.kind() {
            ConflictKind::DependencyViolation => 0,
            ConflictKind::Availability => 1,
            ConflictKind::Specialist => 2,
            ConflictKind::Resource => 3,
            ConflictKind::TimeOverlap | ConflictKind::WorkingHours => 4,
        }
    }

    /// Indices into the start-sorted booking list, when known
    pub fn booking_indices(&self) -> &[usize] {
        match self {
            Conflict::TimeOverlap { bookings, .. }
            | Conflict::Specialist { bookings, .. }
            | Conflict::Resource { bookings, .. }
            | Conflict::Availability { bookings, .. } => bookings,
            Conflict::DependencyViolation { .. } | Conflict::WorkingHours { .. } => &[],
        }
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Outcome of checking one candidate booking against the existing calendar
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub has_conflict: bool,
    pub conflicts: Vec<Conflict>,
}

impl ConflictReport {
    pub fn from_conflicts(conflicts: Vec<Conflict>) -> Self {
        Self { has_conflict: !conflicts.is_empty(), conflicts }
    }

    pub fn clean() -> Self {
        Self { has_conflict: false, conflicts: Vec::new() }
    }
}

/// Outcome of checking a whole proposed booking set
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeasibilityReport {
    pub is_feasible: bool,
    pub conflicts: Vec<Conflict>,
}

impl FeasibilityReport {
    pub fn from_conflicts(conflicts: Vec<Conflict>) -> Self {
        Self { is_feasible: conflicts.is_empty(), conflicts }
    }
}

/// Outcome of a best-effort conflict-resolution pass
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Resolution {
    /// Every conflict was resolved; bookings are start-sorted
    Resolved { bookings: Vec<Booking> },
    /// At least one conflict could not be resolved; nothing is returned
    /// partially fixed
    Unresolvable { conflicts: Vec<Conflict> },
}

impl Resolution {
    pub fn success(&self) -> bool {
        matches!(self, Resolution::Resolved { .. })
    }
}

/// A free slot found by the next-available-slot search
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpenSlot {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub duration: Duration,
    pub buffer_before: i64,
    pub buffer_after: i64,
}

// ============================================================================
// Errors
// ============================================================================

/// Fatal precondition violations in domain construction
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid interval: start {start} is not before end {end}")]
    InvalidInterval { start: NaiveDateTime, end: NaiveDateTime },

    #[error("working hours for weekday {0} have no open window")]
    EmptyWorkingHours(u8),
}

// ============================================================================
// Tests
// ============================================================================
