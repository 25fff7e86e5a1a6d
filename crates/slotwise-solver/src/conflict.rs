//! Conflict detection and best-effort resolution
//!
//! A stateless analyzer over caller-supplied bookings. Three concerns live
//! here:
//!
//! 1. Detection — pairwise ([`ConflictDetector::check_booking_conflicts`])
//!    and bulk ([`ConflictDetector::check_multi_booking_feasibility`])
//!    checks across the taxonomy: specialist double-booking, resource
//!    double-booking, availability windows, and dependency rules. All
//!    overlap arithmetic uses buffered intervals.
//! 2. Slot search ([`ConflictDetector::find_next_available_slot`]) — walks
//!    calendar days under working-hours rules and probes candidate start
//!    times in fixed 15-minute steps until one passes a full conflict
//!    check.
//! 3. Resolution ([`ConflictDetector::resolve_conflicts`]) — shifts the
//!    later booking of a specialist/resource clash past the earlier one,
//!    then re-checks. Availability and dependency conflicts are reported
//!    as unresolvable rather than guessed at.

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use slotwise_core::{
    AvailabilityMap, Booking, Conflict, ConflictReport, DependencyRule, Duration,
    FeasibilityReport, OpenSlot, Resolution, TimeSlot, WorkingHours,
};

/// Candidate start times are probed on this grid
pub const SLOT_STEP_MINUTES: i64 = 15;

/// Default horizon for the next-available-slot search
pub const DEFAULT_SEARCH_DAYS: u32 = 30;

/// Stateless conflict analyzer
#[derive(Clone, Copy, Debug, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
    pub fn new() -> Self {
        Self
    }

    /// Check one candidate booking against the existing calendar.
    ///
    /// An existing booking sharing the candidate's id is skipped, so a
    /// caller can re-check an updated booking against its own previous
    /// version.
    pub fn check_booking_conflicts(
        &self,
        candidate: &Booking,
        existing: &[Booking],
        specialist_windows: Option<&AvailabilityMap>,
        resource_windows: Option<&AvailabilityMap>,
        dependencies: Option<&[DependencyRule]>,
    ) -> ConflictReport {
        let mut conflicts = Vec::new();
        let buffered = candidate.buffered_slot();

        for other in existing.iter().filter(|b| b.id != candidate.id) {
            if !buffered.overlaps(&other.buffered_slot()) {
                continue;
            }

            if let (Some(mine), Some(theirs)) = (&candidate.specialist_id, &other.specialist_id) {
                if mine == theirs {
                    conflicts.push(Conflict::Specialist {
                        specialist_id: mine.clone(),
                        description: format!(
                            "specialist '{mine}' is already booked by '{}' from {} to {}",
                            other.id, other.start, other.end
                        ),
                        conflicting_booking_id: Some(other.id.clone()),
                        bookings: Vec::new(),
                    });
                }
            }

            let shared = candidate.shared_resources(other);
            if !shared.is_empty() {
                conflicts.push(Conflict::Resource {
                    description: format!(
                        "resources [{}] are already booked by '{}'",
                        shared.join(", "),
                        other.id
                    ),
                    resource_ids: shared,
                    conflicting_booking_id: Some(other.id.clone()),
                    bookings: Vec::new(),
                });
            }
        }

        if let (Some(windows), Some(specialist)) = (specialist_windows, &candidate.specialist_id) {
            if let Some(open) = windows.get(specialist) {
                if !covered_by(open, &buffered) {
                    conflicts.push(availability_conflict(specialist, &buffered, Vec::new()));
                }
            }
        }

        if let Some(windows) = resource_windows {
            for resource in &candidate.resources {
                if let Some(open) = windows.get(resource) {
                    if !covered_by(open, &buffered) {
                        conflicts.push(availability_conflict(resource, &buffered, Vec::new()));
                    }
                }
            }
        }

        if let Some(rules) = dependencies {
            for rule in rules.iter().filter(|r| r.service_id == candidate.service_id) {
                for prerequisite in &rule.depends_on {
                    let satisfied = existing
                        .iter()
                        .any(|b| &b.service_id == prerequisite && b.end <= candidate.start);
                    if !satisfied {
                        conflicts.push(Conflict::DependencyViolation {
                            service_id: candidate.service_id.clone(),
                            missing_prerequisite: prerequisite.clone(),
                            description: format!(
                                "service '{}' requires a completed '{prerequisite}' booking before {}",
                                candidate.service_id, candidate.start
                            ),
                        });
                    }
                }
            }
        }

        ConflictReport::from_conflicts(conflicts)
    }

    /// Check a whole proposed booking set for mutual feasibility.
    ///
    /// Conflict indices refer to the bookings sorted by start time.
    pub fn check_multi_booking_feasibility(
        &self,
        bookings: &[Booking],
        specialist_windows: Option<&AvailabilityMap>,
        resource_windows: Option<&AvailabilityMap>,
        dependencies: Option<&[DependencyRule]>,
    ) -> FeasibilityReport {
        let sorted = sorted_by_start(bookings);
        let mut conflicts = Vec::new();

        for i in 0..sorted.len() {
            for j in (i + 1)..sorted.len() {
                let (first, second) = (&sorted[i], &sorted[j]);
                if !first.buffered_slot().overlaps(&second.buffered_slot()) {
                    continue;
                }

                if let (Some(a), Some(b)) = (&first.specialist_id, &second.specialist_id) {
                    if a == b {
                        conflicts.push(Conflict::Specialist {
                            specialist_id: a.clone(),
                            description: format!(
                                "specialist '{a}' is double-booked by '{}' and '{}'",
                                first.id, second.id
                            ),
                            conflicting_booking_id: None,
                            bookings: vec![i, j],
                        });
                    }
                }

                let shared = first.shared_resources(second);
                if !shared.is_empty() {
                    conflicts.push(Conflict::Resource {
                        description: format!(
                            "resources [{}] are double-booked by '{}' and '{}'",
                            shared.join(", "),
                            first.id,
                            second.id
                        ),
                        resource_ids: shared,
                        conflicting_booking_id: None,
                        bookings: vec![i, j],
                    });
                }
            }
        }

        for (index, booking) in sorted.iter().enumerate() {
            let buffered = booking.buffered_slot();

            if let (Some(windows), Some(specialist)) = (specialist_windows, &booking.specialist_id)
            {
                if let Some(open) = windows.get(specialist) {
                    if !covered_by(open, &buffered) {
                        conflicts.push(availability_conflict(specialist, &buffered, vec![index]));
                    }
                }
            }

            if let Some(windows) = resource_windows {
                for resource in &booking.resources {
                    if let Some(open) = windows.get(resource) {
                        if !covered_by(open, &buffered) {
                            conflicts.push(availability_conflict(resource, &buffered, vec![index]));
                        }
                    }
                }
            }
        }

        if let Some(rules) = dependencies {
            for rule in rules {
                for dependent in sorted.iter().filter(|b| b.service_id == rule.service_id) {
                    for prerequisite in &rule.depends_on {
                        let satisfied = sorted
                            .iter()
                            .any(|b| &b.service_id == prerequisite && b.end <= dependent.start);
                        if !satisfied {
                            conflicts.push(Conflict::DependencyViolation {
                                service_id: rule.service_id.clone(),
                                missing_prerequisite: prerequisite.clone(),
                                description: format!(
                                    "booking '{}' of service '{}' has no '{prerequisite}' booking ending at/before {}",
                                    dependent.id, rule.service_id, dependent.start
                                ),
                            });
                        }
                    }
                }
            }
        }

        FeasibilityReport::from_conflicts(conflicts)
    }

    /// Find the first conflict-free slot for a booking that failed to fit.
    ///
    /// Duration, buffers, specialist and resources are taken from
    /// `failed`. Days without a working-hours rule, or marked closed, are
    /// skipped; when the day is today, the scan begins at the next
    /// 15-minute boundary at/after now. Returns `None` when no day in the
    /// range yields a free step.
    pub fn find_next_available_slot(
        &self,
        failed: &Booking,
        existing: &[Booking],
        working_hours: &[WorkingHours],
        specialist_windows: Option<&AvailabilityMap>,
        resource_windows: Option<&AvailabilityMap>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        max_days: u32,
    ) -> Option<OpenSlot> {
        let duration_minutes = failed.duration_minutes();
        let duration = TimeDelta::minutes(duration_minutes);
        let today = Local::now().date_naive();
        let now = Local::now().naive_local();

        let first_day = start_date.unwrap_or(today);
        let last_day = end_date.unwrap_or(first_day + TimeDelta::days(i64::from(max_days)));

        let mut day = first_day;
        while day <= last_day {
            let weekday = day.weekday().num_days_from_sunday() as u8;
            let Some(rule) = WorkingHours::for_weekday(working_hours, weekday) else {
                day = next_day(day)?;
                continue;
            };
            if rule.closed {
                day = next_day(day)?;
                continue;
            }

            let mut open = day.and_time(rule.open);
            let close = day.and_time(rule.close);
            if day == today && now > open {
                open = round_up_to_step(now);
            }

            let day_bookings = restrict_bookings_to_day(existing, day);
            let day_specialist = specialist_windows.map(|w| restrict_windows_to_day(w, day));
            let day_resource = resource_windows.map(|w| restrict_windows_to_day(w, day));

            let mut candidate_start = open;
            while candidate_start + duration <= close {
                let mut probe = failed.clone();
                probe.start = candidate_start;
                probe.end = candidate_start + duration;

                let report = self.check_booking_conflicts(
                    &probe,
                    &day_bookings,
                    day_specialist.as_ref(),
                    day_resource.as_ref(),
                    None,
                );
                if !report.has_conflict {
                    return Some(OpenSlot {
                        date: day,
                        start_time: probe.start.time(),
                        end_time: probe.end.time(),
                        duration: Duration::minutes(duration_minutes),
                        buffer_before: failed.buffer_before,
                        buffer_after: failed.buffer_after,
                    });
                }
                candidate_start += TimeDelta::minutes(SLOT_STEP_MINUTES);
            }

            day = next_day(day)?;
        }

        None
    }

    /// Best-effort resolution of a conflicting booking set.
    ///
    /// Specialist and resource clashes are resolved by shifting the second
    /// booking of the pair to start right after the first, buffers
    /// included. Availability and dependency conflicts fail the whole call
    /// immediately; no partially-fixed schedule is ever returned for them.
    pub fn resolve_conflicts(
        &self,
        bookings: &[Booking],
        specialist_windows: Option<&AvailabilityMap>,
        resource_windows: Option<&AvailabilityMap>,
    ) -> Resolution {
        let report = self.check_multi_booking_feasibility(
            bookings,
            specialist_windows,
            resource_windows,
            None,
        );
        if report.is_feasible {
            return Resolution::Resolved { bookings: bookings.to_vec() };
        }

        let mut working = sorted_by_start(bookings);
        let mut conflicts = report.conflicts;
        conflicts.sort_by_key(Conflict::resolution_priority);

        for conflict in conflicts {
            let kind = conflict.kind();
            match conflict {
                Conflict::Specialist { bookings: pair, .. }
                | Conflict::Resource { bookings: pair, .. } => {
                    if let [first_idx, second_idx] = pair[..] {
                        shift_after(&mut working, first_idx, second_idx);
                        tracing::debug!(
                            first = %working[first_idx].id,
                            shifted = %working[second_idx].id,
                            %kind,
                            "shifted booking past conflict"
                        );
                    }
                }
                unresolvable @ (Conflict::Availability { .. }
                | Conflict::DependencyViolation { .. }) => {
                    // No resolution strategy exists for these kinds
                    tracing::debug!(%kind, "conflict is unresolvable");
                    return Resolution::Unresolvable { conflicts: vec![unresolvable] };
                }
                Conflict::TimeOverlap { .. } | Conflict::WorkingHours { .. } => {}
            }
        }

        let recheck = self.check_multi_booking_feasibility(
            &working,
            specialist_windows,
            resource_windows,
            None,
        );
        if recheck.is_feasible {
            Resolution::Resolved { bookings: working }
        } else {
            Resolution::Unresolvable { conflicts: recheck.conflicts }
        }
    }
}

/// Move the booking at `second_idx` to start right after the one at
/// `first_idx`, preserving its duration
fn shift_after(bookings: &mut [Booking], first_idx: usize, second_idx: usize) {
    let first_end = bookings[first_idx].end;
    let first_buffer = bookings[first_idx].buffer_after;
    let second = &mut bookings[second_idx];
    let duration = second.end - second.start;

    second.start = first_end + TimeDelta::minutes(first_buffer + second.buffer_before);
    second.end = second.start + duration;
}

fn sorted_by_start(bookings: &[Booking]) -> Vec<Booking> {
    let mut sorted = bookings.to_vec();
    sorted.sort_by_key(|b| b.start);
    sorted
}

/// Whether some single open window fully contains the interval
fn covered_by(windows: &[TimeSlot], interval: &TimeSlot) -> bool {
    windows.iter().any(|w| w.contains_range(interval))
}

fn availability_conflict(subject: &str, interval: &TimeSlot, indices: Vec<usize>) -> Conflict {
    Conflict::Availability {
        subject_id: subject.to_string(),
        description: format!(
            "no availability window of '{subject}' covers {} to {}",
            interval.start, interval.end
        ),
        bookings: indices,
    }
}

fn restrict_bookings_to_day(bookings: &[Booking], day: NaiveDate) -> Vec<Booking> {
    bookings.iter().filter(|b| b.start.date() == day).cloned().collect()
}

fn restrict_windows_to_day(windows: &AvailabilityMap, day: NaiveDate) -> AvailabilityMap {
    windows
        .iter()
        .map(|(id, slots)| {
            let day_slots = slots.iter().filter(|s| s.start.date() == day).copied().collect();
            (id.clone(), day_slots)
        })
        .collect()
}

fn next_day(day: NaiveDate) -> Option<NaiveDate> {
    day.succ_opt()
}

/// Round up to the next 15-minute boundary at or after `instant`
fn round_up_to_step(instant: NaiveDateTime) -> NaiveDateTime {
    let minutes = i64::from(instant.time().hour() * 60 + instant.time().minute());
    let has_remainder = instant.time().second() > 0 || minutes % SLOT_STEP_MINUTES != 0;
    let rounded = if has_remainder {
        (minutes / SLOT_STEP_MINUTES + 1) * SLOT_STEP_MINUTES
    } else {
        minutes
    };
    if rounded >= 24 * 60 {
        // Past midnight: no boundary left today; the caller's close-time
        // bound makes the day yield nothing
        return instant.date().and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap());
    }
    let time = NaiveTime::from_hms_opt((rounded / 60) as u32, (rounded % 60) as u32, 0).unwrap();
    instant.date().and_time(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use slotwise_core::ConflictKind;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap() // a Monday
    }

    fn dt(h: u32, m: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn candidate_with_own_id_is_not_its_own_conflict() {
        let existing = vec![Booking::new("b1", "haircut")
            .specialist("anna")
            .at(dt(9, 0), dt(9, 30))];
        // Same id, moved 15 minutes: update semantics, no clash with itself
        let updated = Booking::new("b1", "haircut")
            .specialist("anna")
            .at(dt(9, 15), dt(9, 45));

        let report =
            ConflictDetector::new().check_booking_conflicts(&updated, &existing, None, None, None);
        assert!(!report.has_conflict);
    }

    #[test]
    fn buffers_extend_the_clash_window() {
        let existing = vec![Booking::new("b1", "haircut")
            .specialist("anna")
            .at(dt(9, 0), dt(9, 30))
            .buffers(0, 15)];
        // Starts exactly at the other's end, but its teardown buffer reaches in
        let candidate = Booking::new("b2", "trim")
            .specialist("anna")
            .at(dt(9, 30), dt(10, 0));

        let report =
            ConflictDetector::new().check_booking_conflicts(&candidate, &existing, None, None, None);
        assert!(report.has_conflict);
        assert_eq!(report.conflicts[0].kind(), ConflictKind::Specialist);
    }

    #[test]
    fn resource_conflict_lists_intersecting_ids() {
        let existing = vec![Booking::new("b1", "color")
            .resource("basin")
            .resource("chair-1")
            .at(dt(10, 0), dt(11, 0))];
        let candidate = Booking::new("b2", "wash")
            .resource("basin")
            .at(dt(10, 30), dt(10, 45));

        let report =
            ConflictDetector::new().check_booking_conflicts(&candidate, &existing, None, None, None);
        assert_eq!(report.conflicts.len(), 1);
        match &report.conflicts[0] {
            Conflict::Resource { resource_ids, conflicting_booking_id, .. } => {
                assert_eq!(resource_ids, &vec!["basin".to_string()]);
                assert_eq!(conflicting_booking_id.as_deref(), Some("b1"));
            }
            other => panic!("expected resource conflict, got {other:?}"),
        }
    }

    #[test]
    fn missing_window_entry_means_no_availability_info() {
        let windows = AvailabilityMap::new();
        let candidate = Booking::new("b1", "haircut")
            .specialist("anna")
            .at(dt(9, 0), dt(9, 30));

        let report = ConflictDetector::new().check_booking_conflicts(
            &candidate,
            &[],
            Some(&windows),
            None,
            None,
        );
        assert!(!report.has_conflict);
    }

    #[test]
    fn availability_check_uses_buffered_interval() {
        let mut windows = AvailabilityMap::new();
        windows.insert("anna".into(), vec![TimeSlot::new(dt(9, 0), dt(12, 0))]);

        // Bare interval fits the window, but the setup buffer starts at 08:50
        let candidate = Booking::new("b1", "haircut")
            .specialist("anna")
            .at(dt(9, 0), dt(9, 30))
            .buffers(10, 0);

        let report = ConflictDetector::new().check_booking_conflicts(
            &candidate,
            &[],
            Some(&windows),
            None,
            None,
        );
        assert!(report.has_conflict);
        assert_eq!(report.conflicts[0].kind(), ConflictKind::Availability);
    }

    #[test]
    fn dependency_satisfied_by_earlier_booking() {
        let rules = vec![DependencyRule::new("color", vec!["consult".into()])];
        let existing = vec![Booking::new("b1", "consult").at(dt(9, 0), dt(9, 15))];
        let candidate = Booking::new("b2", "color").at(dt(9, 15), dt(10, 0));

        let detector = ConflictDetector::new();
        let ok = detector.check_booking_conflicts(&candidate, &existing, None, None, Some(&rules));
        assert!(!ok.has_conflict);

        // Prerequisite ends after the candidate starts
        let too_early = Booking::new("b3", "color").at(dt(9, 10), dt(9, 55));
        let bad =
            detector.check_booking_conflicts(&too_early, &existing, None, None, Some(&rules));
        assert!(bad.has_conflict);
        assert_eq!(bad.conflicts[0].kind(), ConflictKind::DependencyViolation);
    }

    #[test]
    fn multi_feasibility_indices_follow_start_order() {
        // Supplied out of order; indices must refer to the sorted order
        let bookings = vec![
            Booking::new("late", "s2").specialist("anna").at(dt(9, 15), dt(9, 45)),
            Booking::new("early", "s1").specialist("anna").at(dt(9, 0), dt(9, 30)),
        ];
        let report = ConflictDetector::new().check_multi_booking_feasibility(
            &bookings, None, None, None,
        );
        assert!(!report.is_feasible);
        assert_eq!(report.conflicts[0].booking_indices(), &[0, 1]);
    }

    #[test]
    fn round_up_lands_on_quarter_hour() {
        assert_eq!(round_up_to_step(dt(9, 7)), dt(9, 15));
        assert_eq!(round_up_to_step(dt(9, 15)), dt(9, 15));
        assert_eq!(
            round_up_to_step(day().and_hms_opt(9, 15, 30).unwrap()),
            dt(9, 30)
        );
    }

    #[test]
    fn shift_after_preserves_duration() {
        let mut bookings = vec![
            Booking::new("b1", "s1").at(dt(9, 0), dt(9, 30)).buffers(0, 10),
            Booking::new("b2", "s2").at(dt(9, 15), dt(9, 45)).buffers(5, 0),
        ];
        shift_after(&mut bookings, 0, 1);
        assert_eq!(bookings[1].start, dt(9, 45)); // 09:30 + 10 + 5
        assert_eq!(bookings[1].end, dt(10, 15));
        assert_eq!(bookings[1].duration_minutes(), 30);
    }

    #[test]
    fn windows_restricted_to_requested_day() {
        let mut windows = AvailabilityMap::new();
        let tomorrow = day().succ_opt().unwrap();
        windows.insert(
            "anna".into(),
            vec![
                TimeSlot::new(dt(9, 0), dt(17, 0)),
                TimeSlot::new(
                    tomorrow.and_hms_opt(9, 0, 0).unwrap(),
                    tomorrow.and_hms_opt(17, 0, 0).unwrap(),
                ),
            ],
        );
        let restricted = restrict_windows_to_day(&windows, day());
        assert_eq!(restricted["anna"].len(), 1);
        assert_eq!(restricted["anna"][0].start, dt(9, 0));
    }
}
