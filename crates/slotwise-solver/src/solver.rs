//! Multi-service constraint-satisfaction scheduling
//!
//! Backtracking search over service x slot assignments.
//!
//! # Algorithm
//!
//! 1. One scheduling variable per requested service; its domain is the
//!    caller-supplied candidate start times for that service.
//! 2. Variables ordered by a weighted most-constrained-variable score
//!    (`1/domain + 0.5*deps + 0.3*resources + 0.3*specialists`),
//!    descending; ties keep discovery order.
//! 3. Depth-first search binds a start time, a specialist and the
//!    required resources per variable, forward-checking the remaining
//!    domains after every assignment and backtracking on dead ends.
//! 4. Complete assignment sets are collected up to `max_solutions` and
//!    ranked by the configured criterion.
//!
//! An infeasible problem yields an empty solution list, not an error;
//! errors are reserved for malformed input.
//!
//! The forward-checking rule prunes an unassigned variable's slot only
//! when the fresh assignment's specialist is among that variable's
//! eligible specialists. Shared-resource overlaps are not pruned there;
//! they are still rejected by binding and the consistency check, so the
//! asymmetry costs pruning power, never correctness.

use chrono::{NaiveDate, NaiveTime};
use slotwise_core::{
    AvailabilityMap, Duration, ResourceId, ServiceId, ServiceRequest, SpecialistId, TimeSlot,
};
use std::collections::HashMap;
use thiserror::Error;

/// Candidate start times per service id: the solver's domains
pub type SlotsByService = HashMap<ServiceId, Vec<NaiveTime>>;

/// Malformed solver input
#[derive(Debug, Error)]
pub enum SolveError {
    #[error("service '{0}' has a non-positive duration")]
    NonPositiveDuration(ServiceId),

    #[error("no candidate slot entry supplied for service '{0}'")]
    MissingSlots(ServiceId),
}

/// Ranking criterion for completed schedules
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OptimizeFor {
    /// Ascending by total span, `max(end) - min(start)`
    #[default]
    Duration,
    /// Ascending by summed idle time between consecutive assignments
    Gaps,
    /// Leave discovery order unchanged
    SpecialistPreference,
}

/// A service bound to a concrete interval, specialist and resources
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScheduleAssignment {
    pub service_id: ServiceId,
    pub service_name: String,
    pub start: chrono::NaiveDateTime,
    pub end: chrono::NaiveDateTime,
    pub specialist_id: Option<SpecialistId>,
    pub duration: Duration,
    pub buffer_before: i64,
    pub buffer_after: i64,
    pub resources: Vec<ResourceId>,
}

impl ScheduleAssignment {
    pub fn slot(&self) -> TimeSlot {
        TimeSlot::new(self.start, self.end)
    }

    pub fn buffered_slot(&self) -> TimeSlot {
        self.slot().padded(self.buffer_before, self.buffer_after)
    }
}

/// Backtracking scheduler with forward checking.
///
/// The value holds configuration only; every call owns its search state,
/// so one solver may serve concurrent invocations.
#[derive(Clone, Copy, Debug)]
pub struct ConstraintSolver {
    /// Stop after this many complete schedules
    pub max_solutions: usize,
    /// Ranking applied to the collected schedules
    pub optimize_for: OptimizeFor,
}

impl ConstraintSolver {
    pub fn new() -> Self {
        Self { max_solutions: 5, optimize_for: OptimizeFor::default() }
    }

    pub fn max_solutions(mut self, max: usize) -> Self {
        self.max_solutions = max;
        self
    }

    pub fn optimize_for(mut self, criterion: OptimizeFor) -> Self {
        self.optimize_for = criterion;
        self
    }

    /// Schedule every requested service on `date`.
    ///
    /// Returns up to `max_solutions` complete schedules, ranked by the
    /// configured criterion; each schedule is sorted by start time.
    pub fn solve(
        &self,
        services: &[ServiceRequest],
        slots_by_service: &SlotsByService,
        specialist_windows: &AvailabilityMap,
        resource_windows: &AvailabilityMap,
        date: NaiveDate,
    ) -> Result<Vec<Vec<ScheduleAssignment>>, SolveError> {
        if services.is_empty() {
            return Ok(Vec::new());
        }

        for service in services {
            if service.duration.minutes <= 0 {
                return Err(SolveError::NonPositiveDuration(service.id.clone()));
            }
            if !slots_by_service.contains_key(&service.id) {
                return Err(SolveError::MissingSlots(service.id.clone()));
            }
        }

        let mut state = SearchState::new(services, slots_by_service);
        let ctx = SearchCtx { date, specialist_windows, resource_windows };

        self.backtrack(&mut state, &ctx, 0);
        tracing::debug!(
            services = services.len(),
            solutions = state.solutions.len(),
            "search finished"
        );

        let mut solutions = state.solutions;
        match self.optimize_for {
            OptimizeFor::Duration => solutions.sort_by_key(|s| span_minutes(s)),
            OptimizeFor::Gaps => solutions.sort_by_key(|s| gap_minutes(s)),
            OptimizeFor::SpecialistPreference => {}
        }
        Ok(solutions)
    }

    fn backtrack(&self, state: &mut SearchState<'_>, ctx: &SearchCtx<'_>, depth: usize) {
        if state.solutions.len() >= self.max_solutions {
            return;
        }
        if depth == state.requirements.len() {
            let mut schedule = state.assignments.clone();
            schedule.sort_by_key(|a| a.start);
            tracing::debug!(found = state.solutions.len() + 1, "complete schedule");
            state.solutions.push(schedule);
            return;
        }

        let requirement = state.requirements[depth];
        let slots = state.domains[depth].clone();

        for slot in slots {
            if state.solutions.len() >= self.max_solutions {
                return;
            }

            let start = ctx.date.and_time(slot);
            let end = start + requirement.duration.to_delta();

            if !prerequisites_met(requirement, &state.assignments, start) {
                continue;
            }

            let buffered = TimeSlot::new(start, end)
                .padded(requirement.buffer_before, requirement.buffer_after);

            let Some(specialist) = bind_specialist(
                requirement,
                &state.assignments,
                &buffered,
                ctx.specialist_windows,
            ) else {
                continue;
            };
            let Some(resources) = bind_resources(
                requirement,
                &state.assignments,
                &buffered,
                ctx.resource_windows,
            ) else {
                continue;
            };

            let assignment = ScheduleAssignment {
                service_id: requirement.id.clone(),
                service_name: requirement.name.clone(),
                start,
                end,
                specialist_id: specialist,
                duration: requirement.duration,
                buffer_before: requirement.buffer_before,
                buffer_after: requirement.buffer_after,
                resources,
            };

            if !consistent_with_stack(&assignment, &state.assignments) {
                continue;
            }

            tracing::trace!(service = %assignment.service_id, start = %start, "assigned");
            let snapshot = state.domains.clone();
            state.assignments.push(assignment.clone());

            if self.forward_check(state, ctx, depth, &assignment) {
                self.backtrack(state, ctx, depth + 1);
            } else {
                tracing::trace!(service = %assignment.service_id, "forward checking emptied a domain");
            }

            state.domains = snapshot;
            state.assignments.pop();
        }
    }

    /// Prune the still-unassigned domains against a fresh assignment.
    ///
    /// A slot is removed only when it overlaps the assignment and the
    /// assignment's specialist is among that variable's eligible
    /// specialists. Returns false when a domain empties.
    fn forward_check(
        &self,
        state: &mut SearchState<'_>,
        ctx: &SearchCtx<'_>,
        depth: usize,
        fresh: &ScheduleAssignment,
    ) -> bool {
        let Some(specialist) = &fresh.specialist_id else {
            return true;
        };
        let fresh_buffered = fresh.buffered_slot();

        for idx in (depth + 1)..state.requirements.len() {
            let requirement = state.requirements[idx];
            if !requirement.eligible_specialists.contains(specialist) {
                continue;
            }

            state.domains[idx].retain(|slot| {
                let start = ctx.date.and_time(*slot);
                let end = start + requirement.duration.to_delta();
                let candidate = TimeSlot::new(start, end)
                    .padded(requirement.buffer_before, requirement.buffer_after);
                !candidate.overlaps(&fresh_buffered)
            });

            if state.domains[idx].is_empty() {
                return false;
            }
        }
        true
    }
}

impl Default for ConstraintSolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable per-call inputs threaded through the recursion
struct SearchCtx<'a> {
    date: NaiveDate,
    specialist_windows: &'a AvailabilityMap,
    resource_windows: &'a AvailabilityMap,
}

/// Mutable per-call search state: never shared across solves
struct SearchState<'a> {
    /// Variables in weighted most-constrained-first order
    requirements: Vec<&'a ServiceRequest>,
    /// Candidate start times, parallel to `requirements`; pruned by
    /// forward checking and restored on backtrack
    domains: Vec<Vec<NaiveTime>>,
    /// Current partial schedule
    assignments: Vec<ScheduleAssignment>,
    /// Completed schedules
    solutions: Vec<Vec<ScheduleAssignment>>,
}

impl<'a> SearchState<'a> {
    fn new(services: &'a [ServiceRequest], slots_by_service: &SlotsByService) -> Self {
        let mut ordered: Vec<(&ServiceRequest, Vec<NaiveTime>)> = services
            .iter()
            .map(|s| {
                let domain = slots_by_service.get(&s.id).cloned().unwrap_or_default();
                (s, domain)
            })
            .collect();

        // Weighted most-constrained-variable ordering; stable sort keeps
        // discovery order for ties
        ordered.sort_by(|(a, da), (b, db)| {
            constraint_score(b, db.len())
                .partial_cmp(&constraint_score(a, da.len()))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let (requirements, domains) = ordered.into_iter().unzip();
        Self { requirements, domains, assignments: Vec::new(), solutions: Vec::new() }
    }
}

/// `1/domain + 0.5*dependencies + 0.3*resources + 0.3*specialists`
fn constraint_score(service: &ServiceRequest, domain_size: usize) -> f64 {
    1.0 / domain_size as f64
        + 0.5 * service.dependencies.len() as f64
        + 0.3 * service.required_resources.len() as f64
        + 0.3 * service.eligible_specialists.len() as f64
}

/// Every prerequisite service must already be assigned and end at/before
/// the candidate start
fn prerequisites_met(
    requirement: &ServiceRequest,
    assignments: &[ScheduleAssignment],
    start: chrono::NaiveDateTime,
) -> bool {
    requirement.dependencies.iter().all(|prerequisite| {
        assignments
            .iter()
            .any(|a| &a.service_id == prerequisite && a.end <= start)
    })
}

/// First eligible specialist that is neither overlap-booked in the stack
/// nor outside their availability windows.
///
/// `Some(None)` means the service needs no specialist; `None` rejects the
/// slot.
fn bind_specialist(
    requirement: &ServiceRequest,
    assignments: &[ScheduleAssignment],
    buffered: &TimeSlot,
    windows: &AvailabilityMap,
) -> Option<Option<SpecialistId>> {
    if requirement.eligible_specialists.is_empty() {
        return Some(None);
    }

    for specialist in &requirement.eligible_specialists {
        let busy = assignments.iter().any(|a| {
            a.specialist_id.as_ref() == Some(specialist) && a.buffered_slot().overlaps(buffered)
        });
        if busy {
            continue;
        }
        if let Some(open) = windows.get(specialist) {
            if !open.iter().any(|w| w.contains_range(buffered)) {
                continue;
            }
        }
        return Some(Some(specialist.clone()));
    }
    None
}

/// All required resources, or `None` when any is overlap-booked or
/// outside its windows
fn bind_resources(
    requirement: &ServiceRequest,
    assignments: &[ScheduleAssignment],
    buffered: &TimeSlot,
    windows: &AvailabilityMap,
) -> Option<Vec<ResourceId>> {
    for resource in &requirement.required_resources {
        let busy = assignments
            .iter()
            .any(|a| a.resources.contains(resource) && a.buffered_slot().overlaps(buffered));
        if busy {
            return None;
        }
        if let Some(open) = windows.get(resource) {
            if !open.iter().any(|w| w.contains_range(buffered)) {
                return None;
            }
        }
    }
    Some(requirement.required_resources.clone())
}

/// No same-specialist or shared-resource overlap against the stack
fn consistent_with_stack(fresh: &ScheduleAssignment, assignments: &[ScheduleAssignment]) -> bool {
    let buffered = fresh.buffered_slot();
    assignments.iter().all(|a| {
        if !a.buffered_slot().overlaps(&buffered) {
            return true;
        }
        let same_specialist = match (&a.specialist_id, &fresh.specialist_id) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        };
        let shared_resource = a.resources.iter().any(|r| fresh.resources.contains(r));
        !same_specialist && !shared_resource
    })
}

/// `max(end) - min(start)` over the schedule, in minutes
fn span_minutes(schedule: &[ScheduleAssignment]) -> i64 {
    let Some(first) = schedule.iter().map(|a| a.start).min() else {
        return 0;
    };
    let last = schedule.iter().map(|a| a.end).max().unwrap_or(first);
    (last - first).num_minutes()
}

/// Summed idle time between consecutive start-sorted assignments
fn gap_minutes(schedule: &[ScheduleAssignment]) -> i64 {
    let mut sorted: Vec<_> = schedule.iter().collect();
    sorted.sort_by_key(|a| a.start);
    sorted
        .windows(2)
        .map(|pair| (pair[1].start - pair[0].end).num_minutes().max(0))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn slots(times: &[(u32, u32)]) -> Vec<NaiveTime> {
        times.iter().map(|&(h, m)| t(h, m)).collect()
    }

    #[test]
    fn weighted_score_is_not_pure_mrv() {
        // Larger domain but heavy side constraints must outrank a small
        // bare domain
        let constrained = ServiceRequest::new("a", Duration::minutes(30))
            .depends_on("x")
            .depends_on("y")
            .requires_resource("r1")
            .eligible_specialist("s1");
        let bare = ServiceRequest::new("b", Duration::minutes(30));

        // constrained: 1/4 + 0.5*2 + 0.3 + 0.3 = 1.85; bare: 1/2 = 0.5
        assert!(constraint_score(&constrained, 4) > constraint_score(&bare, 2));
    }

    #[test]
    fn ordering_prefers_most_constrained() {
        let services = vec![
            ServiceRequest::new("loose", Duration::minutes(30)),
            ServiceRequest::new("tight", Duration::minutes(30))
                .depends_on("loose")
                .eligible_specialist("anna"),
        ];
        let mut by_service = SlotsByService::new();
        by_service.insert("loose".into(), slots(&[(9, 0), (10, 0), (11, 0)]));
        by_service.insert("tight".into(), slots(&[(9, 0), (10, 0), (11, 0)]));

        let state = SearchState::new(&services, &by_service);
        assert_eq!(state.requirements[0].id, "tight");
        assert_eq!(state.requirements[1].id, "loose");
    }

    #[test]
    fn ties_keep_discovery_order() {
        let services = vec![
            ServiceRequest::new("first", Duration::minutes(30)),
            ServiceRequest::new("second", Duration::minutes(30)),
        ];
        let mut by_service = SlotsByService::new();
        by_service.insert("first".into(), slots(&[(9, 0)]));
        by_service.insert("second".into(), slots(&[(9, 0)]));

        let state = SearchState::new(&services, &by_service);
        assert_eq!(state.requirements[0].id, "first");
        assert_eq!(state.requirements[1].id, "second");
    }

    #[test]
    fn forward_check_skips_ineligible_requirements() {
        // Fresh assignment held by "anna"; the other service can only use
        // "bert", so its overlapping slot survives (the asymmetric rule)
        let services = vec![
            ServiceRequest::new("mine", Duration::minutes(60)).eligible_specialist("anna"),
            ServiceRequest::new("other", Duration::minutes(60)).eligible_specialist("bert"),
        ];
        let mut by_service = SlotsByService::new();
        by_service.insert("mine".into(), slots(&[(9, 0)]));
        by_service.insert("other".into(), slots(&[(9, 0)]));

        let solver = ConstraintSolver::new();
        let solutions = solver
            .solve(&services, &by_service, &AvailabilityMap::new(), &AvailabilityMap::new(), date())
            .unwrap();

        // Both run 09:00-10:00 in parallel with different specialists
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0].len(), 2);
        assert_eq!(solutions[0][0].start, solutions[0][1].start);
    }

    #[test]
    fn shared_specialist_forces_sequencing() {
        let services = vec![
            ServiceRequest::new("cut", Duration::minutes(60)).eligible_specialist("anna"),
            ServiceRequest::new("style", Duration::minutes(60)).eligible_specialist("anna"),
        ];
        let mut by_service = SlotsByService::new();
        by_service.insert("cut".into(), slots(&[(9, 0), (10, 0)]));
        by_service.insert("style".into(), slots(&[(9, 0), (10, 0)]));

        let solver = ConstraintSolver::new();
        let solutions = solver
            .solve(&services, &by_service, &AvailabilityMap::new(), &AvailabilityMap::new(), date())
            .unwrap();

        assert!(!solutions.is_empty());
        for schedule in &solutions {
            let [a, b] = &schedule[..] else { panic!("expected two assignments") };
            assert!(!a.buffered_slot().overlaps(&b.buffered_slot()));
        }
    }

    #[test]
    fn gap_and_span_metrics() {
        let make = |s: (u32, u32), e: (u32, u32)| ScheduleAssignment {
            service_id: "s".into(),
            service_name: "s".into(),
            start: date().and_hms_opt(s.0, s.1, 0).unwrap(),
            end: date().and_hms_opt(e.0, e.1, 0).unwrap(),
            specialist_id: None,
            duration: Duration::minutes(30),
            buffer_before: 0,
            buffer_after: 0,
            resources: Vec::new(),
        };
        let schedule = vec![make((9, 0), (9, 30)), make((10, 0), (10, 30))];
        assert_eq!(span_minutes(&schedule), 90);
        assert_eq!(gap_minutes(&schedule), 30);
        assert_eq!(span_minutes(&[]), 0);
    }

    #[test]
    fn zero_duration_service_is_malformed() {
        let services = vec![ServiceRequest::new("broken", Duration::zero())];
        let mut by_service = SlotsByService::new();
        by_service.insert("broken".into(), slots(&[(9, 0)]));

        let result = ConstraintSolver::new().solve(
            &services,
            &by_service,
            &AvailabilityMap::new(),
            &AvailabilityMap::new(),
            date(),
        );
        assert!(matches!(result, Err(SolveError::NonPositiveDuration(id)) if id == "broken"));
    }

    #[test]
    fn missing_slot_entry_is_malformed() {
        let services = vec![ServiceRequest::new("cut", Duration::minutes(30))];
        let result = ConstraintSolver::new().solve(
            &services,
            &SlotsByService::new(),
            &AvailabilityMap::new(),
            &AvailabilityMap::new(),
            date(),
        );
        assert!(matches!(result, Err(SolveError::MissingSlots(id)) if id == "cut"));
    }

    #[test]
    fn empty_domain_is_infeasible_not_an_error() {
        let services = vec![ServiceRequest::new("cut", Duration::minutes(30))];
        let mut by_service = SlotsByService::new();
        by_service.insert("cut".into(), Vec::new());

        let solutions = ConstraintSolver::new()
            .solve(&services, &by_service, &AvailabilityMap::new(), &AvailabilityMap::new(), date())
            .unwrap();
        assert!(solutions.is_empty());
    }
}
