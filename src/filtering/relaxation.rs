// Tiered filter relaxation
//
// Query with every active constraint; while nothing comes back, drop the single
// lowest-priority constraint and retry. MustHave constraints are only dropped as
// a logged last resort, and only when the policy allows it.
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{Candidate, GeoFilter};
use crate::error::StoreError;
use crate::filtering::{Constraint, FilterSet};
use crate::storage::{CandidateStore, OrderSpec};

/// Relaxation behaviour switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaxationPolicy {
    /// When set, MustHave constraints are never dropped and the search ends in
    /// `Exhausted` instead of a forced relaxation.
    #[serde(default)]
    pub never_relax_must_have: bool,
}

/// One query attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelaxationStep {
    /// 1-based attempt number
    pub iteration: usize,
    /// Constraints active for this attempt, rendered as `name=value`
    pub filters_tried: Vec<String>,
    pub result_count: usize,
}

/// A constraint dropped during relaxation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelaxedFilter {
    pub constraint: Constraint,
    /// Attempt after which the constraint was dropped
    pub after_iteration: usize,
    /// True when a MustHave constraint was dropped as a last resort
    pub forced: bool,
}

/// Full relaxation history for caller transparency
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelaxationReport {
    pub history: Vec<RelaxationStep>,
    /// Constraints active on the final attempt
    pub filters_applied: Vec<Constraint>,
    /// Dropped constraints in drop order
    pub filters_relaxed: Vec<RelaxedFilter>,
    /// Names of the MustHave constraints in the original request
    pub must_have_filters: Vec<String>,
}

impl RelaxationReport {
    /// True if any MustHave constraint was dropped
    pub fn forced_relaxation(&self) -> bool {
        self.filters_relaxed.iter().any(|r| r.forced)
    }

    pub fn relaxed_names(&self) -> Vec<String> {
        self.filters_relaxed
            .iter()
            .map(|r| r.constraint.name.clone())
            .collect()
    }

    pub fn iterations(&self) -> usize {
        self.history.len()
    }
}

/// Terminal result of relaxation
#[derive(Debug, Clone, PartialEq)]
pub enum RelaxationOutcome {
    Found {
        candidates: Vec<Candidate>,
        report: RelaxationReport,
    },
    /// No candidates even after every permitted relaxation
    Exhausted { report: RelaxationReport },
}

impl RelaxationOutcome {
    pub fn report(&self) -> &RelaxationReport {
        match self {
            RelaxationOutcome::Found { report, .. } => report,
            RelaxationOutcome::Exhausted { report } => report,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RelaxationOutcome::Exhausted { .. })
    }
}

/// Internal state of the search
enum State {
    Searching(FilterSet),
    Found(Vec<Candidate>, FilterSet),
    Exhausted(FilterSet),
}

/// Drives tier-ordered relaxation against a [`CandidateStore`]
pub struct RelaxationController<'a> {
    store: &'a dyn CandidateStore,
    policy: RelaxationPolicy,
    limit: u32,
    order: OrderSpec,
    geo: Option<GeoFilter>,
}

impl<'a> RelaxationController<'a> {
    pub fn new(store: &'a dyn CandidateStore, policy: RelaxationPolicy) -> Self {
        Self {
            store,
            policy,
            limit: 100,
            order: OrderSpec::default(),
            geo: None,
        }
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn order(mut self, order: OrderSpec) -> Self {
        self.order = order;
        self
    }

    pub fn geo(mut self, geo: Option<GeoFilter>) -> Self {
        self.geo = geo;
        self
    }

    /// Search, widening the filters until candidates appear.
    ///
    /// Store errors abort immediately; no attempt is retried.
    pub fn run(&self, filters: &FilterSet) -> Result<RelaxationOutcome, StoreError> {
        let mut report = RelaxationReport {
            must_have_filters: filters.must_have_names(),
            ..Default::default()
        };

        let mut state = State::Searching(filters.clone());
        loop {
            state = match state {
                State::Searching(active) => self.step(active, &mut report)?,
                State::Found(candidates, active) => {
                    report.filters_applied = active.iter().cloned().collect();
                    info!(
                        iterations = report.iterations(),
                        relaxed = ?report.relaxed_names(),
                        results = candidates.len(),
                        "Filter search found candidates"
                    );
                    return Ok(RelaxationOutcome::Found { candidates, report });
                }
                State::Exhausted(active) => {
                    report.filters_applied = active.iter().cloned().collect();
                    info!(
                        iterations = report.iterations(),
                        relaxed = ?report.relaxed_names(),
                        "Filter search exhausted"
                    );
                    return Ok(RelaxationOutcome::Exhausted { report });
                }
            };
        }
    }

    fn step(&self, mut active: FilterSet, report: &mut RelaxationReport) -> Result<State, StoreError> {
        let iteration = report.history.len() + 1;
        let candidates = self.store.search(&active, self.limit, &self.order, self.geo)?;

        report.history.push(RelaxationStep {
            iteration,
            filters_tried: active.iter().map(|c| c.to_string()).collect(),
            result_count: candidates.len(),
        });
        debug!(iteration, active = active.len(), results = candidates.len(), "relaxation attempt");

        if !candidates.is_empty() {
            return Ok(State::Found(candidates, active));
        }

        if let Some(name) = active.next_relaxable().map(|c| c.name.clone()) {
            if let Some(constraint) = active.remove(&name) {
                debug!(filter = %constraint, tier = ?constraint.tier, "Relaxing filter");
                report.filters_relaxed.push(RelaxedFilter {
                    constraint,
                    after_iteration: iteration,
                    forced: false,
                });
            }
            return Ok(State::Searching(active));
        }

        if self.policy.never_relax_must_have {
            return Ok(State::Exhausted(active));
        }

        match active.next_forced().map(|c| c.name.clone()) {
            Some(name) => {
                if let Some(constraint) = active.remove(&name) {
                    warn!(filter = %constraint, "Forced relaxation of must-have filter");
                    report.filters_relaxed.push(RelaxedFilter {
                        constraint,
                        after_iteration: iteration,
                        forced: true,
                    });
                }
                Ok(State::Searching(active))
            }
            None => Ok(State::Exhausted(active)),
        }
    }
}
