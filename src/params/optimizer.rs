//! Online parameter optimization from sparse feedback.
//!
//! The optimizer holds the mutable [`ParameterState`] behind a single mutex:
//! one optimization run is one critical section, so concurrent feedback can
//! never interleave with an adjustment. Adjustments follow a bounded
//! controller: `raw = factor(driver) * (metric - baseline)`, clipped to the
//! per-run cap, clamped to the catalog bounds. The controller only runs once
//! enough feedback has accumulated AND enough steps have passed since the
//! last run; both counters reset on every run.
//!
//! When a store is attached, state is committed after every mutation, so an
//! acknowledged adjustment or feedback entry survives a crash.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::ParamError;
use crate::knowledge::now_secs;
use crate::params::{MetricDriver, ParameterCatalog, ParameterSpec};
use crate::store::durable::DurableStore;
use crate::store::{decode, encode, keys};

/// Result type for parameter operations.
pub type ParamResult<T> = std::result::Result<T, ParamError>;

/// Cap on retained feedback entries; the oldest are dropped past this.
const FEEDBACK_HISTORY_CAP: usize = 1024;
/// Cap on retained optimization snapshots.
const SNAPSHOT_HISTORY_CAP: usize = 128;

/// One recorded piece of user feedback on a query outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEntry {
    /// Identifier of the query this feedback refers to.
    pub query_id: String,
    /// Whether the user accepted the result.
    pub accepted: bool,
    /// How relevant the result was, in [0.0, 1.0].
    pub relevance: f64,
    /// When the feedback arrived (seconds since UNIX epoch).
    pub timestamp: u64,
}

/// Aggregated metrics for the current optimization window.
///
/// A metric is `None` when the window holds no data for it; the optimizer
/// skips parameters whose driving metric is absent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OptimizationMetrics {
    /// Running mean of quality signals (graph observations and accepted
    /// feedback) in the window.
    pub avg_quality: Option<f64>,
    /// Mean relevance of feedback in the window.
    pub avg_relevance: Option<f64>,
    /// Population standard deviation of relevance in the window.
    pub volatility: Option<f64>,
    /// Feedback entries in the window.
    pub feedback_count: u64,
    /// Steps taken in the window.
    pub steps: u64,
}

/// One applied parameter adjustment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adjustment {
    pub name: String,
    /// `None` for the global value, `Some` for a domain override.
    pub domain: Option<String>,
    pub previous: f64,
    pub applied: f64,
    /// The metric value that drove this adjustment.
    pub metric: f64,
    pub driver: MetricDriver,
}

/// Point-in-time record of parameter values and the metrics that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub values: BTreeMap<String, f64>,
    pub domain_overrides: BTreeMap<String, BTreeMap<String, f64>>,
    pub metrics: OptimizationMetrics,
    pub adjustments: Vec<Adjustment>,
    pub timestamp: u64,
    /// 1-based optimization run number.
    pub run: u64,
}

/// The full mutable optimizer state; serialized wholesale to the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ParameterState {
    values: BTreeMap<String, f64>,
    domain_overrides: BTreeMap<String, BTreeMap<String, f64>>,
    feedback_history: Vec<FeedbackEntry>,
    snapshots: Vec<Snapshot>,
    /// Start of the current window within `feedback_history`.
    window_start: usize,
    /// Quality running mean accumulators for the current window.
    quality_sum: f64,
    quality_count: u64,
    /// Feedback entries in the current window.
    feedback_count: u64,
    /// Steps taken in the current window.
    steps: u64,
    /// Completed optimization runs.
    runs: u64,
}

impl ParameterState {
    fn window(&self) -> &[FeedbackEntry] {
        &self.feedback_history[self.window_start.min(self.feedback_history.len())..]
    }

    fn metrics(&self) -> OptimizationMetrics {
        let avg_quality = (self.quality_count > 0).then(|| self.quality_sum / self.quality_count as f64);

        let window = self.window();
        let (avg_relevance, volatility) = if window.is_empty() {
            (None, None)
        } else {
            let n = window.len() as f64;
            let mean = window.iter().map(|e| e.relevance).sum::<f64>() / n;
            let variance =
                window.iter().map(|e| (e.relevance - mean).powi(2)).sum::<f64>() / n;
            (Some(mean), Some(variance.sqrt()))
        };

        OptimizationMetrics {
            avg_quality,
            avg_relevance,
            volatility,
            feedback_count: self.feedback_count,
            steps: self.steps,
        }
    }
}

/// Bounded online optimizer for the catalog's tunable parameters.
pub struct ParameterOptimizer {
    catalog: ParameterCatalog,
    state: Mutex<ParameterState>,
    store: Option<Arc<DurableStore>>,
}

impl ParameterOptimizer {
    /// Create an optimizer with every parameter at its initial (midpoint) value.
    pub fn new(catalog: ParameterCatalog) -> Self {
        let state = ParameterState {
            values: catalog.initial_values(),
            ..Default::default()
        };
        Self {
            catalog,
            state: Mutex::new(state),
            store: None,
        }
    }

    /// Open an optimizer backed by a durable store, restoring persisted state.
    ///
    /// Parameters added to the catalog since the state was written start at
    /// their midpoint; persisted values for parameters no longer declared are
    /// dropped.
    pub fn with_store(catalog: ParameterCatalog, store: Arc<DurableStore>) -> ParamResult<Self> {
        let mut state = match store.get(keys::PARAMETER_STATE)? {
            Some(bytes) => decode::<ParameterState>(&bytes)?,
            None => ParameterState::default(),
        };

        state
            .values
            .retain(|name, _| catalog.spec(name).is_some());
        for spec in &catalog.parameters {
            state
                .values
                .entry(spec.name.clone())
                .or_insert_with(|| spec.initial_value());
        }

        tracing::info!(
            parameters = state.values.len(),
            runs = state.runs,
            feedback = state.feedback_history.len(),
            "parameter state restored"
        );

        Ok(Self {
            catalog,
            state: Mutex::new(state),
            store: Some(store),
        })
    }

    /// The immutable catalog this optimizer works against.
    pub fn catalog(&self) -> &ParameterCatalog {
        &self.catalog
    }

    /// Current global values for all parameters.
    pub fn values(&self) -> BTreeMap<String, f64> {
        self.lock().values.clone()
    }

    /// Current global value of one parameter.
    pub fn value_of(&self, name: &str) -> ParamResult<f64> {
        self.lock()
            .values
            .get(name)
            .copied()
            .ok_or_else(|| ParamError::UnknownParameter { name: name.into() })
    }

    /// Effective value of a parameter: the domain override when one exists,
    /// otherwise the global value.
    pub fn value_for(&self, name: &str, domain: Option<&str>) -> ParamResult<f64> {
        let state = self.lock();
        if let Some(domain) = domain {
            if let Some(value) = state
                .domain_overrides
                .get(domain)
                .and_then(|m| m.get(name))
            {
                return Ok(*value);
            }
        }
        state
            .values
            .get(name)
            .copied()
            .ok_or_else(|| ParamError::UnknownParameter { name: name.into() })
    }

    /// Explicitly set a global parameter value. Out-of-bounds values are
    /// rejected; the catalog bounds hold at all times.
    pub fn set_value(&self, name: &str, value: f64) -> ParamResult<()> {
        let spec = self.spec(name)?;
        if !value.is_finite() || value < spec.min || value > spec.max {
            return Err(ParamError::OutOfBounds {
                name: name.into(),
                value,
                min: spec.min,
                max: spec.max,
            });
        }
        let mut state = self.lock();
        state.values.insert(name.to_string(), value);
        self.persist(&state)
    }

    /// Set a domain-scoped override for a parameter.
    pub fn set_domain_override(&self, domain: &str, name: &str, value: f64) -> ParamResult<()> {
        let spec = self.spec(name)?;
        if !value.is_finite() || value < spec.min || value > spec.max {
            return Err(ParamError::OutOfBounds {
                name: name.into(),
                value,
                min: spec.min,
                max: spec.max,
            });
        }
        let mut state = self.lock();
        state
            .domain_overrides
            .entry(domain.to_string())
            .or_default()
            .insert(name.to_string(), value);
        self.persist(&state)
    }

    /// Fold an observed quality signal (e.g. an ingested confidence) into the
    /// current window's quality running mean.
    pub fn observe_quality(&self, quality: f64) -> ParamResult<()> {
        validate_metric("quality", quality)?;
        let mut state = self.lock();
        state.quality_sum += quality;
        state.quality_count += 1;
        self.persist(&state)
    }

    /// Record one feedback entry. The quality signal derived from it is the
    /// relevance score when accepted and zero when rejected.
    pub fn record_feedback(
        &self,
        query_id: &str,
        accepted: bool,
        relevance: f64,
    ) -> ParamResult<()> {
        validate_metric("relevance", relevance)?;
        let mut state = self.lock();

        state.feedback_history.push(FeedbackEntry {
            query_id: query_id.to_string(),
            accepted,
            relevance,
            timestamp: now_secs(),
        });
        if state.feedback_history.len() > FEEDBACK_HISTORY_CAP {
            let excess = state.feedback_history.len() - FEEDBACK_HISTORY_CAP;
            state.feedback_history.drain(..excess);
            state.window_start = state.window_start.saturating_sub(excess);
        }
        state.feedback_count += 1;

        let quality = if accepted { relevance } else { 0.0 };
        state.quality_sum += quality;
        state.quality_count += 1;

        self.persist(&state)
    }

    /// Count one feedback-loop step and run optimization when due.
    ///
    /// Returns the snapshot of an optimization run, or `None` when the
    /// trigger has not fired.
    pub fn advance_step(&self) -> ParamResult<Option<Snapshot>> {
        let mut state = self.lock();
        state.steps += 1;

        let due = state.feedback_count >= self.catalog.thresholds.min_feedback_count
            && state.steps >= self.catalog.thresholds.update_interval;
        if !due {
            self.persist(&state)?;
            return Ok(None);
        }

        let snapshot = self.optimize_locked(&mut state)?;
        self.persist(&state)?;
        Ok(Some(snapshot))
    }

    /// Current values and metrics without recording anything.
    pub fn current_snapshot(&self) -> Snapshot {
        let state = self.lock();
        Snapshot {
            values: state.values.clone(),
            domain_overrides: state.domain_overrides.clone(),
            metrics: state.metrics(),
            adjustments: Vec::new(),
            timestamp: now_secs(),
            run: state.runs,
        }
    }

    /// The recorded optimization history, oldest first.
    pub fn history(&self) -> Vec<Snapshot> {
        self.lock().snapshots.clone()
    }

    /// Completed optimization runs.
    pub fn runs(&self) -> u64 {
        self.lock().runs
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn lock(&self) -> std::sync::MutexGuard<'_, ParameterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn spec(&self, name: &str) -> ParamResult<&ParameterSpec> {
        self.catalog
            .spec(name)
            .ok_or_else(|| ParamError::UnknownParameter { name: name.into() })
    }

    /// One optimization run. Caller holds the state lock; the whole run is a
    /// single critical section.
    fn optimize_locked(&self, state: &mut ParameterState) -> ParamResult<Snapshot> {
        let metrics = state.metrics();
        for (name, value) in [
            ("avg_quality", metrics.avg_quality),
            ("avg_relevance", metrics.avg_relevance),
            ("volatility", metrics.volatility),
        ] {
            if let Some(value) = value {
                validate_metric(name, value)?;
            }
        }

        let cap = self.catalog.thresholds.max_adjustment_per_step;
        let mut adjustments = Vec::new();

        for spec in &self.catalog.parameters {
            let Some(metric) = driver_metric(spec.driver, &metrics) else {
                continue; // insufficient data for this driver
            };
            let factor = self.catalog.learning_rates.factor(spec.driver);

            if let Some(&current) = state.values.get(&spec.name) {
                let next = controller(spec, current, metric, factor, cap);
                if next != current {
                    state.values.insert(spec.name.clone(), next);
                    adjustments.push(Adjustment {
                        name: spec.name.clone(),
                        domain: None,
                        previous: current,
                        applied: next,
                        metric,
                        driver: spec.driver,
                    });
                }
            }

            // Domain overrides move by the same rule, scoped to their entry.
            for (domain, overrides) in state.domain_overrides.iter_mut() {
                if let Some(current) = overrides.get(&spec.name).copied() {
                    let next = controller(spec, current, metric, factor, cap);
                    if next != current {
                        overrides.insert(spec.name.clone(), next);
                        adjustments.push(Adjustment {
                            name: spec.name.clone(),
                            domain: Some(domain.clone()),
                            previous: current,
                            applied: next,
                            metric,
                            driver: spec.driver,
                        });
                    }
                }
            }
        }

        state.runs += 1;
        let snapshot = Snapshot {
            values: state.values.clone(),
            domain_overrides: state.domain_overrides.clone(),
            metrics,
            adjustments,
            timestamp: now_secs(),
            run: state.runs,
        };
        state.snapshots.push(snapshot.clone());
        if state.snapshots.len() > SNAPSHOT_HISTORY_CAP {
            let excess = state.snapshots.len() - SNAPSHOT_HISTORY_CAP;
            state.snapshots.drain(..excess);
        }

        // Start a fresh window.
        state.window_start = state.feedback_history.len();
        state.feedback_count = 0;
        state.steps = 0;
        state.quality_sum = 0.0;
        state.quality_count = 0;

        tracing::info!(
            run = state.runs,
            adjustments = snapshot.adjustments.len(),
            avg_quality = ?metrics.avg_quality,
            avg_relevance = ?metrics.avg_relevance,
            volatility = ?metrics.volatility,
            "parameter optimization applied"
        );
        Ok(snapshot)
    }

    fn persist(&self, state: &ParameterState) -> ParamResult<()> {
        if let Some(store) = &self.store {
            store.put(keys::PARAMETER_STATE, &encode(state)?)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ParameterOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ParameterOptimizer")
            .field("values", &state.values)
            .field("runs", &state.runs)
            .finish()
    }
}

/// The bounded adjustment rule: scale the metric delta, clip to the per-run
/// cap, clamp to the catalog bounds. No rounding to step_size.
fn controller(spec: &ParameterSpec, current: f64, metric: f64, factor: f64, cap: f64) -> f64 {
    let raw = factor * (metric - baseline(spec, current));
    let clipped = raw.clamp(-cap, cap);
    spec.clamp(current + clipped)
}

/// Baseline the metric is compared against: parameters whose bounds lie in
/// [0, 1] track their own current value; others compare against the metric
/// midpoint.
fn baseline(spec: &ParameterSpec, current: f64) -> f64 {
    if spec.min >= 0.0 && spec.max <= 1.0 {
        current
    } else {
        0.5
    }
}

fn driver_metric(driver: MetricDriver, metrics: &OptimizationMetrics) -> Option<f64> {
    match driver {
        MetricDriver::Quality => metrics.avg_quality,
        MetricDriver::Relevance => metrics.avg_relevance,
        MetricDriver::Volatility => metrics.volatility,
    }
}

fn validate_metric(name: &str, value: f64) -> ParamResult<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ParamError::InvalidMetric {
            name: name.into(),
            value,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::LearningRates;

    fn optimizer() -> ParameterOptimizer {
        ParameterOptimizer::new(ParameterCatalog::default())
    }

    /// Five accepted feedback entries at the given relevance, then five steps.
    fn feed_and_step(opt: &ParameterOptimizer, relevance: f64) -> Option<Snapshot> {
        let mut last = None;
        for i in 0..5 {
            opt.record_feedback(&format!("q{i}"), true, relevance).unwrap();
            last = opt.advance_step().unwrap();
        }
        last
    }

    #[test]
    fn starts_at_midpoints() {
        let opt = optimizer();
        assert!((opt.value_of("base_confidence").unwrap() - 0.55).abs() < 1e-12);
        assert!((opt.value_of("relevance_threshold").unwrap() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn unknown_parameter_is_an_error() {
        let opt = optimizer();
        assert!(matches!(
            opt.value_of("bogus"),
            Err(ParamError::UnknownParameter { .. })
        ));
        assert!(opt.set_value("bogus", 0.5).is_err());
    }

    #[test]
    fn set_value_enforces_bounds() {
        let opt = optimizer();
        opt.set_value("base_confidence", 0.6).unwrap();
        assert_eq!(opt.value_of("base_confidence").unwrap(), 0.6);

        assert!(matches!(
            opt.set_value("base_confidence", 0.05),
            Err(ParamError::OutOfBounds { .. })
        ));
        assert!(opt.set_value("base_confidence", f64::NAN).is_err());
    }

    #[test]
    fn no_optimization_below_feedback_floor() {
        let opt = optimizer();
        // Plenty of steps, not enough feedback.
        for i in 0..4 {
            opt.record_feedback(&format!("q{i}"), true, 0.9).unwrap();
        }
        for _ in 0..10 {
            assert!(opt.advance_step().unwrap().is_none());
        }
        assert_eq!(opt.runs(), 0);
        assert!((opt.value_of("base_confidence").unwrap() - 0.55).abs() < 1e-12);
    }

    #[test]
    fn no_optimization_below_step_interval() {
        let opt = optimizer();
        for i in 0..6 {
            opt.record_feedback(&format!("q{i}"), true, 0.9).unwrap();
        }
        // Only 4 steps taken: trigger needs both conditions.
        for _ in 0..4 {
            assert!(opt.advance_step().unwrap().is_none());
        }
        assert_eq!(opt.runs(), 0);
    }

    #[test]
    fn quality_driven_adjustment_matches_controller_rule() {
        let opt = optimizer();
        opt.set_value("base_confidence", 0.6).unwrap();

        let snapshot = feed_and_step(&opt, 0.9).expect("trigger fires on fifth step");

        // raw = 0.1 * (0.9 - 0.6) = 0.03; within cap; within bounds.
        assert!((opt.value_of("base_confidence").unwrap() - 0.63).abs() < 1e-12);
        assert_eq!(snapshot.run, 1);
        assert!(snapshot
            .adjustments
            .iter()
            .any(|a| a.name == "base_confidence" && (a.applied - 0.63).abs() < 1e-12));
    }

    #[test]
    fn adjustment_clipped_to_per_run_cap() {
        let mut catalog = ParameterCatalog::default();
        catalog.learning_rates = LearningRates {
            quality_factor: 1.0,
            ..LearningRates::default()
        };
        let opt = ParameterOptimizer::new(catalog);

        // knowledge_weight baseline is 0.5 (bounds exceed [0,1]);
        // raw = 1.0 * (0.9 - 0.5) = 0.4, clipped to +0.1.
        let before = opt.value_of("knowledge_weight").unwrap();
        feed_and_step(&opt, 0.9).unwrap();
        let after = opt.value_of("knowledge_weight").unwrap();
        assert!((after - (before + 0.1)).abs() < 1e-12);
    }

    #[test]
    fn adjustment_clamped_to_catalog_bounds() {
        let opt = optimizer();
        opt.set_value("relevance_threshold", 0.9).unwrap();

        // Baseline is current for unit-interval parameters, so a high
        // relevance stream cannot push past the 0.9 bound.
        feed_and_step(&opt, 1.0).unwrap();
        assert!(opt.value_of("relevance_threshold").unwrap() <= 0.9);
    }

    #[test]
    fn uniform_relevance_shrinks_exploration() {
        let opt = optimizer();
        let before = opt.value_of("exploration_rate").unwrap();

        // Zero volatility: raw = 0.05 * (0.0 - 0.25) < 0.
        feed_and_step(&opt, 0.9).unwrap();
        assert!(opt.value_of("exploration_rate").unwrap() < before);
    }

    #[test]
    fn counters_reset_after_run() {
        let opt = optimizer();
        feed_and_step(&opt, 0.9).unwrap();
        assert_eq!(opt.runs(), 1);

        // A fresh window: five more steps without feedback stay a no-op.
        for _ in 0..5 {
            assert!(opt.advance_step().unwrap().is_none());
        }
        assert_eq!(opt.runs(), 1);
    }

    #[test]
    fn rejected_feedback_zeroes_quality_signal() {
        let opt = optimizer();
        opt.set_value("base_confidence", 0.6).unwrap();
        let mut last = None;
        for i in 0..5 {
            opt.record_feedback(&format!("q{i}"), false, 0.9).unwrap();
            last = opt.advance_step().unwrap();
        }
        last.expect("trigger fires");

        // avg_quality = 0.0 → raw = 0.1 * (0.0 - 0.6) = -0.06.
        assert!((opt.value_of("base_confidence").unwrap() - 0.54).abs() < 1e-12);
    }

    #[test]
    fn invalid_relevance_rejected_without_mutation() {
        let opt = optimizer();
        assert!(matches!(
            opt.record_feedback("q", true, f64::NAN),
            Err(ParamError::InvalidMetric { .. })
        ));
        assert!(opt.record_feedback("q", true, 1.5).is_err());
        assert_eq!(opt.current_snapshot().metrics.feedback_count, 0);
    }

    #[test]
    fn domain_override_falls_back_to_global() {
        let opt = optimizer();
        assert_eq!(
            opt.value_for("relevance_threshold", Some("rust")).unwrap(),
            opt.value_of("relevance_threshold").unwrap()
        );

        opt.set_domain_override("rust", "relevance_threshold", 0.8).unwrap();
        assert_eq!(
            opt.value_for("relevance_threshold", Some("rust")).unwrap(),
            0.8
        );
        assert!((opt.value_for("relevance_threshold", Some("python")).unwrap() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn domain_overrides_adjusted_in_scope() {
        let opt = optimizer();
        opt.set_domain_override("rust", "base_confidence", 0.4).unwrap();
        opt.set_value("base_confidence", 0.6).unwrap();

        let snapshot = feed_and_step(&opt, 0.9).unwrap();

        // Global: 0.6 + 0.1*(0.9-0.6) = 0.63; override: 0.4 + 0.1*(0.9-0.4) = 0.45.
        assert!((opt.value_of("base_confidence").unwrap() - 0.63).abs() < 1e-12);
        assert!((opt.value_for("base_confidence", Some("rust")).unwrap() - 0.45).abs() < 1e-12);
        assert!(snapshot.adjustments.iter().any(|a| a.domain.as_deref() == Some("rust")));
    }

    #[test]
    fn history_records_each_run() {
        let opt = optimizer();
        feed_and_step(&opt, 0.9).unwrap();
        feed_and_step(&opt, 0.7).unwrap();

        let history = opt.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].run, 1);
        assert_eq!(history[1].run, 2);
        assert_eq!(history[1].metrics.feedback_count, 5, "window reset between runs");
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(DurableStore::open(dir.path()).unwrap());

        {
            let opt =
                ParameterOptimizer::with_store(ParameterCatalog::default(), Arc::clone(&store))
                    .unwrap();
            opt.set_value("base_confidence", 0.6).unwrap();
            feed_and_step(&opt, 0.9).unwrap();
        }

        let opt = ParameterOptimizer::with_store(ParameterCatalog::default(), store).unwrap();
        assert!((opt.value_of("base_confidence").unwrap() - 0.63).abs() < 1e-12);
        assert_eq!(opt.runs(), 1);
        assert_eq!(opt.history().len(), 1);
    }
}
