//! Count reconciliation.
//!
//! Every page visit and catalog scan records raw observations keyed by
//! `(program, facet, source)`. Recording is an overwrite, so folding the
//! same snapshot twice never double-counts. [`reconcile`] then validates
//! every observation and picks one value per facet using a table-driven
//! [`PrecedencePolicy`].
//!
//! # Default precedence
//!
//! | Rank | Source | Validation |
//! |------|--------|------------|
//! | 1 | `catalog`: full-scan length | always valid |
//! | 2 | `dom`: element attribute | invalid aborts the run |
//! | 3 | `dataset`: global scalar | invalid aborts the run |
//! | 4 | `breakdown`: global breakdown fragment | invalid aborts the run |
//!
//! A page-exposed value that is not a non-negative whole number is a data
//! integrity error, whichever source would have won: zero is a legitimate
//! count and must never stand in for "rejected". Only a facet that no
//! source reported is unresolved; it is published as `null` and counts as
//! zero in the total, unless it is marked `required`.

use anyhow::Result;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use crate::config::ProgramConfig;
use crate::error::PipelineError;
use crate::render::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Catalog,
    Dom,
    Dataset,
    Breakdown,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Catalog => "catalog",
            SourceKind::Dom => "dom",
            SourceKind::Dataset => "dataset",
            SourceKind::Breakdown => "breakdown",
        };
        f.write_str(name)
    }
}

/// Ordered list of sources, most authoritative first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecedencePolicy {
    order: Vec<SourceKind>,
}

impl PrecedencePolicy {
    pub fn new(order: Vec<SourceKind>) -> Self {
        let mut deduped = Vec::with_capacity(order.len());
        for kind in order {
            if !deduped.contains(&kind) {
                deduped.push(kind);
            }
        }
        Self { order: deduped }
    }

    pub fn order(&self) -> &[SourceKind] {
        &self.order
    }

    /// First source in policy order that has a valid value.
    pub fn select(&self, candidates: &BTreeMap<SourceKind, u64>) -> Option<(SourceKind, u64)> {
        self.order
            .iter()
            .find_map(|kind| candidates.get(kind).map(|v| (*kind, *v)))
    }
}

impl Default for PrecedencePolicy {
    fn default() -> Self {
        Self::new(vec![
            SourceKind::Catalog,
            SourceKind::Dom,
            SourceKind::Dataset,
            SourceKind::Breakdown,
        ])
    }
}

/// A raw, not yet validated observation.
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Text(String),
    Json(Value),
    Count(u64),
}

impl Observed {
    fn describe(&self) -> String {
        match self {
            Observed::Text(s) => s.clone(),
            Observed::Json(v) => v.to_string(),
            Observed::Count(n) => n.to_string(),
        }
    }
}

/// Parse an observation as a non-negative integer count.
///
/// `None` means the value is not a valid count.
pub fn parse_count(observed: &Observed) -> Option<u64> {
    match observed {
        Observed::Count(n) => Some(*n),
        Observed::Text(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<u64>() {
                return Some(n);
            }
            s.parse::<f64>().ok().and_then(whole)
        }
        Observed::Json(Value::Number(n)) => n.as_u64().or_else(|| n.as_f64().and_then(whole)),
        Observed::Json(_) => None,
    }
}

fn whole(f: f64) -> Option<u64> {
    (f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64).then_some(f as u64)
}

/// Accumulated observations for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observations {
    values: BTreeMap<(String, String), BTreeMap<SourceKind, Observed>>,
}

impl Observations {
    /// Record what `kind` reported for `program.facet`.
    ///
    /// A later report replaces an earlier valid one, so folding the same
    /// snapshot twice is a no-op. A report that already failed validation
    /// is kept, so a later page cannot mask it.
    pub fn record(&mut self, program: &str, facet: &str, kind: SourceKind, observed: Observed) {
        let sources = self
            .values
            .entry((program.to_string(), facet.to_string()))
            .or_default();
        if let Some(existing) = sources.get(&kind) {
            if parse_count(existing).is_none() {
                return;
            }
        }
        sources.insert(kind, observed);
    }

    pub fn sources(&self, program: &str, facet: &str) -> Option<&BTreeMap<SourceKind, Observed>> {
        self.values.get(&(program.to_string(), facet.to_string()))
    }

    /// Fold one page snapshot.
    ///
    /// The breakdown fragment is site-wide, so it is read for every program;
    /// DOM probes and datasets belong to the page's own program only.
    pub fn fold_snapshot(&mut self, programs: &[ProgramConfig], owner: &ProgramConfig, snapshot: &Snapshot) {
        for program in programs {
            for facet in &program.facets {
                if let Some(v) = snapshot.breakdown_value(program.breakdown_key(), &facet.name) {
                    self.record(&program.key, &facet.name, SourceKind::Breakdown, Observed::Json(v.clone()));
                }
            }
        }

        for facet in &owner.facets {
            if let Some(probe) = &facet.dom {
                if let Some(text) = snapshot.attribute(probe).filter(|t| !t.trim().is_empty()) {
                    self.record(&owner.key, &facet.name, SourceKind::Dom, Observed::Text(text.to_string()));
                }
            }
            if let Some(name) = &facet.dataset {
                if let Some(v) = snapshot.dataset(name) {
                    self.record(&owner.key, &facet.name, SourceKind::Dataset, Observed::Json(v.clone()));
                }
            }
        }
    }
}

/// Reconciled value of one facet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacetValue {
    Resolved { count: u64, origin: SourceKind },
    /// No source produced a usable value. Distinct from a count of zero.
    Unresolved,
}

impl FacetValue {
    pub fn count(&self) -> Option<u64> {
        match self {
            FacetValue::Resolved { count, .. } => Some(*count),
            FacetValue::Unresolved => None,
        }
    }
}

impl Serialize for FacetValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.count() {
            Some(n) => serializer.serialize_u64(n),
            None => serializer.serialize_none(),
        }
    }
}

/// Program → facet → value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Breakdown {
    programs: BTreeMap<String, BTreeMap<String, FacetValue>>,
}

impl Breakdown {
    pub fn get(&self, program: &str, facet: &str) -> Option<FacetValue> {
        self.programs.get(program)?.get(facet).copied()
    }

    pub fn set(&mut self, program: &str, facet: &str, value: FacetValue) {
        self.programs
            .entry(program.to_string())
            .or_default()
            .insert(facet.to_string(), value);
    }

    /// Sum of every resolved facet; unresolved facets contribute zero.
    pub fn total(&self) -> u64 {
        self.programs
            .values()
            .flat_map(|facets| facets.values())
            .filter_map(FacetValue::count)
            .sum()
    }

    pub fn unresolved(&self) -> Vec<(String, String)> {
        self.programs
            .iter()
            .flat_map(|(p, facets)| {
                facets
                    .iter()
                    .filter(|(_, v)| v.count().is_none())
                    .map(move |(f, _)| (p.clone(), f.clone()))
            })
            .collect()
    }
}

/// Merge all observations into one authoritative breakdown.
///
/// # Errors
///
/// - [`PipelineError::DataIntegrity`] when a strict source holds an invalid
///   value, even if a higher-ranked source would have won.
/// - [`PipelineError::UnresolvedRequired`] when a `required` facet has no
///   valid value.
pub fn reconcile(programs: &[ProgramConfig], observations: &Observations) -> Result<Breakdown> {
    let mut breakdown = Breakdown::default();

    for program in programs {
        for facet in &program.facets {
            let mut candidates = BTreeMap::new();

            if let Some(sources) = observations.sources(&program.key, &facet.name) {
                for (kind, observed) in sources {
                    match parse_count(observed) {
                        Some(n) => {
                            candidates.insert(*kind, n);
                        }
                        None => {
                            return Err(PipelineError::DataIntegrity {
                                program: program.key.clone(),
                                facet: facet.name.clone(),
                                origin: *kind,
                                raw: observed.describe(),
                            }
                            .into());
                        }
                    }
                }
            }

            let value = match facet.policy().select(&candidates) {
                Some((origin, count)) => {
                    for (kind, other) in &candidates {
                        if *kind != origin && *other != count {
                            debug!(
                                program = %program.key,
                                facet = %facet.name,
                                winner = %origin,
                                count,
                                overridden = %kind,
                                other,
                                "precedence override"
                            );
                        }
                    }
                    FacetValue::Resolved { count, origin }
                }
                None if facet.required => {
                    return Err(PipelineError::UnresolvedRequired {
                        program: program.key.clone(),
                        facet: facet.name.clone(),
                    }
                    .into());
                }
                None => {
                    warn!(program = %program.key, facet = %facet.name, "count unresolved");
                    FacetValue::Unresolved
                }
            };

            breakdown.set(&program.key, &facet.name, value);
        }
    }

    Ok(breakdown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::render::{Readiness, Snapshot};
    use serde_json::json;

    fn programs() -> Vec<ProgramConfig> {
        parse_config(
            r##"
[site]
root = "."

[[programs]]
key = "parsha"
kind = "video"
page = "/parsha.html"
[[programs.facets]]
name = "audio"
[[programs.facets]]
name = "video"
[programs.catalog]
collection_id = "UU1"
facet = "video"

[[programs]]
key = "halacha"
kind = "audio"
page = "/halacha.html"
[[programs.facets]]
name = "totalAll"
dom = { selector = "#halachaTotalAll", attribute = "data-total" }

[[programs]]
key = "mishna"
kind = "audio"
page = "/mishna.html"
[[programs.facets]]
name = "audio"
dataset = "TM_COUNTS.total_items"
"##,
        )
        .unwrap()
        .programs
    }

    fn halacha_snapshot(total: &str) -> Snapshot {
        let mut snap = Snapshot::empty("/halacha.html", Readiness::Ready);
        snap.attributes
            .insert("#halachaTotalAll@data-total".to_string(), total.to_string());
        snap.breakdown = Some(json!({ "parsha": { "audio": 40, "video": 5 }, "halacha": { "totalAll": 1 } }));
        snap
    }

    #[test]
    fn test_catalog_overrides_page_value() {
        let programs = programs();
        let mut obs = Observations::default();
        obs.fold_snapshot(&programs, &programs[1], &halacha_snapshot("310"));
        obs.record("parsha", "video", SourceKind::Catalog, Observed::Count(103));

        let breakdown = reconcile(&programs, &obs).unwrap();
        assert_eq!(
            breakdown.get("parsha", "video"),
            Some(FacetValue::Resolved { count: 103, origin: SourceKind::Catalog })
        );
        assert_eq!(breakdown.get("parsha", "audio").unwrap().count(), Some(40));
    }

    #[test]
    fn test_dom_beats_breakdown() {
        let programs = programs();
        let mut obs = Observations::default();
        obs.fold_snapshot(&programs, &programs[1], &halacha_snapshot("310"));
        let breakdown = reconcile(&programs, &obs).unwrap();
        assert_eq!(
            breakdown.get("halacha", "totalAll"),
            Some(FacetValue::Resolved { count: 310, origin: SourceKind::Dom })
        );
    }

    #[test]
    fn test_invalid_dom_value_is_fatal() {
        let programs = programs();
        for bad in ["-3", "abc", "Infinity", "7.5"] {
            let mut obs = Observations::default();
            obs.fold_snapshot(&programs, &programs[1], &halacha_snapshot(bad));
            let err = reconcile(&programs, &obs).unwrap_err();
            assert!(
                matches!(
                    err.downcast_ref::<PipelineError>(),
                    Some(PipelineError::DataIntegrity { origin: SourceKind::Dom, .. })
                ),
                "{:?} was not rejected",
                bad
            );
        }
    }

    #[test]
    fn test_invalid_breakdown_value_is_fatal() {
        let programs = programs();
        for bad in [json!(-5), json!("lots"), json!(7.5)] {
            let mut obs = Observations::default();
            obs.record("parsha", "audio", SourceKind::Breakdown, Observed::Json(bad.clone()));
            let err = reconcile(&programs, &obs).unwrap_err();
            assert!(
                matches!(
                    err.downcast_ref::<PipelineError>(),
                    Some(PipelineError::DataIntegrity { origin: SourceKind::Breakdown, .. })
                ),
                "{} was not rejected",
                bad
            );
        }
    }

    #[test]
    fn test_invalid_dataset_value_is_fatal_even_when_catalog_wins() {
        let mut programs = programs();
        programs[0].facets[1].dataset = Some("VIDEO_TOTAL".to_string());
        let mut obs = Observations::default();
        obs.record("parsha", "video", SourceKind::Catalog, Observed::Count(103));
        obs.record("parsha", "video", SourceKind::Dataset, Observed::Json(json!(-1)));
        let err = reconcile(&programs, &obs).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::DataIntegrity { origin: SourceKind::Dataset, .. })
        ));
    }

    #[test]
    fn test_rejected_value_is_not_masked_by_later_page() {
        let programs = programs();
        let mut obs = Observations::default();
        obs.record("parsha", "audio", SourceKind::Breakdown, Observed::Json(json!("lots")));
        obs.record("parsha", "audio", SourceKind::Breakdown, Observed::Json(json!(40)));
        assert!(reconcile(&programs, &obs).is_err());

        // Valid values are still replaced by later ones
        let mut obs = Observations::default();
        obs.record("parsha", "audio", SourceKind::Breakdown, Observed::Json(json!(30)));
        obs.record("parsha", "audio", SourceKind::Breakdown, Observed::Json(json!(40)));
        let breakdown = reconcile(&programs, &obs).unwrap();
        assert_eq!(breakdown.get("parsha", "audio").unwrap().count(), Some(40));
    }

    #[test]
    fn test_total_skips_unresolved_and_grows_when_resolved() {
        let programs = programs();
        let mut obs = Observations::default();
        obs.record("parsha", "audio", SourceKind::Breakdown, Observed::Json(json!(40)));
        obs.record("halacha", "totalAll", SourceKind::Dom, Observed::Text("10".into()));
        let before = reconcile(&programs, &obs).unwrap();
        assert_eq!(before.total(), 50);
        assert_eq!(before.unresolved().len(), 2);

        obs.record("mishna", "audio", SourceKind::Dataset, Observed::Json(json!(12)));
        let after = reconcile(&programs, &obs).unwrap();
        assert_eq!(after.total(), before.total() + 12);
    }

    #[test]
    fn test_fold_is_idempotent() {
        let programs = programs();
        let snap = halacha_snapshot("310");
        let mut once = Observations::default();
        once.fold_snapshot(&programs, &programs[1], &snap);
        let mut twice = once.clone();
        twice.fold_snapshot(&programs, &programs[1], &snap);
        assert_eq!(once, twice);
        assert_eq!(
            reconcile(&programs, &once).unwrap().total(),
            reconcile(&programs, &twice).unwrap().total()
        );
    }

    #[test]
    fn test_required_facet_unresolved_is_fatal() {
        let mut programs = programs();
        programs[2].facets[0].required = true;
        let err = reconcile(&programs, &Observations::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::UnresolvedRequired { .. })
        ));
    }

    #[test]
    fn test_custom_policy_order() {
        let policy = PrecedencePolicy::new(vec![
            SourceKind::Breakdown,
            SourceKind::Dom,
            SourceKind::Breakdown,
        ]);
        assert_eq!(policy.order(), &[SourceKind::Breakdown, SourceKind::Dom]);

        let mut candidates = BTreeMap::new();
        candidates.insert(SourceKind::Dom, 3);
        candidates.insert(SourceKind::Catalog, 9);
        assert_eq!(policy.select(&candidates), Some((SourceKind::Dom, 3)));
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count(&Observed::Text(" 7 ".into())), Some(7));
        assert_eq!(parse_count(&Observed::Text("7.0".into())), Some(7));
        assert_eq!(parse_count(&Observed::Json(json!(12.0))), Some(12));
        assert_eq!(parse_count(&Observed::Json(json!(-1))), None);
        assert_eq!(parse_count(&Observed::Json(json!("12"))), None);
        assert_eq!(parse_count(&Observed::Text("NaN".into())), None);
    }

    #[test]
    fn test_breakdown_serializes_unresolved_as_null() {
        let mut breakdown = Breakdown::default();
        breakdown.set("tefila", "video", FacetValue::Unresolved);
        breakdown.set(
            "parsha",
            "audio",
            FacetValue::Resolved { count: 4, origin: SourceKind::Breakdown },
        );
        assert_eq!(
            serde_json::to_value(&breakdown).unwrap(),
            json!({ "parsha": { "audio": 4 }, "tefila": { "video": null } })
        );
    }
}
