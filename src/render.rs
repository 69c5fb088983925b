//! Page snapshots.
//!
//! A renderer loads one page, waits (bounded) for the page to report that it
//! is ready, then copies a fixed set of exposed values out of the page into
//! an owned [`Snapshot`]. Nothing keeps a reference into live page state.
//!
//! Three kinds of values can be read, all optional per page:
//!
//! | Value | Read from |
//! |-------|-----------|
//! | breakdown fragment | global object at `render.breakdown_global` |
//! | datasets | global values named by facets (`dataset`) and item sources |
//! | attributes | `element.getAttribute(attribute)` for each [`DomProbe`] |

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use crate::config::{ItemsConfig, ProgramConfig, RenderConfig};

/// A DOM element whose attribute holds a decimal count string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomProbe {
    pub selector: String,
    pub attribute: String,
}

impl DomProbe {
    /// Key under which the probe's value is stored in [`Snapshot::attributes`].
    pub fn key(&self) -> String {
        format!("{}@{}", self.selector, self.attribute)
    }
}

/// Outcome of the bounded readiness wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The predicate held (or the page declares none).
    Ready,
    /// The timeout elapsed first; values may be unresolved.
    TimedOut,
    /// The predicate could not be evaluated at all.
    Failed(String),
}

/// What to read from a page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotRequest {
    pub ready: Option<String>,
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
    pub breakdown_global: Option<String>,
    pub datasets: Vec<String>,
    pub probes: Vec<DomProbe>,
}

impl SnapshotRequest {
    pub fn for_program(program: &ProgramConfig, render: &RenderConfig) -> Self {
        let mut datasets: Vec<String> = program
            .facets
            .iter()
            .filter_map(|f| f.dataset.clone())
            .collect();
        if let Some(ItemsConfig::Dataset { names }) = &program.items {
            datasets.extend(names.iter().cloned());
        }
        datasets.sort();
        datasets.dedup();

        Self {
            ready: program.ready.clone(),
            ready_timeout: Duration::from_millis(render.ready_timeout_ms),
            poll_interval: Duration::from_millis(render.poll_interval_ms),
            breakdown_global: render.breakdown_global.clone(),
            datasets,
            probes: program.facets.iter().filter_map(|f| f.dom.clone()).collect(),
        }
    }
}

/// Values copied out of one page visit.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: String,
    pub readiness: Readiness,
    pub breakdown: Option<Value>,
    /// Present datasets only; globals that were undefined are absent.
    pub datasets: BTreeMap<String, Value>,
    /// Present attributes only, keyed by [`DomProbe::key`].
    pub attributes: BTreeMap<String, String>,
}

impl Snapshot {
    pub fn empty(path: &str, readiness: Readiness) -> Self {
        Self {
            path: path.to_string(),
            readiness,
            breakdown: None,
            datasets: BTreeMap::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Breakdown value for `program.facet`, if the page exposed a non-null one.
    pub fn breakdown_value(&self, program: &str, facet: &str) -> Option<&Value> {
        self.breakdown
            .as_ref()?
            .get(program)?
            .get(facet)
            .filter(|v| !v.is_null())
    }

    pub fn dataset(&self, name: &str) -> Option<&Value> {
        self.datasets.get(name).filter(|v| !v.is_null())
    }

    pub fn attribute(&self, probe: &DomProbe) -> Option<&str> {
        self.attributes.get(&probe.key()).map(String::as_str)
    }

    /// Build a snapshot from the object returned by [`snapshot_script`].
    pub fn from_script_value(path: &str, readiness: Readiness, value: Value) -> Self {
        let mut snapshot = Self::empty(path, readiness);
        snapshot.breakdown = value.get("breakdown").filter(|v| !v.is_null()).cloned();
        if let Some(Value::Object(map)) = value.get("datasets") {
            snapshot.datasets = map
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
        }
        if let Some(Value::Object(map)) = value.get("attributes") {
            snapshot.attributes = map
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect();
        }
        snapshot
    }
}

/// JavaScript expression that copies the requested values out of the page
/// as a plain JSON object `{breakdown, datasets, attributes}`.
pub fn snapshot_script(request: &SnapshotRequest) -> String {
    let breakdown = serde_json::to_string(&request.breakdown_global).unwrap_or_default();
    let datasets = serde_json::to_string(&request.datasets).unwrap_or_default();
    let probes = serde_json::to_string(&request.probes).unwrap_or_default();

    format!(
        r#"(() => {{
  const lookup = (path) => path
    ? path.split('.').reduce((o, k) => (o == null ? undefined : o[k]), window)
    : undefined;
  const copy = (v) => {{
    if (v === undefined) return null;
    try {{ return JSON.parse(JSON.stringify(v)); }} catch (e) {{ return null; }}
  }};
  const out = {{ breakdown: copy(lookup({breakdown})), datasets: {{}}, attributes: {{}} }};
  for (const name of {datasets}) {{
    const v = lookup(name);
    if (v !== undefined && v !== null) out.datasets[name] = copy(v);
  }}
  for (const p of {probes}) {{
    const el = document.querySelector(p.selector);
    const v = el ? el.getAttribute(p.attribute) : null;
    if (v !== null) out.attributes[p.selector + '@' + p.attribute] = v;
  }}
  return out;
}})()"#
    )
}

/// Poll `probe` until it reports `true`, it fails, or `timeout` elapses.
///
/// A timeout is not an error: the caller proceeds with whatever the page
/// exposes and treats missing values as unresolved.
pub async fn wait_until_ready<F, Fut>(timeout: Duration, interval: Duration, mut probe: F) -> Readiness
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match probe().await {
            Ok(true) => return Readiness::Ready,
            Ok(false) => {}
            Err(e) => return Readiness::Failed(e.to_string()),
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Readiness::TimedOut;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_ready_after_a_few_polls() {
        let calls = AtomicUsize::new(0);
        let readiness = wait_until_ready(Duration::from_secs(2), Duration::from_millis(5), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n >= 2) }
        })
        .await;
        assert_eq!(readiness, Readiness::Ready);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_times_out_without_error() {
        let readiness = wait_until_ready(Duration::from_millis(30), Duration::from_millis(5), || async {
            Ok(false)
        })
        .await;
        assert_eq!(readiness, Readiness::TimedOut);
    }

    #[tokio::test]
    async fn test_probe_failure_is_reported() {
        let readiness = wait_until_ready(Duration::from_secs(1), Duration::from_millis(5), || async {
            Err(anyhow::anyhow!("ReferenceError: x is not defined"))
        })
        .await;
        assert!(matches!(readiness, Readiness::Failed(msg) if msg.contains("ReferenceError")));
    }

    #[test]
    fn test_from_script_value() {
        let value = json!({
            "breakdown": { "parsha": { "audio": 40, "video": null } },
            "datasets": { "TM_COUNTS.total_items": 12 },
            "attributes": { "#halachaTotalAll@data-total": "310", "bogus": 5 }
        });
        let snap = Snapshot::from_script_value("/parsha.html", Readiness::Ready, value);
        assert_eq!(snap.breakdown_value("parsha", "audio"), Some(&json!(40)));
        assert_eq!(snap.breakdown_value("parsha", "video"), None);
        assert_eq!(snap.dataset("TM_COUNTS.total_items"), Some(&json!(12)));

        let probe = DomProbe {
            selector: "#halachaTotalAll".to_string(),
            attribute: "data-total".to_string(),
        };
        assert_eq!(snap.attribute(&probe), Some("310"));
        assert_eq!(snap.attributes.len(), 1);
    }

    #[test]
    fn test_script_embeds_request_as_json() {
        let request = SnapshotRequest {
            breakdown_global: Some("SITE_COUNTS.allShiurim.breakdown".to_string()),
            datasets: vec!["HALACHA_DATA".to_string()],
            probes: vec![DomProbe {
                selector: "#halachaTotalAll".to_string(),
                attribute: "data-total".to_string(),
            }],
            ..SnapshotRequest::default()
        };
        let script = snapshot_script(&request);
        assert!(script.contains(r#"lookup("SITE_COUNTS.allShiurim.breakdown")"#));
        assert!(script.contains(r#"["HALACHA_DATA"]"#));
        assert!(script.contains(r##"{"selector":"#halachaTotalAll","attribute":"data-total"}"##));
    }
}
