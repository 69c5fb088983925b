//! Extension seams for the two external collaborators.
//!
//! The pipeline only ever talks to pages and to the catalog API through
//! these traits, so tests (and alternative engines) can stand in for the
//! real browser and the real HTTP API.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐
//! │ PageRenderer │     │   Catalog    │
//! │ chromium /   │     │ playlist API │
//! │ static       │     │              │
//! └──────┬───────┘     └──────┬───────┘
//!        ▼                    ▼
//!     Snapshot           CatalogPage
//!        └───────┬────────────┘
//!                ▼
//!        run_pipeline() → artifacts
//! ```

use anyhow::Result;
use async_trait::async_trait;

use crate::catalog::CatalogPage;
use crate::render::{Snapshot, SnapshotRequest};

/// Loads pages from the content server and copies out their exposed state.
///
/// An implementation owns exactly one browsing context; `render` takes
/// `&mut self` so two navigations can never race on it.
///
/// # Example
///
/// ```rust
/// use anyhow::Result;
/// use async_trait::async_trait;
/// use site_counts::render::{Readiness, Snapshot, SnapshotRequest};
/// use site_counts::traits::PageRenderer;
///
/// struct BlankRenderer;
///
/// #[async_trait]
/// impl PageRenderer for BlankRenderer {
///     fn name(&self) -> &str { "blank" }
///
///     async fn render(&mut self, path: &str, _request: &SnapshotRequest) -> Result<Snapshot> {
///         Ok(Snapshot::empty(path, Readiness::Ready))
///     }
/// }
/// ```
#[async_trait]
pub trait PageRenderer: Send {
    /// Engine name for log lines.
    fn name(&self) -> &str;

    /// Navigate to `path`, wait for load and (bounded) readiness, and read
    /// the requested values.
    ///
    /// An `Err` means the page could not be loaded at all (network error,
    /// renderer crash). A readiness timeout is not an error; it is reported
    /// in [`Snapshot::readiness`].
    async fn render(&mut self, path: &str, request: &SnapshotRequest) -> Result<Snapshot>;

    /// Release the browsing context. Called once, on every exit path.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One page of a paginated, cursor-driven listing API.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Fetch the page that starts at `cursor` (`None` for the first page).
    ///
    /// A non-success HTTP status must surface as
    /// [`PipelineError::CatalogStatus`](crate::error::PipelineError::CatalogStatus).
    async fn fetch_page(&self, collection_id: &str, cursor: Option<&str>) -> Result<CatalogPage>;
}
