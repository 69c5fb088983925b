//! Fatal error taxonomy.
//!
//! Recoverable conditions (an unreachable page, an unparseable item date)
//! never become errors; they are logged at the component boundary and the
//! source is skipped. Everything here aborts the run before any artifact is
//! written, so the previously published documents stay in place.

use thiserror::Error;

use crate::reconcile::SourceKind;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The catalog API key is not available; raised before any catalog call.
    #[error("catalog credential missing: set the {var} environment variable")]
    MissingCredential { var: String },

    /// The catalog API answered with a non-success status. Usually a bad or
    /// revoked key, or a wrong collection id.
    #[error("catalog request for collection '{collection}' failed (HTTP {status}): {body}")]
    CatalogStatus {
        collection: String,
        status: u16,
        body: String,
    },

    #[error("catalog for collection '{collection}' repeated cursor '{cursor}'")]
    CatalogCursorLoop { collection: String, cursor: String },

    /// A page exposed a count that is not a non-negative integer.
    #[error("data integrity violation: {program}.{facet} from {origin} is {raw:?}, not a valid count")]
    DataIntegrity {
        program: String,
        facet: String,
        origin: SourceKind,
        raw: String,
    },

    /// A facet marked `required` was not resolved by any source.
    #[error("required count {program}.{facet} was not resolved by any source")]
    UnresolvedRequired { program: String, facet: String },
}
