pub mod envelope;
pub mod error;
pub mod metrics;

pub use envelope::{Envelope, ErrorDetail, FailureDetail, Metadata};
pub use error::{ApiError, ApiResult};
pub use metrics::http_error_metrics_layer;
