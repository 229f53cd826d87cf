//! Pipeline error value: category, retryability and captured inputs

use std::fmt;

/// Machine-readable error categories used for metrics and DLQ routing.
pub mod category {
    /// Error entered the pipeline without a category
    pub const UNKNOWN: &str = "unknown";
    /// Record value was not valid JSON for the expected payload type
    pub const UNMARSHAL: &str = "unmarshal";
    /// A panic was recovered by the outermost guard
    pub const PANIC: &str = "panic";
    /// Event `name` is not one of the recognized kinds
    pub const UNKNOWN_NAME: &str = "unknown_name";
    /// Event kind is recognized but its transform is not available
    pub const NOT_IMPLEMENTED: &str = "not_implemented";
    /// Cluster event failed validation
    pub const INVALID_CLUSTER_EVENT: &str = "invalid_cluster_event";
    /// Cluster state failed validation
    pub const INVALID_CLUSTER_STATE: &str = "invalid_cluster_state";
    /// Host state failed validation
    pub const INVALID_HOST_EVENT: &str = "invalid_host_event";
    /// Infra-env state failed validation
    pub const INVALID_INFRAENV_EVENT: &str = "invalid_infraenv_event";
    /// Cache payload could not be (de)serialized
    pub const VALKEY_INTERNAL_ERROR: &str = "valkey_internal_error";
    /// Cache command failed
    pub const VALKEY_CLIENT: &str = "valkey_client";
    /// Projection id would produce an invalid object key
    pub const S3_INVALID_KEY: &str = "s3_invalid_key";
    /// Projection body could not be serialized
    pub const S3_INTERNAL_ERROR: &str = "s3_internal_error";
    /// Object store call failed
    pub const S3_CLIENT: &str = "s3_client";
    /// Cluster-state write failed without a more specific category
    pub const HOST_WRITER_REPO: &str = "host_writer_repo";
    /// Dead-letter write failed
    pub const GENERIC: &str = "generic";
    /// Stable metrics label substituted for an absent category
    pub const EMPTY: &str = "empty_category";
}

/// Additional input captured alongside a failure, persisted in the DLQ
/// record so the full processing context can be replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    /// Identifies the input (e.g. `<cluster_id>-<host_id>`)
    pub key: String,
    /// Serialized input value
    pub value: String,
}

/// Error produced by a [`Processing`](super::Processing) step.
///
/// The category classifies the failure for metrics and dead-letter routing;
/// retryability is an orthogonal marker that survives wrapping, so the retry
/// decorator sees it no matter how many layers added context on the way up.
#[derive(Debug)]
pub struct PipelineError {
    category: Option<&'static str>,
    retryable: bool,
    inputs: Vec<Input>,
    source: anyhow::Error,
}

impl PipelineError {
    /// Create a categorized, non-retryable error.
    pub fn new(category: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self {
            category: Some(category),
            retryable: false,
            inputs: Vec::new(),
            source: source.into(),
        }
    }

    /// Create an error carrying no category yet; a wrap site or the driver
    /// assigns one before the error reaches metrics or the DLQ.
    pub fn uncategorized(source: impl Into<anyhow::Error>) -> Self {
        Self {
            category: None,
            retryable: false,
            inputs: Vec::new(),
            source: source.into(),
        }
    }

    /// Mark the error as transient and eligible for bounded retry.
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    /// Attach additional inputs, replacing any previously attached set.
    pub fn with_inputs(mut self, inputs: Vec<Input>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Force the category, discarding a previously assigned one.
    pub fn with_category(mut self, category: &'static str) -> Self {
        self.category = Some(category);
        self
    }

    /// Assign a category only when none is present. Wrap sites use this to
    /// preserve the innermost category.
    pub fn or_category(mut self, category: &'static str) -> Self {
        self.category.get_or_insert(category);
        self
    }

    /// Prefix the underlying cause with context, keeping category,
    /// retryability and inputs intact.
    pub fn context(mut self, msg: impl fmt::Display + Send + Sync + 'static) -> Self {
        self.source = self.source.context(msg);
        self
    }

    /// Category assigned to this error, if any.
    pub fn category(&self) -> Option<&'static str> {
        self.category
    }

    /// Category label for metrics; absent or empty categories map to the
    /// stable [`category::EMPTY`] constant.
    pub fn metric_category(&self) -> &'static str {
        self.category.filter(|c| !c.is_empty()).unwrap_or(category::EMPTY)
    }

    /// Whether the retryable marker is present anywhere in the chain.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Additional inputs captured with the failure.
    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // {:#} renders the whole anyhow context chain
        write!(f, "{:#}", self.source)
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.source()
    }
}
