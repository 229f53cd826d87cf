//! Build provenance stamped into dead-letter records

/// VCS branch, injected at build time via `CCX_EXPORTER_BRANCH`.
pub const BRANCH: &str = match option_env!("CCX_EXPORTER_BRANCH") {
    Some(branch) => branch,
    None => "unknown",
};

/// VCS revision, injected at build time via `CCX_EXPORTER_REVISION`.
pub const REVISION: &str = match option_env!("CCX_EXPORTER_REVISION") {
    Some(revision) => revision,
    None => "unknown",
};
