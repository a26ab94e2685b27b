// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! Error kinds of the sync core and consistent CLI error formatting.
//!
//! [`SyncError`] is what the queue manager and scan orchestrator hand back
//! to callers. [`format_error`] / [`ErrorBuilder`] render actionable
//! terminal messages for the CLI.

use std::fmt;

/// Project issues URL for support.
pub const ISSUES_URL: &str = "https://github.com/jeranaias/romsync/issues";

/// Errors surfaced by the sync core.
///
/// Configuration and admission errors are raised before any state is
/// touched. Transfer errors only ever end up on a queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A platform has no destination folder, or a request is missing one.
    Configuration(String),
    /// Network or storage failure while transferring a file.
    Transfer(String),
    /// A scan was requested while another one is running.
    AdmissionConflict(String),
    /// The remote catalog could not be reached; safe to retry.
    TransientFetch(String),
    /// The remote item does not exist or has no files.
    NotFound(String),
}

impl SyncError {
    /// Short machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Transfer(_) => "transfer",
            Self::AdmissionConflict(_) => "admission_conflict",
            Self::TransientFetch(_) => "transient_fetch",
            Self::NotFound(_) => "not_found",
        }
    }

    /// The message without the kind prefix.
    pub fn detail(&self) -> &str {
        match self {
            Self::Configuration(msg)
            | Self::Transfer(msg)
            | Self::AdmissionConflict(msg)
            | Self::TransientFetch(msg)
            | Self::NotFound(msg) => msg,
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            Self::Transfer(msg) => write!(f, "Transfer failed: {}", msg),
            Self::AdmissionConflict(msg) => write!(f, "Request conflicts with running job: {}", msg),
            Self::TransientFetch(msg) => write!(f, "Remote catalog unavailable: {}", msg),
            Self::NotFound(msg) => write!(f, "Not found: {}", msg),
        }
    }
}

impl std::error::Error for SyncError {}

/// Formats an error message with title, causes, fixes, and help link.
///
/// # Example
///
/// ```
/// use romsync::error::format_error;
///
/// let error = format_error(
///     "Cannot reach the RomM server",
///     &["romm.url points to the wrong host", "RomM is not running"],
///     &["Check the URL: romsync config show"],
/// );
/// println!("{}", error);
/// ```
pub fn format_error(title: &str, causes: &[&str], fixes: &[&str]) -> String {
    let mut output = format!("[✗] {}\n\n", title);

    if !causes.is_empty() {
        output.push_str("Possible causes:\n");
        for cause in causes {
            output.push_str(&format!("  - {}\n", cause));
        }
        output.push('\n');
    }

    if !fixes.is_empty() {
        output.push_str("Try these fixes:\n");
        for (i, fix) in fixes.iter().enumerate() {
            output.push_str(&format!("  {}. {}\n", i + 1, fix));
        }
        output.push('\n');
    }

    output.push_str(&format!("Need help? {}", ISSUES_URL));
    output
}

/// Builder for constructing formatted error messages.
///
/// ```
/// use romsync::error::ErrorBuilder;
///
/// let error = ErrorBuilder::new("Invalid configuration")
///     .cause("romm.url is not set")
///     .fix("Edit ~/.romsync/config.json")
///     .build();
/// assert!(error.contains("romm.url is not set"));
/// ```
#[derive(Debug, Clone)]
pub struct ErrorBuilder {
    title: String,
    causes: Vec<String>,
    fixes: Vec<String>,
}

impl ErrorBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            causes: Vec::new(),
            fixes: Vec::new(),
        }
    }

    /// Add a possible cause.
    pub fn cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    /// Add a suggested fix.
    pub fn fix(mut self, fix: impl Into<String>) -> Self {
        self.fixes.push(fix.into());
        self
    }

    pub fn build(self) -> String {
        let causes: Vec<&str> = self.causes.iter().map(|s| s.as_str()).collect();
        let fixes: Vec<&str> = self.fixes.iter().map(|s| s.as_str()).collect();
        format_error(&self.title, &causes, &fixes)
    }
}

impl fmt::Display for ErrorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.clone().build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_error_display_and_kind() {
        let err = SyncError::Configuration("no folder mapped for 'SNES'".to_string());
        assert_eq!(err.kind(), "configuration");
        assert_eq!(err.detail(), "no folder mapped for 'SNES'");
        assert_eq!(err.to_string(), "Configuration error: no folder mapped for 'SNES'");

        let err = SyncError::AdmissionConflict("scan already in progress".to_string());
        assert_eq!(err.kind(), "admission_conflict");
    }

    #[test]
    fn test_format_error() {
        let error = format_error("Test Error", &["Cause 1"], &["Fix 1", "Fix 2"]);
        assert!(error.contains("[✗] Test Error"));
        assert!(error.contains("  - Cause 1"));
        assert!(error.contains("  2. Fix 2"));
        assert!(error.contains(ISSUES_URL));
    }

    #[test]
    fn test_empty_causes_and_fixes() {
        let error = format_error("Empty test", &[], &[]);
        assert!(!error.contains("Possible causes:"));
        assert!(!error.contains("Try these fixes:"));
    }

    #[test]
    fn test_error_builder_display() {
        let builder = ErrorBuilder::new("Display test").cause("Cause").fix("Fix");
        let error = format!("{}", builder);
        assert!(error.contains("[✗] Display test"));
        assert!(error.contains("  1. Fix"));
    }
}
