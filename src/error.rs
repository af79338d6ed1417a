//! Custom error types for fleetscan.

use thiserror::Error;

/// Errors raised by the fleet pipeline and its capability clients.
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("[{0}] {1}")]
    AwsSdk(String, String),

    #[error("[{0}] AWS credentials error: {1}")]
    AwsCredentials(String, String),

    #[error("[{0}] AWS region not configured: {1}")]
    AwsRegion(String, String),

    #[error("[{0}] Resource not found: {1}")]
    AwsNotFound(String, String),

    #[error("No image found with id {0}")]
    ImageNotFound(String),

    #[error("Failed to parse creation date of image {image_id}: {reason}")]
    InvalidTimestamp { image_id: String, reason: String },

    #[error("SSH agent unavailable: {0}")]
    AgentUnavailable(String),

    #[error("Connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    #[error("Command `{command}` failed on {host}: {reason}")]
    CommandFailed {
        host: String,
        command: String,
        reason: String,
    },

    #[error("Cannot return latest snapshot for {0}: snapshots disabled")]
    SnapshotsDisabled(String),

    #[error("Cannot return latest snapshot for {0}: no snapshots registered")]
    NoSnapshots(String),

    #[error("Invalid environment: '{name}'. Environment can be one of: {valid}")]
    InvalidEnvironment { name: String, valid: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Release endpoint error ({environment}): {reason}")]
    Release { environment: String, reason: String },

    #[error("Session error: {0}")]
    Session(String),
}

impl FleetError {
    /// Create an AWS SDK error from any error type, classifying missing
    /// resources and credential and region problems from the error text.
    pub fn aws<E: std::fmt::Debug + std::fmt::Display>(component: &str, err: E) -> Self {
        let err_debug = format!("{err:?}");
        let err_display = err.to_string();
        let component = component.to_string();

        let combined_lower = format!("{err_display} {err_debug}").to_lowercase();

        // EC2 answers unknown or malformed ids with an error code rather
        // than an empty result.
        if NOT_FOUND_CODES.iter().any(|code| combined_lower.contains(code)) {
            return Self::AwsNotFound(
                component,
                Self::extract_error_details(&err_debug, &err_display),
            );
        }

        if combined_lower.contains("no credentials")
            || combined_lower.contains("credentials not found")
            || combined_lower.contains("invalid credentials")
            || combined_lower.contains("expired token")
            || combined_lower.contains("expiredtoken")
            || combined_lower.contains("the security token included in the request is expired")
            || combined_lower.contains("unrecognizedclient")
            || combined_lower.contains("authfailure")
            || combined_lower.contains("unauthorizedoperation")
            || combined_lower.contains("access denied")
            || combined_lower.contains("accessdenied")
        {
            return Self::AwsCredentials(
                component,
                Self::extract_error_details(&err_debug, &err_display),
            );
        }

        if combined_lower.contains("no region")
            || combined_lower.contains("region not found")
            || combined_lower.contains("missing region")
        {
            return Self::AwsRegion(
                component,
                Self::extract_error_details(&err_debug, &err_display),
            );
        }

        Self::AwsSdk(
            component,
            Self::extract_error_details(&err_debug, &err_display),
        )
    }

    /// Pull the service `message` out of an SDK error's debug output.
    /// Returns a single-line error message.
    fn extract_error_details(debug_str: &str, display_str: &str) -> String {
        // Pattern: message: Some("actual error message")
        if let Some(pos) = debug_str.find("message: Some(\"") {
            let start = pos + "message: Some(\"".len();
            let rest = &debug_str[start..];
            if let Some(end) = rest.find('"') {
                return rest[..end].to_string();
            }
        }

        if !display_str.to_lowercase().contains("service error") {
            return display_str.to_string();
        }

        "AWS API request failed".to_string()
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::AwsNotFound(..))
    }
}

/// Lower-cased error codes meaning the requested resource does not exist.
const NOT_FOUND_CODES: &[&str] = &[
    "invalidamiid.notfound",
    "invalidamiid.malformed",
    "invalidamiid.unavailable",
    "invalidinstanceid.notfound",
    "invalidinstanceid.malformed",
    "dbinstancenotfound",
    "dbsnapshotnotfound",
];

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, FleetError>;
