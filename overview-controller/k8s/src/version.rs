//! Kubernetes server-version normalization.

use tracing::warn;

pub const VERSION_UNKNOWN: &str = "Unknown";

/// Normalizes `v?MAJOR.MINOR.PATCH[-suffix]` to `MAJOR.MINOR` via semver,
/// falling back to dotted-string splitting when semver cannot parse it
/// (`"v1.28.3"` -> `"1.28"`, `"1.29.0-gke.1234"` -> `"1.29"`,
/// `"v1.30"` -> `"1.30"`).
pub fn major_minor(version: &str) -> String {
    if version.is_empty() {
        return VERSION_UNKNOWN.to_string();
    }
    let clean = version.strip_prefix('v').unwrap_or(version);
    match semver::Version::parse(clean) {
        Ok(parsed) => format!("{}.{}", parsed.major, parsed.minor),
        Err(error) => {
            warn!(%version, %error, "semver parse failed, falling back to string split");
            let parts: Vec<&str> = clean.split('.').collect();
            if parts.len() >= 2 {
                format!("{}.{}", parts[0], parts[1])
            } else {
                VERSION_UNKNOWN.to_string()
            }
        }
    }
}
