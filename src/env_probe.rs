//! Environment Prober
//!
//! Maps the host distribution (from `os-release`) to the vendor's package
//! repository label. Never fails: anything unreadable or unknown yields the
//! default label.

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

/// (distribution id fragment, VERSION_ID prefix, repository label)
const REPOSITORY_TABLE: &[(&str, &str, &str)] = &[
    ("ubuntu", "22", "xUbuntu_22.04"),
    ("ubuntu", "20", "xUbuntu_20.04"),
    ("debian", "12", "Debian_12.0"),
    ("debian", "11", "Debian_11.0"),
];

/// Parse `KEY=value` lines of an os-release file, stripping quotes.
pub fn parse_os_release(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .filter_map(|line| {
            let (key, value) = line.trim().split_once('=')?;
            let value = value.trim().trim_matches('"').trim_matches('\'');
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

/// Repository label for the given os-release contents, if the distribution
/// and major version are known.
pub fn repository_label(os_release: &str) -> Option<&'static str> {
    let fields = parse_os_release(os_release);
    let distro = fields.get("ID").map(|s| s.to_lowercase()).unwrap_or_default();
    let version = fields.get("VERSION_ID").map(String::as_str).unwrap_or("");

    REPOSITORY_TABLE
        .iter()
        .find(|(id, prefix, _)| distro.contains(id) && version.starts_with(prefix))
        .map(|(_, _, label)| *label)
}

/// Detect the repository label for this host.
pub fn detect_repository_id(os_release_path: &Path, default_label: &str) -> String {
    let label = std::fs::read_to_string(os_release_path)
        .ok()
        .and_then(|contents| repository_label(&contents));

    match label {
        Some(label) => {
            debug!("[probe] Repository label: {}", label);
            label.to_string()
        }
        None => {
            debug!(
                "[probe] Host not identified from {}, using {}",
                os_release_path.display(),
                default_label
            );
            default_label.to_string()
        }
    }
}
