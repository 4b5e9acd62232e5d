//! Common utilities and helper functions
//!
//! Node naming rules and facts about the local host.

pub mod retry;

use regex::Regex;
use std::net::IpAddr;
use std::path::Path;
use std::sync::OnceLock;

/// Maximum length of a node name (one DNS label)
pub const MAX_NAME_LEN: usize = 63;

/// Render an address for use inside a name: `192.168.1.50` -> `192-168-1-50`
pub fn dashed_ip(ip: IpAddr) -> String {
    ip.to_string().replace(['.', ':'], "-")
}

/// Normalize a display name into a DNS-label-safe node name
///
/// Lowercases, turns runs of invalid characters into a single `-`, trims
/// dashes at both ends and truncates. Returns `None` when nothing usable
/// remains.
pub fn sanitize_node_name(raw: &str) -> Option<String> {
    static INVALID_CHARS: OnceLock<Regex> = OnceLock::new();

    let re = INVALID_CHARS.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("Invalid regex pattern"));

    let lowered = raw.trim().to_lowercase();
    let replaced = re.replace_all(&lowered, "-");
    let mut name: String = replaced.trim_matches('-').chars().take(MAX_NAME_LEN).collect();
    while name.ends_with('-') {
        name.pop();
    }

    (!name.is_empty()).then_some(name)
}

/// Append `-suffix`, truncating the base so the result stays within
/// [`MAX_NAME_LEN`]
pub fn with_name_suffix(base: &str, suffix: &str) -> String {
    let room = MAX_NAME_LEN.saturating_sub(suffix.len() + 1);
    let base: String = base.chars().take(room).collect();
    format!("{}-{}", base.trim_end_matches('-'), suffix)
}

/// Architecture label of this build (`arm64`, `armv7`, `amd64`, ...)
pub fn local_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "aarch64" => "arm64",
        "arm" => "armv7",
        "x86_64" => "amd64",
        "x86" => "386",
        other => other,
    }
}

/// Board model from the device tree, when the kernel exposes one
pub fn local_model() -> Option<String> {
    read_trimmed(Path::new("/proc/device-tree/model"))
}

/// Host name of this machine
pub fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .or_else(|| read_trimmed(Path::new("/proc/sys/kernel/hostname")))
        .or_else(|| read_trimmed(Path::new("/etc/hostname")))
        .unwrap_or_else(|| String::from("pifleet-node"))
}

/// Read a small text file, dropping NUL terminators and surrounding
/// whitespace
fn read_trimmed(path: &Path) -> Option<String> {
    let raw = std::fs::read(path).ok()?;
    let text = String::from_utf8_lossy(&raw);
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    (!text.is_empty()).then(|| text.to_string())
}
