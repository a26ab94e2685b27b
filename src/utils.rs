// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Small helpers shared by the server and the CLI.

/// Mask a secret for display.
///
/// Shows only the first `visible_prefix` characters followed by "...".
/// Empty input stays empty so an unset password is visibly unset.
///
/// ```
/// use romsync::utils::mask_sensitive;
///
/// assert_eq!(mask_sensitive("hunter2-long-password", 2), "hu...");
/// assert_eq!(mask_sensitive("", 2), "");
/// ```
pub fn mask_sensitive(input: &str, visible_prefix: usize) -> String {
    if input.is_empty() {
        return String::new();
    }
    if input.chars().count() <= visible_prefix {
        // Don't leak short secrets in full.
        return "...".to_string();
    }

    let prefix: String = input.chars().take(visible_prefix).collect();
    format!("{}...", prefix)
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
