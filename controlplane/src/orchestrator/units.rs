//! CPU and memory quantities as printed by `docker stats` and `kubectl top`

use std::sync::LazyLock;

use regex::Regex;

use crate::models::application::format_number;

static MEMORY_USAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9.]+)([a-zA-Z]+)\s*/\s*([0-9.]+)([a-zA-Z]+)").expect("memory usage pattern is valid")
});

/// Kubernetes CPU quantity in millicores: `250m` -> 250, `2` -> 2000
pub fn parse_millicores(value: &str) -> u64 {
    let value = value.trim();
    match value.strip_suffix('m') {
        Some(millis) => millis.parse().unwrap_or(0),
        None => value
            .parse::<f64>()
            .map(|cores| (cores * 1000.0).round() as u64)
            .unwrap_or(0),
    }
}

/// Kubernetes memory quantity in Mi. Only `Mi` and `Gi` are understood.
pub fn parse_mebibytes(value: &str) -> u64 {
    let value = value.trim();
    if let Some(mi) = value.strip_suffix("Mi") {
        mi.parse().unwrap_or(0)
    } else if let Some(gi) = value.strip_suffix("Gi") {
        gi.parse::<u64>().map(|g| g * 1024).unwrap_or(0)
    } else {
        0
    }
}

/// `1.23%` -> 1.23
pub fn parse_percent(value: &str) -> f64 {
    value.trim().trim_end_matches('%').parse().unwrap_or(0.0)
}

/// Convert a Docker memory figure to MB. Decimal and binary units are
/// treated alike.
pub fn to_megabytes(value: f64, unit: &str) -> f64 {
    match unit.to_ascii_uppercase().as_str() {
        "B" => value / 1024.0 / 1024.0,
        "KB" | "KIB" => value / 1024.0,
        "MB" | "MIB" => value,
        "GB" | "GIB" => value * 1024.0,
        "TB" | "TIB" => value * 1024.0 * 1024.0,
        _ => value,
    }
}

/// Largest unit that keeps the number at or above one: MiB, GiB or TiB
pub fn format_megabytes(mb: f64) -> String {
    if mb < 1024.0 {
        format!("{}MiB", format_number(mb))
    } else if mb < 1024.0 * 1024.0 {
        format!("{}GiB", format_number(mb / 1024.0))
    } else {
        format!("{}TiB", format_number(mb / 1024.0 / 1024.0))
    }
}

/// Parse `docker stats` memory like `100MiB / 2GiB` into `(used, limit)` MB
pub fn parse_memory_usage(value: &str) -> Option<(f64, f64)> {
    let caps = MEMORY_USAGE.captures(value)?;
    let used: f64 = caps[1].parse().ok()?;
    let limit: f64 = caps[3].parse().ok()?;
    Some((to_megabytes(used, &caps[2]), to_megabytes(limit, &caps[4])))
}
