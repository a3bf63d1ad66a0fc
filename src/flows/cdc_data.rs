//! # CDC snapshot strings and the cross-system comparison.
//!
//! Both sides describe their latest CDC creations as
//! `table=key:ts,table=key:ts` (epoch ms). The TOS reports its own; this
//! side resolves the same keys against its CDC buffers.
//!
//! ## Rules
//! - Entries whose timestamp is `null` (or not a number) are skipped.
//! - Entries older than 24h are dropped before comparison.
//! - CDC is OK iff every local entry was found and is fresh, and every TOS
//!   entry has a local match with `|tos - local + skew| <= threshold`.
//! - Both sides empty is OK; exactly one side empty is not.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::CdcConfig;

/// Maximum age of a CDC entry taking part in a comparison.
pub const MAX_CDC_AGE_MS: i64 = 24 * 60 * 60 * 1000;

/// One CDC observation. `timestamp_ms` is `None` when the key was not found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CdcEntry {
    pub table: String,
    pub key: String,
    pub timestamp_ms: Option<i64>,
}

impl CdcEntry {
    pub fn new(table: impl Into<String>, key: impl Into<String>, timestamp_ms: Option<i64>) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
            timestamp_ms,
        }
    }
}

/// Parses a snapshot string; malformed entries are ignored.
pub fn parse_cdc(raw: &str) -> Vec<CdcEntry> {
    raw.split(',')
        .filter_map(|entry| {
            let (table, rest) = entry.split_once('=')?;
            let (key, ts) = rest.split_once(':')?;
            let ts = ts.trim().parse::<i64>().ok()?;
            Some(CdcEntry::new(table.trim(), key.trim(), Some(ts)))
        })
        .collect()
}

/// Renders entries back to the snapshot format (missing stamps as `null`).
pub fn format_cdc(entries: &[CdcEntry]) -> String {
    entries
        .iter()
        .map(|e| match e.timestamp_ms {
            Some(ts) => format!("{}={}:{}", e.table, e.key, ts),
            None => format!("{}={}:null", e.table, e.key),
        })
        .collect::<Vec<_>>()
        .join(",")
}

pub fn is_fresh(timestamp_ms: i64, now_ms: i64) -> bool {
    timestamp_ms.saturating_add(MAX_CDC_AGE_MS) >= now_ms
}

/// Keeps entries with a timestamp no older than 24h.
pub fn remove_too_old(entries: Vec<CdcEntry>, now_ms: i64) -> Vec<CdcEntry> {
    entries
        .into_iter()
        .filter(|e| e.timestamp_ms.is_some_and(|ts| is_fresh(ts, now_ms)))
        .collect()
}

/// True if the TOS reported at least one entry for every configured table.
pub fn covers_tables(entries: &[CdcEntry], config: &CdcConfig) -> bool {
    let seen: HashSet<&str> = entries.iter().map(|e| e.table.as_str()).collect();
    config.tables.iter().all(|t| seen.contains(t.table.as_str()))
}

/// Compares the TOS snapshot with the locally resolved entries.
pub fn determine_cdc_status(
    tos: &[CdcEntry],
    local: &[CdcEntry],
    config: &CdcConfig,
    skew_ms: i64,
    now_ms: i64,
) -> bool {
    let missing: Vec<&str> = local
        .iter()
        .filter(|e| !e.timestamp_ms.is_some_and(|ts| is_fresh(ts, now_ms)))
        .map(|e| e.table.as_str())
        .collect();
    if !missing.is_empty() {
        info!(tables = %missing.join(", "), "missing local CDC data");
        return false;
    }

    match (tos.is_empty(), local.is_empty()) {
        (true, true) => true,
        (false, false) => compare(tos, local, config, skew_ms),
        _ => false,
    }
}

fn compare(tos: &[CdcEntry], local: &[CdcEntry], config: &CdcConfig, skew_ms: i64) -> bool {
    if config.tables.is_empty() {
        return false;
    }

    let mut ok = true;
    for far in tos {
        let Some(table) = config.table(&far.table) else {
            warn!(table = %far.table, "CDC table from TOS is not configured");
            return false;
        };
        let matched = local
            .iter()
            .find(|l| l.table == far.table && l.key == far.key)
            .and_then(|l| l.timestamp_ms);
        let (Some(far_ts), Some(local_ts)) = (far.timestamp_ms, matched) else {
            info!(table = %far.table, key = %far.key, "no local match for TOS CDC entry");
            ok = false;
            continue;
        };

        // TOS stamps are untrusted input; widen so extremes cannot overflow.
        let diff = (i128::from(far_ts) - i128::from(local_ts) + i128::from(skew_ms)).unsigned_abs();
        let diff = u64::try_from(diff).unwrap_or(u64::MAX);
        let threshold = threshold_ms(table.threshold);
        if diff <= threshold {
            info!(table = %far.table, key = %far.key, diff_ms = diff, "CDC match within threshold");
        } else {
            info!(table = %far.table, key = %far.key, diff_ms = diff, threshold_ms = threshold, "CDC mismatch");
            ok = false;
        }
    }
    ok
}

fn threshold_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CdcTableConfig;

    const NOW: i64 = 1_700_000_000_000;

    fn config() -> CdcConfig {
        CdcConfig {
            tables: vec![
                CdcTableConfig {
                    table: "inv_wi".into(),
                    channel: "cdc.inv_wi".into(),
                    threshold: Duration::from_secs(5),
                },
                CdcTableConfig {
                    table: "inv_unit".into(),
                    channel: "cdc.inv_unit".into(),
                    threshold: Duration::from_secs(2),
                },
            ],
        }
    }

    #[test]
    fn parse_skips_null_and_malformed_entries() {
        let entries = parse_cdc("inv_wi=42:1000, inv_unit=7:null,garbage,x=1:abc");
        assert_eq!(entries, vec![CdcEntry::new("inv_wi", "42", Some(1000))]);
        assert_eq!(format_cdc(&entries), "inv_wi=42:1000");
        assert!(parse_cdc("").is_empty());
    }

    #[test]
    fn stale_entries_are_dropped() {
        let entries = vec![
            CdcEntry::new("inv_wi", "1", Some(NOW - MAX_CDC_AGE_MS - 1)),
            CdcEntry::new("inv_wi", "2", Some(NOW - 1_000)),
            CdcEntry::new("inv_wi", "3", None),
        ];
        let kept = remove_too_old(entries, NOW);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].key, "2");
    }

    #[test]
    fn extreme_timestamps_do_not_overflow() {
        let far_future = remove_too_old(parse_cdc("inv_wi=42:9223372036854775807"), NOW);
        assert_eq!(far_future.len(), 1);
        assert!(remove_too_old(parse_cdc("inv_wi=42:-9223372036854775808"), NOW).is_empty());
        assert!(is_fresh(i64::MAX, i64::MAX));
        assert!(!is_fresh(i64::MIN, NOW));

        let cfg = config();
        let local = vec![CdcEntry::new("inv_wi", "42", Some(NOW))];
        assert!(!determine_cdc_status(&far_future, &local, &cfg, i64::MAX, NOW));
        let far_past = vec![CdcEntry::new("inv_wi", "42", Some(i64::MIN))];
        assert!(!determine_cdc_status(&far_past, &local, &cfg, i64::MIN, NOW));

        // Equal extremes still compare exactly.
        let local = vec![CdcEntry::new("inv_wi", "42", Some(i64::MAX))];
        assert!(determine_cdc_status(&far_future, &local, &cfg, 0, NOW));
        assert!(!determine_cdc_status(&far_future, &local, &cfg, i64::MIN, NOW));
    }

    #[test]
    fn coverage_requires_every_configured_table() {
        let cfg = config();
        assert!(!covers_tables(&parse_cdc("inv_wi=1:5"), &cfg));
        assert!(covers_tables(&parse_cdc("inv_wi=1:5,inv_unit=2:6"), &cfg));
    }

    #[test]
    fn lag_within_threshold_after_skew_is_ok() {
        let cfg = config();
        let tos = vec![
            CdcEntry::new("inv_wi", "1", Some(NOW)),
            CdcEntry::new("inv_unit", "2", Some(NOW)),
        ];
        // TOS clock 3s ahead of ours; local copies arrived 500ms after creation.
        let local = vec![
            CdcEntry::new("inv_wi", "1", Some(NOW - 3_000 + 500)),
            CdcEntry::new("inv_unit", "2", Some(NOW - 3_000 + 500)),
        ];
        assert!(determine_cdc_status(&tos, &local, &cfg, -3_000, NOW));
        assert!(!determine_cdc_status(&tos, &local, &cfg, 0, NOW));
    }

    #[test]
    fn missing_local_observation_is_not_ok() {
        let cfg = config();
        let tos = vec![CdcEntry::new("inv_wi", "1", Some(NOW))];
        let local = vec![CdcEntry::new("inv_wi", "1", None)];
        assert!(!determine_cdc_status(&tos, &local, &cfg, 0, NOW));
    }

    #[test]
    fn empty_sides() {
        let cfg = config();
        let one = vec![CdcEntry::new("inv_wi", "1", Some(NOW))];
        assert!(determine_cdc_status(&[], &[], &cfg, 0, NOW));
        assert!(!determine_cdc_status(&one, &[], &cfg, 0, NOW));
        assert!(!determine_cdc_status(&[], &one, &cfg, 0, NOW));
    }

    #[test]
    fn unknown_table_or_no_configuration_fails() {
        let tos = vec![CdcEntry::new("ref_bizunit", "1", Some(NOW))];
        let local = vec![CdcEntry::new("ref_bizunit", "1", Some(NOW))];
        assert!(!determine_cdc_status(&tos, &local, &config(), 0, NOW));
        assert!(!determine_cdc_status(&tos, &local, &CdcConfig::default(), 0, NOW));
    }
}
