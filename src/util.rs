use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::OnceLock;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

static LOCAL_OFFSET: OnceLock<UtcOffset> = OnceLock::new();

pub fn ensure_dir(p: &Path) -> Result<()> {
    std::fs::create_dir_all(p).with_context(|| format!("create_dir_all {}", p.display()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    format!("{:x}", h.finalize())
}

/// Reads the local UTC offset. Must run before any thread is spawned: the
/// `time` crate refuses to read it from a multi-threaded process.
pub fn capture_local_offset() {
    let _ = LOCAL_OFFSET.set(UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC));
}

/// Wall-clock time in the captured local offset, falling back to UTC.
pub fn now() -> OffsetDateTime {
    let utc = OffsetDateTime::now_utc();
    match LOCAL_OFFSET.get() {
        Some(offset) => utc.to_offset(*offset),
        None => OffsetDateTime::now_local().unwrap_or(utc),
    }
}

pub fn rfc3339(t: OffsetDateTime) -> String {
    t.format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

pub fn now_rfc3339() -> String {
    rfc3339(now())
}

/// `YYYYMMDDHHMMSS`, the digits-only stamp embedded in artifact names.
pub fn compact_stamp(t: OffsetDateTime) -> String {
    t.format(format_description!(
        "[year][month][day][hour][minute][second]"
    ))
    .unwrap_or_else(|_| "19700101000000".to_string())
}

/// `YYYY_MM_DD`, used to name the per-day run log.
pub fn day_stamp(t: OffsetDateTime) -> String {
    t.format(format_description!("[year]_[month]_[day]"))
        .unwrap_or_else(|_| "1970_01_01".to_string())
}
