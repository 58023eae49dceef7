use std::time::Duration;

use time::{format_description::well_known::Rfc3339, OffsetDateTime, PrimitiveDateTime};

pub(crate) fn primitive_now_utc() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

pub(crate) fn format_primitive(value: PrimitiveDateTime) -> String {
    value.assume_utc().format(&Rfc3339).unwrap_or_else(|_| value.assume_utc().to_string())
}

/// Leases stamped before the returned instant are expired.
pub(crate) fn lease_cutoff(now: PrimitiveDateTime, lease: Duration) -> PrimitiveDateTime {
    let lease = time::Duration::try_from(lease).unwrap_or(time::Duration::MAX);
    now.checked_sub(lease).unwrap_or(PrimitiveDateTime::MIN)
}

pub(crate) fn seconds_between(earlier: PrimitiveDateTime, later: PrimitiveDateTime) -> f64 {
    (later.assume_utc() - earlier.assume_utc()).as_seconds_f64().max(0.0)
}
