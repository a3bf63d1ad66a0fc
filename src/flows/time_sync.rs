//! Clock-skew estimate from the four timestamps of one probe round trip.

use thiserror::Error;
use tracing::debug;

/// Epoch-ms stamps of one round trip; any of them may be missing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoundTrip {
    /// Request left this side.
    pub request_sent: Option<i64>,
    /// Request reached the TOS.
    pub request_received: Option<i64>,
    /// Response left the TOS.
    pub response_sent: Option<i64>,
    /// Response reached this side.
    pub response_received: Option<i64>,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("round trip is missing timestamp(s)")]
pub struct MissingTimestamps;

/// Clock skew in ms; positive means this side is behind the TOS.
///
/// ```text
/// t1 = request_received  - request_sent   = transmission + skew
/// t2 = response_received - response_sent  = transmission - skew
/// transmission = (t1 + t2) / 2
/// skew         = t1 - transmission
/// ```
pub fn determine_sync_time(rt: &RoundTrip) -> Result<i64, MissingTimestamps> {
    let (Some(sent), Some(recv_far), Some(sent_far), Some(recv)) = (
        rt.request_sent,
        rt.request_received,
        rt.response_sent,
        rt.response_received,
    ) else {
        return Err(MissingTimestamps);
    };

    // Far-side stamps can be anything; compute wide and clamp back.
    let t1 = i128::from(recv_far) - i128::from(sent);
    let t2 = i128::from(recv) - i128::from(sent_far);
    let transmission = saturate((t1 + t2) / 2);
    let skew = saturate(t1 - (t1 + t2) / 2);
    debug!(transmission, skew, "time sync computed");
    Ok(skew)
}

fn saturate(v: i128) -> i64 {
    i64::try_from(v).unwrap_or(if v < 0 { i64::MIN } else { i64::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rt(a: i64, b: i64, c: i64, d: i64) -> RoundTrip {
        RoundTrip {
            request_sent: Some(a),
            request_received: Some(b),
            response_sent: Some(c),
            response_received: Some(d),
        }
    }

    #[test]
    fn symmetric_links_with_aligned_clocks_have_no_skew() {
        assert_eq!(determine_sync_time(&rt(1_000, 1_050, 1_060, 1_110)), Ok(0));
    }

    #[test]
    fn tos_clock_ahead_shows_positive_skew() {
        // 50ms each way, TOS clock 200ms ahead.
        assert_eq!(determine_sync_time(&rt(1_000, 1_250, 1_260, 1_110)), Ok(200));
    }

    #[test]
    fn tos_clock_behind_shows_negative_skew() {
        assert_eq!(determine_sync_time(&rt(1_000, 950, 960, 1_110)), Ok(-100));
    }

    #[test]
    fn extreme_stamps_saturate_instead_of_overflowing() {
        assert_eq!(determine_sync_time(&rt(i64::MIN, i64::MAX, 0, 0)), Ok(i64::MAX));
        assert_eq!(determine_sync_time(&rt(i64::MAX, i64::MIN, 0, 0)), Ok(i64::MIN));
        assert_eq!(determine_sync_time(&rt(i64::MIN, i64::MAX, i64::MIN, i64::MAX)), Ok(0));
    }

    #[test]
    fn any_missing_stamp_is_rejected() {
        let mut trip = rt(1, 2, 3, 4);
        trip.response_sent = None;
        assert_eq!(determine_sync_time(&trip), Err(MissingTimestamps));
    }
}
