//! TTL policy: what to serve from a cached entry, and for how long a
//! response may be stored.
//!
//! Both functions are pure; time is passed in so behavior is testable
//! without waiting on real TTLs.

use crate::msgutil;
use hickory_proto::op::{Message, ResponseCode};
use std::time::{Duration, SystemTime};

/// Store TTL for NXDOMAIN responses.
const NXDOMAIN_TTL: Duration = Duration::from_secs(30);

/// Store TTL for SERVFAIL responses.
const SERVFAIL_TTL: Duration = Duration::from_secs(5);

/// Cap on the store TTL of NOERROR responses with an empty answer section.
const EMPTY_ANSWER_TTL: u64 = 300;

/// Decides how a cached response may be served at `now`.
///
/// Returns a TTL-adjusted clone and whether this is a lazy (stale) serve:
///
/// - While the entry is younger than its minimal RR TTL, the clone's TTLs
///   are decremented by the entry's age.
/// - Past that, with lazy mode on, a NOERROR response that still has
///   answers is reused with every TTL forced to `lazy_reply_ttl`.
/// - Expired negative or empty responses are not reused.
///
/// The caller still owns transaction-id rewriting.
pub fn serve_adjust(
    cached: &Message,
    stored_at: SystemTime,
    now: SystemTime,
    lazy_cache_ttl: u64,
    lazy_reply_ttl: u32,
) -> Option<(Message, bool)> {
    let age = now.duration_since(stored_at).unwrap_or_default();
    let min_ttl = Duration::from_secs(u64::from(msgutil::minimal_ttl(cached)));

    if age < min_ttl {
        let mut response = cached.clone();
        msgutil::subtract_ttl(&mut response, age.as_secs() as u32);
        return Some((response, false));
    }

    if lazy_cache_ttl > 0
        && cached.response_code() == ResponseCode::NoError
        && !cached.answers().is_empty()
    {
        let mut response = cached.clone();
        msgutil::set_ttl(&mut response, lazy_reply_ttl);
        return Some((response, true));
    }

    None
}

/// Decides how long `response` may be stored, or `None` for "do not
/// cache".
///
/// Truncated responses and rcodes other than NOERROR/NXDOMAIN/SERVFAIL
/// are never cached. NOERROR responses keep their RR TTLs untouched; the
/// returned duration only bounds the entry's wall-clock validity.
pub fn store_ttl(response: &Message, lazy_cache_ttl: u64) -> Option<Duration> {
    if response.truncated() {
        return None;
    }

    match response.response_code() {
        ResponseCode::NXDomain => Some(NXDOMAIN_TTL),
        ResponseCode::ServFail => Some(SERVFAIL_TTL),
        ResponseCode::NoError => {
            let min_ttl = u64::from(msgutil::minimal_ttl(response));
            if response.answers().is_empty() {
                return Some(Duration::from_secs(min_ttl.min(EMPTY_ANSWER_TTL)));
            }
            if lazy_cache_ttl > 0 {
                Some(Duration::from_secs(lazy_cache_ttl))
            } else {
                Some(Duration::from_secs(min_ttl))
            }
        }
        _ => None,
    }
}
