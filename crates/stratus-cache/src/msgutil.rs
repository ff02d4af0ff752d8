//! DNS message helpers for the serve path.

use hickory_proto::op::Message;
use hickory_proto::rr::{Record, RecordType};
use rand::seq::SliceRandom;

/// Returns the minimal RR TTL across all sections of `message`, skipping
/// the OPT pseudo-record. Returns 0 when the message has no records.
pub fn minimal_ttl(message: &Message) -> u32 {
    message
        .answers()
        .iter()
        .chain(message.name_servers())
        .chain(message.additionals())
        .filter(|r| r.record_type() != RecordType::OPT)
        .map(Record::ttl)
        .min()
        .unwrap_or(0)
}

/// Subtracts `secs` from every RR TTL, saturating at zero.
pub fn subtract_ttl(message: &mut Message, secs: u32) {
    for_each_record(message, |r| {
        let ttl = r.ttl().saturating_sub(secs);
        r.set_ttl(ttl);
    });
}

/// Sets every RR TTL to `secs`.
pub fn set_ttl(message: &mut Message, secs: u32) {
    for_each_record(message, |r| {
        r.set_ttl(secs);
    });
}

fn for_each_record(message: &mut Message, mut f: impl FnMut(&mut Record)) {
    // One section at a time; the message cannot hand out all three
    // mutable section borrows at once.
    fn apply(records: &mut [Record], f: &mut impl FnMut(&mut Record)) {
        for record in records {
            if record.record_type() != RecordType::OPT {
                f(record);
            }
        }
    }

    apply(message.answers_mut(), &mut f);
    apply(message.name_servers_mut(), &mut f);
    apply(message.additionals_mut(), &mut f);
}

/// Removes the EDNS OPT record. RFC 6891 §6.2.1: the OPT record must not
/// be cached.
pub fn strip_edns(message: &mut Message) {
    message.extensions_mut().take();
    message
        .additionals_mut()
        .retain(|r| r.record_type() != RecordType::OPT);
}

/// Shuffles the trailing run of A/AAAA records in the answer section.
///
/// Scanning from the end, the run stops at the first record of another
/// type; records before the run (CNAMEs and the like) keep their order.
pub fn shuffle_addresses(message: &mut Message) {
    let answers = message.answers_mut();

    let mut run_start = answers.len();
    for (i, record) in answers.iter().enumerate().rev() {
        match record.record_type() {
            RecordType::A | RecordType::AAAA => run_start = i,
            _ => break,
        }
    }

    answers[run_start..].shuffle(&mut rand::thread_rng());
}
