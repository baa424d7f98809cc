//! GTID (Global Transaction ID) value objects.
//!
//! A GTID list is the textual form MariaDB reports for `@@gtid_current_pos`
//! and friends: `d-s-n[,d-s-n]*`, one triple per replication domain.

use std::cmp::Ordering;
use std::fmt;

use tracing::warn;

/// One `(domain_id, server_id, sequence)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gtid {
    pub domain_id: u32,
    pub server_id: u32,
    pub sequence: u64,
}

impl fmt::Display for Gtid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.domain_id, self.server_id, self.sequence)
    }
}

/// Policy for domains present in one list but absent from the other,
/// used by [`GtidList::events_ahead`]. Kept as an explicit, named option
/// rather than hard-coded, since a multi-master setup where one domain's
/// `current_pos` outruns its `io_pos` needs the caller to pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingDomainPolicy {
    /// Domains absent from the other list contribute 0 to the gap.
    #[default]
    Ignore,
    /// Domains absent from the other list contribute `self.seq` to the gap.
    Subtract,
}

/// An ordered list of GTIDs, at most one per domain.
#[derive(Debug, Clone, Default)]
pub struct GtidList {
    entries: Vec<Gtid>,
}

/// Element-wise equality after sorting by domain — two lists built in
/// different insertion orders still compare equal.
impl PartialEq for GtidList {
    fn eq(&self, other: &Self) -> bool {
        self.to_string_sorted() == other.to_string_sorted()
    }
}

impl Eq for GtidList {}

impl GtidList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Gtid] {
        &self.entries
    }

    fn find(&self, domain_id: u32) -> Option<&Gtid> {
        self.entries.iter().find(|g| g.domain_id == domain_id)
    }

    /// Parse `d-s-n[,d-s-n]*`. An empty string parses to an empty list.
    /// Malformed input is tolerated: it produces an empty list and a
    /// logged warning, never an error, so one bad row never aborts a tick.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return Self::default();
        }

        let mut entries = Vec::new();
        for part in text.split(',') {
            match parse_triple(part) {
                Some(gtid) => entries.push(gtid),
                None => {
                    warn!("malformed GTID component {:?}, ignoring whole list", part);
                    return Self::default();
                }
            }
        }

        // Invariant: at most one entry per domain. A duplicate domain is
        // also treated as malformed input (tolerated, not fatal).
        let mut domains: Vec<u32> = entries.iter().map(|g| g.domain_id).collect();
        domains.sort_unstable();
        if domains.windows(2).any(|w| w[0] == w[1]) {
            warn!("duplicate domain in GTID list {:?}, ignoring whole list", text);
            return Self::default();
        }

        Self { entries }
    }

    /// Inverse of [`GtidList::parse`]. Order is stable (domain-sorted) so
    /// `parse(list.to_string()) == list` holds regardless of the order the
    /// list was built in.
    pub fn to_string_sorted(&self) -> String {
        let mut sorted = self.entries.clone();
        sorted.sort_unstable_by_key(|g| g.domain_id);
        sorted
            .iter()
            .map(|g| g.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Number of transactions `self` is ahead of `other`, summed across
    /// every domain present in `self`.
    pub fn events_ahead(&self, other: &GtidList, policy: MissingDomainPolicy) -> u64 {
        let mut total: u64 = 0;
        for gtid in &self.entries {
            let ahead = match other.find(gtid.domain_id) {
                Some(other_gtid) => gtid.sequence.saturating_sub(other_gtid.sequence),
                None => match policy {
                    MissingDomainPolicy::Ignore => 0,
                    MissingDomainPolicy::Subtract => gtid.sequence,
                },
            };
            total = total.saturating_add(ahead);
        }
        total
    }

    /// True iff a replica holding `self` as its current position could
    /// replicate from a master at `master_pos` without a gap: every domain
    /// in `self` must be present in `master_pos` with an equal-or-greater
    /// sequence.
    pub fn can_replicate_from(&self, master_pos: &GtidList) -> bool {
        self.entries.iter().all(|gtid| {
            master_pos
                .find(gtid.domain_id)
                .is_some_and(|m| m.sequence >= gtid.sequence)
        })
    }
}

impl fmt::Display for GtidList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_sorted())
    }
}

fn parse_triple(s: &str) -> Option<Gtid> {
    let mut parts = s.trim().splitn(3, '-');
    let domain_id = parts.next()?.parse().ok()?;
    let server_id = parts.next()?.parse().ok()?;
    let sequence = parts.next()?.parse().ok()?;
    Some(Gtid {
        domain_id,
        server_id,
        sequence,
    })
}

/// Order two lists elementwise, domain-sorted. Used only for determinism in
/// tests and logging, not for replication decisions.
impl PartialOrd for Gtid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Gtid {
    fn cmp(&self, other: &Self) -> Ordering {
        self.domain_id
            .cmp(&other.domain_id)
            .then(self.server_id.cmp(&other.server_id))
            .then(self.sequence.cmp(&other.sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_two_domains() {
        let list = GtidList::parse("0-1-100,1-1-50");
        assert_eq!(list.entries().len(), 2);
    }

    #[test]
    fn events_ahead_ignore_policy() {
        let a = GtidList::parse("0-1-100");
        let b = GtidList::parse("0-1-90");
        assert_eq!(a.events_ahead(&b, MissingDomainPolicy::Ignore), 10);
    }

    #[test]
    fn empty_string_parses_empty_and_can_replicate_from_anything() {
        let empty = GtidList::parse("");
        assert!(empty.is_empty());
        let nonempty = GtidList::parse("0-1-5");
        assert!(empty.can_replicate_from(&nonempty));
    }

    #[test]
    fn malformed_input_yields_empty_list_not_an_error() {
        let list = GtidList::parse("not-a-gtid-,,,");
        assert!(list.is_empty());
    }

    #[test]
    fn duplicate_domain_is_tolerated_as_malformed() {
        let list = GtidList::parse("0-1-5,0-2-9");
        assert!(list.is_empty());
    }

    #[test]
    fn missing_domain_subtract_policy_counts_full_sequence() {
        let a = GtidList::parse("0-1-100,2-1-7");
        let b = GtidList::parse("0-1-90");
        assert_eq!(a.events_ahead(&b, MissingDomainPolicy::Subtract), 10 + 7);
        assert_eq!(a.events_ahead(&b, MissingDomainPolicy::Ignore), 10);
    }

    #[test]
    fn can_replicate_from_requires_every_domain_covered() {
        let slave = GtidList::parse("0-1-10,1-1-5");
        let master_ok = GtidList::parse("0-1-10,1-1-5");
        let master_behind = GtidList::parse("0-1-10,1-1-4");
        let master_missing_domain = GtidList::parse("0-1-10");

        assert!(slave.can_replicate_from(&master_ok));
        assert!(!slave.can_replicate_from(&master_behind));
        assert!(!slave.can_replicate_from(&master_missing_domain));
    }

    proptest::proptest! {
        #[test]
        fn roundtrip(domains in proptest::collection::vec((0u32..8, 0u32..8, 0u64..1_000_000), 0..8)) {
            // Build a list with unique domains (dedup, keep first).
            let mut seen = std::collections::HashSet::new();
            let mut text_parts = Vec::new();
            for (d, s, n) in domains {
                if seen.insert(d) {
                    text_parts.push(format!("{d}-{s}-{n}"));
                }
            }
            let text = text_parts.join(",");
            let parsed = GtidList::parse(&text);
            let roundtripped = GtidList::parse(&parsed.to_string_sorted());
            prop_assert_eq!(parsed, roundtripped);
        }

        #[test]
        fn events_ahead_zero_iff_every_domain_covered(
            a_seq in 0u64..1000, b_seq in 0u64..1000,
        ) {
            let a = GtidList::parse(&format!("0-1-{a_seq}"));
            let b = GtidList::parse(&format!("0-1-{b_seq}"));
            let ahead = a.events_ahead(&b, MissingDomainPolicy::Ignore);
            prop_assert_eq!(ahead == 0, a_seq <= b_seq);
        }
    }
}
