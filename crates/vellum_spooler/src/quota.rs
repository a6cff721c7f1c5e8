//! Per-(destination, user) page and size quotas over a rolling window.

use crate::client::ClientContext;
use crate::registry::Destination;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaCheck {
    Allowed,
    /// The destination's users list excludes this user.
    DeniedByUsers,
    OverPageLimit,
    OverKLimit,
}

#[derive(Debug, Default, Clone)]
pub struct QuotaRecord {
    pub page_count: u64,
    pub k_count: u64,
    entries: VecDeque<(DateTime<Utc>, u64, u64)>,
}

impl QuotaRecord {
    /// Drop entries older than the window and re-sum.
    fn age_out(&mut self, now: DateTime<Utc>, period_secs: u64) {
        while let Some((ts, pages, kbytes)) = self.entries.front().copied() {
            let age = now.signed_duration_since(ts).num_seconds();
            if age >= 0 && age as u64 >= period_secs {
                self.entries.pop_front();
                self.page_count = self.page_count.saturating_sub(pages);
                self.k_count = self.k_count.saturating_sub(kbytes);
            } else {
                break;
            }
        }
    }
}

/// Usage ledger. Entries age out lazily whenever a record is read.
#[derive(Debug, Default)]
pub struct QuotaLedger {
    records: HashMap<(String, String), QuotaRecord>,
}

fn ledger_key(dest: &str, user: &str) -> (String, String) {
    (dest.to_lowercase(), user.to_string())
}

impl QuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record pages and kilobytes consumed by one job.
    pub fn update(
        &mut self,
        dest: &Destination,
        user: &str,
        pages: u64,
        kbytes: u64,
    ) -> &QuotaRecord {
        let now = Utc::now();
        let record = self
            .records
            .entry(ledger_key(&dest.name, user))
            .or_default();
        if dest.quota_period_secs > 0 {
            record.age_out(now, dest.quota_period_secs);
        }
        record.entries.push_back((now, pages, kbytes));
        record.page_count += pages;
        record.k_count += kbytes;
        record
    }

    /// Current usage for (dest, user), aged to the destination's window.
    pub fn usage(&mut self, dest: &Destination, user: &str) -> (u64, u64) {
        let now = Utc::now();
        match self.records.get_mut(&ledger_key(&dest.name, user)) {
            Some(record) => {
                if dest.quota_period_secs > 0 {
                    record.age_out(now, dest.quota_period_secs);
                }
                (record.page_count, record.k_count)
            }
            None => (0, 0),
        }
    }

    /// Admission decision for a new job on this destination.
    pub fn check(&mut self, dest: &Destination, ctx: &ClientContext) -> QuotaCheck {
        if !dest.user_allowed(ctx) {
            return QuotaCheck::DeniedByUsers;
        }
        if dest.page_limit == 0 && dest.k_limit == 0 {
            return QuotaCheck::Allowed;
        }
        let (pages, kbytes) = self.usage(dest, &ctx.user);
        if dest.page_limit > 0 && pages >= dest.page_limit as u64 {
            return QuotaCheck::OverPageLimit;
        }
        if dest.k_limit > 0 && kbytes >= dest.k_limit as u64 {
            return QuotaCheck::OverKLimit;
        }
        QuotaCheck::Allowed
    }

    /// Forget everything recorded for a destination.
    pub fn forget_dest(&mut self, dest_name: &str) {
        let needle = dest_name.to_lowercase();
        self.records.retain(|(dest, _), _| *dest != needle);
    }
}
