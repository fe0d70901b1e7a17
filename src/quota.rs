// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Process-wide bundle storage quota (§5, §6).
//!
//! Every parser checks `storage_used + would_allocate <= BUNDLE_QUOTA`
//! before allocating a dictionary or block buffer. The counter lives behind
//! a single atomic; it is not tied to any one parser instance because
//! multiple links may be parsing bundles concurrently against the same
//! budget.

use std::sync::atomic::{AtomicU64, Ordering};

/// Default quota on a hosted platform (§6): 250 000 bytes.
pub const DEFAULT_BUNDLE_QUOTA: u64 = 250_000;

static BUNDLE_QUOTA: AtomicU64 = AtomicU64::new(DEFAULT_BUNDLE_QUOTA);
static STORAGE_USED: AtomicU64 = AtomicU64::new(0);

/// Override the process-wide quota (intended for test setup or node
/// configuration at start-up, not for runtime tuning).
pub fn set_quota(bytes: u64) {
    BUNDLE_QUOTA.store(bytes, Ordering::Relaxed);
}

/// Current quota.
#[must_use]
pub fn quota() -> u64 {
    BUNDLE_QUOTA.load(Ordering::Relaxed)
}

/// Bytes currently charged against the quota.
#[must_use]
pub fn used() -> u64 {
    STORAGE_USED.load(Ordering::Relaxed)
}

/// Attempt to reserve `additional` bytes. Returns `true` and charges the
/// quota on success; returns `false` and leaves the counter untouched if it
/// would be exceeded.
#[must_use]
pub fn try_reserve(additional: u64) -> bool {
    loop {
        let used = STORAGE_USED.load(Ordering::Relaxed);
        let Some(next) = used.checked_add(additional) else {
            return false;
        };
        if next > BUNDLE_QUOTA.load(Ordering::Relaxed) {
            return false;
        }
        if STORAGE_USED
            .compare_exchange_weak(used, next, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            return true;
        }
    }
}

/// Release previously reserved bytes (e.g. when a partial bundle is
/// dropped on parse error).
pub fn release(amount: u64) {
    STORAGE_USED.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
        Some(used.saturating_sub(amount))
    })
    .ok();
}
