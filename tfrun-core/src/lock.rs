//! State lock information parsed from Terraform error output
//!
//! When another process holds the state lock, Terraform fails with a message
//! like:
//!
//! ```text
//! Error: Error acquiring the state lock
//!
//! Lock Info:
//!   ID:        7d3c0b2e-6a4f-4c1e-9d57-0c1f2b3a4d5e
//!   Path:      my-bucket/env/prod/terraform.tfstate
//!   Operation: OperationTypeApply
//!   Who:       runner@build-host
//!   Version:   1.5.7
//!   Created:   2024-01-15 10:30:45.123456789 +0000 UTC
//!   Info:
//! ```
//!
//! This module is the only place that knows about that wording.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

static STATE_LOCK_ERR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Error acquiring the state lock").expect("state lock pattern is valid")
});

static STATE_LOCK_INFO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Lock Info:\n\s*ID:\s*([^\n]+)\n\s*Path:\s*([^\n]+)\n\s*Operation:\s*([^\n]+)\n\s*Who:\s*([^\n]+)\n\s*Version:\s*([^\n]+)\n\s*Created:\s*([^\n]+)\n",
    )
    .expect("lock info pattern is valid")
});

/// Layout of the `Created:` line, e.g. `2024-01-15 10:30:45.123456789 +0000 UTC`
const LOCK_CREATED_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f %z %Z";

/// Ownership metadata of a held state lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockErrInfo {
    /// Lock ID, passed to `terraform force-unlock`
    pub id: String,
    /// State path guarded by the lock
    pub path: String,
    /// Operation that took the lock (e.g., "OperationTypeApply")
    pub operation: String,
    /// Holder of the lock (user@host)
    pub who: String,
    /// Terraform version of the holder
    pub version: String,
    /// When the lock was taken
    pub created: DateTime<Utc>,
}

impl LockErrInfo {
    /// How long the lock has been held as of `now`
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created
    }

    /// Whether the lock is older than `expiration` as of `now`.
    ///
    /// A zero expiration disables expiry: no lock is ever considered stale.
    pub fn is_expired(&self, expiration: Duration, now: DateTime<Utc>) -> bool {
        if expiration.is_zero() {
            return false;
        }
        match chrono::Duration::from_std(expiration) {
            Ok(expiration) => self.age(now) > expiration,
            Err(_) => false,
        }
    }
}

/// Extract lock information from Terraform error text.
///
/// Returns `None` unless the text contains the lock-acquisition phrase, a
/// complete `Lock Info:` block, and a parseable creation time.
pub fn extract_lock_info(message: &str) -> Option<LockErrInfo> {
    if !STATE_LOCK_ERR.is_match(message) {
        return None;
    }

    let caps = STATE_LOCK_INFO.captures(message)?;
    let field = |i: usize| caps.get(i).map(|m| m.as_str().trim().to_string());

    let created = parse_created(&field(6)?)?;

    Some(LockErrInfo {
        id: field(1)?,
        path: field(2)?,
        operation: field(3)?,
        who: field(4)?,
        version: field(5)?,
        created,
    })
}

fn parse_created(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::<FixedOffset>::parse_from_str(raw, LOCK_CREATED_FORMAT)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// What to do about a failed action attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Ordinary failure; retry as-is
    Transient,
    /// The state lock is held but not stale yet; retry as-is
    LockHeld(LockErrInfo),
    /// The state lock is stale; force-unlock before the next attempt
    LockRecoverable(LockErrInfo),
    /// The attempt was interrupted and must not be recovered
    Terminal,
}

/// Decide how to treat a failed action attempt.
///
/// `interrupted` marks attempts cut short by cancellation; their output is
/// never inspected for locks.
pub fn classify(
    message: &str,
    interrupted: bool,
    expiration: Duration,
    now: DateTime<Utc>,
) -> Disposition {
    if interrupted {
        return Disposition::Terminal;
    }
    match extract_lock_info(message) {
        Some(info) if info.is_expired(expiration, now) => Disposition::LockRecoverable(info),
        Some(info) => Disposition::LockHeld(info),
        None => Disposition::Transient,
    }
}
