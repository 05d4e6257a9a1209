use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rand::Rng;

use parley_db::Database;
use parley_db::models::PendingRow;

/// How long a one-time code stays valid.
pub const OTP_TTL_MINUTES: i64 = 10;

/// A pending registration awaiting email verification. Exactly one live
/// record exists per email; re-issuing a code supersedes the old record.
#[derive(Debug, Clone)]
pub struct OtpRecord {
    pub full_name: String,
    pub email: String,
    pub password_hash: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

impl OtpRecord {
    /// Build a fresh record with a newly generated code expiring
    /// `OTP_TTL_MINUTES` after `now`.
    pub fn new(full_name: String, email: String, password_hash: String, now: DateTime<Utc>) -> Self {
        Self {
            full_name,
            email,
            password_hash,
            code: generate_code(),
            expires_at: now + Duration::minutes(OTP_TTL_MINUTES),
        }
    }

    /// A submission is accepted iff the code matches exactly AND `now` is
    /// still before the expiry.
    pub fn accepts(&self, code: &str, now: DateTime<Utc>) -> bool {
        self.code == code && now < self.expires_at
    }
}

/// Generate a 6-digit numeric code, uniform over 100000..=999999.
pub fn generate_code() -> String {
    rand::rng().random_range(100_000..=999_999).to_string()
}

/// Backing store for pending registrations. Two strategies implement this:
/// an ephemeral in-process map and a table in the main database. The
/// persisted strategy is the only correct choice when more than one server
/// instance runs.
pub trait OtpStore: Send + Sync {
    /// Insert the record for its email, superseding any prior one.
    fn upsert(&self, record: OtpRecord) -> Result<()>;

    fn get(&self, email: &str) -> Result<Option<OtpRecord>>;

    fn delete(&self, email: &str) -> Result<()>;

    /// Drop records whose expiry is at or before `now`. Returns the count.
    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Ephemeral strategy: pending registrations live in process memory and are
/// lost on restart. Fine for a single dev instance, nothing else.
pub struct MemoryOtpStore {
    entries: Mutex<HashMap<String, OtpRecord>>,
}

impl MemoryOtpStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn with_entries<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut HashMap<String, OtpRecord>) -> T,
    {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("OTP store lock poisoned: {}", e))?;
        Ok(f(&mut entries))
    }
}

impl Default for MemoryOtpStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OtpStore for MemoryOtpStore {
    fn upsert(&self, record: OtpRecord) -> Result<()> {
        self.with_entries(|entries| {
            entries.insert(record.email.clone(), record);
        })
    }

    fn get(&self, email: &str) -> Result<Option<OtpRecord>> {
        self.with_entries(|entries| entries.get(email).cloned())
    }

    fn delete(&self, email: &str) -> Result<()> {
        self.with_entries(|entries| {
            entries.remove(email);
        })
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_entries(|entries| {
            let before = entries.len();
            entries.retain(|_, record| now < record.expires_at);
            before - entries.len()
        })
    }
}

/// Persisted strategy: records live in the `pending_registrations` table
/// with UNIQUE(email), so uniqueness and supersede semantics hold across
/// server instances. Expiry is enforced on read plus a background sweep.
pub struct DbOtpStore {
    db: Arc<Database>,
}

impl DbOtpStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

/// Fixed-precision RFC 3339 so stored expiries compare chronologically as TEXT.
fn format_expiry(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl OtpStore for DbOtpStore {
    fn upsert(&self, record: OtpRecord) -> Result<()> {
        self.db.upsert_pending(&PendingRow {
            email: record.email,
            full_name: record.full_name,
            password: record.password_hash,
            otp: record.code,
            expires_at: format_expiry(record.expires_at),
        })
    }

    fn get(&self, email: &str) -> Result<Option<OtpRecord>> {
        let Some(row) = self.db.get_pending(email)? else {
            return Ok(None);
        };

        let expires_at = DateTime::parse_from_rfc3339(&row.expires_at)
            .map_err(|e| anyhow::anyhow!("Corrupt pending expiry '{}': {}", row.expires_at, e))?
            .with_timezone(&Utc);

        Ok(Some(OtpRecord {
            full_name: row.full_name,
            email: row.email,
            password_hash: row.password,
            code: row.otp,
            expires_at,
        }))
    }

    fn delete(&self, email: &str) -> Result<()> {
        self.db.delete_pending(email)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.db.purge_expired_pending(&format_expiry(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(email: &str, code: &str, expires_at: DateTime<Utc>) -> OtpRecord {
        OtpRecord {
            full_name: "Alice".into(),
            email: email.into(),
            password_hash: "hash".into(),
            code: code.into(),
            expires_at,
        }
    }

    #[test]
    fn generated_codes_are_six_digits() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            let value: u32 = code.parse().unwrap();
            assert!((100_000..=999_999).contains(&value));
        }
    }

    #[test]
    fn accepts_requires_match_and_freshness() {
        let now = Utc::now();
        let rec = record("a@x.com", "123456", now + Duration::minutes(OTP_TTL_MINUTES));

        assert!(rec.accepts("123456", now));
        assert!(!rec.accepts("654321", now));
        // At or past the expiry instant the code is dead
        assert!(!rec.accepts("123456", rec.expires_at));
        assert!(!rec.accepts("123456", rec.expires_at + Duration::seconds(1)));
        // Wrong code AND expired is the same failure class
        assert!(!rec.accepts("654321", rec.expires_at + Duration::seconds(1)));
    }

    #[test]
    fn memory_store_upsert_supersedes() {
        let store = MemoryOtpStore::new();
        let now = Utc::now();

        store.upsert(record("a@x.com", "111111", now + Duration::minutes(10))).unwrap();
        store.upsert(record("a@x.com", "222222", now + Duration::minutes(10))).unwrap();

        let live = store.get("a@x.com").unwrap().unwrap();
        assert_eq!(live.code, "222222");

        store.delete("a@x.com").unwrap();
        assert!(store.get("a@x.com").unwrap().is_none());
    }

    #[test]
    fn memory_store_purges_only_expired() {
        let store = MemoryOtpStore::new();
        let now = Utc::now();

        store.upsert(record("old@x.com", "111111", now - Duration::minutes(1))).unwrap();
        store.upsert(record("live@x.com", "222222", now + Duration::minutes(10))).unwrap();

        assert_eq!(store.purge_expired(now).unwrap(), 1);
        assert!(store.get("old@x.com").unwrap().is_none());
        assert!(store.get("live@x.com").unwrap().is_some());
    }

    #[test]
    fn db_store_roundtrips_and_purges() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = DbOtpStore::new(db);
        let now = Utc::now();

        store.upsert(record("a@x.com", "111111", now + Duration::minutes(10))).unwrap();
        store.upsert(record("a@x.com", "222222", now + Duration::minutes(10))).unwrap();

        let live = store.get("a@x.com").unwrap().unwrap();
        assert_eq!(live.code, "222222");
        assert!(live.accepts("222222", now));

        store.upsert(record("old@x.com", "333333", now - Duration::minutes(1))).unwrap();
        assert_eq!(store.purge_expired(now).unwrap(), 1);
        assert!(store.get("old@x.com").unwrap().is_none());
        assert!(store.get("a@x.com").unwrap().is_some());

        store.delete("a@x.com").unwrap();
        assert!(store.get("a@x.com").unwrap().is_none());
    }
}
