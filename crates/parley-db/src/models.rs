/// Database row types — these map directly to SQLite rows.
/// Distinct from parley-types API models to keep the DB layer independent.
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

pub struct UserRow {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub profile_pic: Option<String>,
    pub is_verified: bool,
    pub created_at: String,
}

pub struct PendingRow {
    pub email: String,
    pub full_name: String,
    pub password: String,
    pub otp: String,
    pub expires_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: Option<String>,
    pub image: Option<String>,
    pub created_at: String,
}

/// Parse a timestamp column into a UTC datetime.
/// SQLite's datetime('now') default stores "YYYY-MM-DD HH:MM:SS" without a
/// timezone; application-written columns use RFC 3339.
pub fn parse_timestamp(value: &str) -> DateTime<Utc> {
    value
        .parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", value, e);
            DateTime::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sqlite_default_format() {
        let ts = parse_timestamp("2026-08-06 09:30:00");
        assert_eq!(ts.to_rfc3339(), "2026-08-06T09:30:00+00:00");
    }

    #[test]
    fn parses_rfc3339() {
        let ts = parse_timestamp("2026-08-06T09:30:00+00:00");
        let expected: DateTime<Utc> = "2026-08-06T09:30:00Z".parse().unwrap();
        assert_eq!(ts, expected);
    }
}
