use crate::Database;
use crate::models::{MessageRow, PendingRow, UserRow};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        full_name: &str,
        email: &str,
        password_hash: &str,
        is_verified: bool,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, full_name, email, password, is_verified) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, full_name, email, password_hash, is_verified],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// All users except the given one, for the chat sidebar.
    pub fn list_users_except(&self, id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE id != ?1 ORDER BY full_name"
            ))?;

            let rows = stmt
                .query_map([id], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn update_full_name(&self, id: &str, full_name: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET full_name = ?2, updated_at = datetime('now') WHERE id = ?1",
                rusqlite::params![id, full_name],
            )?;
            Ok(())
        })
    }

    pub fn update_profile_pic(&self, id: &str, url: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET profile_pic = ?2, updated_at = datetime('now') WHERE id = ?1",
                rusqlite::params![id, url],
            )?;
            Ok(())
        })
    }

    /// Adopt a new email address and drop verified status until the owner
    /// proves control of it again.
    pub fn update_email_unverified(&self, id: &str, email: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET email = ?2, is_verified = 0, updated_at = datetime('now') WHERE id = ?1",
                rusqlite::params![id, email],
            )?;
            Ok(())
        })
    }

    pub fn mark_verified(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET is_verified = 1, updated_at = datetime('now') WHERE id = ?1",
                [id],
            )?;
            Ok(())
        })
    }

    // -- Pending registrations --

    /// Insert or replace the single pending record for an email.
    pub fn upsert_pending(&self, pending: &PendingRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pending_registrations (email, full_name, password, otp, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(email) DO UPDATE SET
                     full_name = excluded.full_name,
                     password = excluded.password,
                     otp = excluded.otp,
                     expires_at = excluded.expires_at",
                rusqlite::params![
                    pending.email,
                    pending.full_name,
                    pending.password,
                    pending.otp,
                    pending.expires_at
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_pending(&self, email: &str) -> Result<Option<PendingRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT email, full_name, password, otp, expires_at
                 FROM pending_registrations WHERE email = ?1",
            )?;

            let row = stmt
                .query_row([email], |row| {
                    Ok(PendingRow {
                        email: row.get(0)?,
                        full_name: row.get(1)?,
                        password: row.get(2)?,
                        otp: row.get(3)?,
                        expires_at: row.get(4)?,
                    })
                })
                .optional()?;

            Ok(row)
        })
    }

    pub fn delete_pending(&self, email: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM pending_registrations WHERE email = ?1", [email])?;
            Ok(())
        })
    }

    /// Drop records past their expiry. `now` must be RFC 3339 with a fixed
    /// seconds precision so the TEXT comparison is chronological.
    pub fn purge_expired_pending(&self, now: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let purged = conn.execute(
                "DELETE FROM pending_registrations WHERE expires_at <= ?1",
                [now],
            )?;
            Ok(purged)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        sender_id: &str,
        receiver_id: &str,
        text: Option<&str>,
        image: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, text, image) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, sender_id, receiver_id, text, image],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Conversation history between two users, both directions, in insertion
    /// order.
    pub fn get_messages_between(&self, a: &str, b: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, text, image, created_at
                 FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY rowid",
            )?;

            let rows = stmt
                .query_map([a, b], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Delete a message by id, returning the deleted row if it existed.
    pub fn delete_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let row = query_message(conn, id)?;
            if row.is_some() {
                conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            }
            Ok(row)
        })
    }
}

const USER_COLUMNS: &str = "id, full_name, email, password, profile_pic, is_verified, created_at";

fn user_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<UserRow, rusqlite::Error> {
    Ok(UserRow {
        id: row.get(0)?,
        full_name: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        profile_pic: row.get(4)?,
        is_verified: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"))?;

    let row = stmt.query_row([value], user_from_row).optional()?;

    Ok(row)
}

fn message_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        text: row.get(3)?,
        image: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, sender_id, receiver_id, text, image, created_at FROM messages WHERE id = ?1",
    )?;

    let row = stmt.query_row([id], message_from_row).optional()?;

    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn seed_user(db: &Database, id: &str, email: &str) {
        db.create_user(id, "Test User", email, "hash", true).unwrap();
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let db = test_db();
        seed_user(&db, "u1", "a@x.com");

        let result = db.create_user("u2", "Other", "a@x.com", "hash", true);
        assert!(result.is_err());
    }

    #[test]
    fn list_users_excludes_caller() {
        let db = test_db();
        seed_user(&db, "u1", "a@x.com");
        seed_user(&db, "u2", "b@x.com");
        seed_user(&db, "u3", "c@x.com");

        let others = db.list_users_except("u1").unwrap();
        assert_eq!(others.len(), 2);
        assert!(others.iter().all(|u| u.id != "u1"));
    }

    #[test]
    fn email_change_drops_verified_flag() {
        let db = test_db();
        seed_user(&db, "u1", "a@x.com");

        db.update_email_unverified("u1", "new@x.com").unwrap();

        let user = db.get_user_by_id("u1").unwrap().unwrap();
        assert_eq!(user.email, "new@x.com");
        assert!(!user.is_verified);

        db.mark_verified("u1").unwrap();
        assert!(db.get_user_by_id("u1").unwrap().unwrap().is_verified);
    }

    #[test]
    fn upsert_pending_supersedes_prior_record() {
        let db = test_db();

        db.upsert_pending(&PendingRow {
            email: "a@x.com".into(),
            full_name: "Alice".into(),
            password: "hash1".into(),
            otp: "111111".into(),
            expires_at: "2026-01-01T00:00:00+00:00".into(),
        })
        .unwrap();

        db.upsert_pending(&PendingRow {
            email: "a@x.com".into(),
            full_name: "Alice".into(),
            password: "hash2".into(),
            otp: "222222".into(),
            expires_at: "2026-01-01T00:10:00+00:00".into(),
        })
        .unwrap();

        let pending = db.get_pending("a@x.com").unwrap().unwrap();
        assert_eq!(pending.otp, "222222");
        assert_eq!(pending.password, "hash2");

        db.delete_pending("a@x.com").unwrap();
        assert!(db.get_pending("a@x.com").unwrap().is_none());
    }

    #[test]
    fn purge_drops_only_expired_records() {
        let db = test_db();

        for (email, expires) in [
            ("old@x.com", "2026-01-01T00:00:00+00:00"),
            ("live@x.com", "2026-01-01T01:00:00+00:00"),
        ] {
            db.upsert_pending(&PendingRow {
                email: email.into(),
                full_name: "X".into(),
                password: "hash".into(),
                otp: "123456".into(),
                expires_at: expires.into(),
            })
            .unwrap();
        }

        let purged = db.purge_expired_pending("2026-01-01T00:30:00+00:00").unwrap();
        assert_eq!(purged, 1);
        assert!(db.get_pending("old@x.com").unwrap().is_none());
        assert!(db.get_pending("live@x.com").unwrap().is_some());
    }

    #[test]
    fn messages_between_covers_both_directions_only() {
        let db = test_db();
        seed_user(&db, "u1", "a@x.com");
        seed_user(&db, "u2", "b@x.com");
        seed_user(&db, "u3", "c@x.com");

        db.insert_message("m1", "u1", "u2", Some("hi"), None).unwrap();
        db.insert_message("m2", "u2", "u1", Some("hey"), None).unwrap();
        db.insert_message("m3", "u1", "u3", Some("other thread"), None).unwrap();

        let history = db.get_messages_between("u1", "u2").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, "m1");
        assert_eq!(history[1].id, "m2");
        assert!(history.iter().all(|m| m.id != "m3"));
    }

    #[test]
    fn delete_message_echoes_row_and_misses_return_none() {
        let db = test_db();
        seed_user(&db, "u1", "a@x.com");
        seed_user(&db, "u2", "b@x.com");
        db.insert_message("m1", "u1", "u2", Some("hi"), None).unwrap();

        let deleted = db.delete_message("m1").unwrap().unwrap();
        assert_eq!(deleted.text.as_deref(), Some("hi"));
        assert!(db.get_message("m1").unwrap().is_none());

        assert!(db.delete_message("nope").unwrap().is_none());
        assert_eq!(db.get_messages_between("u1", "u2").unwrap().len(), 0);
    }
}
