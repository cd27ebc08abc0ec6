use crate::{db, error::Result};
use rusqlite::{params, Connection, OptionalExtension};
use stagecore::User;
use time::OffsetDateTime;
use uuid::Uuid;

const COLUMNS: &str = "id, username, display_name, is_staff";

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: db::parse_uuid(&row.get::<_, String>(0)?)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        is_staff: row.get::<_, i64>(3)? != 0,
    })
}

/// Register a principal. Usernames are unique, compared case-insensitively.
pub fn create_user(
    conn: &Connection,
    username: &str,
    display_name: &str,
    is_staff: bool,
) -> anyhow::Result<User> {
    let username = username.trim();
    if username.is_empty() {
        anyhow::bail!("empty_username");
    }
    if find_by_username(conn, username)?.is_some() {
        anyhow::bail!("duplicate_user");
    }
    let user = User {
        id: Uuid::new_v4(),
        username: username.to_string(),
        display_name: display_name.trim().to_string(),
        is_staff,
    };
    conn.execute(
        "INSERT INTO users (id, username, display_name, is_staff, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            user.id.to_string(),
            user.username,
            user.display_name,
            user.is_staff,
            OffsetDateTime::now_utc().unix_timestamp()
        ],
    )?;
    Ok(user)
}

pub fn find_by_username(conn: &Connection, username: &str) -> Result<Option<User>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM users WHERE lower(username) = lower(?1)"
    ))?;
    Ok(stmt.query_row([username], row_to_user).optional()?)
}

pub fn get_user(conn: &Connection, id: &Uuid) -> Result<Option<User>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM users WHERE id = ?1"))?;
    Ok(stmt.query_row([id.to_string()], row_to_user).optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_username_case_insensitive() {
        let conn = db::init_db(":memory:").unwrap();
        let ana = create_user(&conn, "Ana", "Ana B", false).unwrap();
        assert!(create_user(&conn, "ana", "Other", false).is_err());
        let found = find_by_username(&conn, "ANA").unwrap().unwrap();
        assert_eq!(found, ana);
        assert_eq!(get_user(&conn, &ana.id).unwrap().unwrap().display_name, "Ana B");
        assert!(find_by_username(&conn, "nobody").unwrap().is_none());
    }

    #[test]
    fn staff_flag_persists() {
        let conn = db::init_db(":memory:").unwrap();
        let m = create_user(&conn, "mod", "", true).unwrap();
        assert!(get_user(&conn, &m.id).unwrap().unwrap().is_staff);
    }
}
