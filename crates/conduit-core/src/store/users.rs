use anyhow::{Context, Result};
use chrono::Utc;
use diesel::prelude::*;

use crate::model::User;
use crate::schema::users;

use super::Store;

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = users)]
pub struct UserRow {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            email: row.email,
            display_name: row.display_name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUser<'a> {
    id: &'a str,
    email: Option<&'a str>,
    display_name: Option<&'a str>,
}

impl Store {
    /// Finds the user by id, or creates one (spec §4.1 find-or-create),
    /// grounded on `agent_manager.rs`'s `get_or_create_context`.
    pub fn get_or_create_user(
        &self,
        user_id: &str,
        email: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<User> {
        let mut conn = self.lock()?;

        let existing: Option<UserRow> = users::table
            .filter(users::id.eq(user_id))
            .select(UserRow::as_select())
            .first(&mut *conn)
            .optional()
            .context("failed to query user")?;

        if let Some(row) = existing {
            return Ok(row.into());
        }

        let new_user = NewUser {
            id: user_id,
            email,
            display_name,
        };

        diesel::insert_into(users::table)
            .values(&new_user)
            .execute(&mut *conn)
            .context("failed to insert user")?;

        let now = Utc::now();
        Ok(User {
            id: user_id.to_string(),
            email: email.map(|s| s.to_string()),
            display_name: display_name.map(|s| s.to_string()),
            created_at: now,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_row_converts_to_domain_user() {
        let now = Utc::now();
        let row = UserRow {
            id: "u1".to_string(),
            email: Some("a@example.com".to_string()),
            display_name: None,
            created_at: now,
            updated_at: now,
        };
        let user: User = row.into();
        assert_eq!(user.id, "u1");
        assert_eq!(user.email.as_deref(), Some("a@example.com"));
    }
}
