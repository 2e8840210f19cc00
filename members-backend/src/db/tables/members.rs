//! Member record operations (bookClub)

use chrono::Utc;
use rusqlite::OptionalExtension;

use super::super::{Database, StoreError};
use crate::models::{Member, NewMember, UpdateMemberRequest};

const MEMBER_COLUMNS: &str = "id, name, age, avatar, created_at, updated_at";

impl Database {
    /// List all members in insertion order
    pub fn list_members(&self) -> Result<Vec<Member>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM bookClub ORDER BY id ASC",
            MEMBER_COLUMNS
        ))?;

        let members = stmt
            .query_map([], |row| Self::row_to_member(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(members)
    }

    /// Get a member by ID
    pub fn get_member(&self, id: i64) -> Result<Option<Member>, StoreError> {
        let conn = self.conn()?;
        let member = conn
            .query_row(
                &format!("SELECT {} FROM bookClub WHERE id = ?1", MEMBER_COLUMNS),
                [id],
                |row| Self::row_to_member(row),
            )
            .optional()?;
        Ok(member)
    }

    /// Validate and insert a new member
    pub fn create_member(&self, new_member: &NewMember) -> Result<Member, StoreError> {
        new_member.validate()?;

        let conn = self.conn()?;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO bookClub (name, age, avatar, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            rusqlite::params![&new_member.name, new_member.age, &new_member.avatar, now],
        )?;

        Ok(Member {
            id: conn.last_insert_rowid(),
            name: new_member.name.clone(),
            age: new_member.age,
            avatar: new_member.avatar.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply the supplied fields to a member. Returns `None` when no row
    /// matched the id.
    pub fn update_member(
        &self,
        id: i64,
        request: &UpdateMemberRequest,
    ) -> Result<Option<Member>, StoreError> {
        request.validate()?;

        let conn = self.conn()?;

        let mut updates = vec!["updated_at = ?1".to_string()];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(Utc::now())];

        if let Some(ref name) = request.name {
            params.push(Box::new(name.clone()));
            updates.push(format!("name = ?{}", params.len()));
        }
        if let Some(age) = request.age {
            params.push(Box::new(age));
            updates.push(format!("age = ?{}", params.len()));
        }
        params.push(Box::new(id));

        let sql = format!(
            "UPDATE bookClub SET {} WHERE id = ?{} RETURNING {}",
            updates.join(", "),
            params.len(),
            MEMBER_COLUMNS
        );

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let member = conn
            .query_row(&sql, params_ref.as_slice(), |row| Self::row_to_member(row))
            .optional()?;
        Ok(member)
    }

    /// Delete a member, returning the record as it was before deletion
    pub fn delete_member(&self, id: i64) -> Result<Option<Member>, StoreError> {
        let conn = self.conn()?;
        let member = conn
            .query_row(
                &format!("DELETE FROM bookClub WHERE id = ?1 RETURNING {}", MEMBER_COLUMNS),
                [id],
                |row| Self::row_to_member(row),
            )
            .optional()?;
        Ok(member)
    }

    fn row_to_member(row: &rusqlite::Row) -> rusqlite::Result<Member> {
        Ok(Member {
            id: row.get(0)?,
            name: row.get(1)?,
            age: row.get(2)?,
            avatar: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}
