use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;

use crate::models::{NewUser, Role, TeacherAccountPatch, User, UserProfilePatch};
use crate::schema::users;

pub fn find(conn: &mut PgConnection, user_id: i32) -> QueryResult<Option<User>> {
    users::table.find(user_id).first(conn).optional()
}

pub fn find_teacher(conn: &mut PgConnection, user_id: i32) -> QueryResult<Option<User>> {
    users::table
        .find(user_id)
        .filter(users::role_id.eq(Role::Teacher.id()))
        .first(conn)
        .optional()
}

pub fn find_by_username(conn: &mut PgConnection, username: &str) -> QueryResult<Option<User>> {
    users::table
        .filter(users::username.eq(username))
        .first(conn)
        .optional()
}

pub fn find_by_email(conn: &mut PgConnection, email: &str) -> QueryResult<Option<User>> {
    users::table
        .filter(users::email.eq(email))
        .first(conn)
        .optional()
}

pub fn exists(conn: &mut PgConnection, user_id: i32) -> QueryResult<bool> {
    diesel::select(diesel::dsl::exists(users::table.find(user_id))).get_result(conn)
}

pub fn email_taken(conn: &mut PgConnection, email: &str) -> QueryResult<bool> {
    diesel::select(diesel::dsl::exists(
        users::table.filter(users::email.eq(email)),
    ))
    .get_result(conn)
}

pub fn username_taken(conn: &mut PgConnection, username: &str) -> QueryResult<bool> {
    diesel::select(diesel::dsl::exists(
        users::table.filter(users::username.eq(username)),
    ))
    .get_result(conn)
}

/// Which of the patch's unique-ish values already belong to someone other
/// than `user_id`, in patch field order.
pub fn conflicting_account_fields(
    conn: &mut PgConnection,
    user_id: i32,
    patch: &TeacherAccountPatch,
) -> QueryResult<Vec<&'static str>> {
    let mut conflicts = Vec::new();
    let others = || users::table.filter(users::id.ne(user_id));

    if let Some(email) = &patch.email {
        let taken: bool = diesel::select(diesel::dsl::exists(
            others().filter(users::email.eq(email)),
        ))
        .get_result(conn)?;
        if taken {
            conflicts.push("email");
        }
    }
    if let Some(username) = &patch.username {
        let taken: bool = diesel::select(diesel::dsl::exists(
            others().filter(users::username.eq(username)),
        ))
        .get_result(conn)?;
        if taken {
            conflicts.push("username");
        }
    }
    if let Some(phone) = &patch.phone {
        if phone_taken_by_other(conn, user_id, phone)? {
            conflicts.push("phone");
        }
    }

    Ok(conflicts)
}

pub fn phone_taken_by_other(conn: &mut PgConnection, user_id: i32, phone: &str) -> QueryResult<bool> {
    diesel::select(diesel::dsl::exists(
        users::table
            .filter(users::id.ne(user_id))
            .filter(users::phone.eq(phone)),
    ))
    .get_result(conn)
}

pub fn count_all(conn: &mut PgConnection) -> QueryResult<i64> {
    users::table.count().get_result(conn)
}

pub fn list_by_role(conn: &mut PgConnection, role: Role) -> QueryResult<Vec<User>> {
    users::table
        .filter(users::role_id.eq(role.id()))
        .order(users::id.asc())
        .load(conn)
}

pub fn insert(conn: &mut PgConnection, new_user: &NewUser) -> QueryResult<User> {
    diesel::insert_into(users::table)
        .values(new_user)
        .get_result(conn)
}

pub fn apply_profile_patch(
    conn: &mut PgConnection,
    user_id: i32,
    patch: &UserProfilePatch,
) -> QueryResult<usize> {
    if patch.is_empty() {
        return Ok(0);
    }
    let now = Utc::now().naive_utc();
    diesel::update(users::table.find(user_id))
        .set((patch, users::updated_at.eq(now)))
        .execute(conn)
}

pub fn apply_account_patch(
    conn: &mut PgConnection,
    user_id: i32,
    patch: &TeacherAccountPatch,
) -> QueryResult<usize> {
    if patch.is_empty() {
        return Ok(0);
    }
    let now = Utc::now().naive_utc();
    diesel::update(users::table.find(user_id))
        .set((patch, users::updated_at.eq(now)))
        .execute(conn)
}

pub fn set_password_hash(
    conn: &mut PgConnection,
    user_id: i32,
    password_hash: &str,
) -> QueryResult<usize> {
    let now = Utc::now().naive_utc();
    diesel::update(users::table.find(user_id))
        .set((
            users::password_hash.eq(password_hash),
            users::updated_at.eq(now),
        ))
        .execute(conn)
}

pub fn set_refresh_token_hash(
    conn: &mut PgConnection,
    user_id: i32,
    digest: Option<&str>,
) -> QueryResult<usize> {
    diesel::update(users::table.find(user_id))
        .set(users::refresh_token_hash.eq(digest))
        .execute(conn)
}

/// Swaps the stored refresh digest only if it still equals `expected`.
/// Returns false when another login or refresh got there first.
pub fn rotate_refresh_token_hash(
    conn: &mut PgConnection,
    user_id: i32,
    expected: &str,
    replacement: &str,
) -> QueryResult<bool> {
    let updated = diesel::update(
        users::table
            .find(user_id)
            .filter(users::refresh_token_hash.eq(expected)),
    )
    .set(users::refresh_token_hash.eq(replacement))
    .execute(conn)?;
    Ok(updated == 1)
}

pub fn delete(conn: &mut PgConnection, user_id: i32) -> QueryResult<usize> {
    diesel::delete(users::table.find(user_id)).execute(conn)
}

pub fn image_paths(conn: &mut PgConnection) -> QueryResult<Vec<String>> {
    users::table
        .filter(users::image_path.is_not_null())
        .select(users::image_path.assume_not_null())
        .load(conn)
}
