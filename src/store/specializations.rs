use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;

use crate::models::{NewSpecialization, Specialization, SpecializationPatch};
use crate::schema::{documents, specializations};

pub fn list(conn: &mut PgConnection) -> QueryResult<Vec<Specialization>> {
    specializations::table
        .order(specializations::id.asc())
        .load(conn)
}

pub fn count(conn: &mut PgConnection) -> QueryResult<i64> {
    specializations::table.count().get_result(conn)
}

pub fn find(conn: &mut PgConnection, id: i32) -> QueryResult<Option<Specialization>> {
    specializations::table.find(id).first(conn).optional()
}

pub fn exists(conn: &mut PgConnection, id: i32) -> QueryResult<bool> {
    diesel::select(diesel::dsl::exists(specializations::table.find(id))).get_result(conn)
}

/// Case-sensitive name lookup, ignoring the row `except` when given.
pub fn name_taken(conn: &mut PgConnection, name: &str, except: Option<i32>) -> QueryResult<bool> {
    let same_name = specializations::table.filter(specializations::name.eq(name));
    match except {
        Some(id) => diesel::select(diesel::dsl::exists(
            same_name.filter(specializations::id.ne(id)),
        ))
        .get_result(conn),
        None => diesel::select(diesel::dsl::exists(same_name)).get_result(conn),
    }
}

pub fn is_referenced(conn: &mut PgConnection, id: i32) -> QueryResult<bool> {
    diesel::select(diesel::dsl::exists(
        documents::table.filter(documents::specialization_id.eq(id)),
    ))
    .get_result(conn)
}

pub fn insert(
    conn: &mut PgConnection,
    new_specialization: &NewSpecialization,
) -> QueryResult<Specialization> {
    diesel::insert_into(specializations::table)
        .values(new_specialization)
        .get_result(conn)
}

pub fn apply_patch(
    conn: &mut PgConnection,
    id: i32,
    patch: &SpecializationPatch,
) -> QueryResult<Specialization> {
    if patch.is_empty() {
        return specializations::table.find(id).first(conn);
    }
    let now = Utc::now().naive_utc();
    diesel::update(specializations::table.find(id))
        .set((patch, specializations::updated_at.eq(now)))
        .get_result(conn)
}

pub fn delete(conn: &mut PgConnection, id: i32) -> QueryResult<usize> {
    diesel::delete(specializations::table.find(id)).execute(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::debug_query;
    use diesel::pg::Pg;

    #[test]
    fn rename_patch_leaves_owner_alone() {
        let patch = SpecializationPatch {
            name: Some("Networks".into()),
            owner_user_id: None,
        };
        let query = diesel::update(specializations::table.find(2)).set(&patch);
        let sql = debug_query::<Pg, _>(&query).to_string();

        assert!(sql.contains(r#"SET "name" = $1"#), "{sql}");
        assert!(!sql.contains("owner_user_id"), "{sql}");
    }
}
