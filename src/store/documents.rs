use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;

use crate::models::{Document, DocumentPatch, NewDocument};
use crate::schema::documents;

pub fn list(conn: &mut PgConnection) -> QueryResult<Vec<Document>> {
    documents::table.order(documents::id.asc()).load(conn)
}

pub fn list_by_owner(conn: &mut PgConnection, owner_user_id: i32) -> QueryResult<Vec<Document>> {
    documents::table
        .filter(documents::owner_user_id.eq(owner_user_id))
        .order(documents::id.asc())
        .load(conn)
}

pub fn count(conn: &mut PgConnection) -> QueryResult<i64> {
    documents::table.count().get_result(conn)
}

pub fn find(conn: &mut PgConnection, id: i32) -> QueryResult<Option<Document>> {
    documents::table.find(id).first(conn).optional()
}

pub fn insert(conn: &mut PgConnection, new_document: &NewDocument) -> QueryResult<Document> {
    diesel::insert_into(documents::table)
        .values(new_document)
        .get_result(conn)
}

pub fn apply_patch(
    conn: &mut PgConnection,
    id: i32,
    patch: &DocumentPatch,
) -> QueryResult<Document> {
    if patch.is_empty() {
        return documents::table.find(id).first(conn);
    }
    let now = Utc::now().naive_utc();
    diesel::update(documents::table.find(id))
        .set((patch, documents::updated_at.eq(now)))
        .get_result(conn)
}

pub fn delete(conn: &mut PgConnection, id: i32) -> QueryResult<usize> {
    diesel::delete(documents::table.find(id)).execute(conn)
}

/// Removes every document of `owner_user_id`, returning the freed file paths.
pub fn delete_by_owner(conn: &mut PgConnection, owner_user_id: i32) -> QueryResult<Vec<String>> {
    diesel::delete(documents::table.filter(documents::owner_user_id.eq(owner_user_id)))
        .returning(documents::file_path)
        .get_results(conn)
}

pub fn file_paths(conn: &mut PgConnection) -> QueryResult<Vec<String>> {
    documents::table.select(documents::file_path).load(conn)
}
