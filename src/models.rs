use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
}

impl Role {
    pub const fn id(self) -> i32 {
        match self {
            Role::Admin => 1,
            Role::Teacher => 2,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(Role::Admin),
            2 => Some(Role::Teacher),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub role_id: i32,
    pub refresh_token_hash: Option<String>,
    pub full_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub birthplace: Option<String>,
    pub major: Option<String>,
    pub years_of_service: Option<i32>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub unit_name: Option<String>,
    pub field: Option<String>,
    pub image_path: Option<String>,
    pub teacher_code: Option<i32>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    pub fn role(&self) -> Option<Role> {
        Role::from_id(self.role_id)
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub role_id: i32,
}

/// Profile columns a user (or an admin on their behalf) may change.
#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = users)]
pub struct UserProfilePatch {
    pub full_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub birthplace: Option<String>,
    pub major: Option<String>,
    pub years_of_service: Option<i32>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub unit_name: Option<String>,
    pub field: Option<String>,
    pub image_path: Option<String>,
    pub teacher_code: Option<i32>,
}

/// Account columns only an admin may change on a teacher.
#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = users)]
pub struct TeacherAccountPatch {
    pub email: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = specializations)]
pub struct Specialization {
    pub id: i32,
    pub name: String,
    pub owner_user_id: Option<i32>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = specializations)]
pub struct NewSpecialization {
    pub name: String,
    pub owner_user_id: Option<i32>,
}

#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = specializations)]
pub struct SpecializationPatch {
    pub name: Option<String>,
    pub owner_user_id: Option<i32>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = documents)]
pub struct Document {
    pub id: i32,
    pub title: String,
    pub file_path: String,
    pub author_group: Option<String>,
    pub journal: Option<String>,
    pub journal_info: Option<String>,
    pub academic_year: Option<i32>,
    pub note: Option<String>,
    pub owner_user_id: i32,
    pub specialization_id: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub title: String,
    pub file_path: String,
    pub author_group: Option<String>,
    pub journal: Option<String>,
    pub journal_info: Option<String>,
    pub academic_year: Option<i32>,
    pub note: Option<String>,
    pub owner_user_id: i32,
    pub specialization_id: i32,
}

#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = documents)]
pub struct DocumentPatch {
    pub title: Option<String>,
    pub file_path: Option<String>,
    pub author_group: Option<String>,
    pub journal: Option<String>,
    pub journal_info: Option<String>,
    pub academic_year: Option<i32>,
    pub note: Option<String>,
    pub owner_user_id: Option<i32>,
    pub specialization_id: Option<i32>,
}

impl UserProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.date_of_birth.is_none()
            && self.birthplace.is_none()
            && self.major.is_none()
            && self.years_of_service.is_none()
            && self.gender.is_none()
            && self.phone.is_none()
            && self.unit_name.is_none()
            && self.field.is_none()
            && self.image_path.is_none()
            && self.teacher_code.is_none()
    }
}

impl TeacherAccountPatch {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.username.is_none() && self.phone.is_none()
    }
}

impl SpecializationPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.owner_user_id.is_none()
    }
}

impl DocumentPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.file_path.is_none()
            && self.author_group.is_none()
            && self.journal.is_none()
            && self.journal_info.is_none()
            && self.academic_year.is_none()
            && self.note.is_none()
            && self.owner_user_id.is_none()
            && self.specialization_id.is_none()
    }
}
