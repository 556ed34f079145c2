use chrono::NaiveDate;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::auth::jwt::{fingerprint, TokenService};
use crate::auth::password::{self, GENERATED_PASSWORD_LENGTH};
use crate::error::{AppError, AppResult};
use crate::files::{Upload, UploadKind};
use crate::mail::MailError;
use crate::models::{NewUser, Role, TeacherAccountPatch, User, UserProfilePatch};
use crate::state::AppState;
use crate::store::{documents, users};

/// Registrations are Gmail-only.
static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@gmail\.com$").expect("email pattern compiles")
});

/// Key for the transaction-scoped advisory lock taken while assigning roles.
const REGISTRATION_LOCK_KEY: i64 = 0x7265_6769_7374_6572;

const INVALID_LOGIN: &str = "invalid username or password";
const INVALID_REFRESH: &str = "refresh token is invalid or expired";

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

/// Everything but credentials.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: i32,
    pub email: String,
    pub username: String,
    pub role: Option<Role>,
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

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        let role = user.role();
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            role,
            full_name: user.full_name,
            date_of_birth: user.date_of_birth,
            birthplace: user.birthplace,
            major: user.major,
            years_of_service: user.years_of_service,
            gender: user.gender,
            phone: user.phone,
            unit_name: user.unit_name,
            field: user.field,
            image_path: user.image_path,
            teacher_code: user.teacher_code,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TeacherSummary {
    pub id: i32,
    pub email: String,
    pub username: String,
    pub phone: Option<String>,
}

impl From<User> for TeacherSummary {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            phone: user.phone,
        }
    }
}

fn required<'a>(value: &'a str, message: &str) -> AppResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(AppError::bad_request(message))
    } else {
        Ok(trimmed)
    }
}

/// Creates an account. The first account ever created is the admin.
pub fn register(
    conn: &mut PgConnection,
    email: &str,
    username: &str,
    password: &str,
) -> AppResult<Role> {
    let email = required(email, "email, username and password are required")?;
    let username = required(username, "email, username and password are required")?;
    if password.is_empty() {
        return Err(AppError::bad_request(
            "email, username and password are required",
        ));
    }
    if !is_valid_email(email) {
        return Err(AppError::bad_request(
            "invalid email address, only gmail.com addresses are accepted",
        ));
    }

    let password_hash = password::hash_password(password)?;

    let role = conn.transaction::<_, AppError, _>(|conn| {
        diesel::sql_query("SELECT pg_advisory_xact_lock($1)")
            .bind::<BigInt, _>(REGISTRATION_LOCK_KEY)
            .execute(conn)?;

        if users::email_taken(conn, email)? {
            return Err(AppError::conflict("email is already registered"));
        }
        if users::username_taken(conn, username)? {
            return Err(AppError::conflict("username is already registered"));
        }

        let role = if users::count_all(conn)? == 0 {
            Role::Admin
        } else {
            Role::Teacher
        };

        users::insert(
            conn,
            &NewUser {
                email: email.to_string(),
                username: username.to_string(),
                password_hash,
                role_id: role.id(),
            },
        )?;
        Ok(role)
    })?;

    info!(username = %username, role = role.as_str(), "user registered");
    Ok(role)
}

fn issue_tokens(tokens: &TokenService, user: &User) -> AppResult<(TokenPair, String)> {
    let role = user
        .role()
        .ok_or_else(|| AppError::internal(format!("user {} has unknown role", user.id)))?;
    let access_token = tokens.generate_access_token(user.id, role)?;
    let refresh_token = tokens.generate_refresh_token(user.id, role)?;
    let digest = fingerprint(&refresh_token);

    Ok((
        TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer",
            expires_in: tokens.access_expiry_seconds(),
        },
        digest,
    ))
}

pub fn login(
    conn: &mut PgConnection,
    tokens: &TokenService,
    username: &str,
    password: &str,
) -> AppResult<TokenPair> {
    if username.trim().is_empty() || password.is_empty() {
        return Err(AppError::bad_request("username and password are required"));
    }

    let user = users::find_by_username(conn, username.trim())?
        .ok_or_else(|| AppError::invalid_credentials(INVALID_LOGIN))?;

    let valid = password::verify_password(password, &user.password_hash).unwrap_or_else(|err| {
        warn!(user_id = user.id, error = %err, "stored password hash is unreadable");
        false
    });
    if !valid {
        return Err(AppError::invalid_credentials(INVALID_LOGIN));
    }

    let (pair, digest) = issue_tokens(tokens, &user)?;
    users::set_refresh_token_hash(conn, user.id, Some(&digest))?;

    info!(user_id = user.id, "user logged in");
    Ok(pair)
}

/// Exchanges a refresh token for a new pair. Each refresh token works once;
/// presenting a rotated-out token fails.
pub fn refresh(
    conn: &mut PgConnection,
    tokens: &TokenService,
    refresh_token: &str,
) -> AppResult<TokenPair> {
    if refresh_token.trim().is_empty() {
        return Err(AppError::bad_request("refresh token is required"));
    }

    let claims = tokens
        .verify_refresh_token(refresh_token)
        .map_err(|_| AppError::unauthorized_with(INVALID_REFRESH))?;

    let user = users::find(conn, claims.sub)?
        .ok_or_else(|| AppError::unauthorized_with(INVALID_REFRESH))?;

    let (pair, digest) = issue_tokens(tokens, &user)?;
    let presented = fingerprint(refresh_token);
    if !users::rotate_refresh_token_hash(conn, user.id, &presented, &digest)? {
        warn!(user_id = user.id, "rejected stale refresh token");
        return Err(AppError::unauthorized_with(INVALID_REFRESH));
    }

    Ok(pair)
}

pub fn logout(conn: &mut PgConnection, user_id: i32) -> AppResult<()> {
    users::set_refresh_token_hash(conn, user_id, None)?;
    info!(user_id, "user logged out");
    Ok(())
}

pub fn change_password(
    conn: &mut PgConnection,
    user_id: i32,
    old_password: &str,
    new_password: &str,
) -> AppResult<()> {
    if old_password.is_empty() || new_password.is_empty() {
        return Err(AppError::bad_request(
            "old password and new password are required",
        ));
    }

    let user = users::find(conn, user_id)?
        .ok_or_else(|| AppError::not_found_with("user not found"))?;
    let matches = password::verify_password(old_password, &user.password_hash).unwrap_or(false);
    if !matches {
        return Err(AppError::invalid_credentials("old password is incorrect"));
    }

    let password_hash = password::hash_password(new_password)?;
    users::set_password_hash(conn, user_id, &password_hash)?;
    info!(user_id, "password changed");
    Ok(())
}

/// Generates a fresh password for the account behind `email` and mails it.
pub async fn reset_password(state: &AppState, email: &str) -> AppResult<()> {
    let email = required(email, "email is required")?;
    if !state.mailer.delivers() {
        return Err(AppError::internal_with(
            "password reset is unavailable because email delivery is not configured",
            MailError::NotConfigured,
        ));
    }

    let (user_id, generated) = {
        let mut conn = state.db()?;
        let user = users::find_by_email(&mut conn, email)?
            .ok_or_else(|| AppError::not_found_with("no account uses that email"))?;
        let generated = password::generate_password(GENERATED_PASSWORD_LENGTH);
        let password_hash = password::hash_password(&generated)?;
        users::set_password_hash(&mut conn, user.id, &password_hash)?;
        (user.id, generated)
    };

    let body = format!(
        "Your password has been reset.\n\nNew password: {generated}\n\nPlease sign in and change it."
    );
    if let Err(err) = state
        .mailer
        .send(email, "Your new password", &body)
        .await
    {
        error!(user_id, error = %err, "failed to send password reset email");
        return Err(AppError::internal_with(
            "password was reset but the email could not be sent; request another reset",
            err,
        ));
    }

    info!(user_id, "password reset email sent");
    Ok(())
}

pub fn admin_reset_teacher_password(
    conn: &mut PgConnection,
    default_password: &str,
    teacher_id: i32,
) -> AppResult<()> {
    let teacher = users::find_teacher(conn, teacher_id)?
        .ok_or_else(|| AppError::not_found_with("no teacher with that id"))?;
    let password_hash = password::hash_password(default_password)?;
    users::set_password_hash(conn, teacher.id, &password_hash)?;
    info!(user_id = teacher.id, "teacher password reset to default");
    Ok(())
}

pub fn list_teachers(conn: &mut PgConnection) -> AppResult<Vec<TeacherSummary>> {
    Ok(users::list_by_role(conn, Role::Teacher)?
        .into_iter()
        .map(TeacherSummary::from)
        .collect())
}

pub fn list_users(conn: &mut PgConnection) -> AppResult<Vec<UserProfile>> {
    Ok(users::list_by_role(conn, Role::Teacher)?
        .into_iter()
        .map(UserProfile::from)
        .collect())
}

pub fn get_user(conn: &mut PgConnection, user_id: i32) -> AppResult<UserProfile> {
    users::find(conn, user_id)?
        .map(UserProfile::from)
        .ok_or_else(|| AppError::not_found_with("user not found"))
}

pub fn user_count(conn: &mut PgConnection) -> AppResult<i64> {
    Ok(users::count_all(conn)?)
}

pub fn update_teacher(
    conn: &mut PgConnection,
    teacher_id: i32,
    patch: TeacherAccountPatch,
) -> AppResult<TeacherSummary> {
    if let Some(email) = &patch.email {
        if !is_valid_email(email) {
            return Err(AppError::bad_request(
                "invalid email address, only gmail.com addresses are accepted",
            ));
        }
    }

    users::find_teacher(conn, teacher_id)?
        .ok_or_else(|| AppError::not_found_with("no teacher with that id"))?;

    if let Some(field) = users::conflicting_account_fields(conn, teacher_id, &patch)?.first() {
        return Err(AppError::conflict(format!("{field} already exists")));
    }

    users::apply_account_patch(conn, teacher_id, &patch)?;
    let updated = users::find(conn, teacher_id)?.ok_or_else(AppError::not_found)?;
    info!(user_id = teacher_id, "teacher account updated");
    Ok(TeacherSummary::from(updated))
}

/// Applies profile changes and, when given, swaps in a new profile image.
pub async fn update_profile(
    state: &AppState,
    user_id: i32,
    mut patch: UserProfilePatch,
    image: Option<Upload>,
) -> AppResult<UserProfile> {
    let mut conn = state.db()?;
    let user = users::find(&mut conn, user_id)?
        .ok_or_else(|| AppError::not_found_with("user not found"))?;

    if let Some(phone) = &patch.phone {
        if users::phone_taken_by_other(&mut conn, user_id, phone)? {
            return Err(AppError::conflict("phone already exists"));
        }
    }

    match image {
        Some(upload) => {
            state
                .files
                .replace(
                    UploadKind::ProfileImage,
                    user.image_path.as_deref(),
                    upload,
                    |key| {
                        patch.image_path = Some(key.to_string());
                        Ok(users::apply_profile_patch(&mut conn, user_id, &patch)?)
                    },
                )
                .await?;
        }
        None => {
            users::apply_profile_patch(&mut conn, user_id, &patch)?;
        }
    }

    let updated = users::find(&mut conn, user_id)?.ok_or_else(AppError::not_found)?;
    info!(user_id, "profile updated");
    Ok(UserProfile::from(updated))
}

/// Removes a teacher and their documents in one transaction, then their files.
pub async fn delete_teacher(state: &AppState, teacher_id: i32) -> AppResult<()> {
    let freed = {
        let mut conn = state.db()?;
        conn.transaction::<_, AppError, _>(|conn| {
            let teacher = users::find_teacher(conn, teacher_id)?
                .ok_or_else(|| AppError::not_found_with("no teacher with that id"))?;
            let mut freed = documents::delete_by_owner(conn, teacher_id)?;
            users::delete(conn, teacher_id)?;
            freed.extend(teacher.image_path);
            Ok(freed)
        })?
    };

    info!(user_id = teacher_id, files = freed.len(), "teacher deleted");
    for key in &freed {
        state.files.delete(key).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_gmail_addresses_are_accepted() {
        assert!(is_valid_email("alice@gmail.com"));
        assert!(is_valid_email("a.b+c_d%e-f@gmail.com"));
        assert!(!is_valid_email("alice@example.com"));
        assert!(!is_valid_email("alice@gmail.com.vn"));
        assert!(!is_valid_email("@gmail.com"));
        assert!(!is_valid_email("alice gmail.com"));
    }

    #[test]
    fn required_trims_and_rejects_blank() {
        assert_eq!(required("  bob ", "x").unwrap(), "bob");
        assert!(required("   ", "x").is_err());
    }
}
