use std::env;
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use repository::auth::jwt::TokenService;
use repository::auth::password::hash_password;
use repository::config::{AppConfig, DEFAULT_MAX_UPLOAD_BYTES};
use repository::db::{self, PgPool, MIGRATIONS};
use repository::mail::{MailError, MailResult, Mailer};
use repository::models::{NewSpecialization, NewUser, Role};
use repository::routes;
use repository::state::AppState;
use repository::storage::{LocalStorage, ObjectStorage};
use serde::Serialize;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tower::util::ServiceExt;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[allow(dead_code)]
#[derive(Clone, Debug)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
pub struct FakeMailer {
    sent: Mutex<Vec<SentMail>>,
    fail: std::sync::atomic::AtomicBool,
    disabled: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> MailResult<()> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(MailError::Rejected {
                status: 503,
                body: "mail API unavailable".to_string(),
            });
        }
        self.sent.lock().await.push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    fn delivers(&self) -> bool {
        !self.disabled.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl FakeMailer {
    #[allow(dead_code)]
    pub async fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().await.clone()
    }

    #[allow(dead_code)]
    pub fn fail_next_sends(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Behaves like a server started without a mail endpoint.
    #[allow(dead_code)]
    pub fn disable_delivery(&self) {
        self.disabled.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

/// One multipart part: a text field, or a file when `filename` is set.
#[allow(dead_code)]
pub struct Part<'a> {
    pub name: &'a str,
    pub filename: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub data: &'a [u8],
}

#[allow(dead_code)]
impl<'a> Part<'a> {
    pub fn text(name: &'a str, value: &'a str) -> Self {
        Self {
            name,
            filename: None,
            content_type: None,
            data: value.as_bytes(),
        }
    }

    pub fn file(name: &'a str, filename: &'a str, content_type: &'a str, data: &'a [u8]) -> Self {
        Self {
            name,
            filename: Some(filename),
            content_type: Some(content_type),
            data,
        }
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    mailer: Arc<FakeMailer>,
    uploads: TempDir,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;
        let uploads = tempfile::tempdir().context("failed to create uploads dir")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-access-secret".to_string(),
            jwt_refresh_secret: "test-refresh-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            refresh_token_expiry_days: 7,
            cors_allowed_origin: None,
            upload_dir: uploads.path().to_path_buf(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            default_teacher_password: "1111".to_string(),
            mail_api_url: None,
            mail_api_key: None,
            mail_from: "no-reply@test.local".to_string(),
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage: Arc<dyn ObjectStorage> = Arc::new(LocalStorage::new(uploads.path()));
        let tokens = TokenService::from_config(&config)?;
        let mailer = Arc::new(FakeMailer::default());
        let mailer_for_state: Arc<dyn Mailer> = mailer.clone();
        let state = AppState::new(pool, config, storage, tokens, mailer_for_state);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            mailer,
            uploads,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn mailer(&self) -> Arc<FakeMailer> {
        self.mailer.clone()
    }

    /// Relative keys of every file currently under the uploads root.
    #[allow(dead_code)]
    pub async fn stored_files(&self) -> Result<Vec<String>> {
        LocalStorage::new(self.uploads.path()).list_objects().await
    }

    #[allow(dead_code)]
    pub fn file_exists(&self, key: &str) -> bool {
        self.uploads.path().join(key).is_file()
    }

    pub async fn insert_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<i32> {
        let username = username.to_string();
        let email = email.to_string();
        let password = password.to_string();
        self.with_conn(move |conn| {
            let user = NewUser {
                email,
                username,
                password_hash: hash_password(&password)?,
                role_id: role.id(),
            };
            let id = diesel::insert_into(repository::schema::users::table)
                .values(&user)
                .returning(repository::schema::users::id)
                .get_result::<i32>(conn)
                .context("failed to insert user")?;
            Ok(id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_specialization(&self, name: &str, owner_user_id: i32) -> Result<i32> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let id = diesel::insert_into(repository::schema::specializations::table)
                .values(&NewSpecialization {
                    name,
                    owner_user_id: Some(owner_user_id),
                })
                .returning(repository::schema::specializations::id)
                .get_result::<i32>(conn)
                .context("failed to insert specialization")?;
            Ok(id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn password_hash(&self, user_id: i32) -> Result<String> {
        self.with_conn(move |conn| {
            use repository::schema::users::dsl;
            Ok(dsl::users
                .find(user_id)
                .select(dsl::password_hash)
                .first::<String>(conn)?)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn user_count(&self) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(repository::schema::users::table
                .count()
                .get_result::<i64>(conn)?)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn document_count(&self) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(repository::schema::documents::table
                .count()
                .get_result::<i64>(conn)?)
        })
        .await
    }

    /// Logs in and returns the full `data` object of the envelope.
    pub async fn login(&self, username: &str, password: &str) -> Result<Value> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            username: &'a str,
            password: &'a str,
        }

        let response = self
            .send_json(
                Method::POST,
                "/api/auth/login",
                &LoginPayload { username, password },
                None,
            )
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = json_body(response).await?;
        Ok(body["data"].clone())
    }

    #[allow(dead_code)]
    pub async fn login_token(&self, username: &str, password: &str) -> Result<String> {
        let data = self.login(username, password).await?;
        data["access_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("login response carried no access token"))
    }

    pub async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<axum::response::Response> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    /// Posts `body` verbatim, for payloads serde would never produce.
    #[allow(dead_code)]
    pub async fn post_raw(
        &self,
        path: &str,
        content_type: &str,
        body: &str,
        token: Option<&str>,
    ) -> Result<axum::response::Response> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", content_type);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body.to_string()))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<axum::response::Response> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<axum::response::Response> {
        self.send_json(Method::PUT, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<axum::response::Response> {
        self.empty(Method::GET, path, token).await
    }

    #[allow(dead_code)]
    pub async fn delete(
        &self,
        path: &str,
        token: Option<&str>,
    ) -> Result<axum::response::Response> {
        self.empty(Method::DELETE, path, token).await
    }

    async fn empty(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
    ) -> Result<axum::response::Response> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn multipart(
        &self,
        method: Method,
        path: &str,
        parts: &[Part<'_>],
        token: &str,
    ) -> Result<axum::response::Response> {
        let boundary = "repository-test-boundary";
        let mut body = Vec::new();
        for part in parts {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            match part.filename {
                Some(filename) => body.extend(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        part.name, filename
                    )
                    .as_bytes(),
                ),
                None => body.extend(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name)
                        .as_bytes(),
                ),
            }
            if let Some(content_type) = part.content_type {
                body.extend(format!("Content-Type: {content_type}\r\n").as_bytes());
            }
            body.extend(b"\r\n");
            body.extend(part.data);
            body.extend(b"\r\n");
        }
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn json_body(response: axum::response::Response) -> Result<Value> {
    let bytes = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&bytes).context("response body was not JSON")
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE documents, specializations, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
