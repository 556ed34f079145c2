use std::collections::HashMap;
use std::str::FromStr;

use axum::extract::multipart::MultipartError;
use axum::extract::Multipart;
use axum::http::StatusCode;
use chrono::NaiveDate;
use tracing::error;

use crate::error::{AppError, AppResult};
use crate::files::Upload;

/// A multipart body split into text fields and at most one file.
#[derive(Debug, Default)]
pub struct MultipartForm {
    fields: HashMap<String, String>,
    file: Option<Upload>,
}

fn multipart_error(err: MultipartError, max_upload_bytes: usize) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::payload_too_large(format!(
            "file must not exceed {} MB",
            max_upload_bytes / (1024 * 1024)
        ));
    }
    error!(error = %err, "invalid multipart data");
    AppError::bad_request(format!("invalid multipart data: {err}"))
}

impl MultipartForm {
    /// Reads every part; the part named `file_field` becomes the upload.
    pub async fn read(
        mut multipart: Multipart,
        file_field: &str,
        max_upload_bytes: usize,
    ) -> AppResult<Self> {
        let mut form = MultipartForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| multipart_error(err, max_upload_bytes))?
        {
            let Some(name) = field.name().map(|n| n.to_string()) else {
                continue;
            };

            if name == file_field {
                if form.file.is_some() {
                    return Err(AppError::bad_request(format!(
                        "only one {file_field} may be uploaded"
                    )));
                }
                let original_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(|mime| mime.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| multipart_error(err, max_upload_bytes))?;
                form.file = Some(Upload {
                    original_name,
                    content_type,
                    bytes,
                });
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|err| multipart_error(err, max_upload_bytes))?;
                form.fields.insert(name, value);
            }
        }

        Ok(form)
    }

    pub fn take_file(&mut self) -> Option<Upload> {
        self.file.take()
    }

    /// Trimmed text value; blank counts as absent.
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    pub fn parse<T: FromStr>(&self, name: &str) -> AppResult<Option<T>> {
        self.text(name)
            .map(|value| {
                value
                    .parse()
                    .map_err(|_| AppError::bad_request(format!("{name} must be a number")))
            })
            .transpose()
    }

    pub fn date(&self, name: &str) -> AppResult<Option<NaiveDate>> {
        self.text(name)
            .map(|value| {
                NaiveDate::parse_from_str(&value, "%Y-%m-%d")
                    .map_err(|_| AppError::bad_request(format!("{name} must be a YYYY-MM-DD date")))
            })
            .transpose()
    }

    #[cfg(test)]
    fn with_fields(pairs: &[(&str, &str)]) -> Self {
        Self {
            fields: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_absent() {
        let form = MultipartForm::with_fields(&[("title", "  "), ("note", " kept ")]);
        assert_eq!(form.text("title"), None);
        assert_eq!(form.text("note").as_deref(), Some("kept"));
        assert_eq!(form.text("missing"), None);
    }

    #[test]
    fn numbers_and_dates_are_parsed() {
        let form = MultipartForm::with_fields(&[
            ("academic_year", "2023"),
            ("date_of_birth", "1990-02-14"),
            ("years_of_service", "ten"),
        ]);
        assert_eq!(form.parse::<i32>("academic_year").unwrap(), Some(2023));
        assert_eq!(
            form.date("date_of_birth").unwrap(),
            NaiveDate::from_ymd_opt(1990, 2, 14)
        );
        assert!(form.parse::<i32>("years_of_service").is_err());
        assert_eq!(form.parse::<i32>("teacher_code").unwrap(), None);
    }
}
