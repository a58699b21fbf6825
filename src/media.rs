use axum::extract::{Extension, Multipart};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use sqlx::PgPool;
use tokio::{fs, io::AsyncWriteExt};
use tracing::error;
use uuid::Uuid;

use crate::config;
use crate::error::{AppError, AppResult};
use crate::extractor::AdminUser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    Image,
    Video,
}

#[derive(Serialize)]
pub struct MediaInfo {
    pub id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub url: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

fn classify(content_type: &str) -> Option<(MediaKind, &'static str)> {
    match content_type {
        "image/jpeg" => Some((MediaKind::Image, "jpg")),
        "image/png" => Some((MediaKind::Image, "png")),
        "image/webp" => Some((MediaKind::Image, "webp")),
        "video/mp4" => Some((MediaKind::Video, "mp4")),
        "video/quicktime" => Some((MediaKind::Video, "mov")),
        _ => None,
    }
}

fn check_limits(kind: MediaKind, size: usize, duration_seconds: Option<u32>) -> AppResult<()> {
    match kind {
        MediaKind::Image => {
            if size > *config::MEDIA_IMAGE_MAX_BYTES {
                return Err(AppError::BadRequest(format!(
                    "Image exceeds {} byte limit",
                    *config::MEDIA_IMAGE_MAX_BYTES
                )));
            }
        }
        MediaKind::Video => {
            if size > *config::MEDIA_VIDEO_MAX_BYTES {
                return Err(AppError::BadRequest(format!(
                    "Video exceeds {} byte limit",
                    *config::MEDIA_VIDEO_MAX_BYTES
                )));
            }
            // The uploader reports the duration it read off the player; the
            // container itself is not decoded here.
            let duration = duration_seconds.ok_or_else(|| {
                AppError::BadRequest("duration_seconds required for video uploads".into())
            })?;
            if duration > *config::MEDIA_VIDEO_MAX_SECONDS {
                return Err(AppError::BadRequest(format!(
                    "Video exceeds {} second limit",
                    *config::MEDIA_VIDEO_MAX_SECONDS
                )));
            }
        }
    }
    Ok(())
}

pub async fn upload_media(
    Extension(pool): Extension<PgPool>,
    _admin: AdminUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<MediaInfo>)> {
    let mut duration_seconds: Option<u32> = None;
    let mut file: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.unwrap_or(None) {
        match field.name() {
            Some("duration_seconds") => {
                let text = field.text().await.map_err(|e| {
                    error!(?e, "Failed reading duration field");
                    AppError::BadRequest("Unreadable duration field".into())
                })?;
                duration_seconds = Some(
                    text.trim()
                        .parse::<u32>()
                        .map_err(|_| AppError::BadRequest("duration_seconds must be a number".into()))?,
                );
            }
            _ => {
                let file_name = field
                    .file_name()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "upload.bin".into());
                let content_type = field
                    .content_type()
                    .map(|ct| ct.to_string())
                    .unwrap_or_default();
                let data = field.bytes().await.map_err(|e| {
                    error!(?e, "Failed reading upload field");
                    AppError::BadRequest("Read error".into())
                })?;
                file = Some((file_name, content_type, data.to_vec()));
            }
        }
    }

    let (file_name, content_type, data) = file.ok_or_else(|| AppError::BadRequest("No file".into()))?;
    let (kind, extension) = classify(&content_type).ok_or_else(|| {
        AppError::BadRequest(format!("Unsupported media type '{content_type}'"))
    })?;
    check_limits(kind, data.len(), duration_seconds)?;

    let id = Uuid::new_v4();
    let stored_name = format!("{id}.{extension}");
    let dir = config::MEDIA_ROOT.as_str();
    if fs::create_dir_all(dir).await.is_err() {
        return Err(AppError::Message("Failed to create media dir".into()));
    }
    let path = format!("{dir}/{stored_name}");
    let mut f = fs::File::create(&path).await.map_err(|e| {
        error!(?e, "Failed creating media file");
        AppError::Message("Write error".into())
    })?;
    f.write_all(&data).await.map_err(|e| {
        error!(?e, "Failed writing media file");
        AppError::Message("Write error".into())
    })?;

    let url = format!("{}/{stored_name}", config::MEDIA_PUBLIC_BASE_URL.as_str());
    let created_at: chrono::DateTime<chrono::Utc> = sqlx::query_scalar(
        r#"
        INSERT INTO media_uploads (id, file_name, content_type, size_bytes, path, url)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING created_at
        "#,
    )
    .bind(id)
    .bind(&file_name)
    .bind(&content_type)
    .bind(data.len() as i64)
    .bind(&path)
    .bind(&url)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error recording media upload");
        AppError::Db(e)
    })?;

    Ok((
        StatusCode::CREATED,
        Json(MediaInfo {
            id,
            file_name,
            content_type,
            size_bytes: data.len() as i64,
            url,
            created_at,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_types_classified() {
        assert_eq!(classify("image/png").unwrap().0, MediaKind::Image);
        assert_eq!(classify("video/quicktime").unwrap().1, "mov");
        assert!(classify("application/pdf").is_none());
        assert!(classify("image/gif").is_none());
    }

    #[test]
    fn image_size_cap_applies() {
        let over = *config::MEDIA_IMAGE_MAX_BYTES + 1;
        assert!(check_limits(MediaKind::Image, over, None).is_err());
        assert!(check_limits(MediaKind::Image, 1024, None).is_ok());
    }

    #[test]
    fn video_requires_declared_duration_under_cap() {
        assert!(check_limits(MediaKind::Video, 1024, None).is_err());
        let over = *config::MEDIA_VIDEO_MAX_SECONDS + 1;
        assert!(check_limits(MediaKind::Video, 1024, Some(over)).is_err());
        assert!(check_limits(MediaKind::Video, 1024, Some(30)).is_ok());
    }
}
