use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use futures_util::StreamExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use alumnet_types::api::UploadResponse;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};
use crate::session::CurrentUser;
use crate::storage::{StorageError, content_type, normalize_path};

pub const PROFILE_PHOTOS: &str = "profilePhotos";
pub const UPLOADS: &str = "uploads";

/// POST /files/{*path}: raw request body is the object.
///
/// `profilePhotos/{own id}` overwrites the caller's photo. Anything under
/// `uploads/` gets a unique prefix on its last segment so attachments never
/// clobber each other; the stored path comes back in the response.
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(path): Path<String>,
    bytes: Bytes,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    if bytes.is_empty() {
        return Err(ApiError::InvalidInput("empty upload".into()));
    }

    let path = authorize_upload(&path, &user.id)?;
    let size = bytes.len() as u64;

    let progress = state.objects.upload(&path, bytes)?;
    let mut progress = std::pin::pin!(progress);
    let mut sha256 = None;
    while let Some(step) = progress.next().await {
        let step = step.inspect_err(|e| error!("Upload of {} failed: {}", path, e))?;
        debug!(
            "Upload {}: {}/{} bytes",
            path, step.bytes_transferred, step.total_bytes
        );
        if step.is_complete() {
            sha256 = step.sha256;
        }
    }
    let sha256 = sha256.ok_or(ApiError::Internal)?;

    let url = state.objects.download_url(&path)?;
    info!("User {} uploaded {} ({} bytes)", user.id, path, size);

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            path,
            size,
            sha256,
            url,
        }),
    ))
}

/// GET /files/{*path}: public, so stored URLs work in plain `<img>` tags.
pub async fn download_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let bytes = state.objects.read(&path).await.inspect_err(|e| {
        if matches!(e, StorageError::NotFound(_)) {
            debug!("Download of missing object {}", path);
        }
    })?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type(&path))],
        bytes,
    ))
}

/// Checks where a user may write and returns the normalized target path.
pub fn authorize_upload(path: &str, user_id: &str) -> ApiResult<String> {
    let path = normalize_path(path)?;
    let segments: Vec<&str> = path.split('/').collect();

    match segments.as_slice() {
        [PROFILE_PHOTOS, owner] if *owner == user_id => Ok(path),
        [UPLOADS, dirs @ .., name] if !name.is_empty() => {
            let mut target = vec![UPLOADS.to_string()];
            target.extend(dirs.iter().map(|d| d.to_string()));
            target.push(format!("{}_{}", Uuid::new_v4().simple(), name));
            Ok(target.join("/"))
        }
        _ => {
            warn!("User {} may not write to {}", user_id, path);
            Err(ApiError::Forbidden)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn upload_locations() {
        assert_eq!(authorize_upload("profilePhotos/u1", "u1").unwrap(), "profilePhotos/u1");
        assert!(matches!(
            authorize_upload("profilePhotos/u2", "u1"),
            Err(ApiError::Forbidden)
        ));
        assert!(matches!(
            authorize_upload("profilePhotos/u1/extra", "u1"),
            Err(ApiError::Forbidden)
        ));
        assert!(matches!(authorize_upload("secrets/key", "u1"), Err(ApiError::Forbidden)));
        assert!(matches!(authorize_upload("uploads", "u1"), Err(ApiError::Forbidden)));
        assert!(matches!(
            authorize_upload("uploads/../x", "u1"),
            Err(ApiError::InvalidInput(_))
        ));

        let a = authorize_upload("uploads/flyer.pdf", "u1").unwrap();
        let b = authorize_upload("uploads/flyer.pdf", "u1").unwrap();
        assert!(a.starts_with("uploads/") && a.ends_with("_flyer.pdf"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn upload_then_download() {
        let (state, _dir) = testing::state();
        let ada = testing::user(&state, "Ada Lovelace", "ada@example.org").await;
        let path = format!("profilePhotos/{}", ada.id);

        let (status, Json(uploaded)) = upload_file(
            State(state.clone()),
            Extension(ada.clone()),
            Path(path.clone()),
            Bytes::from_static(b"\x89PNG fake"),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(uploaded.path, path);
        assert_eq!(uploaded.size, 9);
        assert_eq!(uploaded.url, format!("http://localhost:3000/files/{}", path));
        assert_eq!(uploaded.sha256.len(), 64);

        let response = download_file(State(state.clone()), Path(path))
            .await
            .unwrap()
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);

        assert!(matches!(
            download_file(State(state), Path("uploads/missing.png".into())).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn rejects_empty_and_oversized() {
        let (state, _dir) = testing::state();
        let ada = testing::user(&state, "Ada Lovelace", "ada@example.org").await;

        let empty = upload_file(
            State(state.clone()),
            Extension(ada.clone()),
            Path("uploads/a.txt".into()),
            Bytes::new(),
        )
        .await;
        assert!(matches!(empty, Err(ApiError::InvalidInput(_))));

        let big = upload_file(
            State(state.clone()),
            Extension(ada),
            Path("uploads/big.bin".into()),
            Bytes::from(vec![0u8; state.objects.max_size() + 1]),
        )
        .await;
        assert!(matches!(big, Err(ApiError::PayloadTooLarge)));
    }
}
