use crate::{
    errors::{AppError, AppResult},
    guard::{ContainedPath, PathGuard, StoredFile, Uploads},
    services::content_type_for,
    store::{User, UserRepository},
};
use std::{path::Path, sync::Arc};

pub struct Picture {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

pub struct ProfilePictures {
    guard: PathGuard<Uploads>,
    users: Arc<dyn UserRepository>,
    api_base_url: String,
}

impl ProfilePictures {
    pub fn new(guard: PathGuard<Uploads>, users: Arc<dyn UserRepository>, api_base_url: impl Into<String>) -> Self {
        Self { guard, users, api_base_url: api_base_url.into() }
    }

    /// Writes an uploaded body under a fresh name inside the uploads root and
    /// makes it the user's picture.
    pub async fn upload(&self, user_id: &str, client_name: Option<&str>, bytes: &[u8]) -> AppResult<String> {
        self.user(user_id).await?;
        let target = self.guard.resolve(upload_file_name(client_name))?;
        tokio::fs::write(target.as_path(), bytes).await?;
        match self.save(user_id, target.clone()).await {
            Ok(url) => Ok(url),
            Err(e) => {
                remove_best_effort(target.as_path()).await;
                Err(e)
            }
        }
    }

    /// Replaces the stored picture reference with `upload`, removing the
    /// previous file first. Returns the public URL of the new picture.
    pub async fn save(&self, user_id: &str, upload: ContainedPath<Uploads>) -> AppResult<String> {
        let user = self.user(user_id).await?;
        self.discard(user_id, &user.picture, Some(upload.as_path())).await;
        let file_name = upload
            .as_path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::BadRequest("upload has no file name".into()))?;
        self.users.set_picture(user_id, StoredFile::Present(upload.into_path_buf())).await?;
        tracing::info!(user_id, file = %file_name, "profile picture saved");
        Ok(format!("{}/uploads/{}", self.api_base_url.trim_end_matches('/'), file_name))
    }

    pub async fn load(&self, user_id: &str) -> AppResult<Picture> {
        let user = self.user(user_id).await?;
        let path = self.guard.resolve_stored(&user.picture)?.ok_or(AppError::NotFound)?;
        let bytes = tokio::fs::read(path.as_path()).await?;
        Ok(Picture { bytes, content_type: content_type_for(path.as_path()) })
    }

    /// Removes the file (best effort) and then clears the stored reference.
    pub async fn delete(&self, user_id: &str) -> AppResult<()> {
        let user = self.user(user_id).await?;
        if user.picture == StoredFile::Absent {
            return Err(AppError::NotFound);
        }
        self.discard(user_id, &user.picture, None).await;
        self.users.set_picture(user_id, StoredFile::Absent).await?;
        tracing::info!(user_id, "profile picture deleted");
        Ok(())
    }

    /// Removes the file behind a stored reference unless it is `keep`. A
    /// reference outside the uploads root is never touched on disk, but it
    /// must not stop the record from being replaced or cleared.
    async fn discard(&self, user_id: &str, stored: &StoredFile, keep: Option<&Path>) {
        match self.guard.resolve_stored(stored) {
            Ok(Some(previous)) if Some(previous.as_path()) != keep => {
                remove_best_effort(previous.as_path()).await;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(user_id, code = e.code(), "stored picture reference rejected, skipping removal");
            }
        }
    }

    async fn user(&self, user_id: &str) -> AppResult<User> {
        self.users.find_user(user_id).await?.ok_or(AppError::NotFound)
    }
}

/// `<uuid>.<ext>`, keeping the client's extension only when it is short and
/// alphanumeric.
pub fn upload_file_name(client_name: Option<&str>) -> String {
    let id = uuid::Uuid::new_v4();
    let ext = client_name
        .and_then(|n| Path::new(n).extension())
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase);
    match ext {
        Some(ext) => format!("{id}.{ext}"),
        None => id.to_string(),
    }
}

async fn remove_best_effort(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "stale picture not removed");
    }
}
