use rand::Rng;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::error::ApiError;

/// URL prefix media references are served under.
pub const SERVE_PREFIX: &str = "/uploads/";

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "avi", "mkv"];
const AVATAR_COUNT: u32 = 7;

/// Store an uploaded file under the configured media directory and return
/// its serving reference (`/uploads/<generated name>`).
pub async fn save_media(original_name: &str, bytes: &[u8]) -> Result<String, ApiError> {
    store_bytes(&Config::get().media.upload_dir, original_name, bytes).await
}

async fn store_bytes(dir: &str, original_name: &str, bytes: &[u8]) -> Result<String, ApiError> {
    let file_name = generate_file_name(original_name);

    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(Path::new(dir).join(&file_name), bytes).await?;

    Ok(format!("{SERVE_PREFIX}{file_name}"))
}

/// Delete the file backing a media reference. Remote URLs and bundled
/// default avatars are left alone. Returns whether a file was removed.
pub async fn remove_media(reference: &str) -> std::io::Result<bool> {
    match local_path(&Config::get().media.upload_dir, reference) {
        Some(path) => {
            tokio::fs::remove_file(path).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn local_path(dir: &str, reference: &str) -> Option<PathBuf> {
    let file_name = reference.strip_prefix(SERVE_PREFIX)?;
    // Reject anything that could escape the media directory
    if file_name.is_empty() || file_name.contains('/') || file_name.contains("..") {
        return None;
    }
    Some(Path::new(dir).join(file_name))
}

/// Generate a collision-resistant file name preserving the original
/// extension, lowercased.
pub fn generate_file_name(original_name: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let nonce: u32 = rand::thread_rng().gen();

    match extension(original_name) {
        Some(ext) => format!("{millis}-{nonce}.{ext}"),
        None => format!("{millis}-{nonce}"),
    }
}

fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Whether a media reference points at a video, by extension.
pub fn is_video(reference: &str) -> bool {
    extension(reference)
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Pick one of the bundled default avatars for a fresh account.
pub fn random_avatar() -> String {
    let n = rand::thread_rng().gen_range(1..=AVATAR_COUNT);
    format!("/public/avatars/avatar{n}.jpg")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_names_keep_lowercased_extension() {
        let name = generate_file_name("Holiday.JPG");
        assert!(name.ends_with(".jpg"));
    }

    #[test]
    fn generated_names_differ() {
        assert_ne!(generate_file_name("a.png"), generate_file_name("a.png"));
    }

    #[test]
    fn video_detection_by_extension() {
        assert!(is_video("/uploads/123-4.mp4"));
        assert!(is_video("/uploads/123-4.MOV"));
        assert!(is_video("clip.webm"));
        assert!(!is_video("/uploads/123-4.jpg"));
        assert!(!is_video("no-extension"));
    }

    #[test]
    fn random_avatar_stays_in_bundled_range() {
        for _ in 0..50 {
            let avatar = random_avatar();
            let n: u32 = avatar
                .trim_start_matches("/public/avatars/avatar")
                .trim_end_matches(".jpg")
                .parse()
                .unwrap();
            assert!((1..=AVATAR_COUNT).contains(&n));
        }
    }

    #[test]
    fn local_path_only_resolves_uploaded_references() {
        assert!(local_path("uploads", "/uploads/1-2.jpg").is_some());
        assert!(local_path("uploads", "https://example.com/x.jpg").is_none());
        assert!(local_path("uploads", "/public/avatars/avatar1.jpg").is_none());
        assert!(local_path("uploads", "/uploads/../secret").is_none());
        assert!(local_path("uploads", "/uploads/a/b.jpg").is_none());
    }

    #[tokio::test]
    async fn store_and_resolve_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_str().unwrap();

        let reference = store_bytes(dir_str, "cat.jpg", b"jpegdata").await.unwrap();
        assert!(reference.starts_with(SERVE_PREFIX));

        let path = local_path(dir_str, &reference).unwrap();
        let contents = tokio::fs::read(path).await.unwrap();
        assert_eq!(contents, b"jpegdata");
    }
}
