//! Video-host boundary.
//!
//! The host exposes asset metadata (transcode status, privacy hash,
//! thumbnail, duration) and hands out direct upload endpoints. Nothing in
//! here touches local rows; callers decide what to persist.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::errors::AppError;

#[derive(Clone, Debug)]
pub struct VimeoClient {
    http_client: Client,
    base_url: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct VideoResponse {
    uri: String,
    status: String,
    duration: Option<i32>,
    pictures: Option<Pictures>,
}

#[derive(Debug, Deserialize)]
struct Pictures {
    base_link: Option<String>,
}

/// Host-side view of a video, reduced to the fields scheduling cares about.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub video_id: String,
    pub privacy_hash: Option<String>,
    pub status: String,
    pub duration_seconds: Option<i32>,
    pub thumbnail_url: Option<String>,
}

impl VideoInfo {
    /// A video is playable once the host reports it available.
    pub fn is_published(&self) -> bool {
        self.status == "available"
    }
}

#[derive(Debug, Serialize)]
struct CreateUploadRequest {
    name: String,
    upload: UploadParams,
}

#[derive(Debug, Serialize)]
struct UploadParams {
    approach: String,
    size: i64,
}

#[derive(Debug, Deserialize)]
struct CreateUploadResponse {
    uri: String,
    upload: UploadInfo,
}

#[derive(Debug, Deserialize)]
struct UploadInfo {
    upload_link: String,
}

/// A freshly created host asset plus the endpoint the client uploads to.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
    pub video_id: String,
    pub privacy_hash: Option<String>,
    pub upload_link: String,
}

impl VimeoClient {
    pub fn new(base_url: String, access_token: String) -> Self {
        Self {
            http_client: Client::new(),
            base_url,
            access_token,
        }
    }

    #[tracing::instrument(name = "vimeo_get_video", skip(self))]
    pub async fn get_video(&self, video_id: &str) -> Result<VideoInfo, AppError> {
        let url = Url::parse(&format!("{}/videos/{}", self.base_url, video_id))
            .map_err(|e| AppError::Unexpected(anyhow::anyhow!(e).context("Bad video host URL")))?;

        let response = self
            .http_client
            .get(url)
            .bearer_auth(&self.access_token)
            .header("Accept", "application/vnd.vimeo.*+json;version=3.4")
            .send()
            .await?
            .error_for_status()?;

        let body: VideoResponse = response.json().await?;

        let (video_id, privacy_hash) = parse_video_uri(&body.uri).ok_or_else(|| {
            AppError::ExternalService(anyhow::anyhow!(
                "Video host returned an unparseable uri: {}",
                body.uri
            ))
        })?;

        info!("Fetched host metadata for video {}", video_id);

        Ok(VideoInfo {
            video_id,
            privacy_hash,
            status: body.status,
            duration_seconds: body.duration,
            thumbnail_url: body.pictures.and_then(|p| p.base_link),
        })
    }

    #[tracing::instrument(name = "vimeo_create_upload", skip(self))]
    pub async fn create_upload(&self, name: &str, size: i64) -> Result<UploadTicket, AppError> {
        let url = Url::parse(&format!("{}/me/videos", self.base_url))
            .map_err(|e| AppError::Unexpected(anyhow::anyhow!(e).context("Bad video host URL")))?;

        let request_body = CreateUploadRequest {
            name: name.to_string(),
            upload: UploadParams {
                approach: "tus".to_string(),
                size,
            },
        };

        let response = self
            .http_client
            .post(url)
            .bearer_auth(&self.access_token)
            .header("Accept", "application/vnd.vimeo.*+json;version=3.4")
            .json(&request_body)
            .send()
            .await?
            .error_for_status()?;

        let body: CreateUploadResponse = response.json().await?;

        let (video_id, privacy_hash) = parse_video_uri(&body.uri).ok_or_else(|| {
            AppError::ExternalService(anyhow::anyhow!(
                "Video host returned an unparseable uri: {}",
                body.uri
            ))
        })?;

        info!("Created host upload slot for video {}", video_id);

        Ok(UploadTicket {
            video_id,
            privacy_hash,
            upload_link: body.upload.upload_link,
        })
    }
}

/// Extracts the numeric identifier and optional privacy hash from a host
/// video uri such as `/videos/123456789` or `/videos/123456789:ab12cd`.
pub fn parse_video_uri(uri: &str) -> Option<(String, Option<String>)> {
    let rest = uri.strip_prefix("/videos/")?;
    let mut parts = rest.splitn(2, ':');
    let id = parts.next()?.trim();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hash = parts
        .next()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string);
    Some((id.to_string(), hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_video_uri() {
        assert_eq!(
            parse_video_uri("/videos/123456789"),
            Some(("123456789".to_string(), None))
        );
    }

    #[test]
    fn parses_uri_with_privacy_hash() {
        assert_eq!(
            parse_video_uri("/videos/123456789:ab12cd"),
            Some(("123456789".to_string(), Some("ab12cd".to_string())))
        );
    }

    #[test]
    fn rejects_non_video_uris() {
        assert_eq!(parse_video_uri("/users/42"), None);
        assert_eq!(parse_video_uri("/videos/"), None);
        assert_eq!(parse_video_uri("/videos/not-a-number"), None);
    }

    #[test]
    fn empty_hash_is_treated_as_absent() {
        assert_eq!(
            parse_video_uri("/videos/99:"),
            Some(("99".to_string(), None))
        );
    }
}
