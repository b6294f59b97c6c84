use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }

    /// Infer from a MIME content type. Anything that is not video counts as
    /// an image.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct) if ct.starts_with("video/") => MediaType::Video,
            _ => MediaType::Image,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MediaAsset {
    pub id: i64,
    pub content_item_id: i64,
    pub file_url: String,
    pub media_type: String,
    pub display_order: i32,
    pub uploaded_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AttachMedia {
    #[validate(length(min = 1, message = "File URL is required"))]
    pub file_url: String,
    pub content_type: Option<String>,
    pub display_order: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_mime_types_map_to_video() {
        assert_eq!(
            MediaType::from_content_type(Some("video/mp4")),
            MediaType::Video
        );
        assert_eq!(
            MediaType::from_content_type(Some("video/quicktime")),
            MediaType::Video
        );
    }

    #[test]
    fn everything_else_defaults_to_image() {
        assert_eq!(
            MediaType::from_content_type(Some("image/png")),
            MediaType::Image
        );
        assert_eq!(
            MediaType::from_content_type(Some("application/octet-stream")),
            MediaType::Image
        );
        assert_eq!(MediaType::from_content_type(None), MediaType::Image);
    }
}
