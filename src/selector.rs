//! Per-request transport selection.
//!
//! Resolves attached media into request contents (inline bytes or a file
//! reference) and picks the transport that will carry the generation call.

use crate::ai::gemini::types::{Content, Part};
use crate::ai::mime::is_inline_mime;
use crate::ai::{MediaUploader, ProxyUpload};
use crate::models::{MediaOutcome, MediaReference};
use crate::{Error, Result};
use base64::Engine as _;
use std::path::Path;

/// Largest payload embedded directly in a request.
pub const INLINE_LIMIT_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Direct,
    Proxy,
}

/// Request contents ready for the retry loop.
#[derive(Debug, Clone)]
pub struct ResolvedRequest {
    pub route: Route,
    pub contents: Vec<Content>,
    pub upload: Option<ProxyUpload>,
    pub media: MediaOutcome,
}

impl ResolvedRequest {
    pub fn has_media(&self) -> bool {
        self.media != MediaOutcome::None
    }
}

pub struct TransportSelector<'a> {
    pub direct_available: bool,
    pub proxy_available: bool,
    pub uploader: Option<&'a dyn MediaUploader>,
}

/// Prepend a part to the first user turn, or open one.
fn attach_part(mut contents: Vec<Content>, part: Part) -> Vec<Content> {
    match contents
        .iter_mut()
        .find(|c| c.role.as_deref().unwrap_or("user") == "user")
    {
        Some(content) => content.parts.insert(0, part),
        None => contents.insert(
            0,
            Content {
                role: Some("user".to_string()),
                parts: vec![part],
            },
        ),
    }
    contents
}

fn inline_eligible(mime_type: &str, size: u64) -> bool {
    is_inline_mime(mime_type) && size <= INLINE_LIMIT_BYTES
}

impl<'a> TransportSelector<'a> {
    fn base_route(&self, prefer_direct: bool) -> Result<Route> {
        match (self.direct_available, self.proxy_available) {
            (true, _) if prefer_direct => Ok(Route::Direct),
            (_, true) => Ok(Route::Proxy),
            (true, false) => Ok(Route::Direct),
            (false, false) => Err(Error::NoTransportAvailable(
                "neither a proxy nor a direct credential is configured".to_string(),
            )),
        }
    }

    fn direct_upload_available(&self) -> Option<&'a dyn MediaUploader> {
        if self.direct_available {
            self.uploader
        } else {
            None
        }
    }

    pub async fn resolve(
        &self,
        contents: Vec<Content>,
        media: Option<&MediaReference>,
        prefer_direct: bool,
    ) -> Result<ResolvedRequest> {
        let route = self.base_route(prefer_direct)?;

        let Some(media) = media else {
            return Ok(ResolvedRequest {
                route,
                contents,
                upload: None,
                media: MediaOutcome::None,
            });
        };

        match media {
            MediaReference::FileHandle { uri, mime_type, .. } => Ok(ResolvedRequest {
                route,
                contents: attach_part(contents, Part::file(mime_type.clone(), uri.clone())),
                upload: None,
                media: MediaOutcome::FileHandle,
            }),
            MediaReference::InlineBytes { data, mime_type }
            | MediaReference::RawBytesForUpload {
                data, mime_type, ..
            } => {
                if data.is_empty() {
                    return Err(Error::NoTransportAvailable(
                        "media payload has no bytes".to_string(),
                    ));
                }
                if inline_eligible(mime_type, data.len() as u64) {
                    return Ok(Self::inline(route, contents, mime_type, data));
                }
                self.upload_in_memory(contents, data, mime_type, media.file_name())
                    .await
            }
            MediaReference::LocalFile {
                path,
                mime_type,
                file_name,
            } => {
                self.resolve_local_file(route, contents, path, mime_type, file_name)
                    .await
            }
        }
    }

    fn inline(route: Route, contents: Vec<Content>, mime_type: &str, data: &[u8]) -> ResolvedRequest {
        tracing::info!("Embedding {} bytes of {} inline", data.len(), mime_type);
        ResolvedRequest {
            route,
            contents: attach_part(contents, Part::inline_bytes(mime_type, data)),
            upload: None,
            media: MediaOutcome::Inline,
        }
    }

    fn proxy_upload(
        contents: Vec<Content>,
        data: &[u8],
        mime_type: &str,
        file_name: &str,
        outcome: MediaOutcome,
    ) -> ResolvedRequest {
        tracing::info!(
            "Sending {} ({} bytes) through proxy upload ({:?})",
            file_name,
            data.len(),
            outcome
        );
        ResolvedRequest {
            route: Route::Proxy,
            contents,
            upload: Some(ProxyUpload {
                data: base64::engine::general_purpose::STANDARD.encode(data),
                mime_type: mime_type.to_string(),
                file_name: file_name.to_string(),
            }),
            media: outcome,
        }
    }

    async fn direct_upload(
        uploader: &dyn MediaUploader,
        contents: Vec<Content>,
        data: &[u8],
        mime_type: &str,
        file_name: &str,
    ) -> Result<ResolvedRequest> {
        let record = uploader.upload_and_activate(data, mime_type, file_name).await?;
        tracing::info!("Direct upload {} ready at {}", record.name, record.uri);
        Ok(ResolvedRequest {
            route: Route::Direct,
            contents: attach_part(contents, Part::file(record.mime_type, record.uri)),
            upload: None,
            media: MediaOutcome::DirectUpload,
        })
    }

    async fn upload_in_memory(
        &self,
        contents: Vec<Content>,
        data: &[u8],
        mime_type: &str,
        file_name: &str,
    ) -> Result<ResolvedRequest> {
        if self.proxy_available {
            return Ok(Self::proxy_upload(
                contents,
                data,
                mime_type,
                file_name,
                MediaOutcome::ProxyUpload,
            ));
        }
        match self.direct_upload_available() {
            Some(uploader) => {
                Self::direct_upload(uploader, contents, data, mime_type, file_name).await
            }
            None => Err(Error::NoTransportAvailable(format!(
                "{} ({} bytes) needs an upload but no upload path is configured",
                file_name,
                data.len()
            ))),
        }
    }

    async fn resolve_local_file(
        &self,
        route: Route,
        contents: Vec<Content>,
        path: &Path,
        mime_type: &str,
        file_name: &str,
    ) -> Result<ResolvedRequest> {
        let size = tokio::fs::metadata(path).await?.len();
        if inline_eligible(mime_type, size) {
            let data = tokio::fs::read(path).await?;
            return Ok(Self::inline(route, contents, mime_type, &data));
        }

        let Some(uploader) = self.direct_upload_available() else {
            let data = tokio::fs::read(path).await?;
            return self
                .upload_in_memory(contents, &data, mime_type, file_name)
                .await;
        };

        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(
                    outcome = "direct_upload_failed_no_bytes",
                    "Could not read {} for direct upload; no bytes for proxy fallback: {}",
                    path.display(),
                    e
                );
                return Err(e.into());
            }
        };

        match Self::direct_upload(uploader, contents.clone(), &data, mime_type, file_name).await {
            Ok(resolved) => Ok(resolved),
            Err(e) if self.proxy_available => {
                tracing::warn!(
                    outcome = "proxy_fallback",
                    "Direct upload of {} failed ({}); retrying through proxy",
                    file_name,
                    e
                );
                Ok(Self::proxy_upload(
                    contents,
                    &data,
                    mime_type,
                    file_name,
                    MediaOutcome::ProxyFallback,
                ))
            }
            Err(e) => {
                tracing::error!(
                    outcome = "direct_upload_failed",
                    "Direct upload of {} failed with no proxy to fall back to: {}",
                    file_name,
                    e
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::mock::{MockUploadOutcome, MockUploader};
    use std::io::Write;

    fn prompt() -> Vec<Content> {
        vec![Content {
            role: Some("user".to_string()),
            parts: vec![Part::text("what is this?")],
        }]
    }

    fn selector<'a>(
        direct: bool,
        proxy: bool,
        uploader: Option<&'a dyn MediaUploader>,
    ) -> TransportSelector<'a> {
        TransportSelector {
            direct_available: direct,
            proxy_available: proxy,
            uploader,
        }
    }

    fn temp_media(len: usize, suffix: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(&vec![7u8; len]).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_no_media_uses_proxy_by_default() {
        let resolved = selector(true, true, None)
            .resolve(prompt(), None, false)
            .await
            .unwrap();
        assert_eq!(resolved.route, Route::Proxy);
        assert_eq!(resolved.media, MediaOutcome::None);
    }

    #[tokio::test]
    async fn test_prefer_direct_is_honored_when_available() {
        let resolved = selector(true, true, None)
            .resolve(prompt(), None, true)
            .await
            .unwrap();
        assert_eq!(resolved.route, Route::Direct);

        let resolved = selector(false, true, None)
            .resolve(prompt(), None, true)
            .await
            .unwrap();
        assert_eq!(resolved.route, Route::Proxy);
    }

    #[tokio::test]
    async fn test_no_transport_fails_before_network() {
        let err = selector(false, false, None)
            .resolve(prompt(), None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoTransportAvailable(_)));
    }

    #[tokio::test]
    async fn test_small_image_is_inlined_before_text() {
        let media = MediaReference::RawBytesForUpload {
            data: vec![0xFF, 0xD8, 0xFF, 0xE0],
            mime_type: "image/jpeg".to_string(),
            file_name: "photo.jpg".to_string(),
        };
        let uploader = MockUploader::new();
        let resolved = selector(true, true, Some(&uploader))
            .resolve(prompt(), Some(&media), false)
            .await
            .unwrap();

        assert_eq!(resolved.media, MediaOutcome::Inline);
        assert!(resolved.upload.is_none());
        assert!(matches!(resolved.contents[0].parts[0], Part::InlineData { .. }));
        assert!(matches!(resolved.contents[0].parts[1], Part::Text { .. }));
        assert_eq!(uploader.get_call_count(), 0);
    }

    #[tokio::test]
    async fn test_video_bytes_go_through_proxy_upload() {
        let media = MediaReference::RawBytesForUpload {
            data: vec![1, 2, 3],
            mime_type: "video/mp4".to_string(),
            file_name: "clip.mp4".to_string(),
        };
        let uploader = MockUploader::new();
        let resolved = selector(true, true, Some(&uploader))
            .resolve(prompt(), Some(&media), true)
            .await
            .unwrap();

        assert_eq!(resolved.route, Route::Proxy);
        assert_eq!(resolved.media, MediaOutcome::ProxyUpload);
        assert_eq!(resolved.upload.unwrap().data, "AQID");
        assert_eq!(resolved.contents, prompt());
        assert_eq!(uploader.get_call_count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_inline_bytes_without_proxy_use_direct_upload() {
        let media = MediaReference::InlineBytes {
            data: vec![0; (INLINE_LIMIT_BYTES + 1) as usize],
            mime_type: "image/png".to_string(),
        };
        let uploader = MockUploader::new();
        let resolved = selector(true, false, Some(&uploader))
            .resolve(prompt(), Some(&media), false)
            .await
            .unwrap();

        assert_eq!(resolved.route, Route::Direct);
        assert_eq!(resolved.media, MediaOutcome::DirectUpload);
        assert_eq!(uploader.get_call_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_bytes_have_no_transport() {
        let media = MediaReference::RawBytesForUpload {
            data: Vec::new(),
            mime_type: "video/mp4".to_string(),
            file_name: "clip.mp4".to_string(),
        };
        let err = selector(true, true, None)
            .resolve(prompt(), Some(&media), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoTransportAvailable(_)));
    }

    #[tokio::test]
    async fn test_file_handle_is_referenced() {
        let media = MediaReference::FileHandle {
            uri: "https://files/xyz".to_string(),
            mime_type: "video/mp4".to_string(),
            file_name: "clip.mp4".to_string(),
        };
        let resolved = selector(false, true, None)
            .resolve(prompt(), Some(&media), false)
            .await
            .unwrap();
        assert_eq!(resolved.media, MediaOutcome::FileHandle);
        assert_eq!(
            resolved.contents[0].parts[0],
            Part::file("video/mp4", "https://files/xyz")
        );
    }

    #[tokio::test]
    async fn test_local_video_uses_direct_upload() {
        let file = temp_media(64, ".mp4");
        let media = MediaReference::LocalFile {
            path: file.path().to_path_buf(),
            mime_type: "video/mp4".to_string(),
            file_name: "clip.mp4".to_string(),
        };
        let uploader = MockUploader::new();
        let resolved = selector(true, true, Some(&uploader))
            .resolve(prompt(), Some(&media), false)
            .await
            .unwrap();

        assert_eq!(resolved.route, Route::Direct);
        assert_eq!(resolved.media, MediaOutcome::DirectUpload);
        assert_eq!(
            uploader.uploads(),
            vec![("clip.mp4".to_string(), "video/mp4".to_string(), 64)]
        );
        assert!(matches!(
            &resolved.contents[0].parts[0],
            Part::FileData { file_data } if file_data.file_uri == "https://mock.files/files/mock-1"
        ));
    }

    #[tokio::test]
    async fn test_failed_direct_upload_falls_back_to_proxy() {
        let file = temp_media(64, ".mp4");
        let media = MediaReference::LocalFile {
            path: file.path().to_path_buf(),
            mime_type: "video/mp4".to_string(),
            file_name: "clip.mp4".to_string(),
        };
        let uploader = MockUploader::new().with_outcome(MockUploadOutcome::Rejected {
            status: 500,
            body: "boom".to_string(),
        });
        let resolved = selector(true, true, Some(&uploader))
            .resolve(prompt(), Some(&media), false)
            .await
            .unwrap();

        assert_eq!(resolved.route, Route::Proxy);
        assert_eq!(resolved.media, MediaOutcome::ProxyFallback);
        assert_eq!(resolved.contents, prompt());
        assert!(resolved.upload.is_some());
    }

    #[tokio::test]
    async fn test_failed_direct_upload_without_proxy_surfaces_error() {
        let file = temp_media(64, ".mp4");
        let media = MediaReference::LocalFile {
            path: file.path().to_path_buf(),
            mime_type: "video/mp4".to_string(),
            file_name: "clip.mp4".to_string(),
        };
        let uploader = MockUploader::new().with_outcome(MockUploadOutcome::TimedOut);
        let err = selector(true, false, Some(&uploader))
            .resolve(prompt(), Some(&media), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UploadTimeout { .. }));
    }

    #[tokio::test]
    async fn test_unreadable_local_file_is_a_hard_failure() {
        let media = MediaReference::LocalFile {
            path: "/nonexistent/clip.mp4".into(),
            mime_type: "video/mp4".to_string(),
            file_name: "clip.mp4".to_string(),
        };
        let uploader = MockUploader::new();
        let err = selector(true, true, Some(&uploader))
            .resolve(prompt(), Some(&media), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(uploader.get_call_count(), 0);
    }

    #[tokio::test]
    async fn test_small_local_image_is_inlined() {
        let file = temp_media(1024, ".jpg");
        let media = MediaReference::LocalFile {
            path: file.path().to_path_buf(),
            mime_type: "image/jpeg".to_string(),
            file_name: "photo.jpg".to_string(),
        };
        let uploader = MockUploader::new();
        let resolved = selector(true, true, Some(&uploader))
            .resolve(prompt(), Some(&media), false)
            .await
            .unwrap();
        assert_eq!(resolved.media, MediaOutcome::Inline);
        assert_eq!(uploader.get_call_count(), 0);
    }
}
