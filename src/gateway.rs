// src/gateway.rs

//! Share-target interceptor.
//!
//! Sits in front of every route. A `POST` to the share endpoint is consumed
//! here: the first file part is written to the share cache and the client is
//! sent to the landing page. Every other request passes through untouched.
//! Nothing that goes wrong in here reaches the share sheet as an error.

use crate::config::Config;
use crate::share_cache::{ShareCache, ShareCacheError, ShareSlot, SharedPayload};
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub const SHARED_MARKER: &str = "shared";

#[derive(Error, Debug)]
pub enum ShareCaptureError {
    #[error("share body rejected: {0}")]
    Rejected(#[from] MultipartRejection),
    #[error("failed to read multipart: {0}")]
    Multipart(#[from] MultipartError),
    #[error("failed to store shared file: {0}")]
    Cache(#[from] ShareCacheError),
}

/// A file-typed multipart part.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub field_name: String,
    pub file_name: Option<String>,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct ShareGateway {
    cache: Arc<dyn ShareCache>,
    endpoint: String,
    landing: String,
    split_by_kind: bool,
}

impl ShareGateway {
    pub fn new(cache: Arc<dyn ShareCache>, config: &Config) -> Self {
        Self {
            cache,
            endpoint: config.share_endpoint().to_string(),
            landing: config.share.landing.clone(),
            split_by_kind: config.share.split_by_kind,
        }
    }

    /// Method must be POST; a single trailing slash on the path is ignored.
    pub fn matches(&self, method: &Method, path: &str) -> bool {
        method == Method::POST
            && (path == self.endpoint || path.strip_suffix('/') == Some(self.endpoint.as_str()))
    }

    pub fn redirect(&self, captured: bool) -> Redirect {
        if captured {
            let sep = if self.landing.contains('?') { '&' } else { '?' };
            Redirect::to(&format!("{}{sep}{SHARED_MARKER}=true", self.landing))
        } else {
            Redirect::to(&self.landing)
        }
    }

    /// Parse the share body and store its file. `Ok(None)` means nothing was
    /// kept: no file part, an empty file, or a type that has no slot.
    pub async fn capture(&self, req: Request) -> Result<Option<ShareSlot>, ShareCaptureError> {
        let mut multipart = Multipart::from_request(req, &()).await?;
        let Some(part) = select_file_part(&mut multipart).await? else {
            info!("Share carried no file part");
            return Ok(None);
        };
        self.store(part)
    }

    pub fn store(&self, part: FilePart) -> Result<Option<ShareSlot>, ShareCaptureError> {
        let Some(slot) = ShareSlot::for_mime(&part.mime_type, self.split_by_kind) else {
            info!(mime = %part.mime_type, field = %part.field_name, "Shared file type not accepted, ignoring");
            return Ok(None);
        };
        let payload = SharedPayload::new(part.bytes, part.mime_type, part.file_name);
        self.cache.put(slot, &payload)?;
        Ok(Some(slot))
    }
}

/// Prefer a file part named `file`; share sheets disagree on field names,
/// so otherwise the first file part found is used.
pub(crate) async fn select_file_part(multipart: &mut Multipart) -> Result<Option<FilePart>, MultipartError> {
    let mut fallback: Option<FilePart> = None;

    while let Some(field) = multipart.next_field().await? {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let field_name = field.name().unwrap_or_default().to_string();
        let preferred = field_name == "file";
        if !preferred && fallback.is_some() {
            continue;
        }

        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field.bytes().await?;
        if bytes.is_empty() {
            continue;
        }

        let part = FilePart {
            field_name,
            file_name: (!file_name.is_empty()).then_some(file_name),
            mime_type,
            bytes: bytes.to_vec(),
        };
        if preferred {
            return Ok(Some(part));
        }
        fallback = Some(part);
    }

    Ok(fallback)
}

/// Middleware entry point; layer it over the whole router.
pub async fn intercept_share(
    State(gateway): State<ShareGateway>,
    req: Request,
    next: Next,
) -> Response {
    if !gateway.matches(req.method(), req.uri().path()) {
        return next.run(req).await;
    }

    let captured = match gateway.capture(req).await {
        Ok(Some(slot)) => {
            info!(slot = %slot, "Share captured");
            true
        }
        Ok(None) => false,
        Err(e) => {
            warn!(error = %e, "Share capture failed, redirecting without a file");
            false
        }
    };

    gateway.redirect(captured).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::share_cache::{BrokenShareCache, MemoryShareCache};
    use axum::Router;
    use axum::http::StatusCode;
    use axum::middleware;
    use axum::routing::{get, post};
    use axum_test::TestServer;
    use axum_test::multipart::{MultipartForm, Part};

    struct Harness {
        server: TestServer,
        cache: Arc<MemoryShareCache>,
    }

    fn harness(split_by_kind: bool) -> Harness {
        let cache = Arc::new(MemoryShareCache::new());
        let mut config = Config::default();
        config.share.split_by_kind = split_by_kind;
        let gateway = ShareGateway::new(cache.clone(), &config);

        let app = Router::new()
            .route("/dropshipper", get(|| async { "landing page" }))
            .route("/other", post(|| async { "other handler" }))
            .fallback(|| async { (StatusCode::NOT_FOUND, "not found") })
            .layer(middleware::from_fn_with_state(gateway, intercept_share));

        Harness {
            server: TestServer::new(app.into_make_service()).unwrap(),
            cache,
        }
    }

    fn pdf_part(bytes: &[u8]) -> Part {
        Part::bytes(bytes.to_vec())
            .file_name("resi.pdf")
            .mime_type("application/pdf")
    }

    #[tokio::test]
    async fn test_pdf_share_redirects_with_marker() {
        let h = harness(true);
        let pdf = b"%PDF-1.4 shipping label bytes".to_vec();

        let res = h
            .server
            .post("/upload")
            .multipart(MultipartForm::new().add_part("file", pdf_part(&pdf)))
            .await;

        assert_eq!(res.status_code(), StatusCode::SEE_OTHER);
        assert_eq!(res.header("location"), "/dropshipper?shared=true");
        let stored = h.cache.peek(ShareSlot::Pdf).unwrap().unwrap();
        assert_eq!(stored.bytes, pdf);
        assert_eq!(stored.mime_type, "application/pdf");
        assert_eq!(stored.file_name.as_deref(), Some("resi.pdf"));
    }

    #[tokio::test]
    async fn test_trailing_slash_is_intercepted() {
        let h = harness(true);
        let res = h
            .server
            .post("/upload/")
            .multipart(MultipartForm::new().add_part("file", pdf_part(b"%PDF")))
            .await;

        assert_eq!(res.status_code(), StatusCode::SEE_OTHER);
        assert_eq!(res.header("location"), "/dropshipper?shared=true");
    }

    #[tokio::test]
    async fn test_first_file_part_used_when_not_named_file() {
        let h = harness(true);
        let form = MultipartForm::new()
            .add_text("title", "Resi pesanan")
            .add_part(
                "shared_media",
                Part::bytes(b"\x89PNG photo".to_vec())
                    .file_name("photo.png")
                    .mime_type("image/png"),
            )
            .add_part("attachments", pdf_part(b"%PDF second"));

        let res = h.server.post("/upload").multipart(form).await;

        assert_eq!(res.header("location"), "/dropshipper?shared=true");
        assert_eq!(h.cache.peek(ShareSlot::Image).unwrap().unwrap().bytes, b"\x89PNG photo");
        assert!(h.cache.peek(ShareSlot::Pdf).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_part_named_file_preferred() {
        let h = harness(true);
        let form = MultipartForm::new()
            .add_part(
                "media",
                Part::bytes(b"\x89PNG".to_vec())
                    .file_name("a.png")
                    .mime_type("image/png"),
            )
            .add_part("file", pdf_part(b"%PDF preferred"));

        h.server.post("/upload").multipart(form).await;

        assert_eq!(h.cache.peek(ShareSlot::Pdf).unwrap().unwrap().bytes, b"%PDF preferred");
        assert!(h.cache.peek(ShareSlot::Image).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unsupported_type_is_ignored() {
        let h = harness(true);
        let part = Part::bytes(b"hello".to_vec())
            .file_name("note.txt")
            .mime_type("text/plain");

        let res = h
            .server
            .post("/upload")
            .multipart(MultipartForm::new().add_part("file", part))
            .await;

        assert_eq!(res.status_code(), StatusCode::SEE_OTHER);
        assert_eq!(res.header("location"), "/dropshipper");
        for slot in ShareSlot::ALL {
            assert!(h.cache.peek(slot).unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_generic_slot_keeps_any_file() {
        let h = harness(false);
        let part = Part::bytes(b"hello".to_vec())
            .file_name("note.txt")
            .mime_type("text/plain");

        let res = h
            .server
            .post("/upload")
            .multipart(MultipartForm::new().add_part("file", part))
            .await;

        assert_eq!(res.header("location"), "/dropshipper?shared=true");
        assert_eq!(h.cache.peek(ShareSlot::File).unwrap().unwrap().bytes, b"hello");
    }

    #[tokio::test]
    async fn test_text_only_form_is_empty_share() {
        let h = harness(true);
        let res = h
            .server
            .post("/upload")
            .multipart(MultipartForm::new().add_text("text", "lihat resi ini"))
            .await;

        assert_eq!(res.status_code(), StatusCode::SEE_OTHER);
        assert_eq!(res.header("location"), "/dropshipper");
    }

    #[tokio::test]
    async fn test_broken_body_still_redirects() {
        let h = harness(true);
        let res = h.server.post("/upload").text("definitely not multipart").await;

        assert_eq!(res.status_code(), StatusCode::SEE_OTHER);
        assert_eq!(res.header("location"), "/dropshipper");
    }

    #[tokio::test]
    async fn test_cache_write_failure_still_redirects() {
        let gateway = ShareGateway::new(Arc::new(BrokenShareCache), &Config::default());
        let app = Router::new()
            .route("/dropshipper", get(|| async { "landing page" }))
            .layer(middleware::from_fn_with_state(gateway.clone(), intercept_share));
        let server = TestServer::new(app.into_make_service()).unwrap();

        let res = server
            .post("/upload")
            .multipart(MultipartForm::new().add_part("file", pdf_part(b"%PDF label")))
            .await;

        assert_eq!(res.status_code(), StatusCode::SEE_OTHER);
        assert_eq!(res.header("location"), "/dropshipper");

        let part = FilePart {
            field_name: "file".into(),
            file_name: Some("resi.pdf".into()),
            mime_type: "application/pdf".into(),
            bytes: b"%PDF label".to_vec(),
        };
        assert!(matches!(gateway.store(part), Err(ShareCaptureError::Cache(_))));
    }

    #[tokio::test]
    async fn test_other_requests_pass_through() {
        let h = harness(true);

        let res = h.server.get("/upload").await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);

        let res = h.server.get("/dropshipper").await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.text(), "landing page");

        let res = h.server.post("/other").await;
        assert_eq!(res.text(), "other handler");

        let res = h.server.post("/uploads").await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
    }
}
