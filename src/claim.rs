// src/claim.rs

//! Page-side half of the share hand-off.
//!
//! A page load carrying `shared=true` checks the share cache once. Whatever
//! it finds is taken out of the cache before it is returned, so loading the
//! same URL again finds nothing.

use crate::gateway::SHARED_MARKER;
use crate::share_cache::{MimeKind, ShareCache, ShareSlot, SharedPayload, mime_kind};
use tracing::{info, warn};
use url::Url;

/// A claimed share rebuilt as a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl SharedFile {
    fn from_payload(slot: ShareSlot, payload: SharedPayload) -> Self {
        let name = payload
            .file_name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| slot.default_file_name().to_string());
        Self {
            name,
            mime_type: payload.mime_type,
            bytes: payload.bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The page was not loaded from a share redirect.
    NotRequested,
    /// Nothing pending, or the cache could not be read.
    Nothing,
    /// A PDF to run through label extraction.
    Label(SharedFile),
    /// An image to attach to the order.
    Attachment(SharedFile),
    /// The generic slot held something that is neither; it has been dropped.
    Unsupported { mime_type: String },
}

/// True when the query string carries `shared=true`.
pub fn share_requested(query: Option<&str>) -> bool {
    let Some(query) = query else {
        return false;
    };
    url::form_urlencoded::parse(query.as_bytes())
        .any(|(k, v)| k == SHARED_MARKER && v == "true")
}

pub fn claim_pending(cache: &dyn ShareCache, query: Option<&str>) -> ClaimOutcome {
    if !share_requested(query) {
        return ClaimOutcome::NotRequested;
    }

    for slot in ShareSlot::ALL {
        let payload = match cache.take(slot) {
            Ok(Some(payload)) => payload,
            Ok(None) => continue,
            Err(e) => {
                warn!(slot = %slot, error = %e, "Share cache unreadable, treating as empty");
                return ClaimOutcome::Nothing;
            }
        };

        info!(
            slot = %slot,
            digest = %payload.digest,
            bytes = payload.bytes.len(),
            "Share claimed"
        );
        let kind = mime_kind(&payload.mime_type);
        let file = SharedFile::from_payload(slot, payload);
        return match kind {
            MimeKind::Pdf => ClaimOutcome::Label(file),
            MimeKind::Image => ClaimOutcome::Attachment(file),
            MimeKind::Other => {
                info!(mime = %file.mime_type, "Claimed share is not a label or image, dropping");
                ClaimOutcome::Unsupported {
                    mime_type: file.mime_type,
                }
            }
        };
    }

    info!("Share marker present but nothing pending");
    ClaimOutcome::Nothing
}

/// Slots currently holding a share, without claiming any of them.
pub fn pending_slots(cache: &dyn ShareCache) -> Vec<ShareSlot> {
    ShareSlot::ALL
        .into_iter()
        .filter(|&slot| match cache.peek(slot) {
            Ok(found) => found.is_some(),
            Err(e) => {
                warn!(slot = %slot, error = %e, "Share cache unreadable");
                false
            }
        })
        .collect()
}

/// Remove the `shared` parameter from a path-and-query, keeping every other
/// parameter in its original order.
pub fn strip_share_marker(path_and_query: &str) -> String {
    let Ok(mut url) = Url::parse("http://resilink.local").and_then(|base| base.join(path_and_query))
    else {
        return path_and_query.to_string();
    };

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != SHARED_MARKER)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    match url.query() {
        Some(q) => format!("{}?{q}", url.path()),
        None => url.path().to_string(),
    }
}
