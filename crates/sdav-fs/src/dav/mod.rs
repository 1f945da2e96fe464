//! WebDAV protocol handler.
//!
//! Handles `GET`, `HEAD`, `PUT`, `DELETE`, `MKCOL` and `PROPFIND` against a
//! [`SandboxRoot`]. `PROPPATCH`, `COPY`, `MOVE`, `LOCK` and `UNLOCK` are
//! answered with `405`. Every other method is handed back to the caller
//! untouched as [`DavOutcome::PassThrough`].
//!
//! Mutations report to the [`ChangeNotifier`] once the filesystem operation
//! has completed, and before the response is sent.

mod propfind;
mod range;

pub use propfind::{href_for, multistatus, not_found, PropEntry};
pub use range::ByteRange;

use crate::body::{self, ResponseBody};
use crate::resource::{self, ResourceMeta};
use bytes::Bytes;
use hyper::body::Body;
use hyper::header::{
    HeaderMap, ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG,
    LAST_MODIFIED, RANGE,
};
use hyper::{Method, Request, Response, StatusCode};
use log::{debug, error, trace};
use sdav_core::{decode_request_path, guess_mime, ChangeKind, Error, Result, SandboxRoot};
use sdav_notify::ChangeNotifier;
use serde::Serialize;
use std::error::Error as StdError;
use std::path::Path;
use std::sync::Arc;

const MULTISTATUS_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// Methods the handler recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DavMethod {
    Get,
    Head,
    Put,
    Delete,
    Mkcol,
    Propfind,
    /// A WebDAV method this server does not implement.
    Unsupported,
}

impl DavMethod {
    /// `None` means the method is not WebDAV and should pass through.
    pub fn classify(method: &Method) -> Option<Self> {
        match method.as_str() {
            "GET" => Some(DavMethod::Get),
            "HEAD" => Some(DavMethod::Head),
            "PUT" => Some(DavMethod::Put),
            "DELETE" => Some(DavMethod::Delete),
            "MKCOL" => Some(DavMethod::Mkcol),
            "PROPFIND" => Some(DavMethod::Propfind),
            "PROPPATCH" | "COPY" | "MOVE" | "LOCK" | "UNLOCK" => Some(DavMethod::Unsupported),
            _ => None,
        }
    }
}

/// Result of offering a request to the handler.
pub enum DavOutcome<B> {
    Handled(Response<ResponseBody>),
    /// Not a WebDAV request; the original request, unchanged.
    PassThrough(Request<B>),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Listing {
    path: String,
    items: Vec<ListingItem>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListingItem {
    name: String,
    path: String,
    is_directory: bool,
}

/// Serves WebDAV requests from a sandboxed directory.
#[derive(Clone)]
pub struct DavHandler {
    sandbox: SandboxRoot,
    notifier: Option<Arc<ChangeNotifier>>,
}

impl DavHandler {
    /// Without a notifier, mutations are not reported anywhere.
    pub fn new(sandbox: SandboxRoot, notifier: Option<Arc<ChangeNotifier>>) -> Self {
        Self { sandbox, notifier }
    }

    pub fn sandbox(&self) -> &SandboxRoot {
        &self.sandbox
    }

    pub async fn handle<B>(&self, req: Request<B>) -> DavOutcome<B>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let Some(method) = DavMethod::classify(req.method()) else {
            return DavOutcome::PassThrough(req);
        };

        let raw_path = req.uri().path().to_string();
        debug!("{} {}", req.method(), raw_path);

        if method == DavMethod::Unsupported {
            return DavOutcome::Handled(body::text(
                StatusCode::METHOD_NOT_ALLOWED,
                "Method Not Allowed",
            ));
        }

        let target = match self.sandbox.resolve_uri(&raw_path) {
            Ok(target) => target,
            Err(_) => {
                return DavOutcome::Handled(body::text(StatusCode::FORBIDDEN, "Forbidden"));
            }
        };

        let result = match method {
            DavMethod::Get => self.get(req.headers(), &target, &raw_path, false).await,
            DavMethod::Head => self.get(req.headers(), &target, &raw_path, true).await,
            DavMethod::Put => self.put(req.into_body(), &target).await,
            DavMethod::Delete => self.delete(&target).await,
            DavMethod::Mkcol => self.mkcol(&target).await,
            DavMethod::Propfind => self.propfind(req.headers(), &target).await,
            DavMethod::Unsupported => Err(Error::UnsupportedOperation(raw_path.clone())),
        };

        DavOutcome::Handled(match result {
            Ok(response) => response,
            Err(e) => self.error_response(method, &target, &raw_path, e),
        })
    }

    fn error_response(
        &self,
        method: DavMethod,
        target: &Path,
        raw_path: &str,
        err: Error,
    ) -> Response<ResponseBody> {
        if err.is_not_found() {
            trace!("{} not found", raw_path);
            if method == DavMethod::Propfind {
                let href = self
                    .sandbox
                    .relative_path(target)
                    .map(|rel| href_for(&rel, false))
                    .unwrap_or_else(|| "/".to_string());
                return multistatus_response(not_found(&href));
            }
            return body::text(StatusCode::NOT_FOUND, "Not Found");
        }

        match err {
            Error::SandboxViolation => body::text(StatusCode::FORBIDDEN, "Forbidden"),
            Error::UnsupportedOperation(_) => {
                body::text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
            }
            other => {
                error!("{:?} {} failed: {}", method, raw_path, other);
                body::text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }

    async fn get(
        &self,
        headers: &HeaderMap,
        target: &Path,
        raw_path: &str,
        head_only: bool,
    ) -> Result<Response<ResponseBody>> {
        let meta = resource::stat(target).await?;
        if meta.is_dir {
            return self.listing(target, raw_path).await;
        }

        let range_header = headers.get(RANGE).and_then(|v| v.to_str().ok());
        let (status, start, len) = match ByteRange::parse(range_header, meta.size) {
            ByteRange::Full => (StatusCode::OK, 0, meta.size),
            ByteRange::Partial { start, end } => {
                (StatusCode::PARTIAL_CONTENT, start, end - start + 1)
            }
            ByteRange::Unsatisfiable => {
                let mut response = body::text(
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    "Range Not Satisfiable",
                );
                body::set_header(
                    &mut response,
                    CONTENT_RANGE,
                    format!("bytes */{}", meta.size),
                );
                return Ok(response);
            }
        };

        let content = if head_only {
            body::empty()
        } else {
            body::stream(resource::open_range(target, start, len).await?)
        };

        let mut response = body::response(status, content);
        file_headers(&mut response, target, &meta);
        body::set_header(&mut response, CONTENT_LENGTH, len);
        if status == StatusCode::PARTIAL_CONTENT {
            body::set_header(
                &mut response,
                CONTENT_RANGE,
                format!("bytes {}-{}/{}", start, start + len - 1, meta.size),
            );
        }
        Ok(response)
    }

    async fn listing(&self, target: &Path, raw_path: &str) -> Result<Response<ResponseBody>> {
        let relative = self.sandbox.relative_path(target).unwrap_or_default();
        let items = resource::list(target)
            .await?
            .into_iter()
            .map(|entry| {
                let path = if relative.is_empty() {
                    format!("/{}", entry.name)
                } else {
                    format!("/{}/{}", relative, entry.name)
                };
                ListingItem {
                    name: entry.name,
                    path,
                    is_directory: entry.meta.is_dir,
                }
            })
            .collect();
        let listing = Listing {
            path: decode_request_path(raw_path),
            items,
        };
        let json = serde_json::to_string(&listing)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        Ok(body::json(StatusCode::OK, json))
    }

    async fn put<B>(&self, request_body: B, target: &Path) -> Result<Response<ResponseBody>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        if self.sandbox.is_root(target) {
            return Ok(body::text(StatusCode::FORBIDDEN, "Forbidden"));
        }
        let existing = resource::try_stat(target).await?;
        if existing.as_ref().is_some_and(|m| m.is_dir) {
            return Ok(body::text(
                StatusCode::METHOD_NOT_ALLOWED,
                "Method Not Allowed",
            ));
        }

        // Parents created on the way are part of this write.
        let created_from = resource::creation_root(target).await;
        let _guard = self.notifier.as_deref().map(|n| n.begin(&created_from));
        resource::write_body(target, request_body).await?;

        let kind = if existing.is_some() {
            ChangeKind::Updated
        } else {
            ChangeKind::Created
        };
        self.notify(kind, target, false).await;
        Ok(body::text(StatusCode::CREATED, "Created"))
    }

    async fn delete(&self, target: &Path) -> Result<Response<ResponseBody>> {
        if self.sandbox.is_root(target) {
            return Ok(body::text(StatusCode::FORBIDDEN, "Forbidden"));
        }
        let meta = resource::stat(target).await?;

        let _guard = self.notifier.as_deref().map(|n| n.begin(target));
        resource::remove(target, meta.is_dir).await?;

        self.notify(ChangeKind::Deleted, target, meta.is_dir).await;
        Ok(body::text(StatusCode::OK, "Deleted"))
    }

    async fn mkcol(&self, target: &Path) -> Result<Response<ResponseBody>> {
        if self.sandbox.is_root(target) {
            return Ok(body::text(StatusCode::FORBIDDEN, "Forbidden"));
        }
        if resource::try_stat(target).await?.is_some() {
            return Ok(body::text(
                StatusCode::METHOD_NOT_ALLOWED,
                "Method Not Allowed",
            ));
        }

        let created_from = resource::creation_root(target).await;
        let _guard = self.notifier.as_deref().map(|n| n.begin(&created_from));
        resource::create_dir(target).await?;

        self.notify(ChangeKind::DirectoryCreated, target, true).await;
        Ok(body::text(StatusCode::CREATED, "Created"))
    }

    async fn propfind(&self, headers: &HeaderMap, target: &Path) -> Result<Response<ResponseBody>> {
        let meta = resource::stat(target).await?;
        let relative = self.sandbox.relative_path(target).unwrap_or_default();
        let depth_zero = headers
            .get("depth")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|d| d.trim() == "0");

        let mut entries = vec![PropEntry {
            href: href_for(&relative, meta.is_dir),
            meta: meta.clone(),
        }];
        if meta.is_dir && !depth_zero {
            for child in resource::list(target).await? {
                let child_relative = if relative.is_empty() {
                    child.name.clone()
                } else {
                    format!("{}/{}", relative, child.name)
                };
                entries.push(PropEntry {
                    href: href_for(&child_relative, child.meta.is_dir),
                    meta: child.meta,
                });
            }
        }

        trace!("PROPFIND {} -> {} entries", relative, entries.len());
        Ok(multistatus_response(multistatus(&entries)))
    }

    async fn notify(&self, kind: ChangeKind, target: &Path, is_dir: bool) {
        if let Some(notifier) = &self.notifier {
            notifier.emit(kind, target, is_dir).await;
        }
    }
}

fn file_headers(response: &mut Response<ResponseBody>, target: &Path, meta: &ResourceMeta) {
    body::set_header(response, CONTENT_TYPE, guess_mime(target));
    body::set_header(response, ACCEPT_RANGES, "bytes");
    body::set_header(response, LAST_MODIFIED, meta.last_modified());
    body::set_header(response, ETAG, meta.etag());
    body::set_header(response, CACHE_CONTROL, "no-cache");
}

fn multistatus_response(xml: String) -> Response<ResponseBody> {
    let len = xml.len();
    let mut response = body::response(StatusCode::MULTI_STATUS, body::full(xml));
    body::set_header(&mut response, CONTENT_TYPE, MULTISTATUS_CONTENT_TYPE);
    body::set_header(&mut response, CONTENT_LENGTH, len);
    response
}
