//! Response body type and small response builders.

use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use std::io;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

/// Body of every response the server produces.
pub type ResponseBody = UnsyncBoxBody<Bytes, io::Error>;

pub fn empty() -> ResponseBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub fn full<T: Into<Bytes>>(chunk: T) -> ResponseBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub fn stream<R>(reader: ReaderStream<R>) -> ResponseBody
where
    R: AsyncRead + Send + 'static,
{
    StreamBody::new(reader.map_ok(Frame::data)).boxed_unsync()
}

/// A response with a status and body.
pub fn response(status: StatusCode, body: ResponseBody) -> Response<ResponseBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

/// A short plain-text response.
pub fn text(status: StatusCode, message: &'static str) -> Response<ResponseBody> {
    let mut response = response(status, full(message));
    set_header(&mut response, CONTENT_TYPE, "text/plain; charset=utf-8");
    set_header(&mut response, CONTENT_LENGTH, message.len().to_string());
    response
}

/// A serialized JSON response.
pub fn json(status: StatusCode, body: String) -> Response<ResponseBody> {
    let len = body.len();
    let mut response = response(status, full(body));
    set_header(&mut response, CONTENT_TYPE, "application/json");
    set_header(&mut response, CONTENT_LENGTH, len.to_string());
    response
}

/// Set a header, skipping values that are not valid header text.
pub fn set_header<V>(response: &mut Response<ResponseBody>, name: HeaderName, value: V)
where
    HeaderValue: TryFrom<V>,
{
    if let Ok(value) = HeaderValue::try_from(value) {
        response.headers_mut().insert(name, value);
    }
}
