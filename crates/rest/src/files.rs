use std::fs;
use std::io;
use std::path::Path;

use bytes::Bytes;
use http::StatusCode;
use mime::Mime;
use tracing::debug;

use crate::connection::RestConnection;
use crate::error::RouterError;
use crate::router::{HandlerResult, MatchResult};

/// The content type served for a file, by extension.
pub fn mime_for(path: &Path) -> Mime {
    match path.extension().and_then(|extension| extension.to_str()) {
        Some("html" | "htm") => mime::TEXT_HTML,
        Some("js") => mime::APPLICATION_JAVASCRIPT,
        Some("css") => mime::TEXT_CSS,
        Some("json") => mime::APPLICATION_JSON,
        _ => mime::TEXT_PLAIN,
    }
}

/// Turns a requested resource into a path relative to the served directory.
///
/// Paths containing `..` are refused.
pub(crate) fn relative_path(resource: &str) -> Result<&str, RouterError> {
    if resource.contains("..") {
        return Err(RouterError::forbidden_path(resource));
    }
    Ok(resource.trim_start_matches('/'))
}

/// Answers with the content of `filename`, or 404 when it does not exist.
pub(crate) fn send_file(connection: &dyn RestConnection, filename: &Path) -> HandlerResult {
    match fs::read(filename) {
        Ok(content) => {
            debug!(file = %filename.display(), len = content.len(), "serving static file");
            connection.send_response(StatusCode::OK, Bytes::from(content), mime_for(filename).as_ref());
            Ok(MatchResult::Yes)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            connection.send_error_response(StatusCode::NOT_FOUND, &format!("File '{}' doesn't exist", filename.display()));
            Ok(MatchResult::Yes)
        }
        Err(e) => Err(RouterError::from(e).into()),
    }
}
