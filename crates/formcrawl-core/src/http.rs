//! Blocking HTTP over a shared async runtime, with stall detection.
//!
//! Uses async reqwest internally with tokio::time::timeout per body chunk,
//! but presents a sync interface for the executor threads, which are plain
//! rayon workers.

use std::future::Future;
use std::io;
use std::sync::LazyLock;
use std::time::Duration;

/// Read timeout for stall detection (no body bytes for this long = stall)
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error from talking to the upstream site
#[derive(Debug)]
pub enum FetchError {
    /// HTTP error with optional status code
    Http {
        status: Option<u16>,
        message: String,
    },
    /// I/O error (including stalled body reads)
    Io(io::Error),
    /// Response arrived but did not contain what the protocol expects
    Protocol(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl FetchError {
    /// Create HTTP error from reqwest error
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        Self::Http {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Whether a later attempt can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            // 4xx other than throttling means the request itself is wrong
            Self::Http {
                status: Some(s), ..
            } => !(400..500).contains(s) || *s == 408 || *s == 429,
            Self::Http { status: None, .. } => true,
            Self::Io(e) => e.kind() != io::ErrorKind::StorageFull,
            Self::Protocol(_) => false,
        }
    }
}

impl From<io::Error> for FetchError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        Self::from_reqwest(&e)
    }
}

/// Client settings shared by every session.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Accept self-signed or broken certificate chains
    pub accept_invalid_certs: bool,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0".to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            accept_invalid_certs: false,
        }
    }
}

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Run a future to completion on the shared runtime from a worker thread.
pub fn block_on<F: Future>(fut: F) -> F::Output {
    SHARED_RUNTIME.handle().block_on(fut)
}

/// Build a fresh client with its own cookie jar.
///
/// Each unit gets its own client: the upstream form session lives in cookies
/// and hidden fields, so sharing a client would cross-contaminate units.
pub fn session_client(settings: &HttpSettings) -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .user_agent(&settings.user_agent)
        .connect_timeout(settings.connect_timeout)
        .cookie_store(true)
        .danger_accept_invalid_certs(settings.accept_invalid_certs)
        .build()
        .map_err(FetchError::from)
}

/// Largest response body accepted from the upstream site
pub const MAX_BODY_BYTES: usize = 256 * 1024 * 1024;

/// Pre-allocation ceiling; `Content-Length` is only a hint
const INITIAL_CAPACITY_LIMIT: usize = 1024 * 1024;

/// Send a request and collect the body, failing on non-2xx and on stalls.
pub fn send_and_read(
    request: reqwest::RequestBuilder,
    read_timeout: Duration,
) -> Result<Vec<u8>, FetchError> {
    send_and_read_limited(request, read_timeout, MAX_BODY_BYTES)
}

fn send_and_read_limited(
    request: reqwest::RequestBuilder,
    read_timeout: Duration,
    max_body: usize,
) -> Result<Vec<u8>, FetchError> {
    block_on(async {
        let mut response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| FetchError::from_reqwest(&e))?;

        let declared = response.content_length();
        if let Some(len) = declared.filter(|&len| len > max_body as u64) {
            return Err(FetchError::protocol(format!(
                "declared body of {len} bytes exceeds limit of {max_body}"
            )));
        }
        let capacity = declared.map_or(64 * 1024, |len| len as usize);
        let mut body = Vec::with_capacity(capacity.min(INITIAL_CAPACITY_LIMIT));
        loop {
            match tokio::time::timeout(read_timeout, response.chunk()).await {
                Ok(Ok(Some(chunk))) => {
                    if body.len() + chunk.len() > max_body {
                        return Err(FetchError::protocol(format!(
                            "body exceeds limit of {max_body} bytes"
                        )));
                    }
                    body.extend_from_slice(&chunk);
                }
                Ok(Ok(None)) => break,
                Ok(Err(e)) => return Err(FetchError::from_reqwest(&e)),
                Err(_) => {
                    return Err(FetchError::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("read timeout ({}s with no data)", read_timeout.as_secs()),
                    )))
                }
            }
        }
        Ok::<_, FetchError>(body)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_err(status: u16) -> FetchError {
        FetchError::Http {
            status: Some(status),
            message: "test".to_string(),
        }
    }

    #[test]
    fn http_404_not_retryable() {
        assert!(!http_err(404).is_retryable());
    }

    #[test]
    fn http_429_retryable() {
        assert!(http_err(429).is_retryable());
    }

    #[test]
    fn http_503_retryable() {
        assert!(http_err(503).is_retryable());
    }

    #[test]
    fn http_none_status_retryable() {
        let err = FetchError::Http {
            status: None,
            message: "connection refused".to_string(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn io_storage_full_not_retryable() {
        let err = FetchError::Io(io::Error::new(io::ErrorKind::StorageFull, "disk full"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn protocol_not_retryable() {
        assert!(!FetchError::protocol("no pdf link").is_retryable());
    }

    #[test]
    fn display_variants() {
        assert_eq!(format!("{}", http_err(500)), "HTTP 500: test");
        assert!(format!("{}", FetchError::protocol("x")).starts_with("protocol error"));
        let io = FetchError::Io(io::Error::new(io::ErrorKind::TimedOut, "stall"));
        assert!(format!("{io}").contains("IO error"));
    }

    #[test]
    fn session_client_builds() {
        assert!(session_client(&HttpSettings::default()).is_ok());
    }

    /// Serve one canned response on a local port and return its URL.
    fn serve_once(response: &'static [u8]) -> String {
        use std::io::{Read, Write};
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(response);
                let _ = stream.flush();
            }
        });
        format!("http://{addr}/")
    }

    #[test]
    fn absurd_content_length_is_an_error() {
        let url = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 18446744073709551000\r\n\r\n");
        let client = session_client(&HttpSettings::default()).unwrap();
        let err = send_and_read(client.get(url), Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, FetchError::Protocol(_)), "{err}");
    }

    #[test]
    fn body_over_limit_is_an_error() {
        let url = serve_once(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n10\r\n0123456789abcdef\r\n0\r\n\r\n",
        );
        let client = session_client(&HttpSettings::default()).unwrap();
        let err = send_and_read_limited(client.get(url), Duration::from_secs(5), 8).unwrap_err();
        assert!(matches!(err, FetchError::Protocol(_)), "{err}");
    }

    #[test]
    fn small_body_is_read() {
        let url = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello");
        let client = session_client(&HttpSettings::default()).unwrap();
        let body = send_and_read(client.get(url), Duration::from_secs(5)).unwrap();
        assert_eq!(body, b"hello");
    }
}
