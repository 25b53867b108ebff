use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use super::NavigationFailure;

const USER_AGENT: &str = concat!("folio/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreflightVerdict {
    /// Server answered with this status; the browser may proceed.
    Reachable(u16),
    /// Not an HTTP target.
    Skipped,
}

/// Probe `url` over plain HTTP before launching a browser.
///
/// 401 and 403 are access denial; 404 and 410 mean the document does not
/// exist. Other statuses are left for the browser to judge.
pub async fn preflight(url: &Url, timeout: Duration) -> Result<PreflightVerdict, NavigationFailure> {
    if !matches!(url.scheme(), "http" | "https") {
        return Ok(PreflightVerdict::Skipped);
    }

    let client = Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| NavigationFailure::Other(e.to_string()))?;

    let response = client.get(url.clone()).send().await.map_err(|e| {
        if e.is_timeout() {
            NavigationFailure::Timeout(timeout)
        } else {
            NavigationFailure::Unreachable(e.to_string())
        }
    })?;

    let status = response.status();
    debug!(%url, %status, "preflight response");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(NavigationFailure::AccessDenied(
            format!("HTTP {status}; this document requires authentication, which folio does not perform"),
        )),
        StatusCode::NOT_FOUND | StatusCode::GONE => {
            Err(NavigationFailure::Unreachable(format!("HTTP {status}")))
        }
        _ => Ok(PreflightVerdict::Reachable(status.as_u16())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(status_line: &'static str) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response =
                    format!("HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        Url::parse(&format!("http://{addr}/doc/7")).unwrap()
    }

    #[tokio::test]
    async fn forbidden_is_access_denied() {
        let url = serve_once("403 Forbidden").await;
        match preflight(&url, Duration::from_secs(5)).await {
            Err(NavigationFailure::AccessDenied(reason)) => assert!(reason.contains("403")),
            other => panic!("expected access denied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ok_is_reachable() {
        let url = serve_once("200 OK").await;
        assert_eq!(
            preflight(&url, Duration::from_secs(5)).await,
            Ok(PreflightVerdict::Reachable(200))
        );
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let url = Url::parse(&format!("http://{addr}/")).unwrap();
        assert!(matches!(
            preflight(&url, Duration::from_secs(5)).await,
            Err(NavigationFailure::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn file_urls_are_skipped() {
        let url = Url::parse("file:///tmp/doc.html").unwrap();
        assert_eq!(
            preflight(&url, Duration::from_secs(1)).await,
            Ok(PreflightVerdict::Skipped)
        );
    }
}
