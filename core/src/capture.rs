/*
    music-roast | Rust CLI tool that roasts your Spotify listening habits.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use url::{form_urlencoded, Url};

use crate::error::AuthError;
use crate::redirect::loopback_ip;

const SUCCESS_PAGE: &str = "<html><body><h2>Logged in to Spotify</h2>\
    <p>You can close this tab and return to the terminal.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h2>Spotify login did not complete</h2>\
    <p>No authorization code was received. You can close this tab.</p></body></html>";

/// Query parameters the authorization server put on the redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundQuery {
    pub code: Option<String>,
    pub error: Option<String>,
    pub state: Option<String>,
}

impl InboundQuery {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Self::default()
        }
    }

    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut query = Self::default();
        for (key, value) in pairs {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key {
                "code" => query.code = Some(value.to_string()),
                "error" => query.error = Some(value.to_string()),
                "state" => query.state = Some(value.to_string()),
                _ => {}
            }
        }
        query
    }

    pub fn from_url(url: &Url) -> Self {
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        Self::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Accepts a full redirect URL, a bare query string, or a bare code.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if input.is_empty() {
            return Self::empty();
        }
        if let Ok(url) = Url::parse(input) {
            return Self::from_url(&url);
        }
        let query = input.trim_start_matches('?');
        if query.contains('=') {
            let pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect();
            return Self::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        Self::with_code(input)
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_none() && self.error.is_none()
    }
}

/// Opens the authorization URL for the user.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &Url) -> Result<(), AuthError>;
}

/// Uses the platform's default browser.
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &Url) -> Result<(), AuthError> {
        webbrowser::open(url.as_str())
            .map_err(|e| AuthError::Infrastructure(format!("Could not open a browser: {}", e)))
    }
}

#[derive(Debug)]
pub enum CaptureOutcome {
    /// A request hit the redirect path.
    Captured(InboundQuery),
    /// Local capture is not possible here; the caller should try the next strategy.
    Unavailable(AuthError),
}

/// Listens on the loopback redirect address, sends the user to `authorize_url`
/// and waits for the redirect, at most `timeout`.
///
/// The listening socket is dropped before this returns, on every path.
pub async fn capture_redirect(
    redirect_uri: &Url,
    authorize_url: &Url,
    browser: &dyn BrowserLauncher,
    timeout: Duration,
) -> CaptureOutcome {
    let (ip, port) = match (loopback_ip(redirect_uri), redirect_uri.port_or_known_default()) {
        (Some(ip), Some(port)) => (ip, port),
        _ => {
            return CaptureOutcome::Unavailable(AuthError::Infrastructure(format!(
                "{} is not a loopback address",
                redirect_uri
            )))
        }
    };

    let listener = match TcpListener::bind(SocketAddr::new(ip, port)).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!("Could not listen on {}:{}: {}", ip, port, e);
            return CaptureOutcome::Unavailable(e.into());
        }
    };
    debug!("Waiting for the Spotify redirect on {}:{}", ip, port);

    if let Err(e) = browser.open(authorize_url) {
        warn!("{}", e);
        return CaptureOutcome::Unavailable(e);
    }
    info!("Opened the Spotify login page in your browser");

    match tokio::time::timeout(timeout, accept_redirect(&listener, redirect_uri.path())).await {
        Ok(Ok(query)) => CaptureOutcome::Captured(query),
        Ok(Err(e)) => CaptureOutcome::Unavailable(e),
        Err(_) => CaptureOutcome::Unavailable(AuthError::Infrastructure(format!(
            "Timed out after {}s waiting for the Spotify redirect",
            timeout.as_secs()
        ))),
    }
}

/// Serves every connection on its own task, so a browser's idle preconnect
/// cannot hold up the real redirect. Pending handlers are aborted on return.
async fn accept_redirect(listener: &TcpListener, path: &str) -> Result<InboundQuery, AuthError> {
    let (tx, mut rx) = mpsc::channel(1);
    let mut handlers = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                handlers.spawn(serve_connection(stream, peer, path.to_string(), tx.clone()));
            }
            Some(query) = rx.recv() => return Ok(query),
        }
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    path: String,
    found: mpsc::Sender<InboundQuery>,
) {
    let mut buf = vec![0u8; 8192];
    let n = match stream.read(&mut buf).await {
        Ok(n) => n,
        Err(e) => {
            debug!("Dropping connection from {}: {}", peer, e);
            return;
        }
    };

    let request = String::from_utf8_lossy(&buf[..n]);
    match request_target(&request) {
        Some(target) if target.path() == path => {
            let query = InboundQuery::from_url(&target);
            let page = if query.code.is_some() {
                SUCCESS_PAGE
            } else {
                FAILURE_PAGE
            };
            respond(&mut stream, "200 OK", page).await;
            let _ = found.send(query).await;
        }
        _ => respond(&mut stream, "404 Not Found", "Not found").await,
    }
}

/// Extracts the request target of an HTTP/1.x request line as a URL.
fn request_target(request: &str) -> Option<Url> {
    let line = request.lines().next()?;
    let mut parts = line.split_whitespace();
    let _method = parts.next()?;
    let target = parts.next()?;
    Url::parse("http://localhost").ok()?.join(target).ok()
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!("Failed to answer redirect request: {}", e);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Instead of a browser, fires the given request line at the redirect address.
    /// `{state}` in the path is replaced with the authorize URL's `state`.
    pub(crate) struct ScriptedBrowser {
        pub target: SocketAddr,
        pub request_path: Option<String>,
        pub idle_first: bool,
        pub opened: Mutex<Vec<Url>>,
    }

    impl ScriptedBrowser {
        pub fn new(target: SocketAddr, request_path: Option<&str>) -> Self {
            Self {
                target,
                request_path: request_path.map(str::to_string),
                idle_first: false,
                opened: Mutex::new(Vec::new()),
            }
        }

        /// Opens a silent connection before sending the request, like a preconnecting browser.
        pub fn with_idle_connection(mut self) -> Self {
            self.idle_first = true;
            self
        }
    }

    impl BrowserLauncher for ScriptedBrowser {
        fn open(&self, url: &Url) -> Result<(), AuthError> {
            self.opened.lock().unwrap().push(url.clone());
            let state = url
                .query_pairs()
                .find(|(k, _)| k == "state")
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default();
            if let Some(path) = self.request_path.as_ref().map(|p| p.replace("{state}", &state)) {
                let target = self.target;
                let idle_first = self.idle_first;
                tokio::spawn(async move {
                    let _idle = if idle_first {
                        Some(TcpStream::connect(target).await.unwrap())
                    } else {
                        None
                    };
                    let mut stream = TcpStream::connect(target).await.unwrap();
                    let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path);
                    stream.write_all(request.as_bytes()).await.unwrap();
                    let mut response = String::new();
                    let _ = stream.read_to_string(&mut response).await;
                });
            }
            Ok(())
        }
    }

    pub(crate) struct NoBrowser;

    impl BrowserLauncher for NoBrowser {
        fn open(&self, _url: &Url) -> Result<(), AuthError> {
            Err(AuthError::Infrastructure("no browser available".to_string()))
        }
    }

    pub(crate) fn free_redirect() -> (Url, SocketAddr) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let url = Url::parse(&format!("http://127.0.0.1:{}/callback", addr.port())).unwrap();
        (url, addr)
    }

    fn authorize_url() -> Url {
        Url::parse("https://accounts.spotify.com/authorize?client_id=abc").unwrap()
    }

    #[test]
    fn test_parse_inbound_query_forms() {
        let from_url = InboundQuery::parse("http://127.0.0.1:8888/callback?code=abc123&state=xyz");
        assert_eq!(from_url.code.as_deref(), Some("abc123"));
        assert_eq!(from_url.state.as_deref(), Some("xyz"));

        let from_query = InboundQuery::parse("?error=access_denied");
        assert_eq!(from_query.error.as_deref(), Some("access_denied"));
        assert_eq!(from_query.code, None);

        assert_eq!(InboundQuery::parse(" abc123 "), InboundQuery::with_code("abc123"));
        assert!(InboundQuery::parse("").is_empty());
    }

    #[test]
    fn test_request_target_parsing() {
        let target = request_target("GET /callback?code=c0de HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert_eq!(target.path(), "/callback");
        assert_eq!(InboundQuery::from_url(&target).code.as_deref(), Some("c0de"));
        assert!(request_target("").is_none());
    }

    #[tokio::test]
    async fn test_captures_code_from_redirect() {
        let (redirect, addr) = free_redirect();
        let browser = ScriptedBrowser::new(addr, Some("/callback?code=captured"));

        let outcome =
            capture_redirect(&redirect, &authorize_url(), &browser, Duration::from_secs(5)).await;

        match outcome {
            CaptureOutcome::Captured(query) => assert_eq!(query.code.as_deref(), Some("captured")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(browser.opened.lock().unwrap().len(), 1);
        // Socket released after capture.
        assert!(std::net::TcpListener::bind(addr).is_ok());
    }

    #[tokio::test]
    async fn test_idle_connection_does_not_block_redirect() {
        let (redirect, addr) = free_redirect();
        let browser =
            ScriptedBrowser::new(addr, Some("/callback?code=abc")).with_idle_connection();

        let outcome =
            capture_redirect(&redirect, &authorize_url(), &browser, Duration::from_secs(2)).await;

        match outcome {
            CaptureOutcome::Captured(query) => assert_eq!(query.code.as_deref(), Some("abc")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(std::net::TcpListener::bind(addr).is_ok());
    }

    #[tokio::test]
    async fn test_other_paths_are_ignored() {
        let (redirect, addr) = free_redirect();
        let browser = ScriptedBrowser::new(addr, Some("/favicon.ico"));

        let outcome =
            capture_redirect(&redirect, &authorize_url(), &browser, Duration::from_millis(300)).await;

        assert!(matches!(outcome, CaptureOutcome::Unavailable(AuthError::Infrastructure(_))));
    }

    #[tokio::test]
    async fn test_timeout_releases_port() {
        let (redirect, addr) = free_redirect();
        let browser = ScriptedBrowser::new(addr, None);

        let outcome =
            capture_redirect(&redirect, &authorize_url(), &browser, Duration::from_millis(100)).await;

        assert!(matches!(outcome, CaptureOutcome::Unavailable(AuthError::Infrastructure(_))));
        assert!(std::net::TcpListener::bind(addr).is_ok());
    }

    #[tokio::test]
    async fn test_busy_port_is_unavailable() {
        let held = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = held.local_addr().unwrap();
        let redirect = Url::parse(&format!("http://127.0.0.1:{}/callback", addr.port())).unwrap();

        let outcome =
            capture_redirect(&redirect, &authorize_url(), &NoBrowser, Duration::from_secs(1)).await;
        match outcome {
            CaptureOutcome::Unavailable(e) => assert!(e.is_retryable()),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_browser_is_unavailable() {
        let (redirect, addr) = free_redirect();
        let outcome =
            capture_redirect(&redirect, &authorize_url(), &NoBrowser, Duration::from_secs(1)).await;
        assert!(matches!(outcome, CaptureOutcome::Unavailable(_)));
        assert!(std::net::TcpListener::bind(addr).is_ok());
    }

    #[tokio::test]
    async fn test_public_redirect_is_unavailable() {
        let redirect = Url::parse("https://roast.example.com/callback").unwrap();
        let outcome =
            capture_redirect(&redirect, &authorize_url(), &NoBrowser, Duration::from_secs(1)).await;
        assert!(matches!(outcome, CaptureOutcome::Unavailable(_)));
    }
}
