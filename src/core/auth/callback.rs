//! One-shot local listener for the OAuth redirect.

use crate::error::{AuthError, ConfigError};
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REQUEST_BYTES: usize = 16 * 1024;

/// Host, port and path parsed from an `http://` redirect URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl RedirectTarget {
    pub fn parse(uri: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidRedirectUri {
            uri: uri.to_string(),
        };
        let rest = uri.strip_prefix("http://").ok_or_else(invalid)?;
        let (authority, path) = match rest.find('/') {
            Some(index) => (&rest[..index], &rest[index..]),
            None => (rest, "/"),
        };
        let path = path.split('?').next().unwrap_or("/");
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
            None => (authority, 80),
        };
        if host.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }
}

/// Listens on the redirect address for a single authorization response
pub struct CallbackListener {
    listener: TcpListener,
    target: RedirectTarget,
}

impl CallbackListener {
    /// Bind the redirect host and port
    pub fn bind(target: RedirectTarget) -> Result<Self, AuthError> {
        let address = format!("{}:{}", target.host, target.port);
        let listener = TcpListener::bind(&address).map_err(|e| AuthError::Callback {
            address: address.clone(),
            reason: e.to_string(),
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|e| AuthError::Callback {
                address: address.clone(),
                reason: e.to_string(),
            })?;
        info!(%address, path = %target.path, "listening for OAuth callback");
        Ok(Self { listener, target })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Wait for the redirect and return its authorization code.
    ///
    /// Requests for other paths get a 404 and are ignored. A callback with
    /// a missing code or a state other than `expected_state` fails the flow.
    pub fn wait_for_code(&self, expected_state: &str, timeout: Duration) -> Result<String, AuthError> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "callback connection");
                    if let Some(outcome) = self.handle(stream, expected_state) {
                        return outcome;
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(AuthError::CallbackTimeout {
                            seconds: timeout.as_secs(),
                        });
                    }
                    thread::sleep(ACCEPT_POLL);
                }
                Err(err) => {
                    return Err(AuthError::Callback {
                        address: format!("{}:{}", self.target.host, self.target.port),
                        reason: err.to_string(),
                    })
                }
            }
        }
    }

    /// `None` means the request was not the callback and we keep waiting
    fn handle(&self, mut stream: TcpStream, expected_state: &str) -> Option<Result<String, AuthError>> {
        let request_line = match read_request_line(&mut stream) {
            Some(line) => line,
            None => return None,
        };

        // "GET /callback?code=...&state=... HTTP/1.1"
        let target = request_line.split_whitespace().nth(1).unwrap_or("");
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        if path != self.target.path {
            respond(&mut stream, "404 Not Found", "Not Found");
            return None;
        }

        let params = parse_query(query);
        let code = params.get("code").filter(|code| !code.is_empty());
        let state = params.get("state");

        match (code, state) {
            (Some(code), Some(state)) if state == expected_state => {
                respond(
                    &mut stream,
                    "200 OK",
                    "Authentication complete. You can close this window.",
                );
                Some(Ok(code.clone()))
            }
            _ => {
                respond(&mut stream, "400 Bad Request", "Invalid OAuth response");
                Some(Err(AuthError::StateMismatch))
            }
        }
    }
}

fn read_request_line(stream: &mut TcpStream) -> Option<String> {
    stream.set_nonblocking(false).ok()?;
    stream.set_read_timeout(Some(REQUEST_READ_TIMEOUT)).ok()?;

    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    while !buffer.windows(2).any(|w| w == b"\r\n") && buffer.len() < MAX_REQUEST_BYTES {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            Err(_) => return None,
        }
    }
    let text = String::from_utf8_lossy(&buffer);
    text.lines().next().map(str::to_string)
}

fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = value.replace('+', " ");
            let key = urlencoding::decode(key).ok()?.into_owned();
            let value = urlencoding::decode(&value).ok()?.into_owned();
            Some((key, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener() -> (CallbackListener, SocketAddr) {
        let target = RedirectTarget::parse("http://127.0.0.1:0/callback").unwrap();
        let listener = CallbackListener::bind(target).unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    fn send(addr: SocketAddr, path: &str) -> thread::JoinHandle<String> {
        let path = path.to_string();
        thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            write!(stream, "GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path).unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).unwrap();
            response
        })
    }

    #[test]
    fn parses_redirect_uri() {
        let target = RedirectTarget::parse("http://localhost:8765/oauth2/callback").unwrap();
        assert_eq!(target.host, "localhost");
        assert_eq!(target.port, 8765);
        assert_eq!(target.path, "/oauth2/callback");

        assert_eq!(RedirectTarget::parse("http://127.0.0.1").unwrap().port, 80);
        assert!(RedirectTarget::parse("https://localhost:8765/cb").is_err());
        assert!(RedirectTarget::parse("http://:8765/cb").is_err());
    }

    #[test]
    fn returns_code_when_state_matches() {
        let (listener, addr) = listener();
        let client = send(addr, "/callback?code=4%2Fabc&state=s1");

        let code = listener.wait_for_code("s1", Duration::from_secs(5)).unwrap();

        assert_eq!(code, "4/abc");
        assert!(client.join().unwrap().starts_with("HTTP/1.1 200"));
    }

    #[test]
    fn rejects_state_mismatch() {
        let (listener, addr) = listener();
        let client = send(addr, "/callback?code=abc&state=forged");

        let result = listener.wait_for_code("expected", Duration::from_secs(5));

        assert!(matches!(result, Err(AuthError::StateMismatch)));
        assert!(client.join().unwrap().starts_with("HTTP/1.1 400"));
    }

    #[test]
    fn ignores_other_paths_then_accepts_callback() {
        let (listener, addr) = listener();
        let handle = thread::spawn(move || listener.wait_for_code("s", Duration::from_secs(5)));

        let favicon = send(addr, "/favicon.ico").join().unwrap();
        assert!(favicon.starts_with("HTTP/1.1 404"));
        let client = send(addr, "/callback?state=s&code=xyz");

        assert_eq!(handle.join().unwrap().unwrap(), "xyz");
        client.join().unwrap();
    }

    #[test]
    fn times_out_without_callback() {
        let (listener, _) = listener();
        let result = listener.wait_for_code("s", Duration::from_millis(120));
        assert!(matches!(result, Err(AuthError::CallbackTimeout { .. })));
    }
}
