//! Local HTTP listener for the OAuth redirect.
//!
//! Accepts connections until one carries the authorization response, answers
//! it with a small page, and returns the full callback URL.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};
use url::Url;

/// Result from the callback listener.
#[derive(Debug, PartialEq, Eq)]
pub enum CallbackResult {
    /// Full callback URL, including the query string.
    Success(String),
    /// Nothing arrived before the deadline.
    TimedOut,
    Error(String),
}

pub struct CallbackServer {
    listener: TcpListener,
    path: String,
}

impl CallbackServer {
    /// Bind the loopback port named by `redirect_uri`.
    pub fn bind(redirect_uri: &str) -> Result<Self, String> {
        let url = Url::parse(redirect_uri).map_err(|e| format!("Invalid redirect URI: {}", e))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| format!("Redirect URI has no port: {}", redirect_uri))?;
        Self::bind_addr(SocketAddr::from(([127, 0, 0, 1], port)), url.path())
    }

    fn bind_addr(addr: SocketAddr, path: &str) -> Result<Self, String> {
        let listener = TcpListener::bind(addr).map_err(|e| {
            error!("Failed to bind callback server to {}: {}", addr, e);
            format!("Failed to start server: {}", e)
        })?;

        listener
            .set_nonblocking(true)
            .map_err(|e| format!("Server configuration error: {}", e))?;

        Ok(Self {
            listener,
            path: path.to_string(),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Block until the redirect arrives or `timeout` elapses.
    pub fn wait(self, timeout: Duration) -> CallbackResult {
        let deadline = Instant::now() + timeout;
        let host = self
            .local_addr()
            .map(|addr| format!("localhost:{}", addr.port()))
            .unwrap_or_else(|| "localhost".to_string());

        info!("OAuth callback listener waiting on {}{}", host, self.path);

        loop {
            if Instant::now() >= deadline {
                info!("OAuth callback listener timed out");
                return CallbackResult::TimedOut;
            }

            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!("Connection from {}", peer);
                    if let Some(path) = self.handle_connection(stream) {
                        info!("OAuth callback received");
                        return CallbackResult::Success(format!("http://{}{}", host, path));
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    return CallbackResult::Error(format!("Connection error: {}", e));
                }
            }
        }
    }

    /// Returns the request path when this was the authorization response.
    fn handle_connection(&self, mut stream: TcpStream) -> Option<String> {
        let _ = stream.set_nonblocking(false);
        let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));

        let mut buffer = [0; 4096];
        let bytes_read = match stream.read(&mut buffer) {
            Ok(n) => n,
            Err(e) => {
                debug!("Failed to read request: {}", e);
                return None;
            }
        };

        let request = String::from_utf8_lossy(&buffer[..bytes_read]);
        let mut parts = request.lines().next()?.split_whitespace();
        let (method, path) = match (parts.next(), parts.next()) {
            (Some(method), Some(path)) => (method, path),
            _ => {
                send_response(&mut stream, 400, "Bad Request", "text/plain", "Bad Request");
                return None;
            }
        };

        if method != "GET" {
            send_response(&mut stream, 405, "Method Not Allowed", "text/plain", "Method Not Allowed");
            return None;
        }

        if !path.starts_with(&self.path) {
            send_response(&mut stream, 404, "Not Found", "text/plain", "Not Found");
            return None;
        }

        let query: Vec<(String, String)> = Url::parse(&format!("http://localhost{}", path))
            .map(|url| url.query_pairs().into_owned().collect())
            .unwrap_or_default();
        let param = |name: &str| {
            query
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
        };

        if param("error").is_some() {
            let description = param("error_description")
                .unwrap_or_else(|| "Authentication was cancelled or failed.".to_string());
            send_response(&mut stream, 200, "OK", "text/html; charset=utf-8", &page(
                "Authentication Failed",
                &html_escape(&description),
            ));
            return Some(path.to_string());
        }

        if param("code").is_none() {
            send_response(&mut stream, 400, "Bad Request", "text/plain", "Missing authorization code");
            return None;
        }

        send_response(&mut stream, 200, "OK", "text/html; charset=utf-8", &page(
            "Authentication Successful",
            "You are signed in to Azure. You can close this tab now.",
        ));
        Some(path.to_string())
    }
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn page(title: &str, message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{title}</title>
    <style>
        body {{ font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; background: #f3f4f6;
               display: flex; align-items: center; justify-content: center; min-height: 100vh; }}
        .container {{ background: white; padding: 2.5rem; border-radius: 0.75rem; max-width: 420px;
                     text-align: center; box-shadow: 0 10px 25px rgba(0, 0, 0, 0.1); }}
        h1 {{ color: #1f2937; font-size: 1.4rem; margin-bottom: 0.75rem; }}
        p {{ color: #6b7280; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>{title}</h1>
        <p>{message}</p>
    </div>
</body>
</html>"#
    )
}

fn send_response(stream: &mut TcpStream, status: u16, reason: &str, content_type: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        content_type,
        body.len(),
        body
    );

    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn ephemeral() -> CallbackServer {
        CallbackServer::bind_addr(SocketAddr::from(([127, 0, 0, 1], 0)), "/callback").unwrap()
    }

    fn send(addr: SocketAddr, request_line: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .write_all(format!("{}\r\nHost: localhost\r\n\r\n", request_line).as_bytes())
            .unwrap();
        let mut response = String::new();
        let _ = stream.read_to_string(&mut response);
        response
    }

    #[test]
    fn test_receives_authorization_response() {
        let server = ephemeral();
        let addr = server.local_addr().unwrap();

        let client = thread::spawn(move || {
            let not_found = send(addr, "GET /favicon.ico HTTP/1.1");
            let ok = send(addr, "GET /callback?code=abc&state=xyz HTTP/1.1");
            (not_found, ok)
        });

        let result = server.wait(Duration::from_secs(10));
        let (not_found, ok) = client.join().unwrap();

        assert!(not_found.starts_with("HTTP/1.1 404"));
        assert!(ok.contains("Authentication Successful"));
        assert_eq!(
            result,
            CallbackResult::Success(format!(
                "http://localhost:{}/callback?code=abc&state=xyz",
                addr.port()
            ))
        );
    }

    #[test]
    fn test_error_response_is_returned_and_escaped() {
        let server = ephemeral();
        let addr = server.local_addr().unwrap();

        let client = thread::spawn(move || {
            send(
                addr,
                "GET /callback?error=access_denied&error_description=%3Cb%3Eno%3C%2Fb%3E HTTP/1.1",
            )
        });

        let result = server.wait(Duration::from_secs(10));
        let page = client.join().unwrap();

        assert!(matches!(result, CallbackResult::Success(url) if url.contains("error=access_denied")));
        assert!(page.contains("&lt;b&gt;no&lt;/b&gt;"));
    }

    #[test]
    fn test_times_out() {
        let server = ephemeral();
        assert_eq!(server.wait(Duration::from_millis(250)), CallbackResult::TimedOut);
    }

    #[test]
    fn test_rejects_redirect_without_port() {
        assert!(CallbackServer::bind("not a url").is_err());
    }
}
