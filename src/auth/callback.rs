// Short-lived local HTTP listener for OAuth redirects

use crate::error::{GatewayError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Outcome of one OAuth redirect hitting the local listener.
#[derive(Debug, Clone)]
pub enum CallbackResult {
    Code { code: String, state: String },
    Denied { error: String },
}

/// One listener per login attempt. Binds an ephemeral loopback port,
/// serves exactly one redirect, then shuts down.
pub struct CallbackServer {
    port: u16,
    receiver: oneshot::Receiver<CallbackResult>,
}

const SUCCESS_PAGE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
    <html><body><h1>Authentication Successful!</h1>\
    <p>You can close this tab and return to the terminal.</p></body></html>";

impl CallbackServer {
    /// Bind the listener and start accepting in the background.
    pub async fn start(callback_path: &'static str) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| GatewayError::Auth(format!("failed to bind callback server: {}", e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| GatewayError::Auth(e.to_string()))?
            .port();

        debug!("OAuth callback server listening on port {}", port);

        let (sender, receiver) = oneshot::channel();
        tokio::spawn(accept_loop(listener, callback_path, sender));

        Ok(Self { port, receiver })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn redirect_uri(&self, callback_path: &str) -> String {
        format!("http://localhost:{}{}", self.port, callback_path)
    }

    /// Non-blocking check whether the redirect has arrived yet.
    pub fn try_take(&mut self) -> Option<CallbackResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(_) => None,
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    callback_path: &'static str,
    sender: oneshot::Sender<CallbackResult>,
) {
    loop {
        let (mut stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Callback server accept failed: {}", e);
                return;
            }
        };

        let mut buf = vec![0u8; 4096];
        let n = match stream.read(&mut buf).await {
            Ok(n) => n,
            Err(_) => continue,
        };
        let request = String::from_utf8_lossy(&buf[..n]);
        let request_line = request.lines().next().unwrap_or_default();

        if !request_line.starts_with(&format!("GET {}", callback_path)) {
            let _ = stream
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
                .await;
            continue;
        }

        let result = parse_redirect(request_line);

        match &result {
            Some(CallbackResult::Denied { error }) => {
                let page = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
                     <html><body><h1>Authentication Failed</h1><p>Error: {}</p>\
                     <p>You can close this tab.</p></body></html>",
                    error
                );
                let _ = stream.write_all(page.as_bytes()).await;
            }
            _ => {
                let _ = stream.write_all(SUCCESS_PAGE.as_bytes()).await;
            }
        }

        if let Some(result) = result {
            let _ = sender.send(result);
        } else {
            let _ = sender.send(CallbackResult::Denied {
                error: "missing code or state in callback".to_string(),
            });
        }
        return;
    }
}

/// Extract query parameters from the request line of the redirect.
fn parse_redirect(request_line: &str) -> Option<CallbackResult> {
    let query_start = request_line.find('?')?;
    let query_end = request_line.find(" HTTP").unwrap_or(request_line.len());
    let query = &request_line[query_start + 1..query_end];

    let mut code = None;
    let mut state = None;
    let mut error = None;

    for param in query.split('&') {
        if let Some((key, value)) = param.split_once('=') {
            let value = urlencoding::decode(value).ok()?.into_owned();
            match key {
                "code" => code = Some(value),
                "state" => state = Some(value),
                "error" => error = Some(value),
                _ => {}
            }
        }
    }

    if let Some(error) = error {
        return Some(CallbackResult::Denied { error });
    }
    match (code, state) {
        (Some(code), Some(state)) => Some(CallbackResult::Code { code, state }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_code_and_state() {
        let line = "GET /oauth2callback?code=abc%2F123&state=xyz HTTP/1.1";
        match parse_redirect(line) {
            Some(CallbackResult::Code { code, state }) => {
                assert_eq!(code, "abc/123");
                assert_eq!(state, "xyz");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn parses_denial() {
        let line = "GET /oauth2callback?error=access_denied HTTP/1.1";
        assert!(matches!(
            parse_redirect(line),
            Some(CallbackResult::Denied { .. })
        ));
    }

    #[tokio::test]
    async fn serves_one_redirect() {
        let mut server = CallbackServer::start("/oauth2callback").await.unwrap();
        let uri = server.redirect_uri("/oauth2callback");
        assert!(uri.starts_with("http://localhost:"));
        assert!(server.try_take().is_none());

        let port = server.port();
        let mut client = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();
        client
            .write_all(b"GET /oauth2callback?code=c&state=s HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.contains("Authentication Successful"));

        // Give the accept task a moment to push the result.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(matches!(
            server.try_take(),
            Some(CallbackResult::Code { .. })
        ));
    }
}
