//! WebSocket dialing over `tokio-tungstenite`.

use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use tether_core::error::{Result, TetherError};

pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Open one socket to `url`, offering `protocols` if any.
pub async fn dial(url: &str, protocols: &[String]) -> Result<WsStream> {
    let mut request = url
        .into_client_request()
        .map_err(|e| TetherError::Transport(format!("invalid url {url}: {e}")))?;

    if !protocols.is_empty() {
        let value = HeaderValue::from_str(&protocols.join(", "))
            .map_err(|e| TetherError::Transport(format!("invalid sub-protocol list: {e}")))?;
        request.headers_mut().insert("Sec-WebSocket-Protocol", value);
    }

    let (stream, response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| TetherError::Transport(format!("connect failed: {e}")))?;

    if let Some(p) = response.headers().get("Sec-WebSocket-Protocol") {
        tracing::debug!(url, protocol = ?p, "sub-protocol negotiated");
    }
    Ok(stream)
}
