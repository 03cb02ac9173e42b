//! Streaming channel between the client and a provider session.
//!
//! The client owns the channel through a [`ChannelHandle`] and learns about
//! it through a [`ChannelListener`]. [`WebSocketTransport`] is the default
//! [`ChannelTransport`]; tests substitute their own.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::ChannelError;

/// Receives the lifecycle and messages of one channel.
///
/// Each callback may run on a transport task; implementations must not block.
pub trait ChannelListener: Send + Sync {
    /// The channel is connected.
    fn on_open(&self);
    /// A text message arrived.
    fn on_message(&self, data: &str);
    /// The channel ended, for any reason. Called at most once.
    fn on_close(&self);
}

/// Owned handle to an open channel.
pub trait ChannelHandle: Send + Sync {
    /// Requests the channel to close. Idempotent.
    fn close(&self);
}

/// Opens channels.
pub trait ChannelTransport: Send + Sync {
    /// Starts connecting to `url` and returns immediately.
    ///
    /// Connection failures are reported as [`ChannelListener::on_close`].
    fn open(&self, url: Url, listener: Arc<dyn ChannelListener>) -> Box<dyn ChannelHandle>;
}

/// WebSocket channel transport.
///
/// `http` URLs connect over `ws`, `https` URLs over `wss`. Each channel runs
/// on its own tokio task, so [`open`](ChannelTransport::open) must be called
/// inside a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Creates the transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ChannelTransport for WebSocketTransport {
    fn open(&self, url: Url, listener: Arc<dyn ChannelListener>) -> Box<dyn ChannelHandle> {
        let token = CancellationToken::new();
        #[cfg(feature = "telemetry")]
        let span = tracing::info_span!("wmp.channel", url = %url);
        let task = run_channel(url, listener, token.clone());
        #[cfg(feature = "telemetry")]
        let task = tracing::Instrument::instrument(task, span);
        tokio::spawn(task);
        Box::new(WebSocketHandle { token })
    }
}

/// Handle to a [`WebSocketTransport`] channel.
#[derive(Debug)]
pub struct WebSocketHandle {
    token: CancellationToken,
}

impl ChannelHandle for WebSocketHandle {
    fn close(&self) {
        self.token.cancel();
    }
}

/// Maps a channel URL to its WebSocket equivalent.
///
/// # Errors
///
/// Returns [`ChannelError::UnsupportedScheme`] for schemes other than
/// `http`, `https`, `ws` and `wss`.
pub fn websocket_url(url: &Url) -> Result<Url, ChannelError> {
    let unsupported = || ChannelError::UnsupportedScheme {
        scheme: url.scheme().to_owned(),
        url: url.to_string(),
    };
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(unsupported()),
    };
    let mut ws = url.clone();
    ws.set_scheme(scheme).map_err(|()| unsupported())?;
    Ok(ws)
}

async fn run_channel(url: Url, listener: Arc<dyn ChannelListener>, token: CancellationToken) {
    #[cfg(feature = "telemetry")]
    {
        if let Err(err) = drive(&url, listener.as_ref(), &token).await {
            tracing::warn!(error = %err, "Channel ended with error");
        }
        tracing::debug!("Channel closed");
    }
    #[cfg(not(feature = "telemetry"))]
    {
        let _ = drive(&url, listener.as_ref(), &token).await;
    }
    listener.on_close();
}

async fn drive(
    url: &Url,
    listener: &dyn ChannelListener,
    token: &CancellationToken,
) -> Result<(), ChannelError> {
    let ws_url = websocket_url(url)?;
    let (mut stream, _response) = tokio::select! {
        () = token.cancelled() => return Ok(()),
        connected = connect_async(ws_url.as_str()) => {
            connected.map_err(|source| ChannelError::Connect {
                url: ws_url.to_string(),
                source,
            })?
        }
    };

    #[cfg(feature = "telemetry")]
    tracing::debug!("Channel open");
    listener.on_open();

    loop {
        tokio::select! {
            () = token.cancelled() => {
                stream.close(None).await?;
                return Ok(());
            }
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => listener.on_message(text.as_str()),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => listener.on_message(text),
                    Err(_) => {
                        #[cfg(feature = "telemetry")]
                        tracing::warn!(len = bytes.len(), "Dropping non UTF-8 binary frame");
                    }
                },
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::SinkExt;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[derive(Debug, PartialEq, Eq)]
    enum Seen {
        Open,
        Message(String),
        Close,
    }

    struct Recorder(mpsc::UnboundedSender<Seen>);

    impl ChannelListener for Recorder {
        fn on_open(&self) {
            let _ = self.0.send(Seen::Open);
        }

        fn on_message(&self, data: &str) {
            let _ = self.0.send(Seen::Message(data.to_owned()));
        }

        fn on_close(&self) {
            let _ = self.0.send(Seen::Close);
        }
    }

    fn recorder() -> (Arc<dyn ChannelListener>, mpsc::UnboundedReceiver<Seen>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Recorder(tx)), rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("listener callback timed out")
            .expect("listener dropped")
    }

    #[test]
    fn test_websocket_url_maps_schemes() {
        let http = Url::parse("http://wmp.example/api/me/sessions/s1/channel").unwrap();
        assert_eq!(
            websocket_url(&http).unwrap().as_str(),
            "ws://wmp.example/api/me/sessions/s1/channel"
        );

        let https = Url::parse("https://wmp.example:8443/c?x=1").unwrap();
        assert_eq!(
            websocket_url(&https).unwrap().as_str(),
            "wss://wmp.example:8443/c?x=1"
        );

        let wss = Url::parse("wss://wmp.example/c").unwrap();
        assert_eq!(websocket_url(&wss).unwrap(), wss);
    }

    #[test]
    fn test_websocket_url_rejects_other_schemes() {
        let ftp = Url::parse("ftp://wmp.example/c").unwrap();
        assert!(matches!(
            websocket_url(&ftp),
            Err(ChannelError::UnsupportedScheme { scheme, .. }) if scheme == "ftp"
        ));
    }

    #[tokio::test]
    async fn test_websocket_channel_delivers_messages() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = server.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::text(r#"{"amount":"1"}"#)).await.unwrap();
            ws.send(Message::binary(b"raw".to_vec())).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let (listener, mut rx) = recorder();
        let url = Url::parse(&format!("http://{addr}/api/me/sessions/s1/channel")).unwrap();
        let _handle = WebSocketTransport::new().open(url, listener);

        assert_eq!(next(&mut rx).await, Seen::Open);
        assert_eq!(
            next(&mut rx).await,
            Seen::Message(r#"{"amount":"1"}"#.to_owned())
        );
        assert_eq!(next(&mut rx).await, Seen::Message("raw".to_owned()));
        assert_eq!(next(&mut rx).await, Seen::Close);
    }

    #[tokio::test]
    async fn test_websocket_handle_close_ends_channel() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = server.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (listener, mut rx) = recorder();
        let url = Url::parse(&format!("http://{addr}/channel")).unwrap();
        let handle = WebSocketTransport::new().open(url, listener);

        assert_eq!(next(&mut rx).await, Seen::Open);
        handle.close();
        handle.close();
        assert_eq!(next(&mut rx).await, Seen::Close);
    }

    #[tokio::test]
    async fn test_websocket_connect_failure_reports_close() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        drop(server);

        let (listener, mut rx) = recorder();
        let url = Url::parse(&format!("http://{addr}/channel")).unwrap();
        let _handle = WebSocketTransport::new().open(url, listener);

        assert_eq!(next(&mut rx).await, Seen::Close);
    }

    #[tokio::test]
    async fn test_unsupported_scheme_reports_close() {
        let (listener, mut rx) = recorder();
        let url = Url::parse("ftp://wmp.example/channel").unwrap();
        let _handle = WebSocketTransport::new().open(url, listener);

        assert_eq!(next(&mut rx).await, Seen::Close);
    }
}
