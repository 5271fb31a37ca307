use std::io::ErrorKind;
use std::net::TcpStream;
use std::time::Duration;

use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use super::{Channel, ConnectionError, Connector, Endpoint};

/// Blocking WebSocket transport. Reads time out after `read_timeout` so
/// the worker can interleave sends with receives on one thread.
#[derive(Debug, Clone)]
pub struct WsConnector {
    read_timeout: Duration,
}

impl WsConnector {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

impl Connector for WsConnector {
    fn open(&mut self, endpoint: &Endpoint) -> Result<Box<dyn Channel>, ConnectionError> {
        let connect_error = |reason: String| ConnectionError::Connect {
            endpoint: endpoint.to_string(),
            reason,
        };
        let (mut socket, response) =
            tungstenite::connect(endpoint.url()).map_err(|err| connect_error(err.to_string()))?;
        tracing::debug!(status = %response.status(), "websocket handshake complete");
        if let MaybeTlsStream::Plain(stream) = socket.get_mut() {
            stream
                .set_read_timeout(Some(self.read_timeout))
                .map_err(|err| connect_error(format!("setting read timeout: {err}")))?;
        }
        Ok(Box::new(WsChannel { socket }))
    }
}

struct WsChannel {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl Channel for WsChannel {
    fn send_text(&mut self, text: &str) -> Result<(), ConnectionError> {
        self.socket
            .send(Message::text(text.to_owned()))
            .map_err(|err| ConnectionError::Send(err.to_string()))
    }

    fn poll_text(&mut self) -> Result<Option<String>, ConnectionError> {
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(Some(text.as_str().to_owned())),
            // Some server builds write JSON as binary frames.
            Ok(Message::Binary(bytes)) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|err| ConnectionError::Receive(format!("non-utf8 frame: {err}"))),
            Ok(Message::Close(frame)) => {
                tracing::debug!(?frame, "server closed websocket");
                Err(ConnectionError::Closed)
            }
            Ok(_) => Ok(None),
            Err(tungstenite::Error::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(None)
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Err(ConnectionError::Closed)
            }
            Err(err) => Err(ConnectionError::Receive(err.to_string())),
        }
    }

    fn close(&mut self) {
        if let Err(err) = self.socket.close(None) {
            tracing::debug!(%err, "closing websocket");
        }
        let _ = self.socket.flush();
    }
}
