//! Native WebSocket transport to the relay.
//!
//! A background thread owns the socket. Outgoing text goes through a
//! command channel and decoded [`SyncEvent`]s come back on an event channel,
//! so the owner only ever polls.

#[cfg(not(target_arch = "wasm32"))]
mod native_client {
    use std::net::TcpStream;
    use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use tungstenite::stream::MaybeTlsStream;
    use tungstenite::{Message, WebSocket, connect};
    use url::Url;

    use crate::error::{SyncError, SyncResult};
    use crate::protocol::{ConnectionState, ServerMessage, SyncEvent};

    const READ_TIMEOUT: Duration = Duration::from_millis(50);
    const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

    enum WsCommand {
        Send(String),
        Close,
    }

    /// WebSocket client backed by a worker thread.
    pub struct NativeWebSocket {
        state: ConnectionState,
        events: Vec<SyncEvent>,
        cmd_tx: Option<Sender<WsCommand>>,
        event_rx: Option<Receiver<SyncEvent>>,
        _thread: Option<JoinHandle<()>>,
    }

    impl NativeWebSocket {
        pub fn new() -> Self {
            Self {
                state: ConnectionState::Disconnected,
                events: Vec::new(),
                cmd_tx: None,
                event_rx: None,
                _thread: None,
            }
        }

        /// Start connecting to `url`. Progress is reported through [`poll_events`](Self::poll_events).
        pub fn connect(&mut self, url: &str) -> SyncResult<()> {
            if self.cmd_tx.is_some() {
                return Err(SyncError::Transport("already connected".to_string()));
            }
            validate_url(url)?;

            self.state = ConnectionState::Connecting;
            let (cmd_tx, cmd_rx) = channel::<WsCommand>();
            let (event_tx, event_rx) = channel::<SyncEvent>();
            let url = url.to_string();

            let handle = thread::spawn(move || {
                log::info!("WebSocket thread: connecting to {}", url);
                match connect(&url) {
                    Ok((mut socket, response)) => {
                        log::info!("WebSocket connected, status: {}", response.status());
                        let _ = event_tx.send(SyncEvent::Connected);
                        set_timeouts(&mut socket);
                        run_socket(&mut socket, &cmd_rx, &event_tx);
                        log::info!("WebSocket thread exiting");
                        let _ = event_tx.send(SyncEvent::Disconnected);
                    }
                    Err(e) => {
                        log::error!("WebSocket connection failed: {}", e);
                        let _ = event_tx.send(SyncEvent::Error {
                            message: format!("Connection failed: {}", e),
                        });
                    }
                }
            });

            self.cmd_tx = Some(cmd_tx);
            self.event_rx = Some(event_rx);
            self._thread = Some(handle);
            Ok(())
        }

        /// Close the connection. The next [`poll_events`](Self::poll_events)
        /// ends with `Disconnected`.
        pub fn disconnect(&mut self) {
            if let Some(tx) = self.cmd_tx.take() {
                let _ = tx.send(WsCommand::Close);
            }
            self.drain();
            if self.state != ConnectionState::Disconnected {
                self.events.push(SyncEvent::Disconnected);
            }
            self.event_rx = None;
            self._thread = None;
            self.state = ConnectionState::Disconnected;
        }

        /// Queue a text frame for the worker thread.
        pub fn send(&self, msg: &str) -> SyncResult<()> {
            match self.cmd_tx {
                Some(ref tx) => tx
                    .send(WsCommand::Send(msg.to_string()))
                    .map_err(|e| SyncError::Transport(format!("send failed: {}", e))),
                None => Err(SyncError::Transport("not connected".to_string())),
            }
        }

        /// Drain pending events (non-blocking).
        pub fn poll_events(&mut self) -> Vec<SyncEvent> {
            self.drain();
            std::mem::take(&mut self.events)
        }

        fn drain(&mut self) {
            if let Some(ref rx) = self.event_rx {
                while let Ok(event) = rx.try_recv() {
                    match &event {
                        SyncEvent::Connected => self.state = ConnectionState::Connected,
                        SyncEvent::Disconnected => self.state = ConnectionState::Disconnected,
                        SyncEvent::Error { .. } => self.state = ConnectionState::Error,
                        _ => {}
                    }
                    self.events.push(event);
                }
            }
        }

        pub fn state(&self) -> ConnectionState {
            self.state
        }

        pub fn is_connected(&self) -> bool {
            self.state == ConnectionState::Connected
        }
    }

    impl Default for NativeWebSocket {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Drop for NativeWebSocket {
        fn drop(&mut self) {
            self.disconnect();
        }
    }

    fn validate_url(url: &str) -> SyncResult<()> {
        let parsed = Url::parse(url).map_err(|e| SyncError::Transport(format!("invalid URL: {}", e)))?;
        match parsed.scheme() {
            "ws" | "wss" => Ok(()),
            other => Err(SyncError::Transport(format!("invalid WebSocket URL scheme: {}", other))),
        }
    }

    fn set_timeouts(socket: &mut WebSocket<MaybeTlsStream<TcpStream>>) {
        match socket.get_mut() {
            MaybeTlsStream::Plain(tcp) => {
                let _ = tcp.set_read_timeout(Some(READ_TIMEOUT));
                let _ = tcp.set_write_timeout(Some(WRITE_TIMEOUT));
            }
            #[allow(unreachable_patterns)]
            _ => log::debug!("TLS or other stream, using default timeout handling"),
        }
    }

    fn run_socket(
        socket: &mut WebSocket<MaybeTlsStream<TcpStream>>,
        cmd_rx: &Receiver<WsCommand>,
        event_tx: &Sender<SyncEvent>,
    ) {
        loop {
            match cmd_rx.try_recv() {
                Ok(WsCommand::Send(msg)) => {
                    log::debug!("WebSocket sending {} bytes", msg.len());
                    if let Err(e) = socket.send(Message::Text(msg)) {
                        log::error!("WebSocket send error: {}", e);
                        return;
                    }
                }
                Ok(WsCommand::Close) => {
                    log::info!("WebSocket close requested");
                    let _ = socket.close(None);
                    return;
                }
                Err(TryRecvError::Disconnected) => {
                    log::info!("WebSocket command channel disconnected");
                    return;
                }
                Err(TryRecvError::Empty) => {}
            }

            match socket.read() {
                Ok(Message::Text(txt)) => {
                    let event = ServerMessage::from_json(&txt).and_then(SyncEvent::from_server_message);
                    match event {
                        Ok(event) => {
                            let _ = event_tx.send(event);
                        }
                        Err(e) => log::warn!("Dropping server message: {}", e),
                    }
                }
                Ok(Message::Ping(data)) => {
                    let _ = socket.send(Message::Pong(data));
                }
                Ok(Message::Close(_)) => {
                    log::info!("WebSocket received close frame");
                    return;
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(ref e))
                    if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    log::error!("WebSocket read error: {}", e);
                    return;
                }
            }
        }
    }

}

#[cfg(not(target_arch = "wasm32"))]
pub use native_client::NativeWebSocket;

/// Platform-specific WebSocket client type.
#[cfg(not(target_arch = "wasm32"))]
pub type PlatformWebSocket = NativeWebSocket;
