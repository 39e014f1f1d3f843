//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Performs protocol version negotiation
//! - Forwards host events to the engine and acknowledges them
//! - Answers control requests with exactly one response each
//! - Registers the client for host directives on `SUBSCRIBE`
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in graceful disconnect

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use webtime_protocol::{ClientMessage, DaemonMessage, ErrorCode, MessageType, ProtocolVersion};

use crate::engine::{EngineError, EngineHandle, HostEvent};

/// Type alias for subscriber writer handle
pub type SubscriberWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// A host connection that receives directives.
pub struct Subscriber {
    pub writer: SubscriberWriter,
}

/// Subscribers keyed by client id.
pub type SubscribersMap = Arc<RwLock<HashMap<String, Subscriber>>>;

/// Maximum number of concurrently subscribed hosts
pub const MAX_SUBSCRIBERS: usize = 10;

/// Maximum message size (4 MB, import documents can be large)
const MAX_MESSAGE_SIZE: usize = 4 * 1_048_576;

/// Read timeout for idle connections (30 minutes; hosts stay connected)
const READ_TIMEOUT: Duration = Duration::from_secs(1800);

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

type ClientId = String;

pub struct ConnectionHandler {
    reader: BufReader<OwnedReadHalf>,
    writer: SubscriberWriter,
    engine: EngineHandle,
    subscribers: SubscribersMap,
    client_id: Option<ClientId>,
    connection_number: u64,
    /// Sent to hosts in the handshake.
    idle_threshold_secs: u64,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        engine: EngineHandle,
        subscribers: SubscribersMap,
        connection_number: u64,
        idle_threshold_secs: u64,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            engine,
            subscribers,
            client_id: None,
            connection_number,
            idle_threshold_secs,
        }
    }

    /// Performs the handshake, then processes messages until the client
    /// goes away. Returns the client id so the server can drop the
    /// subscription.
    pub async fn run(mut self) -> Option<ClientId> {
        debug!(connection = self.connection_number, "New client connected");

        if let Err(e) = self.handle_handshake().await {
            warn!(
                connection = self.connection_number,
                error = %e,
                "Handshake failed"
            );
            return None;
        }
        info!(client_id = ?self.client_id, "Client handshake completed");

        let client_id = self.client_id.clone();

        if let Err(e) = self.process_messages().await {
            debug!(client_id = ?self.client_id, error = %e, "Connection closed");
        }

        info!(client_id = ?self.client_id, "Client disconnected");
        client_id
    }

    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = self.read_message().await?;

        let client_version = msg.protocol_version;
        if let Err(e) = ProtocolVersion::CURRENT.check_client(&client_version) {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );
            self.send_message(DaemonMessage::rejected(&e.to_string()))
                .await?;
            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.message {
            MessageType::Connect { client_id } => {
                let assigned_id =
                    client_id.unwrap_or_else(|| format!("client-{}", self.connection_number));
                self.client_id = Some(assigned_id.clone());
                self.send_message(DaemonMessage::connected(
                    assigned_id,
                    self.idle_threshold_secs,
                ))
                .await
            }
            other => {
                self.send_message(DaemonMessage::error_with_code(
                    "Expected Connect message for handshake",
                    ErrorCode::Protocol,
                ))
                .await?;
                Err(ConnectionError::UnexpectedMessage(format!("{other:?}")))
            }
        }
    }

    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        loop {
            let msg = match timeout(READ_TIMEOUT, self.read_message()).await {
                Ok(Ok(msg)) => msg,
                Ok(Err(ConnectionError::Eof)) => {
                    debug!(client_id = ?self.client_id, "Client sent EOF");
                    return Ok(());
                }
                Ok(Err(ConnectionError::ParseError(reason))) => {
                    // A bad line does not end the connection.
                    warn!(client_id = ?self.client_id, error = %reason, "Unparseable message");
                    self.send_message(DaemonMessage::error_with_code(
                        &format!("Parse error: {reason}"),
                        ErrorCode::Protocol,
                    ))
                    .await?;
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!(client_id = ?self.client_id, "Connection timed out");
                    return Err(ConnectionError::Timeout);
                }
            };

            if let Err(e) = self.handle_message(msg).await {
                if matches!(e, ConnectionError::Eof) {
                    return Ok(());
                }
                return Err(e);
            }
        }
    }

    async fn handle_message(&mut self, msg: ClientMessage) -> Result<(), ConnectionError> {
        let response = match msg.message {
            MessageType::Connect { .. } => {
                DaemonMessage::error_with_code("Already connected", ErrorCode::Protocol)
            }

            MessageType::Subscribe => return self.handle_subscribe().await,

            MessageType::Unsubscribe => {
                if let Some(ref client_id) = self.client_id {
                    let mut subs = self.subscribers.write().await;
                    subs.remove(client_id);
                    self.engine.host_presence().set(subs.len());
                }
                debug!(client_id = ?self.client_id, "Client unsubscribed");
                DaemonMessage::ack(true)
            }

            MessageType::Ping { seq } => DaemonMessage::pong(seq),

            MessageType::Disconnect => {
                debug!(client_id = ?self.client_id, "Client requested disconnect");
                return Err(ConnectionError::Eof);
            }

            MessageType::TabActivated {
                tab_id,
                url,
                favicon_url,
            } => {
                self.forward_event(HostEvent::TabActivated {
                    tab_id,
                    url,
                    favicon_url,
                })
                .await
            }
            MessageType::TabUpdated {
                tab_id,
                url,
                favicon_url,
            } => {
                self.forward_event(HostEvent::TabUpdated {
                    tab_id,
                    url,
                    favicon_url,
                })
                .await
            }
            MessageType::TabRemoved { tab_id } => {
                self.forward_event(HostEvent::TabRemoved { tab_id }).await
            }
            MessageType::WindowFocusChanged {
                focused,
                tab_id,
                url,
                favicon_url,
            } => {
                self.forward_event(HostEvent::WindowFocusChanged {
                    focused,
                    tab_id,
                    url,
                    favicon_url,
                })
                .await
            }
            MessageType::IdleStateChanged { state } => {
                self.forward_event(HostEvent::IdleStateChanged(state)).await
            }

            request => control_response(&self.engine, request).await,
        };

        self.send_message(response).await
    }

    async fn forward_event(&self, event: HostEvent) -> DaemonMessage {
        match self.engine.host_event(event).await {
            Ok(()) => DaemonMessage::ack(true),
            Err(e) => error_response(&e),
        }
    }

    async fn handle_subscribe(&mut self) -> Result<(), ConnectionError> {
        let Some(client_id) = self.client_id.clone() else {
            return self
                .send_message(DaemonMessage::error_with_code(
                    "Must connect before subscribing",
                    ErrorCode::Protocol,
                ))
                .await;
        };

        {
            let mut subs = self.subscribers.write().await;
            if subs.len() >= MAX_SUBSCRIBERS && !subs.contains_key(&client_id) {
                drop(subs);
                return self
                    .send_message(DaemonMessage::error_with_code(
                        &format!("Too many subscribers (max: {MAX_SUBSCRIBERS})"),
                        ErrorCode::Unavailable,
                    ))
                    .await;
            }
            subs.insert(
                client_id.clone(),
                Subscriber {
                    writer: Arc::clone(&self.writer),
                },
            );
            self.engine.host_presence().set(subs.len());
        }
        debug!(client_id = %client_id, "Client subscribed to directives");

        // New hosts start from the full current rule set.
        let response = match self.engine.rules().await {
            Ok(rules) => DaemonMessage::InstallRules { rules },
            Err(e) => error_response(&e),
        };
        self.send_message(response).await
    }

    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        let mut line = String::new();

        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if bytes_read == 0 {
            return Err(ConnectionError::Eof);
        }

        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let msg: ClientMessage = serde_json::from_str(&line)
            .map_err(|e| ConnectionError::ParseError(e.to_string()))?;

        debug!(
            client_id = ?self.client_id,
            message_type = ?std::mem::discriminant(&msg.message),
            "Received message"
        );

        Ok(msg)
    }

    async fn send_message(&self, msg: DaemonMessage) -> Result<(), ConnectionError> {
        write_message(&self.writer, &msg).await
    }
}

/// Serialises `msg` as one line and writes it with a timeout.
pub async fn write_message(
    writer: &SubscriberWriter,
    msg: &DaemonMessage,
) -> Result<(), ConnectionError> {
    let json =
        serde_json::to_string(msg).map_err(|e| ConnectionError::ParseError(e.to_string()))?;

    let mut writer = writer.lock().await;

    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

fn error_response(err: &EngineError) -> DaemonMessage {
    DaemonMessage::error_with_code(&err.to_string(), err.code())
}

/// Runs one control request against the engine.
async fn control_response(engine: &EngineHandle, request: MessageType) -> DaemonMessage {
    let result = match request {
        MessageType::GetTodayStats => engine
            .today_stats()
            .await
            .map(|stats| DaemonMessage::TodayStats {
                daily: stats.daily,
                websites: stats.websites,
            }),
        MessageType::GetWeeklyStats {
            start_date,
            end_date,
        } => engine
            .weekly_stats(start_date, end_date)
            .await
            .map(|activities| DaemonMessage::WeeklyStats { activities }),
        MessageType::GetWebsiteList { date } => engine
            .website_list(date)
            .await
            .map(|websites| DaemonMessage::WebsiteList { websites }),
        MessageType::UpdateTimer {
            domain,
            time_limit,
            enabled,
        } => engine
            .update_timer(domain, time_limit, enabled)
            .await
            .map(|_| DaemonMessage::ack(true)),
        MessageType::DeleteTimer { domain } => engine
            .delete_timer(domain)
            .await
            .map(DaemonMessage::ack),
        MessageType::AddBlockedUrl { url_pattern } => engine
            .add_blocked_url(url_pattern)
            .await
            .map(|_| DaemonMessage::ack(true)),
        MessageType::RemoveBlockedUrl { id } => engine
            .remove_blocked_url(id)
            .await
            .map(DaemonMessage::ack),
        MessageType::GetSettings => engine
            .settings()
            .await
            .map(|settings| DaemonMessage::Settings { settings }),
        MessageType::UpdateSettings { settings } => engine
            .update_settings(settings)
            .await
            .map(|_| DaemonMessage::ack(true)),
        MessageType::GetAllTimers => engine
            .all_timers()
            .await
            .map(|timers| DaemonMessage::Timers { timers }),
        MessageType::GetBlockedWebsites => engine
            .blocked_websites()
            .await
            .map(|blocked| DaemonMessage::Blocked { blocked }),
        MessageType::ExportData => engine
            .export_data()
            .await
            .map(|snapshot| DaemonMessage::ExportedData { snapshot }),
        MessageType::ImportData { snapshot } => engine
            .import_data(snapshot)
            .await
            .map(|()| DaemonMessage::ack(true)),
        MessageType::CheckUrl { url } => engine
            .check_url(url.clone())
            .await
            .map(|rule| DaemonMessage::url_verdict(url, rule.as_ref())),
        MessageType::GetTrackingState => engine
            .tracking_state()
            .await
            .map(|tracking| DaemonMessage::TrackingState { tracking }),
        other => {
            return DaemonMessage::error_with_code(
                &format!("Unexpected message: {other:?}"),
                ErrorCode::Protocol,
            )
        }
    };

    result.unwrap_or_else(|e| error_response(&e))
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}
