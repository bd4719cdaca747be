use super::{
    notify::GatewayHandle,
    protocol::{self, GatewayPayload, Hello, MessageCreate, Ready},
    GatewayError, GatewayStatus, StatusRegister,
};
use crate::config::Config;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Timeout for the websocket handshake and the HELLO that follows it.
const CONNECT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub token: Option<String>,
    pub gateway_url: String,
    pub command: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl GatewaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            token: config.bot_token.clone(),
            gateway_url: config.gateway_url.clone(),
            command: config.bot_command.clone(),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// What survives a dropped connection so the next one can resume.
#[derive(Debug, Default)]
struct ResumeState {
    session_id: Option<String>,
    resume_url: Option<String>,
    seq: Option<u64>,
}

/// Long-lived gateway connection that publishes its lifecycle to a
/// [`StatusRegister`].
pub struct GatewayClient {
    settings: GatewaySettings,
    register: StatusRegister,
    outbox: GatewayHandle,
}

impl GatewayClient {
    pub fn new(settings: GatewaySettings, register: StatusRegister, outbox: GatewayHandle) -> Self {
        Self {
            settings,
            register,
            outbox,
        }
    }

    /// Connect and keep reconnecting until an unrecoverable failure.
    pub async fn run(self) -> Result<(), GatewayError> {
        let Some(token) = self.settings.token.clone() else {
            error!("DISCORD_BOT_TOKEN is not set, gateway will not start");
            self.register.set(GatewayStatus::Error);
            return Err(GatewayError::MissingToken);
        };

        let mut state = ResumeState::default();
        let mut backoff = self.settings.initial_backoff;

        loop {
            let url = match (&state.session_id, &state.resume_url) {
                (Some(_), Some(resume_url)) => protocol::resume_url(resume_url),
                _ => self.settings.gateway_url.clone(),
            };

            match self.connect_once(&token, &url, &mut state).await {
                Ok(()) => debug!("Gateway connection ended, reconnecting"),
                Err(err) if err.is_fatal() => {
                    error!("Gateway stopped: {}", err);
                    self.register.set(GatewayStatus::Error);
                    return Err(err);
                }
                Err(err) => warn!("Gateway connection lost: {}", err),
            }

            if self.register.status() == GatewayStatus::Online {
                self.register.set(GatewayStatus::Disconnected);
                backoff = self.settings.initial_backoff;
            }

            debug!(delay_ms = backoff.as_millis() as u64, "Waiting before reconnect");
            time::sleep(backoff).await;
            backoff = next_backoff(backoff, self.settings.max_backoff);
        }
    }

    /// Drive a single websocket connection until it drops.
    ///
    /// `Ok` means the gateway asked us to reconnect; transport failures and
    /// close frames come back as errors, fatal or not.
    async fn connect_once(
        &self,
        token: &str,
        url: &str,
        state: &mut ResumeState,
    ) -> Result<(), GatewayError> {
        debug!(url = %url, "Connecting to gateway");

        let (ws_stream, _response) =
            time::timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS), connect_async(url))
                .await
                .map_err(|_| GatewayError::Timeout("gateway handshake"))??;

        let (mut sink, mut stream) = ws_stream.split();

        let hello = time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_hello(&mut stream),
        )
        .await
        .map_err(|_| GatewayError::Timeout("HELLO"))??;

        match &state.session_id {
            Some(session_id) => {
                info!("Resuming gateway session");
                sink.send(Message::text(protocol::resume(token, session_id, state.seq)))
                    .await?;
            }
            None => {
                info!("Identifying with gateway");
                sink.send(Message::text(protocol::identify(token))).await?;
            }
        }

        let mut heartbeat = time::interval(Duration::from_millis(hello.heartbeat_interval.max(1)));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut awaiting_ack = false;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if awaiting_ack {
                        warn!("No heartbeat ACK since last beat, dropping connection");
                        let _ = sink.send(Message::Close(None)).await;
                        return Err(GatewayError::Protocol("heartbeat not acknowledged".into()));
                    }
                    sink.send(Message::text(protocol::heartbeat(state.seq))).await?;
                    awaiting_ack = true;
                }
                message = stream.next() => {
                    let message = match message {
                        Some(message) => message?,
                        None => return Err(GatewayError::Closed),
                    };

                    match message {
                        Message::Text(text) => {
                            let payload: GatewayPayload = match serde_json::from_str(text.as_str()) {
                                Ok(payload) => payload,
                                Err(e) => {
                                    warn!("Ignoring malformed gateway payload: {}", e);
                                    continue;
                                }
                            };
                            if let Some(seq) = payload.s {
                                state.seq = Some(seq);
                            }

                            match payload.op {
                                protocol::DISPATCH => self.handle_dispatch(payload, state),
                                protocol::HEARTBEAT => {
                                    sink.send(Message::text(protocol::heartbeat(state.seq))).await?;
                                }
                                protocol::HEARTBEAT_ACK => awaiting_ack = false,
                                protocol::RECONNECT => {
                                    info!("Gateway requested reconnect");
                                    let _ = sink.send(Message::Close(None)).await;
                                    return Ok(());
                                }
                                protocol::INVALID_SESSION => {
                                    let resumable = payload.d.as_bool().unwrap_or(false);
                                    warn!(resumable, "Gateway invalidated the session");
                                    if !resumable {
                                        *state = ResumeState::default();
                                    }
                                    let _ = sink.send(Message::Close(None)).await;
                                    return Ok(());
                                }
                                op => debug!(op, "Ignoring gateway opcode"),
                            }
                        }
                        Message::Close(frame) => return Err(close_error(frame)),
                        _ => {}
                    }
                }
            }
        }
    }

    fn handle_dispatch(&self, payload: GatewayPayload, state: &mut ResumeState) {
        match payload.t.as_deref() {
            Some("READY") => match serde_json::from_value::<Ready>(payload.d) {
                Ok(ready) => {
                    if let Some(user) = &ready.user {
                        info!(user_id = %user.id, username = %user.username, "Gateway ready");
                    }
                    state.session_id = Some(ready.session_id);
                    state.resume_url = ready.resume_gateway_url;
                    self.register.set(GatewayStatus::Online);
                }
                Err(e) => warn!("Malformed READY payload: {}", e),
            },
            Some("RESUMED") => {
                info!("Gateway session resumed");
                self.register.set(GatewayStatus::Online);
            }
            Some("MESSAGE_CREATE") => {
                let Ok(message) = serde_json::from_value::<MessageCreate>(payload.d) else {
                    return;
                };
                if message.author.bot || message.content.trim() != self.settings.command {
                    return;
                }
                debug!(author_id = %message.author.id, channel_id = %message.channel_id, "Login command received");
                if let Err(e) = self.outbox.notify(message.channel_id) {
                    warn!("Dropping login link: {}", e);
                }
            }
            Some(event) => debug!(event, "Ignoring dispatch"),
            None => {}
        }
    }
}

/// Doubles the reconnect delay up to `max`.
fn next_backoff(delay: Duration, max: Duration) -> Duration {
    delay.saturating_mul(2).min(max)
}

async fn read_hello<S>(stream: &mut S) -> Result<Hello, GatewayError>
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(message) = stream.next().await {
        match message? {
            Message::Text(text) => {
                let payload: GatewayPayload = serde_json::from_str(text.as_str())
                    .map_err(|e| GatewayError::Protocol(e.to_string()))?;
                if payload.op != protocol::HELLO {
                    return Err(GatewayError::Protocol(format!(
                        "expected HELLO, got opcode {}",
                        payload.op
                    )));
                }
                return serde_json::from_value(payload.d)
                    .map_err(|e| GatewayError::Protocol(format!("malformed HELLO: {}", e)));
            }
            Message::Close(frame) => return Err(close_error(frame)),
            _ => {}
        }
    }
    Err(GatewayError::Closed)
}

fn close_error(frame: Option<CloseFrame>) -> GatewayError {
    match frame {
        Some(frame) => {
            let code = u16::from(frame.code);
            let reason = frame.reason.as_str().to_string();
            if protocol::is_fatal_close(code) {
                GatewayError::Fatal { code, reason }
            } else {
                GatewayError::ClosedWith { code, reason }
            }
        }
        None => GatewayError::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::{accept_async, WebSocketStream};

    type ServerSocket = WebSocketStream<TcpStream>;

    const WAIT: Duration = Duration::from_secs(5);

    async fn listen() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    async fn accept(listener: &TcpListener) -> ServerSocket {
        let (stream, _) = time::timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        accept_async(stream).await.unwrap()
    }

    async fn send_json(ws: &mut ServerSocket, value: Value) {
        ws.send(Message::text(value.to_string())).await.unwrap();
    }

    async fn send_hello(ws: &mut ServerSocket) {
        send_json(ws, json!({ "op": 10, "d": { "heartbeat_interval": 45000 } })).await;
    }

    /// Read client payloads until one with `op` arrives, skipping heartbeats.
    async fn expect_op(ws: &mut ServerSocket, op: u8) -> Value {
        time::timeout(WAIT, async {
            loop {
                match ws.next().await.unwrap().unwrap() {
                    Message::Text(text) => {
                        let value: Value = serde_json::from_str(text.as_str()).unwrap();
                        if value["op"] == op {
                            return value;
                        }
                    }
                    _ => continue,
                }
            }
        })
        .await
        .unwrap()
    }

    /// Next client payload that is not a heartbeat.
    async fn next_command(ws: &mut ServerSocket) -> Value {
        time::timeout(WAIT, async {
            loop {
                if let Message::Text(text) = ws.next().await.unwrap().unwrap() {
                    let value: Value = serde_json::from_str(text.as_str()).unwrap();
                    if value["op"] != protocol::HEARTBEAT {
                        return value;
                    }
                }
            }
        })
        .await
        .unwrap()
    }

    async fn wait_for(register: &StatusRegister, status: GatewayStatus) {
        let mut rx = register.subscribe();
        time::timeout(WAIT, rx.wait_for(|s| s.status == status))
            .await
            .unwrap()
            .unwrap();
    }

    fn settings(url: &str, token: Option<&str>) -> GatewaySettings {
        GatewaySettings {
            token: token.map(str::to_string),
            gateway_url: url.to_string(),
            command: "!login".to_string(),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn connects_drops_and_resumes() {
        let (listener, url) = listen().await;
        let register = StatusRegister::new();
        let (outbox, _rx) = GatewayHandle::channel();
        let client = GatewayClient::new(settings(&url, Some("bot-token")), register.clone(), outbox);
        let task = tokio::spawn(client.run());

        let mut ws = accept(&listener).await;
        send_hello(&mut ws).await;
        let identify = expect_op(&mut ws, protocol::IDENTIFY).await;
        assert_eq!(identify["d"]["token"], "bot-token");
        assert_eq!(register.status(), GatewayStatus::Offline);

        send_json(
            &mut ws,
            json!({ "op": 0, "t": "READY", "s": 1, "d": { "session_id": "sess-1" } }),
        )
        .await;
        wait_for(&register, GatewayStatus::Online).await;

        // Drop the transport without a close handshake.
        drop(ws);
        wait_for(&register, GatewayStatus::Disconnected).await;

        let mut ws = accept(&listener).await;
        send_hello(&mut ws).await;
        let resume = expect_op(&mut ws, protocol::RESUME).await;
        assert_eq!(resume["d"]["session_id"], "sess-1");
        assert_eq!(resume["d"]["seq"], 1);
        assert_eq!(register.status(), GatewayStatus::Disconnected);

        send_json(&mut ws, json!({ "op": 0, "t": "RESUMED", "s": 2, "d": null })).await;
        wait_for(&register, GatewayStatus::Online).await;

        task.abort();
    }

    #[tokio::test]
    async fn authentication_failure_is_terminal() {
        let (listener, url) = listen().await;
        let register = StatusRegister::new();
        let (outbox, _rx) = GatewayHandle::channel();
        let client = GatewayClient::new(settings(&url, Some("bad-token")), register.clone(), outbox);
        let task = tokio::spawn(client.run());

        let mut ws = accept(&listener).await;
        send_hello(&mut ws).await;
        expect_op(&mut ws, protocol::IDENTIFY).await;
        ws.close(Some(CloseFrame {
            code: CloseCode::from(4004),
            reason: "Authentication failed.".into(),
        }))
        .await
        .unwrap();

        let result = time::timeout(WAIT, task).await.unwrap().unwrap();
        assert!(matches!(result, Err(GatewayError::Fatal { code: 4004, .. })));
        assert_eq!(register.status(), GatewayStatus::Error);
    }

    #[tokio::test]
    async fn missing_token_sets_error_without_connecting() {
        let register = StatusRegister::new();
        let (outbox, _rx) = GatewayHandle::channel();
        let client = GatewayClient::new(settings("ws://127.0.0.1:9", None), register.clone(), outbox);

        let result = client.run().await;
        assert!(matches!(result, Err(GatewayError::MissingToken)));
        assert_eq!(register.status(), GatewayStatus::Error);
    }

    #[tokio::test]
    async fn login_command_queues_notification() {
        let (listener, url) = listen().await;
        let register = StatusRegister::new();
        let (outbox, mut rx) = GatewayHandle::channel();
        let client = GatewayClient::new(settings(&url, Some("bot-token")), register.clone(), outbox);
        let task = tokio::spawn(client.run());

        let mut ws = accept(&listener).await;
        send_hello(&mut ws).await;
        expect_op(&mut ws, protocol::IDENTIFY).await;
        send_json(
            &mut ws,
            json!({ "op": 0, "t": "READY", "s": 1, "d": { "session_id": "sess-1" } }),
        )
        .await;

        // Bot-authored and unrelated messages are ignored.
        for (author_bot, content, channel) in [
            (true, "!login", "1"),
            (false, "hello", "2"),
            (false, "!login", "777"),
        ] {
            send_json(
                &mut ws,
                json!({
                    "op": 0, "t": "MESSAGE_CREATE", "s": 2,
                    "d": {
                        "channel_id": channel,
                        "content": content,
                        "author": { "id": "9", "bot": author_bot }
                    }
                }),
            )
            .await;
        }

        let notification = time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(notification.channel_id, "777");
        assert!(rx.try_recv().is_err());

        task.abort();
    }

    #[tokio::test]
    async fn reconnect_request_resumes_session() {
        let (listener, url) = listen().await;
        let register = StatusRegister::new();
        let (outbox, _rx) = GatewayHandle::channel();
        let client = GatewayClient::new(settings(&url, Some("bot-token")), register.clone(), outbox);
        let task = tokio::spawn(client.run());

        let mut ws = accept(&listener).await;
        send_hello(&mut ws).await;
        expect_op(&mut ws, protocol::IDENTIFY).await;
        send_json(
            &mut ws,
            json!({ "op": 0, "t": "READY", "s": 5, "d": { "session_id": "sess-9" } }),
        )
        .await;
        wait_for(&register, GatewayStatus::Online).await;
        send_json(&mut ws, json!({ "op": 7, "d": null })).await;

        let mut ws = accept(&listener).await;
        send_hello(&mut ws).await;
        let resume = expect_op(&mut ws, protocol::RESUME).await;
        assert_eq!(resume["d"]["session_id"], "sess-9");
        assert_eq!(resume["d"]["seq"], 5);

        task.abort();
    }

    #[tokio::test]
    async fn missed_heartbeat_ack_drops_connection() {
        let (listener, url) = listen().await;
        let register = StatusRegister::new();
        let (outbox, _rx) = GatewayHandle::channel();
        let client = GatewayClient::new(settings(&url, Some("bot-token")), register.clone(), outbox);
        let task = tokio::spawn(client.run());

        let mut ws = accept(&listener).await;
        send_json(&mut ws, json!({ "op": 10, "d": { "heartbeat_interval": 250 } })).await;
        expect_op(&mut ws, protocol::IDENTIFY).await;
        send_json(
            &mut ws,
            json!({ "op": 0, "t": "READY", "s": 1, "d": { "session_id": "sess-1" } }),
        )
        .await;
        wait_for(&register, GatewayStatus::Online).await;

        // Heartbeats arrive but are never acknowledged.
        expect_op(&mut ws, protocol::HEARTBEAT).await;
        wait_for(&register, GatewayStatus::Disconnected).await;

        task.abort();
    }

    #[tokio::test]
    async fn invalid_session_forces_fresh_identify() {
        let (listener, url) = listen().await;
        let register = StatusRegister::new();
        let (outbox, _rx) = GatewayHandle::channel();
        let client = GatewayClient::new(settings(&url, Some("bot-token")), register.clone(), outbox);
        let task = tokio::spawn(client.run());

        let mut ws = accept(&listener).await;
        send_hello(&mut ws).await;
        expect_op(&mut ws, protocol::IDENTIFY).await;
        send_json(
            &mut ws,
            json!({ "op": 0, "t": "READY", "s": 3, "d": { "session_id": "sess-3" } }),
        )
        .await;
        wait_for(&register, GatewayStatus::Online).await;
        send_json(&mut ws, json!({ "op": 9, "d": false })).await;
        wait_for(&register, GatewayStatus::Disconnected).await;

        let mut ws = accept(&listener).await;
        send_hello(&mut ws).await;
        let command = next_command(&mut ws).await;
        assert_eq!(command["op"], protocol::IDENTIFY);
        assert_eq!(command["d"]["token"], "bot-token");

        task.abort();
    }

    #[tokio::test]
    async fn resumable_invalid_session_keeps_resume_state() {
        let (listener, url) = listen().await;
        let register = StatusRegister::new();
        let (outbox, _rx) = GatewayHandle::channel();
        let client = GatewayClient::new(settings(&url, Some("bot-token")), register.clone(), outbox);
        let task = tokio::spawn(client.run());

        let mut ws = accept(&listener).await;
        send_hello(&mut ws).await;
        expect_op(&mut ws, protocol::IDENTIFY).await;
        send_json(
            &mut ws,
            json!({ "op": 0, "t": "READY", "s": 4, "d": { "session_id": "sess-4" } }),
        )
        .await;
        wait_for(&register, GatewayStatus::Online).await;
        send_json(&mut ws, json!({ "op": 9, "d": true })).await;

        let mut ws = accept(&listener).await;
        send_hello(&mut ws).await;
        let command = next_command(&mut ws).await;
        assert_eq!(command["op"], protocol::RESUME);
        assert_eq!(command["d"]["session_id"], "sess-4");

        task.abort();
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let max = Duration::from_secs(60);
        let mut delay = Duration::from_secs(1);
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(delay.as_secs());
            delay = next_backoff(delay, max);
        }
        assert_eq!(seen, [1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[tokio::test]
    async fn failed_connects_stay_offline_and_retry() {
        // Nothing listens on the port until the client has failed a few times.
        let (listener, url) = listen().await;
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let register = StatusRegister::new();
        let (outbox, _rx) = GatewayHandle::channel();
        let client = GatewayClient::new(settings(&url, Some("bot-token")), register.clone(), outbox);
        let task = tokio::spawn(client.run());

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(register.status(), GatewayStatus::Offline);

        let listener = TcpListener::bind(addr).await.unwrap();
        let mut ws = accept(&listener).await;
        send_hello(&mut ws).await;
        expect_op(&mut ws, protocol::IDENTIFY).await;

        task.abort();
    }
}
