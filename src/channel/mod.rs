//! Reconnecting socket channel
//!
//! Owns one live WebSocket connection to a room endpoint, delivers decoded
//! messages to subscribers and retries unclean disconnects with bounded
//! exponential backoff. All connection state lives inside a background task;
//! the [`ReconnectingChannel`] handle only sends it commands.

mod messages;
mod policy;
mod transport;

pub(crate) use messages::{
    decode_frame, InboundMessage, OutboundMessage, PresenceMessage, VolumeRelayMessage,
};
pub(crate) use policy::ReconnectPolicy;
pub(crate) use transport::{Connector, TungsteniteConnector};

#[cfg(test)]
pub(crate) use transport::testing;

use crate::config::ChannelConfig;
use crate::events::{EventBus, Subscription};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use transport::{Connection, Frame};

/// Connection lifecycle, owned by the channel task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Events delivered to channel subscribers
#[derive(Debug, Clone)]
pub(crate) enum ChannelEvent {
    StateChanged(ConnectionState),
    /// Decoded inbound message with `"null"` strings normalized
    Message(InboundMessage),
    /// An unclean close was observed and a retry is scheduled
    Reconnecting { attempt: u32, delay: Duration },
    /// No inbound frame arrived within the timeout after a heartbeat
    Stale,
    /// Retry budget exhausted; the channel will not reconnect
    TerminalDisconnect { attempts: u32 },
}

/// Channel errors
#[derive(Debug, Clone, thiserror::Error)]
pub(crate) enum ChannelError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// Heartbeat and retry tuning for one channel
#[derive(Debug, Clone)]
pub(crate) struct ChannelSettings {
    pub(crate) policy: ReconnectPolicy,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) stale_timeout: Duration,
}

impl ChannelSettings {
    pub(crate) fn from_config(config: &ChannelConfig) -> Self {
        Self {
            policy: ReconnectPolicy::from_config(config),
            heartbeat_interval: config.heartbeat_interval(),
            stale_timeout: config.stale_timeout(),
        }
    }
}

enum Command {
    Send(OutboundMessage),
    Close,
}

/// How an open connection ended
enum OpenOutcome {
    UserClosed,
    CleanClose,
    Unclean,
}

/// Handle to a reconnecting channel
pub(crate) struct ReconnectingChannel {
    address: String,
    events: EventBus<ChannelEvent>,
    cmd_tx: Option<mpsc::UnboundedSender<Command>>,
    task: Option<JoinHandle<()>>,
}

impl ReconnectingChannel {
    /// Start connecting to `address`
    ///
    /// Never fails: connection problems go into the retry loop and are
    /// reported as events. An empty address leaves the channel Idle.
    pub(crate) fn open(
        address: &str,
        connector: Arc<dyn Connector>,
        settings: ChannelSettings,
    ) -> Self {
        let events = EventBus::new();

        if address.trim().is_empty() {
            warn!("Channel created without a target address, staying idle");
            return Self {
                address: String::new(),
                events,
                cmd_tx: None,
                task: None,
            };
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_channel(
            address.to_string(),
            connector,
            settings,
            cmd_rx,
            events.clone(),
        ));

        Self {
            address: address.to_string(),
            events,
            cmd_tx: Some(cmd_tx),
            task: Some(task),
        }
    }

    pub(crate) fn address(&self) -> &str {
        &self.address
    }

    /// Subscribe to channel events
    ///
    /// Events emitted before subscribing are not replayed; subscribe right
    /// after `open` to observe the first state change.
    pub(crate) fn subscribe(&self) -> Subscription<ChannelEvent> {
        self.events.subscribe()
    }

    pub(crate) fn unsubscribe(&self, subscription: &Subscription<ChannelEvent>) {
        self.events.unsubscribe(subscription.id());
    }

    /// Send a message if the connection is open; otherwise log and drop it
    pub(crate) fn send(&self, message: OutboundMessage) {
        match &self.cmd_tx {
            Some(tx) if tx.send(Command::Send(message)).is_ok() => {}
            _ => warn!(address = %self.address, "Channel is not connected, message dropped"),
        }
    }

    /// Cancel any pending retry and close without reconnecting
    pub(crate) fn close(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(Command::Close);
            debug!(address = %self.address, "Channel close requested");
        }
    }

    /// Close and wait for the background task to finish
    pub(crate) async fn shutdown(mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ReconnectingChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Background loop: connect, run, back off, repeat
async fn run_channel(
    address: String,
    connector: Arc<dyn Connector>,
    settings: ChannelSettings,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    events: EventBus<ChannelEvent>,
) {
    let mut policy = settings.policy.clone();
    let mut state = ConnectionState::Idle;

    loop {
        set_state(&mut state, ConnectionState::Connecting, &events);
        info!(address = %address, attempt = policy.attempt_count(), "Connecting channel");

        let connect = connector.connect(&address);
        tokio::pin!(connect);

        let result = loop {
            tokio::select! {
                result = &mut connect => break Some(result),
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Send(_)) => warn!(address = %address, "Channel is not open, message dropped"),
                    Some(Command::Close) | None => break None,
                },
            }
        };

        let Some(result) = result else {
            close_by_user(&mut state, &events, &address);
            return;
        };

        match result {
            Ok(connection) => {
                policy.reset();
                set_state(&mut state, ConnectionState::Open, &events);
                info!(address = %address, "Channel open");

                match run_open(connection, &settings, &mut cmd_rx, &events, &address).await {
                    OpenOutcome::UserClosed => {
                        close_by_user(&mut state, &events, &address);
                        return;
                    }
                    OpenOutcome::CleanClose => {
                        info!(address = %address, "Channel closed cleanly by server");
                        set_state(&mut state, ConnectionState::Closed, &events);
                        return;
                    }
                    OpenOutcome::Unclean => {
                        warn!(address = %address, "Channel connection lost");
                        set_state(&mut state, ConnectionState::Closed, &events);
                    }
                }
            }
            Err(e) => {
                warn!(address = %address, error = %e, "Channel connect failed");
                set_state(&mut state, ConnectionState::Closed, &events);
            }
        }

        let Some(delay) = policy.next_delay() else {
            error!(
                address = %address,
                attempts = policy.attempt_count(),
                "Max reconnection attempts reached"
            );
            events.emit(ChannelEvent::TerminalDisconnect {
                attempts: policy.attempt_count(),
            });
            return;
        };

        let attempt = policy.attempt_count();
        info!(
            address = %address,
            attempt,
            max_attempts = policy.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            "Channel reconnecting"
        );
        events.emit(ChannelEvent::Reconnecting { attempt, delay });

        let backoff = sleep(delay);
        tokio::pin!(backoff);
        let cancelled = loop {
            tokio::select! {
                _ = &mut backoff => break false,
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Send(_)) => warn!(address = %address, "Channel is not open, message dropped"),
                    Some(Command::Close) | None => break true,
                },
            }
        };
        if cancelled {
            debug!(address = %address, "Pending reconnect cancelled");
            close_by_user(&mut state, &events, &address);
            return;
        }
    }
}

/// Pump one open connection until it ends
async fn run_open(
    connection: Connection,
    settings: &ChannelSettings,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    events: &EventBus<ChannelEvent>,
    address: &str,
) -> OpenOutcome {
    let Connection {
        mut outgoing,
        mut incoming,
    } = connection;

    let period = settings.heartbeat_interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut stale_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send(message)) => {
                    let json = match message.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode outbound message");
                            continue;
                        }
                    };
                    if let Err(e) = outgoing.send(json).await {
                        warn!(address = %address, error = %e, "Channel send failed");
                        return OpenOutcome::Unclean;
                    }
                }
                Some(Command::Close) | None => {
                    let _ = outgoing.close().await;
                    return OpenOutcome::UserClosed;
                }
            },
            frame = incoming.next() => {
                stale_deadline = None;
                match frame {
                    Some(Ok(Frame::Text(text))) => match messages::decode_frame(&text) {
                        Ok(message) => events.emit(ChannelEvent::Message(message)),
                        Err(e) => warn!(address = %address, error = %e, "Dropping inbound frame"),
                    },
                    Some(Ok(Frame::Control)) => {}
                    Some(Ok(Frame::Close { clean: true })) => return OpenOutcome::CleanClose,
                    Some(Ok(Frame::Close { clean: false })) => return OpenOutcome::Unclean,
                    Some(Err(e)) => {
                        warn!(address = %address, error = %e, "Channel receive error");
                        return OpenOutcome::Unclean;
                    }
                    None => return OpenOutcome::Unclean,
                }
            },
            _ = heartbeat.tick() => {
                let ping = match OutboundMessage::ping().to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode heartbeat");
                        continue;
                    }
                };
                if let Err(e) = outgoing.send(ping).await {
                    warn!(address = %address, error = %e, "Heartbeat send failed");
                    return OpenOutcome::Unclean;
                }
                if stale_deadline.is_none() {
                    stale_deadline = Some(Instant::now() + settings.stale_timeout);
                }
            },
            _ = sleep_until(stale_deadline.unwrap_or_else(Instant::now)), if stale_deadline.is_some() => {
                warn!(address = %address, "No response from server after heartbeat");
                stale_deadline = None;
                events.emit(ChannelEvent::Stale);
            },
        }
    }
}

fn set_state(state: &mut ConnectionState, next: ConnectionState, events: &EventBus<ChannelEvent>) {
    if *state != next {
        debug!(from = ?*state, to = ?next, "Channel state change");
        *state = next;
        events.emit(ChannelEvent::StateChanged(next));
    }
}

fn close_by_user(state: &mut ConnectionState, events: &EventBus<ChannelEvent>, address: &str) {
    set_state(state, ConnectionState::Closing, events);
    set_state(state, ConnectionState::Closed, events);
    info!(address = %address, "Channel closed by client");
}

#[cfg(test)]
mod tests {
    use super::transport::testing::{MockConnector, Script, ServerEnd};
    use super::*;
    use serde_json::Value;

    fn settings(max_attempts: u32) -> ChannelSettings {
        ChannelSettings {
            policy: ReconnectPolicy::new(
                Duration::from_millis(3000),
                1.5,
                Duration::from_millis(30000),
                max_attempts,
            ),
            heartbeat_interval: Duration::from_secs(5),
            stale_timeout: Duration::from_secs(10),
        }
    }

    async fn next_state(sub: &mut Subscription<ChannelEvent>) -> ConnectionState {
        loop {
            match sub.recv().await {
                Some(ChannelEvent::StateChanged(state)) => return state,
                Some(_) => continue,
                None => panic!("channel event stream ended"),
            }
        }
    }

    async fn accept(server: &mut mpsc::UnboundedReceiver<ServerEnd>) -> ServerEnd {
        server.recv().await.expect("connection accepted")
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_are_delivered_normalized() {
        let (connector, mut server) = MockConnector::new(vec![Script::Accept]);
        let channel = ReconnectingChannel::open("ws://room", Arc::new(connector), settings(3));
        let mut sub = channel.subscribe();

        let end = accept(&mut server).await;
        assert_eq!(next_state(&mut sub).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut sub).await, ConnectionState::Open);

        end.to_client
            .send(Ok(Frame::Text(r#"{"stay_num":"2","start_time":"null"}"#.into())))
            .unwrap();
        match sub.recv().await {
            Some(ChannelEvent::Message(msg)) => {
                assert_eq!(msg.get("start_time"), Some(&Value::Null));
            }
            other => panic!("expected message, got {:?}", other),
        }

        channel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_is_dropped() {
        let (connector, mut server) = MockConnector::new(vec![Script::Accept]);
        let channel = ReconnectingChannel::open("ws://room", Arc::new(connector), settings(3));
        let mut sub = channel.subscribe();
        let end = accept(&mut server).await;

        end.to_client.send(Ok(Frame::Text("garbage".into()))).unwrap();
        end.to_client
            .send(Ok(Frame::Text(r#"{"average":0.4}"#.into())))
            .unwrap();

        loop {
            match sub.recv().await {
                Some(ChannelEvent::Message(msg)) => {
                    assert_eq!(msg.get("average").and_then(Value::as_f64), Some(0.4));
                    break;
                }
                Some(ChannelEvent::StateChanged(ConnectionState::Closed)) => {
                    panic!("malformed frame must not close the channel")
                }
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
        channel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_is_forwarded_when_open() {
        let (connector, mut server) = MockConnector::new(vec![Script::Accept]);
        let channel = ReconnectingChannel::open("ws://room", Arc::new(connector), settings(3));
        let mut sub = channel.subscribe();
        let mut end = accept(&mut server).await;
        assert_eq!(next_state(&mut sub).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut sub).await, ConnectionState::Open);

        channel.send(OutboundMessage::volume(0.5));
        assert_eq!(end.from_client.recv().await.as_deref(), Some(r#"{"value":0.5}"#));
        channel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delays_follow_backoff() {
        let (connector, _server) = MockConnector::new(vec![]);
        let probe = connector.clone();
        let channel = ReconnectingChannel::open("ws://room", Arc::new(connector), settings(4));
        let mut sub = channel.subscribe();

        let mut delays = Vec::new();
        loop {
            match sub.recv().await {
                Some(ChannelEvent::Reconnecting { attempt, delay }) => {
                    assert_eq!(attempt as usize, delays.len() + 1);
                    delays.push(delay);
                }
                Some(ChannelEvent::TerminalDisconnect { attempts }) => {
                    assert_eq!(attempts, 4);
                    break;
                }
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }

        let expected: Vec<Duration> = [4500u64, 6750, 10125, 15187]
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect();
        assert_eq!(delays, expected);

        // Initial attempt plus one per scheduled retry, spaced by the delays
        let attempts = probe.attempts();
        assert_eq!(attempts.len(), 5);
        for (i, delay) in expected.iter().enumerate() {
            assert_eq!(attempts[i + 1] - attempts[i], *delay);
        }
        channel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_open_resets_attempts() {
        let (connector, mut server) =
            MockConnector::new(vec![Script::Refuse, Script::Refuse, Script::Accept, Script::Accept]);
        let channel = ReconnectingChannel::open("ws://room", Arc::new(connector), settings(10));
        let mut sub = channel.subscribe();

        let end = accept(&mut server).await;
        // Drop without a close frame: unclean
        drop(end);

        let mut attempts = Vec::new();
        loop {
            match sub.recv().await {
                Some(ChannelEvent::Reconnecting { attempt, .. }) => attempts.push(attempt),
                Some(ChannelEvent::StateChanged(ConnectionState::Open)) if attempts.len() == 3 => break,
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
        // Two refusals count up, then the drop after a successful open starts over
        assert_eq!(attempts, vec![1, 2, 1]);
        let _second = accept(&mut server).await;
        channel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_close_does_not_reconnect() {
        let (connector, mut server) = MockConnector::new(vec![Script::Accept]);
        let probe = connector.clone();
        let channel = ReconnectingChannel::open("ws://room", Arc::new(connector), settings(3));
        let mut sub = channel.subscribe();
        let end = accept(&mut server).await;

        end.to_client.send(Ok(Frame::Close { clean: true })).unwrap();
        loop {
            match sub.recv().await {
                Some(ChannelEvent::StateChanged(ConnectionState::Closed)) => break,
                Some(ChannelEvent::Reconnecting { .. }) => panic!("clean close must not retry"),
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(probe.attempts().len(), 1);
        channel.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_retry() {
        let (connector, _server) = MockConnector::new(vec![Script::Refuse]);
        let probe = connector.clone();
        let mut channel = ReconnectingChannel::open("ws://room", Arc::new(connector), settings(5));
        let mut sub = channel.subscribe();

        loop {
            if let Some(ChannelEvent::Reconnecting { .. }) = sub.recv().await {
                break;
            }
        }
        channel.close();

        let mut saw_closing = false;
        loop {
            match sub.recv().await {
                Some(ChannelEvent::StateChanged(ConnectionState::Closing)) => saw_closing = true,
                Some(ChannelEvent::StateChanged(ConnectionState::Closed)) => break,
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
        assert!(saw_closing);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(probe.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_and_stale_warning() {
        let (connector, mut server) = MockConnector::new(vec![Script::Accept]);
        let channel = ReconnectingChannel::open("ws://room", Arc::new(connector), settings(3));
        let mut sub = channel.subscribe();
        let mut end = accept(&mut server).await;

        // First heartbeat after one interval
        assert_eq!(
            end.from_client.recv().await.as_deref(),
            Some(r#"{"action":"ping"}"#)
        );

        // Silence from the server: a stale warning, but no close
        loop {
            match sub.recv().await {
                Some(ChannelEvent::Stale) => break,
                Some(ChannelEvent::StateChanged(ConnectionState::Closed)) => {
                    panic!("stale connection must not be closed by the channel")
                }
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
        channel.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_address_stays_idle() {
        let (connector, _server) = MockConnector::new(vec![Script::Accept]);
        let probe = connector.clone();
        let channel = ReconnectingChannel::open("", Arc::new(connector), settings(3));
        channel.send(OutboundMessage::ping());
        assert!(probe.attempts().is_empty());
        assert_eq!(channel.address(), "");
    }
}
