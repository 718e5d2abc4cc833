use std::{collections::HashMap, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use shared::{
    domain::RideId,
    protocol::{ride_topic, ClientFrame, PushFrame, RideRecord},
};

const UPDATE_BUFFER: usize = 32;

/// Derive the push socket endpoint from the backend base URL.
pub fn websocket_url(server_url: &str) -> Result<String> {
    let base = if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(anyhow!("server url must start with http:// or https://"));
    };
    Ok(format!("{}/ws", base.trim_end_matches('/')))
}

/// Per-ride server push stream.
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn subscribe(&self, ride_id: RideId) -> Result<PushSubscription>;
}

pub struct MissingPushChannel;

#[async_trait]
impl PushChannel for MissingPushChannel {
    async fn subscribe(&self, ride_id: RideId) -> Result<PushSubscription> {
        Err(anyhow!(
            "push channel unavailable for ride {}; relying on status polling",
            ride_id.0
        ))
    }
}

enum TransportCommand {
    Subscribe {
        topic: String,
        sink: mpsc::Sender<RideRecord>,
    },
    Unsubscribe {
        topic: String,
    },
}

/// Handle to one ride topic. Dropping it unsubscribes.
pub struct PushSubscription {
    topic: String,
    updates: mpsc::Receiver<RideRecord>,
    commands: mpsc::UnboundedSender<TransportCommand>,
}

impl PushSubscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn next_update(&mut self) -> Option<RideRecord> {
        self.updates.recv().await
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        let _ = self.commands.send(TransportCommand::Unsubscribe {
            topic: self.topic.clone(),
        });
    }
}

/// WebSocket wrapper around the backend's push endpoint. A manager task owns
/// the connection and reconnects with a fixed delay; subscriptions requested
/// while disconnected are queued and replayed exactly once per established
/// connection, and active subscriptions re-enter that queue when the
/// connection drops.
pub struct PushTransport {
    commands: mpsc::UnboundedSender<TransportCommand>,
    manager: JoinHandle<()>,
}

impl PushTransport {
    pub fn connect(ws_url: String, reconnect_delay: Duration) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let manager = tokio::spawn(run_manager(ws_url, reconnect_delay, command_rx));
        Self { commands, manager }
    }
}

impl Drop for PushTransport {
    fn drop(&mut self) {
        self.manager.abort();
    }
}

#[async_trait]
impl PushChannel for PushTransport {
    async fn subscribe(&self, ride_id: RideId) -> Result<PushSubscription> {
        let topic = ride_topic(ride_id);
        let (sink, updates) = mpsc::channel(UPDATE_BUFFER);
        self.commands
            .send(TransportCommand::Subscribe {
                topic: topic.clone(),
                sink,
            })
            .map_err(|_| anyhow!("push transport manager has shut down"))?;
        Ok(PushSubscription {
            topic,
            updates,
            commands: self.commands.clone(),
        })
    }
}

async fn run_manager(
    ws_url: String,
    reconnect_delay: Duration,
    mut commands: mpsc::UnboundedReceiver<TransportCommand>,
) {
    let mut pending: Vec<(String, mpsc::Sender<RideRecord>)> = Vec::new();
    loop {
        let stream = match connect_async(&ws_url).await {
            Ok((stream, _response)) => stream,
            Err(err) => {
                warn!(
                    url = %ws_url,
                    "push: connect failed: {err}; retrying in {}s",
                    reconnect_delay.as_secs()
                );
                if !wait_and_absorb(reconnect_delay, &mut commands, &mut pending).await {
                    return;
                }
                continue;
            }
        };
        info!(url = %ws_url, "push: connected");
        let (mut writer, mut reader) = stream.split();

        let mut active: HashMap<String, mpsc::Sender<RideRecord>> = HashMap::new();
        let mut broken = false;
        while let Some((topic, sink)) = pending.pop() {
            if send_frame(
                &mut writer,
                &ClientFrame::Subscribe {
                    topic: topic.clone(),
                },
            )
            .await
            {
                debug!(topic = %topic, "push: subscribed");
                active.insert(topic, sink);
            } else {
                pending.push((topic, sink));
                broken = true;
                break;
            }
        }

        while !broken {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    None => return,
                    Some(TransportCommand::Subscribe { topic, sink }) => {
                        if send_frame(&mut writer, &ClientFrame::Subscribe { topic: topic.clone() }).await {
                            debug!(topic = %topic, "push: subscribed");
                            active.insert(topic, sink);
                        } else {
                            pending.push((topic, sink));
                            broken = true;
                        }
                    }
                    Some(TransportCommand::Unsubscribe { topic }) => {
                        pending.retain(|(t, _)| t != &topic);
                        if active.remove(&topic).is_some() {
                            debug!(topic = %topic, "push: unsubscribed");
                            if !send_frame(&mut writer, &ClientFrame::Unsubscribe { topic }).await {
                                broken = true;
                            }
                        }
                    }
                },
                message = reader.next() => match message {
                    Some(Ok(Message::Text(text))) => route_frame(&active, &text),
                    Some(Ok(Message::Close(_))) | None => {
                        info!("push: connection closed by server");
                        broken = true;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("push: receive failed: {err}");
                        broken = true;
                    }
                },
            }
        }

        pending.extend(active.drain());
        if !pending.is_empty() {
            warn!(
                subscriptions = pending.len(),
                "push: connection lost; reconnecting in {}s",
                reconnect_delay.as_secs()
            );
        }
        if !wait_and_absorb(reconnect_delay, &mut commands, &mut pending).await {
            return;
        }
    }
}

/// Sleep out the reconnect delay while still accepting subscription traffic.
/// Returns false once the transport handle is gone.
async fn wait_and_absorb(
    delay: Duration,
    commands: &mut mpsc::UnboundedReceiver<TransportCommand>,
    pending: &mut Vec<(String, mpsc::Sender<RideRecord>)>,
) -> bool {
    let deadline = tokio::time::Instant::now() + delay;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return true,
            cmd = commands.recv() => match cmd {
                Some(cmd) => queue_command(pending, cmd),
                None => return false,
            },
        }
    }
}

fn queue_command(
    pending: &mut Vec<(String, mpsc::Sender<RideRecord>)>,
    cmd: TransportCommand,
) {
    match cmd {
        TransportCommand::Subscribe { topic, sink } => {
            pending.retain(|(t, _)| t != &topic);
            pending.push((topic, sink));
        }
        TransportCommand::Unsubscribe { topic } => pending.retain(|(t, _)| t != &topic),
    }
}

async fn send_frame<S>(writer: &mut S, frame: &ClientFrame) -> bool
where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(err) => {
            warn!("push: failed to encode frame: {err}");
            return true;
        }
    };
    match writer.send(Message::Text(text)).await {
        Ok(()) => true,
        Err(err) => {
            warn!("push: failed to send frame: {err}");
            false
        }
    }
}

fn route_frame(active: &HashMap<String, mpsc::Sender<RideRecord>>, text: &str) {
    match serde_json::from_str::<PushFrame>(text) {
        Ok(frame) => match active.get(&frame.topic) {
            Some(sink) => {
                if sink.try_send(frame.payload).is_err() {
                    warn!(topic = %frame.topic, "push: update receiver full or gone; frame dropped");
                }
            }
            None => debug!(topic = %frame.topic, "push: frame for inactive topic dropped"),
        },
        Err(err) => warn!("push: malformed frame dropped: {err}"),
    }
}

#[cfg(test)]
mod url_tests {
    use super::*;

    #[test]
    fn swaps_scheme_and_appends_socket_path() {
        assert_eq!(
            websocket_url("http://localhost:8080").expect("url"),
            "ws://localhost:8080/ws"
        );
        assert_eq!(
            websocket_url("https://rides.example.com/").expect("url"),
            "wss://rides.example.com/ws"
        );
    }

    #[test]
    fn rejects_unknown_schemes() {
        assert!(websocket_url("ftp://rides.example.com").is_err());
    }
}
