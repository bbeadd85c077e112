//! Connection management for a joined session
//!
//! Owns the server connection and drives the session context on one
//! timeline: server events and user commands are applied one at a time.
//! When the connection drops it reconnects with backoff and resyncs.

use std::time::Duration;

use estima_core::{Room, SessionCache};
use estima_net::{Client, ClientEvent, ClientMessage, Error as NetError, ServerMessage};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::session::{CloseReason, SessionCommand, SessionContext, SessionView};

/// A user command plus where to report whether it was accepted
pub struct Request {
    pub command: SessionCommand,
    pub reply: oneshot::Sender<Result<(), String>>,
}

/// Cloneable handle for submitting commands to a running session
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Request>,
}

impl CommandSender {
    pub fn new(tx: mpsc::Sender<Request>) -> Self {
        Self { tx }
    }

    /// Submit a command and wait until it has been applied
    pub async fn send(&self, command: SessionCommand) -> Result<(), String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request { command, reply })
            .await
            .map_err(|_| "Session is closed".to_string())?;
        rx.await.map_err(|_| "Session is closed".to_string())?
    }
}

/// Network connection manager
pub struct ConnectionManager {
    server: String,
    delays: Vec<Duration>,
}

impl ConnectionManager {
    pub fn new(server: impl Into<String>, delays: Vec<Duration>) -> Self {
        let delays = if delays.is_empty() {
            vec![Duration::from_secs(1)]
        } else {
            delays
        };
        Self {
            server: server.into(),
            delays,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.client.server.clone(), config.reconnect_delays())
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Create a room and wait for the server to confirm it. The returned
    /// client is already bound as the room's moderator.
    pub async fn create_room(
        &self,
        moderator: &str,
        room_name: Option<String>,
    ) -> estima_net::Result<(Client, Room)> {
        let mut client = Client::connect(self.server.as_str()).await?;
        client.create_room(moderator, room_name).await?;

        loop {
            match client.next_event().await {
                Some(ClientEvent::Message(ServerMessage::RoomCreated(room))) => {
                    info!(room_id = %room.id, "Room created");
                    return Ok((client, room));
                }
                Some(ClientEvent::Message(ServerMessage::Error { message })) => {
                    return Err(NetError::Rejected(message));
                }
                Some(ClientEvent::Message(other)) => {
                    debug!(?other, "Ignoring message while creating room");
                }
                Some(ClientEvent::Disconnected) | None => return Err(NetError::ConnectionClosed),
            }
        }
    }

    /// Run the session until it closes.
    ///
    /// `initial` is used as the first connection when given; otherwise one is
    /// opened. Every state change is published to `view`.
    pub async fn run<C: SessionCache>(
        &self,
        session: &mut SessionContext<C>,
        mut requests: mpsc::Receiver<Request>,
        view: watch::Sender<SessionView>,
        initial: Option<Client>,
    ) -> CloseReason {
        let mut next = initial;

        loop {
            let mut client = match next.take() {
                Some(client) => client,
                None => match self.reconnect_loop(session, &mut requests, &view).await {
                    Some(client) => client,
                    None => break,
                },
            };

            let resync = session.on_connected();
            view.send_replace(session.view());
            if let Err(e) = send_all(&client, resync).await {
                warn!(error = %e, "Resync failed");
                session.on_disconnected();
                continue;
            }

            loop {
                tokio::select! {
                    event = client.next_event() => {
                        match event {
                            Some(ClientEvent::Message(msg)) => {
                                let out = session.handle(msg);
                                if let Err(e) = send_all(&client, out).await {
                                    warn!(error = %e, "Failed to send follow-up");
                                }
                            }
                            Some(ClientEvent::Disconnected) | None => {
                                warn!(server = %self.server, "Connection lost");
                                session.on_disconnected();
                                view.send_replace(session.view());
                                break;
                            }
                        }
                    }

                    request = requests.recv() => {
                        let (command, reply) = match request {
                            Some(Request { command, reply }) => (command, Some(reply)),
                            // Frontend gone
                            None => (SessionCommand::Leave, None),
                        };

                        let result = match session.execute(command) {
                            Ok(out) => send_all(&client, out).await.map_err(|e| e.to_string()),
                            Err(e) => Err(e.to_string()),
                        };
                        if let Err(e) = &result {
                            debug!(error = %e, "Command rejected");
                        }
                        if let Some(reply) = reply {
                            let _ = reply.send(result);
                        }
                    }
                }

                view.send_replace(session.view());
                if session.is_closed() {
                    client.disconnect().await;
                    return close_reason(session);
                }
            }
        }

        close_reason(session)
    }

    /// Connect with backoff. Returns `None` if the session closed while
    /// offline.
    async fn reconnect_loop<C: SessionCache>(
        &self,
        session: &mut SessionContext<C>,
        requests: &mut mpsc::Receiver<Request>,
        view: &watch::Sender<SessionView>,
    ) -> Option<Client> {
        let mut attempt = 0;
        loop {
            info!(attempt = attempt + 1, server = %self.server, "Connect attempt");

            match Client::connect(self.server.as_str()).await {
                Ok(client) => {
                    info!("Connected");
                    return Some(client);
                }
                Err(e) => warn!(error = %e, "Connect failed"),
            }

            let delay = self.delays[attempt.min(self.delays.len() - 1)];
            info!(delay_ms = delay.as_millis() as u64, "Reconnect backoff");

            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    request = requests.recv() => {
                        offline_request(session, request);
                        view.send_replace(session.view());
                        if session.is_closed() {
                            return None;
                        }
                    }
                }
            }

            attempt += 1;
        }
    }
}

/// Apply a command while disconnected. Only leaving works offline; nothing
/// is queued for later.
fn offline_request<C: SessionCache>(session: &mut SessionContext<C>, request: Option<Request>) {
    match request {
        Some(Request {
            command: SessionCommand::Leave,
            reply,
        }) => {
            let result = session.leave().map(|_| ()).map_err(|e| e.to_string());
            let _ = reply.send(result);
        }
        Some(Request { command, reply }) => {
            debug!(?command, "Dropping command while offline");
            let _ = reply.send(Err(NetError::NotConnected.to_string()));
        }
        None => {
            let _ = session.leave();
        }
    }
}

async fn send_all(client: &Client, messages: Vec<ClientMessage>) -> estima_net::Result<()> {
    for msg in messages {
        client.send(msg).await?;
    }
    Ok(())
}

fn close_reason<C: SessionCache>(session: &SessionContext<C>) -> CloseReason {
    session.closed().cloned().unwrap_or(CloseReason::Left)
}

#[cfg(test)]
mod tests {
    use super::*;
    use estima_core::{Database, IssueStatus, RoundPhase, UserRole};
    use estima_net::{Server, ServerOptions};
    use std::net::SocketAddr;

    async fn start_server() -> Server {
        Server::start(ServerOptions::new(SocketAddr::from(([127, 0, 0, 1], 0))))
            .await
            .unwrap()
    }

    fn manager(addr: SocketAddr) -> ConnectionManager {
        ConnectionManager::new(addr.to_string(), vec![Duration::from_millis(20)])
    }

    async fn wait(view: &mut watch::Receiver<SessionView>, ready: impl FnMut(&SessionView) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), view.wait_for(ready))
            .await
            .expect("timed out waiting for view")
            .expect("session dropped");
    }

    #[tokio::test]
    async fn test_create_room() {
        let server = start_server().await;
        let (client, room) = manager(server.addr())
            .create_room("alice", Some("Sprint 12".into()))
            .await
            .unwrap();

        assert_eq!(room.moderator, "alice");
        assert_eq!(room.title(), "Sprint 12");
        assert_eq!(server.room_count().await, 1);

        client.disconnect().await;
        server.shutdown();
    }

    #[tokio::test]
    async fn test_offline_commands() {
        // Grab a free port, then close it so every connect is refused
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();

        let manager = manager(addr);
        let mut session = SessionContext::new(
            uuid::Uuid::new_v4(),
            "bob",
            UserRole::Participant,
            Database::open_in_memory().unwrap(),
        );
        let (tx, rx) = mpsc::channel(8);
        let (view_tx, _view_rx) = watch::channel(session.view());
        let commands = CommandSender::new(tx);

        let driver = async {
            let result = commands.send(SessionCommand::Reveal).await;
            assert_eq!(result, Err(NetError::NotConnected.to_string()));
            commands.send(SessionCommand::Leave).await.unwrap();
        };

        let (reason, ()) = tokio::join!(manager.run(&mut session, rx, view_tx, None), driver);
        assert_eq!(reason, CloseReason::Left);
        assert!(!session.store().is_connected());
    }

    #[tokio::test]
    async fn test_two_sessions_estimate_an_issue() {
        let server = start_server().await;
        let manager = manager(server.addr());

        let (client, room) = manager.create_room("alice", None).await.unwrap();
        let mut alice = SessionContext::new(
            room.id,
            "alice",
            UserRole::Moderator,
            Database::open_in_memory().unwrap(),
        );
        let mut bob = SessionContext::new(
            room.id,
            "bob",
            UserRole::Participant,
            Database::open_in_memory().unwrap(),
        );

        let (alice_tx, alice_rx) = mpsc::channel(8);
        let (bob_tx, bob_rx) = mpsc::channel(8);
        let (alice_view_tx, mut alice_view) = watch::channel(alice.view());
        let (bob_view_tx, mut bob_view) = watch::channel(bob.view());
        let alice_cmd = CommandSender::new(alice_tx);
        let bob_cmd = CommandSender::new(bob_tx);

        let driver = async {
            wait(&mut alice_view, |v| v.participants.len() == 2).await;
            wait(&mut bob_view, |v| v.moderator.as_deref() == Some("alice")).await;

            alice_cmd
                .send(SessionCommand::AddIssue {
                    title: "Login page".into(),
                    description: None,
                })
                .await
                .unwrap();
            alice_cmd
                .send(SessionCommand::StartVoting("PP-1".into()))
                .await
                .unwrap();

            wait(&mut bob_view, |v| v.phase == RoundPhase::Voting).await;
            assert_eq!(bob_view.borrow().issue_position, Some((1, 1)));
            bob_cmd.send(SessionCommand::Vote("5".into())).await.unwrap();

            wait(&mut alice_view, |v| v.phase == RoundPhase::Voting).await;
            alice_cmd.send(SessionCommand::Vote("8".into())).await.unwrap();
            wait(&mut alice_view, |v| v.can_reveal).await;

            // Participants cannot reveal
            assert!(bob_cmd.send(SessionCommand::Reveal).await.is_err());
            alice_cmd.send(SessionCommand::Reveal).await.unwrap();

            wait(&mut bob_view, |v| {
                v.issues.first().map(|i| i.status) == Some(IssueStatus::Completed)
            })
            .await;
            {
                let view = bob_view.borrow();
                assert_eq!(view.issues[0].result, Some(7.0));
                assert_eq!(view.tally.as_ref().and_then(|t| t.average), Some(6.5));
            }

            alice_cmd.send(SessionCommand::End).await.unwrap();
        };

        let all = async {
            tokio::join!(
                manager.run(&mut alice, alice_rx, alice_view_tx, Some(client)),
                manager.run(&mut bob, bob_rx, bob_view_tx, None),
                driver
            )
        };
        let (alice_reason, bob_reason, ()) = tokio::time::timeout(Duration::from_secs(10), all)
            .await
            .expect("session did not finish");

        assert_eq!(alice_reason, CloseReason::Ended);
        assert_eq!(bob_reason, CloseReason::RoomEnded);
        assert!(bob.issues().is_empty());
        server.shutdown();
    }
}
