//! TCP client for talking to a room server

use std::sync::Arc;
use std::time::Duration;

use estima_core::{Issue, IssueAction, VoteValue};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::{write_frame, FrameReader};
use crate::protocol::{ClientMessage, ServerMessage};

/// Keepalive ping period
const PING_INTERVAL: Duration = Duration::from_secs(15);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Event received from the connection
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A message from the server, in server send order
    Message(ServerMessage),
    /// Connection lost; no further events follow
    Disconnected,
}

/// Client handle for network operations
pub struct Client {
    state: Arc<RwLock<ConnectionState>>,
    event_rx: mpsc::Receiver<ClientEvent>,
    cmd_tx: mpsc::Sender<ClientCommand>,
}

enum ClientCommand {
    Send(ClientMessage),
    Disconnect,
}

impl Client {
    /// Connect to a room server
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        info!(addr = %peer, "Connected to server");

        let (reader, writer) = tokio::io::split(stream);
        let state = Arc::new(RwLock::new(ConnectionState::Connected));
        let (event_tx, event_rx) = mpsc::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        tokio::spawn(connection_task(
            FrameReader::new(reader),
            writer,
            state.clone(),
            event_tx,
            cmd_rx,
        ));

        Ok(Client {
            state,
            event_rx,
            cmd_tx,
        })
    }

    /// Get the next event, `None` once the connection task has exited
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.event_rx.recv().await
    }

    /// Validate and queue a request
    pub async fn send(&self, msg: ClientMessage) -> Result<()> {
        msg.validate()?;
        self.cmd_tx
            .send(ClientCommand::Send(msg))
            .await
            .map_err(|_| Error::NotConnected)
    }

    pub async fn create_room(&self, moderator: &str, room_name: Option<String>) -> Result<()> {
        self.send(ClientMessage::CreateRoom {
            moderator: moderator.to_string(),
            room_name,
        })
        .await
    }

    pub async fn join_room(&self, room_id: Uuid, participant: &str) -> Result<()> {
        self.send(ClientMessage::JoinRoom {
            room_id,
            participant: participant.to_string(),
        })
        .await
    }

    pub async fn get_room_info(&self, room_id: Uuid) -> Result<()> {
        self.send(ClientMessage::GetRoomInfo { room_id }).await
    }

    pub async fn start_round(&self, room_id: Uuid, title: &str, description: Option<String>) -> Result<()> {
        self.send(ClientMessage::StartRound {
            room_id,
            title: title.to_string(),
            description,
        })
        .await
    }

    pub async fn vote(&self, room_id: Uuid, participant: &str, value: VoteValue) -> Result<()> {
        self.send(ClientMessage::Vote {
            room_id,
            participant: participant.to_string(),
            value,
        })
        .await
    }

    pub async fn reveal_votes(&self, room_id: Uuid) -> Result<()> {
        self.send(ClientMessage::RevealVotes { room_id }).await
    }

    pub async fn next_round(&self, room_id: Uuid) -> Result<()> {
        self.send(ClientMessage::NextRound { room_id }).await
    }

    pub async fn end_room(&self, room_id: Uuid) -> Result<()> {
        self.send(ClientMessage::EndRoom { room_id }).await
    }

    pub async fn leave_room(&self, room_id: Uuid, participant: &str) -> Result<()> {
        self.send(ClientMessage::LeaveRoom {
            room_id,
            participant: participant.to_string(),
        })
        .await
    }

    pub async fn issue_update(&self, room_id: Uuid, action: IssueAction, issue: Issue) -> Result<()> {
        self.send(ClientMessage::IssueUpdate {
            room_id,
            action,
            issue,
        })
        .await
    }

    /// Send a ping
    pub async fn ping(&self) -> Result<()> {
        self.send(ClientMessage::Ping).await
    }

    /// Disconnect from the server
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Disconnect).await;
    }

    /// Get current connection state
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }
}

/// Main connection task. The reader buffers partial frames, so losing a
/// race to a command or the keepalive never drops bytes.
async fn connection_task(
    mut reader: FrameReader<ReadHalf<TcpStream>>,
    mut writer: WriteHalf<TcpStream>,
    state: Arc<RwLock<ConnectionState>>,
    event_tx: mpsc::Sender<ClientEvent>,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
) {
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;

    loop {
        tokio::select! {
            result = reader.read_frame::<ServerMessage>() => {
                match result {
                    Ok(ServerMessage::Pong) => {
                        debug!("Received pong");
                    }
                    Ok(msg) => {
                        if event_tx.send(ClientEvent::Message(msg)).await.is_err() {
                            debug!("Event receiver dropped");
                            break;
                        }
                    }
                    Err(Error::ConnectionClosed) => {
                        debug!("Server closed connection");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Read error");
                        break;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Send(msg)) => {
                        if let Err(e) = write_frame(&mut writer, &msg).await {
                            warn!(error = %e, "Write error");
                            break;
                        }
                    }
                    Some(ClientCommand::Disconnect) | None => {
                        debug!("Disconnect requested");
                        break;
                    }
                }
            }

            _ = ping.tick() => {
                if let Err(e) = write_frame(&mut writer, &ClientMessage::Ping).await {
                    warn!(error = %e, "Keepalive failed");
                    break;
                }
            }
        }
    }

    *state.write().await = ConnectionState::Disconnected;
    let _ = event_tx.send(ClientEvent::Disconnected).await;
    info!("Disconnected from server");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{Server, ServerOptions};
    use estima_core::{tally, Consensus, VoteResult};
    use std::net::SocketAddr;

    async fn start_server() -> Server {
        Server::start(ServerOptions::new(SocketAddr::from(([127, 0, 0, 1], 0))))
            .await
            .unwrap()
    }

    /// Skip events until one matches
    async fn expect<T>(client: &mut Client, mut pick: impl FnMut(ServerMessage) -> Option<T>) -> T {
        let wait = async {
            loop {
                match client.next_event().await {
                    Some(ClientEvent::Message(msg)) => {
                        if let Some(found) = pick(msg) {
                            return found;
                        }
                    }
                    other => panic!("connection ended: {other:?}"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("timed out waiting for event")
    }

    async fn joined(client: &mut Client, count: usize) {
        expect(client, |m| match m {
            ServerMessage::ParticipantJoined { participants } if participants.len() == count => Some(()),
            _ => None,
        })
        .await
    }

    #[tokio::test]
    async fn test_client_connect() {
        let server = start_server().await;
        let client = Client::connect(server.addr()).await.unwrap();
        assert_eq!(client.connection_state().await, ConnectionState::Connected);

        client.disconnect().await;
        server.shutdown();
    }

    #[tokio::test]
    async fn test_invalid_request_rejected_locally() {
        let server = start_server().await;
        let client = Client::connect(server.addr()).await.unwrap();
        let result = client.join_room(Uuid::new_v4(), " ").await;
        assert!(matches!(result, Err(Error::Protocol(_))));
        server.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_room_error() {
        let server = start_server().await;
        let mut client = Client::connect(server.addr()).await.unwrap();
        client.get_room_info(Uuid::new_v4()).await.unwrap();

        let message = expect(&mut client, |m| match m {
            ServerMessage::Error { message } => Some(message),
            _ => None,
        })
        .await;
        assert_eq!(message, crate::ROOM_NOT_FOUND);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_frame_split_across_writes_survives_outgoing_traffic() {
        use tokio::io::AsyncWriteExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let payload = serde_json::to_vec(&ServerMessage::RoundReset).unwrap();
        let fake_server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream
                .write_all(&(payload.len() as u32).to_be_bytes())
                .await
                .unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
            stream.write_all(&payload).await.unwrap();
            stream.flush().await.unwrap();
            // Hold the socket open until the client has read the frame
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let mut client = Client::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.ping().await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), client.next_event())
            .await
            .unwrap();
        assert_eq!(event, Some(ClientEvent::Message(ServerMessage::RoundReset)));
        fake_server.abort();
    }

    #[tokio::test]
    async fn test_estimation_round_end_to_end() {
        let server = start_server().await;
        let mut alice = Client::connect(server.addr()).await.unwrap();
        let mut bob = Client::connect(server.addr()).await.unwrap();
        let mut carol = Client::connect(server.addr()).await.unwrap();

        alice.create_room("Alice", Some("R1".into())).await.unwrap();
        let room = expect(&mut alice, |m| match m {
            ServerMessage::RoomCreated(room) => Some(room),
            _ => None,
        })
        .await;
        assert_eq!(room.name.as_deref(), Some("R1"));
        assert_eq!(room.participants, vec!["Alice".to_string()]);

        bob.join_room(room.id, "Bob").await.unwrap();
        joined(&mut bob, 2).await;
        carol.join_room(room.id, "Carol").await.unwrap();
        joined(&mut carol, 3).await;
        joined(&mut alice, 3).await;

        alice.start_round(room.id, "Login flow", None).await.unwrap();
        for client in [&mut alice, &mut bob, &mut carol] {
            let task = expect(client, |m| match m {
                ServerMessage::RoundStarted(task) => Some(task),
                _ => None,
            })
            .await;
            assert_eq!(task.title, "Login flow");
        }

        bob.vote(room.id, "Bob", VoteValue::new(5.0)).await.unwrap();
        expect(&mut alice, |m| match m {
            ServerMessage::VoteReceived { count: 1 } => Some(()),
            _ => None,
        })
        .await;
        carol.vote(room.id, "Carol", VoteValue::new(8.0)).await.unwrap();
        expect(&mut alice, |m| match m {
            ServerMessage::VoteReceived { count: 2 } => Some(()),
            _ => None,
        })
        .await;

        alice.reveal_votes(room.id).await.unwrap();
        let results = expect(&mut bob, |m| match m {
            ServerMessage::VotesRevealed { results } => Some(results),
            _ => None,
        })
        .await;
        assert_eq!(
            results,
            vec![VoteResult::new("Bob", 5.0), VoteResult::new("Carol", 8.0)]
        );
        assert_eq!(tally::average(&results), Some(6.5));
        assert_eq!(tally::consensus(&results), Consensus::Good);

        // Only the moderator may move on
        bob.next_round(room.id).await.unwrap();
        let message = expect(&mut bob, |m| match m {
            ServerMessage::Error { message } => Some(message),
            _ => None,
        })
        .await;
        assert!(message.starts_with("Only the moderator"));

        alice.end_room(room.id).await.unwrap();
        expect(&mut carol, |m| (m == ServerMessage::RoomEnded).then_some(())).await;
        assert_eq!(server.room_count().await, 0);

        server.shutdown();
    }
}
