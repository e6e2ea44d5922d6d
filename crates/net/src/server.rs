//! TCP gateway in front of the room lifecycle coordinator
//!
//! Every connection identifies itself with a Hello, then issues room
//! commands. Membership changes are broadcast to all connections in the
//! room. When a socket closes, its user leaves every room that connection
//! had joined, unless another connection of the same user is still in it.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use lobby_core::{
    LeaveOutcome, RoomLifecycleCoordinator, RoomOptions, RoomRepository, RoomSession,
};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{Message, ParticipantInfo, RoomSnapshot};

/// Outgoing queue depth per connection
const OUTBOX_CAPACITY: usize = 64;

struct Subscriber {
    user_id: Uuid,
    tx: mpsc::Sender<Message>,
}

/// Connections subscribed to each room, keyed by room code then connection id
type Subscribers = HashMap<String, HashMap<Uuid, Subscriber>>;

struct Hub<R> {
    coordinator: RoomLifecycleCoordinator<R>,
    subscribers: RwLock<Subscribers>,
}

impl<R> Hub<R>
where
    R: RoomRepository + Send + 'static,
{
    async fn subscribe(
        &self,
        code: &str,
        conn_id: Uuid,
        user_id: Uuid,
        tx: mpsc::Sender<Message>,
    ) {
        self.subscribers
            .write()
            .await
            .entry(code.to_string())
            .or_default()
            .insert(conn_id, Subscriber { user_id, tx });
    }

    /// Join the room and subscribe the connection as one step, so a
    /// concurrent disconnect of the same user sees this connection.
    async fn join(
        &self,
        code: &str,
        conn_id: Uuid,
        user_id: Uuid,
        tx: mpsc::Sender<Message>,
    ) -> lobby_core::Result<RoomSession> {
        let mut subscribers = self.subscribers.write().await;
        let session = self.coordinator.join_room(user_id, code).await?;
        subscribers
            .entry(session.room.code.clone())
            .or_default()
            .insert(conn_id, Subscriber { user_id, tx });
        Ok(session)
    }

    /// Drop the connection's subscription and leave the room on the user's
    /// behalf. Returns `None` when another connection of the same user is
    /// still subscribed, in which case the membership stays.
    async fn disconnect(
        &self,
        code: &str,
        conn_id: Uuid,
        user_id: Uuid,
    ) -> Option<lobby_core::Result<LeaveOutcome>> {
        let mut subscribers = self.subscribers.write().await;
        let still_connected = match subscribers.get_mut(code) {
            Some(room) => {
                room.remove(&conn_id);
                let still_connected = room.values().any(|s| s.user_id == user_id);
                if room.is_empty() {
                    subscribers.remove(code);
                }
                still_connected
            }
            None => false,
        };
        if still_connected {
            return None;
        }
        Some(self.coordinator.leave_room(user_id, code).await)
    }

    async fn unsubscribe(&self, code: &str, conn_id: Uuid) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(room) = subscribers.get_mut(code) {
            room.remove(&conn_id);
            if room.is_empty() {
                subscribers.remove(code);
            }
        }
    }

    async fn broadcast(&self, code: &str, msg: Message) {
        let targets: Vec<mpsc::Sender<Message>> = self
            .subscribers
            .read()
            .await
            .get(code)
            .map(|room| room.values().map(|s| s.tx.clone()).collect())
            .unwrap_or_default();

        for tx in targets {
            if tx.send(msg.clone()).await.is_err() {
                debug!(code = %code, "Failed to queue broadcast for connection");
            }
        }
    }

    /// Send the current active participants to everyone in the room
    async fn broadcast_participants(&self, code: &str) {
        match self.coordinator.active_participants(code).await {
            Ok(participants) => {
                let participants = participants.iter().map(ParticipantInfo::from).collect();
                self.broadcast(
                    code,
                    Message::ParticipantList {
                        code: code.to_string(),
                        participants,
                    },
                )
                .await;
            }
            Err(e) => warn!(code = %code, error = %e, "Could not load participants"),
        }
    }
}

/// Gateway server handle
pub struct Gateway {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
}

impl Gateway {
    /// Bind and start accepting connections
    pub async fn start<R>(addr: SocketAddr, coordinator: RoomLifecycleCoordinator<R>) -> Result<Self>
    where
        R: RoomRepository + Send + 'static,
    {
        let listener = TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "Gateway started");

        let (shutdown_tx, _) = broadcast::channel(1);
        let hub = Arc::new(Hub {
            coordinator,
            subscribers: RwLock::new(HashMap::new()),
        });

        tokio::spawn(accept_loop(listener, hub, shutdown_tx.clone()));

        Ok(Gateway {
            addr: bound_addr,
            shutdown_tx,
        })
    }

    /// Get the gateway's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting and close every connection
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("Gateway shutdown initiated");
    }
}

/// Accept incoming connections
async fn accept_loop<R>(
    listener: TcpListener,
    hub: Arc<Hub<R>>,
    shutdown_tx: broadcast::Sender<()>,
) where
    R: RoomRepository + Send + 'static,
{
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            hub.clone(),
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Handle a single client connection
async fn handle_connection<R>(
    stream: TcpStream,
    addr: SocketAddr,
    hub: Arc<Hub<R>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) where
    R: RoomRepository + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    let user_id = match read_hello(&mut reader).await {
        Ok(user_id) => user_id,
        Err(e) => {
            warn!(addr = %addr, error = %e, "Handshake failed");
            let _ = write_frame(
                &mut writer,
                &Message::Failed {
                    kind: crate::protocol::FailureKind::Invalid,
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    };

    let conn_id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
    // Exits once every sender for this connection is dropped
    tokio::spawn(writer_task(writer, rx));
    let _ = tx.send(Message::Welcome { user_id }).await;

    info!(addr = %addr, user_id = %user_id, "Client connected");

    let mut joined = HashSet::new();
    loop {
        tokio::select! {
            result = read_frame::<Message, _>(&mut reader) => {
                match result {
                    Ok(msg) => {
                        handle_message(msg, user_id, conn_id, &tx, &mut joined, &hub).await;
                    }
                    Err(Error::ConnectionClosed) => {
                        debug!(user_id = %user_id, "Connection closed");
                        break;
                    }
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "Read error");
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!(user_id = %user_id, "Closing connection for shutdown");
                break;
            }
        }
    }

    // A dropped socket counts as leaving every room it had joined
    for code in joined {
        match hub.disconnect(&code, conn_id, user_id).await {
            None => {
                debug!(code = %code, user_id = %user_id, "User still connected to room elsewhere");
            }
            Some(Ok(outcome)) => {
                debug!(
                    code = %code,
                    user_id = %user_id,
                    grace_period_started = outcome.grace_period_started,
                    "Left room on disconnect"
                );
                hub.broadcast_participants(&code).await;
            }
            Some(Err(e)) if e.is_client_error() => {
                debug!(code = %code, user_id = %user_id, error = %e, "Nothing to leave on disconnect");
            }
            Some(Err(e)) => {
                error!(code = %code, user_id = %user_id, error = %e, "Leave on disconnect failed");
            }
        }
    }

    info!(user_id = %user_id, "Client disconnected");
}

/// First frame must be a Hello
async fn read_hello(reader: &mut ReadHalf<TcpStream>) -> Result<Uuid> {
    match read_frame(reader).await? {
        Message::Hello { user_id } if !user_id.is_nil() => Ok(user_id),
        Message::Hello { .. } => Err(Error::Protocol("nil user id".into())),
        _ => Err(Error::Protocol("expected Hello".into())),
    }
}

/// Writer task - sends queued messages to the client
async fn writer_task(mut writer: WriteHalf<TcpStream>, mut rx: mpsc::Receiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &msg).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
}

async fn reply(tx: &mpsc::Sender<Message>, msg: Message) {
    if tx.send(msg).await.is_err() {
        debug!("Reply dropped, writer gone");
    }
}

async fn reply_error(tx: &mpsc::Sender<Message>, user_id: Uuid, error: lobby_core::Error) {
    if error.is_client_error() {
        debug!(user_id = %user_id, error = %error, "Request rejected");
    } else {
        error!(user_id = %user_id, error = %error, "Request failed");
    }
    reply(tx, Message::failed(&error)).await;
}

/// Handle an incoming command
async fn handle_message<R>(
    msg: Message,
    user_id: Uuid,
    conn_id: Uuid,
    tx: &mpsc::Sender<Message>,
    joined: &mut HashSet<String>,
    hub: &Hub<R>,
) where
    R: RoomRepository + Send + 'static,
{
    let coordinator = &hub.coordinator;
    match msg {
        Message::CreateRoom { max_participants } => {
            let options = RoomOptions {
                max_participants,
                code: None,
            };
            match coordinator.create_room(user_id, options).await {
                Ok(session) => {
                    let code = session.room.code.clone();
                    hub.subscribe(&code, conn_id, user_id, tx.clone()).await;
                    joined.insert(code.clone());
                    reply(
                        tx,
                        Message::RoomJoined {
                            room: RoomSnapshot::from(&session.room),
                            is_host: true,
                        },
                    )
                    .await;
                    hub.broadcast_participants(&code).await;
                }
                Err(e) => reply_error(tx, user_id, e).await,
            }
        }
        Message::JoinRoom { code } => match hub.join(&code, conn_id, user_id, tx.clone()).await {
            Ok(session) => {
                let code = session.room.code.clone();
                joined.insert(code.clone());
                reply(
                    tx,
                    Message::RoomJoined {
                        room: RoomSnapshot::from(&session.room),
                        is_host: session.is_host,
                    },
                )
                .await;
                hub.broadcast_participants(&code).await;
            }
            Err(e) => reply_error(tx, user_id, e).await,
        },
        Message::LeaveRoom { code } => match coordinator.leave_room(user_id, &code).await {
            Ok(outcome) => {
                let code = outcome.room.code;
                hub.unsubscribe(&code, conn_id).await;
                joined.remove(&code);
                reply(tx, Message::RoomLeft { code: code.clone() }).await;
                hub.broadcast_participants(&code).await;
            }
            Err(e) => reply_error(tx, user_id, e).await,
        },
        Message::DeleteRoom { code } => match coordinator.delete_room(user_id, &code).await {
            Ok(room) => {
                joined.remove(&room.code);
                hub.broadcast(
                    &room.code,
                    Message::RoomClosed {
                        code: room.code.clone(),
                    },
                )
                .await;
                hub.subscribers.write().await.remove(&room.code);
            }
            Err(e) => reply_error(tx, user_id, e).await,
        },
        Message::Ping => reply(tx, Message::Pong).await,
        other => {
            debug!(user_id = %user_id, message = ?other, "Ignoring unexpected message type");
            reply(
                tx,
                Message::Failed {
                    kind: crate::protocol::FailureKind::Invalid,
                    message: "unexpected message".into(),
                },
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::GatewayClient;
    use crate::protocol::FailureKind;
    use lobby_core::{Database, LifecycleConfig, RoomStatus};
    use std::time::Duration;

    async fn start_gateway() -> (Gateway, RoomLifecycleCoordinator<Database>) {
        let coordinator = RoomLifecycleCoordinator::new(
            Database::open_in_memory().unwrap(),
            LifecycleConfig::default(),
        );
        let gateway = Gateway::start("127.0.0.1:0".parse().unwrap(), coordinator.clone())
            .await
            .unwrap();
        (gateway, coordinator)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    async fn create_room(client: &mut GatewayClient) -> String {
        client
            .send(&Message::CreateRoom {
                max_participants: Some(4),
            })
            .await
            .unwrap();
        match client.recv().await.unwrap() {
            Message::RoomJoined { room, is_host } => {
                assert!(is_host);
                room.code
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_join_broadcasts_participant_list() {
        let (gateway, _coordinator) = start_gateway().await;
        let mut host = GatewayClient::connect(gateway.addr(), Uuid::new_v4())
            .await
            .unwrap();
        let code = create_room(&mut host).await;
        assert!(matches!(
            host.recv().await.unwrap(),
            Message::ParticipantList { participants, .. } if participants.len() == 1
        ));

        let mut guest = GatewayClient::connect(gateway.addr(), Uuid::new_v4())
            .await
            .unwrap();
        guest
            .send(&Message::JoinRoom { code: code.clone() })
            .await
            .unwrap();
        assert!(matches!(
            guest.recv().await.unwrap(),
            Message::RoomJoined { is_host: false, .. }
        ));

        assert!(matches!(
            host.recv().await.unwrap(),
            Message::ParticipantList { participants, .. } if participants.len() == 2
        ));

        gateway.shutdown();
    }

    #[tokio::test]
    async fn test_disconnect_arms_grace_and_reconnect_cancels() {
        let (gateway, coordinator) = start_gateway().await;
        let host_id = Uuid::new_v4();

        let mut host = GatewayClient::connect(gateway.addr(), host_id).await.unwrap();
        let code = create_room(&mut host).await;
        drop(host);

        assert!(wait_until(|| coordinator.has_grace_period(&code)).await);

        let mut again = GatewayClient::connect(gateway.addr(), host_id).await.unwrap();
        again
            .send(&Message::JoinRoom { code: code.clone() })
            .await
            .unwrap();
        assert!(matches!(
            again.recv().await.unwrap(),
            Message::RoomJoined { is_host: true, .. }
        ));
        assert!(!coordinator.has_grace_period(&code));

        gateway.shutdown();
    }

    #[tokio::test]
    async fn test_stale_connection_closing_keeps_reconnected_user() {
        let (gateway, coordinator) = start_gateway().await;
        coordinator.set_grace_period(Duration::from_millis(300));

        let mut old = GatewayClient::connect(gateway.addr(), Uuid::new_v4())
            .await
            .unwrap();
        let code = create_room(&mut old).await;

        // Same user opens a second connection before the first one closes
        let mut fresh = GatewayClient::connect(gateway.addr(), old.user_id())
            .await
            .unwrap();
        assert_eq!(fresh.user_id(), old.user_id());
        fresh
            .send(&Message::JoinRoom { code: code.clone() })
            .await
            .unwrap();
        assert!(matches!(
            fresh.recv().await.unwrap(),
            Message::RoomJoined { is_host: true, .. }
        ));
        drop(old);

        tokio::time::sleep(Duration::from_millis(800)).await;
        let room = coordinator.get_room(&code).await.unwrap();
        assert_eq!(room.status, RoomStatus::Active);
        assert_eq!(room.current_participants, 1);
        assert_eq!(coordinator.active_participants(&code).await.unwrap().len(), 1);
        assert!(!coordinator.has_grace_period(&code));

        // Losing the last connection still counts as leaving
        coordinator.set_grace_period(Duration::from_secs(60));
        drop(fresh);
        assert!(wait_until(|| coordinator.has_grace_period(&code)).await);

        gateway.shutdown();
    }

    #[tokio::test]
    async fn test_errors_are_reported_to_client() {
        let (gateway, _coordinator) = start_gateway().await;
        let mut client = GatewayClient::connect(gateway.addr(), Uuid::new_v4())
            .await
            .unwrap();

        client
            .send(&Message::LeaveRoom {
                code: "NOPE00".into(),
            })
            .await
            .unwrap();
        assert!(matches!(
            client.recv().await.unwrap(),
            Message::Failed {
                kind: FailureKind::NotFound,
                ..
            }
        ));

        client.send(&Message::Ping).await.unwrap();
        assert!(matches!(client.recv().await.unwrap(), Message::Pong));

        gateway.shutdown();
    }
}
