//! Server network layer handling UDP communications and session routing

use crate::entity::PlayerId;
use crate::rooms::{Admission, RoomDirectory, SessionEvent, SessionHandle, SessionKey};
use arcade_shared::{AdmissionError, JoinRequest, Packet, MAX_PACKET_SIZE, PROTOCOL_VERSION};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

pub type NetworkError = Box<dyn std::error::Error + Send + Sync>;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { addr: SocketAddr },
    /// A session answered a join started by the main loop
    JoinFinished {
        addr: SocketAddr,
        game: String,
        request: JoinRequest,
        attempt: u32,
        result: Result<Admission, AdmissionError>,
    },
    Shutdown,
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
    BroadcastPacket { key: SessionKey, packet: Packet },
}

/// One admitted remote player
#[derive(Debug, Clone)]
pub struct Connection {
    pub key: SessionKey,
    pub player_id: PlayerId,
    pub handle: SessionHandle,
    pub last_seen: Instant,
}

/// Which address plays as whom, in which session
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: HashMap<SocketAddr, Connection>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, addr: SocketAddr, connection: Connection) -> Option<Connection> {
        self.connections.insert(addr, connection)
    }

    pub fn remove(&mut self, addr: &SocketAddr) -> Option<Connection> {
        self.connections.remove(addr)
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&Connection> {
        self.connections.get(addr)
    }

    pub fn touch(&mut self, addr: &SocketAddr) -> Option<&Connection> {
        let connection = self.connections.get_mut(addr)?;
        connection.last_seen = Instant::now();
        Some(connection)
    }

    /// Addresses playing in `key`
    pub fn addrs_in(&self, key: &SessionKey) -> Vec<SocketAddr> {
        self.connections
            .iter()
            .filter(|(_, connection)| &connection.key == key)
            .map(|(addr, _)| *addr)
            .collect()
    }

    /// Addresses silent for longer than `timeout`
    pub fn timed_out(&self, timeout: Duration) -> Vec<SocketAddr> {
        self.connections
            .iter()
            .filter(|(_, connection)| connection.last_seen.elapsed() > timeout)
            .map(|(addr, _)| *addr)
            .collect()
    }

    /// Drops the connections to `key` whose session task has stopped
    ///
    /// Players already in a session relaunched under the same key stay.
    pub fn remove_closed(&mut self, key: &SessionKey) -> Vec<SocketAddr> {
        let addrs: Vec<SocketAddr> = self
            .connections
            .iter()
            .filter(|(_, connection)| &connection.key == key && connection.handle.is_closed())
            .map(|(addr, _)| *addr)
            .collect();
        for addr in &addrs {
            self.connections.remove(addr);
        }
        addrs
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// UDP front end routing players to their sessions
pub struct Server {
    socket: Arc<UdpSocket>,
    connections: Arc<RwLock<ConnectionTable>>,
    directory: RoomDirectory,
    session_events: mpsc::UnboundedReceiver<SessionEvent>,
    client_timeout: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        directory: RoomDirectory,
        session_events: mpsc::UnboundedReceiver<SessionEvent>,
        client_timeout: Duration,
    ) -> Result<Self, NetworkError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            connections: Arc::new(RwLock::new(ConnectionTable::new())),
            directory,
            session_events,
            client_timeout,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.socket.local_addr()?)
    }

    /// Sender that stops [`Server::run`] when sent [`ServerMessage::Shutdown`]
    pub fn control(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let connections = Arc::clone(&self.connections);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { key, packet } => {
                        let addrs = {
                            let connections = connections.read().await;
                            connections.addrs_in(&key)
                        };

                        for addr in addrs {
                            if let Err(e) = send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send state to {}: {}", addr, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors connection timeouts
    fn spawn_timeout_checker(&self) {
        let connections = Arc::clone(&self.connections);
        let server_tx = self.server_tx.clone();
        let timeout = self.client_timeout;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let connections = connections.read().await;
                    connections.timed_out(timeout)
                };

                for addr in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { addr }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, key: SessionKey, packet: Packet) {
        if let Err(e) = self.game_tx.send(GameMessage::BroadcastPacket { key, packet }) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Removes a connection and tells its session the player is gone
    async fn disconnect(&mut self, addr: SocketAddr) -> Option<Connection> {
        let connection = self.connections.write().await.remove(&addr)?;
        connection.handle.leave(connection.player_id);
        Some(connection)
    }

    /// Processes one incoming packet
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Join {
                game,
                protocol_version,
                fields,
            } => {
                info!("Join for {} from {} (protocol {})", game, addr, protocol_version);

                if protocol_version != PROTOCOL_VERSION {
                    let reason = format!(
                        "protocol {} not supported, expected {}",
                        protocol_version, PROTOCOL_VERSION
                    );
                    self.send_packet(Packet::Rejected { reason }, addr);
                    return;
                }

                // A rejoin from the same address replaces the old player
                if let Some(previous) = self.disconnect(addr).await {
                    info!("Replacing player {} from {}", previous.player_id, addr);
                }

                let request = match JoinRequest::from_fields(&fields) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!("Rejected join from {}: {}", addr, e);
                        self.send_packet(Packet::Rejected { reason: e.to_string() }, addr);
                        return;
                    }
                };

                self.start_join(addr, game, request, 0);
            }

            Packet::Input(input) => {
                let connection = {
                    let mut connections = self.connections.write().await;
                    connections.touch(&addr).cloned()
                };

                match connection {
                    Some(connection) => connection.handle.input(connection.player_id, input),
                    None => debug!("Input from unknown address {}", addr),
                }
            }

            Packet::Leave => {
                if let Some(connection) = self.disconnect(addr).await {
                    info!("Player {} left {}", connection.player_id, connection.key);
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Routes a join and waits for the session's answer off the main loop
    fn start_join(&mut self, addr: SocketAddr, game: String, request: JoinRequest, attempt: u32) {
        let handle = match self.directory.route(&game, &request.identity) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Rejected join from {}: {}", addr, e);
                self.send_packet(Packet::Rejected { reason: e.to_string() }, addr);
                return;
            }
        };

        let server_tx = self.server_tx.clone();
        tokio::spawn(async move {
            let result = handle.admit(request.identity.clone()).await;
            let message = ServerMessage::JoinFinished {
                addr,
                game,
                request,
                attempt,
                result,
            };
            if server_tx.send(message).is_err() {
                debug!("Server loop gone before join from {} finished", addr);
            }
        });
    }

    async fn finish_join(
        &mut self,
        addr: SocketAddr,
        game: String,
        request: JoinRequest,
        attempt: u32,
        result: Result<Admission, AdmissionError>,
    ) {
        match result {
            Ok(admission) => {
                let response = Packet::Joined {
                    session: admission.key.to_string(),
                    player_id: admission.player_id,
                    entity: admission.entity,
                };
                let connection = Connection {
                    key: admission.key,
                    player_id: admission.player_id,
                    handle: admission.handle,
                    last_seen: Instant::now(),
                };

                // Two joins from one address raced; only the latest one plays
                let replaced = self.connections.write().await.insert(addr, connection);
                if let Some(previous) = replaced {
                    info!("Replacing player {} from {}", previous.player_id, addr);
                    previous.handle.leave(previous.player_id);
                }
                self.send_packet(response, addr);
            }
            Err(AdmissionError::SessionClosed(key)) if attempt == 0 => {
                debug!("Session {} closed during join from {}, retrying", key, addr);
                self.start_join(addr, game, request, attempt + 1);
            }
            Err(e) => {
                warn!("Rejected join from {}: {}", addr, e);
                self.send_packet(Packet::Rejected { reason: e.to_string() }, addr);
            }
        }
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::State { key, packet } => self.broadcast_packet(key, packet),
            SessionEvent::Closed { key } => {
                self.directory.forget(&key);
                let addrs = self.connections.write().await.remove_closed(&key);
                for addr in addrs {
                    let reason = format!("session {} closed", key);
                    self.send_packet(Packet::Disconnected { reason }, addr);
                }
            }
        }
    }

    /// Handles one message from the network tasks; false once the server should stop
    async fn handle_message(&mut self, message: ServerMessage) -> bool {
        match message {
            ServerMessage::PacketReceived { packet, addr } => {
                self.handle_packet(packet, addr).await;
            }
            ServerMessage::ClientTimeout { addr } => {
                if let Some(connection) = self.disconnect(addr).await {
                    info!("Player {} timed out", connection.player_id);
                    let reason = "timed out".to_string();
                    self.send_packet(Packet::Disconnected { reason }, addr);
                }
            }
            ServerMessage::JoinFinished {
                addr,
                game,
                request,
                attempt,
                result,
            } => {
                self.finish_join(addr, game, request, attempt, result).await;
            }
            ServerMessage::Shutdown => {
                info!("Server shutting down");
                return false;
            }
        }
        true
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), NetworkError> {
        // Initialize concurrent tasks
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Server started with games: {}", self.directory.games().join(", "));

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    let Some(message) = message else {
                        info!("Server shutting down");
                        break;
                    };
                    if !self.handle_message(message).await {
                        break;
                    }
                },

                // Forward session output to the sender task
                event = self.session_events.recv() => {
                    match event {
                        Some(event) => self.handle_session_event(event).await,
                        None => {
                            info!("All sessions gone, shutting down");
                            break;
                        }
                    }
                },
            }
        }

        Ok(())
    }
}

async fn send_packet_impl(socket: &UdpSocket, packet: &Packet, addr: SocketAddr) -> Result<(), NetworkError> {
    let data = serialize(packet)?;
    socket.send_to(&data, addr).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::{GameLauncher, JoinAck, SessionCommand};
    use arcade_shared::{Credentials, PlayerIdentity};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;
    use tokio::time::timeout;

    struct NoopLauncher;

    impl GameLauncher for NoopLauncher {
        fn name(&self) -> &str {
            "noop"
        }

        fn session_key(&self, _world: &str, scene: &str) -> SessionKey {
            SessionKey::new("noop", scene)
        }

        fn launch(&self, _key: SessionKey, _events: mpsc::UnboundedSender<SessionEvent>) -> SessionHandle {
            unreachable!("table tests never launch sessions")
        }
    }

    /// Launches sessions that only answer when the test says so
    #[derive(Default)]
    struct ParkedLauncher {
        parked: Mutex<Vec<mpsc::UnboundedReceiver<SessionCommand>>>,
    }

    impl GameLauncher for ParkedLauncher {
        fn name(&self) -> &str {
            "parked"
        }

        fn session_key(&self, _world: &str, scene: &str) -> SessionKey {
            SessionKey::new("parked", scene)
        }

        fn launch(&self, key: SessionKey, _events: mpsc::UnboundedSender<SessionEvent>) -> SessionHandle {
            let (handle, commands) = SessionHandle::detached(key);
            self.parked.lock().unwrap().push(commands);
            handle
        }
    }

    fn join_packet(game: &str, scene: &str) -> Packet {
        let request = JoinRequest {
            identity: PlayerIdentity {
                display_name: "Ada".into(),
                username: "ada".into(),
                profile_id: "profile-ada".into(),
                numeric_id: 1,
                asset_id: "asset".into(),
                world_slug: "plaza".into(),
                session_id: scene.into(),
            },
            credentials: Credentials {
                nonce: "n".into(),
                key: "k".into(),
                identity: "i".into(),
            },
        };
        Packet::Join {
            game: game.into(),
            protocol_version: PROTOCOL_VERSION,
            fields: request.to_fields(),
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    fn connection(key: &SessionKey, player_id: PlayerId) -> (Connection, mpsc::UnboundedReceiver<SessionCommand>) {
        let (handle, commands) = SessionHandle::detached(key.clone());
        let connection = Connection {
            key: key.clone(),
            player_id,
            handle,
            last_seen: Instant::now(),
        };
        (connection, commands)
    }

    #[test]
    fn test_addrs_grouped_by_session() {
        let a = SessionKey::new("g", "a");
        let b = SessionKey::new("g", "b");
        let mut table = ConnectionTable::new();
        table.insert(addr(1), connection(&a, 1).0);
        table.insert(addr(2), connection(&a, 2).0);
        table.insert(addr(3), connection(&b, 1).0);

        let mut in_a = table.addrs_in(&a);
        in_a.sort();
        assert_eq!(in_a, vec![addr(1), addr(2)]);

        assert_eq!(table.remove_closed(&a).len(), 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_closed_keeps_relaunched_players() {
        let key = SessionKey::new("g", "a");
        let mut table = ConnectionTable::new();
        table.insert(addr(1), connection(&key, 1).0);
        let (live, _commands) = connection(&key, 1);
        table.insert(addr(2), live);

        assert_eq!(table.remove_closed(&key), vec![addr(1)]);
        assert!(table.get(&addr(2)).is_some());
    }

    #[test]
    fn test_timeouts() {
        let key = SessionKey::new("g", "a");
        let mut table = ConnectionTable::new();
        let (mut stale, _commands) = connection(&key, 1);
        stale.last_seen = Instant::now() - Duration::from_secs(10);
        table.insert(addr(1), stale);
        table.insert(addr(2), connection(&key, 2).0);

        assert_eq!(table.timed_out(Duration::from_secs(5)), vec![addr(1)]);
        table.touch(&addr(1));
        assert!(table.timed_out(Duration::from_secs(5)).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_notifies_session() {
        let (directory, events) = RoomDirectory::new();
        let mut server = Server::new("127.0.0.1:0", directory, events, Duration::from_secs(5))
            .await
            .unwrap();
        let key = SessionKey::new("g", "a");
        let (connection, mut commands) = connection(&key, 7);
        server.connections.write().await.insert(addr(9), connection);

        server.handle_packet(Packet::Leave, addr(9)).await;

        assert!(server.connections.read().await.is_empty());
        assert!(matches!(
            commands.recv().await,
            Some(SessionCommand::Leave { player: 7 })
        ));
    }

    #[tokio::test]
    async fn test_join_does_not_hold_up_the_loop() {
        let launcher = Arc::new(ParkedLauncher::default());
        let (mut directory, events) = RoomDirectory::new();
        directory.register_launcher(launcher.clone());
        let mut server = Server::new("127.0.0.1:0", directory, events, Duration::from_secs(5))
            .await
            .unwrap();

        // The session has not answered yet, packets keep flowing
        timeout(Duration::from_millis(200), server.handle_packet(join_packet("parked", "s"), addr(5)))
            .await
            .expect("join blocked the server loop");
        timeout(Duration::from_millis(200), server.handle_packet(Packet::Leave, addr(6)))
            .await
            .unwrap();
        assert!(server.connections.read().await.is_empty());

        let mut commands = launcher.parked.lock().unwrap().pop().unwrap();
        match commands.recv().await {
            Some(SessionCommand::Join { reply, .. }) => {
                reply.send(Ok(JoinAck { player_id: 3, entity: None })).unwrap();
            }
            other => panic!("unexpected command {:?}", other),
        }

        let message = timeout(Duration::from_secs(1), server.server_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(message, ServerMessage::JoinFinished { attempt: 0, .. }));
        assert!(server.handle_message(message).await);

        let connections = server.connections.read().await;
        assert_eq!(connections.get(&addr(5)).map(|c| c.player_id), Some(3));
    }

    #[tokio::test]
    async fn test_bad_join_is_rejected_without_state() {
        let (mut directory, events) = RoomDirectory::new();
        directory.register_launcher(Arc::new(NoopLauncher));
        let mut server = Server::new("127.0.0.1:0", directory, events, Duration::from_secs(5))
            .await
            .unwrap();

        let packet = Packet::Join {
            game: "noop".into(),
            protocol_version: PROTOCOL_VERSION,
            fields: Default::default(),
        };
        server.handle_packet(packet, addr(5)).await;

        assert!(server.connections.read().await.is_empty());
        assert_eq!(server.directory.session_count(), 0);
    }
}
