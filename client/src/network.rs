use crate::game::ClientWorld;
use arcade_shared::{get_timestamp, FieldMap, FieldValue, JoinRequest, Packet, Payload, MAX_PACKET_SIZE, PROTOCOL_VERSION};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use std::f32::consts::TAU;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep};

pub type ClientError = Box<dyn std::error::Error + Send + Sync>;

/// Inputs per second sent while connected
pub const INPUT_RATE: u64 = 60;

/// Mirrors the grazer's server-side steering so our own heading can be predicted
pub fn grazer_steering(state: &FieldMap, input: &arcade_shared::InputPackage) -> FieldMap {
    let mut next = state.clone();
    let heading = state.get("heading").and_then(FieldValue::as_f32).unwrap_or(0.0);

    let steered = if let Some(absolute) = input.payload.float("heading") {
        absolute
    } else if let Some(turn) = input.payload.float("turn") {
        heading + turn
    } else {
        return next;
    };

    next.insert("heading".into(), FieldValue::Float(steered.rem_euclid(TAU)));
    next
}

/// Deterministic steering: sweep one way, then the other
#[derive(Debug, Clone)]
pub struct SteeringScript {
    turn_per_input: f32,
    inputs_per_sweep: u32,
    sent: u32,
}

impl SteeringScript {
    pub fn new(turn_per_input: f32, inputs_per_sweep: u32) -> Self {
        Self {
            turn_per_input,
            inputs_per_sweep: inputs_per_sweep.max(1),
            sent: 0,
        }
    }

    pub fn next_payload(&mut self) -> Payload {
        let sweep = self.sent / self.inputs_per_sweep;
        self.sent += 1;
        let direction = if sweep % 2 == 0 { 1.0 } else { -1.0 };
        Payload::new().with("turn", self.turn_per_input * direction)
    }
}

impl Default for SteeringScript {
    fn default() -> Self {
        Self::new(0.02, 120)
    }
}

/// Why [`Client::run`] returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientExit {
    Rejected(String),
    Disconnected(String),
    Finished,
}

/// Headless client: joins a game, steers by script and logs what it would render
pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    game: String,
    request: JoinRequest,
    connected: bool,

    world: ClientWorld,
    script: SteeringScript,

    ping_ms: u64,
    fake_ping_ms: u64,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        game: &str,
        request: JoinRequest,
        world: ClientWorld,
        fake_ping_ms: u64,
    ) -> Result<Self, ClientError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        Ok(Client {
            socket,
            server_addr,
            game: game.to_string(),
            request,
            connected: false,
            world,
            script: SteeringScript::default(),
            ping_ms: 0,
            fake_ping_ms,
        })
    }

    pub fn with_script(mut self, script: SteeringScript) -> Self {
        self.script = script;
        self
    }

    pub fn world(&self) -> &ClientWorld {
        &self.world
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    async fn join(&mut self) -> Result<(), ClientError> {
        info!("Joining {} at {}...", self.game, self.server_addr);

        let packet = Packet::Join {
            game: self.game.clone(),
            protocol_version: PROTOCOL_VERSION,
            fields: self.request.to_fields(),
        };
        self.send_packet(&packet).await
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), ClientError> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Returns why the client should stop, if it should
    fn handle_packet(&mut self, packet: Packet) -> Option<ClientExit> {
        match packet {
            Packet::Joined {
                session,
                player_id,
                entity,
            } => {
                info!("Joined {} as player {} (entity {:?})", session, player_id, entity);
                self.world.set_player(player_id, entity);
                self.connected = true;
            }

            Packet::State {
                tick,
                timestamp,
                last_processed_input,
                entities,
            } => {
                if timestamp > 0 {
                    self.ping_ms = get_timestamp().saturating_sub(timestamp);
                }
                self.world.apply_state(tick, timestamp, &last_processed_input, entities);
            }

            Packet::Rejected { reason } => {
                warn!("Join rejected: {}", reason);
                return Some(ClientExit::Rejected(reason));
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.connected = false;
                return Some(ClientExit::Disconnected(reason));
            }

            _ => {
                warn!("Unexpected packet type");
            }
        }
        None
    }

    async fn send_input(&mut self) -> Result<(), ClientError> {
        if !self.connected {
            return Ok(());
        }

        let payload = self.script.next_payload();
        let package = self.world.local_input(payload);
        self.send_packet(&Packet::Input(package)).await
    }

    fn log_frame(&mut self) {
        let now = get_timestamp();
        if let Some(own) = self.world.render_own() {
            info!(
                "tick {} ping {}ms own x={:.1} y={:.1} heading={:.2} score={}",
                self.world.tick,
                self.ping_ms,
                float_field(&own, "x"),
                float_field(&own, "y"),
                float_field(&own, "heading"),
                own.get("score").and_then(FieldValue::as_i64).unwrap_or(0),
            );
        }

        for (id, fields) in self.world.render_remotes(now) {
            debug!(
                "  entity {}{} x={:.1} y={:.1}",
                id,
                if self.world.is_bot(id) { " (bot)" } else { "" },
                float_field(&fields, "x"),
                float_field(&fields, "y"),
            );
        }
    }

    /// Joins and plays until rejected, disconnected or `duration` elapses
    pub async fn run(&mut self, duration: Option<Duration>) -> Result<ClientExit, ClientError> {
        self.join().await?;

        let mut input_interval = interval(Duration::from_millis(1000 / INPUT_RATE));
        let mut log_interval = interval(Duration::from_millis(500));
        let deadline = async {
            match duration {
                Some(duration) => sleep(duration).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let mut buffer = vec![0u8; MAX_PACKET_SIZE];

        let exit = loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if self.fake_ping_ms > 0 {
                                sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
                            }

                            match deserialize::<Packet>(&buffer[0..len]) {
                                Ok(packet) => {
                                    if let Some(exit) = self.handle_packet(packet) {
                                        break exit;
                                    }
                                }
                                Err(e) => warn!("Failed to deserialize packet: {}", e),
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = input_interval.tick() => {
                    if let Err(e) = self.send_input().await {
                        error!("Error sending input: {}", e);
                    }
                },

                _ = log_interval.tick() => self.log_frame(),

                _ = &mut deadline => break ClientExit::Finished,
            }
        };

        if self.connected {
            if let Err(e) = self.send_packet(&Packet::Leave).await {
                warn!("Failed to send leave: {}", e);
            }
            self.connected = false;
        }

        Ok(exit)
    }
}

fn float_field(fields: &FieldMap, name: &str) -> f32 {
    fields.get(name).and_then(FieldValue::as_f32).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcade_shared::InputPackage;
    use assert_approx_eq::assert_approx_eq;

    fn package(payload: Payload) -> InputPackage {
        InputPackage {
            sequence: 1,
            timestamp: 0,
            payload,
        }
    }

    fn heading(fields: &FieldMap) -> f32 {
        float_field(fields, "heading")
    }

    #[test]
    fn test_steering_turns_and_wraps() {
        let mut state = FieldMap::new();
        state.insert("heading".into(), FieldValue::Float(TAU - 0.1));

        let turned = grazer_steering(&state, &package(Payload::new().with("turn", 0.3f32)));
        assert_approx_eq!(heading(&turned), 0.2, 1e-5);

        let absolute = grazer_steering(&state, &package(Payload::new().with("heading", 1.0f32)));
        assert_approx_eq!(heading(&absolute), 1.0);
    }

    #[test]
    fn test_steering_ignores_other_payloads() {
        let mut state = FieldMap::new();
        state.insert("heading".into(), FieldValue::Float(1.5));
        let next = grazer_steering(&state, &package(Payload::new().with("boost", true)));
        assert_eq!(next, state);
    }

    #[test]
    fn test_script_sweeps_back_and_forth() {
        let mut script = SteeringScript::new(0.5, 2);
        let turns: Vec<f32> = (0..5)
            .map(|_| script.next_payload().float("turn").unwrap())
            .collect();
        assert_eq!(turns, vec![0.5, 0.5, -0.5, -0.5, 0.5]);
    }
}
