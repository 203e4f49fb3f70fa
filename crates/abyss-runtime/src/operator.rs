//! [`OperatorStation`] – the control side of the link.
//!
//! Each [`tick`](OperatorStation::tick):
//!
//! 1. **Receive** – wait up to `recv_timeout` for one datagram, then drain
//!    whatever is already queued (bounded by [`MAX_DATAGRAMS_PER_TICK`]).
//! 2. **Decode** – every datagram becomes a [`Packet`] once, at the boundary.
//! 3. **Dispatch**
//!    * image chunks feed the [`ImageReassembler`]; completed frames are kept
//!      as [`last_frame`](OperatorStation::last_frame) and published on
//!      [`Topic::Imagery`];
//!    * sensor packets pass the [`SensorValidator`], mirror their thruster
//!      speeds into the local [`DroneState`], advance the position estimate
//!      and feed the [`TerrainMapper`].  Snapshots go to
//!      [`Topic::Telemetry`], accepted points to [`Topic::Terrain`].
//! 4. **Watch** – stream stalls and recoveries from the [`LinkWatchdog`];
//!    stalls are published on [`Topic::SystemAlerts`].
//!
//! Nothing in a tick is fatal.  Rejected datagrams are logged and counted in
//! the [`TickReport`].
//!
//! Commands leave through [`send_manual`](OperatorStation::send_manual) or,
//! in [`ControlMode::Auto`], through the route scheduler in
//! [`run`](OperatorStation::run).  Every command sent is published on
//! [`Topic::Commands`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use abyss_kernel::{LinkStream, LinkWatchdog, SensorValidator, StreamHealth};
use abyss_middleware::codec::{self, Packet};
use abyss_middleware::reassembler::DEFAULT_STALE_WINDOW;
use abyss_middleware::transport::{Datagram, DatagramTransport};
use abyss_middleware::{
    CommandChannel, EventBus, ImageReassembler, RawSensorPacket, Topic, UdpTransport,
};
use abyss_perception::{MapperConfig, PositionEstimator, TerrainMapper};
use abyss_types::{
    AssembledFrame, ControlMode, DroneState, Event, EventPayload, ImageChunk, LinkError,
    ObjectType, TelemetrySnapshot, TerrainPoint, ThrusterCommand, Vec3,
};
use tokio::sync::{Mutex, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::navigation::{DEFAULT_MAX_SPEED, DEFAULT_REACH_TOLERANCE, ManualInput, RouteFollower};
use crate::tick_guard::TickGuard;

/// Upper bound on datagrams handled by one tick.
pub const MAX_DATAGRAMS_PER_TICK: usize = 256;

const SOURCE: &str = "abyss-runtime::operator";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`OperatorStation`].
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    /// Local address telemetry is received on.
    pub bind: SocketAddr,
    /// Where commands are sent.
    pub vehicle_addr: SocketAddr,
    pub tick_interval: Duration,
    /// How long a tick waits for its first datagram.
    pub recv_timeout: Duration,
    /// Interval of the auto-route scheduler.
    pub route_interval: Duration,
    /// Estimator step applied per valid sensor packet, in seconds.
    pub estimator_dt: f64,
    pub mapper: MapperConfig,
    pub stale_frame_window: u64,
    /// Terrain CSV mirror; `None` keeps the map in memory only.
    pub terrain_log: Option<PathBuf>,
    pub route_max_speed: f64,
    pub route_reach_tolerance: f64,
    /// Silence after which a stream is reported stalled.
    pub link_deadline: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5005)),
            vehicle_addr: SocketAddr::from(([127, 0, 0, 1], 5006)),
            tick_interval: Duration::from_millis(50),
            recv_timeout: Duration::from_millis(100),
            route_interval: Duration::from_millis(100),
            estimator_dt: 0.1,
            mapper: MapperConfig::default(),
            stale_frame_window: DEFAULT_STALE_WINDOW,
            terrain_log: None,
            route_max_speed: DEFAULT_MAX_SPEED,
            route_reach_tolerance: DEFAULT_REACH_TOLERANCE,
            link_deadline: abyss_kernel::watchdog::DEFAULT_DEADLINE,
        }
    }
}

/// Counters for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub received: usize,
    pub telemetry: usize,
    pub chunks: usize,
    pub frames_completed: usize,
    pub terrain_points: usize,
    /// Datagrams that failed decoding, validation or reassembly.
    pub dropped: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// OperatorStation
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a tick mutates, behind one lock.
struct OperatorCore {
    state: DroneState,
    reassembler: ImageReassembler,
    mapper: TerrainMapper,
    last_frame: Option<AssembledFrame>,
    watchdog: LinkWatchdog,
    route: RouteFollower,
}

pub struct OperatorStation {
    transport: Arc<dyn DatagramTransport>,
    commands: CommandChannel,
    bus: EventBus,
    validator: SensorValidator,
    estimator: PositionEstimator,
    core: Mutex<OperatorCore>,
    guard: TickGuard,
    config: OperatorConfig,
}

impl OperatorStation {
    /// Bind a UDP transport from `config` and build the station on it.
    ///
    /// # Errors
    ///
    /// [`LinkError::Io`] when the socket cannot be bound or the terrain log
    /// cannot be opened.
    pub async fn bind(config: OperatorConfig) -> Result<Self, LinkError> {
        let transport = UdpTransport::bind(config.bind, config.vehicle_addr).await?;
        Self::new(Arc::new(transport), config)
    }

    /// Build a station on an existing transport.  When `terrain_log` is set,
    /// its rows are loaded into the map first.
    ///
    /// # Errors
    ///
    /// [`LinkError::Io`] when the terrain log cannot be opened.
    pub fn new(transport: Arc<dyn DatagramTransport>, config: OperatorConfig) -> Result<Self, LinkError> {
        let mapper = match &config.terrain_log {
            Some(path) => {
                let mapper = TerrainMapper::with_log(path, config.mapper)?;
                info!(path = %path.display(), points = mapper.map().len(), "terrain log loaded");
                mapper
            }
            None => TerrainMapper::new(config.mapper),
        };
        let core = OperatorCore {
            state: DroneState::default(),
            reassembler: ImageReassembler::with_stale_window(config.stale_frame_window),
            mapper,
            last_frame: None,
            watchdog: LinkWatchdog::new(config.link_deadline),
            route: RouteFollower::new(config.route_max_speed, config.route_reach_tolerance),
        };
        Ok(Self {
            commands: CommandChannel::new(Arc::clone(&transport)),
            transport,
            bus: EventBus::default(),
            validator: SensorValidator::new(),
            estimator: PositionEstimator::new(config.estimator_dt),
            core: Mutex::new(core),
            guard: TickGuard::new(),
            config,
        })
    }

    /// A handle on the station's event bus for presentation consumers.
    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Snapshot of the operator's mirror of the vehicle state.
    pub async fn state(&self) -> DroneState {
        self.core.lock().await.state.clone()
    }

    pub async fn mode(&self) -> ControlMode {
        self.core.lock().await.state.mode
    }

    /// The most recently assembled camera frame, for redisplay while idle.
    pub async fn last_frame(&self) -> Option<AssembledFrame> {
        self.core.lock().await.last_frame.clone()
    }

    /// Every mapped point, oldest first.
    pub async fn terrain_points(&self) -> Vec<TerrainPoint> {
        self.core.lock().await.mapper.map().iter().collect()
    }

    /// Mapped point count per seabed label.
    pub async fn terrain_histogram(&self) -> [(ObjectType, usize); 5] {
        self.core.lock().await.mapper.map().histogram()
    }

    /// Streams silent for longer than the link deadline.
    pub async fn link_health(&self) -> Vec<LinkStream> {
        self.core.lock().await.watchdog.stalled()
    }

    // ── Tick ─────────────────────────────────────────────────────────────────

    /// Receive and process one batch of datagrams.
    #[instrument(skip(self), level = "debug")]
    pub async fn tick(&self) -> TickReport {
        let batch = self.receive_batch().await;
        let mut report = TickReport {
            received: batch.len(),
            ..TickReport::default()
        };

        let mut core = self.core.lock().await;
        for datagram in &batch {
            self.dispatch(&mut core, datagram, &mut report);
        }
        self.check_link(&mut core);
        report
    }

    async fn receive_batch(&self) -> Vec<Datagram> {
        let mut batch = Vec::new();
        match self.transport.recv_timeout(self.config.recv_timeout).await {
            Ok(d) => batch.push(d),
            Err(e) if e.is_idle() => {
                trace!("no datagram this tick");
                return batch;
            }
            Err(e) => {
                warn!(error = %e, "receive failed");
                return batch;
            }
        }
        while batch.len() < MAX_DATAGRAMS_PER_TICK {
            match self.transport.try_recv() {
                Ok(Some(d)) => batch.push(d),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "receive failed while draining");
                    break;
                }
            }
        }
        batch
    }

    fn dispatch(&self, core: &mut OperatorCore, datagram: &Datagram, report: &mut TickReport) {
        let packet = match codec::decode(&datagram.payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, peer = %datagram.peer, size = datagram.payload.len(), "datagram dropped");
                report.dropped += 1;
                return;
            }
        };
        match packet {
            Packet::ImageChunk(chunk) => self.handle_chunk(core, chunk, report),
            Packet::Sensor(raw) => self.handle_sensor(core, &raw, report),
            other => {
                debug!(kind = other.kind(), peer = %datagram.peer, "unexpected packet ignored");
                report.dropped += 1;
            }
        }
    }

    fn handle_chunk(&self, core: &mut OperatorCore, chunk: ImageChunk, report: &mut TickReport) {
        report.chunks += 1;
        match core.reassembler.offer(chunk) {
            Ok(completed) => {
                core.watchdog.heartbeat(LinkStream::Imagery);
                if let Some(frame) = completed {
                    debug!(frame_id = frame.frame_id, "frame assembled");
                    report.frames_completed += 1;
                    self.bus.publish_to(
                        Topic::Imagery,
                        Event::new(SOURCE, EventPayload::FrameAssembled(frame.clone())),
                    );
                    core.last_frame = Some(frame);
                }
            }
            Err(e) => {
                warn!(error = %e, "image chunk rejected");
                report.dropped += 1;
            }
        }
    }

    fn handle_sensor(&self, core: &mut OperatorCore, raw: &RawSensorPacket, report: &mut TickReport) {
        let packet = match self.validator.validate(raw) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "sensor packet rejected");
                report.dropped += 1;
                return;
            }
        };
        core.watchdog.heartbeat(LinkStream::Telemetry);
        report.telemetry += 1;

        core.state.record_speeds(packet.thruster_speeds);
        let position = self.estimator.step(&mut core.state);

        match core.mapper.integrate(
            position,
            packet.imu.quaternion,
            packet.sonar.distance,
            packet.sonar.object_type,
        ) {
            Ok(Some(point)) => {
                report.terrain_points += 1;
                self.bus
                    .publish_to(Topic::Terrain, Event::new(SOURCE, EventPayload::TerrainPoint(point)));
            }
            Ok(None) => {}
            Err(e) => error!(error = %e, frame_id = packet.frame_id, "terrain map rolled back"),
        }

        let snapshot = TelemetrySnapshot {
            frame_id: packet.frame_id,
            timestamp: packet.timestamp,
            estimated_position: position,
            thruster_speeds: packet.thruster_speeds,
            distance: packet.sonar.distance,
        };
        self.bus
            .publish_to(Topic::Telemetry, Event::new(SOURCE, EventPayload::Telemetry(snapshot)));
    }

    fn check_link(&self, core: &mut OperatorCore) {
        for (stream, health) in core.watchdog.poll_transitions() {
            match health {
                StreamHealth::Stalled => {
                    warn!(%stream, "link stream stalled");
                    let message = format!(
                        "no {stream} data for more than {} ms",
                        self.config.link_deadline.as_millis()
                    );
                    self.bus.publish_to(
                        Topic::SystemAlerts,
                        Event::new(
                            SOURCE,
                            EventPayload::LinkFault {
                                component: stream.as_str().to_string(),
                                message,
                            },
                        ),
                    );
                }
                StreamHealth::Healthy => info!(%stream, "link stream recovered"),
            }
        }
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    /// Send `command` once and publish it on [`Topic::Commands`].
    ///
    /// # Errors
    ///
    /// [`LinkError::Transmit`] from the command channel; already logged.
    pub async fn send_command(&self, command: ThrusterCommand) -> Result<(), LinkError> {
        self.commands.send(command).await?;
        self.bus
            .publish_to(Topic::Commands, Event::new(SOURCE, EventPayload::CommandSent(command)));
        Ok(())
    }

    /// Send a manual preset.  Manual input takes control back from the route.
    ///
    /// # Errors
    ///
    /// See [`send_command`](Self::send_command).
    pub async fn send_manual(&self, input: ManualInput) -> Result<(), LinkError> {
        {
            let mut core = self.core.lock().await;
            if core.state.mode == ControlMode::Auto {
                info!(?input, "manual input; leaving auto mode");
                core.state.mode = ControlMode::Manual;
            }
        }
        self.send_command(input.command()).await
    }

    /// Switch control mode.  Leaving [`ControlMode::Auto`] sends a stop
    /// command so the vehicle does not hold the last route velocity.
    pub async fn set_mode(&self, mode: ControlMode) {
        let previous = {
            let mut core = self.core.lock().await;
            std::mem::replace(&mut core.state.mode, mode)
        };
        if previous == mode {
            return;
        }
        info!(?previous, ?mode, "control mode changed");
        if previous == ControlMode::Auto {
            // Failure already logged by the channel.
            let _ = self.send_command(ThrusterCommand::stop()).await;
        }
    }

    pub async fn add_waypoint(&self, point: Vec3) {
        self.core.lock().await.route.add_waypoint(point);
    }

    pub async fn clear_route(&self) {
        self.core.lock().await.route.clear();
    }

    pub async fn waypoints(&self) -> Vec<Vec3> {
        self.core.lock().await.route.waypoints().to_vec()
    }

    /// In auto mode, compute and send the next route command and return it.
    /// Returns `None` in manual mode.
    pub async fn route_tick(&self) -> Option<ThrusterCommand> {
        let command = {
            let mut core = self.core.lock().await;
            if core.state.mode != ControlMode::Auto {
                return None;
            }
            let position = core.state.position;
            core.route.next_command(position)
        };
        // Failure already logged by the channel.
        let _ = self.send_command(command).await;
        Some(command)
    }

    // ── Scheduling ───────────────────────────────────────────────────────────

    /// Drive ticks and the auto route until `shutdown` turns `true` or its
    /// sender is dropped.
    ///
    /// Each due tick runs in its own task behind the [`TickGuard`]; a tick
    /// that comes due while the previous one is still running is skipped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticks = time::interval(self.config.tick_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut route = time::interval(self.config.route_interval);
        route.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            bind = %self.config.bind,
            vehicle = %self.config.vehicle_addr,
            "operator station running"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticks.tick() => match self.guard.try_enter() {
                    Some(permit) => {
                        let station = Arc::clone(&self);
                        tokio::spawn(async move {
                            let _permit = permit;
                            let report = station.tick().await;
                            trace!(?report, "tick finished");
                        });
                    }
                    None => debug!("previous tick still running; tick skipped"),
                },
                _ = route.tick() => {
                    self.route_tick().await;
                }
            }
        }

        info!(skipped_ticks = self.guard.skipped(), "operator station stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abyss_middleware::codec::{decode_command, encode_chunk, encode_sensor};
    use abyss_types::{ImuReading, Quaternion, SensorPacket, SonarReading};
    use tokio::net::UdpSocket;

    fn test_config() -> OperatorConfig {
        OperatorConfig {
            recv_timeout: Duration::from_millis(200),
            ..OperatorConfig::default()
        }
    }

    /// A station on loopback plus the socket standing in for the vehicle.
    async fn station(config: OperatorConfig) -> (Arc<OperatorStation>, UdpSocket, SocketAddr) {
        let vehicle = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let transport = UdpTransport::bind(
            "127.0.0.1:0".parse().unwrap(),
            vehicle.local_addr().unwrap(),
        )
        .await
        .unwrap();
        let addr = transport.local_addr().unwrap();
        let station = OperatorStation::new(Arc::new(transport), config).unwrap();
        (Arc::new(station), vehicle, addr)
    }

    fn sensor(frame_id: u64, speeds: [f64; 6], distance: f64) -> Vec<u8> {
        encode_sensor(&SensorPacket {
            timestamp: 1_700_000_000.0 + frame_id as f64,
            imu: ImuReading {
                quaternion: Quaternion::identity(),
            },
            sonar: SonarReading {
                point: Vec3::new(0.0, 0.0, -distance),
                distance,
                object_type: ObjectType::Coral,
            },
            thruster_speeds: speeds,
            frame_id,
        })
        .unwrap()
    }

    fn chunk(frame_id: u64, chunk_index: u32, total_chunks: u32, data: &str) -> Vec<u8> {
        encode_chunk(&ImageChunk {
            frame_id,
            chunk_index,
            total_chunks,
            data: data.to_string(),
        })
        .unwrap()
    }

    async fn recv_command(socket: &UdpSocket) -> ThrusterCommand {
        let mut buf = [0u8; 1024];
        let (n, _) = time::timeout(Duration::from_secs(1), socket.recv_from(&mut buf))
            .await
            .expect("command expected")
            .unwrap();
        decode_command(&buf[..n]).unwrap()
    }

    #[tokio::test]
    async fn idle_tick_reports_nothing() {
        let (station, _vehicle, _) = station(OperatorConfig {
            recv_timeout: Duration::from_millis(20),
            ..test_config()
        })
        .await;
        assert_eq!(station.tick().await, TickReport::default());
        assert!(station.last_frame().await.is_none());
    }

    #[tokio::test]
    async fn out_of_order_chunks_assemble_one_frame() {
        let (station, vehicle, addr) = station(test_config()).await;
        let mut imagery = station.bus().subscribe_to(Topic::Imagery);

        for (index, data) in [(2, "CC"), (0, "AA"), (1, "BB")] {
            vehicle.send_to(&chunk(7, index, 3, data), addr).await.unwrap();
        }
        let report = station.tick().await;
        assert_eq!(report.received, 3);
        assert_eq!(report.chunks, 3);
        assert_eq!(report.frames_completed, 1);

        let frame = station.last_frame().await.unwrap();
        assert_eq!(frame.frame_id, 7);
        assert_eq!(frame.data, "AABBCC");
        match imagery.try_recv().unwrap().payload {
            EventPayload::FrameAssembled(f) => assert_eq!(f, frame),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn last_frame_survives_idle_ticks() {
        let (station, vehicle, addr) = station(OperatorConfig {
            recv_timeout: Duration::from_millis(50),
            ..test_config()
        })
        .await;
        vehicle.send_to(&chunk(1, 0, 1, "QQ=="), addr).await.unwrap();
        station.tick().await;
        station.tick().await;
        assert_eq!(station.last_frame().await.unwrap().data, "QQ==");
    }

    #[tokio::test]
    async fn valid_sensor_packet_updates_state_map_and_bus() {
        let (station, vehicle, addr) = station(test_config()).await;
        let mut telemetry = station.bus().subscribe_to(Topic::Telemetry);
        let mut terrain = station.bus().subscribe_to(Topic::Terrain);

        let speeds = [0.5, 0.5, 0.0, 0.0, 0.0, 0.0];
        vehicle.send_to(&sensor(1, speeds, 2.0), addr).await.unwrap();
        let report = station.tick().await;
        assert_eq!(report.telemetry, 1);
        assert_eq!(report.terrain_points, 1);

        let state = station.state().await;
        assert_eq!(state.thruster_speeds, speeds);
        assert!((state.position.x - 0.05).abs() < 1e-9);
        assert!((state.position.y - 0.05).abs() < 1e-9);

        let points = station.terrain_points().await;
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].object_type, ObjectType::Coral);
        assert!((points[0].position.z + 2.0).abs() < 1e-9);
        let histogram = station.terrain_histogram().await;
        assert!(histogram.contains(&(ObjectType::Coral, 1)));
        assert_eq!(histogram.iter().map(|&(_, n)| n).sum::<usize>(), 1);

        match telemetry.try_recv().unwrap().payload {
            EventPayload::Telemetry(s) => {
                assert_eq!(s.frame_id, 1);
                assert_eq!(s.distance, 2.0);
                assert_eq!(s.estimated_position, state.position);
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert!(matches!(
            terrain.try_recv().unwrap().payload,
            EventPayload::TerrainPoint(_)
        ));
    }

    #[tokio::test]
    async fn packet_missing_distance_never_reaches_mapper() {
        let (station, vehicle, addr) = station(test_config()).await;
        let mut value: serde_json::Value =
            serde_json::from_slice(&sensor(1, [0.0; 6], 1.0)).unwrap();
        value["sonar"].as_object_mut().unwrap().remove("distance");
        vehicle
            .send_to(&serde_json::to_vec(&value).unwrap(), addr)
            .await
            .unwrap();

        let report = station.tick().await;
        assert_eq!(report.dropped, 1);
        assert_eq!(report.telemetry, 0);
        assert!(station.terrain_points().await.is_empty());
        assert_eq!(station.state().await, DroneState::default());
    }

    #[tokio::test]
    async fn stationary_repeats_are_deduplicated() {
        let (station, vehicle, addr) = station(test_config()).await;
        for frame_id in 1..=3 {
            vehicle.send_to(&sensor(frame_id, [0.0; 6], 1.0), addr).await.unwrap();
        }
        let report = station.tick().await;
        assert_eq!(report.telemetry, 3);
        assert_eq!(report.terrain_points, 1);
        assert_eq!(station.terrain_points().await.len(), 1);
    }

    #[tokio::test]
    async fn garbage_is_counted_and_ignored() {
        let (station, vehicle, addr) = station(test_config()).await;
        vehicle.send_to(b"not json", addr).await.unwrap();
        vehicle.send_to(br#"{"type":"heartbeat"}"#, addr).await.unwrap();
        vehicle.send_to(&chunk(3, 5, 2, "AA"), addr).await.unwrap();
        let report = station.tick().await;
        assert_eq!(report.received, 3);
        assert_eq!(report.dropped, 3);
    }

    #[tokio::test]
    async fn terrain_log_is_written_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terrain_map.csv");
        let config = OperatorConfig {
            terrain_log: Some(path.clone()),
            ..test_config()
        };

        let (first, vehicle, addr) = station(config.clone()).await;
        vehicle.send_to(&sensor(1, [0.0; 6], 1.5), addr).await.unwrap();
        first.tick().await;
        drop(first);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);

        let (second, _, _) = station(config).await;
        let points = second.terrain_points().await;
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].object_type, ObjectType::Coral);
    }

    #[tokio::test]
    async fn silent_link_raises_one_alert_per_stream() {
        let (station, _vehicle, _) = station(OperatorConfig {
            recv_timeout: Duration::from_millis(5),
            link_deadline: Duration::from_millis(20),
            ..test_config()
        })
        .await;
        let mut alerts = station.bus().subscribe_to(Topic::SystemAlerts);

        time::sleep(Duration::from_millis(40)).await;
        station.tick().await;
        station.tick().await;

        let mut components = Vec::new();
        while let Ok(event) = alerts.try_recv() {
            if let EventPayload::LinkFault { component, .. } = event.payload {
                components.push(component);
            }
        }
        assert_eq!(components, vec!["telemetry", "imagery"]);
        assert_eq!(
            station.link_health().await,
            vec![LinkStream::Telemetry, LinkStream::Imagery]
        );
    }

    #[tokio::test]
    async fn manual_command_reaches_vehicle_and_bus() {
        let (station, vehicle, _) = station(test_config()).await;
        let mut commands = station.bus().subscribe_to(Topic::Commands);

        station.send_manual(ManualInput::Forward).await.unwrap();
        assert_eq!(recv_command(&vehicle).await, ManualInput::Forward.command());
        assert!(matches!(
            commands.try_recv().unwrap().payload,
            EventPayload::CommandSent(c) if c == ManualInput::Forward.command()
        ));
    }

    #[tokio::test]
    async fn route_runs_only_in_auto_mode() {
        let (station, vehicle, _) = station(test_config()).await;
        station.add_waypoint(Vec3::new(0.0, 2.0, 0.0)).await;

        assert_eq!(station.route_tick().await, None);

        station.set_mode(ControlMode::Auto).await;
        let cmd = station.route_tick().await.unwrap();
        assert!((cmd.speeds()[1] - 0.5).abs() < 1e-9);
        assert_eq!(recv_command(&vehicle).await, cmd);
    }

    #[tokio::test]
    async fn leaving_auto_sends_stop() {
        let (station, vehicle, _) = station(test_config()).await;
        station.set_mode(ControlMode::Auto).await;
        station.set_mode(ControlMode::Manual).await;
        assert_eq!(recv_command(&vehicle).await, ThrusterCommand::stop());
    }

    #[tokio::test]
    async fn manual_input_takes_over_from_route() {
        let (station, vehicle, _) = station(test_config()).await;
        station.set_mode(ControlMode::Auto).await;
        station.send_manual(ManualInput::Ascend).await.unwrap();
        assert_eq!(station.mode().await, ControlMode::Manual);
        assert_eq!(recv_command(&vehicle).await, ManualInput::Ascend.command());
    }

    #[tokio::test]
    async fn run_processes_telemetry_until_shutdown() {
        let (station, vehicle, addr) = station(OperatorConfig {
            tick_interval: Duration::from_millis(10),
            recv_timeout: Duration::from_millis(20),
            ..test_config()
        })
        .await;
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&station).run(rx));

        let speeds = [0.0, 0.0, 0.0, 0.0, -0.5, -0.5];
        vehicle.send_to(&sensor(1, speeds, 1.0), addr).await.unwrap();
        for _ in 0..100 {
            if station.state().await.thruster_speeds == speeds {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(station.state().await.thruster_speeds, speeds);

        tx.send(true).unwrap();
        time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("station should stop")
            .unwrap();
    }
}
