//! [`VehicleStation`] – the drone side of the link.
//!
//! Two tasks share one [`DroneState`]:
//!
//! * the **command listener** receives thruster commands, records them in the
//!   state and forwards them to the [`Thrusters`] driver;
//! * the **telemetry cycle** runs every `telemetry_period`: it advances the
//!   position estimate from the current speeds, reads the IMU and then the
//!   sonar, sends one sensor packet and then the camera frame as image chunks,
//!   all under a fresh frame id.
//!
//! Every hardware or transmit failure is logged and the cycle carries on.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use abyss_hal::sim::SimRig;
//! use abyss_runtime::vehicle::{VehicleConfig, VehicleStation};
//!
//! # async fn demo() -> Result<(), abyss_types::LinkError> {
//! let station = VehicleStation::bind(VehicleConfig::default(), SimRig::new().build()).await?;
//! let (_tx, shutdown) = tokio::sync::watch::channel(false);
//! Arc::new(station).run(shutdown).await;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use abyss_hal::{Camera, CameraFrame, Imu, Sonar, Thrusters, VehicleHardware};
use abyss_middleware::UdpTransport;
use abyss_middleware::codec::{
    DEFAULT_CHUNK_SIZE, chunk_image, decode_command, encode_chunk, encode_sensor,
};
use abyss_middleware::transport::DatagramTransport;
use abyss_perception::PositionEstimator;
use abyss_types::{
    DroneState, ImuReading, LinkError, SensorPacket, SonarReading, THRUSTER_COUNT,
    ThrusterCommand, Vec3,
};
use tokio::sync::{Mutex, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`VehicleStation`].
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleConfig {
    /// Local address the command listener binds.
    pub bind: SocketAddr,
    /// Where telemetry and imagery are sent.
    pub operator_addr: SocketAddr,
    /// Interval between telemetry cycles; also the estimator step.
    pub telemetry_period: Duration,
    /// Upper bound on one listener receive.
    pub recv_timeout: Duration,
    /// Base64 characters per image chunk.
    pub chunk_size: usize,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5006)),
            operator_addr: SocketAddr::from(([127, 0, 0, 1], 5005)),
            telemetry_period: Duration::from_millis(100),
            recv_timeout: Duration::from_millis(100),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// What one telemetry cycle managed to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleReport {
    pub frame_id: u64,
    pub sensor_sent: bool,
    pub chunks_sent: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// VehicleStation
// ─────────────────────────────────────────────────────────────────────────────

/// Sensors read by the telemetry cycle, with the frame counter they share.
struct SensorSuite {
    camera: Box<dyn Camera>,
    imu: Box<dyn Imu>,
    sonar: Box<dyn Sonar>,
    frame_id: u64,
}

pub struct VehicleStation {
    transport: Arc<dyn DatagramTransport>,
    state: Mutex<DroneState>,
    thrusters: Mutex<Box<dyn Thrusters>>,
    sensors: Mutex<SensorSuite>,
    estimator: PositionEstimator,
    config: VehicleConfig,
}

impl VehicleStation {
    /// Bind a UDP transport from `config` and build the station on it.
    ///
    /// # Errors
    ///
    /// [`LinkError::Io`] when the listen address cannot be bound.
    pub async fn bind(config: VehicleConfig, hardware: VehicleHardware) -> Result<Self, LinkError> {
        let transport = UdpTransport::bind(config.bind, config.operator_addr).await?;
        Ok(Self::new(Arc::new(transport), hardware, config))
    }

    pub fn new(
        transport: Arc<dyn DatagramTransport>,
        hardware: VehicleHardware,
        config: VehicleConfig,
    ) -> Self {
        let [camera, imu, sonar, thrusters] = hardware.ids();
        info!(camera, imu, sonar, thrusters, "vehicle hardware attached");
        let VehicleHardware {
            camera,
            imu,
            sonar,
            thrusters,
        } = hardware;
        Self {
            transport,
            state: Mutex::new(DroneState::default()),
            thrusters: Mutex::new(thrusters),
            sensors: Mutex::new(SensorSuite {
                camera,
                imu,
                sonar,
                frame_id: 0,
            }),
            estimator: PositionEstimator::new(config.telemetry_period.as_secs_f64()),
            config,
        }
    }

    pub fn config(&self) -> &VehicleConfig {
        &self.config
    }

    /// Snapshot of the shared state.
    pub async fn state(&self) -> DroneState {
        self.state.lock().await.clone()
    }

    /// Id of the most recent telemetry cycle (0 before the first).
    pub async fn frame_id(&self) -> u64 {
        self.sensors.lock().await.frame_id
    }

    // ── Command listener ─────────────────────────────────────────────────────

    /// Decode one command datagram, record it and drive the thrusters.
    ///
    /// # Errors
    ///
    /// [`LinkError::Decode`] for anything that is not a command (the state is
    /// left untouched) and [`LinkError::HardwareFault`] when the driver
    /// refuses the speeds (the state already holds them).
    pub async fn handle_command(&self, payload: &[u8]) -> Result<ThrusterCommand, LinkError> {
        let command = decode_command(payload)?;
        let speeds = command.speeds();
        let changed = self.state.lock().await.record_speeds(speeds);
        if changed {
            debug!(?speeds, "thruster speeds updated");
        }
        self.thrusters.lock().await.apply(speeds)?;
        Ok(command)
    }

    /// Wait up to `recv_timeout` for one command and apply it.
    ///
    /// Returns `Ok(None)` when nothing arrived.
    pub async fn listen_once(&self) -> Result<Option<ThrusterCommand>, LinkError> {
        let datagram = match self.transport.recv_timeout(self.config.recv_timeout).await {
            Ok(d) => d,
            Err(e) if e.is_idle() => return Ok(None),
            Err(e) => return Err(e),
        };
        self.handle_command(&datagram.payload).await.map(Some)
    }

    async fn listen(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(bind = %self.config.bind, "command listener started");
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
                result = self.listen_once() => match result {
                    Ok(_) => {}
                    Err(e @ LinkError::HardwareFault { .. }) => {
                        error!(error = %e, "thrusters rejected command");
                    }
                    Err(e) => warn!(error = %e, "command dropped"),
                },
            }
        }
        info!("command listener stopped");
    }

    // ── Telemetry cycle ──────────────────────────────────────────────────────

    /// Run one telemetry cycle.
    #[instrument(skip(self), level = "debug")]
    pub async fn telemetry_cycle(&self) -> CycleReport {
        let (position, thruster_speeds) = {
            let mut state = self.state.lock().await;
            let position = self.estimator.step(&mut state);
            (position, state.thruster_speeds)
        };

        let (frame_id, readings, frame) = {
            let mut sensors = self.sensors.lock().await;
            sensors.frame_id += 1;
            let readings = read_sensors(&mut sensors, position);
            let frame = sensors.camera.capture();
            (sensors.frame_id, readings, frame)
        };

        let mut report = CycleReport {
            frame_id,
            ..CycleReport::default()
        };

        match readings {
            Ok((imu, sonar)) => {
                let packet = SensorPacket {
                    timestamp: unix_timestamp(),
                    imu,
                    sonar,
                    thruster_speeds,
                    frame_id,
                };
                report.sensor_sent = self.transmit("sensor", encode_sensor(&packet)).await;
            }
            Err(e) => warn!(error = %e, frame_id, "sensor read failed; telemetry skipped"),
        }

        match frame {
            Ok(CameraFrame { encoded }) => {
                for chunk in chunk_image(frame_id, &encoded, self.config.chunk_size) {
                    if self.transmit("image_chunk", encode_chunk(&chunk)).await {
                        report.chunks_sent += 1;
                    }
                }
            }
            Err(e) => warn!(error = %e, frame_id, "camera capture failed; imagery skipped"),
        }

        report
    }

    async fn transmit(&self, kind: &'static str, encoded: Result<Vec<u8>, LinkError>) -> bool {
        let result = match encoded {
            Ok(bytes) => self.transport.send(&bytes).await.map(|_| ()),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(kind, error = %e, "datagram dropped");
                false
            }
        }
    }

    // ── Scheduling ───────────────────────────────────────────────────────────

    /// Run the listener and the telemetry cycle until `shutdown` turns `true`
    /// or its sender is dropped.  The thrusters are stopped on the way out.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let listener = tokio::spawn(Arc::clone(&self).listen(shutdown.clone()));

        let mut cycle = time::interval(self.config.telemetry_period);
        cycle.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            operator = %self.config.operator_addr,
            period_ms = self.config.telemetry_period.as_millis() as u64,
            "vehicle station running"
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
                _ = cycle.tick() => {
                    let report = self.telemetry_cycle().await;
                    trace!(?report, "telemetry cycle finished");
                }
            }
        }

        if let Err(e) = listener.await {
            warn!(error = %e, "command listener ended abnormally");
        }
        if let Err(e) = self.thrusters.lock().await.apply([0.0; THRUSTER_COUNT]) {
            error!(error = %e, "failed to stop thrusters on shutdown");
        }
        let frames = self.frame_id().await;
        info!(frames, "vehicle station stopped");
    }
}

fn read_sensors(
    sensors: &mut SensorSuite,
    position: Vec3,
) -> Result<(ImuReading, SonarReading), LinkError> {
    let imu = sensors.imu.read()?;
    let sonar = sensors.sonar.read(position, imu.quaternion)?;
    Ok((imu, sonar))
}

fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
