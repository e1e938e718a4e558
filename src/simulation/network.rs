//! Scenario runner: a whole networked control system on one frequency band.
//!
//! A [`Scenario`] turns a [`Scene`] into devices, PHYs and MACs and wires them:
//!
//! - every device gets a `SimplePhy` on the shared band and the MAC for its kind;
//! - the gateway knows the address of every sensor and actuator;
//! - sensors get a feeder process, the gateway a controller process;
//! - the application gates of the gateway and the actuators are recorded.
//!
//! [`Scenario::run`] advances virtual time through all rounds and returns the
//! [`NetworkStats`] of the run.

use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;
use std::rc::Rc;

use super::node_task::{SharedTally, gateway_controller, record_actuator, record_gateway, sensor_feeder};
use super::runtime::{DEFAULT_SEED, Simulation};
use super::types::{DeviceKind, DeviceSpec, Scene};
use crate::construction::Gate;
use crate::devices::Device;
use crate::error::{SimError, SimResult};
use crate::mac::{ActuatorMac, AddressAllocator, FrameKind, GatewayMac, MacAddress, MacLayer, MacProtocol, SensorMac};
use crate::messages::StackMessage;
use crate::physical::{BpskMcs, FrequencyBand, Mcs, PhyStats, SimplePhy};
use crate::schedule::{FixedCsmaScheduler, Role, RoundRobinTdmaScheduler, Scheduler};

/// One device with its stack.
struct Node<M> {
    device: Device,
    phy: SimplePhy,
    mac: M,
    app: Gate<StackMessage>,
}

/// Counters of one scenario run. Maps are keyed by device name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkStats {
    pub protocol: MacProtocol,
    pub rounds: u32,
    pub simulated_secs: f64,
    /// Frames every device handed to its PHY.
    pub sent: BTreeMap<String, usize>,
    /// Sensor data the gateway passed up, per sensor.
    pub received: BTreeMap<String, usize>,
    /// Acknowledgments the gateway passed up, per actuator.
    pub acks_received: BTreeMap<String, usize>,
    /// Control values that reached the actuator applications.
    pub controls_delivered: BTreeMap<String, usize>,
    pub out_of_slot: usize,
    pub late_rounds: usize,
    pub phy: BTreeMap<String, PhyStats>,
}

impl NetworkStats {
    pub fn total_received(&self) -> usize {
        self.received.values().sum()
    }
}

/// A scene wired up and ready to run.
pub struct Scenario {
    scene: Scene,
    sim: Simulation,
    band: FrequencyBand,
    gateway: Node<GatewayMac>,
    sensors: Vec<Node<SensorMac>>,
    actuators: Vec<Node<ActuatorMac>>,
    names: BTreeMap<MacAddress, String>,
    tally: SharedTally,
}

impl Scenario {
    /// Build every device of `scene` and spawn the application processes.
    pub fn new(scene: Scene) -> SimResult<Self> {
        let seed = scene.seed.unwrap_or(DEFAULT_SEED);
        let sim = Simulation::with_seed(seed);
        let ctx = sim.context();
        let band = FrequencyBand::with_attenuation(&ctx, scene.band, scene.attenuation.clone());
        let mcs: Rc<dyn Mcs> = Rc::new(BpskMcs::new(scene.band));
        let mut allocator = AddressAllocator::new();
        let mut names = BTreeMap::new();

        let gateway_spec = scene
            .devices
            .iter()
            .find(|d| d.kind == DeviceKind::Gateway)
            .ok_or_else(|| SimError::InvalidScene("no gateway".to_string()))?;
        let gateway = build_node(&sim, &scene, gateway_spec, &band, &mut allocator, &mut names, |ctx, device, address, config| {
            GatewayMac::new(ctx, device, address, config, mcs.clone())
        })?;

        let mut sensors = Vec::new();
        let mut actuators = Vec::new();
        for spec in &scene.devices {
            match spec.kind {
                DeviceKind::Gateway => {}
                DeviceKind::Sensor => sensors.push(build_node(&sim, &scene, spec, &band, &mut allocator, &mut names, |ctx, device, address, config| {
                    SensorMac::new(ctx, device, address, config, mcs.clone())
                })?),
                DeviceKind::Actuator => actuators.push(build_node(&sim, &scene, spec, &band, &mut allocator, &mut names, |ctx, device, address, config| {
                    ActuatorMac::new(ctx, device, address, config, mcs.clone())
                })?),
            }
        }

        let scheduler = match scene.mac.protocol {
            MacProtocol::Tdma => {
                // Scene order decides the rotation.
                let devices = scene
                    .devices
                    .iter()
                    .filter_map(|spec| {
                        let role = match spec.kind {
                            DeviceKind::Sensor => Role::Sensor,
                            DeviceKind::Actuator => Role::Actuator,
                            DeviceKind::Gateway => return None,
                        };
                        let address = names.iter().find(|(_, name)| **name == spec.name).map(|(a, _)| *a)?;
                        Some((address, role))
                    })
                    .collect();
                Scheduler::Tdma(RoundRobinTdmaScheduler::new(devices, scene.slots_per_frame()))
            }
            MacProtocol::Csma => Scheduler::Csma(FixedCsmaScheduler::new(
                sensors.iter().map(|n| n.mac.address()).collect(),
                scene.csma_probability,
                scene.slots_per_frame(),
            )),
        };

        let tally = SharedTally::default();
        let round_length = scene.round_length();
        for sensor in &sensors {
            gateway.mac.register_device(sensor.mac.address());
            ctx.spawn(sensor_feeder(ctx.clone(), sensor.app.clone(), scene.rounds, round_length));
        }
        for actuator in &actuators {
            gateway.mac.register_device(actuator.mac.address());
            record_actuator(&actuator.app, actuator.mac.address(), tally.clone());
        }
        record_gateway(&ctx, &gateway.app, scene.mac.slot_length(), tally.clone());
        ctx.spawn(gateway_controller(
            ctx.clone(),
            gateway.app.clone(),
            scheduler,
            actuators.iter().map(|n| n.mac.address()).collect(),
            scene.rounds,
            round_length,
            tally.clone(),
        ));

        info!(
            "Scenario ready: {} sensors, {} actuators, {:?}, {} rounds of {:?}, seed {}",
            sensors.len(),
            actuators.len(),
            scene.mac.protocol,
            scene.rounds,
            round_length,
            seed
        );
        Ok(Self { scene, sim, band, gateway, sensors, actuators, names, tally })
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn band(&self) -> &FrequencyBand {
        &self.band
    }

    pub fn gateway(&self) -> &GatewayMac {
        &self.gateway.mac
    }

    pub fn sensors(&self) -> impl Iterator<Item = &SensorMac> {
        self.sensors.iter().map(|n| &n.mac)
    }

    pub fn actuators(&self) -> impl Iterator<Item = &ActuatorMac> {
        self.actuators.iter().map(|n| &n.mac)
    }

    /// Name of the device that owns `address`.
    pub fn device_name(&self, address: MacAddress) -> Option<&str> {
        self.names.get(&address).map(String::as_str)
    }

    /// Run every round of the scene. Meant to be called once.
    pub fn run(&mut self) -> SimResult<NetworkStats> {
        let end = self.scene.round_length() * self.scene.rounds;
        self.sim.run_until(end)?;
        let stats = self.stats();
        info!(
            "Scenario finished at {:?}: {} frames received, {} out of slot",
            self.sim.now(),
            stats.total_received(),
            stats.out_of_slot
        );
        Ok(stats)
    }

    /// Counters collected so far.
    pub fn stats(&self) -> NetworkStats {
        let tally = self.tally.borrow();
        let by_name = |counts: &BTreeMap<MacAddress, usize>| -> BTreeMap<String, usize> {
            counts
                .iter()
                .map(|(address, count)| (self.device_name(*address).unwrap_or("unknown").to_string(), *count))
                .collect()
        };

        let mut sent = BTreeMap::new();
        let mut phy = BTreeMap::new();
        let mut record = |device: &Device, frames: usize, stats: PhyStats| {
            sent.insert(device.name().to_string(), frames);
            phy.insert(device.name().to_string(), stats);
        };
        record(&self.gateway.device, self.gateway.mac.sent_frames().len(), self.gateway.phy.stats());
        for node in &self.sensors {
            let frames = node.mac.sent_frames().iter().filter(|f| f.kind == FrameKind::SensorData).count();
            record(&node.device, frames, node.phy.stats());
        }
        for node in &self.actuators {
            record(&node.device, node.mac.sent_frames().len(), node.phy.stats());
        }

        NetworkStats {
            protocol: self.scene.mac.protocol,
            rounds: self.scene.rounds,
            simulated_secs: self.sim.now().as_secs_f64(),
            sent,
            received: by_name(&tally.received),
            acks_received: by_name(&tally.acks),
            controls_delivered: by_name(&tally.controls_delivered),
            out_of_slot: tally.out_of_slot,
            late_rounds: tally.late_rounds,
            phy,
        }
    }
}

/// Device, MAC, PHY and application gate for one entry of the scene.
fn build_node<M: MacLayer>(
    sim: &Simulation,
    scene: &Scene,
    spec: &DeviceSpec,
    band: &FrequencyBand,
    allocator: &mut AddressAllocator,
    names: &mut BTreeMap<MacAddress, String>,
    make_mac: impl FnOnce(&crate::simulation::SimContext, &Device, MacAddress, crate::mac::MacConfig) -> SimResult<M>,
) -> SimResult<Node<M>> {
    let ctx = sim.context();
    let device = Device::new(&ctx, spec.name.clone(), spec.x, spec.y);
    let address = allocator.allocate();
    let mac = make_mac(&ctx, &device, address, scene.mac_config_for(spec))?;
    let phy = SimplePhy::new(&ctx, &device, band)?;
    phy.gate().bi_connect_with(mac.phy_gate());
    let app = Gate::new(&ctx, spec.name.clone(), "app");
    app.bi_connect_with(mac.network_gate());
    debug!("{} {:?} at ({}, {}) has address {}", spec.name, spec.kind, spec.x, spec.y, address);
    names.insert(address, spec.name.clone());
    Ok(Node { device, phy, mac, app })
}
