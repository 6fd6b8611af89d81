//! Scene loading, parsing, and validation logic.
//!
//! A scene describes one complete run: the field and its propagation
//! models, the radio hardware, the reception model, the MAC parameters,
//! the stations and the traffic they generate. Scenes are JSON or TOML,
//! chosen by file extension.

use anyhow::Context;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::field::FieldConfig;
use crate::mac::{MacAddress, MacConfig};
use crate::net::{Packet, QueuedNet};
use crate::radio::{BerTableError, ReceptionConfig, ReceptionModel};
use crate::simulation::geometry::{Location, Rect};
use crate::simulation::time::SimTime;
use crate::simulation::types::{ANTENNA_HEIGHT_DEFAULT, ConfigError, RadioConfig, RadioId};
use crate::simulation::{SimError, Simulation};

const MAX_NODES: usize = 100_000;
const QUEUE_CAPACITY_DEFAULT: usize = 50;
/// Placement draws come from this stream of the scene seed, leaving the
/// simulation's own stream untouched.
const PLACEMENT_STREAM: u64 = 1;

/// Error type for scene loading failures.
#[derive(Debug, Error)]
pub enum SceneLoadError {
    #[error("Failed to read file: {0}")]
    FileReadError(String),

    #[error("Failed to parse scene: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    BerTable(#[from] BerTableError),

    #[error(transparent)]
    Simulation(#[from] SimError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneFormat {
    Json,
    Toml,
}

impl SceneFormat {
    /// `.toml` files are TOML, everything else JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => SceneFormat::Toml,
            _ => SceneFormat::Json,
        }
    }
}

/// Simple 2D point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// A station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub node_id: u32,
    /// Chosen by the scene placement when absent.
    #[serde(default)]
    pub position: Option<Point>,
    /// Antenna height in meters.
    #[serde(default)]
    pub height: Option<f64>,
    /// Hardware differing from the scene-wide radio.
    #[serde(default)]
    pub radio: Option<RadioConfig>,
}

/// Initial positions for nodes listed without one, handed out in node order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Placement {
    /// Uniform over the field.
    Random,
    /// Row-major grid points, `cols` across and `rows` down, starting at the origin.
    Grid { cols: u32, rows: u32 },
}

impl Placement {
    fn validate(&self, unplaced: usize, field: &FieldConfig) -> Result<(), String> {
        if unplaced > 0 && !(field.width > 0.0 && field.height > 0.0) {
            return Err(format!("Cannot place nodes on a {}x{} field", field.width, field.height));
        }
        if let Placement::Grid { cols, rows } = *self {
            if cols == 0 || rows == 0 {
                return Err(format!("Grid placement {cols}x{rows} must have at least one point"));
            }
            if unplaced as u64 > u64::from(cols) * u64::from(rows) {
                return Err(format!("Grid placement {cols}x{rows} has no room for {unplaced} nodes"));
            }
        }
        Ok(())
    }

    /// Position of the `k`th node placed.
    fn locate<R: Rng + ?Sized>(&self, k: usize, field: &FieldConfig, rng: &mut R) -> Point {
        match *self {
            Placement::Random => Point {
                x: rng.gen_range(0.0..field.width),
                y: rng.gen_range(0.0..field.height),
            },
            Placement::Grid { cols, rows } => {
                let (cols, rows) = (cols as usize, rows as usize);
                Point {
                    x: (k % cols) as f64 * field.width / cols as f64,
                    y: (k / cols) as f64 * field.height / rows as f64,
                }
            }
        }
    }
}

/// Packets of `size` bytes sent `count` times, `interval_secs` apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub from: u32,
    /// Destination node; broadcast when absent.
    #[serde(default)]
    pub to: Option<u32>,
    pub size: usize,
    #[serde(default)]
    pub start_secs: f64,
    #[serde(default)]
    pub interval_secs: f64,
    #[serde(default = "one")]
    pub count: u32,
}

fn one() -> u32 {
    1
}

fn default_queue_capacity() -> usize {
    QUEUE_CAPACITY_DEFAULT
}

/// Root structure representing the entire scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub field: FieldConfig,
    /// Radio hardware shared by every node without its own.
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub reception: ReceptionConfig,
    #[serde(default)]
    pub mac: MacConfig,
    /// Per-node network queue length.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Places nodes without an explicit position.
    #[serde(default)]
    pub placement: Option<Placement>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub traffic: Vec<Flow>,
    pub duration_secs: f64,
    #[serde(default)]
    pub seed: u64,
}

impl Scene {
    pub fn duration(&self) -> SimTime {
        SimTime::from_secs_f64(self.duration_secs)
    }
}

/// Load and parse a scene from a file.
///
/// # Parameters
///
/// * `path` - Path to the scene file; `.toml` selects TOML, anything else JSON
///
/// # Returns
///
/// Parsed and validated Scene or an error.
pub fn load_scene(path: &Path) -> Result<Scene, SceneLoadError> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))
        .map_err(|e| SceneLoadError::FileReadError(format!("{e:#}")))?;
    let mut scene = parse_scene(&data, SceneFormat::from_path(path))?;

    // BER tables are resolved relative to the scene file
    if let ReceptionConfig::Additive {
        ber_table: Some(table), ..
    } = &mut scene.reception
    {
        if table.is_relative() {
            if let Some(dir) = path.parent() {
                *table = dir.join(&*table);
            }
        }
    }
    log::info!("Loaded scene {} with {} nodes", path.display(), scene.nodes.len());
    Ok(scene)
}

/// Parse and validate scene text.
pub fn parse_scene(data: &str, format: SceneFormat) -> Result<Scene, SceneLoadError> {
    let scene: Scene = match format {
        SceneFormat::Json => serde_json::from_str(data)
            .context("Invalid JSON format")
            .map_err(|e| SceneLoadError::ParseError(format!("{e:#}")))?,
        SceneFormat::Toml => toml::from_str(data)
            .context("Invalid TOML format")
            .map_err(|e| SceneLoadError::ParseError(format!("{e:#}")))?,
    };
    validate_scene(&scene).map_err(SceneLoadError::ValidationError)?;
    Ok(scene)
}

/// Validate scene configuration to reject malformed inputs before anything
/// is built.
///
/// # Returns
///
/// `Ok(())` if validation passes, `Err(String)` with error description otherwise.
pub fn validate_scene(scene: &Scene) -> Result<(), String> {
    let field = &scene.field;
    if !(field.width > 0.0 && field.height > 0.0) {
        return Err(format!("Field {}x{} must have a positive size", field.width, field.height));
    }
    let bounds = Rect::sized(field.width, field.height);
    field.mobility.validate(&bounds).map_err(|e| e.to_string())?;

    if !(scene.duration_secs > 0.0 && scene.duration_secs.is_finite()) {
        return Err(format!("Invalid duration_secs {}, must be positive", scene.duration_secs));
    }
    if scene.queue_capacity == 0 {
        return Err("queue_capacity must be positive".to_string());
    }
    scene.radio.build().map_err(|e| e.to_string())?;
    scene.mac.timing().map_err(|e| e.to_string())?;

    // Check node count
    if scene.nodes.is_empty() {
        return Err("Scene must contain at least one node".to_string());
    }
    if scene.nodes.len() > MAX_NODES {
        return Err(format!("Node count {} exceeds maximum of {}", scene.nodes.len(), MAX_NODES));
    }

    // Check for duplicate node IDs
    let mut node_ids = HashSet::new();
    for node in &scene.nodes {
        if !node_ids.insert(node.node_id) {
            return Err(format!("Duplicate node_id found: {}", node.node_id));
        }
    }

    let positions = node_positions(scene)?;
    for (node, p) in scene.nodes.iter().zip(&positions) {
        if node.node_id >= MacAddress::NULL.0 {
            return Err(format!("Node id {} collides with a reserved MAC address", node.node_id));
        }
        if !bounds.contains(&Location::new(p.x, p.y)) {
            return Err(format!("Node {} position ({}, {}) lies outside the field {}", node.node_id, p.x, p.y, bounds));
        }
        if let Some(h) = node.height {
            if !(h >= 0.0) {
                return Err(format!("Node {} antenna height {} must be non-negative", node.node_id, h));
            }
        }
        if let Some(radio) = &node.radio {
            radio.build().map_err(|e| format!("Node {}: {e}", node.node_id))?;
        }
    }

    for (idx, flow) in scene.traffic.iter().enumerate() {
        if !node_ids.contains(&flow.from) {
            return Err(format!("Flow {idx} starts at unknown node {}", flow.from));
        }
        if let Some(to) = flow.to {
            if !node_ids.contains(&to) {
                return Err(format!("Flow {idx} targets unknown node {to}"));
            }
            if to == flow.from {
                return Err(format!("Flow {idx} sends from node {to} to itself"));
            }
        }
        if flow.size == 0 {
            return Err(format!("Flow {idx} has zero packet size"));
        }
        if flow.count == 0 {
            return Err(format!("Flow {idx} sends no packets"));
        }
        if !(flow.start_secs >= 0.0) || !(flow.interval_secs >= 0.0) {
            return Err(format!("Flow {idx} timing must be non-negative"));
        }
    }

    Ok(())
}

/// Positions of all nodes in scene order, with unpositioned nodes filled
/// in by the scene placement.
pub fn node_positions(scene: &Scene) -> Result<Vec<Point>, String> {
    let unplaced = scene.nodes.iter().filter(|n| n.position.is_none()).count();
    if let Some(placement) = &scene.placement {
        placement.validate(unplaced, &scene.field)?;
    }
    let mut rng = ChaCha8Rng::seed_from_u64(scene.seed);
    rng.set_stream(PLACEMENT_STREAM);
    let mut placed = 0;
    scene
        .nodes
        .iter()
        .map(|node| match (node.position, scene.placement) {
            (Some(p), _) => Ok(p),
            (None, Some(placement)) => {
                let p = placement.locate(placed, &scene.field, &mut rng);
                placed += 1;
                Ok(p)
            }
            (None, None) => Err(format!("Node {} has no position and the scene sets no placement", node.node_id)),
        })
        .collect()
}

/// Assemble the simulation a scene describes and queue its traffic.
pub fn build_simulation(scene: &Scene) -> Result<Simulation, SceneLoadError> {
    let mut sim = Simulation::new(&scene.field, scene.seed)?;
    let shared = Arc::new(scene.radio.build()?);
    let reception = ReceptionModel::from_config(&scene.reception)?;
    let positions = node_positions(scene).map_err(SceneLoadError::ValidationError)?;

    for (node, position) in scene.nodes.iter().zip(positions) {
        let properties = match &node.radio {
            Some(radio) => Arc::new(radio.build()?),
            None => Arc::clone(&shared),
        };
        let location = Location::new(position.x, position.y).with_height(node.height.unwrap_or(ANTENNA_HEIGHT_DEFAULT));
        sim.add_node(
            RadioId(node.node_id),
            location,
            properties,
            reception.clone(),
            &scene.mac,
            QueuedNet::new(scene.queue_capacity)?,
        )?;
    }

    for (idx, flow) in scene.traffic.iter().enumerate() {
        let next_hop = flow.to.map_or(MacAddress::ANY, MacAddress);
        for n in 0..flow.count {
            let at = SimTime::from_secs_f64(flow.start_secs + flow.interval_secs * f64::from(n));
            sim.send(at, RadioId(flow.from), Packet::padded(flow_payload(idx, n), flow.size), next_hop)?;
        }
    }
    log::info!("Built simulation: {} nodes, {} flows", scene.nodes.len(), scene.traffic.len());
    Ok(sim)
}

/// Packet content identifying the flow and packet number.
pub fn flow_payload(flow: usize, n: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8);
    payload.extend_from_slice(&(flow as u32).to_be_bytes());
    payload.extend_from_slice(&n.to_be_bytes());
    payload
}
