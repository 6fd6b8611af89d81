//! The radio field.
//!
//! Owns the registry of radios (identity, properties, location, mobility
//! progress), the spatial index over their locations, and the propagation
//! models. A transmission is turned into one delivery per radio whose
//! received power clears its sensitivity:
//!
//! ```text
//! power(dBm) = transmit - path_loss(src, dst) + fading
//! ```
//!
//! The field never talks to radios directly; deliveries and mobility moves
//! go out through a `FieldContext`, which the simulation turns into events.

pub mod mobility;

pub use mobility::{Mobility, MobilityState, MobilityStep};

use std::sync::Arc;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mac::MacFrame;
use crate::simulation::geometry::{Location, Rect};
use crate::simulation::signal_calculations::{Fading, PathLoss, dbm_to_mw};
use crate::simulation::time::SimTime;
use crate::simulation::types::{ConfigError, PROPAGATION_LIMIT_DEFAULT, RadioId, RadioInfo, RadioProperties};
use crate::spatial::{Spatial, SpatialConfig, SpatialError, TransmitVisitor};

const INITIAL_CAPACITY: usize = 10;

#[derive(Debug, Error, PartialEq)]
pub enum FieldError {
    #[error("{0} is not registered in the field")]
    UnknownRadio(RadioId),

    #[error("{0} is already registered in the field")]
    DuplicateRadio(RadioId),

    #[error(transparent)]
    Spatial(#[from] SpatialError),
}

/// Field parameters as they appear in scene files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    /// Meters.
    pub width: f64,
    pub height: f64,
    /// Treat the field as a torus.
    pub wrap: bool,
    pub spatial: SpatialConfig,
    pub path_loss: PathLoss,
    pub fading: Fading,
    pub mobility: Mobility,
    /// Spatial bins whose best-case signal falls below this (dBm) are skipped.
    pub propagation_limit_dbm: f64,
}

impl Default for FieldConfig {
    fn default() -> Self {
        FieldConfig {
            width: 1000.0,
            height: 1000.0,
            wrap: false,
            spatial: SpatialConfig::default(),
            path_loss: PathLoss::default(),
            fading: Fading::default(),
            mobility: Mobility::default(),
            propagation_limit_dbm: PROPAGATION_LIMIT_DEFAULT,
        }
    }
}

/// What the field may do to the rest of the simulation.
pub trait FieldContext {
    fn now(&self) -> SimTime;

    fn rng(&mut self) -> &mut dyn RngCore;

    /// Start a signal arriving at `dst` right away.
    fn deliver(&mut self, dst: RadioId, frame: Arc<MacFrame>, power_mw: f64, duration: SimTime);

    fn schedule_move(&mut self, delay: SimTime, id: RadioId, step: MobilityStep);
}

#[derive(Debug, Clone)]
pub struct RadioRecord {
    pub info: RadioInfo,
    pub location: Location,
    mobility: Option<MobilityState>,
}

#[derive(Debug, Clone)]
pub struct Field {
    radios: Vec<Option<RadioRecord>>,
    count: usize,
    spatial: Spatial,
    path_loss: PathLoss,
    fading: Fading,
    mobility: Mobility,
    limit: f64,
    /// Largest antenna gain ever registered, for sound pruning.
    max_gain: f64,
}

impl Field {
    pub fn new(config: &FieldConfig) -> Result<Self, ConfigError> {
        let bounds = Rect::sized(config.width, config.height);
        let spatial = Spatial::build(bounds, &config.spatial, config.wrap)?;
        config.mobility.validate(&bounds)?;
        if config.propagation_limit_dbm.is_nan() {
            return Err(ConfigError::Field("propagation limit must be a number".to_string()));
        }
        Ok(Field {
            radios: vec![None; INITIAL_CAPACITY],
            count: 0,
            spatial,
            path_loss: config.path_loss.clone(),
            fading: config.fading.clone(),
            mobility: config.mobility.clone(),
            limit: config.propagation_limit_dbm,
            max_gain: f64::NEG_INFINITY,
        })
    }

    pub fn bounds(&self) -> Rect {
        self.spatial.bounds()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn radio(&self, id: RadioId) -> Option<&RadioRecord> {
        self.radios.get(id.index()).and_then(Option::as_ref)
    }

    pub fn location(&self, id: RadioId) -> Option<Location> {
        self.radio(id).map(|r| r.location)
    }

    /// Register a radio at `location` and start its mobility.
    pub fn add_radio(&mut self, info: RadioInfo, location: Location, ctx: &mut dyn FieldContext) -> Result<(), FieldError> {
        let id = info.id;
        if self.radio(id).is_some() {
            return Err(FieldError::DuplicateRadio(id));
        }
        self.spatial.add(id, &location)?;
        log::info!("add radio {id} at {location}");
        while self.radios.len() <= id.index() {
            let grown = self.radios.len() * 2;
            self.radios.resize(grown, None);
        }
        self.max_gain = self.max_gain.max(info.properties.gain);
        let mobility = self.mobility.init();
        let moves = mobility.is_some();
        self.radios[id.index()] = Some(RadioRecord { info, location, mobility });
        self.count += 1;
        if moves {
            ctx.schedule_move(SimTime::ZERO, id, MobilityStep::To(location));
        }
        Ok(())
    }

    pub fn del_radio(&mut self, id: RadioId) -> Result<RadioRecord, FieldError> {
        let record = self
            .radios
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or(FieldError::UnknownRadio(id))?;
        self.spatial.remove(id)?;
        self.count -= 1;
        log::info!("delete radio {id}");
        Ok(record)
    }

    /// Place `id` at `location` and plan its next mobility move.
    pub fn move_radio(&mut self, id: RadioId, location: Location, ctx: &mut dyn FieldContext) -> Result<(), FieldError> {
        if self.radio(id).is_none() {
            return Err(FieldError::UnknownRadio(id));
        }
        self.spatial.move_to(id, &location)?;
        let bounds = self.spatial.bounds();
        let mobility = &self.mobility;
        let record = self
            .radios
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(FieldError::UnknownRadio(id))?;
        log::debug!("move radio {id} to {location}");
        record.location = location;
        if let Some(state) = record.mobility.as_mut() {
            if let Some((delay, step)) = mobility.next(&bounds, &location, state, ctx.rng()) {
                ctx.schedule_move(delay, id, step);
            }
        }
        Ok(())
    }

    /// Move `id` by `delta`. Rounding never pushes it past the field edges.
    pub fn move_radio_off(&mut self, id: RadioId, delta: Location, ctx: &mut dyn FieldContext) -> Result<(), FieldError> {
        let current = self.location(id).ok_or(FieldError::UnknownRadio(id))?;
        let b = self.bounds();
        let mut target = current + delta;
        target.x = target.x.clamp(b.min_x, b.max_x);
        target.y = target.y.clamp(b.min_y, b.max_y);
        self.move_radio(id, target, ctx)
    }

    pub fn apply_step(&mut self, id: RadioId, step: MobilityStep, ctx: &mut dyn FieldContext) -> Result<(), FieldError> {
        match step {
            MobilityStep::To(location) => self.move_radio(id, location, ctx),
            MobilityStep::By(delta) => self.move_radio_off(id, delta, ctx),
        }
    }

    /// Put `frame` on the air from `src`. Returns the number of radios it reached.
    pub fn transmit(&self, src: RadioId, frame: Arc<MacFrame>, duration: SimTime, ctx: &mut dyn FieldContext) -> Result<usize, FieldError> {
        let record = self.radio(src).ok_or(FieldError::UnknownRadio(src))?;
        let mut visitor = Propagation {
            radios: &self.radios,
            path_loss: &self.path_loss,
            fading: &self.fading,
            max_gain: self.max_gain,
            src,
            frame: &frame,
            duration,
            ctx,
            delivered: 0,
        };
        let visited = self.spatial.visit_transmit(&mut visitor, &record.info.properties, &record.location, self.limit);
        log::trace!("{src} transmission: {visited} candidates, {} receivers", visitor.delivered);
        Ok(visitor.delivered)
    }

    /// Deterministic received power (dBm) from `src` at `dst`, fading left out.
    pub fn compute_signal(&self, src: RadioId, dst: RadioId) -> Result<f64, FieldError> {
        let s = self.radio(src).ok_or(FieldError::UnknownRadio(src))?;
        let d = self.radio(dst).ok_or(FieldError::UnknownRadio(dst))?;
        let loss = self.path_loss.compute(&s.info.properties, &s.location, &d.info.properties, &d.location);
        Ok(s.info.properties.transmit - loss)
    }

    /// Radios per square meter.
    pub fn compute_density(&self) -> f64 {
        self.spatial.size() as f64 / self.spatial.area()
    }

    /// Mean number of radios each radio reaches above sensitivity
    /// (`sense`) or above the reception threshold.
    pub fn compute_avg_connectivity(&self, sense: bool, rng: &mut dyn RngCore) -> f64 {
        let mut ids = Vec::with_capacity(self.count);
        self.spatial.visit(&mut |id| ids.push(id));
        if ids.is_empty() {
            return 0.0;
        }
        let mut links = 0usize;
        for &id in &ids {
            let Some(record) = self.radio(id) else { continue };
            let mut visitor = Connectivity {
                radios: &self.radios,
                path_loss: &self.path_loss,
                fading: &self.fading,
                max_gain: self.max_gain,
                src: id,
                sense,
                rng: &mut *rng,
                links: 0,
            };
            self.spatial.visit_transmit(&mut visitor, &record.info.properties, &record.location, self.limit);
            links += visitor.links;
        }
        links as f64 / ids.len() as f64
    }
}

/// Best-case signal at `point`, used to prune spatial bins. Fading is left
/// out so this bounds the deterministic part of the link budget.
fn best_case(path_loss: &PathLoss, max_gain: f64, src: &RadioProperties, src_loc: &Location, point: &Location) -> f64 {
    src.transmit - path_loss.min_loss(src, src_loc, max_gain, point)
}

fn received_mw(path_loss: &PathLoss, fading: &Fading, src: &RadioProperties, src_loc: &Location, dst: &RadioRecord, rng: &mut dyn RngCore) -> f64 {
    let loss = path_loss.compute(src, src_loc, &dst.info.properties, &dst.location);
    dbm_to_mw(src.transmit - loss + fading.compute(rng))
}

struct Propagation<'a> {
    radios: &'a [Option<RadioRecord>],
    path_loss: &'a PathLoss,
    fading: &'a Fading,
    max_gain: f64,
    src: RadioId,
    frame: &'a Arc<MacFrame>,
    duration: SimTime,
    ctx: &'a mut dyn FieldContext,
    delivered: usize,
}

impl TransmitVisitor for Propagation<'_> {
    fn compute_signal(&self, src: &RadioProperties, src_loc: &Location, point: &Location) -> f64 {
        best_case(self.path_loss, self.max_gain, src, src_loc, point)
    }

    fn visit_transmit(&mut self, src: &RadioProperties, src_loc: &Location, dst: RadioId) {
        if dst == self.src {
            return;
        }
        let Some(Some(record)) = self.radios.get(dst.index()) else { return };
        let power_mw = received_mw(self.path_loss, self.fading, src, src_loc, record, self.ctx.rng());
        if power_mw < record.info.properties.sensitivity_mw {
            return;
        }
        self.ctx.deliver(dst, Arc::clone(self.frame), power_mw, self.duration);
        self.delivered += 1;
    }
}

struct Connectivity<'a> {
    radios: &'a [Option<RadioRecord>],
    path_loss: &'a PathLoss,
    fading: &'a Fading,
    max_gain: f64,
    src: RadioId,
    sense: bool,
    rng: &'a mut dyn RngCore,
    links: usize,
}

impl TransmitVisitor for Connectivity<'_> {
    fn compute_signal(&self, src: &RadioProperties, src_loc: &Location, point: &Location) -> f64 {
        best_case(self.path_loss, self.max_gain, src, src_loc, point)
    }

    fn visit_transmit(&mut self, src: &RadioProperties, src_loc: &Location, dst: RadioId) {
        if dst == self.src {
            return;
        }
        let Some(Some(record)) = self.radios.get(dst.index()) else { return };
        let power_mw = received_mw(self.path_loss, self.fading, src, src_loc, record, &mut *self.rng);
        let floor = if self.sense {
            record.info.properties.sensitivity_mw
        } else {
            record.info.properties.threshold_mw
        };
        if power_mw >= floor {
            self.links += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::MacAddress;
    use crate::net::Packet;
    use crate::simulation::types::RadioConfig;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::BTreeMap;

    struct Recorder {
        now: SimTime,
        rng: ChaCha8Rng,
        delivered: BTreeMap<RadioId, f64>,
        moves: Vec<(SimTime, RadioId, MobilityStep)>,
    }

    impl Recorder {
        fn new() -> Self {
            Recorder {
                now: SimTime::ZERO,
                rng: ChaCha8Rng::seed_from_u64(2),
                delivered: BTreeMap::new(),
                moves: Vec::new(),
            }
        }
    }

    impl FieldContext for Recorder {
        fn now(&self) -> SimTime {
            self.now
        }

        fn rng(&mut self) -> &mut dyn RngCore {
            &mut self.rng
        }

        fn deliver(&mut self, dst: RadioId, _frame: Arc<MacFrame>, power_mw: f64, _duration: SimTime) {
            self.delivered.insert(dst, power_mw);
        }

        fn schedule_move(&mut self, delay: SimTime, id: RadioId, step: MobilityStep) {
            self.moves.push((delay, id, step));
        }
    }

    fn frame() -> Arc<MacFrame> {
        Arc::new(MacFrame::Data {
            dst: MacAddress::ANY,
            src: MacAddress(0),
            duration: SimTime::ZERO,
            seq: None,
            retry: false,
            body: Packet::sized(64),
        })
    }

    fn info(id: u32) -> RadioInfo {
        RadioInfo::new(RadioId(id), Arc::new(RadioProperties::default()))
    }

    fn field(spatial: SpatialConfig) -> Field {
        Field::new(&FieldConfig {
            width: 5000.0,
            height: 5000.0,
            spatial,
            ..FieldConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn registry_grows_past_initial_capacity() {
        let mut f = field(SpatialConfig::Linear);
        let mut ctx = Recorder::new();
        f.add_radio(info(37), Location::new(1.0, 1.0), &mut ctx).unwrap();
        assert_eq!(f.len(), 1);
        assert_eq!(f.location(RadioId(37)), Some(Location::new(1.0, 1.0)));
        assert_eq!(f.add_radio(info(37), Location::new(2.0, 2.0), &mut ctx), Err(FieldError::DuplicateRadio(RadioId(37))));
        assert!(f.del_radio(RadioId(37)).is_ok());
        assert_eq!(f.del_radio(RadioId(37)).unwrap_err(), FieldError::UnknownRadio(RadioId(37)));
        assert!(f.is_empty());
        // static radios never schedule moves
        assert!(ctx.moves.is_empty());
    }

    #[test]
    fn out_of_bounds_radio_is_rejected() {
        let mut f = field(SpatialConfig::Linear);
        let mut ctx = Recorder::new();
        let err = f.add_radio(info(1), Location::new(6000.0, 1.0), &mut ctx).unwrap_err();
        assert!(matches!(err, FieldError::Spatial(SpatialError::OutOfBounds { .. })));
        assert!(f.radio(RadioId(1)).is_none());
    }

    #[test]
    fn transmission_reaches_radios_above_sensitivity() {
        let mut f = field(SpatialConfig::HierGrid { height: 4 });
        let mut ctx = Recorder::new();
        // free space, 15 dBm: sensitivity -91 dBm is crossed just under 2 km
        let spots = [(100.0, 100.0), (200.0, 100.0), (1500.0, 100.0), (4900.0, 4900.0)];
        for (k, (x, y)) in spots.iter().enumerate() {
            f.add_radio(info(k as u32), Location::new(*x, *y), &mut ctx).unwrap();
        }
        let n = f.transmit(RadioId(0), frame(), SimTime::from_micros(500), &mut ctx).unwrap();
        assert_eq!(n, 2);
        assert_eq!(ctx.delivered.keys().copied().collect::<Vec<_>>(), vec![RadioId(1), RadioId(2)]);
        let near = f.compute_signal(RadioId(0), RadioId(1)).unwrap();
        assert!((dbm_to_mw(near) - ctx.delivered[&RadioId(1)]).abs() < 1e-15);
        assert!(f.transmit(RadioId(9), frame(), SimTime::ZERO, &mut ctx).is_err());
    }

    #[test]
    fn receivers_do_not_depend_on_the_index() {
        let mut rng = ChaCha8Rng::seed_from_u64(77);
        let spots: Vec<Location> = (0..200)
            .map(|_| {
                use rand::Rng;
                Location::new(rng.gen_range(0.0..5000.0), rng.gen_range(0.0..5000.0))
            })
            .collect();
        let mut reference: Option<Vec<BTreeMap<RadioId, f64>>> = None;
        for config in [SpatialConfig::Linear, SpatialConfig::Grid { divisions: 10 }, SpatialConfig::HierGrid { height: 5 }] {
            let mut f = field(config);
            let mut ctx = Recorder::new();
            for (k, loc) in spots.iter().enumerate() {
                f.add_radio(info(k as u32), *loc, &mut ctx).unwrap();
            }
            let results: Vec<_> = [0u32, 50, 199]
                .iter()
                .map(|&src| {
                    ctx.delivered.clear();
                    f.transmit(RadioId(src), frame(), SimTime::from_micros(10), &mut ctx).unwrap();
                    ctx.delivered.clone()
                })
                .collect();
            match &reference {
                None => reference = Some(results),
                Some(expected) => assert_eq!(expected, &results),
            }
        }
    }

    #[test]
    fn mobile_radios_get_an_initial_move() {
        let mut f = Field::new(&FieldConfig {
            mobility: Mobility::Teleport { pause_secs: 1.0 },
            ..FieldConfig::default()
        })
        .unwrap();
        let mut ctx = Recorder::new();
        let loc = Location::new(10.0, 10.0);
        f.add_radio(info(0), loc, &mut ctx).unwrap();
        assert_eq!(ctx.moves, vec![(SimTime::ZERO, RadioId(0), MobilityStep::To(loc))]);
        f.apply_step(RadioId(0), MobilityStep::To(loc), &mut ctx).unwrap();
        let (delay, _, MobilityStep::To(next)) = ctx.moves[1] else { panic!("teleport moves absolutely") };
        assert_eq!(delay, SimTime::from_millis(1_000));
        f.apply_step(RadioId(0), MobilityStep::To(next), &mut ctx).unwrap();
        assert_eq!(f.location(RadioId(0)), Some(next));
        assert!(f.bounds().contains(&next));
    }

    #[test]
    fn relative_moves_stay_inside() {
        let mut f = field(SpatialConfig::Grid { divisions: 4 });
        let mut ctx = Recorder::new();
        f.add_radio(info(0), Location::new(4999.0, 10.0), &mut ctx).unwrap();
        f.move_radio_off(RadioId(0), Location::new(5.0, -20.0), &mut ctx).unwrap();
        assert_eq!(f.location(RadioId(0)), Some(Location::new(5000.0, 0.0)));
    }

    #[test]
    fn density_and_connectivity() {
        let mut f = field(SpatialConfig::Grid { divisions: 5 });
        let mut ctx = Recorder::new();
        for (k, x) in [100.0, 150.0, 4000.0].iter().enumerate() {
            f.add_radio(info(k as u32), Location::new(*x, 100.0), &mut ctx).unwrap();
        }
        assert!((f.compute_density() - 3.0 / 25e6).abs() < 1e-15);
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        // only the close pair links, in both directions
        assert!((f.compute_avg_connectivity(true, &mut rng) - 2.0 / 3.0).abs() < 1e-12);
        assert!((f.compute_avg_connectivity(false, &mut rng) - 2.0 / 3.0).abs() < 1e-12);
        let empty = field(SpatialConfig::Linear);
        assert_eq!(empty.compute_avg_connectivity(true, &mut rng), 0.0);
    }

    #[test]
    fn higher_gain_receivers_are_not_pruned() {
        let mut f = field(SpatialConfig::HierGrid { height: 5 });
        let mut ctx = Recorder::new();
        f.add_radio(info(0), Location::new(10.0, 10.0), &mut ctx).unwrap();
        let dish = RadioConfig {
            gain_db: 20.0,
            ..RadioConfig::default()
        }
        .build()
        .unwrap();
        f.add_radio(RadioInfo::new(RadioId(1), Arc::new(dish)), Location::new(4000.0, 4000.0), &mut ctx).unwrap();
        assert_eq!(f.transmit(RadioId(0), frame(), SimTime::from_micros(10), &mut ctx).unwrap(), 1);
    }
}
