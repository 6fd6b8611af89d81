//! Mobility models.
//!
//! A model is consulted every time a radio lands somewhere: it returns the
//! delay until the next move and where that move goes. Per-radio progress
//! (random waypoint legs) lives in `MobilityState`, held by the field.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::simulation::geometry::{Location, Rect};
use crate::simulation::time::SimTime;
use crate::simulation::types::ConfigError;

/// Waypoints are drawn this far inside the field edges.
pub const WAYPOINT_BORDER: f64 = 0.0005;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mobility {
    #[default]
    Static,
    /// Jump to a uniformly random spot after every pause. A zero pause means no movement.
    Teleport { pause_secs: f64 },
    /// Move `fixed_radius + U·random_radius` meters in a random direction
    /// after every pause, reflecting off the field edges.
    RandomWalk {
        fixed_radius: f64,
        random_radius: f64,
        pause_secs: f64,
    },
    /// Walk in straight legs towards random waypoints at a random speed,
    /// in steps of about `precision` meters, pausing at each waypoint.
    RandomWaypoint {
        pause_secs: f64,
        precision: f64,
        min_speed: f64,
        max_speed: f64,
    },
}

/// Per-radio mobility progress.
#[derive(Debug, Clone, PartialEq)]
pub enum MobilityState {
    Moving,
    Waypoint { waypoint: Location, steps: u32, step_time: SimTime },
}

/// Where the next move goes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MobilityStep {
    To(Location),
    /// Offset from the current location.
    By(Location),
}

impl Mobility {
    pub fn validate(&self, bounds: &Rect) -> Result<(), ConfigError> {
        let bad = |msg: String| Err(ConfigError::Field(msg));
        match *self {
            Mobility::Static => Ok(()),
            Mobility::Teleport { pause_secs } => {
                if !(pause_secs >= 0.0) {
                    return bad(format!("teleport pause {pause_secs}s must be non-negative"));
                }
                Ok(())
            }
            Mobility::RandomWalk {
                fixed_radius,
                random_radius,
                pause_secs,
            } => {
                if !(pause_secs >= 0.0) || fixed_radius < 0.0 || random_radius < 0.0 {
                    return bad("random walk parameters must be non-negative".to_string());
                }
                let reach = fixed_radius + random_radius;
                if reach > bounds.width() || reach > bounds.height() {
                    return bad(format!("random walk step {reach} m exceeds field {bounds}"));
                }
                Ok(())
            }
            Mobility::RandomWaypoint {
                pause_secs,
                precision,
                min_speed,
                max_speed,
            } => {
                if !(pause_secs >= 0.0) {
                    return bad(format!("waypoint pause {pause_secs}s must be non-negative"));
                }
                if !(precision > 0.0) {
                    return bad(format!("waypoint precision {precision} must be positive"));
                }
                if !(min_speed > 0.0) || max_speed < min_speed {
                    return bad(format!("waypoint speeds {min_speed}..{max_speed} must be positive and ordered"));
                }
                if bounds.width() <= 2.0 * WAYPOINT_BORDER || bounds.height() <= 2.0 * WAYPOINT_BORDER {
                    return bad(format!("field {bounds} too small for waypoints"));
                }
                Ok(())
            }
        }
    }

    /// State for a newly placed radio; `None` means it never moves.
    pub fn init(&self) -> Option<MobilityState> {
        match *self {
            Mobility::Static => None,
            Mobility::Teleport { pause_secs } | Mobility::RandomWalk { pause_secs, .. } => (pause_secs > 0.0).then_some(MobilityState::Moving),
            Mobility::RandomWaypoint { .. } => Some(MobilityState::Waypoint {
                waypoint: Location::new(0.0, 0.0),
                steps: 0,
                step_time: SimTime::ZERO,
            }),
        }
    }

    /// Plan the move that follows arriving at `loc`.
    pub fn next(&self, bounds: &Rect, loc: &Location, state: &mut MobilityState, rng: &mut dyn RngCore) -> Option<(SimTime, MobilityStep)> {
        match (self, state) {
            (Mobility::Teleport { pause_secs }, MobilityState::Moving) => {
                let to = Location::new(
                    bounds.min_x + bounds.width() * unit(rng),
                    bounds.min_y + bounds.height() * unit(rng),
                )
                .with_height(loc.height);
                Some((SimTime::from_secs_f64(*pause_secs), MobilityStep::To(to)))
            }
            (
                Mobility::RandomWalk {
                    fixed_radius,
                    random_radius,
                    pause_secs,
                },
                MobilityState::Moving,
            ) => {
                let angle = 2.0 * PI * unit(rng);
                let r = fixed_radius + unit(rng) * random_radius;
                let x = reflect(loc.x + r * angle.cos(), bounds.min_x, bounds.max_x);
                let y = reflect(loc.y + r * angle.sin(), bounds.min_y, bounds.max_y);
                let to = Location::new(x, y).with_height(loc.height);
                Some((SimTime::from_secs_f64(*pause_secs), MobilityStep::To(to)))
            }
            (
                Mobility::RandomWaypoint {
                    pause_secs,
                    precision,
                    min_speed,
                    max_speed,
                },
                MobilityState::Waypoint {
                    waypoint,
                    steps,
                    step_time,
                },
            ) => {
                let mut delay = SimTime::ZERO;
                if *steps == 0 {
                    delay = SimTime::from_secs_f64(*pause_secs);
                    *waypoint = Location::new(
                        bounds.min_x + WAYPOINT_BORDER + (bounds.width() - 2.0 * WAYPOINT_BORDER) * unit(rng),
                        bounds.min_y + WAYPOINT_BORDER + (bounds.height() - 2.0 * WAYPOINT_BORDER) * unit(rng),
                    )
                    .with_height(loc.height);
                    let speed = min_speed + (max_speed - min_speed) * unit(rng);
                    let dist = loc.distance(waypoint);
                    *steps = ((dist / precision).floor() as u32).max(1);
                    *step_time = SimTime::from_secs_f64(dist / speed / f64::from(*steps));
                }
                delay += *step_time;
                let step = loc.step_towards(waypoint, *steps);
                *steps -= 1;
                Some((delay, MobilityStep::By(step)))
            }
            _ => None,
        }
    }
}

/// Uniform draw from [0, 1).
fn unit(rng: &mut dyn RngCore) -> f64 {
    rng.gen_range(0.0..1.0)
}

/// Fold a coordinate that left `[min, max]` back inside, mirror-like.
fn reflect(v: f64, min: f64, max: f64) -> f64 {
    if v < min {
        2.0 * min - v
    } else if v > max {
        2.0 * max - v
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn zero_pause_means_no_movement() {
        assert_eq!(Mobility::Teleport { pause_secs: 0.0 }.init(), None);
        assert_eq!(Mobility::Static.init(), None);
        assert_eq!(Mobility::Teleport { pause_secs: 1.0 }.init(), Some(MobilityState::Moving));
    }

    #[test]
    fn teleport_lands_inside_after_the_pause() {
        let bounds = Rect::new(100.0, 100.0, 200.0, 150.0);
        let m = Mobility::Teleport { pause_secs: 2.5 };
        let mut state = m.init().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..100 {
            let (delay, step) = m.next(&bounds, &Location::new(150.0, 120.0), &mut state, &mut rng).unwrap();
            assert_eq!(delay, SimTime::from_millis(2_500));
            match step {
                MobilityStep::To(loc) => assert!(bounds.contains(&loc)),
                MobilityStep::By(_) => panic!("teleport moves absolutely"),
            }
        }
    }

    #[test]
    fn random_walk_reflects_off_edges() {
        assert_eq!(reflect(-3.0, 0.0, 10.0), 3.0);
        assert_eq!(reflect(12.0, 0.0, 10.0), 8.0);
        assert_eq!(reflect(4.0, 0.0, 10.0), 4.0);

        let bounds = Rect::sized(50.0, 50.0);
        let m = Mobility::RandomWalk {
            fixed_radius: 10.0,
            random_radius: 20.0,
            pause_secs: 1.0,
        };
        m.validate(&bounds).unwrap();
        let mut state = m.init().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let mut loc = Location::new(1.0, 49.0);
        for _ in 0..500 {
            match m.next(&bounds, &loc, &mut state, &mut rng) {
                Some((_, MobilityStep::To(to))) => {
                    assert!(bounds.contains(&to), "{to}");
                    loc = to;
                }
                other => panic!("unexpected step {other:?}"),
            }
        }
    }

    #[test]
    fn random_walk_step_must_fit_the_field() {
        let m = Mobility::RandomWalk {
            fixed_radius: 40.0,
            random_radius: 20.0,
            pause_secs: 1.0,
        };
        assert!(m.validate(&Rect::sized(100.0, 50.0)).is_err());
    }

    #[test]
    fn waypoint_legs_reach_the_waypoint() {
        let bounds = Rect::sized(1000.0, 1000.0);
        let m = Mobility::RandomWaypoint {
            pause_secs: 3.0,
            precision: 10.0,
            min_speed: 5.0,
            max_speed: 5.0,
        };
        m.validate(&bounds).unwrap();
        let mut state = m.init().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let mut loc = Location::new(500.0, 500.0);

        let (first_delay, step) = m.next(&bounds, &loc, &mut state, &mut rng).unwrap();
        let (waypoint, steps, step_time) = match &state {
            MobilityState::Waypoint { waypoint, steps, step_time } => (*waypoint, *steps, *step_time),
            MobilityState::Moving => unreachable!(),
        };
        assert_eq!(first_delay, SimTime::from_millis(3_000) + step_time);
        let MobilityStep::By(delta) = step else { panic!("waypoint moves relatively") };
        loc = loc + delta;

        let mut remaining = steps;
        while remaining > 0 {
            let (delay, step) = m.next(&bounds, &loc, &mut state, &mut rng).unwrap();
            assert_eq!(delay, step_time);
            let MobilityStep::By(delta) = step else { panic!() };
            loc = loc + delta;
            remaining -= 1;
        }
        assert!(loc.distance(&waypoint) < 1e-6);
        // next call starts a new leg after another pause
        let (delay, _) = m.next(&bounds, &loc, &mut state, &mut rng).unwrap();
        assert!(delay >= SimTime::from_millis(3_000));
    }

    #[test]
    fn waypoint_speeds_are_validated() {
        let bounds = Rect::sized(10.0, 10.0);
        let bad = Mobility::RandomWaypoint {
            pause_secs: 0.0,
            precision: 1.0,
            min_speed: 2.0,
            max_speed: 1.0,
        };
        assert!(bad.validate(&bounds).is_err());
    }

    #[test]
    fn scene_syntax() {
        let m: Mobility = serde_json::from_str(r#"{"type":"random_walk","fixed_radius":1.0,"random_radius":2.0,"pause_secs":5.0}"#).unwrap();
        assert!(matches!(m, Mobility::RandomWalk { .. }));
    }
}
