//! World and space objects
//!
//! The world is a single toroidal rectangle populated by player ships and
//! collectibles. Edges wrap, so every coordinate is normalized into
//! `[0, extent)` and distances are taken over the shortest wrapped offset.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Displacement below which a physics step is not considered movement.
pub const POSITION_EPSILON: f64 = 1e-6;

/// Rectangular extent of the toroidal world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldSize {
    pub width: f64,
    pub height: f64,
}

impl WorldSize {
    /// Construct a size; dimensions must be positive.
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Normalize a coordinate into `[0, extent)`.
pub fn wrap(value: f64, extent: f64) -> f64 {
    let wrapped = value % extent;
    let wrapped = if wrapped < 0.0 { wrapped + extent } else { wrapped };
    // A tiny negative remainder can round up to exactly `extent`.
    if wrapped >= extent {
        0.0
    } else {
        wrapped
    }
}

/// Shortest distance between two points on the torus.
pub fn toroidal_distance(a: (f64, f64), b: (f64, f64), size: WorldSize) -> f64 {
    let dx = (a.0 - b.0).abs();
    let dx = dx.min(size.width - dx);
    let dy = (a.1 - b.1).abs();
    let dy = dy.min(size.height - dy);
    (dx * dx + dy * dy).sqrt()
}

/// The point toroidally opposite to `p`: maximal distance on both axes.
pub fn opposite_point(p: (f64, f64), size: WorldSize) -> (f64, f64) {
    (
        wrap(p.0 + size.width / 2.0, size.width),
        wrap(p.1 + size.height / 2.0, size.height),
    )
}

/// Kind of object occupying the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceObjectKind {
    PlayerShip,
    Asteroid,
    Shipwreck,
    EscapePod,
}

impl SpaceObjectKind {
    /// Stable string form used in the space_objects.type column.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PlayerShip => "player_ship",
            Self::Asteroid => "asteroid",
            Self::Shipwreck => "shipwreck",
            Self::EscapePod => "escape_pod",
        }
    }

    /// Parse the column form back into a kind.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "player_ship" => Some(Self::PlayerShip),
            "asteroid" => Some(Self::Asteroid),
            "shipwreck" => Some(Self::Shipwreck),
            "escape_pod" => Some(Self::EscapePod),
            _ => None,
        }
    }
}

/// One object in the world: a player ship or a collectible.
#[derive(Debug, Clone, PartialEq)]
pub struct SpaceObject {
    pub id: i64,
    pub kind: SpaceObjectKind,
    pub x: f64,
    pub y: f64,
    /// World units per second
    pub speed: f64,
    /// Heading in degrees, `[0, 360)`
    pub angle: f64,
    /// Epoch milliseconds the position was last advanced to
    pub last_position_update_ms: i64,
    pub picture_id: i64,
    /// Owner name, present only for player ships
    pub username: Option<String>,
}

impl SpaceObject {
    /// Advance the position to `now_ms`, wrapping toroidally. Returns true
    /// if the object moved beyond [`POSITION_EPSILON`].
    pub fn advance(&mut self, now_ms: i64, size: WorldSize) -> bool {
        let dt_secs = (now_ms - self.last_position_update_ms) as f64 / 1000.0;
        self.last_position_update_ms = now_ms;
        if dt_secs <= 0.0 || self.speed == 0.0 {
            return false;
        }

        let radians = self.angle.to_radians();
        let dx = self.speed * dt_secs * radians.cos();
        let dy = self.speed * dt_secs * radians.sin();
        if dx.abs() < POSITION_EPSILON && dy.abs() < POSITION_EPSILON {
            return false;
        }

        self.x = wrap(self.x + dx, size.width);
        self.y = wrap(self.y + dy, size.height);
        true
    }

    /// Position as a pair, for distance math.
    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

/// The process-wide world: size plus every live object.
#[derive(Debug, Clone, PartialEq)]
pub struct World {
    pub size: WorldSize,
    pub space_objects: Vec<SpaceObject>,
}

impl World {
    /// An empty world of the given size.
    pub fn new(size: WorldSize) -> Self {
        Self {
            size,
            space_objects: Vec::new(),
        }
    }

    /// Advance every object to `now_ms`. Returns true if anything moved.
    pub fn step_physics(&mut self, now_ms: i64) -> bool {
        let size = self.size;
        let mut moved = false;
        for object in &mut self.space_objects {
            moved |= object.advance(now_ms, size);
        }
        moved
    }

    /// Object by id.
    pub fn object(&self, id: i64) -> Option<&SpaceObject> {
        self.space_objects.iter().find(|o| o.id == id)
    }

    /// Mutable object by id.
    pub fn object_mut(&mut self, id: i64) -> Option<&mut SpaceObject> {
        self.space_objects.iter_mut().find(|o| o.id == id)
    }

    /// Remove and return the object with the given id.
    pub fn remove_object(&mut self, id: i64) -> Option<SpaceObject> {
        let index = self.space_objects.iter().position(|o| o.id == id)?;
        Some(self.space_objects.remove(index))
    }
}

/// Roll a replacement collectible: random kind (asteroid 0.6, shipwreck
/// 0.3, escape pod 0.1), per-kind base speed with ±25% variation, uniform
/// position and heading. The id is 0 until the store assigns one.
pub fn spawn_collectible<R: Rng + ?Sized>(rng: &mut R, size: WorldSize, now_ms: i64) -> SpaceObject {
    let roll: f64 = rng.gen();
    let (kind, base_speed) = if roll < 0.6 {
        (SpaceObjectKind::Asteroid, 5.0)
    } else if roll < 0.9 {
        (SpaceObjectKind::Shipwreck, 10.0)
    } else {
        (SpaceObjectKind::EscapePod, 25.0)
    };

    let variation: f64 = rng.gen_range(0.75..1.25);
    SpaceObject {
        id: 0,
        kind,
        x: rng.gen_range(0.0..size.width),
        y: rng.gen_range(0.0..size.height),
        speed: base_speed * variation,
        angle: rng.gen_range(0.0..360.0),
        last_position_update_ms: now_ms,
        picture_id: rng.gen_range(1..=4),
        username: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    const SIZE: WorldSize = WorldSize {
        width: 5000.0,
        height: 5000.0,
    };

    fn asteroid(id: i64, x: f64, y: f64, speed: f64, angle: f64) -> SpaceObject {
        SpaceObject {
            id,
            kind: SpaceObjectKind::Asteroid,
            x,
            y,
            speed,
            angle,
            last_position_update_ms: 0,
            picture_id: 1,
            username: None,
        }
    }

    #[test]
    fn test_wrap_normalizes_into_extent() {
        assert_eq!(wrap(5002.0, 5000.0), 2.0);
        assert_eq!(wrap(-3.0, 5000.0), 4997.0);
        assert_eq!(wrap(0.0, 5000.0), 0.0);
        assert_eq!(wrap(5000.0, 5000.0), 0.0);
    }

    #[test]
    fn test_advance_wraps_across_right_edge() {
        let mut object = asteroid(1, 4998.0, 0.0, 4.0, 0.0);
        let moved = object.advance(1000, SIZE);
        assert!(moved);
        assert!((object.x - 2.0).abs() < 1e-9);
        assert!(object.y.abs() < 1e-9);
        assert_eq!(object.last_position_update_ms, 1000);
    }

    #[test]
    fn test_advance_without_speed_does_not_move() {
        let mut object = asteroid(1, 100.0, 100.0, 0.0, 45.0);
        assert!(!object.advance(60_000, SIZE));
        assert_eq!(object.position(), (100.0, 100.0));
        // The timestamp still advances so a later speed change doesn't
        // teleport the object.
        assert_eq!(object.last_position_update_ms, 60_000);
    }

    #[test]
    fn test_step_physics_reports_movement() {
        let mut world = World::new(SIZE);
        world.space_objects.push(asteroid(1, 0.0, 0.0, 0.0, 0.0));
        world.space_objects.push(asteroid(2, 10.0, 10.0, 5.0, 90.0));

        assert!(world.step_physics(2000));
        assert!(!world.step_physics(2000));
    }

    #[test]
    fn test_toroidal_distance_uses_shortest_offset() {
        // Straight-line distance would be 4990; wrapped it is 10.
        let d = toroidal_distance((4995.0, 0.0), (5.0, 0.0), SIZE);
        assert!((d - 10.0).abs() < 1e-9);

        // Symmetric.
        let d2 = toroidal_distance((5.0, 0.0), (4995.0, 0.0), SIZE);
        assert!((d - d2).abs() < 1e-12);
    }

    #[test]
    fn test_opposite_point_is_maximally_distant() {
        let p = (1234.0, 4321.0);
        let q = opposite_point(p, SIZE);
        let d = toroidal_distance(p, q, SIZE);
        let max = ((SIZE.width / 2.0).powi(2) + (SIZE.height / 2.0).powi(2)).sqrt();
        assert!((d - max).abs() < 1e-6);
    }

    #[test]
    fn test_remove_object() {
        let mut world = World::new(SIZE);
        world.space_objects.push(asteroid(7, 1.0, 1.0, 0.0, 0.0));

        let removed = world.remove_object(7).expect("present");
        assert_eq!(removed.id, 7);
        assert!(world.remove_object(7).is_none());
        assert!(world.space_objects.is_empty());
    }

    #[test]
    fn test_spawn_collectible_within_bounds() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let object = spawn_collectible(&mut rng, SIZE, 1000);
            assert!(object.x >= 0.0 && object.x < SIZE.width);
            assert!(object.y >= 0.0 && object.y < SIZE.height);
            assert!(object.angle >= 0.0 && object.angle < 360.0);
            assert!(object.username.is_none());
            let base = match object.kind {
                SpaceObjectKind::Asteroid => 5.0,
                SpaceObjectKind::Shipwreck => 10.0,
                SpaceObjectKind::EscapePod => 25.0,
                SpaceObjectKind::PlayerShip => panic!("spawned a ship"),
            };
            assert!(object.speed >= base * 0.75 && object.speed <= base * 1.25);
        }
    }

    #[test]
    fn test_kind_column_roundtrip() {
        for kind in [
            SpaceObjectKind::PlayerShip,
            SpaceObjectKind::Asteroid,
            SpaceObjectKind::Shipwreck,
            SpaceObjectKind::EscapePod,
        ] {
            assert_eq!(SpaceObjectKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(SpaceObjectKind::parse("wormhole"), None);
    }
}
