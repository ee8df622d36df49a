//! Cartesian value types shared by the stacks, the workers and the drivers.
//!
//! All lengths are metres in the frame of the manipulator that uses them.
//! Each worker has its own base frame, so a position is only meaningful
//! together with the worker it was issued for.

use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// Default tool orientation: gripper pointing straight down.
pub const DEFAULT_RY: f64 = std::f64::consts::PI;

/// Planar vector, used for stacking directions and lateral offsets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Vec2 {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
}

impl Vec2 {
    /// Construct a planar vector.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Component-wise product.
    #[must_use]
    pub fn scale(self, other: Self) -> Self {
        Self::new(self.x * other.x, self.y * other.y)
    }

    /// Euclidean length.
    #[must_use]
    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }
}

impl From<[f64; 2]> for Vec2 {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Vec2> for [f64; 2] {
    fn from(v: Vec2) -> Self {
        [v.x, v.y]
    }
}

impl Add for Vec2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Point (or offset) in 3D space. Always three components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct Position3D {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
    /// Z component (height).
    pub z: f64,
}

impl Position3D {
    /// Construct a point.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Planar projection.
    #[must_use]
    pub fn xy(self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    /// Translate in the plane, keeping the height.
    #[must_use]
    pub fn offset_xy(self, delta: Vec2) -> Self {
        Self::new(self.x + delta.x, self.y + delta.y, self.z)
    }

    /// Straight-line distance in the plane.
    #[must_use]
    pub fn planar_distance(self, other: Self) -> f64 {
        (self.xy() - other.xy()).length()
    }
}

impl From<[f64; 3]> for Position3D {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self { x, y, z }
    }
}

impl From<Position3D> for [f64; 3] {
    fn from(p: Position3D) -> Self {
        [p.x, p.y, p.z]
    }
}

impl From<Vec2> for Position3D {
    fn from(v: Vec2) -> Self {
        Self::new(v.x, v.y, 0.0)
    }
}

impl Add for Position3D {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Position3D {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Position3D {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Tool pose: position plus rotation vector, as sent to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// X position.
    pub x: f64,
    /// Y position.
    pub y: f64,
    /// Z position.
    pub z: f64,
    /// Rotation about X.
    #[serde(default)]
    pub rx: f64,
    /// Rotation about Y.
    #[serde(default = "default_ry")]
    pub ry: f64,
    /// Rotation about Z.
    #[serde(default)]
    pub rz: f64,
}

fn default_ry() -> f64 {
    DEFAULT_RY
}

impl Pose {
    /// Pose at `position` with the default downward tool orientation.
    #[must_use]
    pub fn at(position: Position3D) -> Self {
        Self {
            x: position.x,
            y: position.y,
            z: position.z,
            rx: 0.0,
            ry: DEFAULT_RY,
            rz: 0.0,
        }
    }

    /// Position part of the pose.
    #[must_use]
    pub fn position(&self) -> Position3D {
        Position3D::new(self.x, self.y, self.z)
    }
}

impl From<Position3D> for Pose {
    fn from(position: Position3D) -> Self {
        Self::at(position)
    }
}

impl Add<Position3D> for Pose {
    type Output = Self;

    /// Translate the pose, keeping its orientation.
    fn add(self, rhs: Position3D) -> Self {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
            z: self.z + rhs.z,
            ..self
        }
    }
}
