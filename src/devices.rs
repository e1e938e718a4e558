//! Positioned devices.
//!
//! Positions are in meters on a plane. Moving a device publishes the new
//! coordinates on its position's `changes` notifier, which is what attenuation
//! models listen to.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::simulation::{Notifier, SimContext};

/// Mutable (x, y) location owned by a [`Device`].
///
/// Equality compares coordinates only.
#[derive(Clone)]
pub struct Position {
    inner: Rc<PositionInner>,
}

struct PositionInner {
    x: Cell<f64>,
    y: Cell<f64>,
    changes: Notifier<(f64, f64)>,
}

impl Position {
    pub fn new(ctx: &SimContext, owner: &str, x: f64, y: f64) -> Self {
        Self {
            inner: Rc::new(PositionInner {
                x: Cell::new(x),
                y: Cell::new(y),
                changes: Notifier::new(ctx, format!("{}.position.changes", owner)),
            }),
        }
    }

    pub fn x(&self) -> f64 {
        self.inner.x.get()
    }

    pub fn y(&self) -> f64 {
        self.inner.y.get()
    }

    pub fn coordinates(&self) -> (f64, f64) {
        (self.x(), self.y())
    }

    pub fn set_x(&self, x: f64) {
        self.set(x, self.y());
    }

    pub fn set_y(&self, y: f64) {
        self.set(self.x(), y);
    }

    /// Move to (x, y), publishing a single change if either coordinate differs.
    pub fn set(&self, x: f64, y: f64) {
        if x == self.x() && y == self.y() {
            return;
        }
        self.inner.x.set(x);
        self.inner.y.set(y);
        self.inner.changes.trigger((x, y));
    }

    /// Euclidean distance in meters.
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x() - other.x();
        let dy = self.y() - other.y();
        (dx * dx + dy * dy).sqrt()
    }

    /// Notifier triggered with the new coordinates after every move.
    pub fn changes(&self) -> &Notifier<(f64, f64)> {
        &self.inner.changes
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.coordinates() == other.coordinates()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x(), self.y())
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Position{}", self)
    }
}

/// Identity of a device within one simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

/// Something with a name and a position: the physical side of a node.
#[derive(Clone)]
pub struct Device {
    inner: Rc<DeviceInner>,
}

struct DeviceInner {
    id: DeviceId,
    name: String,
    position: Position,
}

impl Device {
    pub fn new(ctx: &SimContext, name: impl Into<String>, x: f64, y: f64) -> Self {
        let name = name.into();
        let position = Position::new(ctx, &name, x, y);
        Self {
            inner: Rc::new(DeviceInner {
                id: DeviceId(ctx.allocate_device_id()),
                name,
                position,
            }),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn position(&self) -> &Position {
        &self.inner.position
    }

    pub fn distance_to(&self, other: &Device) -> f64 {
        self.inner.position.distance_to(&other.inner.position)
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Device {}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.name)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Device('{}' at {})", self.inner.name, self.inner.position)
    }
}
