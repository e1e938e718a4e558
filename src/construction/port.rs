//! Directed message conduits.

use std::fmt;
use std::rc::{Rc, Weak};

use crate::simulation::{CallbackId, Event, EventWait, Notifier, SimContext};

/// One-way conduit delivering messages of type `M`.
///
/// `send` runs every subscribed callback (including forwarding links created with
/// [`Port::connect_to`]) synchronously, in subscription order, and then resolves
/// the pending receive event.
pub struct Port<M> {
    inner: Rc<PortInner<M>>,
}

struct PortInner<M> {
    name: String,
    owner: String,
    receives: Notifier<M>,
}

impl<M: Clone + 'static> Port<M> {
    pub fn new(ctx: &SimContext, owner: impl Into<String>, name: impl Into<String>) -> Self {
        let owner = owner.into();
        let name = name.into();
        let receives = Notifier::new(ctx, format!("{}.{}.receives", owner, name));
        Self { inner: Rc::new(PortInner { name, owner, receives }) }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    pub fn send(&self, message: M) {
        self.inner.receives.trigger(message);
    }

    /// Forward everything sent to this port to `other` as well.
    ///
    /// The link holds only a weak reference: it stops forwarding once `other` is dropped.
    pub fn connect_to(&self, other: &Port<M>) -> CallbackId {
        let target: Weak<PortInner<M>> = Rc::downgrade(&other.inner);
        self.subscribe(move |message| {
            if let Some(inner) = target.upgrade() {
                Port { inner }.send(message.clone());
            }
        })
    }

    pub fn subscribe(&self, callback: impl Fn(&M) + 'static) -> CallbackId {
        self.inner.receives.subscribe_callback(0, callback)
    }

    pub fn unsubscribe(&self, id: CallbackId) {
        self.inner.receives.unsubscribe_callback(id);
    }

    /// Single-shot event resolved by the next `send`.
    pub fn receives(&self) -> Event<M> {
        self.inner.receives.event()
    }

    /// Wait for the next message sent to this port.
    pub fn next_message(&self) -> EventWait<M> {
        self.inner.receives.wait()
    }
}

impl<M> Clone for Port<M> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<M> fmt::Display for Port<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.Port('{}')", self.inner.owner, self.inner.name)
    }
}

impl<M> fmt::Debug for Port<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::Simulation;
    use std::cell::RefCell;

    #[test]
    fn send_runs_callbacks_before_returning() {
        let sim = Simulation::new();
        let port: Port<String> = Port::new(&sim.context(), "Owner", "in");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        port.subscribe(move |m| seen2.borrow_mut().push(m.clone()));
        port.send("hello".into());
        assert_eq!(*seen.borrow(), vec!["hello".to_string()]);
    }

    #[test]
    fn connected_ports_forward_in_chains() {
        let sim = Simulation::new();
        let ctx = sim.context();
        let a: Port<u32> = Port::new(&ctx, "A", "out");
        let b: Port<u32> = Port::new(&ctx, "B", "relay");
        let c: Port<u32> = Port::new(&ctx, "C", "in");
        a.connect_to(&b);
        b.connect_to(&c);
        let got = c.receives();
        a.send(5);
        assert_eq!(got.value(), Some(5));
    }

    #[test]
    fn receive_event_is_reused_until_a_send() {
        let sim = Simulation::new();
        let port: Port<u32> = Port::new(&sim.context(), "Owner", "in");
        let first = port.receives();
        let again = port.receives();
        assert!(first.ptr_eq(&again));
        assert!(!first.is_triggered());

        port.send(1);
        assert!(first.is_triggered());
        let fresh = port.receives();
        assert!(!fresh.ptr_eq(&first));
        assert!(!fresh.is_triggered());
    }

    #[test]
    fn dropped_target_stops_forwarding() {
        let sim = Simulation::new();
        let ctx = sim.context();
        let a: Port<u32> = Port::new(&ctx, "A", "out");
        let b: Port<u32> = Port::new(&ctx, "B", "in");
        a.connect_to(&b);
        drop(b);
        a.send(1);
        assert_eq!(format!("{}", a), "A.Port('out')");
    }
}
