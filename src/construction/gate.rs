//! Bidirectional port pairs.

use std::fmt;

use super::port::Port;
use crate::simulation::SimContext;

/// A pair of ports: `input` receives from the outside, `output` sends to it.
#[derive(Debug)]
pub struct Gate<M> {
    name: String,
    owner: String,
    pub input: Port<M>,
    pub output: Port<M>,
}

impl<M: Clone + 'static> Gate<M> {
    pub fn new(ctx: &SimContext, owner: impl Into<String>, name: impl Into<String>) -> Self {
        let owner = owner.into();
        let name = name.into();
        let input = Port::new(ctx, owner.clone(), format!("{}In", name));
        let output = Port::new(ctx, owner.clone(), format!("{}Out", name));
        Self { name, owner, input, output }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Forward this gate's output to `port`.
    pub fn connect_output_to(&self, port: &Port<M>) {
        self.output.connect_to(port);
    }

    /// Forward everything sent to `port` into this gate's input.
    pub fn connect_input_from(&self, port: &Port<M>) {
        port.connect_to(&self.input);
    }

    /// Cross-wire two gates: each output feeds the other gate's input.
    pub fn bi_connect_with(&self, other: &Gate<M>) {
        self.output.connect_to(&other.input);
        other.output.connect_to(&self.input);
    }

    /// Relay through `other` without reversing direction.
    ///
    /// Whatever this gate outputs leaves through `other`'s output, and whatever
    /// arrives at `other`'s input comes in through this gate's input. Used for
    /// pass-through gates of a module that wraps a sub-module.
    pub fn bi_connect_proxy(&self, other: &Gate<M>) {
        self.output.connect_to(&other.output);
        other.input.connect_to(&self.input);
    }
}

impl<M> Clone for Gate<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            owner: self.owner.clone(),
            input: self.input.clone(),
            output: self.output.clone(),
        }
    }
}

impl<M> fmt::Display for Gate<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.Gate('{}')", self.owner, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::Simulation;

    #[test]
    fn bi_connect_with_crosses_outputs_and_inputs() {
        let sim = Simulation::new();
        let ctx = sim.context();
        let upper: Gate<u32> = Gate::new(&ctx, "Mac", "phy");
        let lower: Gate<u32> = Gate::new(&ctx, "Phy", "mac");
        upper.bi_connect_with(&lower);

        let down = lower.input.receives();
        upper.output.send(1);
        assert_eq!(down.value(), Some(1));

        let up = upper.input.receives();
        lower.output.send(2);
        assert_eq!(up.value(), Some(2));
    }

    #[test]
    fn bi_connect_proxy_relays_without_reversing() {
        let sim = Simulation::new();
        let ctx = sim.context();
        let outer: Gate<u32> = Gate::new(&ctx, "Device", "radio");
        let inner: Gate<u32> = Gate::new(&ctx, "Device.Mac", "phy");
        // The inner module's gate is exposed through the outer one.
        inner.bi_connect_proxy(&outer);

        let leaving = outer.output.receives();
        inner.output.send(7);
        assert_eq!(leaving.value(), Some(7));

        let arriving = inner.input.receives();
        outer.input.send(8);
        assert_eq!(arriving.value(), Some(8));
    }

    #[test]
    fn ports_are_named_after_the_gate() {
        let sim = Simulation::new();
        let gate: Gate<u32> = Gate::new(&sim.context(), "Mac", "phy");
        assert_eq!(gate.input.name(), "phyIn");
        assert_eq!(gate.output.name(), "phyOut");
        assert_eq!(gate.to_string(), "Mac.Gate('phy')");
    }
}
