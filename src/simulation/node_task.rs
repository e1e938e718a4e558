//! Application-side processes of the scenario devices.
//!
//! These stand in for the plants and the controller of a networked control
//! system. A sensor feeder hands its MAC a fresh measurement at the start of
//! every round. The gateway controller queues one control value per actuator
//! and then announces the next schedule. Recorders subscribed to the
//! application gates count what arrives.

use embassy_futures::select::{Either, select};
use log::{debug, trace, warn};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use crate::construction::Gate;
use crate::mac::{FrameKind, MacAddress};
use crate::messages::{Announcement, Message, StackCommand, StackMessage, Transmittable};
use crate::schedule::{FLAG_TRANSMIT, Schedule, Scheduler};
use crate::simulation::SimContext;

/// What the application layers observed during a run.
#[derive(Debug, Default)]
pub(crate) struct Tally {
    /// Sensor data passed up by the gateway, per sender.
    pub received: BTreeMap<MacAddress, usize>,
    /// Acknowledgments passed up by the gateway, per sender.
    pub acks: BTreeMap<MacAddress, usize>,
    /// Control values handed to actuator applications, per actuator.
    pub controls_delivered: BTreeMap<MacAddress, usize>,
    /// Frames the gateway received outside of a slot the sender may use.
    pub out_of_slot: usize,
    /// Rounds whose schedule was not announced before the next round began.
    pub late_rounds: usize,
    /// Schedule the controller handed to the gateway last.
    pub announcement: Option<Announcement>,
}

pub(crate) type SharedTally = Rc<RefCell<Tally>>;

/// Send `SendState` with the round number as measurement at every round start.
pub(crate) async fn sensor_feeder(ctx: SimContext, app: Gate<StackMessage>, rounds: u32, round_length: Duration) {
    for round in 0..rounds {
        ctx.timeout_until(round_length * round).await;
        let state = Transmittable::measurement(vec![f64::from(round)]);
        trace!("{}: new state {}", app.owner(), state);
        app.output.send(StackMessage::Command(Message::new(StackCommand::SendState { state })));
    }
}

/// Drive the gateway: queue controls, then announce the next schedule, once per round.
pub(crate) async fn gateway_controller(
    ctx: SimContext,
    app: Gate<StackMessage>,
    mut scheduler: Scheduler,
    actuators: Vec<MacAddress>,
    rounds: u32,
    round_length: Duration,
    tally: SharedTally,
) {
    for round in 0..rounds {
        ctx.timeout_until(round_length * round).await;
        for receiver in &actuators {
            let control = Transmittable::measurement(vec![-f64::from(round)]);
            let command = StackCommand::SendControl { control, receiver: *receiver };
            app.output.send(StackMessage::Command(Message::new(command)));
        }

        let schedule = match scheduler.next_schedule() {
            Ok(schedule) => schedule,
            Err(err) => {
                ctx.fail(err);
                return;
            }
        };
        let clock = ctx.now();
        tally.borrow_mut().announcement = Some(Announcement { schedule: schedule.clone(), clock });
        let message = Message::new(StackCommand::SendSchedule { schedule, clock });
        app.output.send(StackMessage::Command(message.clone()));

        match select(message.processed().wait(), ctx.timeout(round_length)).await {
            Either::First(_) => debug!("Round {} announced at {:?}", round, clock),
            Either::Second(()) => {
                warn!("Round {}: schedule still not announced after {:?}", round, round_length);
                tally.borrow_mut().late_rounds += 1;
            }
        }
    }
}

/// Whether a frame from `sender` arriving at `at` lies in a slot it may use.
pub(crate) fn in_assigned_slot(announcement: &Announcement, slot_length: Duration, sender: MacAddress, at: Duration) -> bool {
    let elapsed = at.saturating_sub(announcement.clock).as_nanos();
    let slot = elapsed / slot_length.as_nanos().max(1);
    if slot == 0 {
        return false;
    }
    match &announcement.schedule {
        Schedule::Tdma(schedule) => schedule
            .assignments()
            .get((slot - 1) as usize)
            .is_some_and(|a| a.address == sender && a.flag == FLAG_TRANSMIT),
        Schedule::Csma(schedule) => slot <= u128::from(schedule.length()),
    }
}

/// Count the gateway's `PacketReceived` commands and check their timing.
pub(crate) fn record_gateway(ctx: &SimContext, app: &Gate<StackMessage>, slot_length: Duration, tally: SharedTally) {
    let ctx = ctx.clone();
    app.input.subscribe(move |message: &StackMessage| {
        let StackMessage::Command(message) = message else {
            return;
        };
        let StackCommand::PacketReceived { sender, kind, .. } = &message.command else {
            return;
        };
        let mut tally = tally.borrow_mut();
        let in_slot = tally
            .announcement
            .as_ref()
            .is_some_and(|a| in_assigned_slot(a, slot_length, *sender, ctx.now()));
        if !in_slot {
            warn!("{} from {} arrived outside of its slots", kind, sender);
            tally.out_of_slot += 1;
        }
        let counts = match kind {
            FrameKind::Ack => &mut tally.acks,
            _ => &mut tally.received,
        };
        *counts.entry(*sender).or_default() += 1;
    });
}

/// Count the control values an actuator application receives.
pub(crate) fn record_actuator(app: &Gate<StackMessage>, address: MacAddress, tally: SharedTally) {
    app.input.subscribe(move |message: &StackMessage| {
        if let StackMessage::Command(Message { command: StackCommand::ControlReceived { control }, .. }) = message {
            trace!("Actuator {} applies {}", address, control);
            *tally.borrow_mut().controls_delivered.entry(address).or_default() += 1;
        }
    });
}
