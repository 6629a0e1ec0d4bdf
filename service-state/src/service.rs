//! Async runtime around the tracker.
//!
//! The tracker itself is synchronous. One tokio task owns it and drains a
//! single event channel, so every mutation happens on that task.

use crate::{
    arena::Slot,
    cell_info::CellInfoCache,
    family::PhoneType,
    host::{ScheduleError, Scheduler, Timer},
    modem::{Indication, RadioState, Response},
    poll::Generation,
    power::{PendingPowerOff, PowerState},
    registrant::{Message, Registrant, RegistrantKind},
    signal::SignalStrength,
    state::{ServiceState, cell::CellInfo},
    tracker::ServiceStateTracker,
};
use color_eyre::{
    Result,
    eyre::{WrapErr, eyre},
};
use derive_more::From;
use flume::{Receiver, Sender};
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::Duration,
};
use tokio::{
    runtime::Handle,
    sync::oneshot,
    task::{AbortHandle, JoinHandle},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, From)]
pub enum Event {
    Response(Response),
    Indication(Indication),
    Timer(Timer),
    Message(Message),
    Command(Command),
}

/// Requests from outside the event loop.
#[derive(Debug)]
pub enum Command {
    PollState,
    ModemTriggeredPollState,
    CancelPollState,
    SetRadioPower(bool),
    SetRadioPowerFromCarrier(bool),
    RequestShutdown,
    SetImsRegistration(bool),
    SetImsVoiceInService(bool),
    SwitchPhoneType(PhoneType),
    RegisterFor {
        kind: RegistrantKind,
        registrant: Registrant,
        notify_now: bool,
    },
    UnregisterFor {
        kind: RegistrantKind,
        handler: Sender<Message>,
    },
    RequestCellInfo,
    Snapshot(oneshot::Sender<Snapshot>),
    Dump(oneshot::Sender<String>),
}

/// Copy of the tracker's observable state.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Voice over IMS folded in.
    pub service_state: ServiceState,
    pub committed: Slot,
    pub signal: SignalStrength,
    pub radio: RadioState,
    pub power: PowerState,
    pub phone_type: PhoneType,
    pub generation: Generation,
    pub outstanding: usize,
    pub commits: u64,
}

impl Snapshot {
    fn of(tracker: &ServiceStateTracker) -> Self {
        Self {
            service_state: tracker.merged_service_state(),
            committed: Slot {
                state: tracker.service_state().clone(),
                location: tracker.cell_location().clone(),
            },
            signal: tracker.signal_strength().clone(),
            radio: tracker.radio_state(),
            power: tracker.power_state(),
            phone_type: tracker.phone_type(),
            generation: tracker.poll_generation(),
            outstanding: tracker.outstanding_queries(),
            commits: tracker.commits(),
        }
    }
}

/// Timers as sleeping tokio tasks that post [`Event::Timer`] when they fire.
pub struct TokioScheduler {
    events: Sender<Event>,
    timers: Mutex<HashMap<Timer, AbortHandle>>,
}

impl TokioScheduler {
    pub fn new(events: Sender<Event>) -> Self {
        Self {
            events,
            timers: Mutex::default(),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, timer: Timer, after: Duration) -> Result<(), ScheduleError> {
        let rt = Handle::try_current().map_err(|_| ScheduleError::NoRuntime)?;
        if self.events.is_disconnected() {
            return Err(ScheduleError::Closed);
        }

        let events = self.events.clone();
        let task = rt.spawn(async move {
            tokio::time::sleep(after).await;
            if events.send_async(Event::Timer(timer)).await.is_err() {
                debug!(?timer, "timer fired after the event loop went away");
            }
        });

        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(prev) = timers.insert(timer, task.abort_handle()) {
            prev.abort();
        }

        Ok(())
    }

    fn cancel(&self, timer: Timer) {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = timers.remove(&timer) {
            task.abort();
        }
    }
}

fn dispatch(tracker: &mut ServiceStateTracker, event: Event) {
    match event {
        Event::Response(response) => tracker.handle_response(response),
        Event::Indication(indication) => tracker.handle_indication(indication),
        Event::Timer(timer) => tracker.handle_timer(timer),
        Event::Message(msg) => tracker.handle_message(msg),
        Event::Command(cmd) => run_command(tracker, cmd),
    }
}

fn run_command(tracker: &mut ServiceStateTracker, cmd: Command) {
    match cmd {
        Command::PollState => tracker.poll_state(),
        Command::ModemTriggeredPollState => tracker.modem_triggered_poll_state(),
        Command::CancelPollState => tracker.cancel_poll_state(),
        Command::SetRadioPower(on) => tracker.set_radio_power(on),
        Command::SetRadioPowerFromCarrier(enabled) => {
            tracker.set_radio_power_from_carrier(enabled)
        }
        Command::RequestShutdown => tracker.request_shutdown(),
        Command::SetImsRegistration(registered) => {
            tracker.set_ims_registration_state(registered)
        }
        Command::SetImsVoiceInService(in_service) => {
            tracker.set_ims_voice_in_service(in_service)
        }
        Command::SwitchPhoneType(phone_type) => tracker.switch_phone_type(phone_type),
        Command::RegisterFor {
            kind,
            registrant,
            notify_now,
        } => tracker.register_for(kind, registrant, notify_now),
        Command::UnregisterFor { kind, handler } => tracker.unregister_for(kind, &handler),
        Command::RequestCellInfo => tracker.request_cell_info(),
        Command::Snapshot(reply) => {
            let _ = reply.send(Snapshot::of(tracker));
        }
        Command::Dump(reply) => {
            let _ = reply.send(tracker.dump());
        }
    }
}

/// Runs `tracker` until `cancel` fires or the event channel closes.
///
/// `messages` is the receiving end of the tracker's own registrant handler.
#[bon::builder(finish_fn = run)]
pub fn spawn(
    tracker: ServiceStateTracker,
    events_tx: Sender<Event>,
    events: Receiver<Event>,
    messages: Receiver<Message>,
    cancel: CancellationToken,
) -> (ServiceStateHandle, JoinHandle<Result<()>>) {
    let handle = ServiceStateHandle {
        events: events_tx,
        cell_info: tracker.cell_info_cache(),
        pending_power_off: tracker.pending_power_off(),
        cell_info_max_age: tracker.config().cell_info_max_age,
        cell_info_timeout: tracker.config().cell_info_timeout,
    };

    let mut tracker = tracker;
    let task = tokio::spawn(async move {
        info!("service state tracker started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv_async() => match event {
                    Ok(event) => dispatch(&mut tracker, event),
                    Err(_) => break,
                },
                Ok(msg) = messages.recv_async() => tracker.handle_message(msg),
            }
        }
        info!("service state tracker stopped");

        Ok(())
    });

    (handle, task)
}

/// Cheap to clone entry point for everything outside the event loop.
#[derive(Debug, Clone)]
pub struct ServiceStateHandle {
    events: Sender<Event>,
    cell_info: CellInfoCache,
    pending_power_off: PendingPowerOff,
    cell_info_max_age: Duration,
    cell_info_timeout: Duration,
}

impl ServiceStateHandle {
    fn send(&self, cmd: Command) -> Result<()> {
        self.events
            .send(Event::Command(cmd))
            .map_err(|_| eyre!("service state event loop is gone"))
    }

    pub fn poll_state(&self) -> Result<()> {
        self.send(Command::PollState)
    }

    pub fn modem_triggered_poll_state(&self) -> Result<()> {
        self.send(Command::ModemTriggeredPollState)
    }

    pub fn cancel_poll_state(&self) -> Result<()> {
        self.send(Command::CancelPollState)
    }

    pub fn set_radio_power(&self, on: bool) -> Result<()> {
        self.send(Command::SetRadioPower(on))
    }

    pub fn set_radio_power_from_carrier(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetRadioPowerFromCarrier(enabled))
    }

    pub fn request_shutdown(&self) -> Result<()> {
        self.send(Command::RequestShutdown)
    }

    pub fn set_ims_registration_state(&self, registered: bool) -> Result<()> {
        self.send(Command::SetImsRegistration(registered))
    }

    pub fn set_ims_voice_in_service(&self, in_service: bool) -> Result<()> {
        self.send(Command::SetImsVoiceInService(in_service))
    }

    pub fn switch_phone_type(&self, phone_type: PhoneType) -> Result<()> {
        self.send(Command::SwitchPhoneType(phone_type))
    }

    pub fn register_for(
        &self,
        kind: RegistrantKind,
        registrant: Registrant,
        notify_now: bool,
    ) -> Result<()> {
        self.send(Command::RegisterFor {
            kind,
            registrant,
            notify_now,
        })
    }

    pub fn unregister_for(&self, kind: RegistrantKind, handler: Sender<Message>) -> Result<()> {
        self.send(Command::UnregisterFor { kind, handler })
    }

    /// Usable from any thread, does not go through the event loop.
    pub fn process_pending_power_off(&self) -> bool {
        self.pending_power_off.process()
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await.wrap_err("event loop dropped the snapshot request")
    }

    pub async fn dump(&self) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Dump(tx))?;
        rx.await.wrap_err("event loop dropped the dump request")
    }

    /// Cached cell info if fresh enough, otherwise asks the modem and waits
    /// at most `cell_info_timeout`. `None` on timeout.
    pub async fn all_cell_info(&self) -> Option<Vec<CellInfo>> {
        if let Some(cached) = self.cell_info.fresh(self.cell_info_max_age) {
            return cached;
        }

        let (rx, first) = self.cell_info.wait();
        if first && let Err(e) = self.send(Command::RequestCellInfo) {
            warn!("could not request cell info: {e}");
            return self.cell_info.last();
        }

        match tokio::time::timeout(self.cell_info_timeout, rx).await {
            Ok(Ok(cells)) => cells,
            Ok(Err(_)) => None,
            Err(_) => {
                debug!("timed out waiting for cell info");
                None
            }
        }
    }
}
