#![allow(dead_code)]
use async_trait::async_trait;
use bon::bon;
use color_eyre::Result;
use flume::{Receiver, Sender};
use mockall::mock;
use orb_service_state::{
    config::TrackerConfig,
    family::PhoneType,
    host::{
        CallTracker, DataConnectionTracker, DisconnectRegistry, FamilyRatchet, Host, NitzHook,
        Notification, Notifier, PhoneNotifier, ScheduleError, Scheduler, SpnDisplay, SubId,
        SubscriptionStore, Timer,
        standalone::{StaticCarrierPolicy, StaticSim},
    },
    modem::{
        CommandError, DataRegistration, Indication, ModemChannel, PollQuery, RadioState, Reply,
        Response, SelectionMode, Token, VoiceRegistration,
        mmcli::{ModemManager, MmPowerState},
    },
    registrant::{Message, Registrant, RegistrantKind},
    roaming::RoamingPolicy,
    service::Event,
    signal::SignalStrength,
    state::{
        OperatorIdentity, ServiceState,
        cell::{CellIdentity, CellInfo},
    },
    tracker::ServiceStateTracker,
};
use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What the modem answers to poll queries.
#[derive(Debug, Clone)]
pub struct Network {
    pub operator: OperatorIdentity,
    pub voice: VoiceRegistration,
    pub data: DataRegistration,
    pub selection: SelectionMode,
}

impl Network {
    pub fn lte(reg_code: i32, numeric: &str, name: &str) -> Self {
        let cell = CellIdentity::Lte {
            mcc: Some(numeric[..3].to_string()),
            mnc: Some(numeric[3..].to_string()),
            tac: 0xC945,
            ci: 0x0197_763E,
            pci: 12,
            bandwidth: Some(20_000),
        };

        Self {
            operator: OperatorIdentity {
                alpha_long: Some(name.to_string()),
                alpha_short: None,
                numeric: Some(numeric.to_string()),
            },
            voice: VoiceRegistration {
                reg_code,
                rat: 14,
                cell_identity: Some(cell.clone()),
                ..Default::default()
            },
            data: DataRegistration {
                reg_code,
                rat: 14,
                cell_identity: Some(cell),
                ..Default::default()
            },
            selection: SelectionMode::Automatic,
        }
    }

    pub fn home() -> Self {
        Self::lte(1, "26202", "vodafone.de")
    }

    pub fn roaming() -> Self {
        Self::lte(5, "20810", "SFR")
    }

    pub fn searching() -> Self {
        Self {
            operator: OperatorIdentity::default(),
            voice: VoiceRegistration {
                reg_code: 2,
                ..Default::default()
            },
            data: DataRegistration {
                reg_code: 2,
                ..Default::default()
            },
            selection: SelectionMode::Automatic,
        }
    }

    pub fn with_data_rat(mut self, rat: i32) -> Self {
        self.data.rat = rat;
        self
    }

    pub fn with_voice(mut self, reg_code: i32, rat: i32) -> Self {
        self.voice.reg_code = reg_code;
        self.voice.rat = rat;
        self
    }

    pub fn with_data(mut self, reg_code: i32) -> Self {
        self.data.reg_code = reg_code;
        self
    }

    pub fn with_reject_cause(mut self, cause: i32) -> Self {
        self.voice.reject_cause = cause;
        self
    }

    pub fn reply(&self, query: PollQuery) -> Reply {
        match query {
            PollQuery::Operator => Reply::Operator(self.operator.clone()),
            PollQuery::VoiceRegistration => Reply::VoiceRegistration(self.voice.clone()),
            PollQuery::DataRegistration => Reply::DataRegistration(self.data.clone()),
            PollQuery::NetworkSelectionMode => Reply::NetworkSelectionMode(self.selection),
        }
    }
}

pub fn query_of(token: Token) -> PollQuery {
    match token {
        Token::Poll { query, .. } => query,
        other => panic!("not a poll token: {other:?}"),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Poll(Token),
    RadioPower(bool),
    Shutdown,
    SignalStrength,
    CellInfo,
}

/// Answers requests right away by posting onto the event loop.
struct Responder {
    events: Sender<Event>,
    network: Network,
    cells: Option<Vec<CellInfo>>,
}

/// Records every request. With a responder attached it also behaves like a
/// modem that answers instantly and reports radio state changes.
#[derive(Default)]
pub struct RecordingModem {
    calls: Mutex<Vec<Call>>,
    responder: Mutex<Option<Responder>>,
}

impl RecordingModem {
    pub fn responding(
        events: Sender<Event>,
        network: Network,
        cells: Option<Vec<CellInfo>>,
    ) -> Self {
        Self {
            calls: Mutex::default(),
            responder: Mutex::new(Some(Responder {
                events,
                network,
                cells,
            })),
        }
    }

    pub fn set_network(&self, network: Network) {
        if let Some(r) = lock(&self.responder).as_mut() {
            r.network = network;
        }
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *lock(&self.calls))
    }

    pub fn take_poll_tokens(&self) -> Vec<Token> {
        self.take_calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Poll(token) => Some(token),
                _ => None,
            })
            .collect()
    }

    pub fn radio_power_calls(&self) -> Vec<bool> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                Call::RadioPower(on) => Some(*on),
                _ => None,
            })
            .collect()
    }

    pub fn shutdown_calls(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| **c == Call::Shutdown)
            .count()
    }

    fn record(&self, call: Call) {
        lock(&self.calls).push(call);
    }

    fn respond(&self, f: impl FnOnce(&Responder) -> Vec<Event>) {
        if let Some(r) = lock(&self.responder).as_ref() {
            for event in f(r) {
                let _ = r.events.send(event);
            }
        }
    }

    fn poll(&self, token: Token) {
        self.record(Call::Poll(token));
        self.respond(|r| {
            let reply = r.network.reply(query_of(token));
            vec![Response::ok(token, reply).into()]
        });
    }
}

impl ModemChannel for RecordingModem {
    fn get_operator(&self, token: Token) {
        self.poll(token);
    }

    fn get_voice_registration_state(&self, token: Token) {
        self.poll(token);
    }

    fn get_data_registration_state(&self, token: Token) {
        self.poll(token);
    }

    fn get_network_selection_mode(&self, token: Token) {
        self.poll(token);
    }

    fn set_radio_power(&self, on: bool, token: Token) {
        self.record(Call::RadioPower(on));
        self.respond(|_| {
            let radio = if on { RadioState::On } else { RadioState::Off };
            vec![
                Response::ok(token, Reply::Ack).into(),
                Indication::RadioStateChanged(radio).into(),
            ]
        });
    }

    fn request_shutdown(&self, token: Token) {
        self.record(Call::Shutdown);
        self.respond(|_| vec![Response::ok(token, Reply::Ack).into()]);
    }

    fn get_signal_strength(&self, token: Token) {
        self.record(Call::SignalStrength);
        self.respond(|_| vec![Response::err(token, CommandError::RequestNotSupported).into()]);
    }

    fn get_cell_info_list(&self, token: Token) {
        self.record(Call::CellInfo);
        self.respond(|r| match &r.cells {
            Some(cells) => vec![Response::ok(token, Reply::CellInfo(cells.clone())).into()],
            None => vec![],
        });
    }
}

#[derive(Default)]
pub struct FakeData {
    pub connected: AtomicBool,
    pub cleanups: Mutex<Vec<String>>,
}

impl DataConnectionTracker for FakeData {
    fn is_disconnected(&self) -> bool {
        !self.connected.load(Ordering::SeqCst)
    }

    fn clean_up_all_connections(&self, reason: &str) {
        lock(&self.cleanups).push(reason.to_string());
    }
}

pub struct FakeRegistry {
    pub dds: SubId,
    pub dds_connected: AtomicBool,
    pub registered: Mutex<Vec<Registrant>>,
    pub unregistered: AtomicUsize,
}

impl DisconnectRegistry for FakeRegistry {
    fn default_data_subscription(&self) -> SubId {
        self.dds
    }

    fn is_data_disconnected(&self, _sub: SubId) -> bool {
        !self.dds_connected.load(Ordering::SeqCst)
    }

    fn register_for_all_data_disconnected(&self, _sub: SubId, registrant: Registrant) {
        lock(&self.registered).push(registrant);
    }

    fn unregister_for_all_data_disconnected(&self, _sub: SubId, _handler: &Sender<Message>) {
        self.unregistered.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeScheduler {
    pub scheduled: Mutex<Vec<(Timer, Duration)>>,
    pub cancelled: Mutex<Vec<Timer>>,
    pub fail: AtomicBool,
}

impl FakeScheduler {
    pub fn timers(&self) -> Vec<Timer> {
        lock(&self.scheduled).iter().map(|(t, _)| *t).collect()
    }

    pub fn power_off_tags(&self) -> Vec<u64> {
        self.timers()
            .into_iter()
            .filter_map(|t| match t {
                Timer::PowerOffFallback { tag } => Some(tag),
                _ => None,
            })
            .collect()
    }
}

impl Scheduler for FakeScheduler {
    fn schedule(&self, timer: Timer, after: Duration) -> Result<(), ScheduleError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ScheduleError::NoRuntime);
        }
        lock(&self.scheduled).push((timer, after));

        Ok(())
    }

    fn cancel(&self, timer: Timer) {
        lock(&self.cancelled).push(timer);
    }
}

#[derive(Default)]
pub struct FakeStore {
    pub persisted: Mutex<Vec<ServiceState>>,
    pub spn: Mutex<Vec<SpnDisplay>>,
}

impl SubscriptionStore for FakeStore {
    fn persist_service_state(&self, _sub: SubId, state: &ServiceState) -> Result<()> {
        lock(&self.persisted).push(state.clone());

        Ok(())
    }

    fn set_plmn_spn(&self, _sub: SubId, display: &SpnDisplay) -> bool {
        lock(&self.spn).push(display.clone());

        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    NetworkAvailable,
    NetworkUnavailable,
    CountryCodeSet(bool),
    Notified(Notification),
    ServiceStateChanged(ServiceState),
    SignalStrengthChanged,
    LocationChanged,
    DataConnectionChanged(Option<String>),
    CellInfoChanged(usize),
}

/// Collects everything pushed to the NITZ hook, the notifier and the phone.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn take(&self) -> Vec<SinkEvent> {
        std::mem::take(&mut *lock(&self.events))
    }

    pub fn broadcasts(&self) -> Vec<ServiceState> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                SinkEvent::ServiceStateChanged(ss) => Some(ss.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn contains(&self, event: &SinkEvent) -> bool {
        lock(&self.events).contains(event)
    }

    fn push(&self, event: SinkEvent) {
        lock(&self.events).push(event);
    }
}

impl NitzHook for RecordingSink {
    fn network_available(&self) {
        self.push(SinkEvent::NetworkAvailable);
    }

    fn network_unavailable(&self) {
        self.push(SinkEvent::NetworkUnavailable);
    }

    fn country_code_set(&self, country_changed: bool) {
        self.push(SinkEvent::CountryCodeSet(country_changed));
    }
}

impl Notifier for RecordingSink {
    fn notify(&self, notification: Notification) {
        self.push(SinkEvent::Notified(notification));
    }
}

impl PhoneNotifier for RecordingSink {
    fn service_state_changed(&self, merged: &ServiceState) {
        self.push(SinkEvent::ServiceStateChanged(merged.clone()));
    }

    fn signal_strength_changed(&self, _signal: &SignalStrength) {
        self.push(SinkEvent::SignalStrengthChanged);
    }

    fn location_changed(&self) {
        self.push(SinkEvent::LocationChanged);
    }

    fn data_connection_changed(&self, reason: Option<&str>) {
        self.push(SinkEvent::DataConnectionChanged(reason.map(str::to_string)));
    }

    fn cell_info_changed(&self, cells: &[CellInfo]) {
        self.push(SinkEvent::CellInfoChanged(cells.len()));
    }
}

#[derive(Default)]
pub struct FakeCalls {
    pub in_call: AtomicBool,
    pub hangups: AtomicUsize,
}

impl CallTracker for FakeCalls {
    fn is_in_call(&self) -> bool {
        self.in_call.load(Ordering::SeqCst)
    }

    fn hangup_all(&self) {
        self.hangups.fetch_add(1, Ordering::SeqCst);
    }
}

mock! {
    pub MMCli {}
    #[async_trait]
    impl ModemManager for MMCli {
        async fn modem_info(&self, modem_id: &str) -> Result<String>;

        async fn signal_get(&self, modem_id: &str) -> Result<String>;

        async fn location_get(&self, modem_id: &str) -> Result<String>;

        async fn set_power_state(&self, modem_id: &str, state: MmPowerState) -> Result<()>;
    }
}

pub struct Fixture {
    pub tracker: ServiceStateTracker,
    pub modem: Arc<RecordingModem>,
    pub data: Arc<FakeData>,
    pub registry: Arc<FakeRegistry>,
    pub scheduler: Arc<FakeScheduler>,
    pub store: Arc<FakeStore>,
    pub sink: Arc<RecordingSink>,
    pub calls: Arc<FakeCalls>,
    /// The tracker's own registrant handler.
    pub messages: Receiver<Message>,
    pub self_handler: Sender<Message>,
}

#[bon]
impl Fixture {
    #[builder]
    pub fn new(
        #[builder(default)] config: TrackerConfig,
        #[builder(default = PhoneType::Gsm)] phone_type: PhoneType,
        #[builder(default)] policy: RoamingPolicy,
        #[builder(default)] sim: StaticSim,
        #[builder(default = SubId(0))] dds: SubId,
        #[builder(default = false)] data_connected: bool,
        modem: Option<Arc<RecordingModem>>,
    ) -> Self {
        let modem = modem.unwrap_or_default();
        let data = Arc::new(FakeData {
            connected: AtomicBool::new(data_connected),
            ..Default::default()
        });
        let registry = Arc::new(FakeRegistry {
            dds,
            dds_connected: AtomicBool::new(data_connected),
            registered: Mutex::default(),
            unregistered: AtomicUsize::new(0),
        });
        let scheduler = Arc::new(FakeScheduler::default());
        let store = Arc::new(FakeStore::default());
        let sink = Arc::new(RecordingSink::default());
        let calls = Arc::new(FakeCalls::default());

        let host = Host::builder()
            .data(data.clone())
            .registry(registry.clone())
            .carrier(Arc::new(StaticCarrierPolicy::new(policy)))
            .store(store.clone())
            .nitz(sink.clone())
            .ratchet(Arc::new(FamilyRatchet))
            .scheduler(scheduler.clone())
            .notifier(sink.clone())
            .phone(sink.clone())
            .calls(calls.clone())
            .sim(Arc::new(sim))
            .build();

        let (self_handler, messages) = flume::unbounded();
        let tracker = ServiceStateTracker::builder()
            .config(config)
            .modem(modem.clone())
            .host(host)
            .self_handler(self_handler.clone())
            .phone_type(phone_type)
            .build();

        Self {
            tracker,
            modem,
            data,
            registry,
            scheduler,
            store,
            sink,
            calls,
            messages,
            self_handler,
        }
    }
}

impl Fixture {
    /// Desired power on, then the modem reports the radio on, which kicks off
    /// a poll.
    pub fn radio_on(&mut self) {
        self.tracker.set_radio_power(true);
        self.tracker
            .handle_indication(Indication::RadioStateChanged(RadioState::On));
    }

    pub fn respond(&mut self, token: Token, network: &Network) {
        let reply = network.reply(query_of(token));
        self.tracker.handle_response(Response::ok(token, reply));
    }

    /// Answers every outstanding poll query from `network`.
    pub fn respond_all(&mut self, network: &Network) {
        for token in self.modem.take_poll_tokens() {
            self.respond(token, network);
        }
    }

    /// A full poll round trip against `network`.
    pub fn poll(&mut self, network: &Network) {
        self.tracker.poll_state();
        self.respond_all(network);
    }

    pub fn registrant(&mut self, kind: RegistrantKind, notify_now: bool) -> Receiver<Message> {
        let (tx, rx) = flume::unbounded();
        self.tracker
            .register_for(kind, Registrant::new(tx, kind as i32, None), notify_now);

        rx
    }
}
