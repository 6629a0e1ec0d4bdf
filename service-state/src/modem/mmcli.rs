//! ModemManager backend.
//!
//! `mmcli` has no request/response channel of its own, so every command runs
//! on a spawned task and its outcome is posted back to the event loop as a
//! [`Response`] carrying the request's token.

use super::{
    CommandError, DataRegistration, Indication, ModemChannel, RadioState, Reply, Response,
    Token, VoiceRegistration,
    signal::{MmcliSignalRoot, SignalMetrics},
};
use crate::{
    service::Event,
    state::{
        OperatorIdentity, RadioTech, RegCode,
        cell::{CellIdentity, CellInfo},
    },
};
use async_trait::async_trait;
use color_eyre::{Result, eyre::eyre};
use derive_more::Display;
use flume::Sender;
use num_traits::ToPrimitive;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{process::Command, runtime::Handle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

macro_rules! jerr {
    ($s:expr) => {
        format!("could not get {}", $s)
    };
}

pub async fn run_cmd(cmd: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(cmd).args(args).output().await?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let err = String::from_utf8_lossy(&output.stderr);
        let args = args.join(" ");
        Err(eyre!("Failed to run {cmd} {args}. Error {err}"))
    }
}

/// Argument of `mmcli --set-power-state-*`.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum MmPowerState {
    #[display("on")]
    On,
    #[display("low")]
    Low,
    #[display("off")]
    Off,
}

#[async_trait]
pub trait ModemManager: Send + Sync + 'static {
    /// Raw `mmcli -m <id> -J`.
    async fn modem_info(&self, modem_id: &str) -> Result<String>;
    /// Raw `mmcli -m <id> --signal-get -J`.
    async fn signal_get(&self, modem_id: &str) -> Result<String>;
    /// Raw `mmcli -m <id> --location-get -J`.
    async fn location_get(&self, modem_id: &str) -> Result<String>;
    async fn set_power_state(&self, modem_id: &str, state: MmPowerState) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ModemManagerCli;

#[async_trait]
impl ModemManager for ModemManagerCli {
    async fn modem_info(&self, modem_id: &str) -> Result<String> {
        run_cmd("mmcli", &["-m", modem_id, "-J"]).await
    }

    async fn signal_get(&self, modem_id: &str) -> Result<String> {
        run_cmd("mmcli", &["-m", modem_id, "--signal-get", "-J"]).await
    }

    async fn location_get(&self, modem_id: &str) -> Result<String> {
        run_cmd("mmcli", &["-m", modem_id, "--location-get", "-J"]).await
    }

    async fn set_power_state(&self, modem_id: &str, state: MmPowerState) -> Result<()> {
        let arg = format!("--set-power-state-{state}");
        run_cmd("mmcli", &["-m", modem_id, arg.as_str()]).await?;

        Ok(())
    }
}

/// The parts of `mmcli -m <id> -J` the tracker cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModemStatus {
    pub power_state: Option<String>,
    pub registration_state: Option<String>,
    pub packet_service_state: Option<String>,
    pub access_technologies: Vec<String>,
    pub operator_code: Option<String>,
    pub operator_name: Option<String>,
    pub cdma_sid: Option<i32>,
    pub cdma_nid: Option<i32>,
    pub sim_present: bool,
}

/// mmcli prints `--` for empty values.
fn json_str(value: &serde_json::Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "--")
        .map(str::to_string)
}

pub fn parse_modem_info(str: &str) -> Result<ModemStatus> {
    let json: serde_json::Value = serde_json::from_str(str)?;
    let modem = &json["modem"];
    if !modem.is_object() {
        return Err(eyre!(jerr!("modem")));
    }

    let access_technologies = modem["generic"]["access-technologies"]
        .as_array()
        .map(|a| a.iter().filter_map(json_str).collect())
        .unwrap_or_default();

    Ok(ModemStatus {
        power_state: json_str(&modem["generic"]["power-state"]),
        registration_state: json_str(&modem["3gpp"]["registration-state"]),
        packet_service_state: json_str(&modem["3gpp"]["packet-service-state"]),
        access_technologies,
        operator_code: json_str(&modem["3gpp"]["operator-code"]),
        operator_name: json_str(&modem["3gpp"]["operator-name"]),
        cdma_sid: json_str(&modem["cdma"]["sid"]).and_then(|s| s.parse().ok()),
        cdma_nid: json_str(&modem["cdma"]["nid"]).and_then(|s| s.parse().ok()),
        sim_present: json_str(&modem["generic"]["sim"]).is_some_and(|s| s != "/"),
    })
}

/// `MMModemAccessTechnology` nick to RIL radio technology.
pub fn radio_tech_from_mm(nick: &str) -> Option<RadioTech> {
    let tech = match nick.trim() {
        "gsm" | "gsm-compact" => RadioTech::Gsm,
        "gprs" => RadioTech::Gprs,
        "edge" => RadioTech::Edge,
        "umts" => RadioTech::Umts,
        "hsdpa" => RadioTech::Hsdpa,
        "hsupa" => RadioTech::Hsupa,
        "hspa" => RadioTech::Hspa,
        "hspa-plus" => RadioTech::Hspap,
        "1xrtt" => RadioTech::OneXRtt,
        "evdo0" => RadioTech::Evdo0,
        "evdoa" => RadioTech::EvdoA,
        "evdob" => RadioTech::EvdoB,
        "lte" | "lte-cat-m" | "lte-nb-iot" => RadioTech::Lte,
        "5gnr" => RadioTech::Nr,
        _ => return None,
    };

    Some(tech)
}

/// `MMModem3gppRegistrationState` nick to a TS 27.007 registration code.
fn reg_code_from_mm(nick: Option<&str>) -> RegCode {
    match nick {
        Some("home" | "home-sms-only" | "home-csfb-not-preferred") => RegCode::Home,
        Some("roaming" | "roaming-sms-only" | "roaming-csfb-not-preferred") => {
            RegCode::Roaming
        }
        Some("searching") => RegCode::Searching,
        Some("denied") => RegCode::Denied,
        Some("idle" | "emergency-only" | "attached-rlos") => RegCode::NotRegistered,
        _ => RegCode::Unknown,
    }
}

fn raw(code: RegCode) -> i32 {
    code.to_i32().unwrap_or_default()
}

impl ModemStatus {
    pub fn radio_state(&self) -> RadioState {
        match self.power_state.as_deref() {
            Some("on") => RadioState::On,
            Some("low") => RadioState::Off,
            _ => RadioState::Unavailable,
        }
    }

    /// mmcli lists technologies in flag order, the last one is the newest.
    pub fn radio_tech(&self) -> RadioTech {
        self.access_technologies
            .iter()
            .rev()
            .find_map(|t| radio_tech_from_mm(t))
            .unwrap_or_default()
    }

    fn reg_code(&self) -> RegCode {
        reg_code_from_mm(self.registration_state.as_deref())
    }

    pub fn is_registered(&self) -> bool {
        matches!(self.reg_code(), RegCode::Home | RegCode::Roaming)
    }

    pub fn operator(&self) -> Result<OperatorIdentity, CommandError> {
        if self.operator_code.is_none() && !self.is_registered() {
            return Err(CommandError::OpNotAllowedBeforeRegistration);
        }

        Ok(OperatorIdentity {
            alpha_long: self.operator_name.clone(),
            alpha_short: None,
            numeric: self.operator_code.clone(),
        })
    }

    pub fn voice_registration(&self, cell: Option<CellIdentity>) -> VoiceRegistration {
        let rat = if self.is_registered() {
            self.radio_tech()
        } else {
            RadioTech::Unknown
        };

        VoiceRegistration {
            reg_code: raw(self.reg_code()),
            rat: rat.to_i32().unwrap_or_default(),
            emergency_enabled: self.registration_state.as_deref() == Some("emergency-only"),
            cell_identity: cell,
            ..Default::default()
        }
    }

    /// Data is registered while the packet domain is attached. A roaming
    /// circuit-switched registration makes the data one roaming as well.
    pub fn data_registration(&self, cell: Option<CellIdentity>) -> DataRegistration {
        let attached = self.packet_service_state.as_deref() == Some("attached");
        let code = match (attached, self.reg_code()) {
            (true, RegCode::Roaming) => RegCode::Roaming,
            (true, _) => RegCode::Home,
            (false, RegCode::Searching) => RegCode::Searching,
            (false, _) => RegCode::NotRegistered,
        };
        let rat = if attached {
            self.radio_tech()
        } else {
            RadioTech::Unknown
        };

        DataRegistration {
            reg_code: raw(code),
            rat: rat.to_i32().unwrap_or_default(),
            cell_identity: cell,
            ..Default::default()
        }
    }

    fn access_technology(&self) -> Option<&str> {
        self.access_technologies.last().map(String::as_str)
    }
}

fn hex(value: &serde_json::Value) -> Option<i64> {
    json_str(value).and_then(|s| i64::from_str_radix(&s, 16).ok())
}

/// Serving cell from the 3GPP section of `mmcli --location-get -J`. A non
/// zero tracking area code means an LTE cell.
pub fn parse_location(str: &str) -> Result<Option<CellIdentity>> {
    let json: serde_json::Value = serde_json::from_str(str)?;
    let loc = &json["modem"]["location"]["3gpp"];
    if !loc.is_object() {
        return Err(eyre!(jerr!("modem.location.3gpp")));
    }

    let Some(cid) = hex(&loc["cid"]) else {
        return Ok(None);
    };
    let mcc = json_str(&loc["mcc"]);
    let mnc = json_str(&loc["mnc"]);
    let tac = hex(&loc["tac"]).unwrap_or_default();
    let lac = hex(&loc["lac"]).unwrap_or_default();

    let identity = if tac != 0 {
        CellIdentity::Lte {
            mcc,
            mnc,
            tac: i32::try_from(tac).unwrap_or(i32::MAX),
            ci: cid,
            pci: -1,
            bandwidth: None,
        }
    } else {
        CellIdentity::Gsm {
            mcc,
            mnc,
            lac: i32::try_from(lac).unwrap_or(i32::MAX),
            cid,
        }
    };

    Ok(Some(identity))
}

pub fn parse_signal(str: &str, access_tech: Option<&str>) -> Result<SignalMetrics> {
    let root: MmcliSignalRoot = serde_json::from_str(str)?;

    Ok(root.modem.signal.metrics(access_tech))
}

fn command_error(e: color_eyre::Report) -> CommandError {
    CommandError::GenericFailure(format!("{e:#}"))
}

/// Modem Command Channel on top of a [`ModemManager`].
pub struct MmcliModem<M> {
    mm: Arc<M>,
    modem_id: Arc<str>,
    events: Sender<Event>,
}

impl<M: ModemManager> MmcliModem<M> {
    pub fn new(mm: M, modem_id: impl Into<Arc<str>>, events: Sender<Event>) -> Self {
        Self {
            mm: Arc::new(mm),
            modem_id: modem_id.into(),
            events,
        }
    }

    fn complete<F, Fut>(&self, token: Token, f: F)
    where
        F: FnOnce(Arc<M>, Arc<str>) -> Fut,
        Fut: Future<Output = Result<Reply, CommandError>> + Send + 'static,
    {
        let events = self.events.clone();
        let Ok(rt) = Handle::try_current() else {
            error!(?token, "no async runtime to run mmcli on");
            let response = Response::err(
                token,
                CommandError::GenericFailure("no async runtime".to_string()),
            );
            let _ = events.send(Event::Response(response));
            return;
        };

        let fut = f(self.mm.clone(), self.modem_id.clone());
        rt.spawn(async move {
            let result = fut.await;
            if let Err(e) = &result {
                debug!(?token, "mmcli request failed: {e}");
            }
            if events
                .send_async(Event::Response(Response { token, result }))
                .await
                .is_err()
            {
                debug!(?token, "event loop gone before mmcli completed");
            }
        });
    }

    async fn status(mm: &M, modem_id: &str) -> Result<ModemStatus, CommandError> {
        let info = mm.modem_info(modem_id).await.map_err(command_error)?;
        let status = parse_modem_info(&info).map_err(command_error)?;
        if !status.radio_state().is_available() {
            return Err(CommandError::RadioNotAvailable);
        }

        Ok(status)
    }

    /// A missing or unreadable location is not fatal to a registration query.
    async fn serving_cell(mm: &M, modem_id: &str) -> Option<CellIdentity> {
        let location = match mm.location_get(modem_id).await {
            Ok(location) => location,
            Err(e) => {
                debug!("no location: {e}");
                return None;
            }
        };

        parse_location(&location).unwrap_or_else(|e| {
            debug!("unparsable location: {e}");
            None
        })
    }
}

impl<M: ModemManager> MmcliModem<M> {
    async fn operator(mm: Arc<M>, id: Arc<str>) -> Result<Reply, CommandError> {
        let status = Self::status(&mm, &id).await?;
        status.operator().map(Reply::Operator)
    }

    async fn voice_registration(mm: Arc<M>, id: Arc<str>) -> Result<Reply, CommandError> {
        let status = Self::status(&mm, &id).await?;
        let cell = Self::serving_cell(&mm, &id).await;

        Ok(Reply::VoiceRegistration(status.voice_registration(cell)))
    }

    async fn data_registration(mm: Arc<M>, id: Arc<str>) -> Result<Reply, CommandError> {
        let status = Self::status(&mm, &id).await?;
        let cell = Self::serving_cell(&mm, &id).await;

        Ok(Reply::DataRegistration(status.data_registration(cell)))
    }

    async fn network_selection_mode(_: Arc<M>, _: Arc<str>) -> Result<Reply, CommandError> {
        Err(CommandError::RequestNotSupported)
    }

    async fn power(
        mm: Arc<M>,
        id: Arc<str>,
        state: MmPowerState,
    ) -> Result<Reply, CommandError> {
        info!(%state, "setting modem power state");
        mm.set_power_state(&id, state)
            .await
            .map_err(command_error)?;

        Ok(Reply::Ack)
    }

    async fn signal_strength(mm: Arc<M>, id: Arc<str>) -> Result<Reply, CommandError> {
        let status = Self::status(&mm, &id).await?;
        let signal = mm.signal_get(&id).await.map_err(command_error)?;
        let metrics =
            parse_signal(&signal, status.access_technology()).map_err(command_error)?;

        Ok(Reply::SignalStrength(metrics))
    }

    async fn cell_info(mm: Arc<M>, id: Arc<str>) -> Result<Reply, CommandError> {
        let location = mm.location_get(&id).await.map_err(command_error)?;
        let cells = parse_location(&location)
            .map_err(command_error)?
            .map(|identity| CellInfo {
                registered: true,
                identity,
            })
            .into_iter()
            .collect();

        Ok(Reply::CellInfo(cells))
    }
}

impl<M: ModemManager> ModemChannel for MmcliModem<M> {
    fn get_operator(&self, token: Token) {
        self.complete(token, Self::operator);
    }

    fn get_voice_registration_state(&self, token: Token) {
        self.complete(token, Self::voice_registration);
    }

    fn get_data_registration_state(&self, token: Token) {
        self.complete(token, Self::data_registration);
    }

    fn get_network_selection_mode(&self, token: Token) {
        self.complete(token, Self::network_selection_mode);
    }

    fn set_radio_power(&self, on: bool, token: Token) {
        let state = if on { MmPowerState::On } else { MmPowerState::Low };
        self.complete(token, move |mm, id| Self::power(mm, id, state));
    }

    fn request_shutdown(&self, token: Token) {
        self.complete(token, |mm, id| Self::power(mm, id, MmPowerState::Off));
    }

    fn get_signal_strength(&self, token: Token) {
        self.complete(token, Self::signal_strength);
    }

    fn get_cell_info_list(&self, token: Token) {
        self.complete(token, Self::cell_info);
    }
}

/// What the monitor compares between two reads to spot network changes.
#[derive(Debug, Clone, PartialEq, Eq)]
struct NetworkFingerprint {
    registration_state: Option<String>,
    packet_service_state: Option<String>,
    access_technologies: Vec<String>,
    operator_code: Option<String>,
}

impl From<&ModemStatus> for NetworkFingerprint {
    fn from(status: &ModemStatus) -> Self {
        Self {
            registration_state: status.registration_state.clone(),
            packet_service_state: status.packet_service_state.clone(),
            access_technologies: status.access_technologies.clone(),
            operator_code: status.operator_code.clone(),
        }
    }
}

/// Polls the modem every `interval` and turns what changed into
/// [`Indication`]s, standing in for the unsolicited notifications mmcli does
/// not push.
pub async fn monitor(
    mm: impl ModemManager,
    modem_id: &str,
    events: Sender<Event>,
    interval: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    let mut radio = None;
    let mut network = None;
    let mut sim_ready = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let status = match mm.modem_info(modem_id).await.and_then(|s| parse_modem_info(&s)) {
            Ok(status) => Some(status),
            Err(e) => {
                warn!("failed to read modem {modem_id}: {e}");
                None
            }
        };

        let new_radio = status
            .as_ref()
            .map_or(RadioState::Unavailable, ModemStatus::radio_state);
        let mut indications = Vec::new();
        if radio != Some(new_radio) {
            indications.push(Indication::RadioStateChanged(new_radio));
            radio = Some(new_radio);
        }

        if let Some(status) = &status {
            if status.sim_present && !sim_ready {
                indications.push(Indication::SimReady);
                sim_ready = true;
            }

            let fingerprint = NetworkFingerprint::from(status);
            if network.as_ref() != Some(&fingerprint) {
                indications.push(Indication::NetworkStateChanged);
                network = Some(fingerprint);
            }
        }

        for indication in indications {
            debug!(?indication, "modem indication");
            events
                .send_async(Event::Indication(indication))
                .await
                .map_err(|_| eyre!("event loop is gone"))?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEM_INFO: &str = r#"{"modem":{"3gpp":{"enabled-locks":["fixed-dialing"],"imei":"353338976168895","operator-code":"26202","operator-name":"vodafone.de","packet-service-state":"attached","pco":"--","registration-state":"roaming"},"cdma":{"activation-state":"--","cdma1x-registration-state":"--","esn":"--","evdo-registration-state":"--","meid":"--","nid":"--","sid":"--"},"dbus-path":"/org/freedesktop/ModemManager1/Modem/0","generic":{"access-technologies":["lte"],"manufacturer":"Telit","model":"LE910C4-WWXD","power-state":"on","sim":"/org/freedesktop/ModemManager1/SIM/0","state":"connected"}}}"#;

    const MODEM_INFO_LOW_POWER: &str = r#"{"modem":{"3gpp":{"imei":"353338976168895","operator-code":"--","operator-name":"--","packet-service-state":"--","registration-state":"--"},"cdma":{"nid":"--","sid":"--"},"generic":{"access-technologies":[],"power-state":"low","sim":"/","state":"disabled"}}}"#;

    const LOCATION: &str = r#"{"modem":{"location":{"3gpp":{"cid":"0197763E","lac":"0000","mcc":"262","mnc":"03","tac":"00C945"},"cdma-bs":{"latitude":"--","longitude":"--"},"gps":{"altitude":"--","latitude":"--","longitude":"--","nmea":[],"utc":"--"}}}}"#;

    #[test]
    fn it_parses_modem_info() {
        // Arrange & Act
        let actual = parse_modem_info(MODEM_INFO).unwrap();

        // Assert
        let expected = ModemStatus {
            power_state: Some("on".to_string()),
            registration_state: Some("roaming".to_string()),
            packet_service_state: Some("attached".to_string()),
            access_technologies: vec!["lte".to_string()],
            operator_code: Some("26202".to_string()),
            operator_name: Some("vodafone.de".to_string()),
            cdma_sid: None,
            cdma_nid: None,
            sim_present: true,
        };
        assert_eq!(actual, expected);
        assert_eq!(actual.radio_state(), RadioState::On);
        assert_eq!(actual.radio_tech(), RadioTech::Lte);
    }

    #[test]
    fn it_maps_registration_to_ril_codes() {
        let status = parse_modem_info(MODEM_INFO).unwrap();

        let voice = status.voice_registration(None);
        let data = status.data_registration(None);

        assert_eq!(voice.reg_code, 5);
        assert_eq!(voice.rat, 14);
        assert_eq!(data.reg_code, 5);
        assert_eq!(data.rat, 14);
    }

    #[test]
    fn it_refuses_operator_before_registration() {
        let status = parse_modem_info(MODEM_INFO_LOW_POWER).unwrap();

        assert_eq!(status.radio_state(), RadioState::Off);
        assert!(!status.sim_present);
        assert_eq!(
            status.operator(),
            Err(CommandError::OpNotAllowedBeforeRegistration)
        );
        assert_eq!(status.data_registration(None).reg_code, 0);
        assert_eq!(status.voice_registration(None).rat, 0);
    }

    #[test]
    fn it_picks_the_newest_access_technology() {
        let status = ModemStatus {
            power_state: Some("on".to_string()),
            registration_state: Some("home".to_string()),
            packet_service_state: Some("attached".to_string()),
            access_technologies: vec!["umts".to_string(), "hsdpa".to_string()],
            operator_code: None,
            operator_name: None,
            cdma_sid: None,
            cdma_nid: None,
            sim_present: true,
        };

        assert_eq!(status.radio_tech(), RadioTech::Hsdpa);
        assert_eq!(radio_tech_from_mm("pots"), None);
    }

    #[test]
    fn it_parses_lte_location() {
        let actual = parse_location(LOCATION).unwrap();

        let expected = CellIdentity::Lte {
            mcc: Some("262".to_string()),
            mnc: Some("03".to_string()),
            tac: 0xC945,
            ci: 0x0197763E,
            pci: -1,
            bandwidth: None,
        };
        assert_eq!(actual, Some(expected));
    }

    #[test]
    fn it_rejects_location_without_3gpp_section() {
        let actual = parse_location(r#"{"modem":{"location":{}}}"#);

        assert!(actual.is_err());
    }
}
