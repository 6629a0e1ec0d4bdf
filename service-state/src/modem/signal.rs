use serde::{Deserialize, Deserializer, Serialize};

/// Root of `mmcli -m <id> --signal-get --output-json`.
#[derive(Debug, Deserialize)]
pub struct MmcliSignalRoot {
    pub modem: MmcliSignalModem,
}

#[derive(Debug, Deserialize)]
pub struct MmcliSignalModem {
    pub signal: MmcliSignalData,
}

/// Per-RAT measurement blocks. A block is `None` when mmcli omits it.
#[derive(Debug, Default, Deserialize)]
pub struct MmcliSignalData {
    #[serde(rename = "5g")]
    pub nr5g: Option<RatSignal>,
    pub lte: Option<RatSignal>,
    pub umts: Option<RatSignal>,
    pub gsm: Option<RatSignal>,
    pub cdma1x: Option<RatSignal>,
    pub evdo: Option<RatSignal>,
}

/// Union of every measurement mmcli reports for any RAT. Fields a RAT does not
/// measure stay `None`.
#[derive(Debug, Default, Deserialize)]
pub struct RatSignal {
    #[serde(default, deserialize_with = "de_string_to_f64_opt")]
    pub rsrp: Option<f64>,
    #[serde(default, deserialize_with = "de_string_to_f64_opt")]
    pub rsrq: Option<f64>,
    #[serde(default, deserialize_with = "de_string_to_f64_opt")]
    pub rssi: Option<f64>,
    #[serde(default, deserialize_with = "de_string_to_f64_opt")]
    pub snr: Option<f64>,
    #[serde(default, deserialize_with = "de_string_to_f64_opt")]
    pub sinr: Option<f64>,
    #[serde(default, deserialize_with = "de_string_to_f64_opt")]
    pub ecio: Option<f64>,
    #[serde(default, deserialize_with = "de_string_to_f64_opt")]
    pub rscp: Option<f64>,
    #[serde(default, deserialize_with = "de_string_to_f64_opt")]
    pub io: Option<f64>,
    #[serde(
        default,
        deserialize_with = "de_string_to_f64_opt",
        rename = "error-rate"
    )]
    pub error_rate: Option<f64>,
}

/// mmcli prints unavailable values as "--".
pub fn de_string_to_f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<&str> = Option::deserialize(deserializer)?;
    match s {
        Some("--") | None => Ok(None),
        Some(val) => val
            .parse::<f64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// A normalized view over all RATs. Non-applicable metrics are None.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct SignalMetrics {
    /// LTE/NR, dBm.
    pub rsrp: Option<f64>,
    /// LTE/NR, dB.
    pub rsrq: Option<f64>,
    pub rssi: Option<f64>,
    /// LTE/NR
    pub snr: Option<f64>,
    /// EVDO
    pub sinr: Option<f64>,
    /// UMTS/CDMA/EVDO
    pub ecio: Option<f64>,
    /// UMTS
    pub rscp: Option<f64>,
    /// EVDO
    pub io: Option<f64>,
    pub error_rate: Option<f64>,
}

impl SignalMetrics {
    /// Whether any 3GPP-only measurement is present.
    pub fn has_3gpp_measurements(&self) -> bool {
        self.rsrp.is_some() || self.rsrq.is_some() || self.rscp.is_some()
    }

    /// Whether any 3GPP2-only measurement is present.
    pub fn has_cdma_measurements(&self) -> bool {
        self.sinr.is_some() || self.io.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AccessTech {
    Gsm,
    Umts,
    Lte,
    Nr5g,
    Cdma1x,
    Evdo,
}

impl AccessTech {
    /// Normalizes mmcli access technology names.
    pub(crate) fn from_rat_value(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        if let Some((first, _)) = s.split_once(|c: char| c == ';' || c == ',') {
            return Self::from_rat_value(first);
        }

        match s.as_str() {
            "gsm" | "gsm-compact" | "gprs" | "edge" => Some(Self::Gsm),
            "umts" | "hsdpa" | "hsupa" | "hspa" | "hspa+" | "hspa-plus" => {
                Some(Self::Umts)
            }
            "lte" | "lte-cat-m" | "lte-nb-iot" => Some(Self::Lte),
            "5g" | "5gnr" | "5g-nsa" | "nr5g" | "nr5g-nsa" | "nr5g-sa" => {
                Some(Self::Nr5g)
            }
            "cdma1x" | "cdma-1x" | "1xrtt" => Some(Self::Cdma1x),
            "evdo" | "cdma-evdo" | "evdo0" | "evdoa" | "evdob" => Some(Self::Evdo),
            _ => None,
        }
    }
}

impl MmcliSignalData {
    fn block(&self, tech: AccessTech) -> Option<&RatSignal> {
        match tech {
            AccessTech::Gsm => self.gsm.as_ref(),
            AccessTech::Umts => self.umts.as_ref(),
            AccessTech::Lte => self.lte.as_ref(),
            AccessTech::Nr5g => self.nr5g.as_ref(),
            AccessTech::Cdma1x => self.cdma1x.as_ref(),
            AccessTech::Evdo => self.evdo.as_ref(),
        }
    }

    fn metrics_for(&self, tech: AccessTech) -> SignalMetrics {
        let Some(b) = self.block(tech) else {
            return SignalMetrics::default();
        };

        match tech {
            AccessTech::Gsm => SignalMetrics {
                rssi: b.rssi,
                error_rate: b.error_rate,
                ..Default::default()
            },
            AccessTech::Umts => SignalMetrics {
                rssi: b.rssi,
                ecio: b.ecio,
                rscp: b.rscp,
                error_rate: b.error_rate,
                ..Default::default()
            },
            AccessTech::Lte => SignalMetrics {
                rsrp: b.rsrp,
                rsrq: b.rsrq,
                rssi: b.rssi,
                snr: b.snr,
                error_rate: b.error_rate,
                ..Default::default()
            },
            AccessTech::Nr5g => SignalMetrics {
                rsrp: b.rsrp,
                rsrq: b.rsrq,
                snr: b.snr,
                error_rate: b.error_rate,
                ..Default::default()
            },
            AccessTech::Cdma1x => SignalMetrics {
                rssi: b.rssi,
                ecio: b.ecio,
                error_rate: b.error_rate,
                ..Default::default()
            },
            AccessTech::Evdo => SignalMetrics {
                rssi: b.rssi,
                ecio: b.ecio,
                sinr: b.sinr,
                io: b.io,
                error_rate: b.error_rate,
                ..Default::default()
            },
        }
    }

    /// Metrics for the camped RAT, else for the first block that has any.
    pub fn metrics(&self, rat: Option<&str>) -> SignalMetrics {
        if let Some(tech) = rat.and_then(AccessTech::from_rat_value) {
            let m = self.metrics_for(tech);
            if m != SignalMetrics::default() {
                return m;
            }
        }

        [
            AccessTech::Lte,
            AccessTech::Nr5g,
            AccessTech::Umts,
            AccessTech::Gsm,
            AccessTech::Cdma1x,
            AccessTech::Evdo,
        ]
        .into_iter()
        .map(|tech| self.metrics_for(tech))
        .find(|m| *m != SignalMetrics::default())
        .unwrap_or_default()
    }
}
