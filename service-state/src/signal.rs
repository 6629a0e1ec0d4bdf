//! Latest signal strength sample and duplicate suppression.

use crate::{
    modem::signal::SignalMetrics,
    state::{RadioTech, RatFamily},
};

#[derive(Debug, Clone, PartialEq)]
pub struct SignalStrength {
    pub is_gsm: bool,
    pub metrics: SignalMetrics,
}

impl Default for SignalStrength {
    fn default() -> Self {
        Self::default_for(true)
    }
}

impl SignalStrength {
    pub fn default_for(is_gsm: bool) -> Self {
        Self {
            is_gsm,
            metrics: SignalMetrics::default(),
        }
    }

    /// Tags `metrics` with the technology family the device is camped on.
    pub fn from_metrics(metrics: SignalMetrics, voice_rat: RadioTech, data_rat: RadioTech) -> Self {
        let is_gsm = is_gsm(voice_rat, data_rat, Some(&metrics));
        Self { is_gsm, metrics }
    }
}

/// A RAT counts as GSM family when it is 3GPP and not IWLAN. With both RATs
/// unknown the family is inferred from which measurements the modem filled in.
pub fn is_gsm(voice_rat: RadioTech, data_rat: RadioTech, metrics: Option<&SignalMetrics>) -> bool {
    if voice_rat.family() == RatFamily::Gsm || data_rat.family() == RatFamily::Gsm {
        return true;
    }
    if voice_rat != RadioTech::Unknown || data_rat != RadioTech::Unknown {
        return false;
    }

    metrics.is_none_or(|m| m.has_3gpp_measurements() || !m.has_cdma_measurements())
}

#[derive(Debug, Default)]
pub struct SignalStrengthCache {
    latest: SignalStrength,
    last_notified: Option<SignalStrength>,
    unsolicited: bool,
}

impl SignalStrengthCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> &SignalStrength {
        &self.latest
    }

    /// Stores `sample`. Returns true when it differs from the last sample that
    /// was notified, in which case it becomes the last notified one.
    pub fn update(&mut self, sample: SignalStrength) -> bool {
        self.latest = sample;
        if self.last_notified.as_ref() == Some(&self.latest) {
            return false;
        }
        self.last_notified = Some(self.latest.clone());

        true
    }

    /// Replaces the latest sample with defaults without notifying.
    pub fn reset(&mut self, is_gsm: bool) {
        self.latest = SignalStrength::default_for(is_gsm);
    }

    /// The modem pushes updates on its own, periodic polling is no longer
    /// needed.
    pub fn mark_unsolicited(&mut self) {
        self.unsolicited = true;
    }

    pub fn wants_polling(&self) -> bool {
        !self.unsolicited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lte(rsrp: f64) -> SignalStrength {
        SignalStrength {
            is_gsm: true,
            metrics: SignalMetrics {
                rsrp: Some(rsrp),
                ..Default::default()
            },
        }
    }

    #[test]
    fn it_suppresses_duplicates_against_last_notified() {
        // Arrange
        let mut cache = SignalStrengthCache::new();

        // Act / Assert
        assert!(cache.update(lte(-100.0)));
        assert!(!cache.update(lte(-100.0)));
        assert!(cache.update(lte(-90.0)));
    }

    #[test]
    fn it_compares_with_notified_sample_not_stored_one() {
        let mut cache = SignalStrengthCache::new();
        cache.update(lte(-100.0));

        cache.reset(true);

        assert_eq!(cache.latest(), &SignalStrength::default_for(true));
        assert!(!cache.update(lte(-100.0)));
    }

    #[test]
    fn it_derives_family_from_rats() {
        let lte_metrics = SignalMetrics {
            rsrp: Some(-100.0),
            ..Default::default()
        };
        let evdo_metrics = SignalMetrics {
            sinr: Some(3.0),
            ..Default::default()
        };

        assert!(is_gsm(RadioTech::Lte, RadioTech::Unknown, None));
        assert!(!is_gsm(RadioTech::OneXRtt, RadioTech::Iwlan, None));
        assert!(!is_gsm(RadioTech::Unknown, RadioTech::Iwlan, Some(&lte_metrics)));
        assert!(is_gsm(RadioTech::Unknown, RadioTech::Unknown, Some(&lte_metrics)));
        assert!(!is_gsm(RadioTech::Unknown, RadioTech::Unknown, Some(&evdo_metrics)));
    }
}
