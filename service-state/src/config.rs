use crate::host::SubId;
use bon::Builder;
use std::time::Duration;

#[derive(Debug, Clone, Builder)]
pub struct TrackerConfig {
    #[builder(default, into)]
    pub sub_id: SubId,
    /// Upper bound on waiting for data teardown before a graceful power off.
    #[builder(default = Duration::from_secs(30))]
    pub power_off_fallback: Duration,
    #[builder(default = Duration::from_secs(3))]
    pub ims_radio_off_delay: Duration,
    #[builder(default = Duration::from_secs(60))]
    pub gprs_check_period: Duration,
    #[builder(default = Duration::from_secs(20))]
    pub signal_poll_interval: Duration,
    #[builder(default = Duration::from_secs(2))]
    pub cell_info_max_age: Duration,
    #[builder(default = Duration::from_secs(5))]
    pub cell_info_timeout: Duration,
    /// Data-only devices report voice registration from the data domain.
    #[builder(default = true)]
    pub voice_capable: bool,
    /// Delay powering off while IMS is registered so it can deregister.
    #[builder(default = false)]
    pub power_off_delay_needed: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
