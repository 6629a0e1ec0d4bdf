use clap::Parser;
use color_eyre::eyre::Result;
use orb_service_state::{
    config::TrackerConfig, family::PhoneType, host::standalone::StaticSim,
    modem::mmcli::ModemManagerCli, roaming::RoamingPolicy, telemetry,
};
use std::{path::PathBuf, time::Duration};
use tokio::signal::unix::{self, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SYSLOG_IDENTIFIER: &str = "worldcoin-service-state";

#[derive(Debug, Parser)]
#[command(about, version)]
struct Args {
    /// ModemManager modem index or path.
    #[arg(long, env = "ORB_SERVICE_STATE_MODEM", default_value = "0")]
    modem: String,
    #[arg(long, default_value_t = 0)]
    sub_id: i32,
    #[arg(
        long,
        env = "ORB_SERVICE_STATE_FILE",
        default_value = "/usr/persistent/service-state.json"
    )]
    state_file: PathBuf,
    /// Seconds between ModemManager status checks.
    #[arg(long, default_value_t = 10)]
    poll_interval: u64,
    #[arg(long, value_enum, default_value = "gsm")]
    phone_type: PhoneType,
    /// PLMNs (MCC+MNC) always treated as roaming.
    #[arg(long, value_delimiter = ',')]
    roaming_networks: Vec<String>,
    /// PLMNs (MCC+MNC) never treated as roaming.
    #[arg(long, value_delimiter = ',')]
    non_roaming_networks: Vec<String>,
    /// Never report roaming.
    #[arg(long)]
    always_home: bool,
    /// Home PLMN from the SIM. Without it the SIM is treated as absent.
    #[arg(long)]
    sim_operator: Option<String>,
    #[arg(long)]
    sim_spn: Option<String>,
    /// Keep the radio off after startup.
    #[arg(long)]
    radio_off: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    telemetry::try_init(SYSLOG_IDENTIFIER)?;
    let args = Args::parse();

    let roaming_policy = RoamingPolicy {
        always_home: args.always_home,
        roaming_networks: args.roaming_networks,
        non_roaming_networks: args.non_roaming_networks,
        ..Default::default()
    };
    let sim = StaticSim {
        present: args.sim_operator.is_some(),
        operator_numeric: args.sim_operator,
        service_provider_name: args.sim_spn,
        display_rule: 0,
    };

    let cancel = CancellationToken::new();
    let (handle, tasks) = orb_service_state::program()
        .modem_manager(ModemManagerCli)
        .modem_id(args.modem)
        .config(TrackerConfig::builder().sub_id(args.sub_id).build())
        .phone_type(args.phone_type)
        .roaming_policy(roaming_policy)
        .state_file(args.state_file)
        .sim(sim)
        .monitor_interval(Duration::from_secs(args.poll_interval))
        .cancel(cancel.clone())
        .run()
        .await?;

    handle.set_radio_power(!args.radio_off)?;

    let mut sigterm = unix::signal(SignalKind::terminate())?;
    let mut sigint = unix::signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => warn!("received SIGTERM"),
        _ = sigint.recv()  => warn!("received SIGINT"),
    }

    info!("stopping tasks and exiting gracefully");
    cancel.cancel();

    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("task exited with error: {e:?}"),
            Err(e) => warn!("task panicked or was aborted: {e}"),
        }
    }

    Ok(())
}
