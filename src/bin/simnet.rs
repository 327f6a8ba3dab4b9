//! Simulated test network binary
//!
//! Brings up the gateway, the programmable device (1.1.4) and the responder
//! device (1.1.5) on one virtual subnet, then generates periodic read/write
//! traffic and system broadcasts until the operator types `exit`.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=info simnet
//! ```
//!
//! Configuration is read from the environment:
//!
//! - `SIMNET_MEDIUM`: `tp` (default), `ip` or `rf`
//! - `SIMNET_INTERVAL_SECS`: traffic loop interval, default 10
//! - `SIMNET_TRAFFIC`: `0` disables the read/write traffic generator
//! - `SIMNET_SYS_BROADCASTS`: `0` disables the system-broadcast sequence

use std::env;
use std::process::ExitCode;
use std::time::Duration;

use fieldbus_sim::driver::{DriverConfig, NetworkDriver};
use fieldbus_sim::transport::Medium;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match config_from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e} -- exit");
            return ExitCode::FAILURE;
        }
    };

    let mut driver = match NetworkDriver::bootstrap(config).await {
        Ok(driver) => driver,
        Err(e) => {
            eprintln!("{e} -- exit");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = driver.run().await {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn config_from_env() -> Result<DriverConfig, String> {
    let mut config = DriverConfig::default();

    if let Ok(value) = env::var("SIMNET_MEDIUM") {
        config.medium = match value.as_str() {
            "tp" => Medium::Tp,
            "ip" => Medium::Ip,
            "rf" => Medium::Rf,
            other => return Err(format!("unknown medium {other:?} (use tp, ip or rf)")),
        };
    }

    if let Ok(value) = env::var("SIMNET_INTERVAL_SECS") {
        let secs: u64 = value
            .parse()
            .map_err(|_| format!("invalid interval {value:?}"))?;
        config.update_interval = Duration::from_secs(secs.max(1));
    }

    if let Ok(value) = env::var("SIMNET_TRAFFIC") {
        config.generate_traffic = value != "0";
    }
    if let Ok(value) = env::var("SIMNET_SYS_BROADCASTS") {
        config.system_broadcasts = value != "0";
    }

    Ok(config)
}
