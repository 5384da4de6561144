//! Command-line argument parsing

use clap::Parser;
use std::path::PathBuf;

use crate::core::types::DeviceAddress;

#[derive(Parser, Debug, Clone)]
#[clap(name = "ble-security-profiler", version, author)]
#[clap(about = "Determines the security level each characteristic of a BLE peripheral requires")]
pub struct CliArgs {
    /// Address of the target device (AA:BB:CC:DD:EE:FF)
    #[clap(short, long)]
    pub device: DeviceAddress,

    /// Bluetooth adapter to use (default adapter if omitted)
    #[clap(long)]
    pub adapter: Option<String>,

    /// Probe read access
    #[clap(short, long)]
    pub read: bool,

    /// Probe write access
    #[clap(short, long)]
    pub write: bool,

    /// Probe notification subscription
    #[clap(short, long)]
    pub notify: bool,

    /// Probe read and write on every characteristic, not only where advertised
    #[clap(short = 'a', long)]
    pub all_characteristics: bool,

    /// Fixed 6-digit passkey for Passkey Entry
    #[clap(long)]
    pub passkey: Option<u32>,

    /// File with one candidate passkey per line, tried in order
    #[clap(long)]
    pub passkey_dictionary: Option<PathBuf>,

    /// Report output file
    #[clap(short, long, default_value = "security_report.json")]
    pub output: PathBuf,

    /// Timeout for a single characteristic access
    #[clap(long, default_value = "8")]
    pub access_timeout_secs: u64,

    /// Timeout for a single pairing attempt
    #[clap(long, default_value = "8")]
    pub pairing_timeout_secs: u64,

    /// Wait between a forced disconnect and the reconnect
    #[clap(long, default_value = "3")]
    pub settle_delay_secs: u64,

    /// Disconnect/reconnect cycles allowed per pass
    #[clap(long, default_value = "5")]
    pub max_recoveries: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let args =
            CliArgs::try_parse_from(["ble-security-profiler", "--device", "A1:A2:A3:A4:A5:A6"])
                .unwrap();

        assert_eq!(args.device.to_string(), "A1:A2:A3:A4:A5:A6");
        assert!(!args.read && !args.write && !args.notify);
        assert!(!args.all_characteristics);
        assert_eq!(args.output, PathBuf::from("security_report.json"));
        assert_eq!(args.access_timeout_secs, 8);
        assert_eq!(args.pairing_timeout_secs, 8);
        assert_eq!(args.settle_delay_secs, 3);
        assert_eq!(args.max_recoveries, 5);
    }

    #[test]
    fn test_cli_short_flags() {
        let args = CliArgs::try_parse_from([
            "ble-security-profiler",
            "-d",
            "A1:A2:A3:A4:A5:A6",
            "-rwn",
            "-a",
            "-o",
            "out.json",
        ])
        .unwrap();

        assert!(args.read && args.write && args.notify);
        assert!(args.all_characteristics);
        assert_eq!(args.output, PathBuf::from("out.json"));
    }

    #[test]
    fn test_cli_requires_valid_device() {
        assert!(CliArgs::try_parse_from(["ble-security-profiler"]).is_err());
        assert!(CliArgs::try_parse_from(["ble-security-profiler", "--device", "nope"]).is_err());
    }
}
