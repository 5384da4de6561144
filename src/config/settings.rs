//! Runtime settings

use std::path::PathBuf;
use std::time::Duration;

use crate::config::CliArgs;
use crate::core::types::{AccessType, DeviceAddress};

/// Timeouts and delays used while profiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Hard limit for one characteristic access
    pub access_timeout: Duration,
    /// Hard limit for one pairing attempt, excluding passkey prompts
    pub pairing_timeout: Duration,
    /// Wait between a forced disconnect and the reconnect
    pub settle_delay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            access_timeout: Duration::from_secs(8),
            pairing_timeout: Duration::from_secs(8),
            settle_delay: Duration::from_secs(3),
        }
    }
}

/// Where passkeys for Passkey Entry come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasskeySource {
    Interactive,
    Fixed(u32),
    Dictionary(PathBuf),
}

/// What to probe and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileOptions {
    pub access_types: Vec<AccessType>,
    /// Only probe access types a characteristic advertises
    pub filtered: bool,
    pub timings: Timings,
    /// Disconnect/reconnect cycles allowed per pass
    pub max_recoveries: u32,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            access_types: vec![AccessType::Read],
            filtered: true,
            timings: Timings::default(),
            max_recoveries: 5,
        }
    }
}

/// Runtime configuration settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub device: DeviceAddress,
    pub adapter: Option<String>,
    pub passkey: PasskeySource,
    pub output: PathBuf,
    pub profile: ProfileOptions,
}

impl From<CliArgs> for Settings {
    fn from(args: CliArgs) -> Self {
        let mut access_types: Vec<AccessType> = [
            (args.read, AccessType::Read),
            (args.write, AccessType::Write),
            (args.notify, AccessType::Notify),
        ]
        .into_iter()
        .filter_map(|(enabled, access)| enabled.then_some(access))
        .collect();
        if access_types.is_empty() {
            access_types.push(AccessType::Read);
        }

        // Dictionary wins over a fixed passkey
        let passkey = match (args.passkey_dictionary, args.passkey) {
            (Some(path), _) => PasskeySource::Dictionary(path),
            (None, Some(passkey)) => PasskeySource::Fixed(passkey),
            (None, None) => PasskeySource::Interactive,
        };

        Settings {
            device: args.device,
            adapter: args.adapter,
            passkey,
            output: args.output,
            profile: ProfileOptions {
                access_types,
                filtered: !args.all_characteristics,
                timings: Timings {
                    access_timeout: Duration::from_secs(args.access_timeout_secs),
                    pairing_timeout: Duration::from_secs(args.pairing_timeout_secs),
                    settle_delay: Duration::from_secs(args.settle_delay_secs),
                },
                max_recoveries: args.max_recoveries,
            },
        }
    }
}
