//! Requests the tracker sends to the receiver.
//!
//! Requests are a 3-byte ASCII header followed by a fixed payload:
//!
//! | Request | Header | Payload |
//! |---------|--------|---------|
//! | Locator configuration | `CFG` | same layout as the prelaunch config block (22 bytes) |
//! | Receiver configuration | `RCV` | channel u8, locator name (12 bytes) |
//! | Deployment test | `TST` | channel number u8 (1 or 2) |

use std::fmt;

use crate::codec::*;
use crate::constants::*;
use crate::types::*;

/// Length of the locator config block: deploy mode through device name.
pub const LOCATOR_CONFIG_BLOCK_LEN: usize = OFFSET_DEVICE_NAME + DEVICE_NAME_LEN - OFFSET_DEPLOY_MODE;

/// Kinds of request. At most one of each kind is outstanding at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    LocatorConfig,
    ReceiverConfig,
    DeploymentTest,
}

impl CommandKind {
    /// All command kinds.
    pub const ALL: [CommandKind; 3] = [
        CommandKind::LocatorConfig,
        CommandKind::ReceiverConfig,
        CommandKind::DeploymentTest,
    ];

    /// Request header for this kind.
    pub fn header(self) -> [u8; HEADER_LEN] {
        match self {
            CommandKind::LocatorConfig => LOCATOR_CONFIG_HEADER,
            CommandKind::ReceiverConfig => RECEIVER_CONFIG_HEADER,
            CommandKind::DeploymentTest => DEPLOY_TEST_HEADER,
        }
    }

    /// Short name, used in logs and metric labels.
    pub fn name(self) -> &'static str {
        match self {
            CommandKind::LocatorConfig => "locator_config",
            CommandKind::ReceiverConfig => "receiver_config",
            CommandKind::DeploymentTest => "deployment_test",
        }
    }

    /// Stable index into per-kind tables.
    pub fn index(self) -> usize {
        match self {
            CommandKind::LocatorConfig => 0,
            CommandKind::ReceiverConfig => 1,
            CommandKind::DeploymentTest => 2,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A request to the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Push a new deployment configuration to the locator.
    LocatorConfig(LocatorConfig),
    /// Change the receiver's own radio settings.
    ReceiverConfig(ReceiverConfig),
    /// Fire a deployment channel test.
    DeploymentTest(DeployChannel),
}

impl Command {
    /// The kind of this command.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::LocatorConfig(_) => CommandKind::LocatorConfig,
            Command::ReceiverConfig(_) => CommandKind::ReceiverConfig,
            Command::DeploymentTest(_) => CommandKind::DeploymentTest,
        }
    }

    /// Encode the command to bytes for transmission.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + LOCATOR_CONFIG_BLOCK_LEN);
        buf.extend_from_slice(&self.kind().header());

        match self {
            Command::LocatorConfig(config) => {
                buf.extend(encode_locator_config_block(config));
            }

            Command::ReceiverConfig(config) => {
                buf.push(config.channel);
                write_ascii(&mut buf, &config.locator_name, DEVICE_NAME_LEN);
            }

            Command::DeploymentTest(channel) => {
                buf.push(channel.number());
            }
        }

        buf
    }
}

/// Encode a locator configuration in the prelaunch config-block layout.
pub fn encode_locator_config_block(config: &LocatorConfig) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LOCATOR_CONFIG_BLOCK_LEN);
    buf.push(config.deploy_mode);
    write_u16_le(&mut buf, config.launch_detect_altitude);
    buf.push(config.deploy_delay_1);
    buf.push(config.deploy_delay_2);
    write_u16_le(&mut buf, config.deploy_altitude_1);
    write_u16_le(&mut buf, config.deploy_altitude_2);
    buf.push(config.deploy_signal_duration);
    write_ascii(&mut buf, &config.device_name, DEVICE_NAME_LEN);
    buf
}
