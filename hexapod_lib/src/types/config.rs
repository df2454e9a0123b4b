use eyre::Result;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub server: ServerConfig,
    pub regulation: RegulationConfig,
    pub hal: HalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP port the position server listens on.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulationConfig {
    /// Top speed percentage, handed to the arm with the longest way to go.
    pub max_speed_percent: u8,
    /// Delay between position polls while a move is in flight.
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HalConfig {
    pub backend: ArmBackend,
    /// How long homing drives into the mechanical end-stop.
    pub homing_drive_ms: u64,
    pub sim: SimConfig,
}

/// Which arm implementation backs the capability interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArmBackend {
    /// Pure software arms, no encoder model involved.
    Sim,
    /// Production arm logic driving simulated electronics.
    Bench,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Encoder count at full extension.
    pub max_position: i64,
    /// Simulated motor update tick.
    pub tick_ms: u64,
}

impl PlatformConfig {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: PlatformConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.regulation.max_speed_percent == 0 || self.regulation.max_speed_percent > 100 {
            return Err(eyre::eyre!(
                "max_speed_percent ({}) must be within 1..=100",
                self.regulation.max_speed_percent
            ));
        }

        if self.regulation.poll_interval_ms == 0 {
            return Err(eyre::eyre!("poll_interval_ms must be at least 1"));
        }

        if self.hal.sim.max_position <= 0 {
            return Err(eyre::eyre!(
                "sim max_position ({}) must be positive",
                self.hal.sim.max_position
            ));
        }

        if self.hal.sim.tick_ms == 0 {
            return Err(eyre::eyre!("sim tick_ms must be at least 1"));
        }

        Ok(())
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig { port: 4242 },
            regulation: RegulationConfig {
                max_speed_percent: 50,
                poll_interval_ms: 100,
            },
            hal: HalConfig {
                backend: ArmBackend::Sim,
                homing_drive_ms: 500,
                sim: SimConfig {
                    max_position: 1024,
                    tick_ms: 20,
                },
            },
        }
    }
}
