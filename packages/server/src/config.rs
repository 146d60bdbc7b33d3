use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use arbiter::{DeviceModel, EngineConfig};
use dotenvy::dotenv;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub engine: EngineConfig,
    /// How often the simulated device drains its battery while busy.
    pub sim_drain_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            device_model: parse_var::<DeviceModel>("ARBITER_DEVICE_MODEL", defaults.device_model)?,
            critical_battery: parse_var("ARBITER_CRITICAL_BATTERY", defaults.critical_battery)?,
            low_battery: parse_var("ARBITER_LOW_BATTERY", defaults.low_battery)?,
            battery_notices: parse_var("ARBITER_BATTERY_NOTICES", defaults.battery_notices)?,
            bus_capacity: parse_var("ARBITER_BUS_CAPACITY", defaults.bus_capacity)?,
            dispatch_retries: parse_var("ARBITER_DISPATCH_RETRIES", defaults.dispatch_retries)?,
            ..defaults
        };
        engine.validate().context("Invalid arbiter configuration")?;

        Ok(Self {
            port: parse_var("PORT", 8080)?,
            engine,
            sim_drain_interval: Duration::from_secs(parse_var(
                "ARBITER_SIM_DRAIN_INTERVAL_SECS",
                30,
            )?),
        })
    }
}

/// Read `name`, falling back to `default` when it is unset.
fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| {
            anyhow!("{} must be a valid {}: {}", name, std::any::type_name::<T>(), e)
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_falls_back_when_unset() {
        let value: u8 = parse_var("ARBITER_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_var_reports_bad_values() {
        env::set_var("ARBITER_TEST_BAD_NUMBER", "lots");
        let err = parse_var::<u8>("ARBITER_TEST_BAD_NUMBER", 1).unwrap_err();
        assert!(err.to_string().contains("ARBITER_TEST_BAD_NUMBER"));
        env::remove_var("ARBITER_TEST_BAD_NUMBER");
    }

    #[test]
    fn test_parse_var_reads_device_model_aliases() {
        env::set_var("ARBITER_TEST_MODEL_ALIAS", " LED-only ");
        let model = parse_var("ARBITER_TEST_MODEL_ALIAS", DeviceModel::Bolt).unwrap();
        assert_eq!(model, DeviceModel::LedOnly);
        env::remove_var("ARBITER_TEST_MODEL_ALIAS");

        env::set_var("ARBITER_TEST_MODEL_UNKNOWN", "sprk");
        let err = parse_var("ARBITER_TEST_MODEL_UNKNOWN", DeviceModel::Bolt).unwrap_err();
        assert!(err.to_string().contains("unknown device model"));
        env::remove_var("ARBITER_TEST_MODEL_UNKNOWN");
    }
}
