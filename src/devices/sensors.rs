//! Water temperature probes on the 1-Wire bus

use crate::config::SensorConfig;
use crate::error::{PlantError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Return and supply water temperatures in °F
#[async_trait]
pub trait WaterSensors: Send + Sync {
    async fn return_temp(&self) -> Result<f64>;
    async fn supply_temp(&self) -> Result<f64>;
}

const CRC_ATTEMPTS: u32 = 5;
const CRC_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Reads `w1_slave` files under the 1-Wire mount point
pub struct OneWireSensors {
    mount_point: PathBuf,
    return_id: String,
    supply_id: String,
}

impl OneWireSensors {
    pub fn new(config: &SensorConfig) -> Self {
        Self {
            mount_point: config.mount_point.clone(),
            return_id: config.return_sensor_id.clone(),
            supply_id: config.supply_sensor_id.clone(),
        }
    }

    async fn read_probe(&self, sensor_id: &str) -> Result<f64> {
        let path = self.mount_point.join(sensor_id).join("w1_slave");

        for attempt in 1..=CRC_ATTEMPTS {
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                PlantError::sensor(format!("cannot read {}: {e}", path.display()))
            })?;

            match parse_w1_slave(&content) {
                Ok(Some(fahrenheit)) => {
                    debug!(sensor = sensor_id, temp = fahrenheit, "Probe read");
                    return Ok(fahrenheit);
                }
                Ok(None) => {
                    debug!(sensor = sensor_id, attempt = attempt, "Probe CRC not ready");
                    tokio::time::sleep(CRC_RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }

        warn!(sensor = sensor_id, "Probe CRC never confirmed");
        Err(PlantError::sensor(format!("{sensor_id}: CRC check failed")))
    }
}

#[async_trait]
impl WaterSensors for OneWireSensors {
    async fn return_temp(&self) -> Result<f64> {
        self.read_probe(&self.return_id).await
    }

    async fn supply_temp(&self) -> Result<f64> {
        self.read_probe(&self.supply_id).await
    }
}

/// Parse a `w1_slave` file; `Ok(None)` while the CRC line is not `YES`
pub fn parse_w1_slave(content: &str) -> Result<Option<f64>> {
    let mut lines = content.lines();
    let crc_line = lines.next().unwrap_or_default();
    if !crc_line.trim_end().ends_with("YES") {
        return Ok(None);
    }

    let data_line = lines.next().unwrap_or_default();
    let raw = data_line
        .split_once("t=")
        .map(|(_, value)| value.trim())
        .ok_or_else(|| PlantError::sensor("w1_slave has no t= field"))?;
    let millidegrees: f64 = raw
        .parse()
        .map_err(|_| PlantError::sensor(format!("bad t= value: {raw}")))?;

    let celsius = millidegrees / 1000.0;
    Ok(Some(((celsius * 9.0 / 5.0 + 32.0) * 10.0).round() / 10.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n72 01 4b 46 7f ff 0e 10 57 t=23125\n";

    #[test]
    fn test_parse_w1_slave() {
        assert_eq!(parse_w1_slave(SAMPLE).unwrap(), Some(73.6));
        let pending = SAMPLE.replace("YES", "NO");
        assert_eq!(parse_w1_slave(&pending).unwrap(), None);
        assert!(parse_w1_slave("crc=00 YES\ngarbage\n").is_err());
    }

    #[tokio::test]
    async fn test_reads_probe_file() {
        let dir = tempfile::tempdir().unwrap();
        let probe = dir.path().join("28-abc");
        std::fs::create_dir_all(&probe).unwrap();
        std::fs::write(probe.join("w1_slave"), SAMPLE).unwrap();

        let sensors = OneWireSensors::new(&SensorConfig {
            mount_point: dir.path().to_path_buf(),
            return_sensor_id: "28-abc".to_string(),
            supply_sensor_id: "28-missing".to_string(),
        });

        assert_eq!(sensors.return_temp().await.unwrap(), 73.6);
        assert!(matches!(sensors.supply_temp().await, Err(PlantError::Sensor(_))));
    }
}
