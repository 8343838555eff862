//! Physical transports: serial relay board and Modbus RTU boiler link

use crate::config::{FieldBusConfig, Parity, SerialConfig};
use crate::devices::{RegisterLink, RelayLink};
use crate::error::{PlantError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_modbus::client::{rtu, Context, Reader, Writer};
use tokio_modbus::Slave;
use tokio_serial::SerialStream;
use tracing::{debug, info, warn};

/// Relay board on a serial port
pub struct SerialRelayLink {
    port: Mutex<SerialStream>,
    settle_time: Duration,
}

impl SerialRelayLink {
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let builder = tokio_serial::new(config.port.as_str(), config.baud_rate);
        let port = SerialStream::open(&builder).map_err(|e| {
            PlantError::device_comm(format!("cannot open relay port {}: {e}", config.port))
        })?;
        info!(port = %config.port, baud = config.baud_rate, "Relay board port opened");

        Ok(Self {
            port: Mutex::new(port),
            settle_time: config.settle_time,
        })
    }
}

#[async_trait]
impl RelayLink for SerialRelayLink {
    async fn transact(&self, command: &str) -> Result<String> {
        let mut port = self.port.lock().await;
        port.write_all(command.as_bytes())
            .await
            .map_err(|e| PlantError::device_comm(format!("relay write failed: {e}")))?;
        tokio::time::sleep(self.settle_time).await;

        let mut buf = [0u8; 256];
        let read = port
            .read(&mut buf)
            .await
            .map_err(|e| PlantError::device_comm(format!("relay read failed: {e}")))?;
        let reply = String::from_utf8_lossy(&buf[..read]).into_owned();
        debug!(command = command.trim(), reply = reply.trim(), "Relay exchange");
        Ok(reply)
    }
}

/// Boiler controller over Modbus RTU; reopens the port on demand
pub struct ModbusRegisterLink {
    config: FieldBusConfig,
    context: Mutex<Option<Context>>,
}

impl ModbusRegisterLink {
    pub fn new(config: FieldBusConfig) -> Self {
        let context = match connect(&config) {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                warn!(port = %config.port, error = %e, "Boiler field bus not available yet");
                None
            }
        };
        Self {
            config,
            context: Mutex::new(context),
        }
    }
}

fn connect(config: &FieldBusConfig) -> Result<Context> {
    let parity = match config.parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Odd => tokio_serial::Parity::Odd,
    };
    let builder = tokio_serial::new(config.port.as_str(), config.baud_rate).parity(parity);
    let port = SerialStream::open(&builder).map_err(|e| {
        PlantError::not_connected(format!("cannot open field-bus port {}: {e}", config.port))
    })?;
    info!(port = %config.port, unit = config.unit_id, "Boiler field bus connected");
    Ok(rtu::attach_slave(port, Slave(config.unit_id)))
}

fn modbus_error(op: &str, address: u16, error: impl std::fmt::Debug) -> PlantError {
    PlantError::device_comm(format!("{op} at register {address} failed: {error:?}"))
}

#[async_trait]
impl RegisterLink for ModbusRegisterLink {
    async fn is_connected(&self) -> bool {
        let mut context = self.context.lock().await;
        if context.is_none() {
            *context = connect(&self.config).ok();
        }
        context.is_some()
    }

    async fn read_holding(&self, address: u16, count: u16) -> Result<Vec<u16>> {
        let mut guard = self.context.lock().await;
        let ctx = guard
            .as_mut()
            .ok_or_else(|| PlantError::not_connected("boiler field bus"))?;
        ctx.read_holding_registers(address, count)
            .await
            .map_err(|e| modbus_error("holding read", address, e))?
            .map_err(|code| modbus_error("holding read", address, code))
    }

    async fn read_input(&self, address: u16, count: u16) -> Result<Vec<u16>> {
        let mut guard = self.context.lock().await;
        let ctx = guard
            .as_mut()
            .ok_or_else(|| PlantError::not_connected("boiler field bus"))?;
        ctx.read_input_registers(address, count)
            .await
            .map_err(|e| modbus_error("input read", address, e))?
            .map_err(|code| modbus_error("input read", address, code))
    }

    async fn write_register(&self, address: u16, value: u16) -> Result<()> {
        let mut guard = self.context.lock().await;
        let ctx = guard
            .as_mut()
            .ok_or_else(|| PlantError::not_connected("boiler field bus"))?;
        ctx.write_single_register(address, value)
            .await
            .map_err(|e| modbus_error("register write", address, e))?
            .map_err(|code| modbus_error("register write", address, code))
    }
}
