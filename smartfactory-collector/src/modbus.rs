//! Modbus TCP/RTU driver.
//!
//! Keeps one client context open between polls. Exception responses from the
//! controller and floats that decode to NaN or infinity become `bad`-quality
//! readings for the affected tag; transport errors end the session.

use async_trait::async_trait;
use smartfactory_common::{Reading, TagValue};
use tokio_modbus::client::{Context, Reader};
use tokio_modbus::prelude::*;
use tracing::{debug, warn};

use crate::config::{ConnectionConfig, DataType, ModbusDriverConfig, ModbusTag, RegisterType};
use crate::driver::{ControllerDriver, tag_reading};
use crate::error::{ControllerError, Result};

/// Outcome of reading a single tag.
enum TagRead {
    Value(TagValue),
    Exception(String),
}

/// Driver for one Modbus controller.
pub struct ModbusDriver {
    endpoint: String,
    config: ModbusDriverConfig,
    ctx: Option<Context>,
}

impl ModbusDriver {
    pub fn new(endpoint: impl Into<String>, config: ModbusDriverConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            ctx: None,
        }
    }

    async fn open(config: &ModbusDriverConfig) -> Result<Context> {
        let slave = Slave(config.unit_id);

        match &config.connection {
            ConnectionConfig::Tcp { host, port } => {
                let addr = tokio::net::lookup_host((host.as_str(), *port))
                    .await
                    .map_err(|e| ControllerError::Connection(format!("Resolve {}: {}", host, e)))?
                    .next()
                    .ok_or_else(|| {
                        ControllerError::Connection(format!("No address for {}", host))
                    })?;

                tcp::connect_slave(addr, slave)
                    .await
                    .map_err(|e| ControllerError::Connection(format!("{}: {}", addr, e)))
            }
            ConnectionConfig::Rtu {
                port,
                baud_rate,
                data_bits,
                parity,
                stop_bits,
            } => {
                let parity = match parity.to_lowercase().as_str() {
                    "even" => tokio_serial::Parity::Even,
                    "odd" => tokio_serial::Parity::Odd,
                    _ => tokio_serial::Parity::None,
                };

                let stop_bits = match stop_bits {
                    2 => tokio_serial::StopBits::Two,
                    _ => tokio_serial::StopBits::One,
                };

                let data_bits = match data_bits {
                    5 => tokio_serial::DataBits::Five,
                    6 => tokio_serial::DataBits::Six,
                    7 => tokio_serial::DataBits::Seven,
                    _ => tokio_serial::DataBits::Eight,
                };

                let builder = tokio_serial::new(port, *baud_rate)
                    .parity(parity)
                    .stop_bits(stop_bits)
                    .data_bits(data_bits);

                let serial = tokio_serial::SerialStream::open(&builder).map_err(|e| {
                    ControllerError::Connection(format!("Serial open {}: {}", port, e))
                })?;

                Ok(rtu::attach_slave(serial, slave))
            }
        }
    }
}

#[async_trait]
impl ControllerDriver for ModbusDriver {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&mut self) -> Result<()> {
        // Drop any stale context before opening a new one.
        self.ctx = None;
        let ctx = Self::open(&self.config).await?;
        self.ctx = Some(ctx);
        debug!(endpoint = %self.endpoint, "Modbus session opened");
        Ok(())
    }

    async fn poll(&mut self) -> Result<Vec<Reading>> {
        let ctx = self.ctx.as_mut().ok_or(ControllerError::NotConnected)?;
        let mut readings = Vec::with_capacity(self.config.tags.len());

        for tag in &self.config.tags {
            match read_tag(ctx, tag).await {
                Ok(TagRead::Value(value)) => {
                    let reading = tag_reading(&self.endpoint, &tag.name, value);
                    if reading.value.is_none() {
                        warn!(
                            endpoint = %self.endpoint,
                            tag = %tag.name,
                            address = tag.address,
                            data_type = ?tag.data_type,
                            "Register decoded to a non-finite float, recording bad reading"
                        );
                    }
                    readings.push(reading);
                }
                Ok(TagRead::Exception(reason)) => {
                    warn!(
                        endpoint = %self.endpoint,
                        tag = %tag.name,
                        register_type = tag.register_type.as_str(),
                        address = tag.address,
                        reason = %reason,
                        "Modbus exception, recording bad reading"
                    );
                    readings.push(Reading::bad(&self.endpoint, &tag.name));
                }
                Err(e) => {
                    self.ctx = None;
                    return Err(e);
                }
            }
        }

        Ok(readings)
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut ctx) = self.ctx.take() {
            if let Err(e) = ctx.disconnect().await {
                debug!(endpoint = %self.endpoint, error = %e, "Modbus disconnect failed");
            }
        }
        Ok(())
    }
}

async fn read_tag(ctx: &mut Context, tag: &ModbusTag) -> Result<TagRead> {
    let transport = |e: tokio_modbus::Error| ControllerError::Connection(e.to_string());

    match tag.register_type {
        RegisterType::Coil | RegisterType::Discrete => {
            let response = if tag.register_type == RegisterType::Coil {
                ctx.read_coils(tag.address, 1).await
            } else {
                ctx.read_discrete_inputs(tag.address, 1).await
            }
            .map_err(transport)?;

            match response {
                Ok(bits) => bits
                    .first()
                    .map(|bit| TagRead::Value(TagValue::Boolean(*bit)))
                    .ok_or_else(|| ControllerError::Protocol("Empty bit response".to_string())),
                Err(code) => Ok(TagRead::Exception(format!("{:?}", code))),
            }
        }
        RegisterType::Input | RegisterType::Holding => {
            let count = tag.data_type.register_count();
            let response = if tag.register_type == RegisterType::Input {
                ctx.read_input_registers(tag.address, count).await
            } else {
                ctx.read_holding_registers(tag.address, count).await
            }
            .map_err(transport)?;

            match response {
                Ok(words) => decode_tag(&words, tag).map(TagRead::Value).ok_or_else(|| {
                    ControllerError::Protocol(format!(
                        "Expected {} registers for '{}', got {}",
                        count,
                        tag.name,
                        words.len()
                    ))
                }),
                Err(code) => Ok(TagRead::Exception(format!("{:?}", code))),
            }
        }
    }
}

/// Decode raw register words into a tag value.
///
/// Unscaled integer types stay integers; floats and scaled values become
/// floats. Returns `None` if too few words were returned.
pub fn decode_tag(words: &[u16], tag: &ModbusTag) -> Option<TagValue> {
    let raw = decode_raw(words, tag.data_type)?;

    if tag.is_scaled() || tag.data_type.is_float() {
        Some(TagValue::Float(raw.as_f64() * tag.scale + tag.offset))
    } else {
        Some(raw)
    }
}

fn decode_raw(words: &[u16], data_type: DataType) -> Option<TagValue> {
    let word = |i: usize| words.get(i).copied();
    let be = || Some(((word(0)? as u32) << 16) | word(1)? as u32);
    let le = || Some(((word(1)? as u32) << 16) | word(0)? as u32);

    let value = match data_type {
        DataType::U16 => TagValue::Integer(word(0)? as i64),
        DataType::I16 => TagValue::Integer(word(0)? as i16 as i64),
        DataType::U32 => TagValue::Integer(be()? as i64),
        DataType::I32 => TagValue::Integer(be()? as i32 as i64),
        DataType::F32 => TagValue::Float(f32::from_bits(be()?) as f64),
        DataType::U32Le => TagValue::Integer(le()? as i64),
        DataType::I32Le => TagValue::Integer(le()? as i32 as i64),
        DataType::F32Le => TagValue::Float(f32::from_bits(le()?) as f64),
    };

    Some(value)
}
