//! HTTP adapter for the IO-Link master that hosts the belt sensors.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use super::{DriverFuture, SensorGateway, SensorReading};
use crate::{AppError, Result};

/// IO-Link status code for a valid process-data read.
const STATUS_OK: u64 = 200;

/// Process-data path of the device on `port`.
#[must_use]
pub fn pdin_path(port: u8) -> String {
    format!("/iolinkmaster/port[{port}]/iolinkdevice/pdin")
}

/// Request body for a single `getdatamulti` read of `port`.
#[must_use]
pub fn request_body(port: u8) -> Value {
    json!({
        "code": "request",
        "cid": 1,
        "adr": "/getdatamulti",
        "data": { "datatosend": [pdin_path(port)] }
    })
}

/// Extract the distance for `port` from a `getdatamulti` response.
///
/// The first process-data byte carries the distance. Any other shape,
/// including a non-200 device code, is out of range.
#[must_use]
pub fn parse_response(body: &Value, port: u8) -> SensorReading {
    let entry = &body["data"][pdin_path(port)];
    if entry["code"].as_u64() != Some(STATUS_OK) {
        return SensorReading::OutOfRange;
    }
    entry["data"]
        .as_str()
        .and_then(|hex| hex.get(0..2))
        .and_then(|byte| u16::from_str_radix(byte, 16).ok())
        .map_or(SensorReading::OutOfRange, SensorReading::Distance)
}

/// Sensor gateway backed by the IO-Link master's JSON endpoint.
pub struct IoLinkGateway {
    client: reqwest::Client,
    url: String,
}

impl IoLinkGateway {
    /// Build a gateway client for `url`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Startup` if the HTTP client cannot be constructed.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Startup(format!("failed to build sensor client: {err}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn fetch(&self, port: u8) -> std::result::Result<Value, reqwest::Error> {
        self.client
            .post(&self.url)
            .json(&request_body(port))
            .send()
            .await?
            .json::<Value>()
            .await
    }
}

impl SensorGateway for IoLinkGateway {
    fn read_distance(&self, sensor: u8) -> DriverFuture<'_, SensorReading> {
        Box::pin(async move {
            match self.fetch(sensor).await {
                Ok(body) => parse_response(&body, sensor),
                Err(err) => {
                    debug!(sensor, %err, "sensor read failed, treating as out of range");
                    SensorReading::OutOfRange
                }
            }
        })
    }
}
