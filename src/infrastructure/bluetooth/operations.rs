//! Device Operations
//!
//! Temperature query, IR learn and IR emit, built on a [`Session`] and its
//! notification routers. Every operation holds the session's command lock
//! for its whole run, so commands on one peripheral never interleave.

use crate::domain::error::{DeviceError, Result, Stage};
use crate::domain::models::{LearnData, LearnMode, SensorData, WriteSummary};
use crate::infrastructure::bluetooth::protocol::{self, DeviceCommand};
use crate::infrastructure::bluetooth::router::SubscriptionHandle;
use crate::infrastructure::bluetooth::session::Session;
use tracing::{debug, info, warn};

impl LearnMode {
    fn trigger(&self) -> DeviceCommand {
        match self {
            Self::Av => DeviceCommand::LearnAv,
            Self::Ac => DeviceCommand::LearnAc,
        }
    }
}

impl Session {
    /// Wait for the next frame on `subscription`, bounded by the session timeout.
    async fn next_frame(
        &self,
        subscription: &mut SubscriptionHandle,
        stage: Stage,
        writes: &WriteSummary,
    ) -> Result<Vec<u8>> {
        match tokio::time::timeout(self.timeout(), subscription.recv()).await {
            Ok(frame) => frame,
            Err(_) if !writes.is_complete() => {
                warn!(address = %self.address(), %stage, "Timed out after failed writes");
                Err(DeviceError::CommandNotSent {
                    stage,
                    failed_writes: writes.failed,
                })
            }
            Err(_) => {
                warn!(address = %self.address(), %stage, "Timed out");
                Err(DeviceError::Timeout { stage })
            }
        }
    }

    /// Read the temperature sensor.
    pub async fn get_temperature(&self) -> Result<SensorData> {
        let _command = self.command_lock.lock().await;
        self.discover().await?;
        let ready = self.ready_link()?;
        let map = *self.characteristics();

        let mut response = self
            .data
            .register(Some(Box::new(protocol::is_temperature_response)), 1);

        let mut writes = WriteSummary::default();
        self.send_command(&ready, map.control_write, DeviceCommand::EnableNotify, &mut writes)
            .await;
        self.send_command(&ready, map.data_write, DeviceCommand::QueryTemperature, &mut writes)
            .await;

        let frame = self
            .next_frame(&mut response, Stage::Temperature, &writes)
            .await?;
        let data = protocol::parse_temperature(&frame)?;
        info!(
            address = %self.address(),
            success = data.success,
            temperature = data.temperature,
            "Temperature read"
        );
        Ok(data)
    }

    pub async fn learn_av(&self) -> Result<LearnData> {
        self.learn(LearnMode::Av).await
    }

    pub async fn learn_ac(&self) -> Result<LearnData> {
        self.learn(LearnMode::Ac).await
    }

    /// Capture an IR code from a remote pointed at the peripheral.
    ///
    /// The exchange runs in two phases. The first control notification
    /// gates a status frame on the data source. The second announces how many
    /// data frames remain; the first of those carries a header, the rest are
    /// raw payload and the very last byte is a checksum.
    pub async fn learn(&self, mode: LearnMode) -> Result<LearnData> {
        let _command = self.command_lock.lock().await;
        self.discover().await?;
        let ready = self.ready_link()?;
        let map = *self.characteristics();

        let mut control = self.control.register(None, 2);
        let mut data = self.data.register(None, 2);

        let mut writes = WriteSummary::default();
        self.send_command(&ready, map.control_write, DeviceCommand::EnableNotify, &mut writes)
            .await;
        self.send_command(&ready, map.data_write, mode.trigger(), &mut writes)
            .await;
        info!(address = %self.address(), ?mode, "Learning, waiting for remote");

        self.next_frame(&mut control, Stage::LearnHandshake, &writes)
            .await?;
        let status = self
            .next_frame(&mut data, Stage::LearnStatus, &writes)
            .await?;
        if protocol::is_device_failure(&status)? {
            info!(address = %self.address(), "Peripheral rejected learn request");
            return Ok(LearnData::failed());
        }

        let count = self
            .next_frame(&mut control, Stage::LearnPacketCount, &writes)
            .await?;
        let packets = protocol::parse_packet_count(&count)?;
        debug!(address = %self.address(), packets, "Learn packet count");
        // The header frame is always sent, even when the count says otherwise.
        let mut remaining = u32::from(packets.max(1));
        data.set_life(remaining);

        let header = self
            .next_frame(&mut data, Stage::LearnHeader, &writes)
            .await?;
        remaining -= 1;
        let mut result = protocol::parse_learn_header(&header)?;
        if !result.have_data {
            return Ok(result);
        }

        // A frame lost to backpressure closes the subscription, so a short
        // capture fails here instead of being returned.
        while remaining > 0 {
            let chunk = self
                .next_frame(&mut data, Stage::LearnPayload, &writes)
                .await?;
            remaining -= 1;
            protocol::append_learn_chunk(&mut result, &chunk);
        }
        protocol::strip_learn_checksum(&mut result);

        info!(
            address = %self.address(),
            bytes = result.data.len() / 2,
            "Learned IR code"
        );
        Ok(result)
    }

    /// Transmit a hex-encoded IR code.
    ///
    /// Writes are best-effort: the returned summary reports how many failed.
    pub async fn emit_data(&self, ir_hex: &str) -> Result<WriteSummary> {
        let plan = protocol::encode_emit(ir_hex)?;

        let _command = self.command_lock.lock().await;
        self.discover().await?;
        let ready = self.ready_link()?;
        let map = *self.characteristics();

        let mut writes = WriteSummary::default();
        self.write(&ready, map.control_write, &[plan.frame_count], &mut writes)
            .await;
        for frame in &plan.frames {
            self.write(&ready, map.data_write, frame, &mut writes).await;
        }

        if writes.is_complete() {
            info!(
                address = %self.address(),
                frames = plan.frames.len(),
                checksum = plan.checksum,
                "IR code emitted"
            );
        } else {
            warn!(
                address = %self.address(),
                failed = writes.failed,
                attempted = writes.attempted,
                "IR code only partially transmitted"
            );
        }
        Ok(writes)
    }
}
