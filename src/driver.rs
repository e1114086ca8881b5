//! The [`Mipot`] command driver.
//!
//! Combines the transport, frame codec and session state machine into the
//! caller-facing request/reply driver. The module's protocol is strictly one
//! outstanding command at a time, so the driver holds one lock across a full
//! request/response cycle; indications arriving in between are queued, never
//! dropped.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{Error, Result, TransmitFailure};
use crate::lpp::{self, Reading};
use crate::protocol::frame::FrameDecoder;
use crate::protocol::response::{self, ActivationStatus, Indication, Response, SessionStatus};
use crate::protocol::{self, Command, JoinMode};
use crate::session::{SessionFault, SessionState, SessionTracker};
use crate::transport::serial::SerialConfig;
use crate::transport::{SerialTransport, Transport};
use crate::types::{DataRate, DevEui, Downlink, JoinCredentials, UplinkReport};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Default overall join window.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum uplink payload in bytes.
///
/// Conservative EU868 value that fits every data rate down to DR0; raise it
/// when the module is known to run at a higher data rate (the module's own
/// hard limit is 209 bytes).
pub const DEFAULT_MAX_PAYLOAD: usize = 51;

/// How many queued indications to keep before dropping the oldest.
const PENDING_INDICATION_LIMIT: usize = 32;

/// How long the module takes to boot after a soft reset.
const RESET_SETTLE: Duration = Duration::from_secs(2);

/// Tunable timeouts and limits for the driver.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Timeout for a single command/reply cycle.
    pub request_timeout: Duration,
    /// Total attempts per command, transient failures included.
    pub max_attempts: u32,
    /// Overall window for the join handshake.
    pub join_timeout: Duration,
    /// Interval between activation status polls while joining.
    pub join_poll_interval: Duration,
    /// How long to wait for the transmit completion indication.
    pub uplink_timeout: Duration,
    /// Maximum uplink payload size in bytes.
    pub max_payload: usize,
    /// LoRaWAN frame port for uplinks (1-223).
    pub port: u8,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_attempts: 3,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            join_poll_interval: Duration::from_secs(1),
            uplink_timeout: Duration::from_secs(60),
            max_payload: DEFAULT_MAX_PAYLOAD,
            port: 1,
        }
    }
}

impl DriverConfig {
    /// Sets the per-request timeout.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the total attempts per command.
    #[must_use]
    pub const fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the overall join window.
    #[must_use]
    pub const fn join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Sets the activation status poll interval.
    #[must_use]
    pub const fn join_poll_interval(mut self, interval: Duration) -> Self {
        self.join_poll_interval = interval;
        self
    }

    /// Sets the transmit indication timeout.
    #[must_use]
    pub const fn uplink_timeout(mut self, timeout: Duration) -> Self {
        self.uplink_timeout = timeout;
        self
    }

    /// Sets the maximum uplink payload size.
    #[must_use]
    pub const fn max_payload(mut self, max: usize) -> Self {
        self.max_payload = max;
        self
    }

    /// Sets the LoRaWAN frame port for uplinks.
    #[must_use]
    pub const fn port(mut self, port: u8) -> Self {
        self.port = port;
        self
    }
}

/// Everything that must be serialized per request/response cycle.
struct Inner<T> {
    transport: T,
    decoder: FrameDecoder,
    pending: VecDeque<Indication>,
    session: SessionTracker,
}

/// Driver for a Mipot 32001353 LoRaWAN module.
pub struct Mipot<T> {
    inner: Mutex<Inner<T>>,
    config: DriverConfig,
}

impl Mipot<SerialTransport> {
    /// Creates a driver for a module on the given serial port.
    #[must_use]
    pub fn serial(port: impl Into<String>) -> Self {
        Self::with_serial_config(SerialConfig::new(port))
    }

    /// Creates a driver with custom serial settings.
    #[must_use]
    pub fn with_serial_config(config: SerialConfig) -> Self {
        Self::new(SerialTransport::new(config))
    }
}

impl<T: Transport> Mipot<T> {
    /// Creates a driver over any transport with default settings.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, DriverConfig::default())
    }

    /// Creates a driver over any transport with the given configuration.
    #[must_use]
    pub fn with_config(transport: T, config: DriverConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                transport,
                decoder: FrameDecoder::new(),
                pending: VecDeque::new(),
                session: SessionTracker::new(),
            }),
            config,
        }
    }

    /// Returns the driver configuration.
    #[must_use]
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Opens the transport.
    pub async fn connect(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.transport.connect().await
    }

    /// Closes the transport.
    pub async fn disconnect(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.transport.disconnect().await
    }

    /// Returns true if the transport is connected.
    pub async fn is_connected(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.transport.is_connected()
    }

    // ==================== Caller-facing operations ====================

    /// Reads the device EUI. Valid in any state.
    pub async fn get_identity(&self) -> Result<DevEui> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let response = self.request(inner, &Command::get_device_eui()).await?;
        let payload = response.fixed_payload(8)?;
        // The module reports the EUI LSB first.
        let mut eui = [0u8; 8];
        eui.copy_from_slice(payload);
        eui.reverse();
        Ok(DevEui::from_bytes(eui))
    }

    /// Writes the OTAA join credentials.
    ///
    /// Valid before joining, and the explicit recovery path out of a session
    /// error. Transitions the session to `Configured` on success.
    pub async fn set_join_credentials(&self, credentials: &JoinCredentials) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        // Precondition before any byte goes out.
        match inner.session.state() {
            SessionState::Uninitialized | SessionState::Configured | SessionState::Error(_) => {}
            state => {
                return Err(Error::InvalidState {
                    operation: "set_join_credentials",
                    state,
                });
            }
        }

        // The key write reply carries no status; getting the echo back is
        // the acknowledgment.
        let response = self
            .request(inner, &Command::set_app_key(&credentials.app_key))
            .await?;
        response.fixed_payload(0)?;

        let response = self
            .request(inner, &Command::set_app_eui(credentials))
            .await?;
        let status = response.status()?;
        if status != 0 {
            return Err(Error::Config {
                reason: format!("application EUI write failed with status 0x{status:02X}"),
            });
        }

        inner.session.configure()?;
        tracing::info!("join credentials written");
        Ok(())
    }

    /// Runs the OTAA join handshake.
    ///
    /// Valid only in `Configured`. The module joins in the background, so
    /// the driver polls the activation status at the configured interval
    /// until the module reports joined, fails, or the join window elapses.
    pub async fn join(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        inner.session.begin_join()?;

        let response = match self.request(inner, &Command::join(JoinMode::Otaa)).await {
            Ok(response) => response,
            Err(e) => {
                inner.session.abort_join();
                return Err(e);
            }
        };
        if let Some(failure) = response::join_failure(response.status()?) {
            // The handshake never started; the session stays configured.
            inner.session.abort_join();
            return Err(failure.into());
        }

        tracing::info!("join accepted, waiting for network activation");
        let deadline = Instant::now() + self.config.join_timeout;
        loop {
            // The module announces the outcome with an indication; prefer
            // that over the next status poll.
            Self::pump_decoder(inner);
            if let Some(pos) = inner
                .pending
                .iter()
                .position(|i| matches!(i, Indication::Join { .. }))
            {
                if let Some(Indication::Join { success }) = inner.pending.remove(pos) {
                    return self.finish_join(inner, success);
                }
            }

            // Listen for the indication until the next poll tick.
            match inner.transport.read(self.config.join_poll_interval).await {
                Ok(chunk) => {
                    inner.decoder.feed(&chunk);
                    continue;
                }
                Err(Error::Timeout { .. }) => {}
                Err(e) => return Err(e),
            }

            match self.activation_status(inner).await? {
                ActivationStatus::Joined => return self.finish_join(inner, true),
                ActivationStatus::MacError => {
                    inner.session.fail(SessionFault::MacError);
                    return Err(crate::error::JoinFailure::MacError.into());
                }
                ActivationStatus::Joining | ActivationStatus::NotActivated => {}
            }

            if Instant::now() >= deadline {
                inner.session.fail(SessionFault::JoinTimeout);
                return Err(crate::error::JoinFailure::Timeout {
                    timeout_ms: as_millis(self.config.join_timeout),
                }
                .into());
            }
        }
    }

    fn finish_join(&self, inner: &mut Inner<T>, success: bool) -> Result<()> {
        if success {
            inner.session.complete_join();
            tracing::info!("joined the network");
            Ok(())
        } else {
            inner.session.fail(SessionFault::JoinRejected);
            Err(crate::error::JoinFailure::Rejected.into())
        }
    }

    /// Returns true when the module is idle and can accept an uplink.
    pub async fn is_ready_to_send(&self) -> Result<bool> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let response = self.request(inner, &Command::get_session_status()).await?;
        let status = response.status()?;
        let status = SessionStatus::from_byte(status).ok_or_else(|| Error::Protocol {
            message: format!("unknown session status 0x{status:02X}"),
        })?;
        match status {
            SessionStatus::Idle => Ok(true),
            SessionStatus::NotActivated => {
                // Out-of-band session loss, e.g. a module reboot.
                if matches!(
                    inner.session.state(),
                    SessionState::Joined | SessionState::Joining
                ) {
                    tracing::warn!("module lost its network session");
                    inner.session.reset();
                }
                Ok(false)
            }
            SessionStatus::Busy | SessionStatus::Delayed => Ok(false),
        }
    }

    /// Queues an uplink and waits for the module to finish transmitting.
    ///
    /// Valid only in `Joined`. For confirmed uplinks a missing network
    /// acknowledgment is an error, never silently ignored.
    pub async fn send_uplink(&self, payload: Bytes, confirmed: bool) -> Result<UplinkReport> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        inner.session.require_joined("send_uplink")?;
        if payload.is_empty() || payload.len() > self.config.max_payload {
            return Err(TransmitFailure::LengthNotSupported.into());
        }

        let command = Command::transmit(self.config.port, confirmed, &payload);
        let response = self.request(inner, &command).await?;
        if let Some(failure) = response::transmit_failure(response.status()?) {
            if failure == TransmitFailure::NotActivated {
                tracing::warn!("module lost its network session");
                inner.session.reset();
            }
            return Err(failure.into());
        }

        match self.wait_tx_indication(inner, confirmed).await? {
            Indication::TxConfirmed {
                success,
                data_rate,
                tx_power_dbm,
                acknowledged,
                retries,
            } => {
                if !success {
                    return Err(TransmitFailure::Failed.into());
                }
                if !acknowledged {
                    return Err(TransmitFailure::NoAck.into());
                }
                Ok(UplinkReport {
                    confirmed: true,
                    data_rate,
                    tx_power_dbm,
                    acknowledged,
                    retries,
                })
            }
            Indication::TxUnconfirmed {
                success,
                data_rate,
                tx_power_dbm,
            } => {
                if success {
                    Ok(UplinkReport {
                        confirmed: false,
                        data_rate,
                        tx_power_dbm,
                        acknowledged: false,
                        retries: 0,
                    })
                } else {
                    Err(TransmitFailure::Failed.into())
                }
            }
            other => Err(Error::Protocol {
                message: format!("unexpected indication while transmitting: {other:?}"),
            }),
        }
    }

    /// Encodes sensor readings as Cayenne LPP and sends them as an uplink.
    pub async fn send_readings(
        &self,
        readings: &[Reading],
        confirmed: bool,
    ) -> Result<UplinkReport> {
        let payload = lpp::encode(readings, self.config.max_payload)?;
        self.send_uplink(payload, confirmed).await
    }

    /// Returns the session state, reconciled against the module's live
    /// activation status to catch out-of-band changes such as a reboot.
    pub async fn get_status(&self) -> Result<SessionState> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let live = self.activation_status(inner).await?;
        match live {
            ActivationStatus::Joined => inner.session.complete_join(),
            ActivationStatus::MacError => inner.session.fail(SessionFault::MacError),
            ActivationStatus::NotActivated => {
                if matches!(
                    inner.session.state(),
                    SessionState::Joined | SessionState::Joining
                ) {
                    tracing::warn!("module reports no session, assuming reboot");
                    inner.session.reset();
                }
            }
            ActivationStatus::Joining => {}
        }
        Ok(inner.session.state())
    }

    /// Hands out the oldest buffered downlink, if any arrived.
    pub async fn take_downlink(&self) -> Option<Downlink> {
        let mut inner = self.inner.lock().await;
        let pos = inner
            .pending
            .iter()
            .position(|i| matches!(i, Indication::Rx(_)))?;
        match inner.pending.remove(pos) {
            Some(Indication::Rx(downlink)) => Some(downlink),
            _ => None,
        }
    }

    // ==================== Module housekeeping ====================

    /// Soft-resets the module. The network session is lost.
    pub async fn reset(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        self.request(inner, &Command::reset()).await?;
        inner.session.reset();
        tokio::time::sleep(RESET_SETTLE).await;
        Ok(())
    }

    /// Restores the module's factory defaults. The network session is lost.
    pub async fn factory_reset(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let response = self.request(inner, &Command::factory_reset()).await?;
        let status = response.status()?;
        if status != 0 {
            return Err(Error::Config {
                reason: format!("factory reset failed with status 0x{status:02X}"),
            });
        }
        inner.session.reset();
        Ok(())
    }

    /// Reads the module firmware version.
    pub async fn get_firmware_version(&self) -> Result<u32> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let response = self.request(inner, &Command::get_fw_version()).await?;
        let payload = response.fixed_payload(4)?;
        Ok(u32::from_le_bytes([
            payload[0], payload[1], payload[2], payload[3],
        ]))
    }

    /// Reads the module serial number.
    pub async fn get_serial_number(&self) -> Result<u32> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let response = self.request(inner, &Command::get_serial_no()).await?;
        let payload = response.fixed_payload(4)?;
        Ok(u32::from_le_bytes([
            payload[0], payload[1], payload[2], payload[3],
        ]))
    }

    /// Sets the battery level the MAC layer reports to the network.
    ///
    /// 0 means mains powered, 1-254 is the level, 255 means unmeasurable.
    pub async fn set_battery_level(&self, level: u8) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let response = self
            .request(inner, &Command::set_battery_level(level))
            .await?;
        response.fixed_payload(0)?;
        Ok(())
    }

    /// Reads back the battery level previously set.
    pub async fn get_battery_level(&self) -> Result<u8> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let response = self.request(inner, &Command::get_battery_level()).await?;
        let payload = response.fixed_payload(1)?;
        Ok(payload[0])
    }

    /// Sets the data rate for the next uplink.
    pub async fn set_data_rate(&self, data_rate: DataRate) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let response = self
            .request(inner, &Command::set_next_data_rate(data_rate))
            .await?;
        let status = response.status()?;
        if status != 0 {
            return Err(Error::Config {
                reason: format!("data rate change failed with status 0x{status:02X}"),
            });
        }
        Ok(())
    }

    // ==================== Request/response core ====================

    /// Issues one command, re-sending it unchanged on transient failures up
    /// to the attempt bound. Semantic rejections are surfaced immediately.
    async fn request(&self, inner: &mut Inner<T>, command: &Command) -> Result<Response> {
        let frame = protocol::encode_frame(command);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self
                .request_once(inner, &frame, command.reply_opcode())
                .await
            {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    tracing::warn!(
                        "command 0x{:02X} attempt {attempt} failed ({e}), re-sending",
                        u8::from(command.opcode())
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request_once(
        &self,
        inner: &mut Inner<T>,
        frame: &Bytes,
        reply_opcode: u8,
    ) -> Result<Response> {
        // A late reply to an abandoned request may still be buffered; it
        // must not be matched against this command.
        Self::drain_stale(inner);

        inner.transport.write(frame.clone()).await?;

        let deadline = Instant::now() + self.config.request_timeout;
        loop {
            while let Some(raw) = inner.decoder.decode()? {
                if response::is_indication(raw.opcode) {
                    Self::queue_indication(inner, &raw);
                } else if raw.opcode == reply_opcode {
                    return Ok(Response::from(raw));
                } else {
                    tracing::warn!("discarding unexpected reply 0x{:02X}", raw.opcode);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout {
                    timeout_ms: as_millis(self.config.request_timeout),
                });
            }
            let chunk = inner.transport.read(deadline - now).await?;
            inner.decoder.feed(&chunk);
        }
    }

    /// Waits for the transmit completion indication matching the uplink kind.
    async fn wait_tx_indication(
        &self,
        inner: &mut Inner<T>,
        confirmed: bool,
    ) -> Result<Indication> {
        let matches_kind = |i: &Indication| {
            matches!(
                (confirmed, i),
                (true, Indication::TxConfirmed { .. })
                    | (false, Indication::TxUnconfirmed { .. })
            )
        };

        let deadline = Instant::now() + self.config.uplink_timeout;
        loop {
            if let Some(pos) = inner.pending.iter().position(matches_kind) {
                if let Some(indication) = inner.pending.remove(pos) {
                    return Ok(indication);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(TransmitFailure::Timeout {
                    timeout_ms: as_millis(self.config.uplink_timeout),
                }
                .into());
            }
            let chunk = match inner.transport.read(deadline - now).await {
                Ok(chunk) => chunk,
                Err(Error::Timeout { .. }) => continue,
                Err(e) => return Err(e),
            };
            inner.decoder.feed(&chunk);
            Self::pump_decoder(inner);
        }
    }

    async fn activation_status(&self, inner: &mut Inner<T>) -> Result<ActivationStatus> {
        let response = self
            .request(inner, &Command::get_activation_status())
            .await?;
        let status = response.status()?;
        ActivationStatus::from_byte(status).ok_or_else(|| Error::Protocol {
            message: format!("unknown activation status 0x{status:02X}"),
        })
    }

    /// Decodes every complete buffered frame, queueing indications and
    /// dropping stray replies nothing is waiting for.
    fn pump_decoder(inner: &mut Inner<T>) {
        loop {
            match inner.decoder.decode() {
                Ok(Some(raw)) if response::is_indication(raw.opcode) => {
                    Self::queue_indication(inner, &raw);
                }
                Ok(Some(raw)) => {
                    tracing::warn!("discarding unexpected reply 0x{:02X}", raw.opcode);
                }
                Ok(None) => break,
                Err(e) => tracing::warn!("dropping corrupt frame: {e}"),
            }
        }
    }

    /// Flushes buffered frames and partial bytes left over from an
    /// abandoned request, so a late reply is never matched against the
    /// next command.
    fn drain_stale(inner: &mut Inner<T>) {
        Self::pump_decoder(inner);
        inner.decoder.clear();
    }

    fn queue_indication(inner: &mut Inner<T>, raw: &crate::protocol::RawFrame) {
        match Indication::parse(raw) {
            Ok(indication) => {
                if inner.pending.len() >= PENDING_INDICATION_LIMIT {
                    tracing::warn!("indication queue full, dropping oldest");
                    inner.pending.pop_front();
                }
                tracing::debug!("queued indication 0x{:02X}", raw.opcode);
                inner.pending.push_back(indication);
            }
            Err(e) => tracing::warn!("ignoring malformed indication: {e}"),
        }
    }
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex as StdMutex};

    use super::*;
    use crate::error::JoinFailure;
    use crate::protocol::command::REPLY_FLAG;
    use crate::protocol::frame::FRAME_START;
    use crate::protocol::response::{IND_JOIN, IND_RX_MESSAGE, IND_TX_CONFIRMED};
    use crate::types::{AppEui, AppKey};

    /// What the mock hands back on the next `read` call.
    enum MockRead {
        Frame(Vec<u8>),
        Timeout,
    }

    /// Scripted transport: each written command opcode is mapped to the
    /// reads the driver should see afterwards.
    struct MockTransport {
        handler: Box<dyn FnMut(u8, &[u8]) -> Vec<MockRead> + Send>,
        pending_reads: VecDeque<MockRead>,
        write_log: Arc<StdMutex<Vec<u8>>>,
    }

    impl MockTransport {
        fn new(handler: impl FnMut(u8, &[u8]) -> Vec<MockRead> + Send + 'static) -> Self {
            Self {
                handler: Box::new(handler),
                pending_reads: VecDeque::new(),
                write_log: Arc::new(StdMutex::new(Vec::new())),
            }
        }

        fn write_log(&self) -> Arc<StdMutex<Vec<u8>>> {
            Arc::clone(&self.write_log)
        }
    }

    impl Transport for MockTransport {
        fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn write(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let opcode = data[1];
            self.write_log.lock().unwrap().push(opcode);
            let reads = (self.handler)(opcode, &data[3..data.len() - 1]);
            self.pending_reads.extend(reads);
            Box::pin(async { Ok(()) })
        }

        fn read(
            &mut self,
            timeout: Duration,
        ) -> Pin<Box<dyn Future<Output = Result<Bytes>> + Send + '_>> {
            let next = self.pending_reads.pop_front();
            Box::pin(async move {
                match next {
                    Some(MockRead::Frame(bytes)) => Ok(Bytes::from(bytes)),
                    Some(MockRead::Timeout) | None => {
                        tokio::time::sleep(timeout).await;
                        Err(Error::Timeout {
                            timeout_ms: as_millis(timeout),
                        })
                    }
                }
            })
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    /// Builds a checksummed frame the way the module would emit it.
    fn wire(opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![FRAME_START, opcode, payload.len() as u8];
        frame.extend_from_slice(payload);
        let sum: u8 = frame.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        frame.push((sum ^ 0xFF).wrapping_add(1));
        frame
    }

    fn reply(opcode: u8, payload: &[u8]) -> MockRead {
        MockRead::Frame(wire(opcode | REPLY_FLAG, payload))
    }

    fn test_config() -> DriverConfig {
        DriverConfig::default()
            .request_timeout(Duration::from_millis(100))
            .join_poll_interval(Duration::from_millis(10))
    }

    async fn configured_driver(
        handler: impl FnMut(u8, &[u8]) -> Vec<MockRead> + Send + 'static,
        config: DriverConfig,
    ) -> (Mipot<MockTransport>, Arc<StdMutex<Vec<u8>>>) {
        let transport = MockTransport::new(handler);
        let log = transport.write_log();
        (Mipot::with_config(transport, config), log)
    }

    fn credentials() -> JoinCredentials {
        JoinCredentials {
            app_eui: AppEui::from_bytes([0x70, 0xB3, 0xD5, 0x7E, 0xD0, 0x00, 0x12, 0x34]),
            app_key: AppKey::from_bytes([0x42; 16]),
        }
    }

    /// Writes credentials and joins, with the mock reporting an immediate
    /// successful activation.
    async fn bring_up(driver: &Mipot<MockTransport>) {
        driver.set_join_credentials(&credentials()).await.unwrap();
        driver.join().await.unwrap();
    }

    fn join_flow(opcode: u8, _params: &[u8]) -> Vec<MockRead> {
        match opcode {
            0x43 => vec![reply(0x43, &[])],
            0x32 => vec![reply(0x32, &[0x00])],
            0x40 => vec![reply(0x40, &[0x00])],
            0x42 => vec![reply(0x42, &[0x02])],
            _ => vec![],
        }
    }

    #[tokio::test]
    async fn test_get_identity_reverses_eui() {
        let (driver, _) = configured_driver(
            |opcode, _| match opcode {
                0x36 => vec![reply(
                    0x36,
                    &[0x04, 0x03, 0x02, 0x01, 0x00, 0x41, 0x40, 0xA8],
                )],
                _ => vec![],
            },
            test_config(),
        )
        .await;

        let eui = driver.get_identity().await.unwrap();
        assert_eq!(eui.to_string(), "A840410001020304");
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_retries_transient_timeouts() {
        // First two attempts see nothing, the third one answers.
        let mut attempts = 0;
        let (driver, log) = configured_driver(
            move |opcode, _| {
                if opcode != 0x36 {
                    return vec![];
                }
                attempts += 1;
                if attempts < 3 {
                    vec![MockRead::Timeout]
                } else {
                    vec![reply(0x36, &[0x01; 8])]
                }
            },
            test_config(),
        )
        .await;

        driver.get_identity().await.unwrap();
        assert_eq!(log.lock().unwrap().as_slice(), &[0x36, 0x36, 0x36]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_gives_up_after_max_attempts() {
        let (driver, log) = configured_driver(
            |_, _| vec![MockRead::Timeout],
            test_config(),
        )
        .await;

        let err = driver.get_identity().await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_polls_until_joined() {
        let mut polls = 0;
        let (driver, _) = configured_driver(
            move |opcode, _| match opcode {
                0x43 => vec![reply(0x43, &[])],
                0x32 => vec![reply(0x32, &[0x00])],
                0x40 => vec![reply(0x40, &[0x00])],
                0x42 => {
                    polls += 1;
                    let status = if polls < 3 { 0x01 } else { 0x02 };
                    vec![reply(0x42, &[status])]
                }
                _ => vec![],
            },
            test_config(),
        )
        .await;

        driver.set_join_credentials(&credentials()).await.unwrap();
        driver.join().await.unwrap();
        assert_eq!(driver.get_status().await.unwrap(), SessionState::Joined);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_times_out_into_error_state() {
        let (driver, _) = configured_driver(
            |opcode, _| match opcode {
                0x43 => vec![reply(0x43, &[])],
                0x32 => vec![reply(0x32, &[0x00])],
                0x40 => vec![reply(0x40, &[0x00])],
                // Forever joining.
                0x42 => vec![reply(0x42, &[0x01])],
                _ => vec![],
            },
            test_config().join_timeout(Duration::from_millis(50)),
        )
        .await;

        driver.set_join_credentials(&credentials()).await.unwrap();
        let err = driver.join().await.unwrap_err();
        assert!(matches!(err, Error::Join(JoinFailure::Timeout { .. })));

        // Terminal until credentials are re-written.
        let err = driver.join().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_join_rejection_keeps_configured_state() {
        let (driver, _) = configured_driver(
            |opcode, _| match opcode {
                0x43 => vec![reply(0x43, &[])],
                0x32 => vec![reply(0x32, &[0x00])],
                // Busy, handshake never started.
                0x40 => vec![reply(0x40, &[0x02])],
                _ => vec![],
            },
            test_config(),
        )
        .await;

        driver.set_join_credentials(&credentials()).await.unwrap();
        let err = driver.join().await.unwrap_err();
        assert!(matches!(err, Error::Join(JoinFailure::ModuleBusy)));

        // Still configured, a second attempt is legal.
        let err = driver.join().await.unwrap_err();
        assert!(matches!(err, Error::Join(JoinFailure::ModuleBusy)));
    }

    #[tokio::test]
    async fn test_uplink_requires_joined_session() {
        let (driver, log) = configured_driver(join_flow, test_config()).await;

        driver.set_join_credentials(&credentials()).await.unwrap();
        let err = driver
            .send_uplink(Bytes::from_static(&[0x01]), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                operation: "send_uplink",
                ..
            }
        ));
        // The transmit command never went out.
        assert!(!log.lock().unwrap().contains(&0x46));
    }

    #[tokio::test]
    async fn test_uplink_rejects_oversized_payload() {
        let (driver, log) = configured_driver(join_flow, test_config()).await;
        bring_up(&driver).await;

        let err = driver
            .send_uplink(Bytes::from(vec![0u8; 52]), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transmit(TransmitFailure::LengthNotSupported)
        ));
        assert!(!log.lock().unwrap().contains(&0x46));
    }

    #[tokio::test]
    async fn test_unconfirmed_uplink_reports_outcome() {
        let (driver, _) = configured_driver(
            |opcode, params| match opcode {
                0x46 => {
                    // confirmed flag, port, then the payload
                    assert_eq!(params[0], 0x00);
                    assert_eq!(params[1], 0x01);
                    vec![
                        reply(0x46, &[0x00]),
                        // success, DR5, power index 1
                        MockRead::Frame(wire(0x48, &[0x00, 0x05, 0x01])),
                    ]
                }
                other => join_flow(other, params),
            },
            test_config(),
        )
        .await;
        bring_up(&driver).await;

        let report = driver
            .send_uplink(Bytes::from_static(&[0xCA, 0xFE]), false)
            .await
            .unwrap();
        assert!(!report.confirmed);
        assert_eq!(report.data_rate, 5);
        assert_eq!(report.tx_power_dbm, 14);
    }

    #[tokio::test]
    async fn test_confirmed_uplink_without_ack_fails() {
        let (driver, _) = configured_driver(
            |opcode, params| match opcode {
                0x46 => vec![
                    reply(0x46, &[0x00]),
                    // success but ack = 0, one retry
                    MockRead::Frame(wire(IND_TX_CONFIRMED, &[0x00, 0x05, 0x01, 0x00, 0x01])),
                ],
                other => join_flow(other, params),
            },
            test_config(),
        )
        .await;
        bring_up(&driver).await;

        let err = driver
            .send_uplink(Bytes::from_static(&[0x01]), true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transmit(TransmitFailure::NoAck)));
    }

    #[tokio::test]
    async fn test_uplink_busy_status_is_surfaced() {
        let (driver, _) = configured_driver(
            |opcode, params| match opcode {
                0x46 => vec![reply(0x46, &[0x01])],
                other => join_flow(other, params),
            },
            test_config(),
        )
        .await;
        bring_up(&driver).await;

        let err = driver
            .send_uplink(Bytes::from_static(&[0x01]), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transmit(TransmitFailure::Busy)));
    }

    #[tokio::test]
    async fn test_stale_reply_is_discarded() {
        let (driver, _) = configured_driver(
            |opcode, _| match opcode {
                0x36 => vec![
                    // Late reply to some earlier command, then the real one.
                    MockRead::Frame(wire(0xB5, &[0x00, 0x00, 0x00, 0x00])),
                    MockRead::Frame(wire(
                        0xB6,
                        &[0x04, 0x03, 0x02, 0x01, 0x00, 0x41, 0x40, 0xA8],
                    )),
                ],
                _ => vec![],
            },
            test_config(),
        )
        .await;

        let eui = driver.get_identity().await.unwrap();
        assert_eq!(eui.to_string(), "A840410001020304");
    }

    #[tokio::test]
    async fn test_downlink_during_reply_wait_is_queued() {
        // status type mc dr slot pending ack flag rssi(2) snr port data
        let rx = wire(
            IND_RX_MESSAGE,
            &[
                0x00, 0x00, 0x00, 0x05, 0x01, 0x00, 0x00, 0x01, 0x9C, 0xFF, 0x07, 0x02, 0xCA,
                0xFE,
            ],
        );
        let (driver, _) = configured_driver(
            move |opcode, _| match opcode {
                0x36 => vec![
                    MockRead::Frame(rx.clone()),
                    MockRead::Frame(wire(0xB6, &[0x01; 8])),
                ],
                _ => vec![],
            },
            test_config(),
        )
        .await;

        driver.get_identity().await.unwrap();
        let downlink = driver.take_downlink().await.unwrap();
        assert_eq!(downlink.port, Some(2));
        assert_eq!(downlink.data.as_ref(), &[0xCA, 0xFE]);
        assert!(driver.take_downlink().await.is_none());
    }

    #[tokio::test]
    async fn test_join_indication_short_circuits_polling() {
        let (driver, log) = configured_driver(
            |opcode, params| match opcode {
                // Join indication rides along with the command reply.
                0x40 => vec![
                    reply(0x40, &[0x00]),
                    MockRead::Frame(wire(IND_JOIN, &[0x00])),
                ],
                other => join_flow(other, params),
            },
            test_config(),
        )
        .await;

        driver.set_join_credentials(&credentials()).await.unwrap();
        driver.join().await.unwrap();
        // Joined via the indication, no activation status poll needed.
        assert!(!log.lock().unwrap().contains(&0x42));
    }

    #[tokio::test]
    async fn test_is_ready_to_send() {
        let mut calls = 0;
        let (driver, _) = configured_driver(
            move |opcode, params| match opcode {
                0x4A => {
                    calls += 1;
                    let status = if calls == 1 { 0x01 } else { 0x00 };
                    vec![reply(0x4A, &[status])]
                }
                other => join_flow(other, params),
            },
            test_config(),
        )
        .await;
        bring_up(&driver).await;

        assert!(!driver.is_ready_to_send().await.unwrap());
        assert!(driver.is_ready_to_send().await.unwrap());
    }

    #[tokio::test]
    async fn test_session_loss_detected_via_status() {
        let mut polls = 0;
        let (driver, _) = configured_driver(
            move |opcode, params| match opcode {
                0x42 => {
                    polls += 1;
                    // Joined during bring-up, gone afterwards.
                    let status = if polls == 1 { 0x02 } else { 0x00 };
                    vec![reply(0x42, &[status])]
                }
                other => join_flow(other, params),
            },
            test_config(),
        )
        .await;
        bring_up(&driver).await;

        assert_eq!(
            driver.get_status().await.unwrap(),
            SessionState::Uninitialized
        );
    }

    #[tokio::test]
    async fn test_battery_level_round_trip() {
        let mut level = 0u8;
        let (driver, _) = configured_driver(
            move |opcode, params| match opcode {
                0x50 => {
                    level = params[0];
                    vec![reply(0x50, &[])]
                }
                0x51 => vec![reply(0x51, &[level])],
                _ => vec![],
            },
            test_config(),
        )
        .await;

        driver.set_battery_level(0xFE).await.unwrap();
        assert_eq!(driver.get_battery_level().await.unwrap(), 0xFE);
    }

    #[tokio::test]
    async fn test_firmware_version_and_serial() {
        let (driver, _) = configured_driver(
            |opcode, _| match opcode {
                0x34 => vec![reply(0x34, &[0x01, 0x02, 0x00, 0x00])],
                0x35 => vec![reply(0x35, &[0x78, 0x56, 0x34, 0x12])],
                _ => vec![],
            },
            test_config(),
        )
        .await;

        assert_eq!(driver.get_firmware_version().await.unwrap(), 0x0000_0201);
        assert_eq!(driver.get_serial_number().await.unwrap(), 0x1234_5678);
    }

    #[tokio::test]
    async fn test_send_readings_encodes_lpp() {
        let (driver, _) = configured_driver(
            |opcode, params| match opcode {
                0x46 => {
                    // channel 3, temperature, 21.5 C
                    assert_eq!(&params[2..], &[0x03, 0x67, 0x00, 0xD7]);
                    vec![
                        reply(0x46, &[0x00]),
                        MockRead::Frame(wire(0x48, &[0x00, 0x05, 0x00])),
                    ]
                }
                other => join_flow(other, params),
            },
            test_config(),
        )
        .await;
        bring_up(&driver).await;

        let report = driver
            .send_readings(
                &[Reading::new(3, crate::lpp::Value::Temperature(21.5))],
                false,
            )
            .await
            .unwrap();
        assert_eq!(report.tx_power_dbm, 20);
    }
}
