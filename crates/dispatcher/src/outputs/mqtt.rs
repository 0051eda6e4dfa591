//! MqttOutput - publishes each event to a broker topic
//!
//! The connection is opened lazily on the first delivery, kept open between
//! deliveries and closed at shutdown. A dropped connection is noticed by the
//! event-loop driver task, which only flips the state back to
//! `Disconnected`; the next delivery reconnects.
//!
//! A publish counts as delivered once the client has queued it. For QoS 1
//! and 2 the broker's PUBACK/PUBCOMP is not awaited, so a broker-side
//! reject still counts as ok.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use bytes::Bytes;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, TlsConfiguration, Transport,
};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use contracts::{Destination, MqttConfig, Output, OutputError, Priority, SecurityEvent};

use crate::error::DispatcherError;

/// Capacity of the request queue between `AsyncClient` and its event loop
const REQUEST_CAPACITY: usize = 64;

/// How long `disconnect` waits for the driver to flush the DISCONNECT packet
const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

/// Broker connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Publishing = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Publishing,
            _ => Self::Disconnected,
        }
    }
}

/// State shared between a transport and its driver task
#[derive(Debug, Clone)]
struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ConnectionState::Disconnected as u8)))
    }

    fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move `from → to`; false if the state changed underneath
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Broker client seam, so the output can be exercised without a broker
#[trait_variant::make(BrokerTransport: Send)]
pub trait LocalBrokerTransport {
    /// True while a live session exists
    fn is_connected(&self) -> bool;

    /// Open a session and wait for the broker's acknowledgement
    async fn connect(&mut self) -> Result<(), OutputError>;

    /// Publish one message on the open session
    async fn publish(
        &mut self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Bytes,
    ) -> Result<(), OutputError>;

    /// Close the session if one is open
    async fn disconnect(&mut self) -> Result<(), OutputError>;
}

struct Session {
    client: AsyncClient,
    driver: JoinHandle<()>,
}

/// `BrokerTransport` over `rumqttc`
pub struct RumqttTransport {
    client_id: String,
    options: MqttOptions,
    state: StateCell,
    session: Option<Session>,
}

impl RumqttTransport {
    pub fn new(config: &MqttConfig) -> Result<Self, DispatcherError> {
        let address = config
            .broker_address()
            .map_err(|e| DispatcherError::output_creation(Destination::Mqtt, e.to_string()))?;

        let client_id = client_id();
        let mut options = MqttOptions::new(client_id.clone(), address.host, address.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_clean_session(true);
        if let Some((user, password)) = config.credentials() {
            options.set_credentials(user, password);
        }
        if address.tls {
            options.set_transport(tls_transport(config.check_cert));
        }

        Ok(Self {
            client_id,
            options,
            state: StateCell::new(),
            session: None,
        })
    }

    /// Client id presented to the broker
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }
}

/// `alert-relay-` followed by 6 hex chars of a fresh v4 uuid
fn client_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("alert-relay-{}", &id[..6])
}

fn tls_transport(check_cert: bool) -> Transport {
    if check_cert {
        return Transport::tls_with_default_config();
    }
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth();
    Transport::tls_with_config(TlsConfiguration::Rustls(Arc::new(config)))
}

/// Verifier used when certificate checks are disabled
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

impl BrokerTransport for RumqttTransport {
    fn is_connected(&self) -> bool {
        self.session.is_some()
            && matches!(
                self.state.get(),
                ConnectionState::Connected | ConnectionState::Publishing
            )
    }

    #[instrument(name = "mqtt_connect", skip(self), fields(client_id = %self.client_id))]
    async fn connect(&mut self) -> Result<(), OutputError> {
        if let Some(stale) = self.session.take() {
            stale.driver.abort();
        }
        self.state.set(ConnectionState::Connecting);

        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), REQUEST_CAPACITY);
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => break,
                Ok(_) => {}
                Err(e) => {
                    self.state.set(ConnectionState::Disconnected);
                    return Err(OutputError::connection(e.to_string()));
                }
            }
        }

        self.state.set(ConnectionState::Connected);
        let driver = tokio::spawn(drive(eventloop, self.state.clone()));
        self.session = Some(Session { client, driver });
        info!("Connected to broker");
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Bytes,
    ) -> Result<(), OutputError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| OutputError::connection("not connected"))?;

        self.state.set(ConnectionState::Publishing);
        match session.client.publish(topic, qos, retain, payload.to_vec()).await {
            Ok(()) => {
                self.state
                    .transition(ConnectionState::Publishing, ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                self.state.set(ConnectionState::Disconnected);
                Err(OutputError::delivery(None, e.to_string()))
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), OutputError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };

        if let Err(e) = session.client.disconnect().await {
            debug!(error = %e, "Disconnect request not sent");
        }
        if tokio::time::timeout(DISCONNECT_GRACE, &mut session.driver)
            .await
            .is_err()
        {
            session.driver.abort();
        }
        self.state.set(ConnectionState::Disconnected);
        debug!("Disconnected from broker");
        Ok(())
    }
}

impl Drop for RumqttTransport {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.driver.abort();
        }
    }
}

/// Keep the event loop polled until the session ends
async fn drive(mut eventloop: EventLoop, state: StateCell) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                state.set(ConnectionState::Disconnected);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                state.set(ConnectionState::Disconnected);
                error!(destination = %Destination::Mqtt, error = %e, "Connection lost");
                break;
            }
        }
    }
}

/// Map a configured QoS level to its `rumqttc` value
pub fn qos_from_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

/// Output publishing events on an MQTT topic
pub struct MqttOutput<T = RumqttTransport> {
    topic: String,
    qos: QoS,
    retained: bool,
    minimum_priority: Priority,
    /// Held for one connect-then-publish attempt
    transport: Mutex<T>,
}

impl MqttOutput<RumqttTransport> {
    pub fn new(config: &MqttConfig) -> Result<Self, DispatcherError> {
        Self::with_transport(config, RumqttTransport::new(config)?)
    }
}

impl<T: BrokerTransport> MqttOutput<T> {
    /// Create an output over a custom transport
    pub fn with_transport(config: &MqttConfig, transport: T) -> Result<Self, DispatcherError> {
        let qos = qos_from_level(config.qos).ok_or_else(|| {
            DispatcherError::output_creation(
                Destination::Mqtt,
                format!("unsupported qos {}", config.qos),
            )
        })?;
        if config.user.is_some() != config.password.is_some() {
            warn!("MQTT credentials are only half configured, connecting anonymously");
        }

        Ok(Self {
            topic: config.topic.clone(),
            qos,
            retained: config.retained,
            minimum_priority: config.minimum_priority,
            transport: Mutex::new(transport),
        })
    }
}

impl<T: BrokerTransport> Output for MqttOutput<T> {
    fn destination(&self) -> Destination {
        Destination::Mqtt
    }

    fn minimum_priority(&self) -> Priority {
        self.minimum_priority
    }

    #[instrument(name = "mqtt_send", skip_all, fields(uuid = %event.uuid, topic = %self.topic))]
    async fn send(&self, event: &SecurityEvent, body: &Bytes) -> Result<(), OutputError> {
        let mut transport = self.transport.lock().await;
        if !transport.is_connected() {
            transport.connect().await?;
        }
        transport
            .publish(&self.topic, self.qos, self.retained, body.clone())
            .await
    }

    async fn close(&self) -> Result<(), OutputError> {
        self.transport.lock().await.disconnect().await
    }
}
