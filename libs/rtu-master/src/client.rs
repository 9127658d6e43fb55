//! Request API
//!
//! `connect` hands back an owned [`RtuClient`]; every read goes through it.
//! Results can be awaited or delivered to a callback, both fed by the same
//! completion.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::RtuConfig;
use crate::error::Result;
use crate::frame::{ReadRequest, ReadResponse};
use crate::session::{Session, SessionState};

/// Open the configured serial device
pub async fn connect(config: &RtuConfig) -> Result<RtuClient> {
    RtuClient::connect(config).await
}

/// Modbus RTU master bound to one session
#[derive(Debug, Clone)]
pub struct RtuClient {
    session: Session,
    start_register: u16,
    register_count: u16,
}

impl RtuClient {
    pub async fn connect(config: &RtuConfig) -> Result<Self> {
        let session = Session::open(config).await?;
        Ok(Self::with_session(session, config))
    }

    /// Drive the protocol over any byte stream (serial adapters, test pipes)
    pub fn attach<T>(io: T, config: &RtuConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::with_session(Session::attach(io, config), config)
    }

    fn with_session(session: Session, config: &RtuConfig) -> Self {
        Self {
            session,
            start_register: config.start_register,
            register_count: config.register_count,
        }
    }

    /// Read the configured register window from `unit`
    pub async fn read(&self, unit: u8) -> Result<ReadResponse> {
        self.send(unit, self.start_register, self.register_count)
            .await
    }

    /// Callback flavour of [`read`](Self::read). `on_result` runs exactly once.
    pub fn read_with<F>(&self, unit: u8, on_result: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<ReadResponse>) + Send + 'static,
    {
        let client = self.clone();
        tokio::spawn(async move {
            on_result(client.read(unit).await);
        })
    }

    /// Read `count` holding registers starting at `start`
    pub async fn send(&self, unit: u8, start: u16, count: u16) -> Result<ReadResponse> {
        self.session
            .send(ReadRequest::new(unit, start, count))
            .await
    }

    pub async fn close(&self) {
        self.session.close().await;
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::error::RtuError;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_connect_missing_device_fails() {
        let err = connect(&RtuConfig::default()).await.unwrap_err();
        assert!(matches!(err, RtuError::Config(_)));
    }

    #[tokio::test]
    async fn test_connect_nonexistent_port_fails() {
        let config = RtuConfig::for_device("/dev/rtu-master-does-not-exist");
        let err = RtuClient::connect(&config).await.unwrap_err();
        assert!(matches!(err, RtuError::Transport(_)));
    }

    #[tokio::test]
    async fn test_read_with_reports_port_not_open() {
        let (io, _slave) = duplex(64);
        let client = RtuClient::attach(io, &RtuConfig::for_device("mock"));
        client.close().await;

        let (tx, rx) = tokio::sync::oneshot::channel();
        client
            .read_with(1, move |result| {
                let _ = tx.send(result);
            })
            .await
            .unwrap();

        assert_eq!(rx.await.unwrap(), Err(RtuError::PortNotOpen));
    }
}
