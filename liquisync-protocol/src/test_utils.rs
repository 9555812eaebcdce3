// Shared test utilities for unit and integration tests.

use crate::error::SwapError;
use crate::network::{NetworkMessage, RelayerInterface};
use async_trait::async_trait;
use std::sync::Mutex;

/// Relayer stub that records every message and delivers nothing. Unit tests
/// inspect the recorded traffic and feed the other side by hand.
#[derive(Debug, Default)]
pub struct RecordingRelayer {
    sent: Mutex<Vec<NetworkMessage>>,
}

impl RecordingRelayer {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn sent(&self) -> Vec<NetworkMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl RelayerInterface for RecordingRelayer {
    async fn send(&self, msg: NetworkMessage) -> Result<(), SwapError> {
        self.sent.lock().unwrap().push(msg);
        Ok(())
    }
}

/// Relayer stub that accepts and drops everything.
#[derive(Debug, Default)]
pub struct NullRelayer;

#[async_trait]
impl RelayerInterface for NullRelayer {
    async fn send(&self, _msg: NetworkMessage) -> Result<(), SwapError> {
        Ok(())
    }
}

/// Relayer stub whose sends always fail at the transport level.
#[derive(Debug, Default)]
pub struct FailingRelayer;

#[async_trait]
impl RelayerInterface for FailingRelayer {
    async fn send(&self, _msg: NetworkMessage) -> Result<(), SwapError> {
        Err(SwapError::TransportFailure("relayer unavailable".to_string()))
    }
}
