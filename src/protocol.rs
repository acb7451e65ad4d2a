use serde::{Deserialize, Serialize};

pub const DEFAULT_CONTROL_PORT: u16 = 8888;
pub const DEFAULT_TCP_BANDWIDTH_PORT: u16 = 9999;
pub const DEFAULT_TCP_CPS_PORT: u16 = 9998;
pub const DEFAULT_UDP_PPS_PORT: u16 = 9997;
pub const DEFAULT_TCP_LATENCY_PORT: u16 = 9996;
pub const DEFAULT_HTTP_BANDWIDTH_PORT: u16 = 9899;

/// Transport a test is measured over
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TestProtocol {
    #[default]
    Tcp,
    Udp,
    Http,
}

impl std::fmt::Display for TestProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestProtocol::Tcp => write!(f, "TCP"),
            TestProtocol::Udp => write!(f, "UDP"),
            TestProtocol::Http => write!(f, "HTTP"),
        }
    }
}

/// What a test measures
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    #[default]
    Bandwidth,
    Cps,
    Pps,
    Latency,
}

impl std::fmt::Display for TestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestType::Bandwidth => write!(f, "Bandwidth"),
            TestType::Cps => write!(f, "Connections/s"),
            TestType::Pps => write!(f, "Packets/s"),
            TestType::Latency => write!(f, "Latency"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct TestId {
    pub protocol: TestProtocol,
    #[serde(rename = "type")]
    pub test_type: TestType,
}

impl TestId {
    pub fn new(protocol: TestProtocol, test_type: TestType) -> Self {
        Self {
            protocol,
            test_type,
        }
    }
}

impl std::fmt::Display for TestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.protocol, self.test_type)
    }
}

/// Test parameters supplied by the client in `Syn`.
///
/// Read-only once the handshake completes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestParam {
    pub test_id: TestId,
    /// Parallelism hint from the client
    pub num_threads: u32,
    /// Bytes per read unit for bandwidth tests
    pub buffer_size: u32,
    /// Round trips sampled per latency batch
    pub rtt_count: u32,
}

impl TestParam {
    pub fn new(test_id: TestId) -> Self {
        Self {
            test_id,
            num_threads: 1,
            buffer_size: 16 * 1024,
            rtt_count: 1000,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: u32) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_rtt_count(mut self, rtt_count: u32) -> Self {
        self.rtt_count = rtt_count;
        self
    }
}

/// Control-plane message exchanged strictly in request/response order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionMessage {
    Syn { test_param: TestParam },
    Ack,
    Fin { reason: String },
    Bgn { udp_port: u16 },
}

impl SessionMessage {
    pub fn syn(test_param: TestParam) -> Self {
        SessionMessage::Syn { test_param }
    }

    pub fn fin(reason: impl Into<String>) -> Self {
        SessionMessage::Fin {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SessionMessage::Syn { .. } => "syn",
            SessionMessage::Ack => "ack",
            SessionMessage::Fin { .. } => "fin",
            SessionMessage::Bgn { .. } => "bgn",
        }
    }

    pub fn serialize(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn deserialize(s: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_syn() {
        let param = TestParam::new(TestId::new(TestProtocol::Tcp, TestType::Latency));
        let json = SessionMessage::syn(param).serialize().unwrap();
        assert!(json.contains("\"type\":\"syn\""));
        assert!(json.contains("\"protocol\":\"tcp\""));
        assert!(json.contains("\"type\":\"latency\""));
        assert!(json.contains("\"rtt_count\":1000"));
    }

    #[test]
    fn test_serialize_ack() {
        let json = SessionMessage::Ack.serialize().unwrap();
        assert_eq!(json, "{\"type\":\"ack\"}");
    }

    #[test]
    fn test_deserialize_fin() {
        let msg = SessionMessage::deserialize("{\"type\":\"fin\",\"reason\":\"busy\"}").unwrap();
        assert_eq!(msg, SessionMessage::fin("busy"));
        assert_eq!(msg.kind(), "fin");
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(SessionMessage::deserialize("{\"type\":\"hello\"}").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(TestProtocol::Http.to_string(), "HTTP");
        assert_eq!(TestType::Cps.to_string(), "Connections/s");
        let id = TestId::new(TestProtocol::Udp, TestType::Pps);
        assert_eq!(id.to_string(), "UDP Packets/s");
    }
}
