use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;

/// One probe result, backend-agnostic.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub latency: Duration,
    pub max_players: u32,
    pub online_players: u32,
    pub player_list: Option<Vec<String>>,
}

/// The wire protocol used to talk to the child is out of scope (§1
/// Non-goals) — this trait is the seam a real SLP status/query
/// implementation would plug into.
#[async_trait]
pub trait PingBackend: Send + Sync {
    async fn probe(
        &self,
        host: &str,
        port: u16,
        connect_timeout: Duration,
        response_timeout: Duration,
        full_query: bool,
    ) -> anyhow::Result<ProbeResponse>;
}

/// Default production backend: a bare TCP-connect liveness check. It proves
/// the port is accepting connections but cannot report player counts, so
/// `max_players`/`online_players` are always zero — a placeholder until the
/// real status/query wire protocol is implemented.
pub struct TcpProbeBackend;

#[async_trait]
impl PingBackend for TcpProbeBackend {
    async fn probe(
        &self,
        host: &str,
        port: u16,
        connect_timeout: Duration,
        response_timeout: Duration,
        _full_query: bool,
    ) -> anyhow::Result<ProbeResponse> {
        let started = Instant::now();
        let addr = format!("{host}:{port}");
        tokio::time::timeout(connect_timeout + response_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| anyhow::anyhow!("connecting to {addr} timed out"))?
            .map_err(|e| anyhow::anyhow!("connecting to {addr}: {e}"))?;

        Ok(ProbeResponse {
            latency: started.elapsed(),
            max_players: 0,
            online_players: 0,
            player_list: None,
        })
    }
}
