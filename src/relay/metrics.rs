use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec,
    IntGauge,
};
use lazy_static::lazy_static;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

lazy_static! {
    pub static ref PACKETS_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        "dns_relay_packets_received_total",
        "Counter of datagrams received from clients and the upstream."
    ).unwrap();

    pub static ref QUERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "dns_relay_queries_total",
        "Counter of queries by how they were answered.",
        &["outcome"]
    ).unwrap();

    pub static ref DROPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "dns_relay_dropped_total",
        "Counter of packets dropped without a reply, by reason.",
        &["reason"]
    ).unwrap();

    pub static ref RESPONSES_RELAYED_TOTAL: IntCounter = register_int_counter!(
        "dns_relay_responses_relayed_total",
        "Counter of upstream responses relayed back to clients."
    ).unwrap();

    pub static ref CACHE_FLUSHES_TOTAL: IntCounter = register_int_counter!(
        "dns_relay_cache_flushes_total",
        "Counter of full cache flushes triggered by the item limit."
    ).unwrap();

    pub static ref CACHE_ITEMS: IntGauge = register_int_gauge!(
        "dns_relay_cache_items",
        "Records inserted into the cache since the last flush."
    ).unwrap();

    pub static ref RELAY_IN_FLIGHT: IntGauge = register_int_gauge!(
        "dns_relay_in_flight",
        "Queries forwarded upstream and still waiting for a response."
    ).unwrap();

    pub static ref RELAY_EXPIRED_TOTAL: IntCounter = register_int_counter!(
        "dns_relay_expired_total",
        "Counter of forwarded queries released by timeout without a response."
    ).unwrap();
}

/// Serves the text exposition format over plain HTTP until the task is aborted.
pub async fn serve(addr: SocketAddr) {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("[metrics] Failed to bind {}: {}", addr, e);
            return;
        }
    };
    tracing::info!("[metrics] Serving prometheus metrics on {}", addr);

    while let Ok((mut stream, _)) = listener.accept().await {
        tokio::spawn(async move {
            let mut buf = [0u8; 8192];
            let timeout = std::time::Duration::from_secs(2);
            if let Ok(Ok(n)) = tokio::time::timeout(timeout, stream.read(&mut buf)).await {
                if n == 0 || !buf.starts_with(b"GET ") {
                    return;
                }
                use prometheus::Encoder;
                let encoder = prometheus::TextEncoder::new();
                let mut body = Vec::new();
                if encoder.encode(&prometheus::gather(), &mut body).is_err() {
                    return;
                }
                let header = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    encoder.format_type(),
                    body.len()
                );
                let mut response = header.into_bytes();
                response.extend_from_slice(&body);
                let _ = tokio::time::timeout(timeout, stream.write_all(&response)).await;
                let _ = stream.shutdown().await;
            }
        });
    }
}
