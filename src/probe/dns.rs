//! DNS probe implementation using raw UDP packets.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use super::ProbeError;

const DNS_PORT: u16 = 53;
const TYPE_A: u16 = 1;
const CLASS_IN: u16 = 1;
const HEADER_LEN: usize = 12;

/// Resolve `domain`'s A record against the nameserver at `server`.
///
/// Succeeds when the server answers with at least one A record and
/// returns the query round-trip time.
pub async fn run_dns_probe(server: &str, domain: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let start = Instant::now();
    let target = resolve_nameserver(server).await?;

    let tx_id: u16 = rand::random();
    let packet = build_dns_query(tx_id, domain)?;

    let bind_addr = match target {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    };
    let socket = UdpSocket::bind(bind_addr)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to bind socket: {}", e)))?;
    socket
        .connect(target)
        .await
        .map_err(|e| ProbeError::Network(format!("failed to connect: {}", e)))?;

    let exchange = async {
        socket
            .send(&packet)
            .await
            .map_err(|e| ProbeError::Network(format!("failed to send: {}", e)))?;

        // Stray datagrams with another transaction id are ignored.
        let mut response = [0u8; 512];
        loop {
            let n = socket
                .recv(&mut response)
                .await
                .map_err(|e| ProbeError::Network(format!("failed to recv: {}", e)))?;
            if n >= 2 && u16::from_be_bytes([response[0], response[1]]) == tx_id {
                return count_a_records(&response[..n], tx_id);
            }
        }
    };

    let answers = tokio::time::timeout(timeout.saturating_sub(start.elapsed()), exchange)
        .await
        .map_err(|_| ProbeError::Timeout(timeout))??;

    if answers == 0 {
        return Err(ProbeError::Resolve(format!("no A records for {}", domain)));
    }

    Ok(start.elapsed())
}

/// Turn `host`, `host:port`, `ip` or `ip:port` into a socket address,
/// defaulting to port 53.
async fn resolve_nameserver(server: &str) -> Result<SocketAddr, ProbeError> {
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = server.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DNS_PORT));
    }

    let host_port = if server.contains(':') {
        server.to_string()
    } else {
        format!("{}:{}", server, DNS_PORT)
    };

    let mut addrs = tokio::net::lookup_host(host_port)
        .await
        .map_err(|e| ProbeError::Resolve(format!("nameserver {}: {}", server, e)))?;
    addrs
        .next()
        .ok_or_else(|| ProbeError::Resolve(format!("no addresses found for {}", server)))
}

/// Build a DNS query packet for `domain`'s A record.
fn build_dns_query(tx_id: u16, domain: &str) -> Result<Vec<u8>, ProbeError> {
    let flags: u16 = 0x0100; // Standard query, recursion desired

    let mut packet = Vec::with_capacity(HEADER_LEN + domain.len() + 6);
    packet.extend_from_slice(&tx_id.to_be_bytes());
    packet.extend_from_slice(&flags.to_be_bytes());
    packet.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    packet.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT
    packet.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    packet.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT

    encode_name(&mut packet, domain)?;

    packet.extend_from_slice(&TYPE_A.to_be_bytes());
    packet.extend_from_slice(&CLASS_IN.to_be_bytes());

    Ok(packet)
}

/// Append `domain` as length-prefixed labels.
fn encode_name(packet: &mut Vec<u8>, domain: &str) -> Result<(), ProbeError> {
    let name = domain.trim().trim_end_matches('.');
    if name.is_empty() || name.len() > 253 {
        return Err(ProbeError::Resolve(format!("invalid domain: {:?}", domain)));
    }

    for label in name.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(ProbeError::Resolve(format!("invalid domain: {:?}", domain)));
        }
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0);

    Ok(())
}

/// Validate a response and count the A records in its answer section.
fn count_a_records(response: &[u8], tx_id: u16) -> Result<usize, ProbeError> {
    if response.len() < HEADER_LEN {
        return Err(ProbeError::Network(format!("response too short: {} bytes", response.len())));
    }

    let resp_tx_id = u16::from_be_bytes([response[0], response[1]]);
    if resp_tx_id != tx_id {
        return Err(ProbeError::Network(format!(
            "transaction ID mismatch: got {}, expected {}",
            resp_tx_id, tx_id
        )));
    }

    if response[2] & 0x80 == 0 {
        return Err(ProbeError::Network("reply is not a DNS response".to_string()));
    }

    // RCODE is the lower 4 bits of byte 3
    match response[3] & 0x0F {
        0 => {}
        3 => return Err(ProbeError::Resolve("NXDOMAIN".to_string())),
        rcode => return Err(ProbeError::Resolve(format!("DNS error RCODE: {}", rcode))),
    }

    let qd_count = u16::from_be_bytes([response[4], response[5]]);
    let an_count = u16::from_be_bytes([response[6], response[7]]);

    let mut pos = HEADER_LEN;
    for _ in 0..qd_count {
        pos = skip_name(response, pos)?;
        pos = advance(response, pos, 4)?; // QTYPE + QCLASS
    }

    let mut found = 0;
    for _ in 0..an_count {
        pos = skip_name(response, pos)?;
        let fixed = advance(response, pos, 10)?;
        let rtype = u16::from_be_bytes([response[pos], response[pos + 1]]);
        let rclass = u16::from_be_bytes([response[pos + 2], response[pos + 3]]);
        let rdlength = u16::from_be_bytes([response[pos + 8], response[pos + 9]]) as usize;
        pos = advance(response, fixed, rdlength)?;

        if rtype == TYPE_A && rclass == CLASS_IN && rdlength == 4 {
            found += 1;
        }
    }

    Ok(found)
}

/// Skip an encoded (possibly compressed) name starting at `pos`.
fn skip_name(buf: &[u8], mut pos: usize) -> Result<usize, ProbeError> {
    loop {
        let len = *buf
            .get(pos)
            .ok_or_else(|| ProbeError::Network("truncated name in response".to_string()))?;
        match len {
            0 => return advance(buf, pos, 1),
            l if l & 0xC0 == 0xC0 => return advance(buf, pos, 2),
            l => pos = advance(buf, pos, 1 + l as usize)?,
        }
    }
}

fn advance(buf: &[u8], pos: usize, n: usize) -> Result<usize, ProbeError> {
    let next = pos + n;
    if next > buf.len() {
        return Err(ProbeError::Network("truncated response".to_string()));
    }
    Ok(next)
}
