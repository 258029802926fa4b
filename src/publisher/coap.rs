//! Minimal block-wise CoAP PUT client (SPEC_FULL §10.1.4) — the one
//! genuinely new piece of transport machinery the expanded spec adds. It
//! sits entirely behind [`crate::transfer::TransferDriver`]; every other
//! test in this crate talks to a mock driver instead of this module.

use std::net::SocketAddr;
use std::time::Duration;

use coap_lite::{CoapOption, MessageClass, Packet, PacketType, RequestType, ResponseType};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::error::{PipelineError, Result};

const SENML_CBOR_CONTENT_FORMAT: u16 = 110;
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// CoAP block size is `2^(4+szx)` bytes; szx ranges 0..=6 (16..=1024 bytes),
/// with 6 the protocol maximum (config §6 `block_size_exp`, default 6).
fn block_size_bytes(szx: u8) -> usize {
    16usize << szx.min(6)
}

fn encode_block1(block_num: u32, more: bool, szx: u8) -> Vec<u8> {
    let value: u32 = (block_num << 4) | ((more as u32) << 3) | (szx as u32 & 0x7);
    let bytes = value.to_be_bytes();
    let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(3);
    bytes[first_nonzero..].to_vec()
}

/// PUT `payload` to `addr` + `path`, split into `block_size_exp`-sized blocks
/// carried by consecutive Block1-tagged requests. Returns total bytes sent.
pub async fn put_blockwise(
    socket: &UdpSocket,
    addr: SocketAddr,
    path: &str,
    payload: &[u8],
    block_size_exp: u8,
) -> Result<usize> {
    let szx = block_size_exp.min(6);
    let block_size = block_size_bytes(szx);
    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![&payload[0..0]]
    } else {
        payload.chunks(block_size).collect()
    };
    let total = chunks.len();

    for (num, chunk) in chunks.into_iter().enumerate() {
        let more = num + 1 < total;
        send_block(socket, addr, path, num as u32, szx, more, chunk).await?;
    }
    Ok(payload.len())
}

async fn send_block(
    socket: &UdpSocket,
    addr: SocketAddr,
    path: &str,
    block_num: u32,
    szx: u8,
    more: bool,
    chunk: &[u8],
) -> Result<()> {
    let mut packet = Packet::new();
    packet.header.set_version(1);
    packet.header.set_type(PacketType::Confirmable);
    packet.header.code = MessageClass::Request(RequestType::Put).into();
    packet.header.message_id = (block_num as u16).wrapping_add(1);
    packet.set_token(vec![(block_num & 0xff) as u8, ((block_num >> 8) & 0xff) as u8]);

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
    }
    packet.add_option(CoapOption::ContentFormat, SENML_CBOR_CONTENT_FORMAT.to_be_bytes().to_vec());
    packet.add_option(CoapOption::Block1, encode_block1(block_num, more, szx));
    packet.payload = chunk.to_vec();

    let bytes = packet
        .to_bytes()
        .map_err(|_| PipelineError::TransportFail("failed to encode CoAP packet".into()))?;
    socket.send_to(&bytes, addr).await.map_err(PipelineError::FsFail)?;

    let mut buf = [0u8; 1280];
    let (n, _) = timeout(RECV_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .map_err(|_| PipelineError::TransportFail("CoAP response timed out".into()))?
        .map_err(PipelineError::FsFail)?;

    let resp = Packet::from_bytes(&buf[..n])
        .map_err(|_| PipelineError::TransportFail("malformed CoAP response".into()))?;

    match MessageClass::from(resp.header.code) {
        MessageClass::Response(ResponseType::Continue) if more => Ok(()),
        MessageClass::Response(ResponseType::Changed) if !more => Ok(()),
        other => Err(PipelineError::TransportFail(format!("unexpected CoAP response: {other:?}"))),
    }
}
