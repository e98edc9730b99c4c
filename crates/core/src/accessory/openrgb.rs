use std::{collections::HashMap, sync::Mutex as StdMutex};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::Mutex,
};

use super::{AccessoryClient, DeviceInfo};
use crate::{BoxFuture, ColorRgb, KeysmashError, Result};

const MAGIC: [u8; 4] = *b"ORGB";
const HEADER_LEN: usize = 16;
/// Upper bound on a reply payload; anything larger is a framing error.
const MAX_PAYLOAD: u32 = 1 << 20;

const REQUEST_CONTROLLER_COUNT: u32 = 0;
const REQUEST_CONTROLLER_DATA: u32 = 1;
const SET_CLIENT_NAME: u32 = 50;
const UPDATE_LEDS: u32 = 1050;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    device: u32,
    packet: u32,
    len: u32,
}

impl Header {
    fn encode(self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&MAGIC);
        out[4..8].copy_from_slice(&self.device.to_le_bytes());
        out[8..12].copy_from_slice(&self.packet.to_le_bytes());
        out[12..].copy_from_slice(&self.len.to_le_bytes());
        out
    }

    fn decode(raw: &[u8; HEADER_LEN]) -> Result<Self> {
        if raw[..4] != MAGIC {
            return Err(KeysmashError::protocol("bad packet magic"));
        }
        let word = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        Ok(Self {
            device: word(4),
            packet: word(8),
            len: word(12),
        })
    }
}

fn packet(device: u32, packet: u32, payload: &[u8]) -> Vec<u8> {
    let header = Header {
        device,
        packet,
        len: payload.len() as u32,
    };
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    out
}

/// Payload of an LED update setting `count` LEDs to `color`.
fn update_leds_payload(color: ColorRgb, count: u16) -> Vec<u8> {
    let data_size = 4 + 2 + 4 * u32::from(count);
    let mut out = Vec::with_capacity(data_size as usize);
    out.extend_from_slice(&data_size.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    for _ in 0..count {
        out.extend_from_slice(&[color.r, color.g, color.b, 0]);
    }
    out
}

/// The parts of a controller description this crate cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSummary {
    pub name: String,
    pub led_count: usize,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| KeysmashError::protocol("controller data truncated"))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Length-prefixed, NUL-terminated string.
    fn string(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let raw = self.take(len)?;
        let raw = raw.strip_suffix(&[0u8]).unwrap_or(raw);
        Ok(String::from_utf8_lossy(raw).into_owned())
    }
}

/// Decodes a protocol-0 controller description far enough to recover the
/// device name and the number of LED colours.
pub fn decode_controller_data(payload: &[u8]) -> Result<ControllerSummary> {
    let mut r = Reader::new(payload);
    r.skip(4)?; // data size
    r.skip(4)?; // device type
    let name = r.string()?;
    for _ in 0..4 {
        r.string()?; // description, version, serial, location
    }

    let modes = r.u16()?;
    r.skip(4)?; // active mode
    for _ in 0..modes {
        r.string()?;
        // value, flags, speed min/max, colours min/max, speed, direction, colour mode
        r.skip(4 * 9)?;
        let colors = r.u16()? as usize;
        r.skip(4 * colors)?;
    }

    let zones = r.u16()?;
    for _ in 0..zones {
        r.string()?;
        r.skip(4 * 4)?; // type, leds min/max/count
        let matrix_len = r.u16()? as usize;
        r.skip(matrix_len)?;
    }

    let leds = r.u16()?;
    for _ in 0..leds {
        r.string()?;
        r.skip(4)?;
    }

    let led_count = r.u16()? as usize;
    r.skip(4 * led_count)?;

    Ok(ControllerSummary { name, led_count })
}

/// Client for the OpenRGB SDK server.
pub struct OpenRgbClient {
    address: String,
    client_name: String,
    stream: Mutex<Option<TcpStream>>,
    led_counts: StdMutex<HashMap<u32, usize>>,
}

impl OpenRgbClient {
    pub fn new(host: &str, port: u16, client_name: impl Into<String>) -> Self {
        Self {
            address: format!("{host}:{port}"),
            client_name: client_name.into(),
            stream: Mutex::new(None),
            led_counts: StdMutex::new(HashMap::new()),
        }
    }

    async fn request(&self, device: u32, id: u32) -> Result<Vec<u8>> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| KeysmashError::msg("accessory server not connected"))?;
        stream.write_all(&packet(device, id, &[])).await?;

        loop {
            let mut raw = [0u8; HEADER_LEN];
            stream.read_exact(&mut raw).await?;
            let header = Header::decode(&raw)?;
            if header.len > MAX_PAYLOAD {
                return Err(KeysmashError::protocol(format!(
                    "reply of {} bytes exceeds limit",
                    header.len
                )));
            }
            let mut payload = vec![0u8; header.len as usize];
            stream.read_exact(&mut payload).await?;
            // The server may interleave notifications such as device list updates.
            if header.packet == id && header.device == device {
                return Ok(payload);
            }
        }
    }

    async fn send(&self, bytes: Vec<u8>) -> Result<()> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| KeysmashError::msg("accessory server not connected"))?;
        stream.write_all(&bytes).await?;
        Ok(())
    }

    fn led_count(&self, device: u32) -> usize {
        self.led_counts
            .lock()
            .ok()
            .and_then(|counts| counts.get(&device).copied())
            .unwrap_or(1)
    }
}

impl AccessoryClient for OpenRgbClient {
    fn connect(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let stream = TcpStream::connect(&self.address).await?;
            *self.stream.lock().await = Some(stream);

            let mut name = self.client_name.as_bytes().to_vec();
            name.push(0);
            self.send(packet(0, SET_CLIENT_NAME, &name)).await
        })
    }

    fn enumerate_devices(&self) -> BoxFuture<'_, Result<Vec<DeviceInfo>>> {
        Box::pin(async move {
            let reply = self.request(0, REQUEST_CONTROLLER_COUNT).await?;
            let count = Reader::new(&reply).u32()?;

            let mut devices = Vec::with_capacity(count as usize);
            for index in 0..count {
                let payload = self.request(index, REQUEST_CONTROLLER_DATA).await?;
                let summary = decode_controller_data(&payload)?;
                devices.push(DeviceInfo {
                    index,
                    name: summary.name,
                    led_count: summary.led_count,
                });
            }

            if let Ok(mut counts) = self.led_counts.lock() {
                counts.clear();
                counts.extend(devices.iter().map(|d| (d.index, d.led_count)));
            }
            Ok(devices)
        })
    }

    fn set_all_leds(&self, device_index: u32, color: ColorRgb) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let count = u16::try_from(self.led_count(device_index)).unwrap_or(u16::MAX);
            let payload = update_leds_payload(color, count);
            self.send(packet(device_index, UPDATE_LEDS, &payload)).await
        })
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Some(mut stream) = self.stream.lock().await.take() {
                stream.shutdown().await?;
            }
            Ok(())
        })
    }
}

impl std::fmt::Debug for OpenRgbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRgbClient")
            .field("address", &self.address)
            .field("client_name", &self.client_name)
            .finish()
    }
}
