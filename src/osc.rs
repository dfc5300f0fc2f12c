//! OSC transport boundary.
//!
//! Outgoing commands go through the [`CommandSender`] trait so tests can
//! substitute a recording double without touching networking code. Inbound
//! feedback is received on a UDP socket, flattened out of bundles, and posted
//! to a bounded channel; the wire format never leaks past this module.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use anyhow::{Context, Result};
use rosc::{decoder, encoder, OscMessage, OscPacket, OscType};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::error::TransportError;

/// Depth of the feedback queue between the socket and the apply loop.
pub const FEEDBACK_QUEUE_DEPTH: usize = 1024;

/// One decoded feedback message, arguments split by type in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedbackMessage {
    pub addr: String,
    pub floats: Vec<f32>,
    pub ints: Vec<i32>,
    pub strings: Vec<String>,
}

impl FeedbackMessage {
    pub fn from_osc(msg: OscMessage) -> Self {
        let mut out = FeedbackMessage {
            addr: msg.addr,
            ..Default::default()
        };
        for arg in msg.args {
            match arg {
                OscType::Float(f) => out.floats.push(f),
                OscType::Double(d) => out.floats.push(d as f32),
                OscType::Int(i) => out.ints.push(i),
                OscType::Long(l) => out.ints.push(l as i32),
                OscType::Bool(b) => out.ints.push(b as i32),
                OscType::String(s) => out.strings.push(s),
                other => trace!(?other, "ignoring unsupported OSC argument"),
            }
        }
        out
    }
}

/// Flatten a packet into messages, recursing into nested bundles in order.
pub fn flatten_packet(packet: OscPacket, out: &mut Vec<FeedbackMessage>) {
    match packet {
        OscPacket::Message(msg) => out.push(FeedbackMessage::from_osc(msg)),
        OscPacket::Bundle(bundle) => {
            for element in bundle.content {
                flatten_packet(element, out);
            }
        }
    }
}

/// Value carried by one outgoing command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandValue {
    Float(f32),
    Int(i32),
    Str(String),
}

impl From<CommandValue> for OscType {
    fn from(value: CommandValue) -> Self {
        match value {
            CommandValue::Float(f) => OscType::Float(f),
            CommandValue::Int(i) => OscType::Int(i),
            CommandValue::Str(s) => OscType::String(s),
        }
    }
}

/// Outgoing command channel to the mixer.
///
/// Sends are fire-and-forget: the protocol is connectionless and
/// unacknowledged, so implementations log failures and drop the message.
pub trait CommandSender: Send + Sync {
    fn send(&self, addr: &str, value: CommandValue);
}

/// UDP implementation of [`CommandSender`] targeting the mixer.
pub struct UdpCommandSender {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpCommandSender {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).context("binding outgoing OSC socket")?;
        let target = (host, port)
            .to_socket_addrs()
            .with_context(|| format!("resolving mixer address {host}:{port}"))?
            .next()
            .with_context(|| format!("no address for {host}:{port}"))?;
        info!("sending commands to {target}");
        Ok(Self { socket, target })
    }

    fn encode_and_send(&self, addr: &str, arg: OscType) -> Result<(), TransportError> {
        let packet = OscPacket::Message(OscMessage {
            addr: addr.to_string(),
            args: vec![arg],
        });
        let bytes = encoder::encode(&packet).map_err(|e| TransportError::Encode(e.to_string()))?;
        self.socket.send_to(&bytes, self.target)?;
        Ok(())
    }
}

impl CommandSender for UdpCommandSender {
    fn send(&self, addr: &str, value: CommandValue) {
        trace!(addr, ?value, "command");
        if let Err(e) = self.encode_and_send(addr, value.into()) {
            warn!(addr, "dropping outgoing command: {e}");
        }
    }
}

/// Inbound feedback socket plus the decode loop feeding the apply path.
pub struct FeedbackReceiver {
    socket: tokio::net::UdpSocket,
    tx: mpsc::Sender<FeedbackMessage>,
}

impl FeedbackReceiver {
    /// Bind the listen socket. Failure here is the one fatal startup error.
    pub async fn bind(port: u16) -> Result<(Self, mpsc::Receiver<FeedbackMessage>)> {
        let socket = tokio::net::UdpSocket::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("binding OSC listen port {port}"))?;
        info!("listening for mixer feedback on port {port}");
        let (tx, rx) = mpsc::channel(FEEDBACK_QUEUE_DEPTH);
        Ok((Self { socket, tx }, rx))
    }

    /// Receive loop. Runs until the stop signal flips or the consumer side
    /// of the channel is dropped. Undecodable packets are dropped without
    /// stopping the loop.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut buf = vec![0u8; 65536];
        loop {
            tokio::select! {
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
                recv = self.socket.recv_from(&mut buf) => {
                    match recv {
                        Ok((len, _peer)) => {
                            match decoder::decode_udp(&buf[..len]) {
                                Ok((_, packet)) => {
                                    let mut messages = Vec::new();
                                    flatten_packet(packet, &mut messages);
                                    for msg in messages {
                                        // Blocking send keeps arrival order even
                                        // when the apply loop falls behind.
                                        if self.tx.send(msg).await.is_err() {
                                            debug!("feedback consumer gone, stopping receiver");
                                            return;
                                        }
                                    }
                                }
                                Err(e) => debug!("dropping undecodable packet: {e}"),
                            }
                        }
                        Err(e) => warn!("feedback socket error: {e}"),
                    }
                }
            }
        }
        debug!("feedback receiver stopped");
    }
}
