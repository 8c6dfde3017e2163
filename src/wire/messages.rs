//! Typed protocol messages
//!
//! One struct per payload, each with byte-exact `read`/`write` against
//! the wire layout. `Message` is the tagged union the codec produces
//! and consumes; its `command` strings match the 12-byte NUL-padded
//! command field of the envelope.

use bytes::BufMut;
use num_bigint::BigUint;
use num_traits::One;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::crypto;
use crate::wire::buffer::{write_varbytes, write_varint, write_varstr, PayloadReader};
use crate::Hash;

/// Service bit advertising that a peer keeps a full copy of the block
/// chain and can serve historical blocks.
pub const NODE_NETWORK: u64 = 1;

/// Maximum accepted payload length.
pub const MAX_MESSAGE_SIZE: u32 = 32 * 1024 * 1024;

/// Maximum entries in one `inv` or `getdata`.
pub const MAX_INV_ITEMS: usize = 50_000;
/// Maximum entries in one `addr`.
pub const MAX_ADDRESSES: usize = 1_000;
/// Maximum locator hashes in `getblocks`/`getheaders`.
pub const MAX_LOCATOR_HASHES: usize = 500;
/// Maximum headers in one `headers` message.
pub const MAX_HEADERS: usize = 2_000;
/// Maximum script length carried by a tx input or output.
const MAX_SCRIPT_BYTES: usize = 10_000;
/// Maximum alert payload or signature length.
const MAX_ALERT_BYTES: usize = 64 * 1024;

/// Signature covers the whole transaction.
pub const SIGHASH_ALL: u8 = 1;
/// Signature covers no outputs.
pub const SIGHASH_NONE: u8 = 2;
/// Signature covers only the output paired with the signed input.
pub const SIGHASH_SINGLE: u8 = 3;
/// Modifier: signature covers only the signed input.
pub const SIGHASH_ANYONECANPAY: u8 = 0x80;

/// An IP endpoint as carried in `version` and `addr` payloads.
///
/// IPv4 only; the 16-byte wire field holds the v4-mapped form. Equality
/// and hashing consider the endpoint (address and port) alone so that a
/// set of these counts distinct peers.
#[derive(Debug, Clone)]
pub struct PeerAddress {
    /// Last-seen time, present in `addr` entries but not inside
    /// `version`. Zero when unknown.
    pub time: u32,
    pub services: u64,
    /// IPv4-mapped IPv6 bytes.
    pub ip: [u8; 16],
    pub port: u16,
}

impl PeerAddress {
    pub fn new(addr: SocketAddr, services: u64) -> Self {
        let ip = match addr.ip() {
            IpAddr::V4(v4) => v4_mapped(v4),
            IpAddr::V6(v6) => v6.octets(),
        };
        PeerAddress {
            time: 0,
            services,
            ip,
            port: addr.port(),
        }
    }

    /// The all-zero placeholder used when no address is known.
    pub fn unspecified() -> Self {
        PeerAddress::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0), 0)
    }

    pub fn is_ipv4(&self) -> bool {
        self.ip[..10] == [0u8; 10] && self.ip[10] == 0xff && self.ip[11] == 0xff
    }

    /// The endpoint as a socket address, when it is IPv4.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        if !self.is_ipv4() {
            return None;
        }
        let v4 = Ipv4Addr::new(self.ip[12], self.ip[13], self.ip[14], self.ip[15]);
        Some(SocketAddr::new(IpAddr::V4(v4), self.port))
    }

    fn write(&self, buf: &mut Vec<u8>, with_timestamp: bool) {
        if with_timestamp {
            buf.put_u32_le(self.time);
        }
        buf.put_u64_le(self.services);
        buf.put_slice(&self.ip);
        // Port is one of the two big-endian fields in the protocol.
        buf.put_u16(self.port);
    }

    fn read(r: &mut PayloadReader<'_>, with_timestamp: bool) -> Result<Self, String> {
        let time = if with_timestamp { r.read_u32_le()? } else { 0 };
        let services = r.read_u64_le()?;
        let mut ip = [0u8; 16];
        ip.copy_from_slice(r.read(16)?);
        let port = r.read_u16_be()?;
        Ok(PeerAddress {
            time,
            services,
            ip,
            port,
        })
    }
}

fn v4_mapped(v4: Ipv4Addr) -> [u8; 16] {
    let mut ip = [0u8; 16];
    ip[10] = 0xff;
    ip[11] = 0xff;
    ip[12..16].copy_from_slice(&v4.octets());
    ip
}

impl PartialEq for PeerAddress {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip && self.port == other.port
    }
}

impl Eq for PeerAddress {}

impl std::hash::Hash for PeerAddress {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ip.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.socket_addr() {
            Some(addr) => write!(f, "{addr}"),
            None => write!(f, "[non-ipv4]:{}", self.port),
        }
    }
}

/// Handshake announcement: who we are and how tall our chain is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    pub version: u32,
    pub services: u64,
    pub timestamp: u64,
    pub addr_recv: PeerAddress,
    pub addr_from: PeerAddress,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: u32,
}

impl VersionMessage {
    /// Whether the peer advertises a full copy of the block chain.
    pub fn has_blockchain(&self) -> bool {
        self.services & NODE_NETWORK != 0
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.put_u32_le(self.version);
        buf.put_u64_le(self.services);
        buf.put_u64_le(self.timestamp);
        self.addr_recv.write(buf, false);
        self.addr_from.write(buf, false);
        buf.put_u64_le(self.nonce);
        write_varstr(buf, &self.user_agent);
        buf.put_u32_le(self.start_height);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, String> {
        let version = r.read_u32_le()?;
        let services = r.read_u64_le()?;
        let timestamp = r.read_u64_le()?;
        let addr_recv = PeerAddress::read(r, false)?;
        // Fields below only exist from protocol 106 on; ancient peers
        // stop after the receiver address.
        let mut msg = VersionMessage {
            version,
            services,
            timestamp,
            addr_recv,
            addr_from: PeerAddress::unspecified(),
            nonce: 0,
            user_agent: String::new(),
            start_height: 0,
        };
        if version >= 106 && r.remaining() > 0 {
            msg.addr_from = PeerAddress::read(r, false)?;
            msg.nonce = r.read_u64_le()?;
            if r.remaining() > 0 {
                msg.user_agent = r.read_varstr(256)?;
            }
            if r.remaining() >= 4 {
                msg.start_height = r.read_u32_le()?;
            }
        }
        Ok(msg)
    }
}

/// Keep-alive probe. Carries a nonce from BIP31 peers; no reply is
/// required at this protocol version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingMessage {
    pub nonce: Option<u64>,
}

impl PingMessage {
    fn write(&self, buf: &mut Vec<u8>) {
        if let Some(nonce) = self.nonce {
            buf.put_u64_le(nonce);
        }
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, String> {
        let nonce = if r.remaining() >= 8 {
            Some(r.read_u64_le()?)
        } else {
            None
        };
        Ok(PingMessage { nonce })
    }
}

/// Gossip of known peer endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrMessage {
    pub addresses: Vec<PeerAddress>,
}

impl AddrMessage {
    fn write(&self, buf: &mut Vec<u8>) {
        write_varint(buf, self.addresses.len() as u64);
        for addr in &self.addresses {
            addr.write(buf, true);
        }
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, String> {
        let count = r.read_varint()?;
        if count > MAX_ADDRESSES as u64 {
            return Err(format!("address count {count} exceeds {MAX_ADDRESSES}"));
        }
        let mut addresses = Vec::with_capacity(count as usize);
        for _ in 0..count {
            addresses.push(PeerAddress::read(r, true)?);
        }
        Ok(AddrMessage { addresses })
    }
}

/// Kind tag of an inventory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvType {
    Error,
    Transaction,
    Block,
}

impl InvType {
    fn as_u32(self) -> u32 {
        match self {
            InvType::Error => 0,
            InvType::Transaction => 1,
            InvType::Block => 2,
        }
    }

    fn from_u32(value: u32) -> Result<Self, String> {
        match value {
            0 => Ok(InvType::Error),
            1 => Ok(InvType::Transaction),
            2 => Ok(InvType::Block),
            other => Err(format!("unknown inventory type {other}")),
        }
    }
}

/// `(type, hash)` pair advertised in `inv` and requested via `getdata`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InventoryItem {
    pub kind: InvType,
    pub hash: Hash,
}

impl InventoryItem {
    pub fn transaction(hash: Hash) -> Self {
        InventoryItem {
            kind: InvType::Transaction,
            hash,
        }
    }

    pub fn block(hash: Hash) -> Self {
        InventoryItem {
            kind: InvType::Block,
            hash,
        }
    }
}

impl fmt::Display for InventoryItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.kind, hex::encode(self.hash))
    }
}

/// Item list shared by `inv` and `getdata`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryMessage {
    pub items: Vec<InventoryItem>,
}

impl InventoryMessage {
    fn write(&self, buf: &mut Vec<u8>) {
        write_varint(buf, self.items.len() as u64);
        for item in &self.items {
            buf.put_u32_le(item.kind.as_u32());
            buf.put_slice(&item.hash);
        }
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, String> {
        let count = r.read_varint()?;
        if count > MAX_INV_ITEMS as u64 {
            return Err(format!("inventory count {count} exceeds {MAX_INV_ITEMS}"));
        }
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let kind = InvType::from_u32(r.read_u32_le()?)?;
            let hash = r.read_hash()?;
            items.push(InventoryItem { kind, hash });
        }
        Ok(InventoryMessage { items })
    }
}

fn write_locator(buf: &mut Vec<u8>, version: u32, locator: &[Hash], stop_hash: &Hash) {
    buf.put_u32_le(version);
    write_varint(buf, locator.len() as u64);
    for hash in locator {
        buf.put_slice(hash);
    }
    buf.put_slice(stop_hash);
}

fn read_locator(r: &mut PayloadReader<'_>) -> Result<(u32, Vec<Hash>, Hash), String> {
    let version = r.read_u32_le()?;
    let count = r.read_varint()?;
    if count > MAX_LOCATOR_HASHES as u64 {
        return Err(format!("locator count {count} exceeds {MAX_LOCATOR_HASHES}"));
    }
    let mut locator = Vec::with_capacity(count as usize);
    for _ in 0..count {
        locator.push(r.read_hash()?);
    }
    let stop_hash = r.read_hash()?;
    Ok((version, locator, stop_hash))
}

/// Request for block inventory following a chain locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBlocksMessage {
    pub version: u32,
    pub locator: Vec<Hash>,
    pub stop_hash: Hash,
}

/// Request for headers following a chain locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetHeadersMessage {
    pub version: u32,
    pub locator: Vec<Hash>,
    pub stop_hash: Hash,
}

/// Reference to a spent output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    fn write(&self, buf: &mut Vec<u8>) {
        buf.put_slice(&self.hash);
        buf.put_u32_le(self.index);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, String> {
        let hash = r.read_hash()?;
        let index = r.read_u32_le()?;
        Ok(OutPoint { hash, index })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    pub previous_output: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxInput {
    fn write(&self, buf: &mut Vec<u8>) {
        self.previous_output.write(buf);
        write_varbytes(buf, &self.script_sig);
        buf.put_u32_le(self.sequence);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, String> {
        let previous_output = OutPoint::read(r)?;
        let script_sig = r.read_varbytes(MAX_SCRIPT_BYTES)?;
        let sequence = r.read_u32_le()?;
        Ok(TxInput {
            previous_output,
            script_sig,
            sequence,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    /// Value in the smallest unit. `u64::MAX` marks the blanked
    /// outputs of a `SIGHASH_SINGLE` hash computation.
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

impl TxOutput {
    fn write(&self, buf: &mut Vec<u8>) {
        buf.put_u64_le(self.value);
        write_varbytes(buf, &self.script_pubkey);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, String> {
        let value = r.read_u64_le()?;
        let script_pubkey = r.read_varbytes(MAX_SCRIPT_BYTES)?;
        Ok(TxOutput {
            value,
            script_pubkey,
        })
    }
}

/// A transaction as carried by `tx` messages and block bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.put_u32_le(self.version);
        write_varint(buf, self.inputs.len() as u64);
        for input in &self.inputs {
            input.write(buf);
        }
        write_varint(buf, self.outputs.len() as u64);
        for output in &self.outputs {
            output.write(buf);
        }
        buf.put_u32_le(self.lock_time);
    }

    pub(crate) fn read(r: &mut PayloadReader<'_>) -> Result<Self, String> {
        let version = r.read_u32_le()?;
        let input_count = r.read_varint()?;
        if input_count > r.remaining() as u64 {
            return Err(format!("implausible input count {input_count}"));
        }
        let mut inputs = Vec::with_capacity(input_count as usize);
        for _ in 0..input_count {
            inputs.push(TxInput::read(r)?);
        }
        let output_count = r.read_varint()?;
        if output_count > r.remaining() as u64 {
            return Err(format!("implausible output count {output_count}"));
        }
        let mut outputs = Vec::with_capacity(output_count as usize);
        for _ in 0..output_count {
            outputs.push(TxOutput::read(r)?);
        }
        let lock_time = r.read_u32_le()?;
        Ok(Transaction {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write(&mut buf);
        buf
    }

    /// Transaction id: double SHA-256 of the serialized form.
    pub fn hash(&self) -> Hash {
        crypto::sha256d(&self.to_bytes())
    }

    /// Hash committed to by a signature over input `input_index`.
    ///
    /// `connected_script` replaces the signed input's script; the other
    /// inputs' scripts are blanked. `sighash_flags` selects which
    /// outputs and inputs the signature covers. Out-of-range indices
    /// yield the defined degenerate hash (a one followed by zeros)
    /// rather than failing, matching the reference behavior.
    pub fn signature_hash(
        &self,
        input_index: usize,
        connected_script: &[u8],
        sighash_flags: u8,
    ) -> [u8; 32] {
        if input_index >= self.inputs.len() {
            return one_hash();
        }

        let mut tx = self.clone();
        for input in &mut tx.inputs {
            input.script_sig.clear();
        }
        tx.inputs[input_index].script_sig = connected_script.to_vec();

        match sighash_flags & 0x1f {
            SIGHASH_NONE => {
                tx.outputs.clear();
                zero_other_sequences(&mut tx, input_index);
            }
            SIGHASH_SINGLE => {
                if input_index >= tx.outputs.len() {
                    return one_hash();
                }
                tx.outputs.truncate(input_index + 1);
                for output in &mut tx.outputs[..input_index] {
                    output.value = u64::MAX;
                    output.script_pubkey.clear();
                }
                zero_other_sequences(&mut tx, input_index);
            }
            _ => {}
        }

        if sighash_flags & SIGHASH_ANYONECANPAY != 0 {
            tx.inputs = vec![tx.inputs[input_index].clone()];
        }

        let mut buf = tx.to_bytes();
        buf.put_u32_le(sighash_flags as u32);
        crypto::sha256d(&buf)
    }
}

fn zero_other_sequences(tx: &mut Transaction, input_index: usize) {
    for (i, input) in tx.inputs.iter_mut().enumerate() {
        if i != input_index {
            input.sequence = 0;
        }
    }
}

fn one_hash() -> [u8; 32] {
    let mut hash = [0u8; 32];
    hash[0] = 1;
    hash
}

impl crate::script::SignatureHash for Transaction {
    fn signature_hash(
        &self,
        input_index: usize,
        connected_script: &[u8],
        sighash_flags: u8,
    ) -> [u8; 32] {
        Transaction::signature_hash(self, input_index, connected_script, sighash_flags)
    }
}

/// The 80-byte block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_block: Hash,
    pub merkle_root: Hash,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.put_u32_le(self.version);
        buf.put_slice(&self.prev_block);
        buf.put_slice(&self.merkle_root);
        buf.put_u32_le(self.time);
        buf.put_u32_le(self.bits);
        buf.put_u32_le(self.nonce);
    }

    pub(crate) fn read(r: &mut PayloadReader<'_>) -> Result<Self, String> {
        Ok(BlockHeader {
            version: r.read_u32_le()?,
            prev_block: r.read_hash()?,
            merkle_root: r.read_hash()?,
            time: r.read_u32_le()?,
            bits: r.read_u32_le()?,
            nonce: r.read_u32_le()?,
        })
    }

    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(80);
        self.write(&mut buf);
        crypto::sha256d(&buf)
    }

    /// Expected number of hashes needed to find a block at this
    /// difficulty: `2^256 / (target + 1)`.
    pub fn work(&self) -> BigUint {
        let target = compact_to_target(self.bits);
        (BigUint::one() << 256u32) / (target + BigUint::one())
    }
}

/// Decode the compact difficulty encoding into the full target.
fn compact_to_target(bits: u32) -> BigUint {
    let mantissa = bits & 0x007f_ffff;
    let exponent = bits >> 24;
    if exponent <= 3 {
        BigUint::from(mantissa >> (8 * (3 - exponent)))
    } else {
        BigUint::from(mantissa) << (8 * (exponent - 3))
    }
}

/// A full block: header plus transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn write(&self, buf: &mut Vec<u8>) {
        self.header.write(buf);
        write_varint(buf, self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.write(buf);
        }
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, String> {
        let header = BlockHeader::read(r)?;
        let count = r.read_varint()?;
        if count > r.remaining() as u64 {
            return Err(format!("implausible transaction count {count}"));
        }
        let mut transactions = Vec::with_capacity(count as usize);
        for _ in 0..count {
            transactions.push(Transaction::read(r)?);
        }
        Ok(Block {
            header,
            transactions,
        })
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }
}

/// Batch of headers answering a `getheaders`. Each entry carries the
/// wire's vestigial zero transaction count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersMessage {
    pub headers: Vec<BlockHeader>,
}

impl HeadersMessage {
    fn write(&self, buf: &mut Vec<u8>) {
        write_varint(buf, self.headers.len() as u64);
        for header in &self.headers {
            header.write(buf);
            write_varint(buf, 0);
        }
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, String> {
        let count = r.read_varint()?;
        if count > MAX_HEADERS as u64 {
            return Err(format!("header count {count} exceeds {MAX_HEADERS}"));
        }
        let mut headers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            headers.push(BlockHeader::read(r)?);
            r.read_varint()?;
        }
        Ok(HeadersMessage { headers })
    }
}

/// Signed network alert, kept opaque and handed to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

impl AlertMessage {
    fn write(&self, buf: &mut Vec<u8>) {
        write_varbytes(buf, &self.payload);
        write_varbytes(buf, &self.signature);
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self, String> {
        let payload = r.read_varbytes(MAX_ALERT_BYTES)?;
        let signature = r.read_varbytes(MAX_ALERT_BYTES)?;
        Ok(AlertMessage { payload, signature })
    }
}

/// A protocol message with its typed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionMessage),
    Verack,
    Ping(PingMessage),
    Addr(AddrMessage),
    Inv(InventoryMessage),
    GetData(InventoryMessage),
    GetBlocks(GetBlocksMessage),
    GetHeaders(GetHeadersMessage),
    Tx(Transaction),
    Block(Block),
    Headers(HeadersMessage),
    Alert(AlertMessage),
}

impl Message {
    /// The envelope command string for this payload.
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::Verack => "verack",
            Message::Ping(_) => "ping",
            Message::Addr(_) => "addr",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::GetBlocks(_) => "getblocks",
            Message::GetHeaders(_) => "getheaders",
            Message::Tx(_) => "tx",
            Message::Block(_) => "block",
            Message::Headers(_) => "headers",
            Message::Alert(_) => "alert",
        }
    }

    pub fn write_payload(&self, buf: &mut Vec<u8>) {
        match self {
            Message::Version(m) => m.write(buf),
            Message::Verack => {}
            Message::Ping(m) => m.write(buf),
            Message::Addr(m) => m.write(buf),
            Message::Inv(m) | Message::GetData(m) => m.write(buf),
            Message::GetBlocks(m) => write_locator(buf, m.version, &m.locator, &m.stop_hash),
            Message::GetHeaders(m) => write_locator(buf, m.version, &m.locator, &m.stop_hash),
            Message::Tx(m) => m.write(buf),
            Message::Block(m) => m.write(buf),
            Message::Headers(m) => m.write(buf),
            Message::Alert(m) => m.write(buf),
        }
    }

    /// Parse a payload for a known command. Returns `Ok(None)` for a
    /// command this client does not understand, which the codec logs
    /// and skips.
    pub fn from_payload(
        command: &str,
        payload: &[u8],
    ) -> Result<Option<Message>, crate::error::ProtocolError> {
        let mut r = PayloadReader::new(payload);
        let parsed: Result<Message, String> = match command {
            "version" => VersionMessage::read(&mut r).map(Message::Version),
            "verack" => Ok(Message::Verack),
            "ping" => PingMessage::read(&mut r).map(Message::Ping),
            "addr" => AddrMessage::read(&mut r).map(Message::Addr),
            "inv" => InventoryMessage::read(&mut r).map(Message::Inv),
            "getdata" => InventoryMessage::read(&mut r).map(Message::GetData),
            "getblocks" => read_locator(&mut r).map(|(version, locator, stop_hash)| {
                Message::GetBlocks(GetBlocksMessage {
                    version,
                    locator,
                    stop_hash,
                })
            }),
            "getheaders" => read_locator(&mut r).map(|(version, locator, stop_hash)| {
                Message::GetHeaders(GetHeadersMessage {
                    version,
                    locator,
                    stop_hash,
                })
            }),
            "tx" => Transaction::read(&mut r).map(Message::Tx),
            "block" => Block::read(&mut r).map(Message::Block),
            "headers" => HeadersMessage::read(&mut r).map(Message::Headers),
            "alert" => AlertMessage::read(&mut r).map(Message::Alert),
            _ => return Ok(None),
        };
        match parsed {
            Ok(msg) => Ok(Some(msg)),
            Err(reason) => Err(crate::error::ProtocolError::malformed(command, reason)),
        }
    }
}
