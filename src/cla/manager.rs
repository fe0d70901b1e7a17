// SPDX-License-Identifier: Apache-2.0 OR MIT

//! CLA manager: contact-parameters registry and the per-contact management
//! task's reconnect state machine (§4.H).
//!
//! Scope: this module implements the half of §4.H driven by
//! `start_scheduled_contact`/`end_scheduled_contact` — the management task
//! that actively dials `cla_addr`, retries on failure, and re-dials after a
//! link tears down. Passive listening sockets (a CLA configured with
//! `tcp_active=false`) are a separate per-CLA responsibility, not named in
//! §4.H's scheduled-contact API, and are out of scope here.

use super::link::{Link, TxQueueHandle};
use super::mtcp::MtcpFramer;
use super::tcpclv3::{self, Tcpclv3Framer};
use super::tcpspp::TcpsppFramer;
use super::{Framer, PayloadType};
use crate::error::LinkIoError;
use crate::spp::header::Context as SppContext;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Delay between reconnect attempts (`CLA_TCP_RETRY_INTERVAL_MS` in the
/// source). The retrieved platform config defining its numeric value wasn't
/// part of the example pack; this value is this crate's Open Question
/// resolution, recorded in DESIGN.md.
pub const CLA_TCP_RETRY_INTERVAL: Duration = Duration::from_secs(2);
/// Maximum connect attempts before a scheduled contact's record terminates
/// (`CLA_TCP_MAX_RETRY_ATTEMPTS`, same provenance note as above).
pub const CLA_TCP_MAX_RETRY_ATTEMPTS: u32 = 10;

/// Which CLA a contact-parameters record dials, and the per-CLA parameters
/// its framers and handshake need.
#[derive(Debug, Clone)]
pub enum ClaKind {
    Mtcp,
    Tcpclv3 { local_eid: String },
    Tcpspp { apid: u16, crc_enabled: bool },
}

impl ClaKind {
    fn new_framer(&self) -> Box<dyn Framer + Send> {
        match self {
            Self::Mtcp => Box::new(MtcpFramer::new()),
            Self::Tcpclv3 { .. } => Box::new(Tcpclv3Framer::new()),
            Self::Tcpspp { apid, crc_enabled } => {
                Box::new(TcpsppFramer::new(SppContext::default(), *apid, *crc_enabled))
            }
        }
    }
}

/// Connection state of one contact-parameters record (§4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactState {
    Connecting,
    Connected,
    Established,
}

/// A peer contact-parameters record, address- or EID-keyed depending on the
/// CLA (§3: "key = CLA address for MTCP, peer EID for TCPCLv3").
struct ContactRecord {
    cla_addr: SocketAddr,
    kind: ClaKind,
    peer_eid: Option<String>,
    state: ContactState,
    in_contact: bool,
    opportunistic: bool,
    retry_count: u32,
    tx_queue: Option<TxQueueHandle>,
}

/// A snapshot of one contact's externally visible state, returned by
/// [`Manager::contacts`].
#[derive(Debug, Clone)]
pub struct ContactInfo {
    pub cla_addr: SocketAddr,
    pub peer_eid: Option<String>,
    pub state: ContactState,
    pub in_contact: bool,
    pub opportunistic: bool,
}

fn registry_key(kind: &ClaKind, peer_eid: Option<&str>, cla_addr: SocketAddr) -> String {
    match kind {
        ClaKind::Tcpclv3 { .. } => peer_eid.map_or_else(|| cla_addr.to_string(), str::to_string),
        ClaKind::Mtcp | ClaKind::Tcpspp { .. } => cla_addr.to_string(),
    }
}

/// Owns the contact-parameters registry for every CLA this node has
/// scheduled a contact on, and the management threads driving each one
/// (§4.H, §5).
pub struct Manager {
    on_payload: Arc<dyn Fn(PayloadType, &[u8]) + Send + Sync>,
    registry: Arc<Mutex<HashMap<String, ContactRecord>>>,
}

impl Manager {
    /// `on_payload` is invoked with every bundle payload assembled on any
    /// link this manager establishes.
    #[must_use]
    pub fn new(on_payload: impl Fn(PayloadType, &[u8]) + Send + Sync + 'static) -> Self {
        Self { on_payload: Arc::new(on_payload), registry: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Create a contact-parameters record with `opportunistic=false,
    /// in_contact=true` and launch its management task, or flip an existing
    /// record's `opportunistic` to false if one is already running (§4.H).
    pub fn start_scheduled_contact(&self, peer_eid: Option<String>, cla_addr: SocketAddr, kind: ClaKind) {
        let key = registry_key(&kind, peer_eid.as_deref(), cla_addr);

        let mut registry = self.registry.lock();
        if let Some(existing) = registry.get_mut(&key) {
            existing.opportunistic = false;
            existing.in_contact = true;
            return;
        }

        registry.insert(
            key.clone(),
            ContactRecord {
                cla_addr,
                kind: kind.clone(),
                peer_eid: peer_eid.clone(),
                state: ContactState::Connecting,
                in_contact: true,
                opportunistic: false,
                retry_count: 0,
                tx_queue: None,
            },
        );
        drop(registry);

        let registry = Arc::clone(&self.registry);
        let on_payload = Arc::clone(&self.on_payload);
        thread::Builder::new()
            .name(format!("cla-mgmt-{key}"))
            .spawn(move || run_management_task(key, cla_addr, kind, registry, on_payload))
            .expect("spawn CLA management task");
    }

    /// Mark a contact no longer scheduled: `in_contact=false`,
    /// `opportunistic=true`. The management task notices on its next
    /// `Established` → `Connecting` transition and terminates instead of
    /// reconnecting (§4.H).
    pub fn end_scheduled_contact(&self, peer_eid: Option<&str>, cla_addr: SocketAddr, kind: &ClaKind) {
        let key = registry_key(kind, peer_eid, cla_addr);
        let mut registry = self.registry.lock();
        if let Some(record) = registry.get_mut(&key) {
            record.in_contact = false;
            record.opportunistic = true;
        }
    }

    /// A handle to enqueue outgoing bundles on an established contact's
    /// link, if one currently exists.
    #[must_use]
    pub fn tx_queue(&self, peer_eid: Option<&str>, cla_addr: SocketAddr, kind: &ClaKind) -> Option<TxQueueHandle> {
        let key = registry_key(kind, peer_eid, cla_addr);
        self.registry.lock().get(&key).and_then(|r| r.tx_queue.clone())
    }

    /// A snapshot of every contact currently known to this manager.
    #[must_use]
    pub fn contacts(&self) -> Vec<ContactInfo> {
        self.registry
            .lock()
            .values()
            .map(|r| ContactInfo {
                cla_addr: r.cla_addr,
                peer_eid: r.peer_eid.clone(),
                state: r.state,
                in_contact: r.in_contact,
                opportunistic: r.opportunistic,
            })
            .collect()
    }
}

/// The management task body for one contact-parameters record (§4.H).
///
/// Runs on its own thread for the record's whole lifetime: `Connecting` until
/// a TCP connection succeeds, `Connected` through the CLA-specific handshake,
/// `Established` for as long as the link stays up, then back to `Connecting`
/// unless the contact is opportunistic with no further scheduled use, in
/// which case the record is removed and the task returns.
fn run_management_task(
    key: String,
    cla_addr: SocketAddr,
    kind: ClaKind,
    registry: Arc<Mutex<HashMap<String, ContactRecord>>>,
    on_payload: Arc<dyn Fn(PayloadType, &[u8]) + Send + Sync>,
) {
    loop {
        set_state(&registry, &key, ContactState::Connecting);

        let stream = match connect_with_retry(&registry, &key, cla_addr) {
            Some(stream) => stream,
            None => break,
        };

        set_state(&registry, &key, ContactState::Connected);

        let (peer_eid, rx_stream, tx_stream) = match handshake(&kind, stream) {
            Ok(parts) => parts,
            Err(e) => {
                log::warn!("cla manager: handshake with {cla_addr} failed: {e}");
                bump_retry(&registry, &key);
                continue;
            }
        };

        if let Some(eid) = &peer_eid {
            rekey_on_peer_eid(&registry, &key, eid.clone());
        }

        set_state(&registry, &key, ContactState::Established);
        log::debug!("cla manager: link established with {cla_addr}");

        let on_payload_cloned = Arc::clone(&on_payload);
        let link = Link::spawn(
            rx_stream,
            tx_stream,
            kind.new_framer(),
            kind.new_framer(),
            move |payload_type, bytes| on_payload_cloned(payload_type, bytes),
            || {},
        );
        set_tx_queue(&registry, &key, Some(link.tx_queue()));

        // Block until the link's own workers notice the peer went away.
        while link.is_active() {
            thread::sleep(Duration::from_millis(100));
        }
        link.disconnect_and_join();
        set_tx_queue(&registry, &key, None);

        log::debug!("cla manager: link with {cla_addr} torn down");

        if should_terminate(&registry, &key) {
            break;
        }
    }

    registry.lock().remove(&key);
    log::debug!("cla manager: terminating contact management task for {cla_addr}");
}

/// Attempt `connect(cla_addr)`, retrying on failure up to
/// `CLA_TCP_MAX_RETRY_ATTEMPTS` times with `CLA_TCP_RETRY_INTERVAL` between
/// attempts. Returns `None` once the retry budget is exhausted.
fn connect_with_retry(
    registry: &Mutex<HashMap<String, ContactRecord>>,
    key: &str,
    cla_addr: SocketAddr,
) -> Option<TcpStream> {
    loop {
        match TcpStream::connect(cla_addr) {
            Ok(stream) => {
                reset_retry(registry, key);
                return Some(stream);
            }
            Err(e) => {
                let attempt = bump_retry(registry, key);
                if attempt > CLA_TCP_MAX_RETRY_ATTEMPTS {
                    log::warn!("cla manager: final retry to {cla_addr} failed: {e}");
                    return None;
                }
                log::warn!(
                    "cla manager: connect to {cla_addr} failed ({e}), retry {attempt} of {CLA_TCP_MAX_RETRY_ATTEMPTS} in {:?}",
                    CLA_TCP_RETRY_INTERVAL
                );
                thread::sleep(CLA_TCP_RETRY_INTERVAL);
            }
        }
    }
}

/// Run the CLA-specific handshake (no-op for MTCP/TCPSPP, full "dtn!"
/// exchange for TCPCLv3), splitting the stream into independent read/write
/// halves for the link engine's two worker threads.
fn handshake(
    kind: &ClaKind,
    stream: TcpStream,
) -> Result<(Option<String>, TcpStream, TcpStream), LinkIoError> {
    let mut handshake_stream = stream.try_clone()?;
    let peer_eid = match kind {
        ClaKind::Mtcp | ClaKind::Tcpspp { .. } => None,
        ClaKind::Tcpclv3 { local_eid } => Some(tcpclv3::perform_handshake(&mut handshake_stream, local_eid)?),
    };
    let tx_stream = stream.try_clone()?;
    Ok((peer_eid, stream, tx_stream))
}

fn set_state(registry: &Mutex<HashMap<String, ContactRecord>>, key: &str, state: ContactState) {
    if let Some(record) = registry.lock().get_mut(key) {
        record.state = state;
    }
}

fn set_tx_queue(registry: &Mutex<HashMap<String, ContactRecord>>, key: &str, tx_queue: Option<TxQueueHandle>) {
    if let Some(record) = registry.lock().get_mut(key) {
        record.tx_queue = tx_queue;
    }
}

fn bump_retry(registry: &Mutex<HashMap<String, ContactRecord>>, key: &str) -> u32 {
    let mut registry = registry.lock();
    let Some(record) = registry.get_mut(key) else { return u32::MAX };
    record.retry_count += 1;
    record.retry_count
}

fn reset_retry(registry: &Mutex<HashMap<String, ContactRecord>>, key: &str) {
    if let Some(record) = registry.lock().get_mut(key) {
        record.retry_count = 0;
    }
}

/// Re-key a TCPCLv3 record from its initial `cla_addr`-based key to the
/// EID learned at handshake time (§4.H's "association rule", §4.F).
fn rekey_on_peer_eid(registry: &Mutex<HashMap<String, ContactRecord>>, old_key: &str, peer_eid: String) {
    let mut registry = registry.lock();
    if old_key == peer_eid {
        return;
    }
    if let Some(mut record) = registry.remove(old_key) {
        record.peer_eid = Some(peer_eid.clone());
        registry.insert(peer_eid, record);
    }
}

/// `true` once the record should stop reconnecting: opportunistic and no
/// longer in a scheduled contact (§4.H).
fn should_terminate(registry: &Mutex<HashMap<String, ContactRecord>>, key: &str) -> bool {
    registry.lock().get(key).is_none_or(|r| r.opportunistic && !r.in_contact)
}
