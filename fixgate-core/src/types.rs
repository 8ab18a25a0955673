/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Core types for gateway sessions.
//!
//! This module provides the fundamental identifiers used throughout fixgate:
//! - [`SessionId`]: locally-assigned 64-bit session identifier
//! - [`SeqNum`]: session-layer sequence number, never zero on the wire
//! - [`ConnectionUuid`]: iLink3 connection-lifetime identifier
//! - [`Timestamp`]: epoch-nanosecond stamp shared by both protocols
//! - [`CompId`]: FIX component identifier, restricted to tag=value-safe bytes
//! - [`FixSessionKey`] / [`IlinkSessionKey`]: protocol-specific session tuples

use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum length for CompID strings in bytes.
pub const COMP_ID_MAX_LEN: usize = 32;

/// Library id reserved for the engine itself (sessions in the unowned pool).
pub const ENGINE_LIBRARY_ID: LibraryId = LibraryId(0);

/// Sentinel for "no retransmit request in flight".
pub const NOT_AWAITING_RETRANSMIT: u64 = u64::MAX;

/// Locally-assigned identifier for a session.
///
/// Ids are allocated from a persistent counter so that a session keeps its id
/// across engine restarts. Sequence-store entries are keyed by this id and
/// outlive the in-memory session object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Creates a session id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw id value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for SessionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a library connected to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct LibraryId(pub i32);

impl LibraryId {
    /// Returns the raw id value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> i32 {
        self.0
    }
}

impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session-layer message sequence number.
///
/// Both protocols number messages from 1 within a sequence stream: a FIX
/// stream runs until an explicit SequenceReset, an iLink3 stream is scoped
/// to its [`ConnectionUuid`] and restarts at 1 when a fresh uuid is
/// negotiated. Zero never appears on the wire, so the niche doubles as the
/// absent case in `Option<SeqNum>` and a parsed `MsgSeqNum=0` is rejected at
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeqNum(NonZeroU64);

impl SeqNum {
    /// The first number of a fresh sequence stream.
    pub const FIRST: Self = Self(NonZeroU64::MIN);

    /// Validates a wire value into a sequence number.
    ///
    /// # Returns
    /// `None` for zero, which no conformant peer ever sends.
    #[inline]
    #[must_use]
    pub fn new(value: u64) -> Option<Self> {
        NonZeroU64::new(value).map(Self)
    }

    /// Returns the raw sequence number value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0.get()
    }

    /// Claims this number for an outbound message and steps to its
    /// successor, returning the claimed number.
    #[inline]
    pub fn advance(&mut self) -> Self {
        let claimed = *self;
        self.0 = self.0.saturating_add(1);
        claimed
    }

    /// Returns how many messages are missing between this expected number
    /// and a `received` one that arrived ahead of it; zero when nothing
    /// was skipped.
    #[inline]
    #[must_use]
    pub const fn gap_to(self, received: Self) -> u64 {
        received.0.get().saturating_sub(self.0.get())
    }

    /// Returns true when this received number is behind `expected` — the
    /// condition the low-sequence guard checks on unflagged messages.
    #[inline]
    #[must_use]
    pub const fn is_behind(self, expected: Self) -> bool {
        self.0.get() < expected.0.get()
    }
}

impl Default for SeqNum {
    fn default() -> Self {
        Self::FIRST
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// iLink3 connection-lifetime identifier.
///
/// A fresh connection stamps a new uuid from epoch nanoseconds at connect
/// time. Re-establishment presents the previous uuid so the exchange can
/// resume the sequence stream.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ConnectionUuid(u64);

impl ConnectionUuid {
    /// The null uuid, never produced by a live connection.
    pub const NULL: Self = Self(0);

    /// Creates a uuid from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw uuid value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Returns true if this is the null uuid.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ConnectionUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Epoch-nanosecond wall-clock stamp.
///
/// iLink3 carries request timestamps as raw nanoseconds since the Unix
/// epoch, and connection uuids are minted from the same value, so
/// nanoseconds are the native representation here. Rendering into the FIX
/// SendingTime text form lives with the text codec, not in core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp from nanoseconds since the Unix epoch.
    #[inline]
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a timestamp from milliseconds since the Unix epoch.
    #[inline]
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * 1_000_000)
    }

    /// Reads the system clock.
    #[inline]
    #[must_use]
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(since_epoch.as_nanos() as u64)
    }

    /// Returns nanoseconds since the Unix epoch.
    #[inline]
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Returns milliseconds since the Unix epoch.
    #[inline]
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Returns the nanoseconds elapsed since an `earlier` stamp, zero when
    /// the clock stepped backwards between the two readings.
    #[inline]
    #[must_use]
    pub const fn nanos_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// Component identifier for FIX sessions.
///
/// Used for SenderCompID (tag 49), TargetCompID (tag 56), and the optional
/// sub and location ids. Values travel inside tag=value fields, so only
/// graphic ASCII is accepted: an embedded SOH, control byte, or space would
/// corrupt the framing or the identity comparison. Capacity is 32 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompId(ArrayString<COMP_ID_MAX_LEN>);

impl CompId {
    /// Validates and creates a CompId.
    ///
    /// # Returns
    /// `None` when the string is empty, longer than the capacity, or
    /// contains anything other than graphic ASCII.
    #[must_use]
    pub fn new(s: &str) -> Option<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_graphic()) {
            return None;
        }
        ArrayString::from(s).ok().map(Self)
    }

    /// Returns the CompId as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns the CompId as wire bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for CompId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Identifying tuple for a FIX session.
///
/// Two sessions are the same iff all six components match. Sub and location
/// ids are optional and compare as `None` when unused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FixSessionKey {
    /// SenderCompID of messages sent by the gateway (tag 49).
    pub sender_comp_id: CompId,
    /// SenderCompID of messages received by the gateway (tag 56 outbound).
    pub target_comp_id: CompId,
    /// Optional SenderSubID (tag 50).
    pub sender_sub_id: Option<CompId>,
    /// Optional TargetSubID (tag 57).
    pub target_sub_id: Option<CompId>,
    /// Optional SenderLocationID (tag 142).
    pub sender_location_id: Option<CompId>,
    /// Optional TargetLocationID (tag 143).
    pub target_location_id: Option<CompId>,
}

impl FixSessionKey {
    /// Creates a key from the two mandatory comp ids.
    #[must_use]
    pub fn new(sender_comp_id: CompId, target_comp_id: CompId) -> Self {
        Self {
            sender_comp_id,
            target_comp_id,
            sender_sub_id: None,
            target_sub_id: None,
            sender_location_id: None,
            target_location_id: None,
        }
    }

    /// Sets the sender sub id.
    #[must_use]
    pub fn with_sender_sub_id(mut self, id: CompId) -> Self {
        self.sender_sub_id = Some(id);
        self
    }

    /// Sets the target sub id.
    #[must_use]
    pub fn with_target_sub_id(mut self, id: CompId) -> Self {
        self.target_sub_id = Some(id);
        self
    }

    /// Returns the key with sender and target swapped, as seen by the peer.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            sender_comp_id: self.target_comp_id.clone(),
            target_comp_id: self.sender_comp_id.clone(),
            sender_sub_id: self.target_sub_id.clone(),
            target_sub_id: self.sender_sub_id.clone(),
            sender_location_id: self.target_location_id.clone(),
            target_location_id: self.sender_location_id.clone(),
        }
    }
}

impl fmt::Display for FixSessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.sender_comp_id, self.target_comp_id)
    }
}

/// Identifying tuple for an iLink3 session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IlinkSessionKey {
    /// Exchange-assigned session id string.
    pub session_id: ArrayString<COMP_ID_MAX_LEN>,
    /// Exchange-assigned firm id string.
    pub firm_id: ArrayString<COMP_ID_MAX_LEN>,
}

impl IlinkSessionKey {
    /// Creates a key from session and firm id strings.
    ///
    /// # Returns
    /// `Some(key)` if both strings fit within the maximum length.
    #[must_use]
    pub fn new(session_id: &str, firm_id: &str) -> Option<Self> {
        Some(Self {
            session_id: ArrayString::from(session_id).ok()?,
            firm_id: ArrayString::from(firm_id).ok()?,
        })
    }
}

impl fmt::Display for IlinkSessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.session_id, self.firm_id)
    }
}

/// Protocol-specific session key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionKey {
    /// FIX tag=value session.
    Fix(FixSessionKey),
    /// iLink3 binary session.
    Ilink(IlinkSessionKey),
}
