//! LoRaWAN Network-Server Protocol Constants
//!
//! Wire-level and protocol-level constants used across the session, MAC
//! command, PHY codec, and Class-B modules.

/// Maximum total bytes of MAC commands that may be placed in FOpts before
/// they must move to an FPort=0 FRMPayload frame instead.
pub const MAX_FOPTS_LEN: usize = 15;

/// FPort reserved for MAC commands carried as FRMPayload.
pub const FPORT_MAC_COMMANDS: u8 = 0;

/// Highest FPort an application may use; 224-255 are reserved.
pub const MAX_APP_FPORT: u8 = 224;

/// Size in bytes of a DevEUI / JoinEUI.
pub const EUI_LEN: usize = 8;

/// Size in bytes of a DevAddr.
pub const DEVADDR_LEN: usize = 4;

/// Size in bytes of an AES-128 session key.
pub const KEY_LEN: usize = 16;

/// Size in bytes of a LoRaWAN MIC.
pub const MIC_LEN: usize = 4;

/// Forward window (in 16-bit wire-counter units) within which a claimed
/// FCnt is accepted as the continuation of the session's FCntUp.
pub const FCNT_FORWARD_WINDOW: u32 = 16384;

// ---------------------------------------------------------------------
// Class-B beacon / ping-slot constants (EN / LoRaWAN Class B spec, also
// ttn/loraserver's `classb` package).
// ---------------------------------------------------------------------

/// Beacon period: beacons occur every 128 s since the GPS epoch.
pub const BEACON_PERIOD_SECS: u64 = 128;

/// Time reserved at the start of each beacon period before ping slots begin.
pub const BEACON_RESERVED_MILLIS: u64 = 2_120;

/// Length of one ping slot.
pub const PING_SLOT_LEN_MILLIS: u64 = 30;

/// Base used to derive the ping period from `ping_nb`: `4096 / ping_nb`.
pub const PING_PERIOD_BASE: u32 = 1 << 12;

/// Default margin added ahead of "now" when scheduling the first Class-B slot.
pub const CLASS_B_SCHEDULE_MARGIN_SECS: u64 = 5;

// ---------------------------------------------------------------------
// Scheduler timing constants.
// ---------------------------------------------------------------------

/// Default delay before RX1 opens, in microseconds, absent an RXTimingSetup.
pub const DEFAULT_RX1_DELAY_MICROS: u64 = 1_000_000;

/// RX2 always opens exactly one second after RX1.
pub const RX2_DELAY_OFFSET_SECS: u64 = 1;
