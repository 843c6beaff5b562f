/**
 * Default time (milliseconds) a scan window stays open.
 */
pub const SCAN_TIMEOUT: u64 = 5000;

/**
 * Default time (milliseconds) a single connect attempt (connect + service discovery) may take.
 */
pub const CONNECT_TIMEOUT: u64 = 10000;

/**
 * How long (milliseconds) a write to a characteristic may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * How often (milliseconds) to check for the connection status.
 */
pub const POLL_DELAY: u64 = 1000;

/**
 * Delay (milliseconds) before the first reconnect attempt. Later attempts double it.
 */
pub const RECONNECT_INITIAL_DELAY: u64 = 500;

/**
 * Upper bound (milliseconds) of the reconnect delay.
 */
pub const RECONNECT_MAX_DELAY: u64 = 8000;

pub const RECONNECT_MULTIPLIER: u32 = 2;

pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;

/**
 * Consecutive failed writes after which the link is considered lost.
 */
pub const WRITE_FAILURE_THRESHOLD: u32 = 3;

/**
 * Service UUIDs advertised by the supported controllers, in connect priority order.
 * Firmware variants advertise either the 16-bit or the 128-bit form.
 */
pub const SERVICE_UUIDS: [&str; 4] = [
    "ffd0",
    "fff0",
    "0000ffd0-0000-1000-8000-00805f9b34fb",
    "0000fff0-0000-1000-8000-00805f9b34fb",
];

/**
 * Characteristics known to accept command frames. Preferred over any other writable
 * characteristic of the resolved service.
 */
pub const WRITE_CHARACTERISTIC_UUIDS: [&str; 4] = [
    "ffd4",
    "fff3",
    "0000ffd4-0000-1000-8000-00805f9b34fb",
    "0000fff3-0000-1000-8000-00805f9b34fb",
];

pub const FRAME_HEADER: u8 = 0x7e;
pub const FRAME_TRAILER: u8 = 0xef;
pub const FRAME_LENGTH: usize = 9;

pub const MAX_LEVEL: u8 = 100;

/**
 * Effect ids understood by the controller firmware.
 */
pub const EFFECTS: [(&str, u8); 22] = [
    ("three color jump", 0x87),
    ("seven color jump", 0x88),
    ("three color cross fade", 0x89),
    ("seven color cross fade", 0x8a),
    ("red fade", 0x8b),
    ("green fade", 0x8c),
    ("blue fade", 0x8d),
    ("yellow fade", 0x8e),
    ("cyan fade", 0x8f),
    ("magenta fade", 0x90),
    ("white fade", 0x91),
    ("red green cross fade", 0x92),
    ("red blue cross fade", 0x93),
    ("green blue cross fade", 0x94),
    ("seven color strobe flash", 0x95),
    ("red strobe flash", 0x96),
    ("green strobe flash", 0x97),
    ("blue strobe flash", 0x98),
    ("yellow strobe flash", 0x99),
    ("cyan strobe flash", 0x9a),
    ("magenta strobe flash", 0x9b),
    ("white strobe flash", 0x9c),
];
