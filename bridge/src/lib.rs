//! # Commlink Native Bridge
//!
//! This library exposes the commlink polling facade to foreign hosts
//! (scripting engines, game/UI layers) through a C ABI. It handles:
//!
//! - Logger installation for the host process
//! - Handle-based UDP listeners and serial ports
//! - Marshalling packet lists as JSON strings
//!
//! ## Bridge Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Host (script / UI layer)                    │
//! │                                                                 │
//! │        open / poll / close                 free_string          │
//! │               │                                 ▲               │
//! │               ▼  C ABI                          │               │
//! │  ┌──────────────────────────────────────────────────────────┐  │
//! │  │                 commlink_bridge (this lib)                │  │
//! │  │                                                           │  │
//! │  │  ┌──────────────┐  ┌──────────────┐  ┌────────────────┐  │  │
//! │  │  │ PollingFacade│─►│ UdpListeners │  │  SerialPorts   │  │  │
//! │  │  │  (process)   │  │  (threads)   │  │   (threads)    │  │  │
//! │  │  └──────────────┘  └──────────────┘  └────────────────┘  │  │
//! │  └──────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership Rules
//!
//! - Input strings are borrowed for the duration of the call and must be
//!   NUL-terminated UTF-8.
//! - Every `*mut c_char` returned by this library must be released with
//!   [`commlink_free_string`].
//! - Handles are plain `i32` values; `-1` means "open failed".

use std::ffi::{c_char, CStr, CString};
use std::ptr;
use std::slice;
use std::sync::Once;

use commlink::{EndpointStats, PollingFacade, INVALID_HANDLE};
use log::{error, info, warn};
use serde::Serialize;
use thiserror::Error;

#[cfg(target_os = "android")]
use log::LevelFilter;

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Endpoint kind selector for [`commlink_get_stats_json`]
pub const COMMLINK_KIND_UDP: i32 = 0;
pub const COMMLINK_KIND_SERIAL: i32 = 1;

/// Errors that can occur while decoding arguments from the host
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("null pointer passed for {0}")]
    NullPointer(&'static str),
    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Process-wide facade; the bridge is the composition root for foreign hosts
lazy_static::lazy_static! {
    static ref FACADE: PollingFacade = PollingFacade::default();
}

fn install_logger() {
    INIT_LOGGER.call_once(|| {
        #[cfg(target_os = "android")]
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(LevelFilter::Debug)
                .with_tag("Commlink"),
        );

        #[cfg(not(target_os = "android"))]
        {
            // The host may already have installed a logger
            let _ = env_logger::Builder::from_env(
                env_logger::Env::default().default_filter_or("info"),
            )
            .try_init();
        }
    });
}

/// Borrow a host string
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that stays alive
/// for `'a`.
unsafe fn host_str<'a>(ptr: *const c_char, what: &'static str) -> Result<&'a str, BridgeError> {
    if ptr.is_null() {
        return Err(BridgeError::NullPointer(what));
    }
    // SAFETY: non-null and NUL-terminated per the caller contract
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| BridgeError::InvalidUtf8(what))
}

/// Borrow a host byte buffer
///
/// # Safety
///
/// When `len > 0`, `ptr` must point to `len` readable bytes alive for `'a`.
unsafe fn host_bytes<'a>(
    ptr: *const u8,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], BridgeError> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(BridgeError::NullPointer(what));
    }
    // SAFETY: non-null and `len` readable bytes per the caller contract
    Ok(unsafe { slice::from_raw_parts(ptr, len) })
}

fn into_host_string(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(s) => s.into_raw(),
        Err(e) => {
            error!("String with interior NUL cannot cross the bridge: {}", e);
            ptr::null_mut()
        }
    }
}

fn json_to_host<T: Serialize + ?Sized>(value: &T) -> *mut c_char {
    match serde_json::to_string(value).map_err(BridgeError::from) {
        Ok(json) => into_host_string(json),
        Err(e) => {
            error!("{}", e);
            ptr::null_mut()
        }
    }
}

/// Initialize the native library and install a logger
///
/// Called from the host:
/// ```c
/// bool commlink_init(void);
/// ```
#[no_mangle]
pub extern "C" fn commlink_init() -> bool {
    install_logger();

    info!("Commlink bridge initialized");
    info!("Library version: {}", commlink::VERSION);

    true
}

/// Close every endpoint; call before unloading the library
#[no_mangle]
pub extern "C" fn commlink_shutdown() {
    info!("Shutting down all endpoints");
    FACADE.shutdown();
}

/// Release a string previously returned by this library
///
/// # Safety
///
/// `s` must be null or a pointer returned by a `commlink_*` function that
/// has not been freed yet.
#[no_mangle]
pub unsafe extern "C" fn commlink_free_string(s: *mut c_char) {
    if !s.is_null() {
        // SAFETY: produced by CString::into_raw in this library
        drop(unsafe { CString::from_raw(s) });
    }
}

// ==================== UDP ====================

/// Open a buffered UDP listener
///
/// Returns: handle, or -1 on failure. `buffer_capacity <= 0` uses 100.
#[no_mangle]
pub extern "C" fn commlink_open_udp_listener(port: i32, buffer_capacity: i32) -> i32 {
    FACADE.open_udp_listener(port, buffer_capacity)
}

#[no_mangle]
pub extern "C" fn commlink_close_udp_listener(handle: i32) -> bool {
    FACADE.close_udp_listener(handle)
}

#[no_mangle]
pub extern "C" fn commlink_is_udp_listener_valid(handle: i32) -> bool {
    FACADE.is_udp_listener_valid(handle)
}

#[no_mangle]
pub extern "C" fn commlink_get_active_udp_listener_count() -> i32 {
    FACADE.active_udp_listener_count()
}

/// Bound port of a listener (useful after opening port 0), -1 if unknown
#[no_mangle]
pub extern "C" fn commlink_get_udp_listener_port(handle: i32) -> i32 {
    FACADE.udp_listener_port(handle)
}

#[no_mangle]
pub extern "C" fn commlink_has_udp_data(handle: i32) -> bool {
    FACADE.has_udp_data(handle)
}

#[no_mangle]
pub extern "C" fn commlink_get_udp_packet_count(handle: i32) -> i32 {
    FACADE.udp_packet_count(handle)
}

/// Drain the listener's buffer
///
/// Returns: JSON array of `{senderIP, senderPort, data, timestamp}`, oldest
/// first (`[]` for unknown handles). Free with `commlink_free_string`.
#[no_mangle]
pub extern "C" fn commlink_get_all_udp_packets(handle: i32) -> *mut c_char {
    json_to_host(&FACADE.get_all_udp_packets(handle))
}

/// Latest packet as a JSON object without removing it, or null
#[no_mangle]
pub extern "C" fn commlink_get_latest_udp_packet(handle: i32) -> *mut c_char {
    match FACADE.get_latest_udp_packet(handle) {
        Some(packet) => json_to_host(&packet),
        None => ptr::null_mut(),
    }
}

#[no_mangle]
pub extern "C" fn commlink_clear_udp_buffer(handle: i32) -> bool {
    FACADE.clear_udp_buffer(handle)
}

/// Send one datagram from an ephemeral socket
///
/// # Safety
///
/// `ip` must be a NUL-terminated string; `data` must point to `len`
/// readable bytes.
#[no_mangle]
pub unsafe extern "C" fn commlink_udp_send_bytes(
    ip: *const c_char,
    port: i32,
    data: *const u8,
    len: usize,
) -> bool {
    // SAFETY: forwarded caller contract
    let args = unsafe {
        host_str(ip, "ip").and_then(|ip| Ok((ip, host_bytes(data, len, "data")?)))
    };
    match args {
        Ok((ip, data)) => FACADE.udp_send_bytes(ip, port, data),
        Err(e) => {
            warn!("UdpSendBytes: {}", e);
            false
        }
    }
}

/// Send a UTF-8 string as one datagram
///
/// # Safety
///
/// `ip` and `message` must be NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn commlink_udp_send_string(
    ip: *const c_char,
    port: i32,
    message: *const c_char,
) -> bool {
    // SAFETY: forwarded caller contract
    let args = unsafe {
        host_str(ip, "ip").and_then(|ip| Ok((ip, host_str(message, "message")?)))
    };
    match args {
        Ok((ip, message)) => FACADE.udp_send_string(ip, port, message),
        Err(e) => {
            warn!("UdpSendString: {}", e);
            false
        }
    }
}

// ==================== Serial ====================

/// Open a serial port with 8N1 defaults
///
/// # Safety
///
/// `name` must be a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn commlink_open_serial_port(name: *const c_char, baud_rate: i32) -> i32 {
    // SAFETY: forwarded caller contract
    match unsafe { host_str(name, "name") } {
        Ok(name) => FACADE.open_serial_port(name, baud_rate),
        Err(e) => {
            warn!("OpenSerialPort: {}", e);
            INVALID_HANDLE
        }
    }
}

/// Open a serial port with a JSON config
///
/// Missing fields take their defaults, e.g.
/// `{"baud_rate":115200,"parity":"Even","stop_bits":"Two","async_read":true}`.
///
/// # Safety
///
/// `name` and `config_json` must be NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn commlink_open_serial_port_ex(
    name: *const c_char,
    config_json: *const c_char,
) -> i32 {
    // SAFETY: forwarded caller contract
    let args = unsafe {
        host_str(name, "name").and_then(|name| Ok((name, host_str(config_json, "config")?)))
    };
    let (name, json) = match args {
        Ok(args) => args,
        Err(e) => {
            warn!("OpenSerialPortEx: {}", e);
            return INVALID_HANDLE;
        }
    };
    match commlink::SerialConfig::from_json(json) {
        Ok(config) => FACADE.open_serial_port_with(name, &config),
        Err(e) => {
            warn!("OpenSerialPortEx: {}", e);
            INVALID_HANDLE
        }
    }
}

#[no_mangle]
pub extern "C" fn commlink_close_serial_port(handle: i32) -> bool {
    FACADE.close_serial_port(handle)
}

#[no_mangle]
pub extern "C" fn commlink_is_serial_port_open(handle: i32) -> bool {
    FACADE.is_serial_port_open(handle)
}

#[no_mangle]
pub extern "C" fn commlink_get_open_serial_port_count() -> i32 {
    FACADE.open_serial_port_count()
}

/// Write bytes to a serial port
///
/// # Safety
///
/// `data` must point to `len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn commlink_serial_write_bytes(
    handle: i32,
    data: *const u8,
    len: usize,
) -> bool {
    // SAFETY: forwarded caller contract
    match unsafe { host_bytes(data, len, "data") } {
        Ok(data) => FACADE.serial_write_bytes(handle, data),
        Err(e) => {
            warn!("SerialWriteBytes: {}", e);
            false
        }
    }
}

/// Direct read into a host buffer
///
/// Returns: bytes copied into `out` (0 on timeout), or -1 for an unknown
/// handle or bad arguments. Refused (0) while async read is active.
///
/// # Safety
///
/// `out` must point to `max_bytes` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn commlink_serial_read_bytes(
    handle: i32,
    out: *mut u8,
    max_bytes: i32,
) -> i32 {
    if out.is_null() || max_bytes < 0 {
        warn!("SerialReadBytes: invalid output buffer");
        return -1;
    }
    if !FACADE.is_serial_port_open(handle) {
        return -1;
    }

    let data = FACADE.serial_read_bytes(handle, max_bytes);
    // SAFETY: `out` has room for `max_bytes` >= data.len() bytes
    unsafe { ptr::copy_nonoverlapping(data.as_ptr(), out, data.len()) };
    i32::try_from(data.len()).unwrap_or(-1)
}

/// Bytes waiting in the device input queue, -1 on error
#[no_mangle]
pub extern "C" fn commlink_get_serial_bytes_available(handle: i32) -> i32 {
    FACADE.serial_bytes_available(handle)
}

#[no_mangle]
pub extern "C" fn commlink_flush_serial_buffers(
    handle: i32,
    clear_input: bool,
    clear_output: bool,
) -> bool {
    FACADE.flush_serial_buffers(handle, clear_input, clear_output)
}

#[no_mangle]
pub extern "C" fn commlink_start_serial_async_read(handle: i32) -> bool {
    FACADE.start_serial_async_read(handle)
}

#[no_mangle]
pub extern "C" fn commlink_stop_serial_async_read(handle: i32) -> bool {
    FACADE.stop_serial_async_read(handle)
}

#[no_mangle]
pub extern "C" fn commlink_has_serial_data(handle: i32) -> bool {
    FACADE.has_serial_data(handle)
}

/// Drain async-read chunks as a JSON array of `{data, timestamp}`
#[no_mangle]
pub extern "C" fn commlink_get_all_serial_data(handle: i32) -> *mut c_char {
    json_to_host(&FACADE.get_all_serial_data(handle))
}

#[no_mangle]
pub extern "C" fn commlink_clear_serial_buffer(handle: i32) -> bool {
    FACADE.clear_serial_buffer(handle)
}

/// Device names as a JSON array of strings
#[no_mangle]
pub extern "C" fn commlink_get_available_serial_ports() -> *mut c_char {
    json_to_host(&FACADE.available_serial_ports())
}

/// Buffer statistics as JSON
///
/// Returns: `{"received","dropped","buffered","capacity"}` or null for an
/// unknown handle or kind.
#[no_mangle]
pub extern "C" fn commlink_get_stats_json(kind: i32, handle: i32) -> *mut c_char {
    let stats: Option<EndpointStats> = match kind {
        COMMLINK_KIND_UDP => FACADE.udp_stats(handle),
        COMMLINK_KIND_SERIAL => FACADE.serial_stats(handle),
        other => {
            warn!("GetStatsJson: unknown endpoint kind {}", other);
            None
        }
    };
    stats.map_or(ptr::null_mut(), |stats| json_to_host(&stats))
}
