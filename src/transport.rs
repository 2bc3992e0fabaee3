//! This is the lowest-level module. It is responsible for finding the
//! USB-Blaster's FTDI chip on the USB bus and moving raw bytes to and from it.
//! Two back-ends are available: `ftdi` drives the chip directly over libusb
//! using `rusb`, while `ftd2xx` goes through the vendor D2XX library. Both
//! expose the same narrow byte-pipe contract consumed by the blaster layer.

use std::time::Duration;
use thiserror::Error;
use rusb::{Context, Device, UsbContext};
use libftd2xx::{Ftdi, FtdiCommon};

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid VID:PID specifier.")]
    InvalidSpecifier,
    #[error("specified probe not found.")]
    NotFound,
    #[error("no back-end named '{0}' is registered.")]
    UnknownBackend(String),
    #[error("no registered back-end could open the probe.")]
    NoBackendAvailable,
    #[error("USB error")]
    USB(#[from] rusb::Error),
    #[error("D2XX error: {0:?}")]
    D2xx(libftd2xx::FtStatus),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<libftd2xx::FtStatus> for Error {
    fn from(status: libftd2xx::FtStatus) -> Self {
        Error::D2xx(status)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Altera's VID and the USB-Blaster PID, used when the host configures nothing else.
pub const ALTERA_VID: u16 = 0x09FB;
pub const USB_BLASTER_PID: u16 = 0x6001;

/// Identification of the probe to open.
///
/// Set before opening; the description is matched against the USB product
/// string when present.
#[derive(Clone, Debug)]
pub struct ProbeInfo {
    pub vid: u16,
    pub pid: u16,
    pub desc: Option<String>,
}

impl Default for ProbeInfo {
    fn default() -> Self {
        ProbeInfo { vid: ALTERA_VID, pid: USB_BLASTER_PID, desc: None }
    }
}

impl ProbeInfo {
    /// Create a ProbeInfo from a "VID:PID" specifier string.
    ///
    /// Extra colon-separated fields are warned about and ignored; a lone
    /// field is warned about and the defaults kept.
    pub fn from_specifier(spec: &str) -> Result<Self> {
        let parts: Vec<&str> = spec.split(':').collect();
        if parts.len() < 2 {
            log::warn!("incomplete VID:PID specifier '{}', keeping defaults", spec);
            return Ok(ProbeInfo::default());
        }
        if parts.len() > 2 {
            log::warn!("ignoring extra fields in VID:PID specifier (maximum is one pair)");
        }
        let vid = u16::from_str_radix(parts[0], 16).or(Err(Error::InvalidSpecifier))?;
        let pid = u16::from_str_radix(parts[1], 16).or(Err(Error::InvalidSpecifier))?;
        Ok(ProbeInfo { vid, pid, desc: None })
    }
}

impl std::fmt::Display for ProbeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let desc = self.desc.as_deref().unwrap_or("USB-Blaster");
        write!(f, "{:04x}:{:04x} {}", self.vid, self.pid, desc)
    }
}

/// Byte-pipe contract the blaster layer consumes.
///
/// `read` and `write` may transfer fewer bytes than requested; callers loop.
pub trait Transport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
    fn set_speed(&mut self, khz: u32) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// A factory producing an open transport for a given probe.
pub trait Backend {
    fn name(&self) -> &'static str;
    fn open(&self, info: &ProbeInfo) -> Result<Box<dyn Transport>>;
}

/// All registered back-ends, in try-order.
pub fn backends() -> &'static [&'static dyn Backend] {
    &[&FtdiBackend, &Ftd2xxBackend]
}

/// Open a transport, either by back-end name or by trying each registered
/// back-end in order, first success wins.
pub fn open(name: Option<&str>, info: &ProbeInfo) -> Result<Box<dyn Transport>> {
    match name {
        Some(name) => {
            let backend = backends()
                .iter()
                .find(|b| b.name() == name)
                .ok_or_else(|| Error::UnknownBackend(name.to_owned()))?;
            backend.open(info)
        }
        None => {
            log::info!("no back-end configured, trying them all");
            for backend in backends() {
                match backend.open(info) {
                    Ok(drv) => {
                        log::debug!("opened probe via '{}' back-end", backend.name());
                        return Ok(drv);
                    }
                    Err(e) => log::debug!("back-end '{}' failed: {}", backend.name(), e),
                }
            }
            Err(Error::NoBackendAvailable)
        }
    }
}

/* FTDI vendor requests used by the libusb-style back-end. */
const FTDI_SIO_RESET: u8 = 0x00;
const FTDI_SIO_SET_BAUDRATE: u8 = 0x03;
const FTDI_SIO_SET_LATENCY: u8 = 0x09;
const FTDI_RESET_SIO: u16 = 0;
const FTDI_RESET_PURGE_RX: u16 = 1;
const FTDI_RESET_PURGE_TX: u16 = 2;
/* FT245 bulk endpoints. */
const FTDI_EP_OUT: u8 = 0x02;
const FTDI_EP_IN: u8 = 0x81;
/* Index addressing the first (only) FTDI port. */
const FTDI_INDEX: u16 = 1;

const USB_TIMEOUT: Duration = Duration::from_millis(500);

pub struct FtdiBackend;

impl Backend for FtdiBackend {
    fn name(&self) -> &'static str {
        "ftdi"
    }

    fn open(&self, info: &ProbeInfo) -> Result<Box<dyn Transport>> {
        log::debug!("searching for probe {} via libusb", info);
        let context = Context::new()?;
        for device in context.devices()?.iter() {
            if FtdiTransport::matches(&device, info) {
                return Ok(Box::new(FtdiTransport::open(device)?));
            }
        }
        Err(Error::NotFound)
    }
}

/// Direct libusb driver for the FT245 behind the blaster's CPLD.
pub struct FtdiTransport {
    handle: rusb::DeviceHandle<Context>,
    /// Payload bytes received beyond what the caller asked for.
    pending: Vec<u8>,
}

impl FtdiTransport {
    fn matches(device: &Device<Context>, info: &ProbeInfo) -> bool {
        let desc = match device.device_descriptor() {
            Ok(desc) => desc,
            Err(_) => return false,
        };
        if desc.vendor_id() != info.vid || desc.product_id() != info.pid {
            return false;
        }
        match &info.desc {
            None => true,
            Some(want) => {
                // Match the configured description against the product string.
                let timeout = Duration::from_millis(100);
                let check = || -> rusb::Result<bool> {
                    let handle = device.open()?;
                    let language = handle
                        .read_languages(timeout)?
                        .get(0)
                        .cloned()
                        .ok_or(rusb::Error::NotFound)?;
                    let prod = handle.read_product_string(language, &desc, timeout)?;
                    Ok(prod.contains(want.as_str()))
                };
                check().unwrap_or(false)
            }
        }
    }

    fn open(device: Device<Context>) -> Result<FtdiTransport> {
        log::trace!("opening {:?}", device);
        let mut handle = device.open()?;
        let _ = handle.set_auto_detach_kernel_driver(true);
        handle.claim_interface(0)?;

        let mut transport = FtdiTransport { handle, pending: Vec::new() };
        transport.control(FTDI_SIO_RESET, FTDI_RESET_SIO)?;
        transport.control(FTDI_SIO_RESET, FTDI_RESET_PURGE_RX)?;
        transport.control(FTDI_SIO_RESET, FTDI_RESET_PURGE_TX)?;
        transport.control(FTDI_SIO_SET_LATENCY, 2)?;
        Ok(transport)
    }

    fn control(&mut self, request: u8, value: u16) -> Result<()> {
        let request_type = rusb::request_type(
            rusb::Direction::Out,
            rusb::RequestType::Vendor,
            rusb::Recipient::Device,
        );
        self.handle
            .write_control(request_type, request, value, FTDI_INDEX, &[], USB_TIMEOUT)?;
        Ok(())
    }
}

impl Transport for FtdiTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pending.is_empty() {
            // Every bulk IN packet leads with two modem-status bytes.
            let mut packet = [0u8; 64];
            let n = self.handle.read_bulk(FTDI_EP_IN, &mut packet, USB_TIMEOUT)?;
            if n > 2 {
                self.pending.extend_from_slice(&packet[2..n]);
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        log::trace!("RX: {:02X?}", &buf[..n]);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        log::trace!("TX: {:02X?}", buf);
        Ok(self.handle.write_bulk(FTDI_EP_OUT, buf, USB_TIMEOUT)?)
    }

    fn set_speed(&mut self, khz: u32) -> Result<()> {
        // The CPLD generates TCK on genuine blasters; clones on plain FTDI
        // silicon honor the baud rate, so apply a best-effort divisor.
        let baud = khz.saturating_mul(1000).max(1);
        let divisor = (3_000_000 / baud).max(1).min(0xFFFF) as u16;
        log::debug!("setting speed {} kHz (divisor {})", khz, divisor);
        self.control(FTDI_SIO_SET_BAUDRATE, divisor)
    }

    fn close(&mut self) -> Result<()> {
        Ok(self.handle.release_interface(0)?)
    }
}

pub struct Ftd2xxBackend;

impl Backend for Ftd2xxBackend {
    fn name(&self) -> &'static str {
        "ftd2xx"
    }

    fn open(&self, info: &ProbeInfo) -> Result<Box<dyn Transport>> {
        log::debug!("searching for probe {} via D2XX", info);
        libftd2xx::set_vid_pid(info.vid, info.pid)?;
        let mut ft = match &info.desc {
            Some(desc) => Ftdi::with_description(desc)?,
            None => Ftdi::new()?,
        };
        ft.purge_all()?;
        ft.set_timeouts(USB_TIMEOUT, USB_TIMEOUT)?;
        ft.set_latency_timer(Duration::from_millis(2))?;
        Ok(Box::new(Ftd2xxTransport { ft }))
    }
}

pub struct Ftd2xxTransport {
    ft: Ftdi,
}

impl Transport for Ftd2xxTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.ft.read(buf)?;
        log::trace!("RX: {:02X?}", &buf[..n]);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        log::trace!("TX: {:02X?}", buf);
        Ok(self.ft.write(buf)?)
    }

    fn set_speed(&mut self, khz: u32) -> Result<()> {
        log::debug!("setting speed {} kHz", khz);
        Ok(self.ft.set_baud_rate(khz.saturating_mul(1000).max(1))?)
    }

    fn close(&mut self) -> Result<()> {
        Ok(self.ft.close()?)
    }
}
