//! USB-TMC over libusb bulk transfers.
//!
//! Every command is one `DEV_DEP_MSG_OUT` transfer. A reply is requested
//! with `REQUEST_DEV_DEP_MSG_IN` and collected until the device sets EOM.

use super::{ConnectionConfig, Session};
use crate::error::ScopeError;
use crate::scpi::parse_block;
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, trace};
use rusb::{Device, DeviceHandle, Direction, GlobalContext, TransferType};
use std::time::Duration;

const USBTMC_CLASS_CODE: u8 = 0xFE;
const USBTMC_SUBCLASS_CODE: u8 = 0x03;

const HEADER_SIZE: usize = 12;
const MAX_TRANSFER_SIZE: usize = 1024 * 8;

const DEV_DEP_MSG_OUT: u8 = 1;
const REQUEST_DEV_DEP_MSG_IN: u8 = 2;
const DEV_DEP_MSG_IN: u8 = 2;

/// bmTransferAttributes bit 0
const END_OF_MESSAGE: u8 = 0x01;

/// Bulk endpoint pair of a USB-TMC interface.
pub trait BulkPipe: Send {
    fn write_bulk(&mut self, data: &[u8]) -> Result<usize, ScopeError>;
    fn read_bulk(&mut self, buf: &mut [u8]) -> Result<usize, ScopeError>;
}

/// Claimed USB-TMC interface of an opened device.
pub struct UsbPipe {
    handle: DeviceHandle<GlobalContext>,
    interface: u8,
    bulk_in: u8,
    bulk_out: u8,
    read_timeout: Duration,
    write_timeout: Duration,
}

struct TmcInterface {
    number: u8,
    bulk_in: u8,
    bulk_out: u8,
}

fn find_tmc_interface(device: &Device<GlobalContext>) -> Result<Option<TmcInterface>, ScopeError> {
    let config = device.active_config_descriptor()?;
    for interface in config.interfaces() {
        for descriptor in interface.descriptors() {
            if descriptor.class_code() != USBTMC_CLASS_CODE
                || descriptor.sub_class_code() != USBTMC_SUBCLASS_CODE
            {
                continue;
            }
            let mut bulk_in = None;
            let mut bulk_out = None;
            for endpoint in descriptor.endpoint_descriptors() {
                if endpoint.transfer_type() != TransferType::Bulk {
                    continue;
                }
                match endpoint.direction() {
                    Direction::In => {
                        bulk_in.get_or_insert(endpoint.address());
                    }
                    Direction::Out => {
                        bulk_out.get_or_insert(endpoint.address());
                    }
                }
            }
            if let (Some(bulk_in), Some(bulk_out)) = (bulk_in, bulk_out) {
                return Ok(Some(TmcInterface {
                    number: descriptor.interface_number(),
                    bulk_in,
                    bulk_out,
                }));
            }
        }
    }
    Ok(None)
}

impl UsbPipe {
    fn claim(
        mut handle: DeviceHandle<GlobalContext>,
        interface: TmcInterface,
        config: &ConnectionConfig,
    ) -> Result<Self, ScopeError> {
        // Unsupported outside Linux, where no kernel driver gets in the way
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto-detach unavailable: {e}");
        }
        handle.claim_interface(interface.number)?;
        Ok(Self {
            handle,
            interface: interface.number,
            bulk_in: interface.bulk_in,
            bulk_out: interface.bulk_out,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
        })
    }
}

impl BulkPipe for UsbPipe {
    fn write_bulk(&mut self, data: &[u8]) -> Result<usize, ScopeError> {
        Ok(self.handle.write_bulk(self.bulk_out, data, self.write_timeout)?)
    }

    fn read_bulk(&mut self, buf: &mut [u8]) -> Result<usize, ScopeError> {
        Ok(self.handle.read_bulk(self.bulk_in, buf, self.read_timeout)?)
    }
}

impl Drop for UsbPipe {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(self.interface) {
            debug!("Failed to release USB-TMC interface: {e}");
        }
    }
}

/// Bulk-out header shared by `DEV_DEP_MSG_OUT` and `REQUEST_DEV_DEP_MSG_IN`
fn bulk_out_header(msg_id: u8, tag: u8, transfer_size: u32, attributes: u8) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0] = msg_id;
    header[1] = tag;
    header[2] = !tag;
    LittleEndian::write_u32(&mut header[4..8], transfer_size);
    header[8] = attributes;
    header
}

pub struct UsbTmcSession<P: BulkPipe = UsbPipe> {
    pipe: P,
    tag: u8,
}

impl UsbTmcSession {
    /// Open the first device matching the ids (and serial number) and claim
    /// its USB-TMC interface.
    pub fn open(
        vendor_id: u16,
        product_id: u16,
        serial_number: Option<&str>,
        config: &ConnectionConfig,
    ) -> Result<Self, ScopeError> {
        for device in rusb::devices()?.iter() {
            let Ok(descriptor) = device.device_descriptor() else {
                continue;
            };
            if descriptor.vendor_id() != vendor_id || descriptor.product_id() != product_id {
                continue;
            }

            let handle = device.open()?;
            if let Some(wanted) = serial_number {
                let serial = handle
                    .read_serial_number_string_ascii(&descriptor)
                    .unwrap_or_default();
                if serial != wanted {
                    trace!("Skipping {vendor_id:04x}:{product_id:04x} with serial {serial}");
                    continue;
                }
            }

            let interface = find_tmc_interface(&device)?.ok_or_else(|| {
                ScopeError::InvalidResource(format!(
                    "{vendor_id:04x}:{product_id:04x} has no USB-TMC interface"
                ))
            })?;
            info!(
                "Opened USB-TMC device {vendor_id:04x}:{product_id:04x} on bus {} address {}",
                device.bus_number(),
                device.address()
            );
            return Ok(Self::with_pipe(UsbPipe::claim(handle, interface, config)?));
        }

        Err(ScopeError::InvalidResource(format!(
            "no USB device with id {vendor_id:04x}:{product_id:04x}{}",
            serial_number.map(|s| format!(" serial {s}")).unwrap_or_default()
        )))
    }
}

impl<P: BulkPipe> UsbTmcSession<P> {
    pub fn with_pipe(pipe: P) -> Self {
        Self { pipe, tag: 0 }
    }

    pub fn get_ref(&self) -> &P {
        &self.pipe
    }

    /// bTag cycles through 1..=255
    fn next_tag(&mut self) -> u8 {
        self.tag = self.tag % 255 + 1;
        self.tag
    }

    fn write_message(&mut self, data: &[u8]) -> Result<(), ScopeError> {
        let mut chunks = data.chunks(MAX_TRANSFER_SIZE).peekable();
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            let attributes = if last { END_OF_MESSAGE } else { 0 };
            let tag = self.next_tag();

            let header = bulk_out_header(DEV_DEP_MSG_OUT, tag, chunk.len() as u32, attributes);
            let mut packet = header.to_vec();
            packet.extend_from_slice(chunk);
            packet.resize(packet.len().next_multiple_of(4), 0);
            self.pipe.write_bulk(&packet)?;
        }
        Ok(())
    }

    fn read_message(&mut self) -> Result<Vec<u8>, ScopeError> {
        let mut message = Vec::new();
        let mut buf = vec![0u8; HEADER_SIZE + MAX_TRANSFER_SIZE];
        loop {
            let tag = self.next_tag();
            self.pipe.write_bulk(&bulk_out_header(
                REQUEST_DEV_DEP_MSG_IN,
                tag,
                MAX_TRANSFER_SIZE as u32,
                0,
            ))?;

            let mut received = self.pipe.read_bulk(&mut buf)?;
            if received < HEADER_SIZE {
                return Err(ScopeError::Parse(format!(
                    "USB-TMC reply of {received} bytes is shorter than its header"
                )));
            }
            if buf[0] != DEV_DEP_MSG_IN || buf[1] != tag || buf[2] != !tag {
                return Err(ScopeError::Parse(format!(
                    "unexpected USB-TMC reply header {:02x?}",
                    &buf[..4]
                )));
            }
            let size = (LittleEndian::read_u32(&buf[4..8]) as usize).min(MAX_TRANSFER_SIZE);
            let attributes = buf[8];

            // A transfer larger than one bulk packet arrives in several reads
            while received < HEADER_SIZE + size {
                let n = self.pipe.read_bulk(&mut buf[received..])?;
                if n == 0 {
                    return Err(ScopeError::Parse("USB-TMC transfer truncated".to_string()));
                }
                received += n;
            }
            message.extend_from_slice(&buf[HEADER_SIZE..HEADER_SIZE + size]);
            trace!("<< USB-TMC transfer {tag} ({size} bytes)");

            if attributes & END_OF_MESSAGE != 0 {
                return Ok(message);
            }
        }
    }
}

impl<P: BulkPipe> Session for UsbTmcSession<P> {
    fn write(&mut self, command: &str) -> Result<(), ScopeError> {
        debug!(">> {command}");
        let mut data = command.as_bytes().to_vec();
        data.push(b'\n');
        self.write_message(&data)
    }

    fn read_line(&mut self) -> Result<String, ScopeError> {
        let message = self.read_message()?;
        let text = String::from_utf8_lossy(&message)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        debug!("<< {text}");
        Ok(text)
    }

    fn read_block(&mut self) -> Result<Vec<u8>, ScopeError> {
        let message = self.read_message()?;
        let payload = parse_block(&message)?.to_vec();
        debug!("<< block ({} bytes)", payload.len());
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Answers each message request with the next canned transfer
    #[derive(Default)]
    struct FakePipe {
        writes: Vec<Vec<u8>>,
        transfers: VecDeque<(Vec<u8>, bool)>,
        corrupt_tag: bool,
    }

    impl FakePipe {
        fn replying(transfers: &[(&[u8], bool)]) -> Self {
            Self {
                transfers: transfers.iter().map(|(d, eom)| (d.to_vec(), *eom)).collect(),
                ..Default::default()
            }
        }
    }

    impl BulkPipe for FakePipe {
        fn write_bulk(&mut self, data: &[u8]) -> Result<usize, ScopeError> {
            self.writes.push(data.to_vec());
            Ok(data.len())
        }

        fn read_bulk(&mut self, buf: &mut [u8]) -> Result<usize, ScopeError> {
            let (data, eom) = self.transfers.pop_front().ok_or(ScopeError::Timeout)?;
            let mut tag = self.writes.last().unwrap()[1];
            if self.corrupt_tag {
                tag = tag.wrapping_add(1);
            }
            let attributes = if eom { END_OF_MESSAGE } else { 0 };
            let header = bulk_out_header(DEV_DEP_MSG_IN, tag, data.len() as u32, attributes);
            buf[..HEADER_SIZE].copy_from_slice(&header);
            buf[HEADER_SIZE..HEADER_SIZE + data.len()].copy_from_slice(&data);
            Ok(HEADER_SIZE + data.len())
        }
    }

    #[test]
    fn test_write_frames_one_message() {
        let mut session = UsbTmcSession::with_pipe(FakePipe::default());
        session.write("*CLS").unwrap();

        let writes = &session.get_ref().writes;
        assert_eq!(writes.len(), 1);
        let packet = &writes[0];
        assert_eq!(&packet[..4], &[DEV_DEP_MSG_OUT, 1, 0xFE, 0]);
        assert_eq!(LittleEndian::read_u32(&packet[4..8]), 5);
        assert_eq!(packet[8], END_OF_MESSAGE);
        assert_eq!(&packet[HEADER_SIZE..HEADER_SIZE + 5], b"*CLS\n");
        assert_eq!(packet.len() % 4, 0);
    }

    #[test]
    fn test_ask_requests_reply() {
        let pipe = FakePipe::replying(&[(
            b"RIGOL TECHNOLOGIES,DS1054Z,DS1ZA0001,00.04.04\n",
            true,
        )]);
        let mut session = UsbTmcSession::with_pipe(pipe);

        let idn = session.ask("*IDN?").unwrap();
        assert_eq!(idn, "RIGOL TECHNOLOGIES,DS1054Z,DS1ZA0001,00.04.04");

        let request = &session.get_ref().writes[1];
        assert_eq!(&request[..3], &[REQUEST_DEV_DEP_MSG_IN, 2, !2u8]);
        assert_eq!(LittleEndian::read_u32(&request[4..8]), MAX_TRANSFER_SIZE as u32);
    }

    #[test]
    fn test_reply_split_over_transfers() {
        let pipe = FakePipe::replying(&[(b"#14\x01\x00", false), (b"\x02\x00\n", true)]);
        let mut session = UsbTmcSession::with_pipe(pipe);

        assert_eq!(session.ask_block(":waveform:data?").unwrap(), vec![1, 0, 2, 0]);
        // One command plus two message requests
        assert_eq!(session.get_ref().writes.len(), 3);
    }

    #[test]
    fn test_tag_cycles_past_255() {
        let mut session = UsbTmcSession::with_pipe(FakePipe::default());
        for _ in 0..256 {
            session.write(":run").unwrap();
        }
        let writes = &session.get_ref().writes;
        assert_eq!(writes[254][1], 255);
        assert_eq!(writes[255][1], 1);
    }

    #[test]
    fn test_mismatched_tag_is_error() {
        let mut pipe = FakePipe::replying(&[(b"1\n", true)]);
        pipe.corrupt_tag = true;
        let mut session = UsbTmcSession::with_pipe(pipe);
        assert!(matches!(session.ask("*OPC?"), Err(ScopeError::Parse(_))));
    }

    #[test]
    fn test_missing_reply_times_out() {
        let mut session = UsbTmcSession::with_pipe(FakePipe::default());
        assert!(session.ask("*OPC?").unwrap_err().is_timeout());
    }

    #[test]
    fn test_usb_timeout_maps_to_timeout() {
        assert!(ScopeError::from(rusb::Error::Timeout).is_timeout());
        assert!(matches!(
            ScopeError::from(rusb::Error::NoDevice),
            ScopeError::Usb(rusb::Error::NoDevice)
        ));
    }
}
