//! The RTU server: request dispatch against a device plus the serial
//! link plumbing that feeds it.

mod link;
mod reassembly;

pub use self::link::serve;
pub use self::reassembly::{silence_timeout, ExtractedFrame, ReassemblyBuffer};

use crate::device::{Device, RegisterSpace};
use crate::frame::{
    Exception, ExceptionResponse, FunctionCode, Header, Request, Response, ResponseAdu,
    ResponsePdu, SlaveId,
};
use crate::{codec, Error};
use std::ops::RangeInclusive;

/// Quantity limits per function code, from the Modbus application
/// protocol specification.
const MAX_READ_BITS: u16 = 2000;
const MAX_READ_WORDS: u16 = 125;
const MAX_WRITE_BITS: u16 = 1968;
const MAX_WRITE_WORDS: u16 = 123;

/// Read Device Identification access codes.
const READ_DEVICE_ID_BASIC: u8 = 0x01;
const READ_DEVICE_ID_REGULAR: u8 = 0x02;

/// Highest object id served per access code.
const BASIC_MAX_OBJECT_ID: u8 = 0x02;
const REGULAR_MAX_OBJECT_ID: u8 = 0x06;

/// Conformity level reported by Read Device Identification responses.
const CONFORMITY_LEVEL: u8 = 0x01;

/// The full span of assignable unit addresses.
pub const ALL_UNITS: RangeInclusive<SlaveId> = 1..=247;

/// A Modbus RTU server (slave) answering for a span of unit addresses.
#[derive(Debug)]
pub struct RtuServer {
    device: Device,
    units: RangeInclusive<SlaveId>,
}

impl RtuServer {
    /// Create a server answering for all unit addresses in `units`.
    #[must_use]
    pub fn new(device: Device, units: RangeInclusive<SlaveId>) -> Self {
        Self { device, units }
    }

    /// Create a server answering for a single unit address.
    #[must_use]
    pub fn with_unit(device: Device, unit: SlaveId) -> Self {
        Self::new(device, unit..=unit)
    }

    #[must_use]
    pub const fn device(&self) -> &Device {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    /// Process one CRC-verified request frame.
    ///
    /// Returns the encoded response ADU, or `None` when the frame is
    /// addressed to a unit outside the served span and must stay
    /// unanswered.
    pub fn process_frame(&mut self, slave: SlaveId, pdu: &[u8]) -> Option<Vec<u8>> {
        if !self.units.contains(&slave) {
            log::debug!("Ignoring request for unit {slave}");
            return None;
        }
        let function_byte = *pdu.first()?;
        // A function byte with the exception bit set is a response frame,
        // e.g. our own reflection on a half-duplex line. Never answer it.
        if function_byte >= 0x80 {
            log::warn!("Ignoring response-direction frame (0x{function_byte:02X}) for unit {slave}");
            return None;
        }
        let result = match Request::try_from(pdu) {
            Ok(request) => {
                log::debug!("Unit {slave}: {:?}", request);
                self.dispatch(request)
            }
            Err(err) => {
                let function = FunctionCode::new(function_byte);
                log::warn!("Unit {slave}: malformed request: {err}");
                Err(ExceptionResponse {
                    function,
                    exception: decode_error_exception(&err),
                })
            }
        };
        if let Err(ex) = &result {
            log::debug!("Unit {slave}: exception response: {}", ex.exception);
        }
        let pdu_len = match &result {
            Ok(rsp) => rsp.pdu_len(),
            Err(_) => 2,
        };
        let adu = ResponseAdu {
            hdr: Header { slave },
            pdu: ResponsePdu(result),
        };
        let mut buf = Vec::with_capacity(pdu_len + 3);
        codec::rtu::encode_response(&adu, &mut buf);
        Some(buf)
    }

    /// Execute a decoded request against the device.
    pub fn dispatch(&mut self, request: Request<'_>) -> Result<Response, ExceptionResponse> {
        let function = FunctionCode::from(request);
        self.execute(request)
            .map_err(|exception| ExceptionResponse {
                function,
                exception,
            })
    }

    fn execute(&mut self, request: Request<'_>) -> Result<Response, Exception> {
        let bank = self.device.bank();
        match request {
            Request::ReadCoils(addr, quantity) => {
                check_quantity(quantity, MAX_READ_BITS)?;
                check_span(bank.span_valid(RegisterSpace::Coil, addr, quantity))?;
                self.read_bits(RegisterSpace::Coil, addr, quantity)
                    .map(Response::ReadCoils)
            }
            Request::ReadDiscreteInputs(addr, quantity) => {
                check_quantity(quantity, MAX_READ_BITS)?;
                check_span(bank.span_valid(RegisterSpace::DiscreteInput, addr, quantity))?;
                self.read_bits(RegisterSpace::DiscreteInput, addr, quantity)
                    .map(Response::ReadDiscreteInputs)
            }
            Request::ReadHoldingRegisters(addr, quantity) => {
                check_quantity(quantity, MAX_READ_WORDS)?;
                check_span(bank.span_valid(RegisterSpace::HoldingRegister, addr, quantity))?;
                self.read_words(RegisterSpace::HoldingRegister, addr, quantity)
                    .map(Response::ReadHoldingRegisters)
            }
            Request::ReadInputRegisters(addr, quantity) => {
                check_quantity(quantity, MAX_READ_WORDS)?;
                check_span(bank.span_valid(RegisterSpace::InputRegister, addr, quantity))?;
                self.read_words(RegisterSpace::InputRegister, addr, quantity)
                    .map(Response::ReadInputRegisters)
            }
            Request::WriteSingleCoil(addr, coil) => {
                check_span(bank.address_valid(RegisterSpace::Coil, addr))?;
                self.device
                    .bank_mut()
                    .write_bit(RegisterSpace::Coil, addr, coil)
                    .map(|()| Response::WriteSingleCoil(addr, coil))
                    .map_err(internal_failure)
            }
            Request::WriteSingleRegister(addr, word) => {
                check_span(bank.address_valid(RegisterSpace::HoldingRegister, addr))?;
                self.device
                    .bank_mut()
                    .write_word(RegisterSpace::HoldingRegister, addr, word)
                    .map(|()| Response::WriteSingleRegister(addr, word))
                    .map_err(internal_failure)
            }
            Request::WriteMultipleCoils(addr, coils) => {
                let quantity = coils.len() as u16;
                check_quantity(quantity, MAX_WRITE_BITS)?;
                check_span(bank.span_valid(RegisterSpace::Coil, addr, quantity))?;
                let bank = self.device.bank_mut();
                coils
                    .into_iter()
                    .enumerate()
                    .try_for_each(|(offset, coil)| {
                        bank.write_bit(RegisterSpace::Coil, addr + offset as u16, coil)
                    })
                    .map(|()| Response::WriteMultipleCoils(addr, quantity))
                    .map_err(internal_failure)
            }
            Request::WriteMultipleRegisters(addr, words) => {
                let quantity = words.len() as u16;
                check_quantity(quantity, MAX_WRITE_WORDS)?;
                check_span(bank.span_valid(RegisterSpace::HoldingRegister, addr, quantity))?;
                let bank = self.device.bank_mut();
                words
                    .into_iter()
                    .enumerate()
                    .try_for_each(|(offset, word)| {
                        bank.write_word(RegisterSpace::HoldingRegister, addr + offset as u16, word)
                    })
                    .map(|()| Response::WriteMultipleRegisters(addr, quantity))
                    .map_err(internal_failure)
            }
            Request::ReportServerId => Ok(Response::ReportServerId(
                self.device.name().as_bytes().to_vec(),
                true,
            )),
            Request::ReadDeviceIdentification {
                read_device_id_code,
                object_id,
            } => self.read_device_identification(read_device_id_code, object_id),
        }
    }

    fn read_bits(
        &self,
        space: RegisterSpace,
        addr: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, Exception> {
        self.device
            .bank()
            .read_bits(space, addr, quantity)
            .map_err(internal_failure)
    }

    fn read_words(
        &self,
        space: RegisterSpace,
        addr: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, Exception> {
        self.device
            .bank()
            .read_words(space, addr, quantity)
            .map_err(internal_failure)
    }

    fn read_device_identification(
        &self,
        read_device_id_code: u8,
        object_id: u8,
    ) -> Result<Response, Exception> {
        let max_object_id = match read_device_id_code {
            READ_DEVICE_ID_BASIC => BASIC_MAX_OBJECT_ID,
            READ_DEVICE_ID_REGULAR => REGULAR_MAX_OBJECT_ID,
            _ => return Err(Exception::IllegalDataValue),
        };
        let identity = self.device.identity();
        let objects = (object_id..=max_object_id)
            .filter_map(|id| {
                identity
                    .object(id)
                    .map(|value| (id, value.as_bytes().to_vec()))
            })
            .collect();
        Ok(Response::ReadDeviceIdentification {
            read_device_id_code,
            conformity_level: CONFORMITY_LEVEL,
            objects,
        })
    }
}

/// Out-of-limit quantities are data value errors, checked before any
/// address validation.
const fn check_quantity(quantity: u16, max: u16) -> Result<(), Exception> {
    if quantity >= 1 && quantity <= max {
        Ok(())
    } else {
        Err(Exception::IllegalDataValue)
    }
}

/// Store failures behind a validated request are internal errors.
fn internal_failure(err: crate::StoreError) -> Exception {
    log::error!("Register store failure: {err}");
    Exception::ServerDeviceFailure
}

const fn check_span(valid: bool) -> Result<(), Exception> {
    if valid {
        Ok(())
    } else {
        Err(Exception::IllegalDataAddress)
    }
}

/// Map a PDU decode error onto the exception the client receives.
const fn decode_error_exception(err: &Error) -> Exception {
    match err {
        Error::FnCode(_) => Exception::IllegalFunction,
        _ => Exception::IllegalDataValue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::rtu::crc16;
    use crate::device::{DeviceIdentity, DeviceProfile};

    const PROFILE: &str = r#"{
        "name": "Sim",
        "identity": { "vendorName": "ACME", "productCode": "SIM-1", "majorMinorRevision": "1.0" },
        "registers": [
            { "type": "HoldingRegister", "address": 10, "dataType": "uint16", "value": 1234 },
            { "type": "InputRegister", "address": 0, "dataType": "uint16", "value": 77 },
            { "type": "Coil", "address": 2, "dataType": "boolean", "value": true },
            { "type": "DiscreteInput", "address": 0, "dataType": "boolean", "value": false }
        ]
    }"#;

    fn profile_server() -> RtuServer {
        let profile = DeviceProfile::from_json(PROFILE).unwrap();
        RtuServer::with_unit(Device::from_profile(&profile).unwrap(), 0x01)
    }

    fn request_adu(body: &[u8]) -> Vec<u8> {
        let mut buf = body.to_vec();
        let crc = crc16(body);
        buf.extend_from_slice(&crc.to_be_bytes());
        buf
    }

    #[test]
    fn read_holding_register() {
        let mut server = profile_server();
        let response = server
            .process_frame(0x01, &[0x03, 0x00, 0x0A, 0x00, 0x01])
            .unwrap();
        assert_eq!(response, request_adu(&[0x01, 0x03, 0x02, 0x04, 0xD2]));
    }

    #[test]
    fn read_unmapped_register_yields_illegal_data_address() {
        let mut server = profile_server();
        let response = server
            .process_frame(0x01, &[0x03, 0x00, 0x63, 0x00, 0x01])
            .unwrap();
        assert_eq!(response[1], 0x83);
        assert_eq!(response[2], 0x02);
    }

    #[test]
    fn partially_mapped_span_is_rejected() {
        // Only address 10 is mapped, so [9, 11) must fail as a whole.
        let mut server = profile_server();
        let response = server
            .process_frame(0x01, &[0x03, 0x00, 0x09, 0x00, 0x02])
            .unwrap();
        assert_eq!(&response[1..3], &[0x83, 0x02]);
    }

    #[test]
    fn oversized_quantity_yields_illegal_data_value() {
        let mut server = profile_server();
        // 126 holding registers, one over the limit
        let response = server
            .process_frame(0x01, &[0x03, 0x00, 0x00, 0x00, 0x7E])
            .unwrap();
        assert_eq!(&response[1..3], &[0x83, 0x03]);

        // zero quantity
        let response = server
            .process_frame(0x01, &[0x01, 0x00, 0x00, 0x00, 0x00])
            .unwrap();
        assert_eq!(&response[1..3], &[0x81, 0x03]);
    }

    #[test]
    fn write_then_read_back() {
        let mut server = profile_server();
        let response = server
            .process_frame(0x01, &[0x06, 0x00, 0x0A, 0xAB, 0xCD])
            .unwrap();
        assert_eq!(response, request_adu(&[0x01, 0x06, 0x00, 0x0A, 0xAB, 0xCD]));

        let response = server
            .process_frame(0x01, &[0x03, 0x00, 0x0A, 0x00, 0x01])
            .unwrap();
        assert_eq!(response, request_adu(&[0x01, 0x03, 0x02, 0xAB, 0xCD]));
    }

    #[test]
    fn write_single_coil() {
        let mut server = profile_server();
        let response = server
            .process_frame(0x01, &[0x05, 0x00, 0x02, 0x00, 0x00])
            .unwrap();
        assert_eq!(response, request_adu(&[0x01, 0x05, 0x00, 0x02, 0x00, 0x00]));

        let response = server
            .process_frame(0x01, &[0x01, 0x00, 0x02, 0x00, 0x01])
            .unwrap();
        assert_eq!(response, request_adu(&[0x01, 0x01, 0x01, 0x00]));
    }

    #[test]
    fn write_multiple_coils_checks_quantity_and_span() {
        // 1969 coils, one over the limit, with a matching byte count.
        let mut server = RtuServer::with_unit(Device::wide("Sim"), 0x01);
        let mut pdu = vec![0x0F, 0x00, 0x00, 0x07, 0xB1, 0xF7];
        pdu.extend_from_slice(&[0x00; 247]);
        let response = server.process_frame(0x01, &pdu).unwrap();
        assert_eq!(&response[1..3], &[0x8F, 0x03]);

        // Only coil 2 is mapped in the profile, so a span of two fails.
        let mut server = profile_server();
        let response = server
            .process_frame(0x01, &[0x0F, 0x00, 0x02, 0x00, 0x02, 0x01, 0x03])
            .unwrap();
        assert_eq!(&response[1..3], &[0x8F, 0x02]);
    }

    #[test]
    fn write_multiple_coils_round_trip() {
        let mut server = RtuServer::with_unit(Device::wide("Sim"), 0x01);
        let response = server
            .process_frame(0x01, &[0x0F, 0x00, 0x10, 0x00, 0x03, 0x01, 0x05])
            .unwrap();
        assert_eq!(response, request_adu(&[0x01, 0x0F, 0x00, 0x10, 0x00, 0x03]));

        let response = server
            .process_frame(0x01, &[0x01, 0x00, 0x10, 0x00, 0x03])
            .unwrap();
        assert_eq!(response, request_adu(&[0x01, 0x01, 0x01, 0x05]));
    }

    #[test]
    fn invalid_coil_value_yields_illegal_data_value() {
        let mut server = profile_server();
        let response = server
            .process_frame(0x01, &[0x05, 0x00, 0x02, 0x12, 0x34])
            .unwrap();
        assert_eq!(&response[1..3], &[0x85, 0x03]);
    }

    #[test]
    fn unknown_function_code_yields_illegal_function() {
        let mut server = profile_server();
        let response = server.process_frame(0x01, &[0x66, 0x00]).unwrap();
        assert_eq!(&response[1..3], &[0xE6, 0x01]);
    }

    #[test]
    fn reflected_response_frame_is_dropped() {
        // A half-duplex line can echo our own responses back at us; a
        // CRC-valid frame whose function byte has the exception bit set
        // must be dropped without an answer.
        let mut buffer = ReassemblyBuffer::new();
        buffer.push(&request_adu(&[0x01, 0x90]));
        let frame = buffer.try_extract().unwrap();
        assert_eq!(frame.pdu, vec![0x90]);

        let mut server = profile_server();
        assert_eq!(server.process_frame(frame.slave, &frame.pdu), None);
        // ...and the server still answers a proper request afterwards.
        assert!(server
            .process_frame(0x01, &[0x03, 0x00, 0x0A, 0x00, 0x01])
            .is_some());
    }

    #[test]
    fn other_unit_is_ignored() {
        let mut server = profile_server();
        assert_eq!(server.process_frame(0x05, &[0x03, 0x00, 0x0A, 0x00, 0x01]), None);
    }

    #[test]
    fn unit_span_is_inclusive() {
        let profile = DeviceProfile::from_json(PROFILE).unwrap();
        let mut server = RtuServer::new(Device::from_profile(&profile).unwrap(), 0x01..=0x10);
        assert!(server
            .process_frame(0x10, &[0x03, 0x00, 0x0A, 0x00, 0x01])
            .is_some());
        assert!(server
            .process_frame(0x11, &[0x03, 0x00, 0x0A, 0x00, 0x01])
            .is_none());
    }

    #[test]
    fn all_units_span_excludes_broadcast() {
        let mut server = RtuServer::new(Device::wide("Sim"), ALL_UNITS);
        assert!(server
            .process_frame(0xF7, &[0x03, 0x00, 0x0A, 0x00, 0x01])
            .is_some());
        assert!(server
            .process_frame(0x00, &[0x03, 0x00, 0x0A, 0x00, 0x01])
            .is_none());
    }

    #[test]
    fn report_server_id() {
        let mut server = profile_server();
        let response = server.process_frame(0x01, &[0x11]).unwrap();
        assert_eq!(
            response,
            request_adu(&[0x01, 0x11, 0x04, b'S', b'i', b'm', 0xFF])
        );
    }

    #[test]
    fn read_device_identification_basic() {
        let mut server = profile_server();
        let response = server.process_frame(0x01, &[0x2B, 0x0E, 0x01, 0x00]).unwrap();
        let expected = request_adu(&[
            0x01, 0x2B, 0x0E, 0x01, 0x01, 0x00, 0x00, 0x03, // header, 3 objects
            0x00, 0x04, b'A', b'C', b'M', b'E', // vendor name
            0x01, 0x05, b'S', b'I', b'M', b'-', b'1', // product code
            0x02, 0x03, b'1', b'.', b'0', // revision
        ]);
        assert_eq!(response, expected);
    }

    #[test]
    fn read_device_identification_from_object_id() {
        let mut server = profile_server();
        let response = server.process_frame(0x01, &[0x2B, 0x0E, 0x01, 0x02]).unwrap();
        let expected = request_adu(&[
            0x01, 0x2B, 0x0E, 0x01, 0x01, 0x00, 0x00, 0x01, // one object left
            0x02, 0x03, b'1', b'.', b'0',
        ]);
        assert_eq!(response, expected);
    }

    #[test]
    fn read_device_identification_regular_includes_empty_objects() {
        let mut server = profile_server();
        let response = server.process_frame(0x01, &[0x2B, 0x0E, 0x02, 0x03]).unwrap();
        // Objects 3..=6 are all unset and serialize with zero length.
        let expected = request_adu(&[
            0x01, 0x2B, 0x0E, 0x02, 0x01, 0x00, 0x00, 0x04, //
            0x03, 0x00, 0x04, 0x00, 0x05, 0x00, 0x06, 0x00,
        ]);
        assert_eq!(response, expected);
    }

    #[test]
    fn read_device_identification_bad_code() {
        let mut server = profile_server();
        let response = server.process_frame(0x01, &[0x2B, 0x0E, 0x07, 0x00]).unwrap();
        assert_eq!(&response[1..3], &[0xAB, 0x03]);
    }

    #[test]
    fn bad_mei_type_yields_illegal_data_value() {
        let mut server = profile_server();
        let response = server.process_frame(0x01, &[0x2B, 0x0D, 0x01, 0x00]).unwrap();
        assert_eq!(&response[1..3], &[0xAB, 0x03]);
    }

    #[test]
    fn wide_device_answers_everywhere() {
        let mut server = RtuServer::with_unit(Device::wide("Sim"), 0x01);
        // Word spaces are pre-filled with the address pattern.
        let response = server
            .process_frame(0x01, &[0x03, 0x12, 0x34, 0x00, 0x01])
            .unwrap();
        assert_eq!(response, request_adu(&[0x01, 0x03, 0x02, 0x12, 0x34]));
    }

    #[test]
    fn wide_device_identity_is_empty() {
        let device = Device::wide("Sim");
        assert_eq!(*device.identity(), DeviceIdentity::default());
    }
}
