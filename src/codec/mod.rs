//! Decoding of request PDUs and encoding of response PDUs.

use crate::{
    error::Error,
    frame::{
        Coils, Data, ExceptionResponse, FunctionCode, Request, Response, ResponsePdu,
        MEI_DEVICE_IDENTIFICATION,
    },
    util::{bool_to_u16_coil, u16_coil_to_bool},
};
use byteorder::{BigEndian, ByteOrder};

pub mod rtu;

type Result<T> = core::result::Result<T, Error>;

impl From<ExceptionResponse> for [u8; 2] {
    fn from(ex: ExceptionResponse) -> [u8; 2] {
        let fn_code = ex.function.value();
        debug_assert!(fn_code < 0x80);
        [fn_code + 0x80, ex.exception as u8]
    }
}

impl<'r> TryFrom<&'r [u8]> for Request<'r> {
    type Error = Error;

    fn try_from(bytes: &'r [u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::BufferSize);
        }

        let fn_code = bytes[0];

        if bytes.len() < min_request_pdu_len(fn_code.into()) {
            return Err(Error::BufferSize);
        }

        use crate::frame::Request::*;
        use FunctionCode as f;

        let req = match FunctionCode::from(fn_code) {
            f::ReadCoils
            | f::ReadDiscreteInputs
            | f::ReadHoldingRegisters
            | f::ReadInputRegisters
            | f::WriteSingleRegister => {
                let addr = BigEndian::read_u16(&bytes[1..3]);
                let quantity = BigEndian::read_u16(&bytes[3..5]);

                match FunctionCode::from(fn_code) {
                    f::ReadCoils => ReadCoils(addr, quantity),
                    f::ReadDiscreteInputs => ReadDiscreteInputs(addr, quantity),
                    f::ReadHoldingRegisters => ReadHoldingRegisters(addr, quantity),
                    f::ReadInputRegisters => ReadInputRegisters(addr, quantity),
                    f::WriteSingleRegister => WriteSingleRegister(addr, quantity),
                    _ => unreachable!(),
                }
            }
            f::WriteSingleCoil => WriteSingleCoil(
                BigEndian::read_u16(&bytes[1..3]),
                u16_coil_to_bool(BigEndian::read_u16(&bytes[3..5]))?,
            ),
            f::WriteMultipleCoils => {
                let address = BigEndian::read_u16(&bytes[1..3]);
                let quantity = BigEndian::read_u16(&bytes[3..5]) as usize;
                let byte_count = bytes[5];
                // The byte count must cover exactly the announced quantity.
                if byte_count as usize != crate::util::packed_coils_len(quantity)
                    || bytes.len() < 6 + byte_count as usize
                {
                    return Err(Error::ByteCount(byte_count));
                }
                let data = &bytes[6..6 + byte_count as usize];
                WriteMultipleCoils(address, Coils { quantity, data })
            }
            f::WriteMultipleRegisters => {
                let address = BigEndian::read_u16(&bytes[1..3]);
                let quantity = BigEndian::read_u16(&bytes[3..5]) as usize;
                let byte_count = bytes[5];
                if byte_count as usize != quantity * 2 || bytes.len() < 6 + byte_count as usize {
                    return Err(Error::ByteCount(byte_count));
                }
                let data = Data {
                    quantity,
                    data: &bytes[6..6 + byte_count as usize],
                };
                WriteMultipleRegisters(address, data)
            }
            f::ReportServerId => ReportServerId,
            f::ReadDeviceIdentification => {
                let mei_type = bytes[1];
                if mei_type != MEI_DEVICE_IDENTIFICATION {
                    return Err(Error::MeiType(mei_type));
                }
                ReadDeviceIdentification {
                    read_device_id_code: bytes[2],
                    object_id: bytes[3],
                }
            }
            f::Custom(_) => return Err(Error::FnCode(fn_code)),
        };
        Ok(req)
    }
}

impl Response {
    /// Serialize the response PDU (function code plus body).
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(FunctionCode::from(self).value());
        match self {
            Self::ReadCoils(coils) | Self::ReadDiscreteInputs(coils) => {
                let packed = crate::util::pack_coils(coils);
                buf.push(packed.len() as u8);
                buf.extend_from_slice(&packed);
            }
            Self::ReadHoldingRegisters(words) | Self::ReadInputRegisters(words) => {
                buf.push((words.len() * 2) as u8);
                for w in words {
                    buf.extend_from_slice(&w.to_be_bytes());
                }
            }
            Self::WriteSingleCoil(address, coil) => {
                buf.extend_from_slice(&address.to_be_bytes());
                buf.extend_from_slice(&bool_to_u16_coil(*coil).to_be_bytes());
            }
            Self::WriteSingleRegister(address, word) => {
                buf.extend_from_slice(&address.to_be_bytes());
                buf.extend_from_slice(&word.to_be_bytes());
            }
            Self::WriteMultipleCoils(address, quantity)
            | Self::WriteMultipleRegisters(address, quantity) => {
                buf.extend_from_slice(&address.to_be_bytes());
                buf.extend_from_slice(&quantity.to_be_bytes());
            }
            Self::ReportServerId(id, run_status) => {
                buf.push((id.len() + 1) as u8);
                buf.extend_from_slice(id);
                buf.push(if *run_status { 0xFF } else { 0x00 });
            }
            Self::ReadDeviceIdentification {
                read_device_id_code,
                conformity_level,
                objects,
            } => {
                buf.push(MEI_DEVICE_IDENTIFICATION);
                buf.push(*read_device_id_code);
                buf.push(*conformity_level);
                buf.push(0x00); // more follows
                buf.push(0x00); // next object id
                buf.push(objects.len() as u8);
                for (id, value) in objects {
                    buf.push(*id);
                    buf.push(value.len() as u8);
                    buf.extend_from_slice(value);
                }
            }
        }
    }
}

impl ResponsePdu {
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        match &self.0 {
            Ok(rsp) => rsp.encode(buf),
            Err(ex) => buf.extend_from_slice(&<[u8; 2]>::from(*ex)),
        }
    }
}

fn min_request_pdu_len(fn_code: FunctionCode) -> usize {
    use FunctionCode::*;
    match fn_code {
        ReadCoils | ReadDiscreteInputs | ReadHoldingRegisters | ReadInputRegisters
        | WriteSingleCoil | WriteSingleRegister => 5,
        WriteMultipleCoils | WriteMultipleRegisters => 6,
        ReportServerId => 1,
        ReadDeviceIdentification => 4,
        Custom(_) => 1,
    }
}
