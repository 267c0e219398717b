/// CRC16 engine used to protect every packet on the wire
///
/// Polynomial 0x8005, register preset to 0xFFFF, MSB-first with no
/// reflection and no final XOR. Both endpoints must agree bit for bit.
use crc::{Crc, CRC_16_CMS};

const LINK_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_CMS);

/// Compute the link checksum over `bytes`
pub fn checksum(bytes: &[u8]) -> u16 {
    LINK_CRC.checksum(bytes)
}
