#![deny(unsafe_code)]
//! Device identity from the STM32F405 factory UID
//!
//! The 96-bit UID is stable across reboots and unique per chip. The W5500
//! has no burned-in address, so the MAC is derived from it: a locally
//! administered unicast prefix followed by five bytes folded from the UID.

/// Raw 12-byte (96-bit) unique device ID
pub fn uid() -> &'static [u8; 12] {
    embassy_stm32::uid::uid()
}

/// Locally administered MAC address derived from the UID
pub fn mac_address() -> [u8; 6] {
    mac_from_uid(uid())
}

fn mac_from_uid(uid: &[u8; 12]) -> [u8; 6] {
    let mut mac = [0x02, 0, 0, 0, 0, 0];
    for (i, byte) in uid.iter().enumerate() {
        mac[1 + i % 5] ^= byte.rotate_left((i / 5) as u32);
    }
    mac
}
