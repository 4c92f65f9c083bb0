//! CRC32 (IEEE) checksum, used to authenticate the encrypted session key in
//! `ChannelEncryptResponse`.

pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
