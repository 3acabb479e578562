#![deny(unsafe_code)]
//! SD card `FileStore` over embedded-sdmmc
//!
//! Every operation opens the volume and the root directory, does its work
//! and closes them again, so no handle outlives a call. The card is used by
//! the network task only, so blocking SPI is acceptable.

use embedded_sdmmc::{
    Error, Mode, SdCard, SdCardError, TimeSource, Timestamp, VolumeIdx, VolumeManager,
};
use envnode_hal::FileStore;

/// FAT timestamps are not meaningful here; files carry a fixed date.
pub struct FixedTime;

impl TimeSource for FixedTime {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 54,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

pub struct SdStore<S, D>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
{
    volume_mgr: VolumeManager<SdCard<S, D>, FixedTime, 4, 4, 1>,
}

impl<S, D> SdStore<S, D>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
{
    pub fn new(sd_card: SdCard<S, D>) -> Self {
        Self {
            volume_mgr: VolumeManager::new(sd_card, FixedTime),
        }
    }

    fn write_with_mode(&self, name: &str, data: &[u8], mode: Mode) -> Result<(), Error<SdCardError>> {
        let volume = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume.open_root_dir()?;
        let file = root_dir.open_file_in_dir(name, mode)?;
        file.write(data)?;
        file.close()?;
        root_dir.close()?;
        volume.close()?;
        Ok(())
    }
}

impl<S, D> FileStore for SdStore<S, D>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
{
    type Error = Error<SdCardError>;

    fn exists(&self, name: &str) -> Result<bool, Self::Error> {
        let volume = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume.open_root_dir()?;
        let found = match root_dir.find_directory_entry(name) {
            Ok(_) => true,
            Err(Error::NotFound) => false,
            Err(e) => return Err(e),
        };
        root_dir.close()?;
        volume.close()?;
        Ok(found)
    }

    fn read_at(&self, name: &str, offset: u32, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let volume = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume.open_root_dir()?;
        let file = root_dir.open_file_in_dir(name, Mode::ReadOnly)?;

        let read = if offset >= file.length() {
            0
        } else {
            file.seek_from_start(offset)?;
            let mut filled = 0;
            while filled < buf.len() && !file.is_eof() {
                let n = file.read(&mut buf[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            filled
        };

        file.close()?;
        root_dir.close()?;
        volume.close()?;
        Ok(read)
    }

    fn append(&self, name: &str, data: &[u8]) -> Result<(), Self::Error> {
        self.write_with_mode(name, data, Mode::ReadWriteCreateOrAppend)
    }

    fn write(&self, name: &str, data: &[u8]) -> Result<(), Self::Error> {
        self.write_with_mode(name, data, Mode::ReadWriteCreateOrTruncate)
    }

    fn remove(&self, name: &str) -> Result<(), Self::Error> {
        let volume = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume.open_root_dir()?;
        match root_dir.delete_file_in_dir(name) {
            Ok(()) | Err(Error::NotFound) => {}
            Err(e) => return Err(e),
        }
        root_dir.close()?;
        volume.close()?;
        Ok(())
    }
}
