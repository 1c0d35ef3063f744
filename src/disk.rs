// ===== Disk Access Adapter =====

use log::{debug, info};
use spin::Mutex;

use crate::{
    err::SdError,
    usdhc::{Board, RegisterPort, UsdhcHost},
};

// Serializes controller bring-up across all disks
static USDHC_INIT_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskStatus {
    Uninit,
    Ok,
    NoMedia,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskIoctl {
    CtrlSync,
    SectorCount,
    SectorSize,
    EraseBlockSize,
}

/// Sector level access to the card behind one controller.
pub struct UsdhcDisk<P: RegisterPort, B: Board> {
    host: UsdhcHost<P, B>,
    status: DiskStatus,
}

impl<P: RegisterPort, B: Board> UsdhcDisk<P, B> {
    pub fn new(host: UsdhcHost<P, B>) -> Self {
        Self {
            host,
            status: DiskStatus::Uninit,
        }
    }

    pub fn host(&self) -> &UsdhcHost<P, B> {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut UsdhcHost<P, B> {
        &mut self.host
    }

    /// Power up the slot and bring up the card. A second call on a ready
    /// disk does nothing.
    pub fn init(&mut self) -> Result<(), SdError> {
        if self.status == DiskStatus::Ok {
            return Ok(());
        }

        let _guard = USDHC_INIT_LOCK.lock();

        self.host.board_mut().power_on()?;
        if !self.host.board().card_detect()? {
            info!("No SD card inserted");
            self.status = DiskStatus::NoMedia;
            return Err(SdError::NoCard);
        }

        self.host.init_host()?;
        self.host.host_reset();
        self.host.init_card()?;

        self.status = DiskStatus::Ok;
        Ok(())
    }

    pub fn status(&self) -> DiskStatus {
        self.status
    }

    fn check_ready(&self) -> Result<(), SdError> {
        match self.status {
            DiskStatus::Ok => Ok(()),
            DiskStatus::NoMedia => Err(SdError::NoCard),
            DiskStatus::Uninit => Err(SdError::IoError),
        }
    }

    pub fn read(&mut self, buf: &mut [u8], sector: u32, count: u32) -> Result<(), SdError> {
        debug!("sector={} count={}", sector, count);
        self.host.read_blocks(buf, sector, count)
    }

    pub fn write(&mut self, buf: &[u8], sector: u32, count: u32) -> Result<(), SdError> {
        debug!("sector={} count={}", sector, count);
        self.host.write_blocks(buf, sector, count)
    }

    pub fn ioctl(&self, cmd: DiskIoctl) -> Result<u32, SdError> {
        self.check_ready()?;
        let card = self.host.card().ok_or(SdError::NoCard)?;

        match cmd {
            DiskIoctl::CtrlSync => Ok(0),
            DiskIoctl::SectorCount => Ok(card.block_count),
            DiskIoctl::SectorSize | DiskIoctl::EraseBlockSize => Ok(card.block_size),
        }
    }
}
