//! Circular result log on external NOR flash
//!
//! Sector 0 holds the log metadata, a magic word followed by the persisted
//! write cursor. Data sectors 1.. each hold 341 fixed size records, a record
//! never straddles a sector boundary. Records are drained newest first: the
//! read cursor starts at the write cursor and walks backwards. Once the last
//! record of a sector has been drained the sector is erased and the write
//! cursor pulled back to it, so the log shrinks from the top.
//!
//! Every cursor change is persisted by erasing and rewriting sector 0. A bad
//! magic at startup means the flash is blank or corrupt and the whole chip is
//! erased.

use core::fmt::Debug;

use crate::device::{SECTOR_COUNT, SECTOR_SIZE};
use crate::flash::FlashDevice;
use crate::record::{FlashRecord, RECORD_LEN};

/// Metadata magic, stored low byte first
pub const MAGIC: u32 = 0xAA55_BCDE;

/// Metadata length: magic, cursor sector, cursor offset
const META_LEN: usize = 8;

/// First sector holding records
pub const FIRST_DATA_SECTOR: u16 = 1;

/// Flash log errors
#[derive(PartialEq, Clone, Debug)]
pub enum Error<E> {
    /// Flash primitive failed
    Flash(E),
    /// The write cursor reached the end of the flash
    Full,
}

impl<E> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Error::Flash(e)
    }
}

/// Flash layout
#[derive(PartialEq, Clone, Copy, Debug)]
pub struct Geometry {
    /// Bytes per erasable sector
    pub sector_size: u32,
    /// Sectors on the device, including the metadata sector
    pub sector_count: u16,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            sector_size: SECTOR_SIZE,
            sector_count: SECTOR_COUNT,
        }
    }
}

impl Geometry {
    /// Records that fit in one sector
    pub fn records_per_sector(&self) -> u16 {
        (self.sector_size as usize / RECORD_LEN) as u16
    }

    /// Offset of the last record slot in a sector
    pub fn last_slot(&self) -> u16 {
        (self.records_per_sector() - 1) * RECORD_LEN as u16
    }

    /// Total record capacity of the data sectors
    pub fn capacity(&self) -> u32 {
        (self.sector_count - FIRST_DATA_SECTOR) as u32 * self.records_per_sector() as u32
    }

    fn address(&self, c: Cursor) -> u32 {
        c.sector as u32 * self.sector_size + c.offset as u32
    }

    /// Whether a cursor read back from flash is a position this log could have written
    fn is_valid(&self, c: Cursor) -> bool {
        if c.sector == self.sector_count {
            return c.offset == 0;
        }
        c.sector >= FIRST_DATA_SECTOR
            && c.sector < self.sector_count
            && c.offset as usize % RECORD_LEN == 0
            && c.offset <= self.last_slot()
    }
}

/// Position in the log, `offset` bytes into data sector `sector`
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct Cursor {
    pub sector: u16,
    pub offset: u16,
}

impl Cursor {
    /// Start of the first data sector, the position of an empty log
    pub const START: Cursor = Cursor {
        sector: FIRST_DATA_SECTOR,
        offset: 0,
    };

    pub const fn new(sector: u16, offset: u16) -> Self {
        Self { sector, offset }
    }
}

/// Flash backed result log
pub struct FlashLog<F> {
    flash: F,
    geometry: Geometry,
    write: Cursor,
    read: Cursor,
}

impl<F> FlashLog<F>
where
    F: FlashDevice,
{
    /// Open the log on the default 2MiB layout
    pub fn init(flash: F) -> Result<Self, Error<F::Error>> {
        Self::init_with(flash, Geometry::default())
    }

    /// Open the log, bootstrapping the flash if the metadata is missing or corrupt
    ///
    /// The read cursor starts at the persisted write cursor.
    pub fn init_with(flash: F, geometry: Geometry) -> Result<Self, Error<F::Error>> {
        let mut log = FlashLog {
            flash,
            geometry,
            write: Cursor::START,
            read: Cursor::START,
        };

        match log.load_cursor()? {
            Some(c) => {
                debug!("Opened log, write cursor: {:?}", c);
                log.write = c;
                log.read = c;
            }
            None => {
                warn!("Flash log metadata invalid, erasing chip");
                log.format()?;
            }
        }

        Ok(log)
    }

    /// Erase the chip and start an empty log
    pub fn format(&mut self) -> Result<(), Error<F::Error>> {
        self.flash.erase_chip()?;

        self.write = Cursor::START;
        self.read = Cursor::START;
        self.write_meta(Cursor::START, false)?;

        info!("Flash log formatted ({} record capacity)", self.geometry.capacity());

        Ok(())
    }

    /// Current write cursor
    pub fn write_cursor(&self) -> Cursor {
        self.write
    }

    /// Current read cursor
    pub fn read_cursor(&self) -> Cursor {
        self.read
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Records behind the read cursor, still to be drained
    pub fn pending(&self) -> u32 {
        (self.read.sector - FIRST_DATA_SECTOR) as u32 * self.geometry.records_per_sector() as u32
            + (self.read.offset as usize / RECORD_LEN) as u32
    }

    /// Release the underlying flash
    pub fn free(self) -> F {
        self.flash
    }

    /// Append a record at the write cursor
    ///
    /// The new cursor is persisted before returning, and the read cursor
    /// moves to it so the next drain starts from this record.
    pub fn append(&mut self, record: &FlashRecord) -> Result<Cursor, Error<F::Error>> {
        if self.write.sector >= self.geometry.sector_count {
            warn!("Flash log full, dropping record");
            return Err(Error::Full);
        }

        let addr = self.geometry.address(self.write);
        self.flash.write(addr, &record.to_bytes())?;

        let mut next = Cursor::new(self.write.sector, self.write.offset + RECORD_LEN as u16);
        if next.offset > self.geometry.last_slot() {
            next = Cursor::new(next.sector + 1, 0);
            debug!("Write cursor rolled to sector {}", next.sector);
        }

        self.write_meta(next, true)?;

        self.write = next;
        self.read = next;

        trace!("Appended record at 0x{:06x}, cursor: {:?}", addr, next);

        Ok(next)
    }

    /// Take the newest undrained record
    ///
    /// Returns `None` once the read cursor is back at the start of the log.
    /// Draining the lowest record of a sector erases that sector and persists
    /// it as the new write cursor.
    pub fn drain_one(&mut self) -> Result<Option<FlashRecord>, Error<F::Error>> {
        match self.peek()? {
            Some((slot, r)) => {
                self.commit_drain(slot)?;
                Ok(Some(r))
            }
            None => Ok(None),
        }
    }

    /// Read the newest undrained record and its slot without moving any cursor
    ///
    /// Pass the slot to `commit_drain` once the record has been dealt with.
    pub fn peek(&mut self) -> Result<Option<(Cursor, FlashRecord)>, Error<F::Error>> {
        let slot = if self.read.offset as usize >= RECORD_LEN {
            Cursor::new(self.read.sector, self.read.offset - RECORD_LEN as u16)
        } else if self.read.sector > FIRST_DATA_SECTOR {
            Cursor::new(self.read.sector - 1, self.geometry.last_slot())
        } else {
            return Ok(None);
        };

        let mut b = [0u8; RECORD_LEN];
        self.flash.read(self.geometry.address(slot), &mut b)?;

        Ok(Some((slot, FlashRecord::from_bytes(&b))))
    }

    /// Move the read cursor down to `slot`, a slot returned by `peek`
    ///
    /// A slot at the start of a sector erases the sector and persists it as
    /// the new write cursor.
    pub fn commit_drain(&mut self, slot: Cursor) -> Result<(), Error<F::Error>> {
        self.read = slot;

        if slot.offset == 0 {
            // Everything above this record has been drained already
            debug!("Sector {} drained, erasing", slot.sector);

            self.flash.erase_sector(slot.sector as u32 * self.geometry.sector_size)?;
            self.write_meta(slot, true)?;
            self.write = slot;
        }

        trace!("Drained record at 0x{:06x}, cursor: {:?}", self.geometry.address(slot), self.read);

        Ok(())
    }

    /// Forget in-memory drain progress after an interrupted sync
    ///
    /// Both cursors return to the persisted write cursor.
    pub fn reset_cursors_after_disconnect(&mut self) -> Result<(), Error<F::Error>> {
        match self.load_cursor()? {
            Some(c) => {
                debug!("Resetting cursors to {:?}", c);
                self.write = c;
                self.read = c;
                Ok(())
            }
            None => {
                warn!("Flash log metadata invalid on reset, erasing chip");
                self.format()
            }
        }
    }

    fn load_cursor(&mut self) -> Result<Option<Cursor>, Error<F::Error>> {
        let mut b = [0u8; META_LEN];
        self.flash.read(0, &mut b)?;

        if u32::from_le_bytes([b[0], b[1], b[2], b[3]]) != MAGIC {
            return Ok(None);
        }

        let c = Cursor::new(
            u16::from_le_bytes([b[4], b[5]]),
            u16::from_le_bytes([b[6], b[7]]),
        );
        if !self.geometry.is_valid(c) {
            warn!("Persisted cursor out of range: {:?}", c);
            return Ok(None);
        }

        Ok(Some(c))
    }

    fn write_meta(&mut self, c: Cursor, erase: bool) -> Result<(), Error<F::Error>> {
        if erase {
            self.flash.erase_sector(0)?;
        }

        let mut b = [0u8; META_LEN];
        b[..4].copy_from_slice(&MAGIC.to_le_bytes());
        b[4..6].copy_from_slice(&c.sector.to_le_bytes());
        b[6..].copy_from_slice(&c.offset.to_le_bytes());

        self.flash.write(0, &b)?;
        Ok(())
    }
}

impl<F> Debug for FlashLog<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FlashLog")
            .field("geometry", &self.geometry)
            .field("write", &self.write)
            .field("read", &self.read)
            .finish()
    }
}
