//! USB mass storage, Bulk-Only Transport.
//!
//! [`MscExecutor`] runs the BOT command cycle over two override-mode
//! channels: the bulk OUT pipe (MANUAL_IN, host to CPU) carries command
//! wrappers and write data, the bulk IN pipe (MANUAL_OUT, CPU to host)
//! carries read data and status wrappers. One caller-supplied staging buffer
//! is lent back and forth between the two channels, so no transfer ever
//! copies through the DMA rings.
//!
//! ```text
//! Idle --arm--> Cbw --+--> DataIn  --+--> Csw --> (Done) --> Cbw
//!                     +--> DataOut --+     ^
//!                     |              +--> Status --halt cleared--+
//!                     +--> Stalled (invalid CBW, until reset)
//! ```
//!
//! The executor never blocks: the worker thread calls [`MscExecutor::step`]
//! whenever a channel notification or timeout wakes it. Stalls are reported
//! as [`MscStep::Stall`] for the caller to apply through the endpoint
//! controller.

use crate::dma::{DmaChannel, RecvBuffer};
use crate::error::{ConfigError, DmaError, Error, IoError, Result};
use crate::internal::constants::{
    CBW_LEN, CBW_SIGNATURE, CDB_MAX_LEN, CSW_LEN, CSW_SIGNATURE, DMA_GRANULARITY,
};

/// SCSI operation codes handled by the executor
mod opcode {
    pub const TEST_UNIT_READY: u8 = 0x00;
    pub const REQUEST_SENSE: u8 = 0x03;
    pub const INQUIRY: u8 = 0x12;
    pub const READ_CAPACITY_10: u8 = 0x25;
    pub const READ_10: u8 = 0x28;
    pub const WRITE_10: u8 = 0x2A;
}

const INQUIRY_LEN: usize = 36;
const SENSE_LEN: usize = 18;

// =============================================================================
// Block Device
// =============================================================================

/// Storage behind the mass storage function.
pub trait BlockDevice {
    /// Block size in bytes (a multiple of 16)
    fn block_size(&self) -> u32;

    /// Number of blocks
    fn block_count(&self) -> u32;

    /// Whether a medium is present
    fn is_ready(&self) -> bool {
        true
    }

    /// Read whole blocks starting at `lba` into `buf`
    fn read_blocks(&mut self, lba: u32, buf: &mut [u8]) -> Result<()>;

    /// Write whole blocks starting at `lba` from `buf`
    fn write_blocks(&mut self, lba: u32, buf: &[u8]) -> Result<()>;
}

// =============================================================================
// Wire Types
// =============================================================================

/// Command Block Wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommandBlock {
    /// Host tag, echoed in the status wrapper
    pub tag: u32,
    /// Bytes the host expects to transfer
    pub data_len: u32,
    /// Data phase direction is device to host
    pub dir_in: bool,
    /// Logical unit
    pub lun: u8,
    cdb: [u8; CDB_MAX_LEN],
    cdb_len: usize,
}

impl CommandBlock {
    /// Parse a received wrapper; `None` unless it is exactly a valid CBW.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != CBW_LEN {
            return None;
        }
        let word = |at: usize| -> Option<u32> {
            Some(u32::from_le_bytes(bytes.get(at..at + 4)?.try_into().ok()?))
        };
        if word(0)? != CBW_SIGNATURE {
            return None;
        }
        let cdb_len = usize::from(bytes[14] & 0x1F);
        if cdb_len == 0 || cdb_len > CDB_MAX_LEN {
            return None;
        }
        let mut cdb = [0u8; CDB_MAX_LEN];
        cdb[..cdb_len].copy_from_slice(&bytes[15..15 + cdb_len]);
        Some(Self {
            tag: word(4)?,
            data_len: word(8)?,
            dir_in: bytes[12] & 0x80 != 0,
            lun: bytes[13] & 0x0F,
            cdb,
            cdb_len,
        })
    }

    /// SCSI command block
    pub fn cdb(&self) -> &[u8] {
        &self.cdb[..self.cdb_len]
    }

    /// SCSI operation code
    pub fn opcode(&self) -> u8 {
        self.cdb[0]
    }

    fn be_u32(&self, at: usize) -> u32 {
        u32::from_be_bytes([self.cdb[at], self.cdb[at + 1], self.cdb[at + 2], self.cdb[at + 3]])
    }

    fn be_u16(&self, at: usize) -> u16 {
        u16::from_be_bytes([self.cdb[at], self.cdb[at + 1]])
    }
}

/// Command Status Wrapper status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CswStatus {
    /// Command passed
    #[default]
    Passed = 0,
    /// Command failed; sense data says why
    Failed = 1,
    /// Host and device disagree on the data phase
    PhaseError = 2,
}

/// SCSI sense key and additional sense code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sense {
    /// Sense key
    pub key: u8,
    /// Additional sense code
    pub asc: u8,
    /// Additional sense code qualifier
    pub ascq: u8,
}

impl Sense {
    /// No sense
    pub const NONE: Self = Self::new(0x00, 0x00);
    /// NOT READY, medium not present
    pub const NOT_READY: Self = Self::new(0x02, 0x3A);
    /// MEDIUM ERROR, unrecovered read error
    pub const READ_ERROR: Self = Self::new(0x03, 0x11);
    /// MEDIUM ERROR, write error
    pub const WRITE_ERROR: Self = Self::new(0x03, 0x0C);
    /// ILLEGAL REQUEST, invalid command operation code
    pub const INVALID_COMMAND: Self = Self::new(0x05, 0x20);
    /// ILLEGAL REQUEST, logical block address out of range
    pub const LBA_OUT_OF_RANGE: Self = Self::new(0x05, 0x21);
    /// ILLEGAL REQUEST, logical unit not supported
    pub const LUN_NOT_SUPPORTED: Self = Self::new(0x05, 0x25);

    const fn new(key: u8, asc: u8) -> Self {
        Self { key, asc, ascq: 0 }
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Where the executor is in the command cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MscPhase {
    /// Not waiting for anything
    #[default]
    Idle,
    /// Waiting for a command wrapper
    Cbw,
    /// Sending data to the host
    DataIn,
    /// Receiving data from the host
    DataOut,
    /// Status decided; waiting for the host to clear a data pipe halt
    Status,
    /// Sending the status wrapper
    Csw,
    /// Invalid command wrapper; both pipes stay stalled until reset
    Stalled,
}

/// Pipe(s) the caller must stall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MscStall {
    /// Bulk IN
    DataIn,
    /// Bulk OUT
    DataOut,
    /// Both pipes
    Both,
}

/// Result of one [`MscExecutor::step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MscStep {
    /// Waiting on the host
    Pending,
    /// Moved to the next phase
    Advanced,
    /// Stall the given pipe(s)
    Stall(MscStall),
    /// A command completed and the next wrapper receive is armed
    Done {
        /// Command tag
        tag: u32,
        /// Reported status
        status: CswStatus,
    },
}

#[derive(Debug, Clone, Copy, Default)]
struct Command {
    tag: u32,
    data_len: u32,
    dir_in: bool,
    /// Bytes of the data phase already moved
    done: u32,
    /// Bytes of the transfer currently lent to a channel
    in_flight: usize,
    lba: u32,
    blocks_left: u32,
    status: CswStatus,
}

impl Command {
    fn residue(&self) -> u32 {
        self.data_len.saturating_sub(self.done)
    }
}

/// Bulk-Only Transport state machine over a [`BlockDevice`]
pub struct MscExecutor<'a, D: BlockDevice> {
    device: D,
    io: Option<&'a mut [u8]>,
    chunk_blocks: u32,
    phase: MscPhase,
    sense: Sense,
    cmd: Command,
    vendor: [u8; 8],
    product: [u8; 16],
    revision: [u8; 4],
}

/// Map a not-yet-finished override wait to `None`.
fn ready<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(Error::Io(IoError::Timeout)) => Ok(None),
        Err(e) => Err(e),
    }
}

impl<'a, D: BlockDevice> MscExecutor<'a, D> {
    /// Create an executor staging transfers through `io`.
    ///
    /// `io` must be a multiple of 16 bytes and hold at least one block and
    /// the largest fixed reply (INQUIRY data).
    pub fn new(device: D, io: &'a mut [u8]) -> Result<Self> {
        let bs = device.block_size() as usize;
        if bs == 0
            || bs % DMA_GRANULARITY != 0
            || io.len() % DMA_GRANULARITY != 0
            || io.len() < bs.max(CBW_LEN).max(INQUIRY_LEN)
        {
            return Err(ConfigError::BadArgument.into());
        }
        Ok(Self {
            chunk_blocks: (io.len() / bs) as u32,
            device,
            io: Some(io),
            phase: MscPhase::Idle,
            sense: Sense::NONE,
            cmd: Command::default(),
            vendor: *b"PH      ",
            product: *b"USB DMA Storage ",
            revision: *b"1.00",
        })
    }

    /// Set the INQUIRY identification strings
    #[must_use]
    pub fn with_identity(mut self, vendor: &[u8; 8], product: &[u8; 16], revision: &[u8; 4]) -> Self {
        self.vendor = *vendor;
        self.product = *product;
        self.revision = *revision;
        self
    }

    /// Current phase
    pub fn phase(&self) -> MscPhase {
        self.phase
    }

    /// Sense data of the last failed command
    pub fn sense(&self) -> Sense {
        self.sense
    }

    /// The block device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// The block device, mutably
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Start listening for a command wrapper on the OUT pipe.
    pub fn arm<const SLOTS: usize, const BYTES: usize>(&mut self, out: &DmaChannel<'a, SLOTS, BYTES>) -> Result<()> {
        if self.phase != MscPhase::Idle {
            return Err(DmaError::InvalidSequence.into());
        }
        let io = self.io.take().ok_or(DmaError::InvalidSequence)?;
        if let Err(rejected) = out.setup_recv_buffer(io) {
            self.io = Some(rejected.buffer);
            return Err(rejected.error);
        }
        self.phase = MscPhase::Cbw;
        Ok(())
    }

    /// Take the staging buffer back from whichever channel holds it and
    /// return to `Idle`. Used for reset recovery and after the pipes were
    /// torn down.
    pub fn reset<const SLOTS: usize, const BYTES: usize>(
        &mut self,
        out: &DmaChannel<'a, SLOTS, BYTES>,
        inn: &DmaChannel<'a, SLOTS, BYTES>,
    ) -> Result<()> {
        for channel in [out, inn] {
            if self.io.is_some() {
                break;
            }
            if channel.state().is_override() {
                channel.abort()?;
                channel.reset()?;
            }
            self.io = channel.take_override_buffer();
        }
        if self.io.is_none() {
            return Err(DmaError::InvalidSequence.into());
        }
        self.phase = MscPhase::Idle;
        self.sense = Sense::NONE;
        self.cmd = Command::default();
        Ok(())
    }

    /// Continue after the host cleared the data pipe halt requested by a
    /// [`MscStep::Stall`]: the pending status wrapper is sent.
    pub fn halt_cleared<const SLOTS: usize, const BYTES: usize>(
        &mut self,
        inn: &DmaChannel<'a, SLOTS, BYTES>,
    ) -> Result<()> {
        match self.phase {
            MscPhase::Status => self.send_status(inn).map(|_| ()),
            _ => Ok(()),
        }
    }

    /// Advance the command cycle as far as the channels allow.
    pub fn step<const SLOTS: usize, const BYTES: usize>(
        &mut self,
        out: &DmaChannel<'a, SLOTS, BYTES>,
        inn: &DmaChannel<'a, SLOTS, BYTES>,
    ) -> Result<MscStep> {
        match self.phase {
            MscPhase::Idle | MscPhase::Status | MscPhase::Stalled => Ok(MscStep::Pending),
            MscPhase::Cbw => {
                let Some(RecvBuffer { data, count }) = ready(out.try_wait_for_recv_buffer())? else {
                    return Ok(MscStep::Pending);
                };
                let cbw = CommandBlock::parse(&data[..count]);
                self.io = Some(data);
                match cbw {
                    Some(cbw) => self.execute(&cbw, out, inn),
                    None => {
                        #[cfg(feature = "log")]
                        log::warn!("msc: invalid CBW ({} bytes), stalling", count);
                        self.phase = MscPhase::Stalled;
                        Ok(MscStep::Stall(MscStall::Both))
                    }
                }
            }
            MscPhase::DataIn => {
                if ready(inn.try_wait_for_completion())?.is_none() {
                    return Ok(MscStep::Pending);
                }
                self.reclaim(inn)?;
                self.cmd.done += self.cmd.in_flight as u32;
                if self.cmd.blocks_left > 0 {
                    self.read_chunk(inn)
                } else {
                    self.send_status(inn)
                }
            }
            MscPhase::DataOut => {
                let Some(RecvBuffer { data, count }) = ready(out.try_wait_for_recv_buffer())? else {
                    return Ok(MscStep::Pending);
                };
                self.io = Some(data);
                self.write_received(count, out, inn)
            }
            MscPhase::Csw => {
                if ready(inn.try_wait_for_completion())?.is_none() {
                    return Ok(MscStep::Pending);
                }
                self.reclaim(inn)?;
                let (tag, status) = (self.cmd.tag, self.cmd.status);
                self.phase = MscPhase::Idle;
                self.arm(out)?;
                Ok(MscStep::Done { tag, status })
            }
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    fn execute<const SLOTS: usize, const BYTES: usize>(
        &mut self,
        cbw: &CommandBlock,
        out: &DmaChannel<'a, SLOTS, BYTES>,
        inn: &DmaChannel<'a, SLOTS, BYTES>,
    ) -> Result<MscStep> {
        self.cmd = Command {
            tag: cbw.tag,
            data_len: cbw.data_len,
            dir_in: cbw.dir_in,
            ..Command::default()
        };
        if cbw.lun != 0 {
            return self.conclude(CswStatus::Failed, Sense::LUN_NOT_SUPPORTED, inn);
        }

        match cbw.opcode() {
            opcode::TEST_UNIT_READY => {
                if self.device.is_ready() {
                    self.send_status(inn)
                } else {
                    self.conclude(CswStatus::Failed, Sense::NOT_READY, inn)
                }
            }
            opcode::REQUEST_SENSE => {
                let mut data = [0u8; SENSE_LEN];
                data[0] = 0x70;
                data[2] = self.sense.key;
                data[7] = (SENSE_LEN - 8) as u8;
                data[12] = self.sense.asc;
                data[13] = self.sense.ascq;
                self.sense = Sense::NONE;
                self.reply(&data, inn)
            }
            opcode::INQUIRY => {
                let mut data = [0u8; INQUIRY_LEN];
                data[1] = 0x80;
                data[2] = 0x04;
                data[3] = 0x02;
                data[4] = (INQUIRY_LEN - 5) as u8;
                data[8..16].copy_from_slice(&self.vendor);
                data[16..32].copy_from_slice(&self.product);
                data[32..36].copy_from_slice(&self.revision);
                self.reply(&data, inn)
            }
            opcode::READ_CAPACITY_10 => {
                if !self.device.is_ready() {
                    return self.conclude(CswStatus::Failed, Sense::NOT_READY, inn);
                }
                let mut data = [0u8; 8];
                let last = self.device.block_count().saturating_sub(1);
                data[..4].copy_from_slice(&last.to_be_bytes());
                data[4..].copy_from_slice(&self.device.block_size().to_be_bytes());
                self.reply(&data, inn)
            }
            opcode::READ_10 | opcode::WRITE_10 => self.start_blocks(cbw, out, inn),
            _ => {
                #[cfg(feature = "log")]
                log::debug!("msc: unsupported opcode {:#04x}", cbw.opcode());
                self.conclude(CswStatus::Failed, Sense::INVALID_COMMAND, inn)
            }
        }
    }

    /// Send a short, fixed data-in reply, truncated to what the host asked for.
    fn reply<const SLOTS: usize, const BYTES: usize>(
        &mut self,
        data: &[u8],
        inn: &DmaChannel<'a, SLOTS, BYTES>,
    ) -> Result<MscStep> {
        if !self.cmd.dir_in && self.cmd.data_len > 0 {
            return self.conclude(CswStatus::PhaseError, Sense::NONE, inn);
        }
        let io = self.io.as_deref_mut().ok_or(DmaError::InvalidSequence)?;
        let n = data.len().min(self.cmd.data_len as usize).min(io.len());
        if n == 0 {
            return self.send_status(inn);
        }
        io[..n].copy_from_slice(&data[..n]);
        self.cmd.in_flight = n;
        self.send(inn, n)?;
        self.phase = MscPhase::DataIn;
        Ok(MscStep::Advanced)
    }

    fn start_blocks<const SLOTS: usize, const BYTES: usize>(
        &mut self,
        cbw: &CommandBlock,
        out: &DmaChannel<'a, SLOTS, BYTES>,
        inn: &DmaChannel<'a, SLOTS, BYTES>,
    ) -> Result<MscStep> {
        let is_read = cbw.opcode() == opcode::READ_10;
        let lba = cbw.be_u32(2);
        let blocks = u32::from(cbw.be_u16(7));
        let bytes = u64::from(blocks) * u64::from(self.device.block_size());

        if u64::from(cbw.data_len) != bytes || (bytes > 0 && cbw.dir_in != is_read) {
            #[cfg(feature = "log")]
            log::debug!("msc: phase error, host expects {} bytes, command moves {}", cbw.data_len, bytes);
            return self.conclude(CswStatus::PhaseError, Sense::NONE, inn);
        }
        if !self.device.is_ready() {
            return self.conclude(CswStatus::Failed, Sense::NOT_READY, inn);
        }
        if u64::from(lba) + u64::from(blocks) > u64::from(self.device.block_count()) {
            return self.conclude(CswStatus::Failed, Sense::LBA_OUT_OF_RANGE, inn);
        }
        if blocks == 0 {
            return self.send_status(inn);
        }

        self.cmd.lba = lba;
        self.cmd.blocks_left = blocks;
        if is_read {
            self.read_chunk(inn)
        } else {
            self.receive_chunk(out)
        }
    }

    fn chunk(&self) -> (u32, usize) {
        let blocks = self.cmd.blocks_left.min(self.chunk_blocks);
        (blocks, blocks as usize * self.device.block_size() as usize)
    }

    fn read_chunk<const SLOTS: usize, const BYTES: usize>(
        &mut self,
        inn: &DmaChannel<'a, SLOTS, BYTES>,
    ) -> Result<MscStep> {
        let (blocks, len) = self.chunk();
        let io = self.io.as_deref_mut().ok_or(DmaError::InvalidSequence)?;
        if self.device.read_blocks(self.cmd.lba, &mut io[..len]).is_err() {
            return self.conclude(CswStatus::Failed, Sense::READ_ERROR, inn);
        }
        self.cmd.lba += blocks;
        self.cmd.blocks_left -= blocks;
        self.cmd.in_flight = len;
        self.send(inn, len)?;
        self.phase = MscPhase::DataIn;
        Ok(MscStep::Advanced)
    }

    fn receive_chunk<const SLOTS: usize, const BYTES: usize>(
        &mut self,
        out: &DmaChannel<'a, SLOTS, BYTES>,
    ) -> Result<MscStep> {
        let (_, len) = self.chunk();
        let io = self.io.take().ok_or(DmaError::InvalidSequence)?;
        if let Err(rejected) = out.setup_recv_prefix(io, len) {
            self.io = Some(rejected.buffer);
            return Err(rejected.error);
        }
        self.cmd.in_flight = len;
        self.phase = MscPhase::DataOut;
        Ok(MscStep::Advanced)
    }

    fn write_received<const SLOTS: usize, const BYTES: usize>(
        &mut self,
        count: usize,
        out: &DmaChannel<'a, SLOTS, BYTES>,
        inn: &DmaChannel<'a, SLOTS, BYTES>,
    ) -> Result<MscStep> {
        let len = self.cmd.in_flight;
        self.cmd.done += count as u32;
        if count != len {
            return self.conclude(CswStatus::PhaseError, Sense::NONE, inn);
        }

        let blocks = (len / self.device.block_size() as usize) as u32;
        let io = self.io.as_deref().ok_or(DmaError::InvalidSequence)?;
        if self.device.write_blocks(self.cmd.lba, &io[..len]).is_err() {
            return self.conclude(CswStatus::Failed, Sense::WRITE_ERROR, inn);
        }
        self.cmd.lba += blocks;
        self.cmd.blocks_left -= blocks;
        if self.cmd.blocks_left > 0 {
            self.receive_chunk(out)
        } else {
            self.send_status(inn)
        }
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Record the outcome. When the host still expects data, the data pipe is
    /// stalled first and the status follows once the halt is cleared.
    fn conclude<const SLOTS: usize, const BYTES: usize>(
        &mut self,
        status: CswStatus,
        sense: Sense,
        inn: &DmaChannel<'a, SLOTS, BYTES>,
    ) -> Result<MscStep> {
        self.cmd.status = status;
        if sense != Sense::NONE {
            self.sense = sense;
        }
        if self.cmd.residue() == 0 {
            return self.send_status(inn);
        }
        self.phase = MscPhase::Status;
        Ok(MscStep::Stall(if self.cmd.dir_in {
            MscStall::DataIn
        } else {
            MscStall::DataOut
        }))
    }

    fn send_status<const SLOTS: usize, const BYTES: usize>(
        &mut self,
        inn: &DmaChannel<'a, SLOTS, BYTES>,
    ) -> Result<MscStep> {
        let io = self.io.as_deref_mut().ok_or(DmaError::InvalidSequence)?;
        io[0..4].copy_from_slice(&CSW_SIGNATURE.to_le_bytes());
        io[4..8].copy_from_slice(&self.cmd.tag.to_le_bytes());
        io[8..12].copy_from_slice(&self.cmd.residue().to_le_bytes());
        io[12] = self.cmd.status as u8;
        self.send(inn, CSW_LEN)?;
        self.phase = MscPhase::Csw;
        Ok(MscStep::Advanced)
    }

    // =========================================================================
    // Staging buffer
    // =========================================================================

    fn send<const SLOTS: usize, const BYTES: usize>(
        &mut self,
        inn: &DmaChannel<'a, SLOTS, BYTES>,
        len: usize,
    ) -> Result<()> {
        let io = self.io.take().ok_or(DmaError::InvalidSequence)?;
        inn.setup_send_buffer(io, len).map_err(|rejected| {
            let error = rejected.error;
            self.io = Some(rejected.buffer);
            error
        })
    }

    fn reclaim<const SLOTS: usize, const BYTES: usize>(
        &mut self,
        channel: &DmaChannel<'a, SLOTS, BYTES>,
    ) -> Result<()> {
        self.io = Some(channel.take_override_buffer().ok_or(DmaError::InvalidSequence)?);
        Ok(())
    }
}
