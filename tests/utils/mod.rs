//! Useful library code for tests

use std::collections::{HashMap, VecDeque};

use sdmmc_server::sdcard::proto::{crc7, R1_ILLEGAL_COMMAND};
use sdmmc_server::{
    ClockSpeed, Device, Request, Server, Transaction, Transport, TransportError, BLOCK_LEN,
};

/// Blocks on every simulated card.
pub const CARD_BLOCKS: u32 = 8192;

/// The last valid sector on every simulated card.
pub const LAST_SECTOR: u32 = CARD_BLOCKS - 1;

/// What sort of card is in the slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardKind {
    /// Nothing answers
    Absent,
    /// MultiMediaCard: no SEND_IF_COND, no application commands
    Mmc,
    /// SD v1.x: no SEND_IF_COND
    SdV1,
    /// SD v2, standard capacity, byte addressed
    SdV2,
    /// SD v2, high capacity, block addressed
    Sdhc,
}

/// What the card is expecting on MOSI.
#[derive(Debug)]
enum Mode {
    Command,
    WriteToken { sector: u32 },
    WriteData { sector: u32, buf: Vec<u8> },
}

/// A byte-level SD card in SPI mode.
///
/// Time only moves when the driver looks at it: every query of the
/// countdown timer counts as one millisecond.
pub struct SimCard {
    kind: CardKind,
    blocks: HashMap<u32, [u8; BLOCK_LEN]>,
    selected: bool,
    frame: Vec<u8>,
    tx: VecDeque<u8>,
    mode: Mode,
    idle: bool,
    app_cmd: bool,
    ready_countdown: u32,
    busy_until: Option<u32>,
    now_ms: u32,
    deadline: Option<u32>,
    /// How many SEND_OP_COND polls the card answers with "idle" after a reset
    pub ready_after: u32,
    /// Reply to every data block with a CRC error token
    pub reject_writes: bool,
    /// How long the card stays busy after a write; `None` is forever
    pub busy_ms: Option<u32>,
    /// Refuse SEND_CSD
    pub refuse_csd: bool,
    /// Accept READ_SINGLE_BLOCK but never send the data
    pub withhold_token: bool,
    /// How many SEND_IF_COND replies get a wrong check pattern
    pub bad_if_cond_echoes: u32,
    /// How many CRC_ON_OFF commands are refused
    pub crc_off_refusals: u32,
    /// How many SET_BLOCKLEN commands are refused
    pub blocklen_refusals: u32,
    /// Return `TransportError::Spi` from this many byte exchanges on
    pub fail_after: Option<usize>,
    /// Every call made through `Transport`
    pub calls: usize,
    /// Byte exchanges
    pub exchanges: usize,
    /// Bytes clocked while the card was holding the line busy
    pub busy_polls: usize,
    /// Every command received, as `(application command?, index, argument)`
    pub commands: Vec<(bool, u8, u32)>,
    /// Each switch to the slow clock
    pub low_clock_count: usize,
    /// The clock rate last asked for
    pub speed: ClockSpeed,
}

impl SimCard {
    /// A card of the given sort, filled with [`pattern`] blocks.
    pub fn new(kind: CardKind) -> SimCard {
        SimCard {
            kind,
            blocks: HashMap::new(),
            selected: false,
            frame: Vec::new(),
            tx: VecDeque::new(),
            mode: Mode::Command,
            idle: false,
            app_cmd: false,
            ready_countdown: 0,
            busy_until: None,
            now_ms: 0,
            deadline: None,
            ready_after: 2,
            reject_writes: false,
            busy_ms: Some(5),
            refuse_csd: false,
            withhold_token: false,
            bad_if_cond_echoes: 0,
            crc_off_refusals: 0,
            blocklen_refusals: 0,
            fail_after: None,
            calls: 0,
            exchanges: 0,
            busy_polls: 0,
            commands: Vec::new(),
            low_clock_count: 0,
            speed: ClockSpeed::High,
        }
    }

    /// The current simulated time.
    pub fn now_ms(&self) -> u32 {
        self.now_ms
    }

    /// The contents of a sector.
    pub fn block(&self, sector: u32) -> [u8; BLOCK_LEN] {
        self.blocks
            .get(&sector)
            .copied()
            .unwrap_or_else(|| pattern(sector))
    }

    /// Is chip select asserted?
    pub fn is_selected(&self) -> bool {
        self.selected
    }

    /// Was this command ever received?
    pub fn saw(&self, app: bool, index: u8) -> bool {
        self.commands.iter().any(|c| c.0 == app && c.1 == index)
    }

    fn is_busy(&self) -> bool {
        match (self.mode_is_command(), self.busy_until) {
            (true, Some(until)) => self.now_ms < until,
            _ => false,
        }
    }

    fn mode_is_command(&self) -> bool {
        matches!(self.mode, Mode::Command)
    }

    fn is_sd(&self) -> bool {
        matches!(self.kind, CardKind::SdV1 | CardKind::SdV2 | CardKind::Sdhc)
    }

    fn receive(&mut self, byte: u8) {
        match &mut self.mode {
            Mode::Command => {
                if self.frame.is_empty() && (byte & 0xC0) != 0x40 {
                    return;
                }
                self.frame.push(byte);
                if self.frame.len() == 6 {
                    let frame = std::mem::take(&mut self.frame);
                    self.execute(&frame);
                }
            }
            Mode::WriteToken { sector } => {
                if byte == 0xFE {
                    self.mode = Mode::WriteData {
                        sector: *sector,
                        buf: Vec::new(),
                    };
                }
            }
            Mode::WriteData { sector, buf } => {
                buf.push(byte);
                if buf.len() == BLOCK_LEN + 2 {
                    let sector = *sector;
                    let mut block = [0u8; BLOCK_LEN];
                    block.copy_from_slice(&buf[..BLOCK_LEN]);
                    self.mode = Mode::Command;
                    if self.reject_writes {
                        // CRC error
                        self.tx.push_back(0xEB);
                    } else {
                        self.blocks.insert(sector, block);
                        self.tx.push_back(0xE5);
                        self.busy_until = Some(match self.busy_ms {
                            Some(ms) => self.now_ms + ms,
                            None => u32::MAX,
                        });
                    }
                }
            }
        }
    }

    /// Turn an address argument into a sector, if it's a valid one.
    fn sector_of(&self, arg: u32) -> Option<u32> {
        let sector = if self.kind == CardKind::Sdhc {
            arg
        } else if arg % BLOCK_LEN as u32 == 0 {
            arg / BLOCK_LEN as u32
        } else {
            return None;
        };
        (sector < CARD_BLOCKS).then_some(sector)
    }

    fn reply(&mut self, bytes: &[u8]) {
        // One byte of N_CR first.
        self.tx.push_back(0xFF);
        self.tx.extend(bytes);
    }

    fn execute(&mut self, frame: &[u8]) {
        let index = frame[0] & 0x3F;
        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let app = std::mem::take(&mut self.app_cmd);
        self.commands.push((app, index, arg));
        if self.kind == CardKind::Absent {
            return;
        }
        if matches!(index, 0 | 8) && crc7(&frame[0..5]) != frame[5] {
            // Communication CRC error
            self.reply(&[0x09]);
            return;
        }
        let r1 = if self.idle { 0x01 } else { 0x00 };
        match (app, index) {
            (_, 0) => {
                self.idle = true;
                self.ready_countdown = self.ready_after;
                self.reply(&[0x01]);
            }
            (false, 8) if matches!(self.kind, CardKind::SdV2 | CardKind::Sdhc) => {
                let pattern = if take_one(&mut self.bad_if_cond_echoes) {
                    !arg as u8
                } else {
                    arg as u8
                };
                self.reply(&[r1, 0x00, 0x00, (arg >> 8) as u8 & 0x0F, pattern]);
            }
            (false, 55) if self.is_sd() => {
                self.app_cmd = true;
                self.reply(&[r1]);
            }
            (true, 41) => {
                let r1 = self.poll_ready();
                self.reply(&[r1]);
            }
            (false, 1) if self.kind == CardKind::Mmc => {
                let r1 = self.poll_ready();
                self.reply(&[r1]);
            }
            (false, 58) => {
                let mut ocr = 0x00FF_8000u32;
                if !self.idle {
                    ocr |= 0x8000_0000;
                    if self.kind == CardKind::Sdhc {
                        ocr |= 0x4000_0000;
                    }
                }
                let [a, b, c, d] = ocr.to_be_bytes();
                self.reply(&[r1, a, b, c, d]);
            }
            (false, 59) if take_one(&mut self.crc_off_refusals) => {
                self.reply(&[r1 | R1_ILLEGAL_COMMAND])
            }
            (false, 59) => self.reply(&[r1]),
            (false, 16) if take_one(&mut self.blocklen_refusals) => self.reply(&[r1 | 0x40]),
            (false, 16) => self.reply(&[if arg == BLOCK_LEN as u32 { r1 } else { 0x40 }]),
            (false, 9) if self.refuse_csd => self.reply(&[R1_ILLEGAL_COMMAND]),
            (false, 9) => {
                let csd = self.csd();
                self.reply(&[0x00, 0xFF, 0xFE]);
                self.tx.extend(csd);
                self.tx.extend([0x12, 0x34]);
            }
            (false, 13) => self.reply(&[r1, 0x00]),
            (false, 17) => match self.sector_of(arg) {
                Some(_) if self.withhold_token => self.reply(&[0x00]),
                Some(sector) => {
                    let block = self.block(sector);
                    self.reply(&[0x00, 0xFF, 0xFF, 0xFF, 0xFE]);
                    self.tx.extend(block);
                    self.tx.extend([0xAB, 0xCD]);
                }
                // Address error
                None => self.reply(&[0x20]),
            },
            (false, 24) => match self.sector_of(arg) {
                Some(sector) => {
                    self.reply(&[0x00]);
                    self.mode = Mode::WriteToken { sector };
                }
                None => self.reply(&[0x20]),
            },
            _ => self.reply(&[r1 | R1_ILLEGAL_COMMAND]),
        }
    }

    fn poll_ready(&mut self) -> u8 {
        if self.ready_countdown == 0 {
            self.idle = false;
            0x00
        } else {
            self.ready_countdown -= 1;
            0x01
        }
    }

    /// A CSD sized for [`CARD_BLOCKS`].
    fn csd(&self) -> [u8; 16] {
        let mut csd = [0u8; 16];
        if self.kind == CardKind::Sdhc {
            // (C_SIZE + 1) * 1024 blocks
            let c_size = CARD_BLOCKS / 1024 - 1;
            csd[0] = 0x40;
            csd[5] = 0x09;
            csd[7] = ((c_size >> 16) & 0x3F) as u8;
            csd[8] = (c_size >> 8) as u8;
            csd[9] = c_size as u8;
        } else {
            // READ_BL_LEN 9, C_SIZE_MULT 7: (C_SIZE + 1) * 512 blocks
            let c_size = CARD_BLOCKS / 512 - 1;
            csd[5] = 0x09;
            csd[6] = ((c_size >> 10) & 0x03) as u8;
            csd[7] = (c_size >> 2) as u8;
            csd[8] = ((c_size & 0x03) as u8) << 6;
            csd[9] = 0x03;
            csd[10] = 0x80;
        }
        csd
    }
}

impl Transport for SimCard {
    fn exchange_byte(&mut self, out: u8) -> Result<u8, TransportError> {
        self.calls += 1;
        self.exchanges += 1;
        if let Some(limit) = self.fail_after {
            if self.exchanges > limit {
                return Err(TransportError::Spi);
            }
        }
        if !self.selected {
            return Ok(0xFF);
        }
        let reply = if let Some(b) = self.tx.pop_front() {
            b
        } else if self.is_busy() {
            self.busy_polls += 1;
            0x00
        } else {
            0xFF
        };
        self.receive(out);
        Ok(reply)
    }

    fn assert_select(&mut self) -> Result<(), TransportError> {
        self.calls += 1;
        self.selected = true;
        Ok(())
    }

    fn deassert_select(&mut self) -> Result<(), TransportError> {
        self.calls += 1;
        self.selected = false;
        self.frame.clear();
        self.tx.clear();
        self.mode = Mode::Command;
        Ok(())
    }

    fn set_clock(&mut self, speed: ClockSpeed) -> Result<(), TransportError> {
        self.calls += 1;
        if speed == ClockSpeed::Low {
            self.low_clock_count += 1;
        }
        self.speed = speed;
        Ok(())
    }

    fn start_timer(&mut self, ms: u32) {
        self.calls += 1;
        self.deadline = Some(self.now_ms + ms);
    }

    fn timer_running(&mut self) -> bool {
        self.calls += 1;
        self.now_ms += 1;
        match self.deadline {
            Some(deadline) if self.now_ms < deadline => true,
            _ => {
                self.deadline = None;
                false
            }
        }
    }

    fn stop_timer(&mut self) {
        self.calls += 1;
        self.deadline = None;
    }
}

/// Count down one injected fault, if any are left.
fn take_one(faults: &mut u32) -> bool {
    if *faults == 0 {
        false
    } else {
        *faults -= 1;
        true
    }
}

/// The initial contents of a sector.
pub fn pattern(sector: u32) -> [u8; BLOCK_LEN] {
    let mut block = [0u8; BLOCK_LEN];
    for (i, b) in block.iter_mut().enumerate() {
        *b = (i as u32 ^ sector.wrapping_mul(31)) as u8;
    }
    block
}

/// Send log output to the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A server for a fresh card of the given sort, and an idle transaction
/// with a new device in it.
pub fn make(kind: CardKind) -> (Server<SimCard>, Transaction) {
    init_logging();
    let mut trans = Transaction::new();
    trans.device = Some(Device::new());
    (Server::new(SimCard::new(kind)), trans)
}

/// As [`make`], with the card already negotiated.
pub fn make_mounted(kind: CardKind) -> (Server<SimCard>, Transaction) {
    let (mut server, mut trans) = make(kind);
    trans.submit(Request::Init).unwrap();
    server.run(&mut trans).unwrap();
    (server, trans)
}

/// How many transport calls the card has seen.
pub fn calls(server: &mut Server<SimCard>) -> usize {
    server.transport(|card| card.calls)
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
