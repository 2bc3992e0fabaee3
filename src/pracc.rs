//! EJTAG processor-access executor. A halted MIPS32 core fetches
//! instructions and performs loads and stores against the debug memory
//! segment; this module services each such bus cycle over the EJTAG link,
//! running short fixed stub programs which move memory and register contents
//! between the target and the caller's parameter arenas.
//!
//! The stub arrays are the wire contract: their instruction order exploits
//! the branch delay slot and their branch offsets count instructions, so
//! they must not be reordered.

use crate::ejtag::{
    self, ctrl, EjtagInst, EjtagLink, PRACC_PARAM_IN, PRACC_PARAM_OUT, PRACC_STACK, PRACC_TEXT,
};
use crate::mips32::{
    addi, b, beq, bne, lbu, lhu, lower16, lui, lw, mfc0, mfhi, mflo, mtc0, mthi, mtlo, neg16, ori,
    sb, sh, sw, upper16, DRET, NOP, NUM_CORE_REGS,
};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("EJTAG error")]
    Ejtag(#[from] ejtag::Error),
    #[error("timed out waiting for a processor access.")]
    PraccTimeout,
    #[error("processor accessed unexpected address {0:#010x}.")]
    UnexpectedAddress(u32),
    #[error("debug stack underflow.")]
    StackUnderflow,
    #[error("debug stack overflow.")]
    StackOverflow,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

const PRACC_TIMEOUT: Duration = Duration::from_secs(1);

/// Depth of the software debug stack at `PRACC_STACK`.
const STACK_DEPTH: usize = 32;

/// Elements moved per stub run for word-sized transfers.
const BLOCK_WORDS: usize = 0x400;

/// Poll the Control register until the core posts an access.
///
/// Returns the last Control sample, which carries PRNW. Gives up after one
/// second; a silent core means it is not executing from the debug segment.
pub(crate) fn wait_pracc<L: EjtagLink>(link: &mut L) -> Result<u32> {
    link.set_instr(EjtagInst::Control)?;
    link.flush()?;
    let start = Instant::now();
    loop {
        let sample = link.drscan32(link.control_base())?;
        if sample & ctrl::PRACC != 0 {
            return Ok(sample);
        }
        if start.elapsed() > PRACC_TIMEOUT {
            log::debug!("no memory access in progress");
            return Err(Error::PraccTimeout);
        }
    }
}

/// Serve the pending access: hand the core a word over the Data register
/// and clear PRACC to let it continue.
pub(crate) fn finish_read<L: EjtagLink>(link: &mut L, data: u32) -> Result<()> {
    link.set_instr(EjtagInst::Data)?;
    link.drscan32_out(data)?;
    link.set_instr(EjtagInst::Control)?;
    link.drscan32_out(link.control_base() & !ctrl::PRACC)?;
    link.flush()?;
    Ok(())
}

/// One stub execution: parameter arenas, code, and the debug stack.
struct Context<'a> {
    param_in: &'a mut [u32],
    param_out: &'a mut [u32],
    code: &'a [u32],
    stack: [u32; STACK_DEPTH],
    stack_offset: usize,
}

impl<'a> Context<'a> {
    fn exec_read<L: EjtagLink>(&mut self, link: &mut L, address: u32) -> Result<()> {
        let in_end = PRACC_PARAM_IN + 4 * self.param_in.len() as u32;
        let out_end = PRACC_PARAM_OUT + 4 * self.param_out.len() as u32;
        let text_end = PRACC_TEXT + 4 * self.code.len() as u32;

        let data = if (PRACC_PARAM_IN..in_end).contains(&address) {
            self.param_in[((address - PRACC_PARAM_IN) / 4) as usize]
        } else if (PRACC_PARAM_OUT..out_end).contains(&address) {
            // Re-reads of already captured output slots are allowed.
            self.param_out[((address - PRACC_PARAM_OUT) / 4) as usize]
        } else if (PRACC_TEXT..text_end).contains(&address) {
            self.code[((address - PRACC_TEXT) / 4) as usize]
        } else if address == PRACC_STACK {
            self.stack_offset = self.stack_offset.checked_sub(1).ok_or(Error::StackUnderflow)?;
            self.stack[self.stack_offset]
        } else {
            log::error!("error reading unexpected address {:#010x}", address);
            return Err(Error::UnexpectedAddress(address));
        };

        finish_read(link, data)
    }

    fn exec_write<L: EjtagLink>(&mut self, link: &mut L, address: u32) -> Result<()> {
        link.set_instr(EjtagInst::Data)?;
        let data = link.drscan32(0)?;
        link.set_instr(EjtagInst::Control)?;
        link.drscan32_out(link.control_base() & !ctrl::PRACC)?;
        link.flush()?;

        let in_end = PRACC_PARAM_IN + 4 * self.param_in.len() as u32;
        let out_end = PRACC_PARAM_OUT + 4 * self.param_out.len() as u32;

        if (PRACC_PARAM_IN..in_end).contains(&address) {
            self.param_in[((address - PRACC_PARAM_IN) / 4) as usize] = data;
        } else if (PRACC_PARAM_OUT..out_end).contains(&address) {
            self.param_out[((address - PRACC_PARAM_OUT) / 4) as usize] = data;
        } else if address == PRACC_STACK {
            if self.stack_offset == STACK_DEPTH {
                return Err(Error::StackOverflow);
            }
            self.stack[self.stack_offset] = data;
            self.stack_offset += 1;
        } else {
            log::error!("error writing unexpected address {:#010x}", address);
            return Err(Error::UnexpectedAddress(address));
        }
        Ok(())
    }
}

/// Run a stub on the target by serving its fetches, loads and stores.
///
/// The sequence ends when the core fetches the start of the stub text a
/// second time, or after a single served access when `cycle` is false.
/// The debug stack must balance across the run; an imbalance at exit is
/// reported but not fatal.
pub fn execute<L: EjtagLink>(
    link: &mut L,
    code: &[u32],
    param_in: &mut [u32],
    param_out: &mut [u32],
    cycle: bool,
) -> Result<()> {
    let mut ctx = Context {
        param_in,
        param_out,
        code,
        stack: [0; STACK_DEPTH],
        stack_offset: 0,
    };
    let mut pass = 0;

    loop {
        let sample = wait_pracc(link)?;

        link.set_instr(EjtagInst::Address)?;
        let address = link.drscan32(0)?;

        if sample & ctrl::PRNW != 0 {
            ctx.exec_write(link, address)?;
        } else {
            // The first access is always the fetch at the debug vector; the
            // second fetch of the vector means the stub has looped back and
            // is done.
            if address == PRACC_TEXT {
                pass += 1;
                if pass > 1 {
                    break;
                }
            }
            ctx.exec_read(link, address)?;
        }

        if !cycle {
            break;
        }
    }

    if ctx.stack_offset != 0 {
        log::debug!("pracc stack not zero at exit ({})", ctx.stack_offset);
    }
    Ok(())
}

/// Let the core leave debug mode by serving it a single DRET fetch.
pub fn exit_debug<L: EjtagLink>(link: &mut L) -> Result<()> {
    log::debug!("serving DRET to leave debug mode");
    let code = [DRET];
    execute(link, &code, &mut [], &mut [], false)
}

/// Read one word from target memory.
pub fn read_u32<L: EjtagLink>(link: &mut L, addr: u32) -> Result<u32> {
    static CODE: [u32; 10] = [
        /* start: */
        mtc0(15, 31, 0),                                // move $15 to COP0 DeSave
        lui(15, upper16(PRACC_STACK)),                  // $15 = PRACC_STACK
        ori(15, 15, lower16(PRACC_STACK)),
        sw(8, 0, 15),                                   // sw $8,($15)
        lw(8, neg16(PRACC_STACK - PRACC_PARAM_IN), 15), // $8 = param_in[0] = address
        lw(8, 0, 8),                                    // lw $8,0($8)
        sw(8, neg16(PRACC_STACK - PRACC_PARAM_OUT), 15), // param_out[0] = $8
        lw(8, 0, 15),                                   // lw $8,($15)
        b(-9),                                          // b start
        mfc0(15, 31, 0),                                // move COP0 DeSave to $15
    ];

    let mut param_in = [addr];
    let mut param_out = [0u32];
    execute(link, &CODE, &mut param_in, &mut param_out, true)?;
    Ok(param_out[0])
}

/// Read a block of words from target memory, chunked at 0x400 words.
pub fn read_mem32<L: EjtagLink>(link: &mut L, addr: u32, buf: &mut [u32]) -> Result<()> {
    static CODE: [u32; 28] = [
        /* start: */
        mtc0(15, 31, 0),                   // move $15 to COP0 DeSave
        lui(15, upper16(PRACC_STACK)),     // $15 = PRACC_STACK
        ori(15, 15, lower16(PRACC_STACK)),
        sw(8, 0, 15),                      // sw $8,($15)
        sw(9, 0, 15),                      // sw $9,($15)
        sw(10, 0, 15),                     // sw $10,($15)
        sw(11, 0, 15),                     // sw $11,($15)
        lui(8, upper16(PRACC_PARAM_IN)),   // $8 = PRACC_PARAM_IN
        ori(8, 8, lower16(PRACC_PARAM_IN)),
        lw(9, 0, 8),                       // $9 = read addr
        lw(10, 4, 8),                      // $10 = read count
        lui(11, upper16(PRACC_PARAM_OUT)), // $11 = PRACC_PARAM_OUT
        ori(11, 11, lower16(PRACC_PARAM_OUT)),
        /* loop: */
        beq(0, 10, 8),                     // beq $0, $10, end
        NOP,
        lw(8, 0, 9),                       // lw $8,0($9)
        sw(8, 0, 11),                      // sw $8,0($11)
        addi(10, 10, -1),                  // $10--
        addi(9, 9, 4),                     // $9 += 4
        addi(11, 11, 4),                   // $11 += 4
        b(-8),                             // b loop
        NOP,
        /* end: */
        lw(11, 0, 15),                     // lw $11,($15)
        lw(10, 0, 15),                     // lw $10,($15)
        lw(9, 0, 15),                      // lw $9,($15)
        lw(8, 0, 15),                      // lw $8,($15)
        b(-27),                            // b start
        mfc0(15, 31, 0),                   // move COP0 DeSave to $15
    ];

    let mut addr = addr;
    let mut done = 0;
    while done < buf.len() {
        let blocksize = (buf.len() - done).min(BLOCK_WORDS);
        let mut param_in = [addr, blocksize as u32];
        execute(
            link,
            &CODE,
            &mut param_in,
            &mut buf[done..done + blocksize],
            true,
        )?;
        addr = addr.wrapping_add(4 * blocksize as u32);
        done += blocksize;
    }
    Ok(())
}

/// Read a block of halfwords from target memory.
///
/// The stub moves the whole request in one shot; keep counts at or below
/// 0x400 elements.
pub fn read_mem16<L: EjtagLink>(link: &mut L, addr: u32, buf: &mut [u16]) -> Result<()> {
    static CODE: [u32; 28] = [
        /* start: */
        mtc0(15, 31, 0),                   // move $15 to COP0 DeSave
        lui(15, upper16(PRACC_STACK)),     // $15 = PRACC_STACK
        ori(15, 15, lower16(PRACC_STACK)),
        sw(8, 0, 15),                      // sw $8,($15)
        sw(9, 0, 15),                      // sw $9,($15)
        sw(10, 0, 15),                     // sw $10,($15)
        sw(11, 0, 15),                     // sw $11,($15)
        lui(8, upper16(PRACC_PARAM_IN)),   // $8 = PRACC_PARAM_IN
        ori(8, 8, lower16(PRACC_PARAM_IN)),
        lw(9, 0, 8),                       // $9 = read addr
        lw(10, 4, 8),                      // $10 = read count
        lui(11, upper16(PRACC_PARAM_OUT)), // $11 = PRACC_PARAM_OUT
        ori(11, 11, lower16(PRACC_PARAM_OUT)),
        /* loop: */
        beq(0, 10, 8),                     // beq $0, $10, end
        NOP,
        lhu(8, 0, 9),                      // lhu $8,0($9)
        sw(8, 0, 11),                      // sw $8,0($11)
        addi(10, 10, -1),                  // $10--
        addi(9, 9, 2),                     // $9 += 2
        addi(11, 11, 4),                   // $11 += 4
        b(-8),                             // b loop
        NOP,
        /* end: */
        lw(11, 0, 15),                     // lw $11,($15)
        lw(10, 0, 15),                     // lw $10,($15)
        lw(9, 0, 15),                      // lw $9,($15)
        lw(8, 0, 15),                      // lw $8,($15)
        b(-27),                            // b start
        mfc0(15, 31, 0),                   // move COP0 DeSave to $15
    ];

    let count = buf.len();
    let blocksize = count.min(BLOCK_WORDS);
    if count > BLOCK_WORDS {
        log::warn!(
            "read_mem16 of {} elements truncated to a single {}-element shot",
            count,
            blocksize
        );
    }

    let mut param_out = vec![0u32; count];
    let mut param_in = [addr, blocksize as u32];
    execute(link, &CODE, &mut param_in, &mut param_out, true)?;

    for (dst, src) in buf.iter_mut().zip(&param_out) {
        *dst = *src as u16;
    }
    Ok(())
}

/// Read a block of bytes from target memory.
///
/// Same single-shot behavior as [`read_mem16`].
pub fn read_mem8<L: EjtagLink>(link: &mut L, addr: u32, buf: &mut [u8]) -> Result<()> {
    static CODE: [u32; 28] = [
        /* start: */
        mtc0(15, 31, 0),                   // move $15 to COP0 DeSave
        lui(15, upper16(PRACC_STACK)),     // $15 = PRACC_STACK
        ori(15, 15, lower16(PRACC_STACK)),
        sw(8, 0, 15),                      // sw $8,($15)
        sw(9, 0, 15),                      // sw $9,($15)
        sw(10, 0, 15),                     // sw $10,($15)
        sw(11, 0, 15),                     // sw $11,($15)
        lui(8, upper16(PRACC_PARAM_IN)),   // $8 = PRACC_PARAM_IN
        ori(8, 8, lower16(PRACC_PARAM_IN)),
        lw(9, 0, 8),                       // $9 = read addr
        lw(10, 4, 8),                      // $10 = read count
        lui(11, upper16(PRACC_PARAM_OUT)), // $11 = PRACC_PARAM_OUT
        ori(11, 11, lower16(PRACC_PARAM_OUT)),
        /* loop: */
        beq(0, 10, 8),                     // beq $0, $10, end
        NOP,
        lbu(8, 0, 9),                      // lbu $8,0($9)
        sw(8, 0, 11),                      // sw $8,0($11)
        addi(10, 10, -1),                  // $10--
        addi(9, 9, 1),                     // $9 += 1
        addi(11, 11, 4),                   // $11 += 4
        b(-8),                             // b loop
        NOP,
        /* end: */
        lw(11, 0, 15),                     // lw $11,($15)
        lw(10, 0, 15),                     // lw $10,($15)
        lw(9, 0, 15),                      // lw $9,($15)
        lw(8, 0, 15),                      // lw $8,($15)
        b(-27),                            // b start
        mfc0(15, 31, 0),                   // move COP0 DeSave to $15
    ];

    let count = buf.len();
    let blocksize = count.min(BLOCK_WORDS);
    if count > BLOCK_WORDS {
        log::warn!(
            "read_mem8 of {} elements truncated to a single {}-element shot",
            count,
            blocksize
        );
    }

    let mut param_out = vec![0u32; count];
    let mut param_in = [addr, blocksize as u32];
    execute(link, &CODE, &mut param_in, &mut param_out, true)?;

    for (dst, src) in buf.iter_mut().zip(&param_out) {
        *dst = *src as u8;
    }
    Ok(())
}

/// Write one word to target memory.
pub fn write_u32<L: EjtagLink>(link: &mut L, addr: u32, word: u32) -> Result<()> {
    static CODE: [u32; 12] = [
        /* start: */
        mtc0(15, 31, 0),                                // move $15 to COP0 DeSave
        lui(15, upper16(PRACC_STACK)),                  // $15 = PRACC_STACK
        ori(15, 15, lower16(PRACC_STACK)),
        sw(8, 0, 15),                                   // sw $8,($15)
        sw(9, 0, 15),                                   // sw $9,($15)
        lw(8, neg16(PRACC_STACK - PRACC_PARAM_IN - 4), 15), // $8 = param_in[1] = data
        lw(9, neg16(PRACC_STACK - PRACC_PARAM_IN), 15), // $9 = param_in[0] = address
        sw(8, 0, 9),                                    // sw $8,0($9)
        lw(9, 0, 15),                                   // lw $9,($15)
        lw(8, 0, 15),                                   // lw $8,($15)
        b(-11),                                         // b start
        mfc0(15, 31, 0),                                // move COP0 DeSave to $15
    ];

    let mut param_in = [addr, word];
    execute(link, &CODE, &mut param_in, &mut [], true)
}

/// Write a block of words to target memory, chunked at 0x400 words.
pub fn write_mem32<L: EjtagLink>(link: &mut L, addr: u32, data: &[u32]) -> Result<()> {
    static CODE: [u32; 22] = [
        /* start: */
        mtc0(15, 31, 0),                   // move $15 to COP0 DeSave
        lui(15, upper16(PRACC_STACK)),     // $15 = PRACC_STACK
        ori(15, 15, lower16(PRACC_STACK)),
        sw(8, 0, 15),                      // sw $8,($15)
        sw(9, 0, 15),                      // sw $9,($15)
        sw(10, 0, 15),                     // sw $10,($15)
        sw(11, 0, 15),                     // sw $11,($15)
        addi(8, 15, neg16(PRACC_STACK - PRACC_PARAM_IN)), // $8 = PRACC_PARAM_IN
        lw(9, 0, 8),                       // $9 = write addr
        lw(10, 4, 8),                      // $10 = end addr
        addi(8, 8, 8),                     // $8 += 8, beginning of data
        /* loop: */
        lw(11, 0, 8),                      // lw $11,0($8)
        sw(11, 0, 9),                      // sw $11,0($9)
        addi(9, 9, 4),                     // $9 += 4
        bne(10, 9, -4),                    // bne $10, $9, loop
        addi(8, 8, 4),                     // $8 += 4
        /* end: */
        lw(11, 0, 15),                     // lw $11,($15)
        lw(10, 0, 15),                     // lw $10,($15)
        lw(9, 0, 15),                      // lw $9,($15)
        lw(8, 0, 15),                      // lw $8,($15)
        b(-21),                            // b start
        mfc0(15, 31, 0),                   // move COP0 DeSave to $15
    ];

    let mut addr = addr;
    let mut done = 0;
    while done < data.len() {
        let blocksize = (data.len() - done).min(BLOCK_WORDS);
        let mut param_in = Vec::with_capacity(blocksize + 2);
        param_in.push(addr);
        param_in.push(addr.wrapping_add(4 * blocksize as u32)); // last address
        param_in.extend_from_slice(&data[done..done + blocksize]);
        execute(link, &CODE, &mut param_in, &mut [], true)?;
        addr = addr.wrapping_add(4 * blocksize as u32);
        done += blocksize;
    }
    Ok(())
}

/// Write a block of halfwords to target memory, one shot.
pub fn write_mem16<L: EjtagLink>(link: &mut L, addr: u32, data: &[u16]) -> Result<()> {
    static CODE: [u32; 27] = [
        /* start: */
        mtc0(15, 31, 0),                   // move $15 to COP0 DeSave
        lui(15, upper16(PRACC_STACK)),     // $15 = PRACC_STACK
        ori(15, 15, lower16(PRACC_STACK)),
        sw(8, 0, 15),                      // sw $8,($15)
        sw(9, 0, 15),                      // sw $9,($15)
        sw(10, 0, 15),                     // sw $10,($15)
        sw(11, 0, 15),                     // sw $11,($15)
        lui(8, upper16(PRACC_PARAM_IN)),   // $8 = PRACC_PARAM_IN
        ori(8, 8, lower16(PRACC_PARAM_IN)),
        lw(9, 0, 8),                       // $9 = write addr
        lw(10, 4, 8),                      // $10 = write count
        addi(8, 8, 8),                     // $8 += 8, beginning of data
        /* loop: */
        beq(0, 10, 8),                     // beq $0, $10, end
        NOP,
        lw(11, 0, 8),                      // lw $11,0($8)
        sh(11, 0, 9),                      // sh $11,0($9)
        addi(10, 10, -1),                  // $10--
        addi(9, 9, 2),                     // $9 += 2
        addi(8, 8, 4),                     // $8 += 4
        b(-8),                             // b loop
        NOP,
        /* end: */
        lw(11, 0, 15),                     // lw $11,($15)
        lw(10, 0, 15),                     // lw $10,($15)
        lw(9, 0, 15),                      // lw $9,($15)
        lw(8, 0, 15),                      // lw $8,($15)
        b(-26),                            // b start
        mfc0(15, 31, 0),                   // move COP0 DeSave to $15
    ];

    let mut param_in = Vec::with_capacity(data.len() + 2);
    param_in.push(addr);
    param_in.push(data.len() as u32);
    param_in.extend(data.iter().map(|&h| h as u32));
    execute(link, &CODE, &mut param_in, &mut [], true)
}

/// Write a block of bytes to target memory, one shot.
pub fn write_mem8<L: EjtagLink>(link: &mut L, addr: u32, data: &[u8]) -> Result<()> {
    static CODE: [u32; 27] = [
        /* start: */
        mtc0(15, 31, 0),                   // move $15 to COP0 DeSave
        lui(15, upper16(PRACC_STACK)),     // $15 = PRACC_STACK
        ori(15, 15, lower16(PRACC_STACK)),
        sw(8, 0, 15),                      // sw $8,($15)
        sw(9, 0, 15),                      // sw $9,($15)
        sw(10, 0, 15),                     // sw $10,($15)
        sw(11, 0, 15),                     // sw $11,($15)
        lui(8, upper16(PRACC_PARAM_IN)),   // $8 = PRACC_PARAM_IN
        ori(8, 8, lower16(PRACC_PARAM_IN)),
        lw(9, 0, 8),                       // $9 = write addr
        lw(10, 4, 8),                      // $10 = write count
        addi(8, 8, 8),                     // $8 += 8, beginning of data
        /* loop: */
        beq(0, 10, 8),                     // beq $0, $10, end
        NOP,
        lw(11, 0, 8),                      // lw $11,0($8)
        sb(11, 0, 9),                      // sb $11,0($9)
        addi(10, 10, -1),                  // $10--
        addi(9, 9, 1),                     // $9 += 1
        addi(8, 8, 4),                     // $8 += 4
        b(-8),                             // b loop
        NOP,
        /* end: */
        lw(11, 0, 15),                     // lw $11,($15)
        lw(10, 0, 15),                     // lw $10,($15)
        lw(9, 0, 15),                      // lw $9,($15)
        lw(8, 0, 15),                      // lw $8,($15)
        b(-26),                            // b start
        mfc0(15, 31, 0),                   // move COP0 DeSave to $15
    ];

    let mut param_in = Vec::with_capacity(data.len() + 2);
    param_in.push(addr);
    param_in.push(data.len() as u32);
    param_in.extend(data.iter().map(|&byte| byte as u32));
    execute(link, &CODE, &mut param_in, &mut [], true)
}

/// Capture the full register frame: GPR0..31, Status, LO, HI, BadVAddr,
/// Cause, DEPC.
pub fn read_regs<L: EjtagLink>(link: &mut L) -> Result<[u32; NUM_CORE_REGS]> {
    static CODE: [u32; 59] = [
        /* start: */
        mtc0(2, 31, 0),                    // move $2 to COP0 DeSave
        lui(2, upper16(PRACC_PARAM_OUT)),  // $2 = PRACC_PARAM_OUT
        ori(2, 2, lower16(PRACC_PARAM_OUT)),
        sw(0, 0 * 4, 2),                   // sw $0,0*4($2)
        sw(1, 1 * 4, 2),                   // sw $1,1*4($2)
        sw(15, 15 * 4, 2),                 // sw $15,15*4($2)
        mfc0(2, 31, 0),                    // move COP0 DeSave to $2
        mtc0(15, 31, 0),                   // move $15 to COP0 DeSave
        lui(15, upper16(PRACC_STACK)),     // $15 = PRACC_STACK
        ori(15, 15, lower16(PRACC_STACK)),
        sw(1, 0, 15),                      // sw $1,($15)
        sw(2, 0, 15),                      // sw $2,($15)
        lui(1, upper16(PRACC_PARAM_OUT)),  // $1 = PRACC_PARAM_OUT
        ori(1, 1, lower16(PRACC_PARAM_OUT)),
        sw(2, 2 * 4, 1),                   // sw $2,2*4($1)
        sw(3, 3 * 4, 1),
        sw(4, 4 * 4, 1),
        sw(5, 5 * 4, 1),
        sw(6, 6 * 4, 1),
        sw(7, 7 * 4, 1),
        sw(8, 8 * 4, 1),
        sw(9, 9 * 4, 1),
        sw(10, 10 * 4, 1),
        sw(11, 11 * 4, 1),
        sw(12, 12 * 4, 1),
        sw(13, 13 * 4, 1),
        sw(14, 14 * 4, 1),
        sw(16, 16 * 4, 1),
        sw(17, 17 * 4, 1),
        sw(18, 18 * 4, 1),
        sw(19, 19 * 4, 1),
        sw(20, 20 * 4, 1),
        sw(21, 21 * 4, 1),
        sw(22, 22 * 4, 1),
        sw(23, 23 * 4, 1),
        sw(24, 24 * 4, 1),
        sw(25, 25 * 4, 1),
        sw(26, 26 * 4, 1),
        sw(27, 27 * 4, 1),
        sw(28, 28 * 4, 1),
        sw(29, 29 * 4, 1),
        sw(30, 30 * 4, 1),
        sw(31, 31 * 4, 1),
        mfc0(2, 12, 0),                    // move status to $2
        sw(2, 32 * 4, 1),
        mflo(2),                           // move lo to $2
        sw(2, 33 * 4, 1),
        mfhi(2),                           // move hi to $2
        sw(2, 34 * 4, 1),
        mfc0(2, 8, 0),                     // move badvaddr to $2
        sw(2, 35 * 4, 1),
        mfc0(2, 13, 0),                    // move cause to $2
        sw(2, 36 * 4, 1),
        mfc0(2, 24, 0),                    // move depc (pc) to $2
        sw(2, 37 * 4, 1),
        lw(2, 0, 15),                      // lw $2,($15)
        lw(1, 0, 15),                      // lw $1,($15)
        b(-58),                            // b start
        mfc0(15, 31, 0),                   // move COP0 DeSave to $15
    ];

    let mut regs = [0u32; NUM_CORE_REGS];
    execute(link, &CODE, &mut [], &mut regs, true)?;
    Ok(regs)
}

/// Restore the full register frame, including PC via DEPC.
pub fn write_regs<L: EjtagLink>(link: &mut L, regs: &[u32; NUM_CORE_REGS]) -> Result<()> {
    static CODE: [u32; 54] = [
        /* start: */
        lui(2, upper16(PRACC_PARAM_IN)),   // $2 = PRACC_PARAM_IN
        ori(2, 2, lower16(PRACC_PARAM_IN)),
        lw(1, 1 * 4, 2),                   // lw $1,1*4($2)
        lw(15, 15 * 4, 2),                 // lw $15,15*4($2)
        mtc0(15, 31, 0),                   // move $15 to COP0 DeSave
        lui(15, upper16(PRACC_STACK)),     // $15 = PRACC_STACK
        ori(15, 15, lower16(PRACC_STACK)),
        sw(1, 0, 15),                      // sw $1,($15)
        lui(1, upper16(PRACC_PARAM_IN)),   // $1 = PRACC_PARAM_IN
        ori(1, 1, lower16(PRACC_PARAM_IN)),
        lw(3, 3 * 4, 1),
        lw(4, 4 * 4, 1),
        lw(5, 5 * 4, 1),
        lw(6, 6 * 4, 1),
        lw(7, 7 * 4, 1),
        lw(8, 8 * 4, 1),
        lw(9, 9 * 4, 1),
        lw(10, 10 * 4, 1),
        lw(11, 11 * 4, 1),
        lw(12, 12 * 4, 1),
        lw(13, 13 * 4, 1),
        lw(14, 14 * 4, 1),
        lw(16, 16 * 4, 1),
        lw(17, 17 * 4, 1),
        lw(18, 18 * 4, 1),
        lw(19, 19 * 4, 1),
        lw(20, 20 * 4, 1),
        lw(21, 21 * 4, 1),
        lw(22, 22 * 4, 1),
        lw(23, 23 * 4, 1),
        lw(24, 24 * 4, 1),
        lw(25, 25 * 4, 1),
        lw(26, 26 * 4, 1),
        lw(27, 27 * 4, 1),
        lw(28, 28 * 4, 1),
        lw(29, 29 * 4, 1),
        lw(30, 30 * 4, 1),
        lw(31, 31 * 4, 1),
        lw(2, 32 * 4, 1),
        mtc0(2, 12, 0),                    // move $2 to status
        lw(2, 33 * 4, 1),
        mtlo(2),                           // move $2 to lo
        lw(2, 34 * 4, 1),
        mthi(2),                           // move $2 to hi
        lw(2, 35 * 4, 1),
        mtc0(2, 8, 0),                     // move $2 to badvaddr
        lw(2, 36 * 4, 1),
        mtc0(2, 13, 0),                    // move $2 to cause
        lw(2, 37 * 4, 1),
        mtc0(2, 24, 0),                    // move $2 to depc (pc)
        lw(2, 2 * 4, 1),                   // lw $2,2*4($1)
        lw(1, 0, 15),                      // lw $1,($15)
        b(-53),                            // b start
        mfc0(15, 31, 0),                   // move COP0 DeSave to $15
    ];

    let mut param_in = *regs;
    execute(link, &CODE, &mut param_in, &mut [], true)
}
