use std::fs::File;
use std::io::prelude::*;
use std::time::Instant;
use clap::{Arg, App, AppSettings, SubCommand};
use clap::{value_t, crate_description, crate_version};
use anyhow::{anyhow, bail};

use mipsblast::transport::ProbeInfo;
use mipsblast::blaster::{Blaster, GpioPin};
use mipsblast::tap::Tap;
use mipsblast::ejtag::Ejtag;
use mipsblast::fastdata::{FastData, WorkArea};
use mipsblast::{mips32, pracc};

#[allow(clippy::cognitive_complexity)]
fn main() -> anyhow::Result<()> {
    let matches = App::new("mipsblast")
        .version(crate_version!())
        .about(crate_description!())
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .global_setting(AppSettings::ColoredHelp)
        .global_setting(AppSettings::DeriveDisplayOrder)
        .global_setting(AppSettings::GlobalVersion)
        .global_setting(AppSettings::InferSubcommands)
        .global_setting(AppSettings::VersionlessSubcommands)
        .arg(Arg::with_name("quiet")
             .help("Suppress informative output")
             .long("quiet")
             .short("q")
             .global(true))
        .arg(Arg::with_name("backend")
             .help("USB back-end to use (ftdi or ftd2xx); all are tried when unset")
             .long("backend")
             .short("b")
             .takes_value(true)
             .possible_values(&["ftdi", "ftd2xx"])
             .global(true))
        .arg(Arg::with_name("vid-pid")
             .help("VID:PID of the probe, in hex")
             .long("vid-pid")
             .takes_value(true)
             .global(true))
        .arg(Arg::with_name("device-desc")
             .help("USB product description to match")
             .long("device-desc")
             .takes_value(true)
             .global(true))
        .arg(Arg::with_name("freq")
             .help("JTAG clock frequency to request, in kHz")
             .long("freq")
             .short("f")
             .takes_value(true)
             .global(true))
        .arg(Arg::with_name("pin6")
             .help("Drive the spare pin 6 output to 0 or 1")
             .long("pin6")
             .takes_value(true)
             .possible_values(&["0", "1"])
             .global(true))
        .arg(Arg::with_name("pin8")
             .help("Drive the spare pin 8 output to 0 or 1")
             .long("pin8")
             .takes_value(true)
             .possible_values(&["0", "1"])
             .global(true))
        .arg(Arg::with_name("trst-pin")
             .help("Spare pin wired to the target's TRST line")
             .long("trst-pin")
             .takes_value(true)
             .possible_values(&["pin6", "pin8"])
             .global(true))
        .arg(Arg::with_name("srst-pin")
             .help("Spare pin wired to the target's SRST line")
             .long("srst-pin")
             .takes_value(true)
             .possible_values(&["pin6", "pin8"])
             .global(true))
        .subcommand(SubCommand::with_name("idcode")
            .about("Read the EJTAG IDCODE and IMPCODE registers"))
        .subcommand(SubCommand::with_name("reset")
            .about("Reset the TAP and, when a pin is bound, the target"))
        .subcommand(SubCommand::with_name("halt")
            .about("Request a debug break and confirm debug mode"))
        .subcommand(SubCommand::with_name("resume")
            .about("Let a halted core leave debug mode"))
        .subcommand(SubCommand::with_name("read-word")
            .about("Read one 32-bit word from target memory")
            .arg(Arg::with_name("address")
                 .help("Address to read, in hex")
                 .required(true)))
        .subcommand(SubCommand::with_name("write-word")
            .about("Write one 32-bit word to target memory")
            .arg(Arg::with_name("address")
                 .help("Address to write, in hex")
                 .required(true))
            .arg(Arg::with_name("value")
                 .help("Word to write, in hex")
                 .required(true)))
        .subcommand(SubCommand::with_name("read")
            .about("Read target memory into a file")
            .arg(Arg::with_name("address")
                 .help("Start address, in hex")
                 .required(true))
            .arg(Arg::with_name("length")
                 .help("Number of bytes to read, in hex")
                 .required(true))
            .arg(Arg::with_name("file")
                 .help("File to write the data to")
                 .required(true))
            .arg(Arg::with_name("size")
                 .help("Access size in bits")
                 .long("size")
                 .takes_value(true)
                 .possible_values(&["8", "16", "32"])
                 .default_value("32"))
            .arg(Arg::with_name("work-area")
                 .help("ADDR:SIZE of target RAM to use for FASTDATA transfers")
                 .long("work-area")
                 .takes_value(true)))
        .subcommand(SubCommand::with_name("write")
            .about("Write a file into target memory")
            .arg(Arg::with_name("address")
                 .help("Start address, in hex")
                 .required(true))
            .arg(Arg::with_name("file")
                 .help("File to write to the target")
                 .required(true))
            .arg(Arg::with_name("size")
                 .help("Access size in bits")
                 .long("size")
                 .takes_value(true)
                 .possible_values(&["8", "16", "32"])
                 .default_value("32"))
            .arg(Arg::with_name("work-area")
                 .help("ADDR:SIZE of target RAM to use for FASTDATA transfers")
                 .long("work-area")
                 .takes_value(true)))
        .subcommand(SubCommand::with_name("regs")
            .about("Dump the core register frame of a halted target"))
        .get_matches();

    pretty_env_logger::init();
    let t0 = Instant::now();
    let quiet = matches.is_present("quiet");

    // Assemble the probe identification from the configuration surface.
    let mut info = ProbeInfo::default();
    if let Some(spec) = matches.value_of("vid-pid") {
        info = ProbeInfo::from_specifier(spec)?;
    }
    if let Some(desc) = matches.value_of("device-desc") {
        info.desc = Some(desc.to_owned());
    }

    let mut blaster = Blaster::open(matches.value_of("backend"), &info)?;

    // Pin levels take effect immediately once the transport is open.
    if let Some(level) = matches.value_of("pin6") {
        blaster.set_pin(GpioPin::Pin6, level == "1")?;
    }
    if let Some(level) = matches.value_of("pin8") {
        blaster.set_pin(GpioPin::Pin8, level == "1")?;
    }

    if matches.is_present("freq") {
        match value_t!(matches, "freq", u32) {
            Ok(freq) => blaster.set_speed(freq)?,
            Err(e) => {
                drop(blaster);
                e.exit();
            }
        }
    }

    let mut tap = Tap::new(blaster)?;
    if let Some(pin) = matches.value_of("trst-pin") {
        tap.bind_trst(parse_pin(pin));
    }
    if let Some(pin) = matches.value_of("srst-pin") {
        tap.bind_srst(parse_pin(pin));
    }

    // The reset command needs no EJTAG dialog, so handle it first.
    if matches.subcommand_name().unwrap() == "reset" {
        tap.reset(true, true)?;
        tap.reset(false, false)?;
        tap.flush()?;
        if !quiet { println!("Target reset.") };
        return Ok(());
    }

    let mut ejtag = Ejtag::new(tap)?;

    match matches.subcommand_name() {
        Some("idcode") => {
            println!("IDCODE:  {:#010x}", ejtag.idcode());
            println!("IMPCODE: {:#010x}", ejtag.impcode());
        },
        Some("halt") => {
            ejtag.enter_debug()?;
            if !quiet { println!("Target halted in debug mode.") };
        },
        Some("resume") => {
            pracc::exit_debug(&mut ejtag)?;
            if !quiet { println!("Target resumed.") };
        },
        Some("read-word") => {
            let matches = matches.subcommand_matches("read-word").unwrap();
            let address = parse_u32(matches.value_of("address").unwrap())?;
            let word = pracc::read_u32(&mut ejtag, address)?;
            println!("{:#010x}: {:#010x}", address, word);
        },
        Some("write-word") => {
            let matches = matches.subcommand_matches("write-word").unwrap();
            let address = parse_u32(matches.value_of("address").unwrap())?;
            let value = parse_u32(matches.value_of("value").unwrap())?;
            pracc::write_u32(&mut ejtag, address, value)?;
            if !quiet { println!("Wrote {:#010x} to {:#010x}.", value, address) };
        },
        Some("read") => {
            let matches = matches.subcommand_matches("read").unwrap();
            let address = parse_u32(matches.value_of("address").unwrap())?;
            let length = parse_u32(matches.value_of("length").unwrap())? as usize;
            let path = matches.value_of("file").unwrap();
            let size = value_t!(matches, "size", u32).unwrap();
            let work_area = matches.value_of("work-area").map(parse_work_area).transpose()?;
            let data = read_memory(&mut ejtag, address, length, size, work_area)?;
            let mut file = File::create(path)?;
            file.write_all(&data)?;
            if !quiet { println!("Read {} bytes from {:#010x}.", length, address) };
        },
        Some("write") => {
            let matches = matches.subcommand_matches("write").unwrap();
            let address = parse_u32(matches.value_of("address").unwrap())?;
            let path = matches.value_of("file").unwrap();
            let size = value_t!(matches, "size", u32).unwrap();
            let work_area = matches.value_of("work-area").map(parse_work_area).transpose()?;
            let mut file = File::open(path)?;
            let mut data = Vec::new();
            file.read_to_end(&mut data)?;
            write_memory(&mut ejtag, address, &data, size, work_area)?;
            if !quiet { println!("Wrote {} bytes to {:#010x}.", data.len(), address) };
        },
        Some("regs") => {
            let regs = pracc::read_regs(&mut ejtag)?;
            print_regs(&regs);
        },
        _ => panic!("Unhandled command."),
    }

    let t1 = t0.elapsed();
    if !quiet {
        println!("Finished in {}.{:02}s", t1.as_secs(), t1.subsec_millis() / 10);
    }

    Ok(())
}

fn parse_pin(name: &str) -> GpioPin {
    match name {
        "pin6" => GpioPin::Pin6,
        _ => GpioPin::Pin8,
    }
}

fn parse_u32(value: &str) -> anyhow::Result<u32> {
    let stripped = value.trim_start_matches("0x");
    u32::from_str_radix(stripped, 16).map_err(|_| anyhow!("could not parse '{}' as hex", value))
}

fn parse_work_area(spec: &str) -> anyhow::Result<WorkArea> {
    let parts: Vec<&str> = spec.split(':').collect();
    if parts.len() != 2 {
        bail!("work area must be given as ADDR:SIZE in hex");
    }
    Ok(WorkArea { address: parse_u32(parts[0])?, size: parse_u32(parts[1])? })
}

fn read_memory(
    ejtag: &mut Ejtag,
    address: u32,
    length: usize,
    size: u32,
    work_area: Option<WorkArea>,
) -> anyhow::Result<Vec<u8>> {
    let element = (size / 8) as usize;
    if length % element != 0 {
        bail!("length must be a multiple of the access size");
    }
    let count = length / element;
    match size {
        8 => {
            let mut buf = vec![0u8; count];
            pracc::read_mem8(ejtag, address, &mut buf)?;
            Ok(buf)
        }
        16 => {
            let mut buf = vec![0u16; count];
            pracc::read_mem16(ejtag, address, &mut buf)?;
            Ok(buf.iter().flat_map(|h| h.to_le_bytes().to_vec()).collect())
        }
        _ => {
            let mut buf = vec![0u32; count];
            match work_area {
                Some(area) => {
                    let mut engine = FastData::new();
                    engine.transfer(ejtag, &area, false, address, &mut buf)?;
                }
                None => pracc::read_mem32(ejtag, address, &mut buf)?,
            }
            Ok(buf.iter().flat_map(|w| w.to_le_bytes().to_vec()).collect())
        }
    }
}

fn write_memory(
    ejtag: &mut Ejtag,
    address: u32,
    data: &[u8],
    size: u32,
    work_area: Option<WorkArea>,
) -> anyhow::Result<()> {
    let element = (size / 8) as usize;
    if data.len() % element != 0 {
        bail!("file length must be a multiple of the access size");
    }
    match size {
        8 => Ok(pracc::write_mem8(ejtag, address, data)?),
        16 => {
            let halves: Vec<u16> = data
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            Ok(pracc::write_mem16(ejtag, address, &halves)?)
        }
        _ => {
            let mut words: Vec<u32> = data
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            match work_area {
                Some(area) => {
                    let mut engine = FastData::new();
                    engine.transfer(ejtag, &area, true, address, &mut words)?;
                    Ok(())
                }
                None => Ok(pracc::write_mem32(ejtag, address, &words)?),
            }
        }
    }
}

const GPR_NAMES: [&str; 32] = [
    "zero", "at", "v0", "v1", "a0", "a1", "a2", "a3",
    "t0", "t1", "t2", "t3", "t4", "t5", "t6", "t7",
    "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7",
    "t8", "t9", "k0", "k1", "gp", "sp", "fp", "ra",
];

fn print_regs(regs: &[u32; mips32::NUM_CORE_REGS]) {
    for (i, name) in GPR_NAMES.iter().enumerate() {
        print!("{:>8}: {:08x}  ", name, regs[i]);
        if i % 4 == 3 {
            println!();
        }
    }
    println!("{:>8}: {:08x}", "status", regs[mips32::REG_STATUS]);
    println!("{:>8}: {:08x}", "lo", regs[mips32::REG_LO]);
    println!("{:>8}: {:08x}", "hi", regs[mips32::REG_HI]);
    println!("{:>8}: {:08x}", "badvaddr", regs[mips32::REG_BADVADDR]);
    println!("{:>8}: {:08x}", "cause", regs[mips32::REG_CAUSE]);
    println!("{:>8}: {:08x}", "depc", regs[mips32::REG_DEPC]);
}
