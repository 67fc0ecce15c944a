// Command-line front end: encode, decode and inspect VCDIFF deltas.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};

use crate::compress::decoder::{ChecksumMode, DecodeOptions};
use crate::compress::encoder::{CompressOptions, DEFAULT_WINDOW_SIZE};
use crate::hash::config::MatcherConfig;
use crate::io;
use crate::vcdiff::code_table::DeltaOp;
use crate::vcdiff::decoder::{InstructionIterator, StreamDecoder};
use crate::vcdiff::header::{HdrIndicator, SegmentOrigin, WinIndicator};

const BUF_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Byte size parsing (supports K, M, G suffixes)
// ---------------------------------------------------------------------------

fn parse_byte_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".into());
    }
    let (num_part, multiplier) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1024u64),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1024 * 1024),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1u64),
    };
    let num: u64 = num_part
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow: '{s}'"))
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// VCDIFF (RFC 3284) delta encoder/decoder.
#[derive(Parser, Debug)]
#[command(
    name = "vcdelta",
    version,
    about = "VCDIFF delta encoder/decoder",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Suppress everything but errors.
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// More log output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Print stats as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Compute a delta from SOURCE to TARGET.
    Encode(EncodeArgs),
    /// Rebuild OUTPUT by applying DELTA to SOURCE.
    Decode(DecodeArgs),
    /// Describe the header and windows of a delta.
    Info(InfoArgs),
}

#[derive(Args, Debug)]
struct EncodeArgs {
    /// Source (dictionary) file.
    #[arg(long, short = 's', value_hint = ValueHint::FilePath)]
    source: Option<PathBuf>,

    /// Target window size (K/M/G suffixes accepted).
    #[arg(long = "window-size", short = 'W', value_parser = parse_byte_size, default_value_t = DEFAULT_WINDOW_SIZE as u64)]
    window_size: u64,

    /// Only copy from the source, never from earlier target bytes.
    #[arg(long = "no-target-matches")]
    no_target_matches: bool,

    /// Write an Adler-32 checksum for every window.
    #[arg(long)]
    checksum: bool,

    /// Smaller blocks and deeper probing: slower, smaller deltas.
    #[arg(long, conflicts_with = "fast")]
    thorough: bool,

    /// Larger blocks and a single probe.
    #[arg(long)]
    fast: bool,

    #[arg(value_hint = ValueHint::FilePath)]
    target: PathBuf,

    #[arg(value_hint = ValueHint::FilePath)]
    delta: PathBuf,
}

#[derive(Args, Debug)]
struct DecodeArgs {
    /// Source (dictionary) file.
    #[arg(long, short = 's', value_hint = ValueHint::FilePath)]
    source: Option<PathBuf>,

    /// Do not verify window checksums.
    #[arg(long = "ignore-checksum")]
    ignore_checksum: bool,

    /// Largest window accepted (K/M/G suffixes accepted).
    #[arg(long = "max-window-size", value_parser = parse_byte_size)]
    max_window_size: Option<u64>,

    #[arg(value_hint = ValueHint::FilePath)]
    delta: PathBuf,

    #[arg(value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// List every instruction.
    #[arg(long, short = 'i')]
    instructions: bool,

    #[arg(value_hint = ValueHint::FilePath)]
    delta: PathBuf,
}

struct Globals {
    force: bool,
    quiet: bool,
    json_output: bool,
}

// ---------------------------------------------------------------------------
// Option mapping
// ---------------------------------------------------------------------------

fn compress_options(args: &EncodeArgs) -> Result<CompressOptions, String> {
    let window_size = usize::try_from(args.window_size)
        .map_err(|_| format!("window size {} is too large", args.window_size))?;
    let matcher = if args.thorough {
        MatcherConfig::THOROUGH
    } else if args.fast {
        MatcherConfig::FAST
    } else {
        MatcherConfig::default()
    };
    Ok(CompressOptions {
        window_size,
        look_for_target_matches: !args.no_target_matches,
        checksum: args.checksum,
        matcher,
    })
}

fn decode_options(args: &DecodeArgs) -> DecodeOptions {
    let mut opts = DecodeOptions::default();
    if args.ignore_checksum {
        opts.checksum = ChecksumMode::Ignore;
    }
    if let Some(max) = args.max_window_size {
        opts.max_window_size = max;
    }
    opts
}

fn check_output(path: &Path, globals: &Globals) -> Result<(), String> {
    if path.exists() && !globals.force {
        return Err(format!(
            "output file exists, use -f to overwrite: {}",
            path.display()
        ));
    }
    Ok(())
}

fn print_json(value: serde_json::Value) {
    match serde_json::to_string_pretty(&value) {
        Ok(s) => eprintln!("{s}"),
        Err(e) => eprintln!("vcdelta: json: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_encode(args: &EncodeArgs, globals: &Globals) -> Result<(), String> {
    let opts = compress_options(args)?;
    check_output(&args.delta, globals)?;

    let stats = io::encode_file(args.source.as_deref(), &args.target, &args.delta, opts)
        .map_err(|e| e.to_string())?;

    if !globals.quiet {
        log::info!(
            "source {} bytes, target {} bytes, delta {} bytes, {} windows",
            stats.source_size,
            stats.target_size,
            stats.delta_size,
            stats.windows
        );
    }
    if globals.json_output {
        print_json(serde_json::json!({
            "command": "encode",
            "source_size": stats.source_size,
            "target_size": stats.target_size,
            "delta_size": stats.delta_size,
            "windows": stats.windows,
        }));
    }
    Ok(())
}

fn cmd_decode(args: &DecodeArgs, globals: &Globals) -> Result<(), String> {
    check_output(&args.output, globals)?;

    let stats = io::decode_file(
        args.source.as_deref(),
        &args.delta,
        &args.output,
        decode_options(args),
    )
    .map_err(|e| e.to_string())?;

    if !globals.quiet {
        log::info!(
            "output {} bytes, {} windows",
            stats.output_size,
            stats.windows
        );
    }
    if globals.json_output {
        print_json(serde_json::json!({
            "command": "decode",
            "source_size": stats.source_size,
            "delta_size": stats.delta_size,
            "output_size": stats.output_size,
            "windows": stats.windows,
        }));
    }
    Ok(())
}

fn flag_names<const N: usize>(flags: [(bool, &'static str); N]) -> String {
    let names: Vec<&str> = flags
        .iter()
        .filter_map(|&(set, name)| set.then_some(name))
        .collect();
    if names.is_empty() {
        "none".into()
    } else {
        names.join(" ")
    }
}

fn cmd_info(args: &InfoArgs, globals: &Globals) -> Result<(), String> {
    let file = File::open(&args.delta).map_err(|e| format!("{}: {e}", args.delta.display()))?;
    let mut decoder = StreamDecoder::new(BufReader::with_capacity(BUF_SIZE, file));

    let hdr = decoder.read_header().map_err(|e| format!("invalid VCDIFF header: {e}"))?.clone();
    let ind = hdr.indicator();

    println!("VCDIFF version:               0");
    println!(
        "VCDIFF header indicator:      {}",
        flag_names([
            (ind.contains(HdrIndicator::CODE_TABLE), "VCD_CODETABLE"),
            (ind.contains(HdrIndicator::APP_HEADER), "VCD_APPHEADER"),
        ])
    );
    if let Some(ct) = &hdr.code_table {
        println!(
            "VCDIFF code table:            near {} same {} ({} bytes)",
            ct.near_size,
            ct.same_size,
            ct.delta.len()
        );
    }
    if let Some(app) = &hdr.app_header {
        println!("VCDIFF application header:    {}", String::from_utf8_lossy(app));
    }

    let mut windows = 0u64;
    let mut target_total = 0u64;
    while let Some(raw) = decoder
        .read_window()
        .map_err(|e| format!("window {windows}: {e}"))?
    {
        let wh = &raw.header;
        let wind = wh.indicator();
        println!();
        println!("VCDIFF window number:         {windows}");
        println!(
            "VCDIFF window indicator:      {}",
            flag_names([
                (wind.contains(WinIndicator::SOURCE), "VCD_SOURCE"),
                (wind.contains(WinIndicator::TARGET), "VCD_TARGET"),
                (wind.contains(WinIndicator::ADLER32), "VCD_ADLER32"),
            ])
        );
        if let Some(cksum) = wh.adler32 {
            println!("VCDIFF adler32 checksum:      {cksum:08X}");
        }
        if let Some(seg) = wh.segment {
            println!("VCDIFF copy window length:    {}", seg.len);
            println!("VCDIFF copy window offset:    {}", seg.offset);
        }
        println!("VCDIFF delta encoding length: {}", wh.enc_len);
        println!("VCDIFF target window length:  {}", wh.target_window_len);
        println!("VCDIFF data section length:   {}", wh.data_len);
        println!("VCDIFF inst section length:   {}", wh.inst_len);
        println!("VCDIFF addr section length:   {}", wh.addr_len);

        if args.instructions {
            let seg_len = wh.source_len();
            let seg_tag = match wh.segment.map(|s| s.origin) {
                Some(SegmentOrigin::Target) => "P",
                _ => "S",
            };
            let seg_offset = wh.segment.map_or(0, |s| s.offset);
            println!("  Offset Type   Size  Address");
            let iter = InstructionIterator::with_code_table(
                &raw.inst,
                &raw.addr,
                seg_len,
                decoder.code_table(),
                decoder.new_address_cache(),
            );
            let mut offset = 0u64;
            for op in iter {
                let op = op.map_err(|e| format!("window {windows}: {e}"))?;
                match op {
                    DeltaOp::Add { len } => println!("  {offset:06} ADD  {len:6}"),
                    DeltaOp::Run { len } => println!("  {offset:06} RUN  {len:6}"),
                    DeltaOp::Copy { len, addr } if addr < seg_len => {
                        println!("  {offset:06} CPY  {len:6}  {seg_tag}@{}", seg_offset + addr)
                    }
                    DeltaOp::Copy { len, addr } => {
                        println!("  {offset:06} CPY  {len:6}  T@{}", addr - seg_len)
                    }
                }
                offset += u64::from(op.len());
            }
        }

        target_total += wh.target_window_len;
        windows += 1;
    }

    if globals.json_output {
        print_json(serde_json::json!({
            "command": "info",
            "windows": windows,
            "target_size": target_total,
            "app_header": hdr.app_header.as_deref().map(|a| String::from_utf8_lossy(a).into_owned()),
            "custom_code_table": hdr.code_table.is_some(),
        }));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn init_logging(quiet: bool, verbose: u8) {
    let filter = match (quiet, verbose) {
        (true, _) => "off",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

/// Parse arguments, run the command and exit.
pub fn run() -> ! {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    let globals = Globals {
        force: cli.force,
        quiet: cli.quiet,
        json_output: cli.json_output,
    };

    let result = match &cli.command {
        Cmd::Encode(args) => cmd_encode(args, &globals),
        Cmd::Decode(args) => cmd_decode(args, &globals),
        Cmd::Info(args) => cmd_info(args, &globals),
    };

    match result {
        Ok(()) => process::exit(0),
        Err(msg) => {
            eprintln!("vcdelta: {msg}");
            process::exit(1);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
