// Command-line front end for oxipatch.
//
// `apply` runs a patch against a source file, `headers` prints the VCDIFF
// file and window headers of a patch, and `config` prints build details.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};

use crate::io::{
    DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_BLOCKS, PatchOptions, PatchStats, apply_patch_with_options,
};
use crate::progress;
use crate::vcdiff::header::{
    self, FileHeader, HARD_MAX_WINSIZE, VCD_ADDRCOMP, VCD_ADLER32, VCD_APPHEADER, VCD_CODETABLE,
    VCD_DATACOMP, VCD_INSTCOMP, VCD_SECONDARY, VCD_SOURCE, VCD_TARGET, WindowHeader,
};
use crate::vcdiff::{secondary, varint};

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

fn parse_sha256(s: &str) -> Result<[u8; 32], String> {
    let s = s.trim();
    if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(format!("expected 64 hex digits, got '{s}'"));
    }
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[2 * i..2 * i + 2], 16)
            .map_err(|e| format!("invalid hex digest '{s}': {e}"))?;
    }
    Ok(out)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Apply xdelta3/VCDIFF patches with a bounded source cache.
#[derive(Parser, Debug)]
#[command(
    name = "oxipatch",
    version,
    about = "Apply VCDIFF patches with bounded memory",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (suppress non-error output).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Apply a patch to a source file, writing the target file.
    Apply(ApplyArgs),
    /// Print the file header and every window header of a patch.
    Headers(HeadersArgs),
    /// Print build/configuration details.
    Config,
}

#[derive(Args, Debug)]
struct ApplyArgs {
    /// Size of one cached source block (supports K/M/G suffix).
    #[arg(long = "block-size", value_parser = parse_byte_size, default_value_t = DEFAULT_BLOCK_SIZE as u64)]
    block_size: u64,

    /// Number of source blocks kept in memory.
    #[arg(long = "cache-blocks", default_value_t = DEFAULT_CACHE_BLOCKS)]
    cache_blocks: usize,

    /// Largest target window accepted (supports K/M/G suffix).
    #[arg(long = "window-size", value_parser = parse_byte_size, default_value_t = HARD_MAX_WINSIZE)]
    window_size: u64,

    /// Disable Adler-32 verification.
    #[arg(long = "no-checksum")]
    no_checksum: bool,

    /// Report progress on stderr.
    #[arg(long)]
    progress: bool,

    /// Fail unless the target's SHA-256 matches this hex digest.
    #[arg(long = "expect-sha256", value_name = "HEX", value_parser = parse_sha256)]
    expect_sha256: Option<[u8; 32]>,

    /// Source file the patch was made against.
    #[arg(value_hint = ValueHint::FilePath)]
    source: PathBuf,

    /// VCDIFF patch file.
    #[arg(value_hint = ValueHint::FilePath)]
    patch: PathBuf,

    /// Target file to write.
    #[arg(value_hint = ValueHint::FilePath)]
    target: PathBuf,
}

#[derive(Args, Debug)]
struct HeadersArgs {
    /// VCDIFF input file.
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,
}

// ---------------------------------------------------------------------------
// Resolved command + options (flattened from Cli)
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Command {
    Apply(ApplyArgs),
    Headers(HeadersArgs),
    Config,
}

#[derive(Debug)]
struct Options {
    command: Command,
    force: bool,
    quiet: bool,
    verbose: u8,
    json_output: bool,
}

fn resolve_options(cli: Cli) -> Options {
    let command = match cli.command {
        Cmd::Apply(args) => Command::Apply(args),
        Cmd::Headers(args) => Command::Headers(args),
        Cmd::Config => Command::Config,
    };
    Options {
        command,
        force: cli.force,
        quiet: cli.quiet,
        verbose: cli.verbose.min(2),
        json_output: cli.json_output,
    }
}

fn log_level(opts: &Options) -> Option<log::LevelFilter> {
    if opts.quiet {
        Some(log::LevelFilter::Error)
    } else {
        match opts.verbose {
            0 => None,
            1 => Some(log::LevelFilter::Info),
            _ => Some(log::LevelFilter::Debug),
        }
    }
}

// ---------------------------------------------------------------------------
// Config command
// ---------------------------------------------------------------------------

fn cmd_config() -> i32 {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!("oxipatch version {version} (Rust)");
    eprintln!("Licensed under the MIT License");

    let lzma = cfg!(feature = "lzma-secondary") as u8;
    let zlib = cfg!(feature = "zlib-secondary") as u8;
    let adler32 = cfg!(feature = "adler32") as u8;
    let file_io = cfg!(feature = "file-io") as u8;
    let ptr_size = std::mem::size_of::<*const ()>();

    eprintln!("SECONDARY_LZMA={lzma}");
    eprintln!("SECONDARY_ZLIB={zlib}");
    eprintln!("ADLER32={adler32}");
    eprintln!("FILE_IO={file_io}");
    eprintln!("DEFAULT_BLOCK_SIZE={DEFAULT_BLOCK_SIZE}");
    eprintln!("DEFAULT_CACHE_BLOCKS={DEFAULT_CACHE_BLOCKS}");
    eprintln!("HARD_MAX_WINSIZE={HARD_MAX_WINSIZE}");
    eprintln!("sizeof(usize)={ptr_size}");

    0
}

// ---------------------------------------------------------------------------
// Apply command
// ---------------------------------------------------------------------------

fn build_patch_options(args: &ApplyArgs) -> Result<PatchOptions, String> {
    let block_size = usize::try_from(args.block_size)
        .map_err(|_| format!("block size {} is too large", args.block_size))?;
    Ok(PatchOptions {
        block_size,
        cache_blocks: args.cache_blocks,
        window_size: args.window_size,
        verify_checksum: !args.no_checksum,
    })
}

fn cmd_apply(opts: &Options, args: &ApplyArgs) -> i32 {
    let patch_opts = match build_patch_options(args) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("oxipatch: {e}");
            return 1;
        }
    };

    if args.target.exists() && !opts.force {
        eprintln!(
            "oxipatch: target file exists, use -f to overwrite: {}",
            args.target.display()
        );
        return 1;
    }

    if args.expect_sha256.is_some() && !cfg!(feature = "file-io") {
        eprintln!("oxipatch: --expect-sha256 requires the file-io feature");
        return 1;
    }

    let show_progress = args.progress && !opts.quiet;
    let (mut written, mut read) = (0u64, 0u64);
    let mut sink = progress::from_fn(|w, r| {
        written += w;
        read += r;
        if show_progress {
            eprint!("\roxipatch: {written} bytes written, {read} patch bytes read");
        }
    });

    let result = apply_patch_with_options(
        &args.source,
        &args.patch,
        &args.target,
        &mut sink,
        &patch_opts,
    );
    if show_progress {
        eprintln!();
    }

    let stats = match result {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("oxipatch: {e}");
            return 1;
        }
    };

    if let Some(expected) = args.expect_sha256
        && stats.output_sha256 != Some(expected)
    {
        let actual = stats
            .output_sha256
            .map(|d| to_hex(&d))
            .unwrap_or_default();
        eprintln!(
            "oxipatch: target SHA-256 mismatch: expected {}, got {actual}",
            to_hex(&expected)
        );
        return 1;
    }

    if opts.verbose > 0 && !opts.quiet {
        eprintln!(
            "oxipatch: output size: {}, windows: {}, cache hits: {}, misses: {}",
            stats.output_size, stats.windows, stats.cache.hits, stats.cache.misses
        );
    }
    if opts.json_output {
        print_json_stats(&stats);
    }

    0
}

fn print_json_stats(stats: &PatchStats) {
    let json = serde_json::json!({
        "command": "apply",
        "patch_size": stats.patch_size,
        "output_size": stats.output_size,
        "windows": stats.windows,
        "cache_hits": stats.cache.hits,
        "cache_misses": stats.cache.misses,
        "source_bytes_read": stats.cache.bytes_read,
        "output_sha256": stats.output_sha256.map(|d| to_hex(&d)),
    });
    match serde_json::to_string_pretty(&json) {
        Ok(s) => eprintln!("{s}"),
        Err(e) => eprintln!("oxipatch: cannot format stats: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Headers command
// ---------------------------------------------------------------------------

fn flag_names(bits: u8, names: &[(u8, &'static str)]) -> String {
    let set: Vec<&str> = names
        .iter()
        .filter(|(bit, _)| bits & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    if set.is_empty() {
        "none".to_string()
    } else {
        set.join(" ")
    }
}

fn secondary_name(id: u8) -> String {
    match id {
        header::VCD_DJW_ID => "djw".into(),
        header::VCD_LZMA_ID => "lzma".into(),
        secondary::VCD_ZLIB_ID => "zlib".into(),
        header::VCD_FGK_ID => "fgk".into(),
        other => format!("unknown (id={other})"),
    }
}

fn cmd_headers(args: &HeadersArgs) -> i32 {
    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("oxipatch: {}: {e}", args.input.display());
            return 1;
        }
    };
    let mut reader = BufReader::with_capacity(BUF_SIZE, file);

    let file_hdr = match FileHeader::decode(&mut reader) {
        Ok(hdr) => hdr,
        Err(e) => {
            eprintln!("oxipatch: invalid VCDIFF header: {e}");
            return 1;
        }
    };

    // magic(4) + hdr_ind(1) + optional fields.
    let mut hdr_size = 5;
    if file_hdr.secondary_id.is_some() {
        hdr_size += 1;
    }
    if let Some(ref data) = file_hdr.app_header {
        hdr_size += varint::sizeof_u64(data.len() as u64) + data.len();
    }

    println!("VCDIFF version:               0");
    println!("VCDIFF header size:           {hdr_size}");
    println!(
        "VCDIFF header indicator:      {}",
        flag_names(
            file_hdr.hdr_ind,
            &[
                (VCD_SECONDARY, "VCD_SECONDARY"),
                (VCD_CODETABLE, "VCD_CODETABLE"),
                (VCD_APPHEADER, "VCD_APPHEADER"),
            ]
        )
    );
    println!(
        "VCDIFF secondary compressor:  {}",
        file_hdr
            .secondary_id
            .map(secondary_name)
            .unwrap_or_else(|| "none".into())
    );
    if let Some(ref data) = file_hdr.app_header
        && !data.is_empty()
    {
        println!(
            "VCDIFF application header:    {}",
            String::from_utf8_lossy(data)
        );
    }

    let mut window_num: u64 = 0;
    let mut target_offset: u64 = 0;
    loop {
        let wh = match WindowHeader::decode(&mut reader) {
            Ok(Some(wh)) => wh,
            Ok(None) => break,
            Err(e) => {
                eprintln!("oxipatch: window {window_num}: {e}");
                return 1;
            }
        };

        println!();
        println!("VCDIFF window number:         {window_num}");
        println!(
            "VCDIFF window indicator:      {}",
            flag_names(
                wh.win_ind,
                &[
                    (VCD_SOURCE, "VCD_SOURCE"),
                    (VCD_TARGET, "VCD_TARGET"),
                    (VCD_ADLER32, "VCD_ADLER32"),
                ]
            )
        );
        if let Some(cksum) = wh.adler32 {
            println!("VCDIFF adler32 checksum:      {cksum:08X}");
        }
        if wh.del_ind != 0 {
            println!(
                "VCDIFF delta indicator:       {}",
                flag_names(
                    wh.del_ind,
                    &[
                        (VCD_DATACOMP, "VCD_DATACOMP"),
                        (VCD_INSTCOMP, "VCD_INSTCOMP"),
                        (VCD_ADDRCOMP, "VCD_ADDRCOMP"),
                    ]
                )
            );
        }
        if target_offset > 0 {
            println!("VCDIFF window at offset:      {target_offset}");
        }
        if wh.has_source() || wh.has_target() {
            println!("VCDIFF copy window length:    {}", wh.copy_window_len);
            println!("VCDIFF copy window offset:    {}", wh.copy_window_offset);
        }
        println!("VCDIFF delta encoding length: {}", wh.enc_len);
        println!("VCDIFF target window length:  {}", wh.target_window_len);
        println!("VCDIFF data section length:   {}", wh.data_len);
        println!("VCDIFF inst section length:   {}", wh.inst_len);
        println!("VCDIFF addr section length:   {}", wh.addr_len);

        let Some(section_total) = wh.sections_len() else {
            eprintln!("oxipatch: window {window_num}: section lengths overflow");
            return 1;
        };
        match io::copy(&mut (&mut reader).take(section_total), &mut io::sink()) {
            Ok(n) if n == section_total => {}
            Ok(_) => {
                eprintln!("oxipatch: window {window_num}: truncated sections");
                return 1;
            }
            Err(e) => {
                eprintln!("oxipatch: window {window_num}: {e}");
                return 1;
            }
        }

        target_offset += wh.target_window_len;
        window_num += 1;
    }

    0
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    let cli = Cli::parse();
    let opts = resolve_options(cli);

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    logger.format_timestamp(None).format_target(false);
    if let Some(level) = log_level(&opts) {
        logger.filter_level(level);
    }
    logger.init();

    let exit_code = match &opts.command {
        Command::Apply(args) => cmd_apply(&opts, args),
        Command::Headers(args) => cmd_headers(args),
        Command::Config => cmd_config(),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_opts(args: &[&str]) -> Options {
        let argv: Vec<String> = std::iter::once("oxipatch".to_string())
            .chain(args.iter().map(|s| s.to_string()))
            .collect();
        let cli = Cli::try_parse_from(argv).expect("cli parse failed");
        resolve_options(cli)
    }

    fn apply_args(opts: Options) -> ApplyArgs {
        match opts.command {
            Command::Apply(args) => args,
            other => panic!("expected apply, got {other:?}"),
        }
    }

    #[test]
    fn parse_byte_size_suffixes() {
        assert_eq!(parse_byte_size("1").unwrap(), 1);
        assert_eq!(parse_byte_size("2K").unwrap(), 2 * 1024);
        assert_eq!(parse_byte_size("3m").unwrap(), 3 * 1024 * 1024);
        assert_eq!(parse_byte_size("4G").unwrap(), 4 * 1024 * 1024 * 1024);
        assert!(parse_byte_size("").is_err());
        assert!(parse_byte_size("17179869184G").is_err());
    }

    #[test]
    fn parse_sha256_hex() {
        let hex = "00ff".repeat(16);
        let digest = parse_sha256(&hex).unwrap();
        assert_eq!(digest[0], 0x00);
        assert_eq!(digest[1], 0xff);
        assert_eq!(to_hex(&digest), hex);
        assert!(parse_sha256("abc").is_err());
        assert!(parse_sha256(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn apply_defaults() {
        let args = apply_args(parse_opts(&["apply", "old.bin", "p.vcdiff", "new.bin"]));
        assert_eq!(args.source, PathBuf::from("old.bin"));
        assert_eq!(args.patch, PathBuf::from("p.vcdiff"));
        assert_eq!(args.target, PathBuf::from("new.bin"));
        let p = build_patch_options(&args).unwrap();
        assert_eq!(p, PatchOptions::default());
    }

    #[test]
    fn apply_tuning_flags() {
        let args = apply_args(parse_opts(&[
            "apply",
            "--block-size",
            "64K",
            "--cache-blocks",
            "4",
            "--window-size",
            "1M",
            "--no-checksum",
            "--progress",
            "a",
            "b",
            "c",
        ]));
        let p = build_patch_options(&args).unwrap();
        assert_eq!(p.block_size, 64 * 1024);
        assert_eq!(p.cache_blocks, 4);
        assert_eq!(p.window_size, 1024 * 1024);
        assert!(!p.verify_checksum);
        assert!(args.progress);
    }

    #[test]
    fn global_flags() {
        let opts = parse_opts(&["--json", "-f", "apply", "a", "b", "c"]);
        assert!(opts.force);
        assert!(opts.json_output);
        assert_eq!(log_level(&opts), None);

        let quiet = parse_opts(&["-q", "config"]);
        assert_eq!(log_level(&quiet), Some(log::LevelFilter::Error));
    }

    #[test]
    fn verbose_is_capped() {
        let verbose = parse_opts(&["-v", "-v", "-v", "config"]);
        assert_eq!(verbose.verbose, 2);
        assert_eq!(log_level(&verbose), Some(log::LevelFilter::Debug));
        let once = parse_opts(&["-v", "config"]);
        assert_eq!(log_level(&once), Some(log::LevelFilter::Info));
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        let argv = ["oxipatch", "-q", "-v", "config"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn headers_and_config_map() {
        assert!(matches!(
            parse_opts(&["headers", "in"]).command,
            Command::Headers(_)
        ));
        assert!(matches!(parse_opts(&["config"]).command, Command::Config));
    }

    #[test]
    fn apply_requires_three_paths() {
        assert!(Cli::try_parse_from(["oxipatch", "apply", "a", "b"]).is_err());
    }

    #[test]
    fn flag_names_formatting() {
        let names = [(1, "A"), (2, "B")];
        assert_eq!(flag_names(0, &names), "none");
        assert_eq!(flag_names(3, &names), "A B");
    }
}
