use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgMatches, Command as App};
use log::{error, info, LevelFilter};

use device::JbodArray;
use jbod::{Geometry, JbodClient, JbodServer, Transport, Volume, MAX_IO_LEN};

mod device;
mod jbod;
mod logger;
mod workload;

fn main() {
    let matches = cli().get_matches();
    let level = matches
        .get_one::<String>("log-level")
        .and_then(|level| level.parse().ok())
        .unwrap_or(LevelFilter::Info);
    logger::init(level);

    if let Err(err) = run(&matches) {
        error!("{:#}", err);
        std::process::exit(1);
    }
}

fn server_arg() -> Arg {
    Arg::new("server")
        .short('s')
        .long("server")
        .default_value("127.0.0.1:3333")
        .help("Address of the JBOD server")
}

fn cache_arg() -> Arg {
    Arg::new("cache-size")
        .short('c')
        .long("cache-size")
        .value_parser(value_parser!(usize))
        .help("Number of cached blocks (2..=4096); no cache when omitted")
}

fn addr_arg() -> Arg {
    Arg::new("addr")
        .short('a')
        .long("addr")
        .required(true)
        .value_parser(value_parser!(u32))
        .help("Linear start address")
}

fn cli() -> App {
    App::new("easy-jbod")
        .about("Linear byte-addressable volume over a JBOD disk array")
        .subcommand_required(true)
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .default_value("info")
                .value_parser(["off", "error", "warn", "info", "debug", "trace"]),
        )
        .arg(
            Arg::new("disks")
                .long("disks")
                .global(true)
                .default_value("16")
                .value_parser(value_parser!(u32))
                .help("Number of disks in the array"),
        )
        .arg(
            Arg::new("blocks")
                .long("blocks-per-disk")
                .global(true)
                .default_value("256")
                .value_parser(value_parser!(u32))
                .help("Number of blocks on each disk"),
        )
        .subcommand(
            App::new("serve")
                .about("Serve an image-backed JBOD array over TCP")
                .arg(
                    Arg::new("image")
                        .short('i')
                        .long("image")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Image file holding the array contents"),
                )
                .arg(
                    Arg::new("listen")
                        .short('l')
                        .long("listen")
                        .default_value("127.0.0.1:3333"),
                ),
        )
        .subcommand(
            App::new("read")
                .about("Hex-dump a range of the volume")
                .arg(server_arg())
                .arg(addr_arg())
                .arg(
                    Arg::new("len")
                        .short('n')
                        .long("len")
                        .required(true)
                        .value_parser(value_parser!(usize)),
                )
                .arg(cache_arg()),
        )
        .subcommand(
            App::new("write")
                .about("Write the contents of a file into the volume")
                .arg(server_arg())
                .arg(addr_arg())
                .arg(
                    Arg::new("input")
                        .short('i')
                        .long("input")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            App::new("replay")
                .about("Replay a workload trace and report the cache hit rate")
                .arg(
                    Arg::new("trace")
                        .short('t')
                        .long("trace")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("server")
                        .short('s')
                        .long("server")
                        .help("Replay against a JBOD server instead of an in-memory array"),
                )
                .arg(cache_arg()),
        )
        .subcommand(
            App::new("bench")
                .about("Run a random workload on an in-memory array")
                .arg(
                    Arg::new("ops")
                        .long("ops")
                        .default_value("10000")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("hot-blocks")
                        .long("hot-blocks")
                        .default_value("256")
                        .value_parser(value_parser!(u32).range(1..)),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("0")
                        .value_parser(value_parser!(u64)),
                )
                .arg(cache_arg()),
        )
}

fn value<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Result<T> {
    matches
        .get_one::<T>(id)
        .cloned()
        .with_context(|| format!("missing --{}", id))
}

fn run(matches: &ArgMatches) -> Result<()> {
    let geometry = Geometry::new(value(matches, "disks")?, value(matches, "blocks")?)?;
    match matches.subcommand() {
        Some(("serve", sub)) => {
            let image: PathBuf = value(sub, "image")?;
            let mut device = JbodArray::open_image(&image, geometry)
                .with_context(|| format!("opening image {}", image.display()))?;
            let server = JbodServer::bind(value::<String>(sub, "listen")?)?;
            server.serve(&mut device)?;
        }
        Some(("read", sub)) => {
            let mut volume = connect(sub, geometry)?;
            if let Some(capacity) = sub.get_one::<usize>("cache-size") {
                volume.cache_create(*capacity)?;
            }
            let addr: u32 = value(sub, "addr")?;
            let mut buf = vec![0u8; value(sub, "len")?];
            volume.mount()?;
            read_chunked(&mut volume, addr, &mut buf)?;
            volume.unmount()?;
            hexdump(addr, &buf);
        }
        Some(("write", sub)) => {
            let input: PathBuf = value(sub, "input")?;
            let data =
                fs::read(&input).with_context(|| format!("reading {}", input.display()))?;
            let addr: u32 = value(sub, "addr")?;
            let mut volume = connect(sub, geometry)?;
            volume.mount()?;
            volume.grant_write()?;
            write_chunked(&mut volume, addr, &data)?;
            volume.revoke_write()?;
            volume.unmount()?;
            println!("wrote {} bytes at {:#x}", data.len(), addr);
        }
        Some(("replay", sub)) => {
            let path: PathBuf = value(sub, "trace")?;
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading trace {}", path.display()))?;
            let ops = workload::parse_trace(&text)?;
            let cache = sub.get_one::<usize>("cache-size").copied();
            match sub.get_one::<String>("server") {
                Some(server) => {
                    let volume = Volume::new(JbodClient::connect(server.as_str())?, geometry);
                    run_workload(volume, &ops, cache)?;
                }
                None => {
                    let volume = Volume::new(JbodArray::in_memory(geometry), geometry);
                    run_workload(volume, &ops, cache)?;
                }
            }
        }
        Some(("bench", sub)) => {
            let ops = workload::random_trace(
                value(sub, "ops")?,
                geometry.capacity(),
                value(sub, "hot-blocks")?,
                value(sub, "seed")?,
            )?;
            let volume = Volume::new(JbodArray::in_memory(geometry), geometry);
            run_workload(volume, &ops, sub.get_one::<usize>("cache-size").copied())?;
        }
        _ => unreachable!("subcommand is required"),
    }
    Ok(())
}

fn connect(matches: &ArgMatches, geometry: Geometry) -> Result<Volume<JbodClient>> {
    let server: String = value(matches, "server")?;
    let client =
        JbodClient::connect(server.as_str()).with_context(|| format!("connecting to {}", server))?;
    Ok(Volume::new(client, geometry))
}

fn run_workload<T: Transport>(
    mut volume: Volume<T>,
    ops: &[workload::TraceOp],
    cache: Option<usize>,
) -> Result<()> {
    if let Some(capacity) = cache {
        volume.cache_create(capacity)?;
    }
    let geometry = volume.geometry();
    info!(
        "replaying {} operations on {} disks x {} blocks",
        ops.len(),
        geometry.num_disks(),
        geometry.blocks_per_disk()
    );
    let report = workload::replay(&mut volume, ops);
    info!(
        "{} operations, {} failed, {} bytes read, {} bytes written",
        report.ops, report.failures, report.bytes_read, report.bytes_written
    );
    if volume.cache_enabled() {
        let stats = volume.cache_stats();
        println!("num_hits: {}, num_queries: {}", stats.hits, stats.queries);
        println!("Hit rate: {:5.1}%", 100.0 * stats.hit_rate());
        volume.cache_destroy()?;
    }
    Ok(())
}

/// 单次请求最多 MAX_IO_LEN 字节, 更长的区间拆成多次请求
fn read_chunked<T: Transport>(volume: &mut Volume<T>, addr: u32, buf: &mut [u8]) -> Result<()> {
    for (idx, chunk) in buf.chunks_mut(MAX_IO_LEN).enumerate() {
        volume.read(chunk_addr(addr, idx)?, chunk)?;
    }
    Ok(())
}

fn write_chunked<T: Transport>(volume: &mut Volume<T>, addr: u32, data: &[u8]) -> Result<()> {
    for (idx, chunk) in data.chunks(MAX_IO_LEN).enumerate() {
        volume.write(chunk_addr(addr, idx)?, chunk)?;
    }
    Ok(())
}

fn chunk_addr(addr: u32, idx: usize) -> Result<u32> {
    u32::try_from(idx * MAX_IO_LEN)
        .ok()
        .and_then(|offset| addr.checked_add(offset))
        .context("range runs past the end of the address space")
}

fn hexdump(addr: u32, data: &[u8]) {
    for (idx, line) in data.chunks(16).enumerate() {
        let hex: Vec<String> = line.iter().map(|b| format!("{:02x}", b)).collect();
        let ascii: String = line
            .iter()
            .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
            .collect();
        println!(
            "{:08x}  {:<47}  |{}|",
            addr as usize + idx * 16,
            hex.join(" "),
            ascii
        );
    }
}
