use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::LevelFilter;

use vmm::{
    EvictionPolicy, ImageBuilder, MemFile, MemFileSystem, PAGE_SIZE, ProcessId, VirtualAddress,
    VirtualMemoryManager, VmConfig, VmError,
};

mod console;

use console::Console;

const IMAGE_NAME: &str = "vmsim.noff";

#[derive(Parser)]
#[command(name = "vmsim")]
#[command(about = "Runs a synthetic paging workload against the virtual memory manager")]
struct Args {
    /// Number of physical frames
    #[arg(short, long, default_value_t = 32)]
    frames: usize,

    /// Page replacement policy (fifo, clock or random)
    #[arg(short, long, default_value_t = EvictionPolicy::Fifo)]
    policy: EvictionPolicy,

    /// Populate whole address spaces at creation instead of loading pages on demand
    #[arg(long)]
    eager: bool,

    /// Number of translation cache slots
    #[arg(long, default_value_t = 4)]
    tlb: usize,

    /// Do not rewrite clean pages that already have a swap image
    #[arg(long)]
    skip_clean_writeback: bool,

    /// Seed for the random replacement policy
    #[arg(long, default_value_t = 0x5EED)]
    seed: u64,

    /// Number of processes to run
    #[arg(long, default_value_t = 3)]
    processes: usize,

    /// Size of the program's code segment, and of its data segment, in pages
    #[arg(long, default_value_t = 4)]
    pages: usize,

    /// Number of write/verify sweeps over every process
    #[arg(long, default_value_t = 3)]
    rounds: usize,

    /// Most verbose log level to print (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", value_parser = parse_level)]
    log_level: LevelFilter,
}

fn parse_level(s: &str) -> Result<LevelFilter, String> {
    s.parse()
        .map_err(|_| format!("unknown log level `{s}`"))
}

impl Args {
    fn config(&self) -> VmConfig {
        VmConfig {
            num_frames: self.frames,
            eviction_policy: self.policy,
            demand_loading: !self.eager,
            tlb_capacity: self.tlb,
            skip_clean_writeback: self.skip_clean_writeback,
            random_seed: self.seed,
        }
    }
}

/// The synthetic program every process runs.
struct Program {
    code: Vec<u8>,
    pages: usize,
}

impl Program {
    fn new(pages: usize) -> Self {
        let code = (0..pages * PAGE_SIZE).map(|i| (i * 7 + 3) as u8).collect();
        Self { code, pages }
    }

    fn image(&self) -> Vec<u8> {
        ImageBuilder::new()
            .code(&self.code)
            .data(&vec![0xDA; self.pages * PAGE_SIZE])
            .build()
    }

    /// Pages the workload writes to: initialized data followed by the stack.
    fn writable_pages(&self, page_count: usize) -> std::ops::Range<usize> {
        self.pages..page_count
    }
}

/// Bytes written at the start of a page to identify who wrote it and when.
fn signature(pid: ProcessId, page: usize, round: usize) -> [u8; 8] {
    let value = ((pid.as_usize() as u64) << 48) | ((page as u64) << 16) | round as u64;
    value.to_le_bytes()
}

fn page_start(page: usize) -> VirtualAddress {
    VirtualAddress::new(page * PAGE_SIZE)
}

/// Runs every round and returns the number of verification failures.
fn run(
    vmm: &VirtualMemoryManager,
    program: &Program,
    pids: &[ProcessId],
    rounds: usize,
) -> Result<usize, VmError> {
    let mut mismatches = 0;
    let mut buf = [0u8; 8];

    for round in 0..rounds {
        log::info!("round {round}");

        for &pid in pids {
            vmm.switch_to(pid)?;
            let page_count = vmm.page_count(pid).ok_or(VmError::NoSuchProcess(pid))?;

            for page in program.writable_pages(page_count) {
                vmm.write_virtual(page_start(page), &signature(pid, page, round))?;
            }
            for page in 0..program.pages {
                let offset = page * PAGE_SIZE + (round * 8) % PAGE_SIZE;
                vmm.read_virtual(VirtualAddress::new(offset), &mut buf)?;
                if buf[..] != program.code[offset..offset + buf.len()] {
                    log::error!("process {pid}: code page {page} does not match the image");
                    mismatches += 1;
                }
            }
        }

        for &pid in pids {
            vmm.switch_to(pid)?;
            let page_count = vmm.page_count(pid).ok_or(VmError::NoSuchProcess(pid))?;

            for page in program.writable_pages(page_count) {
                vmm.read_virtual(page_start(page), &mut buf)?;
                if buf != signature(pid, page, round) {
                    log::error!("process {pid}: page {page} lost its round {round} write");
                    mismatches += 1;
                }
            }
        }
    }

    Ok(mismatches)
}

fn main() -> ExitCode {
    let args = Args::parse();
    Console::init(args.log_level);

    if args.frames == 0 || args.tlb == 0 {
        log::error!("--frames and --tlb must be at least 1");
        return ExitCode::FAILURE;
    }

    let program = Program::new(args.pages);
    let fs = Arc::new(MemFileSystem::new());
    let image: MemFile = fs.insert(IMAGE_NAME, program.image());
    let vmm = VirtualMemoryManager::new(args.config(), fs.clone());

    let pids: Vec<ProcessId> = (1..=args.processes).map(ProcessId::new).collect();
    for &pid in &pids {
        if let Err(err) = vmm.create_address_space(Box::new(image.clone()), pid) {
            log::error!("cannot start process {pid}: {err}");
            vmm.shutdown();
            return ExitCode::FAILURE;
        }
    }

    let result = run(&vmm, &program, &pids, args.rounds);

    for &pid in &pids {
        if let Err(err) = vmm.destroy_address_space(pid) {
            log::warn!("cannot destroy process {pid}: {err}");
        }
    }
    let leftover: Vec<String> = fs
        .names()
        .into_iter()
        .filter(|name| name != IMAGE_NAME)
        .collect();
    if !leftover.is_empty() {
        log::warn!("swap files left behind: {leftover:?}");
    }

    let stats = vmm.shutdown();
    println!("{stats}");

    match result {
        Ok(0) => ExitCode::SUCCESS,
        Ok(mismatches) => {
            log::error!("{mismatches} verification failures");
            ExitCode::FAILURE
        }
        Err(err) => {
            log::error!("workload aborted: {err}");
            ExitCode::FAILURE
        }
    }
}
