use anyhow::{bail, Context, Result};
use bsconv::reference::{fill_pseudo_random, first_mismatch, naive_convolve, ops_per_second, random_tensor};
use bsconv::{BitSerialConv, ConvConfig, ConvShape, PrecisionPair};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "bsconv-bench", version, about = "Run and verify the bit-serial 3x3 convolution")]
struct Args {
    /// Input height
    #[arg(long, default_value_t = 6)]
    h_in: usize,

    /// Input width
    #[arg(long, default_value_t = 6)]
    w_in: usize,

    /// Input channels (multiple of the group width unless --partial-groups)
    #[arg(long, default_value_t = 8)]
    c_in: usize,

    /// Output channels
    #[arg(long, default_value_t = 1)]
    c_out: usize,

    /// Activation precision in bits (1 or 2)
    #[arg(long, default_value_t = 1)]
    prec_a: u8,

    /// Weight precision in bits (1 or 2)
    #[arg(long, default_value_t = 1)]
    prec_w: u8,

    /// Run every (A, W) precision pair instead of --prec-a/--prec-w
    #[arg(long, default_value_t = false)]
    sweep: bool,

    /// JSON engine configuration; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Input lanes per width tile
    #[arg(long)]
    tile_size: Option<usize>,

    /// Output rows per row-block
    #[arg(long)]
    row_block: Option<usize>,

    /// Allow channel counts that leave a partial last group
    #[arg(long, default_value_t = false)]
    partial_groups: bool,

    /// Rayon threads over output channels (1 = sequential)
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Keep full 32-bit sums instead of wrapping to 8 bits
    #[arg(long, default_value_t = false)]
    wide: bool,

    /// Seeded uniform data instead of the additive fill sequence
    #[arg(long)]
    seed: Option<u64>,

    /// Timed repetitions per precision pair
    #[arg(long, default_value_t = 1)]
    iters: u32,

    /// Skip the reference comparison
    #[arg(long, default_value_t = false)]
    no_verify: bool,
}

struct Report {
    prec: PrecisionPair,
    elapsed: Duration,
    mismatch: Option<String>,
}

fn build_config(args: &Args) -> Result<ConvConfig> {
    let mut cfg = match &args.config {
        Some(path) => ConvConfig::from_json_file(path)?,
        None => ConvConfig::default(),
    };
    if let Some(t) = args.tile_size { cfg.tile_size = t; }
    if let Some(r) = args.row_block { cfg.row_block = r; }
    cfg.partial_groups |= args.partial_groups;
    cfg.parallel = args.threads > 1;
    cfg.validate()?;
    Ok(cfg)
}

fn make_inputs(args: &Args, shape: &ConvShape, prec: PrecisionPair) -> (Vec<u8>, Vec<u8>) {
    match args.seed {
        Some(seed) => (
            random_tensor(shape.activation_len(), prec.activation, seed),
            random_tensor(shape.filter_len(), prec.weight, seed ^ 0x9e37_79b9_7f4a_7c15),
        ),
        None => {
            let mut act = vec![0u8; shape.activation_len()];
            let mut filt = vec![0u8; shape.filter_len()];
            fill_pseudo_random(&mut act, prec.activation);
            fill_pseudo_random(&mut filt, prec.weight);
            (act, filt)
        }
    }
}

fn run_one<O>(args: &Args, engine: &BitSerialConv, shape: &ConvShape, prec: PrecisionPair) -> Result<Report>
where
    O: bsconv::mac::OutputElem + PartialEq + std::fmt::Display,
{
    let (act, filt) = make_inputs(args, shape, prec);
    let mut out = vec![O::default(); shape.output_len()];
    let mut elapsed = Duration::ZERO;
    for _ in 0..args.iters.max(1) {
        let t0 = Instant::now();
        engine.run(&mut out, &act, &filt, shape, prec).with_context(|| format!("convolution {}", prec))?;
        elapsed += t0.elapsed();
    }
    elapsed /= args.iters.max(1);

    let mismatch = if args.no_verify {
        None
    } else {
        let mut golden = vec![O::default(); shape.output_len()];
        naive_convolve(&mut golden, &act, &filt, shape);
        first_mismatch(&out, &golden, shape).map(|m| m.to_string())
    };
    Ok(Report { prec, elapsed, mismatch })
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let cfg = build_config(&args)?;
    let shape = ConvShape::new(args.h_in, args.w_in, args.c_in, args.c_out);
    let engine = BitSerialConv::<u8>::new(cfg)?;

    let pairs: Vec<PrecisionPair> = if args.sweep {
        PrecisionPair::all().to_vec()
    } else {
        vec![PrecisionPair::from_bits(args.prec_a, args.prec_w)?]
    };
    info!("shape {:?}, {} precision pair(s), config {:?}", shape, pairs.len(), engine.config());

    let pb = ProgressBar::new(pairs.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:30} {pos}/{len} {msg}")
            .context("progress template")?,
    );

    let pool = rayon::ThreadPoolBuilder::new().num_threads(args.threads.max(1)).build()?;
    let mut reports = Vec::with_capacity(pairs.len());
    for prec in pairs {
        pb.set_message(prec.to_string());
        let report = pool.install(|| {
            if args.wide {
                run_one::<i32>(&args, &engine, &shape, prec)
            } else {
                run_one::<u8>(&args, &engine, &shape, prec)
            }
        })?;
        reports.push(report);
        pb.inc(1);
    }
    pb.finish_and_clear();

    let mut failed = 0;
    for r in &reports {
        let ops = ops_per_second(&shape, r.prec, r.elapsed);
        match &r.mismatch {
            Some(m) => {
                failed += 1;
                println!("{} FAIL {}", r.prec, m);
            }
            None => println!(
                "{} ok in={}x{}x{} out={}x{}x{} elapsed={:.6}s ops/s={:.3e}",
                r.prec,
                shape.c_in,
                shape.h_in,
                shape.w_in,
                shape.c_out,
                shape.h_out(),
                shape.w_out(),
                r.elapsed.as_secs_f64(),
                ops
            ),
        }
    }
    if failed > 0 {
        bail!("{} precision pair(s) disagree with the reference", failed);
    }
    Ok(())
}
