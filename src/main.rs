use clap::Parser;
use color_eyre::eyre::{self, WrapErr};
use console::style;
use gcnsim::{config, kernel::Kernel, trace::Tracer, Timing};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug, Clone)]
#[clap(
    version = option_env!("CARGO_PKG_VERSION").unwrap_or("unknown"),
    about = "cycle-level timing simulator of a Southern Islands GPU",
)]
pub struct Options {
    #[clap(long = "config", help = "GPU configuration (YAML)")]
    pub config: Option<PathBuf>,
    #[clap(long = "max-cycles", help = "stop after this many cycles")]
    pub max_cycles: Option<u64>,
    #[clap(
        long = "max-instructions",
        help = "stop after this many fetched instructions"
    )]
    pub max_instructions: Option<u64>,
    #[clap(long = "trace", help = "write the pipeline trace to this file")]
    pub trace: Option<PathBuf>,
    #[clap(long = "stats", help = "write statistics as JSON to this file")]
    pub stats: Option<PathBuf>,
    #[clap(required = true, help = "kernel descriptions (JSON or YAML)")]
    pub kernels: Vec<PathBuf>,
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let start = std::time::Instant::now();
    let options = Options::parse();

    let mut config = match options.config {
        Some(ref path) => config::GPU::from_path(path)
            .wrap_err_with(|| format!("failed to load config {}", path.display()))?,
        None => config::GPU::default(),
    };
    if options.max_cycles.is_some() {
        config.max_cycles = options.max_cycles;
    }
    if options.max_instructions.is_some() {
        config.max_instructions = options.max_instructions;
    }

    let tracer = match options.trace {
        Some(ref path) => Tracer::create(path)
            .wrap_err_with(|| format!("failed to create trace {}", path.display()))?,
        None => Tracer::disabled(),
    };

    let mut timing = Timing::new(Arc::new(config), tracer.into_ref())?;
    for path in &options.kernels {
        let kernel = Kernel::from_path(path)?;
        let id = timing
            .launch(Arc::new(kernel))
            .wrap_err_with(|| format!("failed to launch {}", path.display()))?;
        log::info!("launched {} as ND-range {id}", path.display());
    }

    let finish = timing.run_to_completion();
    let stats = timing.stats();

    match finish {
        Some(reason) => eprintln!(
            "{}",
            style(format!("simulation stopped: {reason}")).yellow().bold()
        ),
        None => eprintln!("{}", style("simulation completed").green().bold()),
    }
    eprintln!("cycles:                 {}", stats.sim.cycles);
    eprintln!("instructions fetched:   {}", stats.sim.fetched_instructions);
    eprintln!("instructions completed: {}", stats.sim.completed_instructions);
    eprintln!("instructions issued:    {}", stats.instructions.total());
    eprintln!("work-groups completed:  {}", stats.sim.completed_work_groups);
    eprintln!("ND-ranges completed:    {}", stats.sim.completed_nd_ranges);

    if let Some(ref path) = options.stats {
        let file = std::fs::File::create(path)
            .wrap_err_with(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), &stats)?;
        log::info!("wrote statistics to {}", path.display());
    }
    eprintln!("simulated in {:?}", start.elapsed());
    Ok(())
}
