use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sim_control::{BinProfile, BinningPhase, HandlerSession, ProberSession, RandomBins, Session};
use sim_setup::{
    build_handler, build_prober, load_equipment, write_run_info, EquipmentKind, EquipmentSetup,
};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "sim_cli", about = "Handler/prober equipment simulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive one piece of equipment with a simulated tester.
    Run {
        /// Maximum number of poll cycles; the run ends early when the lot completes.
        #[arg(long)]
        cycles: u64,
        #[arg(long, default_value = "handler", value_parser = ["handler", "prober"])]
        equipment: String,
        #[arg(long, default_value = "./config")]
        config_dir: String,
        /// Seed for the simulated tester's bin decisions. Random when omitted.
        #[arg(long)]
        seed: Option<u64>,
        /// Bin distribution as a JSON file. Defaults to 90% pass.
        #[arg(long)]
        profile: Option<String>,
        #[arg(long, default_value = "single", value_parser = ["single", "two", "two-verify"])]
        phase: String,
        #[arg(long, default_value_t = 100)]
        print_every: u64,
        /// Log filter used when RUST_LOG is unset.
        #[arg(long, default_value = "info")]
        log_level: String,
        /// Do not write a run directory under runs/.
        #[arg(long)]
        no_run_info: bool,
    },
}

/// Options of one `run` invocation.
struct RunArgs {
    cycles: u64,
    equipment: EquipmentKind,
    config_dir: String,
    seed: Option<u64>,
    profile: Option<String>,
    phase: BinningPhase,
    print_every: u64,
    no_run_info: bool,
}

// ---------------------------------------------------------------------------
// Run directory
// ---------------------------------------------------------------------------

fn generate_run_id(kind: EquipmentKind, seed: u64) -> String {
    let now = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    format!("{now}_{kind}_seed{seed}")
}

fn create_run_dir(run_id: &str) -> Result<std::path::PathBuf> {
    let dir = std::path::PathBuf::from("runs").join(run_id);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating run directory: {}", dir.display()))?;
    Ok(dir)
}

fn write_json<T: serde::Serialize>(dir: &std::path::Path, file: &str, value: &T) -> Result<()> {
    let path = dir.join(file);
    let out =
        std::fs::File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(out, value)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

fn load_profile(path: Option<&str>) -> Result<BinProfile> {
    let Some(path) = path else {
        return Ok(BinProfile::default());
    };
    let json =
        std::fs::read_to_string(path).with_context(|| format!("reading profile: {path}"))?;
    serde_json::from_str(&json).with_context(|| format!("parsing profile: {path}"))
}

fn build_session(
    setup: &EquipmentSetup,
    source: RandomBins,
    phase: BinningPhase,
) -> Result<Box<dyn Session>> {
    Ok(match setup {
        EquipmentSetup::Handler(setup) => {
            Box::new(HandlerSession::new(build_handler(setup)?, source, phase))
        }
        EquipmentSetup::Prober(setup) => Box::new(
            ProberSession::new(build_prober(setup)?, source).context("starting prober session")?,
        ),
    })
}

fn run(args: &RunArgs) -> Result<()> {
    let setup = load_equipment(&args.config_dir, args.equipment)?;
    let profile = load_profile(args.profile.as_deref())?;
    let seed = args.seed.unwrap_or_else(rand::random);
    let mut session = build_session(&setup, RandomBins::new(profile, seed), args.phase)?;
    tracing::info!(equipment = %args.equipment, seed, phase = ?args.phase, "session ready");

    let run_dir = if args.no_run_info {
        None
    } else {
        let run_id = generate_run_id(args.equipment, seed);
        let dir = create_run_dir(&run_id)?;
        write_run_info(
            &dir,
            &run_id,
            seed,
            args.equipment,
            serde_json::json!({
                "runner": "sim_cli",
                "start_time": run_id.split('_').take(2).collect::<Vec<_>>().join("_"),
                "cycles": args.cycles,
                "config_dir": args.config_dir,
                "phase": args.phase,
                "print_every": args.print_every,
            }),
        )?;
        println!("Run directory: {}", dir.display());
        Some(dir)
    };

    println!(
        "Starting {} simulation: cycles={} seed={seed} config_dir={}",
        args.equipment, args.cycles, args.config_dir,
    );
    println!("{}", "-".repeat(80));

    let print_every = args.print_every.max(1);
    let mut cycles_run = 0;
    for cycle in 1..=args.cycles {
        let outcome = session
            .step()
            .with_context(|| format!("cycle {cycle} failed"))?;
        cycles_run = cycle;
        if cycle % print_every == 0 {
            println!("{}", session.status_line());
        }
        if outcome == sim_control::CycleOutcome::LotComplete {
            println!("*** LOT COMPLETE at cycle {cycle} ***");
            break;
        }
    }

    println!("{}", "-".repeat(80));
    println!("Done after {cycles_run} cycles:");
    println!("{}", session.status_line());
    let stats = session.log_statistics();
    println!();
    println!("{stats}");

    if let Some(dir) = run_dir {
        write_json(&dir, "counters.json", session.counters())?;
        write_json(&dir, "statistics.json", &stats)?;
        println!("Results written to {}", dir.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            cycles,
            equipment,
            config_dir,
            seed,
            profile,
            phase,
            print_every,
            log_level,
            no_run_info,
        } => {
            init_tracing(&log_level);
            let equipment = match equipment.as_str() {
                "prober" => EquipmentKind::Prober,
                _ => EquipmentKind::Handler,
            };
            let phase = match phase.as_str() {
                "two" => BinningPhase::Two { verify: false },
                "two-verify" => BinningPhase::Two { verify: true },
                _ => BinningPhase::Single,
            };
            run(&RunArgs {
                cycles,
                equipment,
                config_dir,
                seed,
                profile,
                phase,
                print_every,
                no_run_info,
            })?;
        }
    }
    Ok(())
}
