// ========================================================================================
//
//                         THE COMMAND-LINE FRONT END: BURDENSTAT
//
// ========================================================================================
//
// This binary is a thin shell around the library. It parses arguments, merges command-line
// overrides into the study configuration, hands everything to the pipeline, and writes or
// prints what comes back. All analytical work lives in the library.

use burdenstat::aggregate::aggregate_lesions;
use burdenstat::classify::classify_cohort;
use burdenstat::config::{MAX_SEED, StudyConfig};
use burdenstat::data::load_lesion_sheet;
use burdenstat::pipeline::{StudyReport, execute};
use burdenstat::report::write_report;
use burdenstat::types::{ObserverScenario, PatientAggregate};
use clap::{Parser, Subcommand, ValueEnum};
use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

// ========================================================================================
//                         COMMAND-LINE INTERFACE DEFINITION
// ========================================================================================

#[derive(Parser, Debug)]
#[clap(
    name = "burdenstat",
    version,
    about = "Tumor-burden response rates with measurement-error reassessment and Monte-Carlo intervals."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline for a study and write its report.
    Run {
        /// Path to the study's TOML config.
        #[arg(long)]
        config: PathBuf,

        /// Directory the report files are written to.
        #[arg(long)]
        out: PathBuf,

        /// Lesion sheet to use instead of the one named in the config.
        #[arg(long)]
        lesions: Option<PathBuf>,

        /// Simulation seed, overriding the config.
        #[arg(long, value_parser = clap::value_parser!(u64).range(0..=MAX_SEED))]
        seed: Option<u64>,

        /// Number of Monte-Carlo trials, overriding the config.
        #[arg(long)]
        trials: Option<usize>,

        /// Observer scenario, overriding the config.
        #[arg(long, value_enum)]
        observer: Option<ObserverArg>,
    },
    /// Aggregate a lesion sheet and print raw response proportions.
    Summarize {
        /// Path to the lesion sheet (TSV).
        #[arg(long)]
        lesions: PathBuf,

        /// Patients absent from the sheet, counted as progressions.
        #[arg(long, default_value = "0")]
        up_patients: usize,
    },
    /// Write a starter study config.
    InitConfig {
        /// Where to write the config.
        path: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ObserverArg {
    Intra,
    Inter,
}

impl From<ObserverArg> for ObserverScenario {
    fn from(arg: ObserverArg) -> Self {
        match arg {
            ObserverArg::Intra => ObserverScenario::Intra,
            ObserverArg::Inter => ObserverScenario::Inter,
        }
    }
}

// ========================================================================================
//                                  MAIN
// ========================================================================================

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let start_time = Instant::now();

    let outcome = match cli.command {
        Command::Run {
            config,
            out,
            lesions,
            seed,
            trials,
            observer,
        } => run(config, out, lesions, seed, trials, observer),
        Command::Summarize {
            lesions,
            up_patients,
        } => summarize(lesions, up_patients),
        Command::InitConfig { path } => init_config(path),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e}");
        let mut source = e.source();
        while let Some(cause) = source {
            eprintln!("  caused by: {cause}");
            source = cause.source();
        }
        process::exit(1);
    }
    log::debug!("Finished in {:.2?}", start_time.elapsed());
}

// ========================================================================================
//                                  SUBCOMMANDS
// ========================================================================================

fn run(
    config_path: PathBuf,
    out: PathBuf,
    lesions: Option<PathBuf>,
    seed: Option<u64>,
    trials: Option<usize>,
    observer: Option<ObserverArg>,
) -> Result<(), Box<dyn Error>> {
    let mut config = StudyConfig::load(&config_path)?;
    if lesions.is_some() {
        config.lesion_sheet = lesions;
    }
    if seed.is_some() {
        config.simulation.seed = seed;
    }
    if let Some(trials) = trials {
        config.simulation.trials = trials;
    }
    if let Some(observer) = observer {
        config.observer = observer.into();
    }

    let report = execute(&config)?;
    let written = write_report(&out, &report)?;
    print_report(&report);
    for path in written {
        println!("> Wrote {}", path.display());
    }
    Ok(())
}

fn summarize(lesions: PathBuf, up_patients: usize) -> Result<(), Box<dyn Error>> {
    let records = load_lesion_sheet(&lesions)?;
    let patients = aggregate_lesions(&records)?;
    let proportions = classify_cohort(&patients, up_patients)?;

    print_patients(&patients);
    println!();
    println!(
        "Cohort size: {} ({} up patients)",
        proportions.cohort_size, up_patients
    );
    println!(
        "Partial response: {} ({:.2}%)",
        proportions.partial_response_count, proportions.partial_response_pct
    );
    println!(
        "Progression:      {} ({:.2}%)",
        proportions.progression_count, proportions.progression_pct
    );
    Ok(())
}

fn init_config(path: PathBuf) -> Result<(), Box<dyn Error>> {
    if path.exists() {
        return Err(format!("Refusing to overwrite existing file '{}'.", path.display()).into());
    }
    StudyConfig::template().save(&path)?;
    println!("> Wrote starter config to {}", path.display());
    Ok(())
}

// ========================================================================================
//                                  HELPER FUNCTIONS
// ========================================================================================

fn print_patients(patients: &[PatientAggregate]) {
    println!(
        "{:>8} {:>6} {:>6} {:>10} {:>10} {:>8} {:>8}",
        "patient", "solid", "lymph", "baseline", "post", "single", "change%"
    );
    for p in patients {
        let single = p
            .single_lesion_size
            .map_or_else(|| "-".to_string(), |s| format!("{s:.1}"));
        println!(
            "{:>8} {:>6} {:>6} {:>10.1} {:>10.1} {:>8} {:>8}",
            p.patient_id,
            p.solid_count,
            p.lymph_count,
            p.baseline_burden,
            p.post_burden,
            single,
            p.percent_change
        );
    }
}

fn print_report(report: &StudyReport) {
    println!(
        "\nStudy: {} / {} ({} tables)",
        report.study_name, report.treatment_name, report.observer
    );
    println!(
        "Raw PR rate:          {:.2}%   Raw progression rate: {:.2}%",
        report.proportions.partial_response_pct, report.proportions.progression_pct
    );
    println!(
        "Corrected PR rate:    {}",
        report.simulation.pr_quantiles
    );
    println!(
        "Corrected progression rate: {}",
        report.simulation.progression_quantiles
    );
    if let Some(seed) = report.seed {
        println!("({} trials, seed {})", report.trials, seed);
    }
}
