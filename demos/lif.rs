use clap::Parser;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::sync::Arc;

use rusty_dyn::equation::Equation;
use rusty_dyn::error::SimulationError;
use rusty_dyn::input::Waveform;
use rusty_dyn::interop::RateSummary;
use rusty_dyn::model::{Model, Threshold};
use rusty_dyn::monitor::Probe;
use rusty_dyn::population::Population;
use rusty_dyn::scheduler::Simulation;
use rusty_dyn::DEFAULT_DT;

#[derive(Parser, Debug)]
struct Args {
    /// The seed for the Wiener increments
    #[arg(long, default_value = "42")]
    seed: u64,
    /// The number of neurons
    #[arg(short = 'N', long, default_value = "1000")]
    num_neurons: usize,
    /// The simulated duration
    #[arg(short = 'T', long, default_value = "1000.0")]
    duration: f64,
    /// The integration time step
    #[arg(long, default_value_t = DEFAULT_DT)]
    dt: f64,
    /// The injected current
    #[arg(short = 'I', long, default_value = "25.0")]
    current: f64,
    /// The membrane noise amplitude
    #[arg(long, default_value = "0.0")]
    sigma: f64,
    /// The membrane time constant
    #[arg(long, default_value = "10.0")]
    tau: f64,
}

fn lif_model(args: &Args) -> Result<Model, SimulationError> {
    let tau = args.tau;
    let sigma = args.sigma;
    let builder = Model::builder("lif")
        .state("v", -60.0)
        .state("spike", 0.0)
        .state("input", 0.0)
        .input_variable("input")
        .threshold(Threshold::new("v", -54.0).with_reset(-60.0).with_flag("spike"));

    let builder = match sigma > 0.0 {
        true => builder.equation(
            Equation::stochastic(
                "v",
                move |v, _t, deps| (-74.0 - v + deps[0]) / tau,
                move |_v, _t, _deps| sigma,
            )
            .depends_on("input"),
        ),
        false => builder.equation(
            Equation::new("v", move |v, _t, deps| (-74.0 - v + deps[0]) / tau)
                .depends_on("input"),
        ),
    };

    builder.build()
}

fn main() -> Result<(), SimulationError> {
    let args = Args::parse();

    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d(%H:%M:%S)} {l} {m}{n}")))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info))
        .expect("valid logger configuration");
    log4rs::init_config(config).expect("logger initialization");

    let model = Arc::new(lif_model(&args)?);
    let mut sim = Simulation::new(args.dt, args.seed)?;
    let pop = sim.add_population(Population::new(model, args.num_neurons)?);
    sim.add_input(pop, "input", Waveform::Constant(args.current))?;
    let spikes = sim.add_monitor(pop, Probe::Spikes)?;

    let report = sim.run(args.duration)?;
    log::info!(
        "Setup took {:.3} s, stepping took {:.3} s",
        report.setup_seconds,
        report.stepping_seconds
    );

    let monitor = sim.monitor(spikes).expect("registered spike monitor");
    let summary = RateSummary::new(
        "lif",
        monitor.num_events(),
        monitor.num_recorded(),
        report.duration,
    )?;
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).map_err(|e| SimulationError::IOError(e.to_string()))?
    );

    Ok(())
}
