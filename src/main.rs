use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, ValueEnum};
use voicecast::{
    Config, Device, EngineRegistry, GenerationOrchestrator, GenerationRequest, OrchestratorOptions,
    ParamValue,
};

/// Clone a voice from a short reference recording and speak text with it.
#[derive(Parser, Debug)]
#[command(name = "voicecast", version)]
struct Cli {
    /// Reference recording of the voice to clone
    #[arg(short = 'i', long, value_name = "WAV", required_unless_present = "list_engines")]
    reference_audio: Option<PathBuf>,

    /// Text to speak
    #[arg(short, long, required_unless_present = "list_engines")]
    text: Option<String>,

    /// Output file [default: generated_audio_<timestamp>.wav in the output directory]
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = EngineChoice::Multilingual)]
    engine: EngineChoice,

    /// Language code
    #[arg(short, long, default_value = "en")]
    language: String,

    /// Text adherence, 0.0-1.0 (expressive engines)
    #[arg(long)]
    cfg_weight: Option<f64>,

    /// Expressiveness, 0.0-1.5 (expressive engines)
    #[arg(long)]
    exaggeration: Option<f64>,

    /// Sampling temperature, 0.1-1.0 (multilingual engine)
    #[arg(long)]
    temperature: Option<f64>,

    /// Conditioning length, 32-256 (multilingual engine)
    #[arg(long)]
    gpt_cond_len: Option<i64>,

    /// Playback speed; also shifts pitch
    #[arg(long, default_value_t = 1.0)]
    speed: f32,

    /// Play the result after saving it
    #[arg(long)]
    play: bool,

    /// Compute device [default: cuda when available]
    #[arg(long, value_enum)]
    device: Option<DeviceChoice>,

    /// Config file
    #[arg(long, env = "VOICECAST_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// List engines with their availability and exit
    #[arg(long)]
    list_engines: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EngineChoice {
    Multilingual,
    ExpressiveFast,
    ExpressiveQuality,
}

impl EngineChoice {
    fn id(&self) -> &'static str {
        match self {
            EngineChoice::Multilingual => "multilingual",
            EngineChoice::ExpressiveFast => "expressive-fast",
            EngineChoice::ExpressiveQuality => "expressive-quality",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DeviceChoice {
    Cpu,
    Cuda,
}

impl From<DeviceChoice> for Device {
    fn from(choice: DeviceChoice) -> Self {
        match choice {
            DeviceChoice::Cpu => Device::Cpu,
            DeviceChoice::Cuda => Device::Cuda,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> voicecast::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let registry = EngineRegistry::with_default_engines(&config);

    if cli.list_engines {
        for (id, name) in registry.engine_info() {
            let status = if registry.is_available(&id) {
                "available"
            } else {
                "unavailable"
            };
            println!("{id}\t{name}\t{status}");
        }
        return Ok(());
    }

    let (Some(reference), Some(text)) = (cli.reference_audio, cli.text) else {
        Cli::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "--reference-audio and --text are required unless --list-engines is given",
            )
            .exit();
    };

    let mut options = OrchestratorOptions::from_config(&config);
    if let Some(device) = cli.device {
        options = options.with_device(device.into());
    }
    let orchestrator = GenerationOrchestrator::new(&registry, cli.engine.id(), &reference, options)?;

    let mut builder = GenerationRequest::builder();
    builder
        .text(text)
        .language(cli.language)
        .engine_id(cli.engine.id())
        .persist(true)
        .play(cli.play)
        .speed(cli.speed);
    if let Some(path) = cli.output {
        builder.output_path(path);
    }

    let overrides: [(&str, Option<ParamValue>); 4] = [
        ("cfg_weight", cli.cfg_weight.map(ParamValue::Float)),
        ("exaggeration", cli.exaggeration.map(ParamValue::Float)),
        ("temperature", cli.temperature.map(ParamValue::Float)),
        ("gpt_cond_len", cli.gpt_cond_len.map(ParamValue::Int)),
    ];
    for (name, value) in overrides {
        let Some(value) = value else { continue };
        if orchestrator.engine_parameters().contains(name) {
            builder.parameter(name, value);
        } else {
            log::warn!("--{} is not used by {}; ignoring it", name.replace('_', "-"), orchestrator.engine_name());
        }
    }

    let outcome = orchestrator.generate(builder.build()?)?.wait()?;
    if let Some(path) = outcome.saved_to {
        println!("{}", path.display());
    }
    Ok(())
}
