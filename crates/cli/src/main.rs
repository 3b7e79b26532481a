use anyhow::Context;
use clap::{Parser, ValueEnum};
use lipflap_core::artwork::{FileSpriteSource, OpenAiImageGenerator, SpriteSource};
use lipflap_core::compose::FfmpegCompositor;
use lipflap_core::config::{
    resolve_api_key, resolve_string_with_default, AnalysisConfig, AnalysisRate, ApiKeys,
    AppConfig, EnvelopeStrategy, FrameRate, Language, RenderSettings, StdEnv, ThresholdConfig,
    DEFAULT_ANALYSIS_RATE_HZ, DEFAULT_FIXED_THRESHOLD, DEFAULT_FPS, DEFAULT_LANGUAGE,
    DEFAULT_NOISE_FLOOR, DEFAULT_OUTPUT_FILE, DEFAULT_SENSITIVITY, DEFAULT_SPRITE_EDGE_PX,
    ENV_LIPFLAP_LANGUAGE, ENV_OPENAI_API_KEY,
};
use lipflap_core::decode::{AudioLoader, FfmpegAudioLoader, SymphoniaAudioLoader};
use lipflap_core::design::{CharacterDesigner, OpenAiCharacterDesigner, TemplateDesigner};
use lipflap_core::pipeline::{analyze, Analysis, Pipeline, PipelineConfig, PipelineOutcome, RunRequest};
use lipflap_core::sequence::Smoothing;
use lipflap_core::transcribe::{NullTranscriber, OpenAiTranscriber, Transcriber};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ThresholdMode {
    Fixed,
    Adaptive,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EnvelopeMode {
    PerStep,
    WholeClip,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LoaderKind {
    Symphonia,
    Ffmpeg,
}

#[derive(Parser, Debug)]
#[command(name = "lipflap")]
#[command(about = "Animate a two-pose cartoon mouth from a speech clip and export it as video")]
struct Args {
    /// Spoken audio clip (wav, mp3, ogg, flac, m4a, ...)
    audio: PathBuf,

    #[arg(short, long, default_value = DEFAULT_OUTPUT_FILE)]
    output: PathBuf,

    #[arg(long, default_value_t = DEFAULT_FPS)]
    fps: u32,

    #[arg(long, value_enum, default_value_t = ThresholdMode::Fixed)]
    threshold: ThresholdMode,

    #[arg(long, default_value_t = DEFAULT_FIXED_THRESHOLD)]
    fixed_threshold: f32,

    /// Multiplier on the clip's mean loudness (adaptive mode, must be > 1)
    #[arg(long, default_value_t = DEFAULT_SENSITIVITY)]
    sensitivity: f32,

    /// Lowest adaptive threshold, keeps background hiss closed
    #[arg(long, default_value_t = DEFAULT_NOISE_FLOOR)]
    floor: f32,

    #[arg(long, value_enum, default_value_t = EnvelopeMode::WholeClip)]
    envelope: EnvelopeMode,

    #[arg(long, default_value_t = DEFAULT_ANALYSIS_RATE_HZ)]
    analysis_rate: u32,

    /// Only change pose after this many consecutive disagreeing frames
    #[arg(long)]
    hysteresis: Option<u32>,

    #[arg(long, value_enum, default_value_t = LoaderKind::Symphonia)]
    loader: LoaderKind,

    #[arg(long, requires = "closed_image")]
    open_image: Option<PathBuf>,

    #[arg(long, requires = "open_image")]
    closed_image: Option<PathBuf>,

    /// Extra description for the generated character
    #[arg(long)]
    hint: Option<String>,

    /// Style prefix for generated character art
    #[arg(long)]
    style: Option<String>,

    /// Describe the character with a fixed sentence instead of the chat model
    #[arg(long, default_value_t = false)]
    template_design: bool,

    #[arg(long)]
    openai_api_key: Option<String>,

    #[arg(long)]
    language: Option<String>,

    #[arg(long, default_value_t = DEFAULT_SPRITE_EDGE_PX)]
    sprite_size: u32,

    /// Also write the analysed timeline as JSON
    #[arg(long)]
    timeline_json: Option<PathBuf>,

    /// Stop after analysis; no transcription, design, art or rendering
    #[arg(long, default_value_t = false)]
    analyze_only: bool,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let env = StdEnv;
    let cfg = build_config(&args, &env)?;

    tracing::info!(
        fps = cfg.analysis.fps.get(),
        threshold = ?cfg.analysis.threshold,
        envelope = ?cfg.analysis.envelope,
        "config loaded"
    );

    let loader: Box<dyn AudioLoader> = match args.loader {
        LoaderKind::Symphonia => Box::new(SymphoniaAudioLoader::new()),
        LoaderKind::Ffmpeg => Box::new(FfmpegAudioLoader::default()),
    };

    if args.analyze_only {
        return analyze_only(&args, &cfg, loader.as_ref()).await;
    }

    run_render(args, cfg, loader).await
}

async fn analyze_only(args: &Args, cfg: &AppConfig, loader: &dyn AudioLoader) -> anyhow::Result<()> {
    let signal = loader
        .load(&args.audio)
        .await
        .with_context(|| format!("failed to decode {}", args.audio.display()))?;
    let analysis = analyze(&signal, &cfg.analysis)?;
    print_summary(&analysis);
    if let Some(path) = &args.timeline_json {
        write_timeline_json(path, &analysis)?;
    }
    Ok(())
}

type Collaborators = (
    Box<dyn Transcriber>,
    Box<dyn CharacterDesigner>,
    Box<dyn SpriteSource>,
);

fn collaborators(args: &Args, cfg: &AppConfig) -> anyhow::Result<Collaborators> {
    if let (Some(open), Some(closed)) = (args.open_image.clone(), args.closed_image.clone()) {
        return Ok((
            Box::new(NullTranscriber),
            Box::new(TemplateDesigner),
            Box::new(FileSpriteSource::new(open, closed)),
        ));
    }

    let key = cfg.api_keys.openai.clone().with_context(|| {
        format!(
            "pass --open-image/--closed-image, or provide --openai-api-key \
             (or {ENV_OPENAI_API_KEY}) to generate the character"
        )
    })?;
    let mut artist = OpenAiImageGenerator::new(key.clone());
    if let Some(style) = args.style.clone() {
        artist = artist.with_style(style);
    }
    let designer: Box<dyn CharacterDesigner> = if args.template_design {
        Box::new(TemplateDesigner)
    } else {
        Box::new(OpenAiCharacterDesigner::new(key.clone()))
    };
    Ok((
        Box::new(OpenAiTranscriber::new(key, cfg.language.clone())),
        designer,
        Box::new(artist),
    ))
}

async fn run_render(args: Args, cfg: AppConfig, loader: Box<dyn AudioLoader>) -> anyhow::Result<()> {
    let (transcriber, designer, sprites) = collaborators(&args, &cfg)?;

    let pipeline = Pipeline {
        loader,
        transcriber,
        designer,
        sprites,
        compositor: FfmpegCompositor::new(cfg.render.clone()),
        config: PipelineConfig::from_app(&cfg),
    };

    let request = RunRequest {
        audio: args.audio.clone(),
        output: args.output.clone(),
        hint: args.hint.clone(),
    };

    let outcome = pipeline.run(&request).await.map_err(|e| {
        if e.is_resource_exhaustion() {
            tracing::error!(error = %e, "render ran out of resources");
        }
        anyhow::Error::new(e)
    })?;

    report_outcome(&outcome, args.timeline_json.as_deref())
}

fn report_outcome(outcome: &PipelineOutcome, timeline_json: Option<&Path>) -> anyhow::Result<()> {
    if let Some(path) = timeline_json {
        write_timeline_json(path, outcome.analysis())?;
    }
    match outcome {
        PipelineOutcome::Skipped { audio, .. } => {
            tracing::warn!(path = %audio.display(), "audio is empty; no video written");
        }
        PipelineOutcome::Rendered(report) => {
            print_summary(&report.analysis);
            if !report.transcript.text.is_empty() {
                println!("transcript: {}", report.transcript.text);
            }
            if !report.character.text.is_empty() {
                println!("character: {}", report.character.text);
            }
            println!("{}", report.output.path.display());
        }
    }
    Ok(())
}

fn print_summary(analysis: &Analysis) {
    let runs = analysis.timeline.runs();
    println!(
        "{:.2}s, {} frames, {} pose changes, threshold {:.4}, mouth open {:.0}% of the time",
        analysis.duration.as_secs_f64(),
        analysis.timeline.len(),
        runs.len().saturating_sub(1),
        analysis.threshold.value(),
        analysis.timeline.open_ratio() * 100.0
    );
}

fn write_timeline_json(path: &Path, analysis: &Analysis) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(analysis).context("failed to serialize timeline")?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "timeline written");
    Ok(())
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn build_config(args: &Args, env: &impl lipflap_core::config::Env) -> anyhow::Result<AppConfig> {
    let fps = FrameRate::new(args.fps)?;

    let envelope = match args.envelope {
        EnvelopeMode::PerStep => EnvelopeStrategy::PerStep,
        EnvelopeMode::WholeClip => EnvelopeStrategy::WholeClip {
            analysis_rate: AnalysisRate::new(args.analysis_rate)?,
        },
    };

    let threshold = match args.threshold {
        ThresholdMode::Fixed => ThresholdConfig::Fixed {
            value: args.fixed_threshold,
        },
        ThresholdMode::Adaptive => ThresholdConfig::Adaptive {
            sensitivity: args.sensitivity,
            floor: args.floor,
        },
    };
    // Reject bad parameters before any audio is decoded.
    threshold.build().context("invalid threshold settings")?;

    let smoothing = match args.hysteresis {
        Some(frames) => Smoothing::hysteresis(frames)?,
        None => Smoothing::None,
    };

    let openai = resolve_api_key(args.openai_api_key.clone(), ENV_OPENAI_API_KEY, env)?;
    let language = Language::new(resolve_string_with_default(
        args.language.clone(),
        ENV_LIPFLAP_LANGUAGE,
        env,
        DEFAULT_LANGUAGE,
    ))?;

    Ok(AppConfig {
        analysis: AnalysisConfig {
            fps,
            envelope,
            threshold,
            smoothing,
        },
        render: RenderSettings::default().with_sprite_edge(args.sprite_size)?,
        api_keys: ApiKeys { openai },
        language,
    })
}
