/// Hotload host
/// Watches a game crate, rebuilds it on change and swaps each new build
/// into a running fixed-step simulation loop.
///
/// Usage: hotload-host [hotload.toml]

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use hotload_engine::{
    BuildOrchestrator, CargoCompiler, DylibLoader, HotloadConfig, HotloadHost, LogSink, NullConsole, ProjectLayout,
    ReloadEvent,
};

const FIXED_STEP: Duration = Duration::from_millis(16);

fn main() -> Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => HotloadConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => HotloadConfig::default(),
    };
    log::info!("Hotloading {}", config.descriptor_path().display());

    let sink = Arc::new(LogSink);
    let compiler = Arc::new(CargoCompiler::from_config(&config));
    let layout = ProjectLayout::new(config.source_root(), config.descriptor_path())
        .with_references(config.reference_paths());

    let (mut orchestrator, outcomes) =
        BuildOrchestrator::new(compiler, layout, sink.clone()).context("starting build orchestrator")?;
    orchestrator.watch(config.debounce()).context("watching project")?;

    let loader = match config.shadow_dir_path() {
        Some(dir) => DylibLoader::new(dir)?,
        None => DylibLoader::in_temp_dir()?,
    };
    let mut host = HotloadHost::new(loader, outcomes, sink, Box::new(NullConsole));

    orchestrator.request_full_build();

    let mut last_frame = Instant::now();
    let mut accumulator = Duration::ZERO;

    loop {
        for event in host.poll() {
            match event {
                ReloadEvent::Swapped(report) => {
                    log::info!("Running {} {}", report.module, report.generation);
                    for skip in &report.migration.skips {
                        log::debug!("  reset {}: {}", skip.path, skip.reason);
                    }
                }
                ReloadEvent::BuildFailed(diagnostics) => {
                    for diagnostic in &diagnostics {
                        eprintln!("{}", diagnostic);
                    }
                }
                ReloadEvent::Rejected(error) => eprintln!("reload rejected: {}", error),
            }
        }

        let now = Instant::now();
        let frame_time = now - last_frame;
        last_frame = now;
        accumulator += frame_time;

        while accumulator >= FIXED_STEP {
            host.update(FIXED_STEP.as_secs_f32());
            accumulator -= FIXED_STEP;
        }
        host.frame_update(frame_time.as_secs_f32());

        std::thread::sleep(Duration::from_millis(1));
    }
}
