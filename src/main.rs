use anyhow::{bail, Context, Result};
use chromasift::engine::{validate_target_fps, DirectorySource, NullSink, PngDirectorySink, StillImageSource};
use chromasift::preset::CUSTOM_PRESET_ID;
use chromasift::{
    hex_to_rgb, log_error, log_info, log_warn, ChipMode, EngineConfig, FilterEngine, FilterSession,
    StateManager, UnselectedTreatment,
};
use std::path::PathBuf;

const USAGE: &str = "\
Usage: chromasift [--stream-logs] <command>

Commands:
  presets                       List available presets
  run --input <file|dir>        Filter a still image or a directory of frames
      [--output <dir>]          Write composited frames as PNG
      [--preset <id>]
      [--include <hex>]...      Reveal (and recolor) pixels near this color
      [--exclude <hex>]...      Suppress pixels near this color
      [--fps <n>]               Pacing up to 1000, 0 for unpaced
      [--frames <n>]            Stop after n frames
      [--treatment <t>]         passthrough | grayscale | dim:<level>";

#[derive(Debug, Default)]
struct RunArgs {
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    preset: Option<String>,
    chips: Vec<(String, ChipMode)>,
    fps: Option<f32>,
    frames: Option<u64>,
    treatment: Option<UnselectedTreatment>,
}

fn main() -> Result<()> {
    let result = run_app();
    if let Err(e) = &result {
        log_error!("{:#}", e);
    }
    let _ = chromasift::logger::finalize_logs();
    result
}

fn run_app() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let enable_file_logging = args.contains(&"--stream-logs".to_string());
    let args: Vec<&str> = args.iter().map(String::as_str).filter(|a| *a != "--stream-logs").collect();

    let Some((&command, rest)) = args.split_first() else {
        println!("{}", USAGE);
        return Ok(());
    };

    let state = StateManager::new()?;
    let log_retention = state.read(|s| s.log_retention_count);
    chromasift::logger::init_logger(state.logs_dir(), "chromasift", log_retention, enable_file_logging)?;

    log_info!("ChromaSift {} started", env!("CARGO_PKG_VERSION"));
    if let Some(log_path) = chromasift::logger::get_log_path() {
        log_info!("Log file: {}", log_path.display());
    }
    if enable_file_logging {
        log_info!("Streaming mode enabled via --stream-logs");
    } else {
        log_info!("Buffered mode - logs will be written to file on exit");
    }

    match command {
        "presets" => list_presets(&state),
        "run" => run_filter(&state, parse_run_args(rest)?),
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
}

fn list_presets(state: &StateManager) -> Result<()> {
    let presets = state.load_presets();
    let last = state.read(|s| s.last_preset.clone());
    for preset in presets.list() {
        let marker = if preset.id == last { "*" } else { " " };
        let kind = if preset.is_chip_composite() { "chips" } else { "static" };
        println!("{} {:<16} {:<24} [{}]", marker, preset.id, preset.name, kind);
    }

    let luts = state.list_lut_files();
    if !luts.is_empty() {
        println!("\nLUTs in {}:", state.luts_dir().display());
        for lut in luts {
            println!("  {}", lut);
        }
    }
    Ok(())
}

fn parse_run_args(args: &[&str]) -> Result<RunArgs> {
    let mut parsed = RunArgs::default();
    let mut iter = args.iter();

    while let Some(&flag) = iter.next() {
        let mut value = || {
            iter.next()
                .copied()
                .with_context(|| format!("Missing value for {}", flag))
        };
        match flag {
            "--input" => parsed.input = Some(PathBuf::from(value()?)),
            "--output" => parsed.output = Some(PathBuf::from(value()?)),
            "--preset" => parsed.preset = Some(value()?.to_string()),
            "--include" => parsed.chips.push((value()?.to_string(), ChipMode::Include)),
            "--exclude" => parsed.chips.push((value()?.to_string(), ChipMode::Exclude)),
            "--fps" => {
                let fps: f32 = value()?.parse().context("Invalid --fps")?;
                parsed.fps = Some(if fps == 0.0 { 0.0 } else { validate_target_fps(fps)? });
            }
            "--frames" => parsed.frames = Some(value()?.parse().context("Invalid --frames")?),
            "--treatment" => parsed.treatment = Some(value()?.parse()?),
            other => bail!("Unknown option '{}'\n\n{}", other, USAGE),
        }
    }

    if parsed.input.is_none() {
        bail!("run requires --input\n\n{}", USAGE);
    }
    Ok(parsed)
}

fn run_filter(state: &StateManager, args: RunArgs) -> Result<()> {
    let input = args.input.context("run requires --input")?;
    let stored = state.read(|s| s.clone());

    let mut session = FilterSession::new(state.load_presets()).with_lut_dir(state.luts_dir());
    session.set_adjustments(stored.adjustments)?;
    session.set_treatment(args.treatment.unwrap_or(stored.treatment))?;

    configure_session(&mut session, args.preset.as_deref(), &stored.last_preset, &args.chips)?;

    let active_preset = session.presets().active_id().to_string();
    log_info!(
        "Filter: preset '{}', {} chips, treatment {}",
        active_preset,
        session.registry().len(),
        session.treatment()
    );

    let target_fps = match args.fps.or(stored.target_fps) {
        Some(fps) if fps > 0.0 => Some(fps),
        _ => None,
    };
    let config = EngineConfig {
        target_fps,
        max_frames: args.frames,
    };

    let engine = FilterEngine::new(session);
    if input.is_dir() {
        let source = DirectorySource::open(&input)?;
        log_info!("Reading {} frames from {}", source.len(), input.display());
        start_with_sink(&engine, source, args.output.as_ref(), config)?;
    } else {
        // A still image is shown once unless a frame count is given
        let source = StillImageSource::open(&input, Some(args.frames.unwrap_or(1)))?;
        start_with_sink(&engine, source, args.output.as_ref(), config)?;
    }

    let report = engine.wait().context("Engine thread ended abnormally")?;
    println!(
        "{} frames presented, {} skipped, {} errors",
        report.frames_presented, report.frames_skipped, report.errors
    );

    if active_preset != CUSTOM_PRESET_ID {
        state.update(|s| s.last_preset = active_preset.clone());
    }
    if args.fps.is_some() {
        state.update(|s| s.target_fps = target_fps);
    }

    if report.errors > 0 {
        bail!("{} frames failed to render", report.errors);
    }
    Ok(())
}

/// Add the requested chips, then apply the preset so its stages stack on top
/// of the chips. The remembered preset is used only for a chipless run.
fn configure_session(
    session: &mut FilterSession,
    preset: Option<&str>,
    remembered: &str,
    chips: &[(String, ChipMode)],
) -> Result<()> {
    for (hex, mode) in chips {
        let color = hex_to_rgb(hex).with_context(|| format!("Invalid chip color '{}'", hex))?;
        session.add_chip(color, *mode)?;
    }

    match preset {
        Some(id) => session
            .select_preset(id)
            .with_context(|| format!("Unknown preset '{}'", id))?,
        None if chips.is_empty() => {
            if let Err(e) = session.select_preset(remembered) {
                log_warn!("Preset '{}' unavailable ({}), using default", remembered, e);
            }
        }
        None => {}
    }
    Ok(())
}

fn start_with_sink<S>(engine: &FilterEngine, source: S, output: Option<&PathBuf>, config: EngineConfig) -> Result<()>
where
    S: chromasift::FrameSource + 'static,
{
    match output {
        Some(dir) => {
            log_info!("Writing frames to {}", dir.display());
            engine.start(source, PngDirectorySink::create(dir)?, config);
        }
        None => engine.start(source, NullSink, config),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chips(list: &[(&str, ChipMode)]) -> Vec<(String, ChipMode)> {
        list.iter().map(|(hex, mode)| (hex.to_string(), *mode)).collect()
    }

    #[test]
    fn test_preset_stages_stack_on_cli_chips() {
        let mut session = FilterSession::default();
        configure_session(&mut session, Some("blue"), "original", &chips(&[("#FF0000", ChipMode::Include)])).unwrap();

        assert_eq!(session.presets().active_id(), "blue");
        assert_eq!(session.presets().active().stages().lut, Some("blue-filter.png"));

        let state = session.build_state();
        assert_eq!(state.block.active_count, 1);
        assert_eq!(state.block.correction_count, 1);
    }

    #[test]
    fn test_chips_without_preset_stay_custom() {
        let mut session = FilterSession::default();
        configure_session(&mut session, None, "blue", &chips(&[("00FF00", ChipMode::Exclude)])).unwrap();
        assert_eq!(session.presets().active_id(), CUSTOM_PRESET_ID);
        assert_eq!(session.build_state().block.correction_count, 0);
    }

    #[test]
    fn test_remembered_preset_for_chipless_run() {
        let mut session = FilterSession::default();
        configure_session(&mut session, None, "blue", &[]).unwrap();
        assert_eq!(session.presets().active_id(), "blue");

        let mut session = FilterSession::default();
        configure_session(&mut session, None, "gone", &[]).unwrap();
        assert_eq!(session.presets().active_id(), "original");
    }

    #[test]
    fn test_explicit_unknown_preset_fails() {
        let mut session = FilterSession::default();
        assert!(configure_session(&mut session, Some("gone"), "original", &[]).is_err());
    }

    #[test]
    fn test_fps_is_range_checked() {
        assert_eq!(parse_run_args(&["--input", "a.png", "--fps", "0"]).unwrap().fps, Some(0.0));
        assert_eq!(parse_run_args(&["--input", "a.png", "--fps", "60"]).unwrap().fps, Some(60.0));
        assert!(parse_run_args(&["--input", "a.png", "--fps", "1e-39"]).is_err());
        assert!(parse_run_args(&["--input", "a.png", "--fps", "5000"]).is_err());
        assert!(parse_run_args(&["--input", "a.png", "--fps", "-1"]).is_err());
    }
}
