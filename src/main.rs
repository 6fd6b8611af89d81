use anyhow::{Context, bail};
use env_logger::Builder;
use log::{LevelFilter, info};
use std::path::PathBuf;

use wireless_dcf_sim::common::report::Report;
use wireless_dcf_sim::common::scene::{build_simulation, load_scene};

const USAGE: &str = "usage: dcf-sim <scene.json|scene.toml> [--json]";

fn main() -> anyhow::Result<()> {
    // Crate output at debug, everything else at info; RUST_LOG overrides both.
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("wireless_dcf_sim"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    let mut scene_path: Option<PathBuf> = None;
    let mut json = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--json" => json = true,
            "-h" | "--help" => {
                println!("{USAGE}");
                return Ok(());
            }
            _ if scene_path.is_none() => scene_path = Some(PathBuf::from(arg)),
            _ => bail!("unexpected argument '{arg}'\n{USAGE}"),
        }
    }
    let Some(scene_path) = scene_path else {
        bail!("{USAGE}");
    };

    let scene = load_scene(&scene_path).with_context(|| format!("Loading {}", scene_path.display()))?;
    let mut sim = build_simulation(&scene).context("Building simulation")?;

    let started = std::time::Instant::now();
    let events = sim.run_until(scene.duration()).context("Simulation aborted")?;
    info!("Processed {} events in {:.2?}", events, started.elapsed());

    let report = Report::collect(&sim);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}
