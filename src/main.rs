//! `class-change`: watch one deployment's external directories and push changes live.
//!
//! No redefinition agent is attached to the standalone binary, so every
//! accepted class change is applied by redeploying through the deployment
//! scanner's marker files.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};

use class_change::compile::CommandCompiler;
use class_change::config::{self, Settings};
use class_change::deployment::{MarkerFileController, PassReport};
use class_change::loader::StaticClassLoader;
use class_change::known;
use class_change::logging;
use class_change::redefine::{RedefinitionOutcome, UnavailableAgent};
use class_change::{ClassChangeRegistry, DeploymentUnit, ScanOutcome};
use tracing::{info, warn};

#[derive(Debug, Default)]
struct CliArgs {
    deployment: PathBuf,
    settings_file: Option<PathBuf>,
    temp_dir: Option<PathBuf>,
    interval_ms: Option<u64>,
    javac: Option<String>,
    class_path: Vec<PathBuf>,
    once: bool,
    json: bool,
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("class-change: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), String> {
    let args = parse_args(std::env::args().skip(1).collect())?;
    let settings = load_settings(&args)?;
    // Archive entry times are read in local time; capture the zone while single-threaded.
    known::local_offset();
    if let Err(err) = logging::init(None) {
        eprintln!("Logging disabled: {err}");
    }

    let deployment = std::path::absolute(&args.deployment).map_err(|err| err.to_string())?;
    let unit = DeploymentUnit::from_path(&deployment)
        .ok_or_else(|| format!("Invalid deployment path {}", deployment.display()))?;
    let compiler = CommandCompiler::new(
        settings.compiler.program.clone(),
        settings.compiler.args.clone(),
    );
    let registry = ClassChangeRegistry::new(
        settings.temp_dir(),
        Arc::new(compiler),
        Arc::new(UnavailableAgent),
    );
    let controller = MarkerFileController::new(&deployment, settings.stability_timeout())
        .map_err(|err| err.to_string())?;
    let support = registry
        .activate(unit.clone(), Arc::new(controller))
        .map_err(|err| err.to_string())?;
    if support.remote_password().is_some() {
        warn!(deployment = %unit.name, "Remote push mode configured; local directories are not scanned");
    }
    registry
        .module_resolved(&unit.name, Arc::new(StaticClassLoader::new(args.class_path.clone())))
        .map_err(|err| err.to_string())?;

    let watched = run(&registry, &settings, &args);
    let unmounted = registry.undeploy(&unit.name).map_err(|err| err.to_string());
    watched?;
    let outcome = unmounted?;
    info!(deployment = %unit.name, outcome = ?outcome, "Stopped watching");
    Ok(())
}

fn load_settings(args: &CliArgs) -> Result<Settings, String> {
    let mut settings = match &args.settings_file {
        Some(path) => config::load_from(path),
        None => config::load_or_default(),
    }
    .map_err(|err| err.to_string())?;
    if let Some(dir) = &args.temp_dir {
        settings.temp_dir = Some(dir.clone());
    }
    if let Some(interval) = args.interval_ms {
        settings.scan_interval_ms = interval;
    }
    if let Some(program) = &args.javac {
        settings.compiler.program = program.clone();
    }
    Ok(settings)
}

fn run(registry: &ClassChangeRegistry, settings: &Settings, args: &CliArgs) -> Result<(), String> {
    loop {
        for (name, result) in registry.scan_all() {
            match result {
                Ok(outcome) => report(&name, &outcome, args.json),
                // Failed scans are retried from scratch on the next tick.
                Err(err) if !args.once => warn!(deployment = %name, error = %err, "Scan failed"),
                Err(err) => return Err(format!("{name}: {err}")),
            }
        }
        if args.once {
            return Ok(());
        }
        thread::sleep(settings.scan_interval());
    }
}

fn report(name: &str, outcome: &ScanOutcome, json: bool) {
    for pass in outcome.passes().iter().filter(|pass| !pass.is_empty()) {
        if json {
            println!("{}", pass_json(name, pass));
        } else {
            info!(
                deployment = %name,
                compiled = pass.compiled_sources.len(),
                modified = pass.modified.len(),
                added = pass.added.len(),
                web_resources = pass.web_resources.len(),
                outcome = ?pass.outcome,
                "Changes applied"
            );
        }
    }
}

fn pass_json(name: &str, pass: &PassReport) -> serde_json::Value {
    let outcome = match &pass.outcome {
        None => serde_json::Value::Null,
        Some(RedefinitionOutcome::Redefined { changed, added }) => serde_json::json!({
            "kind": "redefined",
            "changed": changed,
            "added": added,
        }),
        Some(RedefinitionOutcome::Redeployed { elapsed }) => serde_json::json!({
            "kind": "redeployed",
            "elapsed_ms": elapsed.as_millis() as u64,
        }),
    };
    serde_json::json!({
        "deployment": name,
        "compiled_sources": pass.compiled_sources,
        "modified": pass.modified,
        "added": pass.added,
        "web_resources": pass.web_resources,
        "outcome": outcome,
    })
}

fn parse_args(args: Vec<String>) -> Result<CliArgs, String> {
    if args.iter().any(|a| a == "-h" || a == "--help") {
        return Err(help_text());
    }
    let mut parsed = CliArgs::default();
    let mut deployment = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--deployment" => {
                deployment = Some(PathBuf::from(next_value(&args, &mut i, "--deployment")?));
            }
            "--settings" => {
                parsed.settings_file = Some(PathBuf::from(next_value(&args, &mut i, "--settings")?));
            }
            "--temp-dir" => {
                parsed.temp_dir = Some(PathBuf::from(next_value(&args, &mut i, "--temp-dir")?));
            }
            "--interval-ms" => {
                let value = next_value(&args, &mut i, "--interval-ms")?;
                let interval = value
                    .parse()
                    .map_err(|_| format!("Invalid --interval-ms '{value}'"))?;
                parsed.interval_ms = Some(interval);
            }
            "--javac" => {
                parsed.javac = Some(next_value(&args, &mut i, "--javac")?);
            }
            "--classpath" => {
                let value = next_value(&args, &mut i, "--classpath")?;
                parsed.class_path = split_class_path(&value);
            }
            "--once" => parsed.once = true,
            "--json" => parsed.json = true,
            unknown => return Err(format!("Unknown argument '{unknown}'\n\n{}", help_text())),
        }
        i += 1;
    }
    parsed.deployment =
        deployment.ok_or_else(|| format!("Missing --deployment\n\n{}", help_text()))?;
    Ok(parsed)
}

fn split_class_path(value: &str) -> Vec<PathBuf> {
    std::env::split_paths(value)
        .filter(|path| path != Path::new(""))
        .collect()
}

fn next_value(args: &[String], i: &mut usize, name: &str) -> Result<String, String> {
    let next = args.get(*i + 1).ok_or_else(|| format!("Missing value for {name}"))?;
    *i += 1;
    Ok(next.clone())
}

fn help_text() -> String {
    "Usage: class-change --deployment <path> [options]\n\n\
Options:\n\
  --deployment <path>     Deployed archive or exploded directory to watch\n\
  --settings <file>       Settings file (default: <config dir>/.class-change/class-change.toml)\n\
  --temp-dir <dir>        Directory for archive replacement stores\n\
  --interval-ms <n>       Scan interval in milliseconds (default: 2000)\n\
  --javac <program>       Compiler executable (default: javac)\n\
  --classpath <p1:p2>     Class path handed to the compiler\n\
  --once                  Scan once and exit\n\
  --json                  Print applied changes as JSON lines\n\
  -h, --help              Show help\n"
        .to_string()
}
