use chrono::Utc;
use clap::Parser;
use config::ConfigError;
use env_logger::Env;
use log::{LevelFilter, info, warn};
use rusty_scope::{
    AppConfig, MeasurementFunction, RigolDs1054, ScopeError, VerticalCoupling, Waveform,
    plot_waveform, read_config,
};
use std::{fs, path::PathBuf};

/// Rigol DS1054 smoke test
#[derive(Parser, Debug)]
#[command(name = "scope-smoke")]
#[command(about = "Exercise a Rigol DS1054 through the IVI style driver", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Instrument resource, e.g. USB0::6833::1230::INSTR
    #[arg(short, long, value_name = "RESOURCE")]
    resource: Option<String>,

    /// Run without touching the instrument
    #[arg(short, long)]
    simulate: bool,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Plot the fetched waveform in the terminal
    #[arg(short, long)]
    plot: bool,

    /// Save the fetched waveform as JSON
    #[arg(long)]
    save: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_settings(&args)?;

    let log_level = args
        .log_level
        .clone()
        .unwrap_or(config.console.verbosity.clone());
    initialize_logging(&log_level)?;
    log_startup_info(&config);

    let mut scope = setup_driver(&config)?;
    let waveform = run_smoke_test(&mut scope)?;

    if config.output.plot {
        if let Err(e) = plot_waveform(&waveform, None, None) {
            warn!("Not plotting: {e}");
        }
    }
    if config.output.save_waveform {
        let path = save_waveform(&waveform, &config.output.output_path)?;
        info!("Waveform saved to {}", path.display());
    }

    scope.close();
    Ok(())
}

/// Configuration with command line overrides applied, then validated
fn load_settings(args: &Args) -> Result<AppConfig, ConfigError> {
    let mut config = read_config(args.config.as_deref())?;
    apply_overrides(&mut config, args);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if let Some(ref resource) = args.resource {
        config.instrument.resource = resource.clone();
    }
    if args.simulate {
        config.instrument.simulate = true;
    }
    if args.plot {
        config.output.plot = true;
    }
    if args.save {
        config.output.save_waveform = true;
    }
}

fn initialize_logging(log_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => {
            eprintln!("Warning: Invalid log level '{}', using 'info'", log_level);
            LevelFilter::Info
        }
    };

    env_logger::Builder::from_env(Env::default())
        .filter_level(level)
        .format_timestamp_millis()
        .init();

    Ok(())
}

fn log_startup_info(config: &AppConfig) {
    info!("=== Rigol DS1054 smoke test ===");
    if config.instrument.simulate {
        info!("Simulating instrument {}", config.instrument.resource);
    } else {
        info!("Instrument: {}", config.instrument.resource);
    }
    info!(
        "ID query: {}, reset: {}, cache: {}",
        config.instrument.id_query, config.instrument.reset, config.instrument.cache
    );
}

fn setup_driver(config: &AppConfig) -> Result<RigolDs1054, ScopeError> {
    let scope = RigolDs1054::builder()
        .resource(&config.instrument.resource)
        .options(config.instrument.driver_options())
        .config(config.connection.to_connection_config())
        .id_query(config.instrument.id_query)
        .reset(config.instrument.reset)
        .build()?;
    info!("Driver ready with {} channels", scope.channel_count());
    Ok(scope)
}

fn run_smoke_test(scope: &mut RigolDs1054) -> Result<Waveform, ScopeError> {
    info!(
        "Instrument: {} {}",
        scope.identity_instrument_manufacturer()?,
        scope.identity_instrument_model()?
    );

    scope.display_clear()?;
    scope.set_acquisition_time_per_record(1e-3)?;

    scope.set_channel_enabled("channel1", false)?;
    scope.set_channel_enabled("channel2", false)?;
    scope.set_channel_enabled("channel1", true)?;
    scope.set_channel_enabled("channel2", false)?;

    scope.set_channel_coupling("channel1", VerticalCoupling::Dc)?;
    scope.set_channel_offset("channel1", 1.0)?;
    println!("channel1 offset: {}", scope.channel_offset("channel1")?);
    println!("channel1 range: {}", scope.channel_range(0)?);

    scope.initiate()?;
    let waveform = scope.fetch_waveform(0)?;
    info!(
        "Fetched {} samples starting at {:e} s",
        waveform.len(),
        waveform.x_origin
    );

    match scope.fetch_waveform_measurement(0, MeasurementFunction::VoltagePeakToPeak, None) {
        Ok(vpp) => println!("channel1 peak-to-peak: {vpp} V"),
        Err(ScopeError::MeasurementInvalid(what)) => warn!("No result for {what}"),
        Err(e) => return Err(e),
    }

    let (code, message) = scope.error_query()?;
    if code != 0 {
        warn!("Instrument reported error {code}: {message}");
    }

    Ok(waveform)
}

fn save_waveform(waveform: &Waveform, output_path: &str) -> Result<PathBuf, ScopeError> {
    let dir = PathBuf::from(output_path);
    fs::create_dir_all(&dir).map_err(|source| ScopeError::Io {
        source,
        context: format!("Failed to create {}", dir.display()),
    })?;

    let filename = format!(
        "{}_{}.json",
        waveform.channel,
        Utc::now().format("%Y%m%d_%H%M%S")
    );
    let path = dir.join(filename);
    let json = serde_json::to_string_pretty(waveform)?;
    fs::write(&path, json).map_err(|source| ScopeError::Io {
        source,
        context: format!("Failed to write {}", path.display()),
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "scope-smoke-{name}-{}.toml",
            std::process::id()
        ));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_overrides_apply_before_validation() {
        let path = write_config("bad-resource", "[instrument]\nresource = \"bogus\"\n");
        let file = path.to_str().unwrap();

        let plain = Args::parse_from(["scope-smoke", "--config", file]);
        assert!(load_settings(&plain).is_err());

        let simulated = Args::parse_from(["scope-smoke", "--config", file, "--simulate"]);
        assert!(load_settings(&simulated).unwrap().instrument.simulate);

        let fixed = Args::parse_from([
            "scope-smoke",
            "--config",
            file,
            "--resource",
            "TCPIP0::192.168.1.104::INSTR",
        ]);
        let config = load_settings(&fixed).unwrap();
        assert_eq!(config.instrument.resource, "TCPIP0::192.168.1.104::INSTR");

        fs::remove_file(&path).unwrap();
    }
}
