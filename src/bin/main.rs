use tfsync::{cli, config, telemetry};

fn main() {
    let cli = cli::parse_or_exit(std::env::args_os());
    let _telemetry_guard = init_tracing(cli.verbose, cli.quiet);
    std::process::exit(cli::run(cli));
}

fn init_tracing(verbose: u8, quiet: bool) -> telemetry::TelemetryGuard {
    let mut cfg = config::load_or_default();
    if quiet {
        cfg.logging.stdout = false;
    }
    let verbosity = if quiet { 0 } else { verbose.max(1) };
    telemetry::init(telemetry::TelemetryConfig::new(verbosity, cfg.logging))
}
