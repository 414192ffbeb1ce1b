use clap::Parser;
use timetrack::cli::{
    Args, build_config, default_state_file, init_logging, run_command, validate_api_url,
};
use timetrack::open_controller;
use tracing::{debug, error};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(api_url) = validate_api_url(&args.api_url) else {
        std::process::exit(1);
    };

    let Some(state_file) = args.state_file.or_else(default_state_file) else {
        error!("Cannot locate a state directory. Set TIMETRACK_STATE_FILE or use --state-file");
        std::process::exit(1);
    };

    debug!(api = %api_url, state_file = %state_file.display(), "Starting");

    let config = build_config(
        api_url,
        state_file,
        args.refresh_buffer_secs,
        args.check_interval_secs,
        args.timeout_secs,
    );

    let controller = open_controller(&config).unwrap_or_else(|e| {
        error!(error = %e, "Failed to create HTTP client");
        std::process::exit(1);
    });

    if let Err(e) = run_command(&controller, args.command).await {
        error!(error = %e, "Command failed");
        std::process::exit(1);
    }
}
