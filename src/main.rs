use chrono::Local;
use clusterfit::param::{self, Param};
use clusterfit::{run, version};
use flexi_logger::{Duplicate, FileSpec, Logger, LoggerHandle};
use log::{error, info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn init_logger(param: &Param) -> Result<LoggerHandle, flexi_logger::FlexiLoggerError> {
    let logger = Logger::try_with_env_or_str(&param.general.log_level)?;
    if param.general.log_base.is_empty() {
        logger.start()
    } else {
        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        logger
            .log_to_file(
                FileSpec::default()
                    .basename(&param.general.log_base)
                    .suffix(&param.general.log_suffix)
                    .suppress_timestamp()
                    .discriminant(timestamp),
            )
            .duplicate_to_stderr(Duplicate::All)
            .start()
    }
}

/// Clears `running` on SIGINT/SIGTERM so the current fit stops after its generation
fn install_signal_handler(running: Arc<AtomicBool>) -> std::io::Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::spawn(move || {
        for signal in signals.forever() {
            warn!("Signal {} received, stopping after the current step...", signal);
            running.store(false, Ordering::Relaxed);
        }
    });
    Ok(())
}

fn main() {
    let param_file = std::env::args().nth(1).unwrap_or_else(|| "param.yaml".to_string());

    let param = match param::get(param_file.clone()) {
        Ok(param) => param,
        Err(e) => {
            eprintln!("Unable to read parameter file {}: {}", param_file, e);
            process::exit(1);
        }
    };

    let _logger = match init_logger(&param) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Unable to start logging: {}", e);
            process::exit(1);
        }
    };
    info!("clusterfit {} | parameters {}", version(), param_file);

    let running = Arc::new(AtomicBool::new(true));
    if let Err(e) = install_signal_handler(running.clone()) {
        warn!("Signal handler could not be installed: {}", e);
    }

    match run(&param, running) {
        Ok(results) => info!(
            "{} of {} clusters fitted",
            results.len(),
            param.data.observed.len()
        ),
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}
