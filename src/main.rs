use std::io;
use std::process::ExitCode;

use log::{error, warn};
use typetrace_backend::cli::{self, Command, Config, VERSION};
use typetrace_backend::source::evdev::{DevInputContext, DEV_INPUT_DIR};
use typetrace_backend::{trace, Backend, ExitStatus, JsonEmitter, RestrictedGate, Shutdown};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "typetrace-backend".to_owned());
    let parsed = cli::parse_args(&program, args);

    for diagnostic in &parsed.diagnostics {
        warn!("{diagnostic}");
    }

    match parsed.command {
        Command::Help => {
            print!("{}", cli::help(&program));
            ExitStatus::NoError.into()
        }
        Command::Version => {
            println!("{VERSION}");
            ExitStatus::NoError.into()
        }
        Command::Run(config) => run(config).await.into(),
    }
}

async fn run(config: Config) -> ExitStatus {
    let shutdown = Shutdown::new();
    let listener = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = listener.on_signals().await {
            error!("Cannot listen for termination signals: {e}");
        }
    });

    let emitter = JsonEmitter::new(io::stdout().lock());

    match config.backend {
        #[cfg(feature = "libinput")]
        Backend::Libinput => {
            use typetrace_backend::source::libinput::UdevContext;

            trace(UdevContext::new(RestrictedGate), &config, emitter, &shutdown).await
        }
        Backend::Evdev => {
            let context = DevInputContext::new(RestrictedGate, DEV_INPUT_DIR);
            trace(context, &config, emitter, &shutdown).await
        }
    }
}
