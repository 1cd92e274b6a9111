mod channel;
mod profile;
mod runtime;
mod sink;
mod sysutil;
mod worker;

use anyhow::Result;
use common::{settings::WORKER_LOG, Registry};
use std::{env, fs::OpenOptions, sync::Mutex, time::Duration};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::channel::Channel;

/// Logs a fichero sólo si `DISCO_WORKER_LOG` lo pide:
/// stdout es el canal con el controller y no se puede ensuciar.
fn init_logging() {
    let Ok(path) = env::var(WORKER_LOG) else {
        return;
    };
    let Ok(file) = OpenOptions::new().create(true).append(true).open(&path) else {
        return;
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("worker=debug,common=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
}

async fn serve() -> Result<()> {
    let hostname_str = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    info!("worker {} arrancando en {}", std::process::id(), hostname_str);

    let mut channel = Channel::new(tokio::io::stdin(), tokio::io::stdout());
    let registry = Registry::builtin();
    worker::main(&mut channel, &registry).await?;
    Ok(())
}

/// Código de salida del proceso. El fallo va al log, nunca a stderr.
fn exit_code(result: &Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("el worker termina con error: {:#}", e);
            1
        }
    }
}

fn run() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(serve());
    // una lectura de stdin pendiente no debe retener el proceso
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

fn main() {
    init_logging();
    std::process::exit(exit_code(&run()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn exit_code_distingue_fallo_de_exito() {
        assert_eq!(exit_code(&Ok(())), 0);
        assert_eq!(exit_code(&Err(anyhow!("canal cerrado"))), 1);
    }
}
