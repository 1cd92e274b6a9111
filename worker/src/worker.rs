use common::{
    Error, ErrorKind, Job, JobArgs, JobPack, Message, Registry, Reply, Result, Specification,
    Task,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{error, info, warn};

use crate::{
    channel::Channel,
    runtime::{Disposition, WorkerRuntime},
    sink::DirSink,
};

/// Vida completa de un worker sobre el canal:
/// PID → JOB → TASK → ejecución → STA... → una señal terminal.
///
/// Cualquier error termina en DAT (reintentable) o ERR (fatal) con el
/// informe del error, y además se devuelve al llamador.
pub async fn main<R, W>(channel: &mut Channel<R, W>, registry: &Registry) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut runtime = WorkerRuntime::new(registry);

    let outcome = match session(channel, &mut runtime).await {
        Ok(disposition) => flush_notes(channel, &mut runtime)
            .await
            .map(|()| disposition),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(disposition) => {
            channel.send(&Message::WorkerDone).await?;
            info!("worker terminado: {:?}", disposition);
            Ok(())
        }
        Err(err) => {
            // lo que el runtime alcanzó a anotar sale antes de la señal
            if let Err(e) = flush_notes(channel, &mut runtime).await {
                warn!("no se pudo mandar el estado pendiente: {}", e);
            }
            let signal = signal_for(&err);
            error!(
                "{} -> {} (runtime en {:?})",
                err.report(),
                signal.name(),
                runtime.state()
            );
            if let Err(e) = channel.send(&signal).await {
                warn!("no se pudo avisar al controller: {}", e);
            }
            Err(err)
        }
    }
}

/// DAT para errores reintentables (datos o entorno), ERR para el resto.
pub fn signal_for(err: &Error) -> Message {
    match err.kind() {
        ErrorKind::DataUnavailable | ErrorKind::EnvironmentFailure => {
            Message::DataUnavailable(err.report())
        }
        ErrorKind::Fatal => Message::TaskFailed(err.report()),
    }
}

async fn session<R, W>(channel: &mut Channel<R, W>, runtime: &mut WorkerRuntime<'_>) -> Result<Disposition>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    channel
        .send(&Message::Announce {
            pid: std::process::id(),
        })
        .await?;

    let (spec, job, args) = load_package(channel).await?;

    let desc = match channel.request(Message::RequestTask).await? {
        Reply::Task(desc) => desc,
        other => {
            return Err(Error::Protocol(format!(
                "se esperaba una tarea, llegó {:?}",
                other
            )))
        }
    };
    let sink = DirSink::from_settings(&job.settings);
    let mut task = Task::new(desc, Box::new(sink))?;

    runtime.start(&mut task, &spec, &job, &args)
}

async fn load_package<R, W>(channel: &mut Channel<R, W>) -> Result<(Specification, Job, JobArgs)>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let location = match channel.request(Message::RequestPackage).await? {
        Reply::Package(location) => location,
        other => {
            return Err(Error::Protocol(format!(
                "se esperaba un paquete, llegó {:?}",
                other
            )))
        }
    };
    let pack = JobPack::load(&location.path)?;
    info!(
        "paquete {} cargado ({} entradas)",
        location.path.display(),
        pack.descriptor.input.len()
    );
    Ok(pack.payload.unpack())
}

async fn flush_notes<R, W>(channel: &mut Channel<R, W>, runtime: &mut WorkerRuntime<'_>) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    for note in runtime.take_notes() {
        channel.send(&Message::Status(note)).await?;
    }
    Ok(())
}
