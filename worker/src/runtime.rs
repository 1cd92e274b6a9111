use common::{
    settings::WORKER_MAX_MEM, Error, Job, JobArgs, Registry, Result, Specification, Task, TaskMode,
};
use tracing::{info, warn};

use crate::{profile, sysutil};

pub const STATUS_SENT: &str = "Resultados enviados al master";
pub const STATUS_SAVED: &str = "Resultados guardados en el store";

/// Envuelve la ejecución de una tarea y devuelve su resultado junto con el trace.
pub type Instrument = fn(TaskMode, &str, &mut dyn FnMut() -> Result<()>) -> (Result<()>, Vec<u8>);

/// Aplica el límite de memoria configurado.
pub type MemGuard = fn(&str) -> Result<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Idle,
    Running,
    Finalizing,
    Terminal,
}

/// Qué se hizo con la salida de la tarea.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Sent(String),
    Saved(String),
}

/// Ejecuta una única tarea: límite de memoria, función del modo y entrega de resultados.
///
/// Los mensajes de estado quedan en `notes` y los manda quien maneja el canal.
pub struct WorkerRuntime<'r> {
    registry: &'r Registry,
    state: RuntimeState,
    instrument: Instrument,
    mem_guard: MemGuard,
    notes: Vec<String>,
}

impl<'r> WorkerRuntime<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            state: RuntimeState::Idle,
            instrument: profile::timed,
            mem_guard: sysutil::set_mem_limit,
            notes: Vec::new(),
        }
    }

    pub fn with_instrument(mut self, instrument: Instrument) -> Self {
        self.instrument = instrument;
        self
    }

    pub fn with_mem_guard(mut self, mem_guard: MemGuard) -> Self {
        self.mem_guard = mem_guard;
        self
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    pub fn take_notes(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notes)
    }

    pub fn start(
        &mut self,
        task: &mut Task,
        spec: &Specification,
        job: &Job,
        args: &JobArgs,
    ) -> Result<Disposition> {
        if self.state != RuntimeState::Idle {
            return Err(Error::Task(format!(
                "el runtime ya está en {:?}, sólo ejecuta una tarea",
                self.state
            )));
        }

        (self.mem_guard)(job.settings.get(WORKER_MAX_MEM).unwrap_or(""))?;
        self.state = RuntimeState::Running;
        info!("tarea {} ({}) del job {}", task.uid(), task.mode(), job.name);

        if spec.lookup(job, args).flag("profile") {
            let instrument = self.instrument;
            let (mode, uid) = (task.mode(), task.uid().to_string());
            let this = &*self;
            let (result, trace) = instrument(mode, &uid, &mut || this.run(task, spec, job, args));
            // el trace se guarda también si la tarea falló; el error de la tarea manda
            let stored = task.put(&profile::artifact_name(&uid), &trace);
            if let (Err(_), Err(e)) = (&result, &stored) {
                warn!("no se pudo guardar el profile de {}: {}", uid, e);
            }
            result?;
            stored?;
        } else {
            self.run(task, spec, job, args)?;
        }

        self.state = RuntimeState::Finalizing;
        let disposition = self.end(task, spec, job, args)?;
        self.state = RuntimeState::Terminal;
        Ok(disposition)
    }

    /// Busca la función del modo de la tarea (resuelta con args > job > especificación) y la ejecuta.
    pub fn run(&self, task: &mut Task, spec: &Specification, job: &Job, args: &JobArgs) -> Result<()> {
        let mode = task.mode();
        let name = spec
            .lookup(job, args)
            .function(mode.key())?
            .ok_or(Error::MissingFunction(mode))?;
        let f = self.registry.get(&name)?;
        f(task, job, args)
    }

    /// Entrega la salida: `send` si no hay que guardar o si es un map con reduce detrás;
    /// en cualquier otro caso `save`.
    pub fn end(
        &mut self,
        task: &mut Task,
        spec: &Specification,
        job: &Job,
        args: &JobArgs,
    ) -> Result<Disposition> {
        let get = spec.lookup(job, args);
        let has_reduce = get.function("reduce")?.is_some();

        if !get.flag("save") || (task.mode() == TaskMode::Map && has_reduce) {
            let at = task.send()?;
            self.notes.push(STATUS_SENT.to_string());
            Ok(Disposition::Sent(at))
        } else {
            let at = task.save()?;
            self.notes.push(STATUS_SAVED.to_string());
            Ok(Disposition::Saved(at))
        }
    }
}
