use anyhow::{Context, Result};
use common::{
    protocol::{read_frame, write_frame},
    JobPack, Message, PackageLocation, Reply, TaskDescriptor,
};
use std::{
    fs,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};
use tokio::{
    io::{AsyncBufRead, AsyncWrite, BufReader},
    process::Command,
};
use tracing::{debug, info, warn};

/// Lo que contó el worker durante su vida.
#[derive(Debug, Default, PartialEq)]
pub struct Served {
    pub pid: Option<u32>,
    pub notes: Vec<String>,
    pub terminal: Option<Message>,
}

#[derive(Debug)]
pub struct Outcome {
    pub served: Served,
    pub status: ExitStatus,
}

impl Outcome {
    pub fn succeeded(&self) -> bool {
        self.status.success() && self.served.terminal == Some(Message::WorkerDone)
    }
}

/// Controller local para un único worker.
pub struct LocalController {
    package: PathBuf,
    pack: JobPack,
    /// `None`: se lanza el worker del bundle (`descriptor.worker`).
    worker: Option<PathBuf>,
    workdir: PathBuf,
}

impl LocalController {
    pub fn new(package: &Path, worker: Option<PathBuf>, workdir: PathBuf) -> Result<Self> {
        // el worker corre en `workdir`: la ruta del paquete tiene que ser absoluta
        let package = fs::canonicalize(package)
            .with_context(|| format!("no se encuentra el paquete {}", package.display()))?;
        let pack = JobPack::load(&package)?;
        Ok(Self {
            package,
            pack,
            worker,
            workdir,
        })
    }

    pub fn pack(&self) -> &JobPack {
        &self.pack
    }

    /// Binario a lanzar, relativo a `workdir` si viene del bundle.
    pub fn worker_path(&self) -> PathBuf {
        match &self.worker {
            Some(path) => path.clone(),
            None => self.workdir.join(&self.pack.descriptor.worker),
        }
    }

    /// Extrae el bundle, lanza el worker con el entorno del paquete
    /// y le sirve el paquete y la tarea hasta que termina.
    pub async fn run(&self, task: &TaskDescriptor) -> Result<Outcome> {
        fs::create_dir_all(&self.workdir)?;
        self.pack.archive()?.extract(&self.workdir)?;
        debug!("bundle extraído en {}", self.workdir.display());

        let worker = self.worker_path();
        let mut child = Command::new(&worker)
            .current_dir(&self.workdir)
            .envs(&self.pack.environment.vars)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("no se pudo lanzar {}", worker.display()))?;

        let stdin = child.stdin.take().context("worker sin stdin")?;
        let stdout = child.stdout.take().context("worker sin stdout")?;

        let served = serve(BufReader::new(stdout), stdin, &self.package, task).await?;
        let status = child.wait().await?;
        info!("worker terminó con {}", status);

        Ok(Outcome { served, status })
    }
}

/// Atiende el protocolo del lado del controller hasta que el worker cierra su salida.
pub async fn serve<R, W>(
    mut reader: R,
    mut writer: W,
    package: &Path,
    task: &TaskDescriptor,
) -> Result<Served>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut served = Served::default();

    while let Some(frame) = read_frame(&mut reader).await? {
        let msg = Message::from_frame(&frame)?;
        match msg {
            Message::Announce { pid } => {
                info!("worker {} conectado", pid);
                served.pid = Some(pid);
            }
            Message::RequestPackage => {
                let reply = Reply::Package(PackageLocation {
                    path: package.to_path_buf(),
                });
                write_frame(&mut writer, &reply.to_frame()?).await?;
            }
            Message::RequestTask => {
                let reply = Reply::Task(task.clone());
                write_frame(&mut writer, &reply.to_frame()?).await?;
            }
            Message::Status(text) => {
                info!("[{}] {}", task.uid, text);
                served.notes.push(text);
            }
            terminal => {
                if served.terminal.is_some() {
                    warn!("señal terminal repetida: {}", terminal.name());
                    continue;
                }
                info!("señal terminal {}", terminal.name());
                served.terminal = Some(terminal);
            }
        }
    }

    Ok(served)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{JobArgs, LocalInputs, PackageAssembler, Settings, Specification, TaskMode};
    use tokio::io::{duplex, split, DuplexStream};

    fn temp_dir(sub: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("client-{}-{}", sub, uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Paquete cuyo runtime es `script`, guardado en `root/job.pack`.
    fn package_with_runtime(root: &Path, script: &str) -> PathBuf {
        let runtime = root.join("worker");
        fs::write(&runtime, script).unwrap();
        let spec = Specification::default().with_map("wordcount.map");
        let inputs = LocalInputs::new(root.join("data"));
        let job = common::Job::new("wc", Settings::defaults());
        let pack = PackageAssembler::new(&spec, &inputs)
            .with_runtime([runtime])
            .job_pack(&job, &JobArgs::new())
            .unwrap();
        let path = root.join("job.pack");
        pack.save(&path).unwrap();
        path
    }

    /// Worker de mentira: guion fijo de mensajes, leyendo las respuestas a JOB y TASK.
    async fn scripted_worker(stream: DuplexStream, script: Vec<Message>) -> Vec<Reply> {
        let (r, mut w) = split(stream);
        let mut reader = BufReader::new(r);
        let mut replies = Vec::new();
        for msg in script {
            write_frame(&mut w, &msg.to_frame().unwrap()).await.unwrap();
            if matches!(msg, Message::RequestPackage | Message::RequestTask) {
                let frame = read_frame(&mut reader).await.unwrap().unwrap();
                replies.push(Reply::from_frame(&frame, &msg).unwrap());
            }
        }
        replies
    }

    fn task() -> TaskDescriptor {
        TaskDescriptor::new("wc@1", TaskMode::Map, 0, vec!["raw://hola".into()], 2)
    }

    async fn serve_script(script: Vec<Message>) -> (Served, Vec<Reply>) {
        let (controller_side, worker_side) = duplex(64 * 1024);
        let worker = tokio::spawn(scripted_worker(worker_side, script));

        let (r, w) = split(controller_side);
        let served = serve(BufReader::new(r), w, Path::new("/tmp/job.pack"), &task())
            .await
            .unwrap();
        (served, worker.await.unwrap())
    }

    #[tokio::test]
    async fn sirve_paquete_y_tarea() {
        let t = task();
        let (served, replies) = serve_script(vec![
            Message::Announce { pid: 7 },
            Message::RequestPackage,
            Message::RequestTask,
            Message::Status("Resultados enviados al master".into()),
            Message::WorkerDone,
        ])
        .await;

        assert_eq!(served.pid, Some(7));
        assert_eq!(served.notes, vec!["Resultados enviados al master"]);
        assert_eq!(served.terminal, Some(Message::WorkerDone));

        assert_eq!(
            replies[0],
            Reply::Package(PackageLocation {
                path: "/tmp/job.pack".into()
            })
        );
        match &replies[1] {
            Reply::Task(desc) => {
                assert_eq!(desc.jobname, t.jobname);
                assert_eq!(desc.partitions, 2);
                assert_eq!(desc.inputs, vec!["raw://hola"]);
            }
            other => panic!("esperaba TASK, llegó {:?}", other),
        }
    }

    #[tokio::test]
    async fn se_queda_con_la_primera_senal_terminal() {
        let (served, _) = serve_script(vec![
            Message::Announce { pid: 1 },
            Message::DataUnavailable("entrada perdida".into()),
            Message::TaskFailed("otra".into()),
        ])
        .await;
        assert_eq!(
            served.terminal,
            Some(Message::DataUnavailable("entrada perdida".into()))
        );
    }

    #[test]
    fn sin_worker_explicito_usa_el_del_bundle() {
        let root = temp_dir("bundled");
        let package = package_with_runtime(&root, "#!/bin/sh\nexit 0\n");
        let workdir = root.join("work");

        let controller = LocalController::new(&package, None, workdir.clone()).unwrap();
        assert_eq!(controller.worker_path(), workdir.join("lib/worker"));

        let explicit = LocalController::new(&package, Some("/bin/true".into()), workdir).unwrap();
        assert_eq!(explicit.worker_path(), PathBuf::from("/bin/true"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_lanza_el_worker_extraido_del_bundle() {
        let root = temp_dir("bundled_run");
        // el runtime sólo anuncia su pid y sale
        let package = package_with_runtime(&root, "#!/bin/sh\nprintf 'PID 2 42\\n'\n");
        let workdir = root.join("work");

        let controller = LocalController::new(&package, None, workdir.clone()).unwrap();
        let outcome = controller.run(&task()).await.unwrap();

        assert!(workdir.join("lib/worker").is_file());
        assert!(outcome.status.success());
        assert_eq!(outcome.served.pid, Some(42));
        assert_eq!(outcome.served.terminal, None);
        assert!(!outcome.succeeded());
    }

    #[tokio::test]
    async fn worker_que_muere_sin_senal() {
        let (served, _) = serve_script(vec![Message::Announce { pid: 1 }]).await;
        assert_eq!(served.terminal, None);
    }
}
