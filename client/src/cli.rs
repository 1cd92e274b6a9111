use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use common::{
    InputRef, Job, JobArgs, JobPack, LocalInputs, Message, PackageAssembler, Settings,
    Specification, TaskDescriptor, TaskMode,
};
use serde_json::{json, Map, Value};
use std::{env, path::PathBuf};
use tracing::{info, warn};

use crate::controller::LocalController;

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "Arma paquetes de job y los ejecuta con un worker local")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Construye un paquete de job
    Pack {
        /// Fichero de salida
        #[arg(value_name = "PAQUETE")]
        output: PathBuf,

        /// Prefijo del nombre del job
        #[arg(long, default_value = "job")]
        prefix: String,

        /// Función map registrada (por ejemplo wordcount.map)
        #[arg(long)]
        map: Option<String>,

        /// Función reduce registrada (por ejemplo wordcount.reduce)
        #[arg(long)]
        reduce: Option<String>,

        /// URL de entrada; repetible. Réplicas de una misma entrada separadas por coma
        #[arg(long = "input", value_name = "URL")]
        inputs: Vec<String>,

        #[arg(long)]
        partitions: Option<u32>,

        #[arg(long)]
        merge_partitions: bool,

        /// Guardar los resultados en el store en vez de enviarlos
        #[arg(long)]
        save: bool,

        #[arg(long)]
        profile: bool,

        /// Ficheros extra para el bundle (acepta patrones glob); repetible
        #[arg(long = "require", value_name = "GLOB")]
        required: Vec<String>,

        /// Argumento del job KEY=VALUE (VALUE en JSON o texto); repetible
        #[arg(long = "arg", value_name = "KEY=VALUE")]
        args: Vec<String>,

        #[arg(long)]
        max_cores: Option<u32>,

        #[arg(long, conflicts_with = "force_remote")]
        force_local: bool,

        #[arg(long)]
        force_remote: bool,

        /// Binario del worker que viaja en el bundle; por defecto el que está junto a este cliente
        #[arg(long, value_name = "BINARIO")]
        runtime: Option<PathBuf>,
    },
    /// Muestra el contenido de un paquete
    Inspect {
        #[arg(value_name = "PAQUETE")]
        package: PathBuf,

        /// Lista también los ficheros del bundle
        #[arg(long)]
        files: bool,
    },
    /// Ejecuta una tarea del paquete con un worker local
    Run {
        #[arg(value_name = "PAQUETE")]
        package: PathBuf,

        /// map | reduce
        #[arg(long, default_value = "map")]
        mode: String,

        #[arg(long, default_value_t = 0)]
        id: u32,

        /// Entradas de la tarea; por defecto las del paquete
        #[arg(long = "input", value_name = "URL")]
        inputs: Vec<String>,

        /// Particiones de salida; por defecto nr_reduces del paquete
        #[arg(long)]
        partitions: Option<u32>,

        /// Binario del worker; por defecto el que viene en el bundle
        #[arg(long)]
        worker: Option<PathBuf>,

        /// Directorio de trabajo donde se extrae el bundle
        #[arg(long)]
        workdir: Option<PathBuf>,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Pack {
            output,
            prefix,
            map,
            reduce,
            inputs,
            partitions,
            merge_partitions,
            save,
            profile,
            required,
            args,
            max_cores,
            force_local,
            force_remote,
            runtime,
        } => {
            let mut overrides = Map::new();
            if let Some(map) = map {
                overrides.insert("map".into(), json!(map));
            }
            if let Some(reduce) = reduce {
                overrides.insert("reduce".into(), json!(reduce));
            }
            if let Some(partitions) = partitions {
                overrides.insert("partitions".into(), json!(partitions));
            }
            overrides.insert("merge_partitions".into(), json!(merge_partitions));
            overrides.insert("save".into(), json!(save));
            overrides.insert("profile".into(), json!(profile));
            overrides.insert("scheduler".into(), scheduler(max_cores, force_local, force_remote));
            if !inputs.is_empty() {
                overrides.insert("input".into(), serde_json::to_value(input_refs(&inputs))?);
            }
            let files = expand_required(&required)?;
            if !files.is_empty() {
                overrides.insert("required_files".into(), serde_json::to_value(files)?);
            }

            let spec = Specification::with_overrides(overrides)?;
            let job = Job::new(&prefix, Settings::from_env());
            let job_args = parse_args(&args)?;
            let resolver = LocalInputs::from_settings(&job.settings);

            let runtime = match runtime {
                Some(path) => path,
                None => default_worker()?,
            };

            let pack = PackageAssembler::new(&spec, &resolver)
                .with_runtime([runtime])
                .job_pack(&job, &job_args)?;
            if pack.archive()?.get(&pack.descriptor.worker).is_none() {
                warn!("el bundle no trae {}", pack.descriptor.worker);
            }
            pack.save(&output)?;

            println!("Paquete creado:");
            println!("  job: {}", job.name);
            println!("  fichero: {}", output.display());
            println!("  entradas: {}", pack.descriptor.input.len());
            println!("  nr_reduces: {}", pack.descriptor.nr_reduces);
        }
        Commands::Inspect { package, files } => {
            let pack = JobPack::load(&package)?;
            println!("Descriptor:");
            println!("{}", serde_json::to_string_pretty(&pack.descriptor)?);
            println!("Entorno:");
            for (key, value) in &pack.environment.vars {
                println!("  {}={}", key, value);
            }
            println!("Job: {}", pack.payload.job.name);
            println!("Args: {}", Value::Object(pack.payload.args.clone()));
            if files {
                let archive = pack.archive()?;
                println!("Bundle ({} ficheros):", archive.len());
                for name in archive.names() {
                    let size = archive.get(name).map(<[u8]>::len).unwrap_or(0);
                    println!("  {:>8}  {}", size, name);
                }
            }
        }
        Commands::Run {
            package,
            mode,
            id,
            inputs,
            partitions,
            worker,
            workdir,
        } => {
            let mode: TaskMode = mode.parse()?;
            let workdir = workdir.unwrap_or_else(|| {
                env::temp_dir().join(format!("worker-{}", uuid::Uuid::new_v4()))
            });

            let controller = LocalController::new(&package, worker, workdir.clone())?;
            let descriptor = &controller.pack().descriptor;
            let inputs = if inputs.is_empty() {
                descriptor
                    .input
                    .iter()
                    .filter_map(|input| input.first().map(str::to_string))
                    .collect()
            } else {
                inputs
            };
            let partitions = partitions.unwrap_or(descriptor.nr_reduces);
            let task = TaskDescriptor::new(
                &controller.pack().payload.job.name,
                mode,
                id,
                inputs,
                partitions,
            );
            info!("lanzando tarea {} en {}", task.uid, workdir.display());

            let outcome = controller.run(&task).await?;
            for note in &outcome.served.notes {
                println!("  {}", note);
            }
            match &outcome.served.terminal {
                Some(Message::WorkerDone) => println!("Tarea {} terminada", task.uid),
                Some(Message::DataUnavailable(report)) => {
                    println!("Tarea {} sin datos (reintentable):\n{}", task.uid, report)
                }
                Some(Message::TaskFailed(report)) => {
                    println!("Tarea {} falló:\n{}", task.uid, report)
                }
                _ => warn!("el worker terminó sin señal terminal"),
            }
            if !outcome.succeeded() {
                bail!("la tarea {} no terminó bien ({})", task.uid, outcome.status);
            }
        }
    }

    Ok(())
}

/// `a,b` es una entrada con dos réplicas.
fn input_refs(inputs: &[String]) -> Vec<InputRef> {
    inputs
        .iter()
        .map(|raw| {
            let mut urls: Vec<String> = raw.split(',').map(|u| u.trim().to_string()).collect();
            if urls.len() == 1 {
                InputRef::Url(urls.remove(0))
            } else {
                InputRef::Replicas(urls)
            }
        })
        .collect()
}

fn scheduler(max_cores: Option<u32>, force_local: bool, force_remote: bool) -> Value {
    let mut hints = Map::new();
    if let Some(n) = max_cores {
        hints.insert("max_cores".into(), json!(n));
    }
    hints.insert("force_local".into(), json!(force_local));
    hints.insert("force_remote".into(), json!(force_remote));
    Value::Object(hints)
}

fn expand_required(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for pattern in patterns {
        let before = paths.len();
        for entry in glob::glob(pattern).with_context(|| format!("patrón inválido: {pattern}"))? {
            paths.push(entry?);
        }
        if paths.len() == before {
            warn!("{} no coincide con ningún fichero", pattern);
        }
    }
    Ok(paths)
}

fn parse_args(raw: &[String]) -> Result<JobArgs> {
    let mut args = JobArgs::new();
    for item in raw {
        let Some((key, value)) = item.split_once('=') else {
            bail!("argumento sin '=': {item}");
        };
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        args.insert(key.to_string(), value);
    }
    Ok(args)
}

fn default_worker() -> Result<PathBuf> {
    let exe = env::current_exe()?;
    Ok(exe.with_file_name(format!("worker{}", env::consts::EXE_SUFFIX)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_refs_separa_replicas() {
        let refs = input_refs(&["raw://a".into(), "dir://h/x, dir://g/x".into()]);
        assert_eq!(refs[0], InputRef::Url("raw://a".into()));
        assert_eq!(
            refs[1],
            InputRef::Replicas(vec!["dir://h/x".into(), "dir://g/x".into()])
        );
    }

    #[test]
    fn parse_args_acepta_json_y_texto() {
        let args = parse_args(&["n=3".into(), "save=true".into(), "nombre=hola".into()]).unwrap();
        assert_eq!(args["n"], json!(3));
        assert_eq!(args["save"], json!(true));
        assert_eq!(args["nombre"], json!("hola"));
        assert!(parse_args(&["sin-igual".into()]).is_err());
    }

    #[test]
    fn scheduler_lleva_las_pistas() {
        let hints = scheduler(Some(4), true, false);
        assert_eq!(hints["max_cores"], json!(4));
        assert_eq!(hints["force_local"], json!(true));
        assert_eq!(hints["force_remote"], json!(false));
    }

    #[test]
    fn expand_required_resuelve_globs() {
        let dir = env::temp_dir().join("client_cli_tests");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.txt"), "a").unwrap();
        std::fs::write(dir.join("b.txt"), "b").unwrap();
        std::fs::write(dir.join("c.bin"), "c").unwrap();

        let pattern = format!("{}/*.txt", dir.display());
        let paths = expand_required(&[pattern]).unwrap();
        assert_eq!(paths, vec![dir.join("a.txt"), dir.join("b.txt")]);
    }

    #[test]
    fn la_cli_es_valida() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
