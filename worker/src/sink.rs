use common::{Error, OutputSink, Outputs, Result, Settings, TaskDescriptor};
use std::{
    fmt::Write as _,
    fs,
    path::{Component, Path, PathBuf},
};
use tracing::debug;

/// Sink sobre el sistema de ficheros local.
///
/// ```text
/// <data>/<job>/<mode>/<uid>/part-<p>      send
/// <data>/<job>/<mode>/<uid>/index         "<p> <url>" por línea
/// <data>/<job>/<mode>/<uid>/<nombre>      put
/// <store>/<job>/<uid>-part-<p>            save
/// ```
#[derive(Debug, Clone)]
pub struct DirSink {
    data_root: PathBuf,
    store_root: PathBuf,
}

impl DirSink {
    pub fn new(data_root: impl Into<PathBuf>, store_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            store_root: store_root.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.data_root(), settings.store_root())
    }

    fn relative_dir(task: &TaskDescriptor) -> Result<PathBuf> {
        Ok(Path::new(single_component("jobname", &task.jobname)?)
            .join(single_component("mode", &task.mode)?)
            .join(single_component("uid", &task.uid)?))
    }

    fn task_dir(&self, task: &TaskDescriptor) -> Result<PathBuf> {
        let dir = self.data_root.join(Self::relative_dir(task)?);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

impl OutputSink for DirSink {
    fn send(&mut self, task: &TaskDescriptor, outputs: &Outputs) -> Result<String> {
        let dir = self.task_dir(task)?;
        let mut index = String::new();
        for (partition, bytes) in outputs {
            let path = dir.join(format!("part-{partition}"));
            fs::write(&path, bytes)?;
            let _ = writeln!(index, "{} file://{}", partition, path.display());
        }
        fs::write(dir.join("index"), index)?;

        let url = format!(
            "dir://{}/{}/index",
            task.host,
            Self::relative_dir(task)?.display()
        );
        debug!("{} particiones enviadas en {}", outputs.len(), url);
        Ok(url)
    }

    fn save(&mut self, task: &TaskDescriptor, outputs: &Outputs) -> Result<String> {
        let dir = self.store_root.join(single_component("jobname", &task.jobname)?);
        let uid = single_component("uid", &task.uid)?;
        fs::create_dir_all(&dir)?;
        for (partition, bytes) in outputs {
            fs::write(dir.join(format!("{}-part-{}", uid, partition)), bytes)?;
        }
        debug!("{} particiones guardadas en {}", outputs.len(), dir.display());
        Ok(dir.display().to_string())
    }

    fn put(&mut self, task: &TaskDescriptor, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.task_dir(task)?.join(single_component("artefacto", name)?);
        fs::write(&path, bytes)?;
        debug!("artefacto {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }
}

/// Un nombre del descriptor sólo puede ser un único componente de ruta.
fn single_component<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let mut parts = Path::new(value).components();
    match (parts.next(), parts.next()) {
        (Some(Component::Normal(part)), None) if part == value => Ok(value),
        _ => Err(Error::Protocol(format!("{field} no es un nombre válido: {value:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{InputRef, InputResolver, LocalInputs, PartitionHint};

    fn temp_dir(sub: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("worker_sink_tests").join(sub);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn descriptor() -> TaskDescriptor {
        TaskDescriptor {
            jobname: "wc@1".into(),
            host: "localhost".into(),
            mode: "map".into(),
            uid: "map-0-a".into(),
            id: 0,
            inputs: vec![],
            partitions: 2,
        }
    }

    fn outputs() -> Outputs {
        let mut out = Outputs::new();
        out.insert(0, b"a\t1\n".to_vec());
        out.insert(1, b"b\t2\n".to_vec());
        out
    }

    #[test]
    fn send_deja_un_indice_que_se_puede_resolver() {
        let root = temp_dir("send");
        let mut sink = DirSink::new(root.join("data"), root.join("ddfs"));

        let url = sink.send(&descriptor(), &outputs()).unwrap();
        assert_eq!(url, "dir://localhost/wc@1/map/map-0-a/index");

        let inputs = LocalInputs::new(root.join("data"));
        let index = inputs.read_index(&url).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index[0].0, 0);
        assert_eq!(index[1].0, 1);

        let part = index[1].1.strip_prefix("file://").unwrap();
        assert_eq!(fs::read(part).unwrap(), b"b\t2\n");

        let resolved = inputs
            .input_list(&[InputRef::from(url.as_str())], PartitionHint::Decide)
            .unwrap();
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn nombres_que_salen_del_directorio_se_rechazan() {
        let root = temp_dir("escape");
        let mut sink = DirSink::new(root.join("data"), root.join("ddfs"));

        let mut bad_uid = descriptor();
        bad_uid.uid = "../../x".into();
        assert!(matches!(sink.send(&bad_uid, &outputs()), Err(Error::Protocol(_))));
        assert!(matches!(sink.save(&bad_uid, &outputs()), Err(Error::Protocol(_))));

        let mut bad_job = descriptor();
        bad_job.jobname = "/etc".into();
        assert!(sink.send(&bad_job, &outputs()).is_err());

        let mut bad_mode = descriptor();
        bad_mode.mode = ".".into();
        assert!(sink.put(&bad_mode, "profile-x", b"t").is_err());

        assert!(sink.put(&descriptor(), "../fuera", b"t").is_err());
        assert!(!root.join("x").exists());
        assert!(!root.join("data").join("fuera").exists());
    }

    #[test]
    fn save_escribe_en_el_store() {
        let root = temp_dir("save");
        let mut sink = DirSink::new(root.join("data"), root.join("ddfs"));

        let at = sink.save(&descriptor(), &outputs()).unwrap();
        let dir = root.join("ddfs").join("wc@1");
        assert_eq!(at, dir.display().to_string());
        assert_eq!(fs::read(dir.join("map-0-a-part-0")).unwrap(), b"a\t1\n");
        assert!(!root.join("data").exists());
    }

    #[test]
    fn put_deja_el_artefacto_junto_a_los_resultados() {
        let root = temp_dir("put");
        let mut sink = DirSink::new(root.join("data"), root.join("ddfs"));

        sink.put(&descriptor(), "profile-map-0-a", b"{}").unwrap();
        let path = root.join("data/wc@1/map/map-0-a/profile-map-0-a");
        assert_eq!(fs::read(path).unwrap(), b"{}");
    }

    #[test]
    fn from_settings_usa_las_raices_del_job() {
        let settings = Settings::defaults()
            .with(common::settings::DATA_ROOT, "/tmp/d")
            .with(common::settings::STORE_ROOT, "/tmp/s");
        let sink = DirSink::from_settings(&settings);
        assert_eq!(sink.data_root, PathBuf::from("/tmp/d"));
        assert_eq!(sink.store_root, PathBuf::from("/tmp/s"));
    }
}
