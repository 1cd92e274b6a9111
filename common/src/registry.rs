use std::collections::HashMap;

use crate::{
    error::{Error, Result},
    job::{Job, JobArgs},
    spec::FnRef,
    task::Task,
    wordcount,
};

/// Firma de una función map/reduce registrada.
pub type TaskFn = fn(&mut Task, &Job, &JobArgs) -> Result<()>;

/// Tabla nombre → función. El paquete sólo lleva nombres; el worker los busca aquí.
#[derive(Clone, Default)]
pub struct Registry {
    fns: HashMap<String, TaskFn>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registro con las funciones que trae el worker de serie.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register(wordcount::MAP, wordcount::map)
            .register(wordcount::REDUCE, wordcount::reduce)
            .register(wordcount::SUM_REDUCE, wordcount::reduce);
        registry
    }

    pub fn register(&mut self, name: &str, f: TaskFn) -> &mut Self {
        self.fns.insert(name.to_string(), f);
        self
    }

    pub fn contains(&self, name: &FnRef) -> bool {
        self.fns.contains_key(name.as_str())
    }

    pub fn get(&self, name: &FnRef) -> Result<TaskFn> {
        self.fns
            .get(name.as_str())
            .copied()
            .ok_or_else(|| Error::UnknownFunction(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_task: &mut Task, _job: &Job, _args: &JobArgs) -> Result<()> {
        Ok(())
    }

    #[test]
    fn builtin_trae_wordcount() {
        let r = Registry::builtin();
        assert!(r.contains(&FnRef::new("wordcount.map")));
        assert!(r.contains(&FnRef::new("wordcount.reduce")));
        assert!(r.contains(&FnRef::new("sum.reduce")));
    }

    #[test]
    fn get_de_nombre_desconocido_es_fatal() {
        let err = Registry::new().get(&FnRef::new("nada")).unwrap_err();
        assert!(matches!(err, Error::UnknownFunction(ref n) if n == "nada"));
    }

    #[test]
    fn register_pisa_el_anterior() {
        let mut r = Registry::builtin();
        r.register("wordcount.map", noop);
        assert!(r.get(&FnRef::new("wordcount.map")).is_ok());
    }
}
