pub mod bundle;
pub mod error;
pub mod inputs;
pub mod job;
pub mod package;
pub mod partition;
pub mod protocol;
pub mod registry;
pub mod settings;
pub mod spec;
pub mod task;
pub mod wordcount;

/* --------- Reexports de lo que usan worker y client --------- */

pub use bundle::JobArchive;
pub use error::{Error, ErrorKind, Result};
pub use inputs::{InputRef, InputResolver, LocalInputs, PartitionHint};
pub use job::{Job, JobArgs, JobName, ModuleRef};
pub use package::{JobDescriptor, JobEnvironment, JobPack, JobPayload, PackageAssembler};
pub use protocol::{Frame, Message, PackageLocation, Reply};
pub use registry::{Registry, TaskFn};
pub use settings::Settings;
pub use spec::{FnRef, Lookup, RequiredFiles, Specification};
pub use task::{OutputSink, Outputs, Task, TaskDescriptor, TaskMode, TaskUid};
