//! Value types shared by the integration tests

#![allow(dead_code)]

use impeller::{HarvestError, Metadata, PropertyReader, PropertyWriter, Repositable};

/// Route `log` output through the test harness; set RUST_LOG to see it.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Clone, Debug)]
pub struct Task {
    pub metadata: Metadata,
    pub title: String,
    pub done: bool,
}

impl Task {
    pub fn new(title: &str) -> Self {
        Self {
            metadata: Metadata::new(),
            title: title.to_string(),
            done: false,
        }
    }
}

impl Repositable for Task {
    const REPOSITED_TYPE: &'static str = "Task";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    fn read_from<R: PropertyReader>(reader: &R) -> Result<Self, HarvestError> {
        Ok(Self {
            metadata: Metadata::default(),
            title: reader.read("title")?,
            done: reader.read("done")?,
        })
    }

    fn write_to<W: PropertyWriter>(&self, writer: &mut W) {
        writer.write("title", &self.title);
        writer.write("done", &self.done);
    }
}

#[derive(Clone, Debug)]
pub struct TaskList {
    pub metadata: Metadata,
    pub name: String,
    pub tasks: Vec<Task>,
}

impl TaskList {
    pub fn new(name: &str, titles: &[&str]) -> Self {
        Self {
            metadata: Metadata::new(),
            name: name.to_string(),
            tasks: titles.iter().map(|title| Task::new(title)).collect(),
        }
    }

    pub fn titles(&self) -> Vec<&str> {
        self.tasks.iter().map(|task| task.title.as_str()).collect()
    }
}

impl Repositable for TaskList {
    const REPOSITED_TYPE: &'static str = "TaskList";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    fn read_from<R: PropertyReader>(reader: &R) -> Result<Self, HarvestError> {
        Ok(Self {
            metadata: Metadata::default(),
            name: reader.read("name")?,
            tasks: reader.read_children("tasks")?,
        })
    }

    fn write_to<W: PropertyWriter>(&self, writer: &mut W) {
        writer.write("name", &self.name);
        writer.write_children("tasks", &self.tasks);
    }
}
