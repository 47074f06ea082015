#![allow(dead_code)]

pub mod fakes;
pub mod home_env;

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use class_change::{ClassChangeRegistry, DeploymentUnit};
use class_change::compile::Compiler;
use class_change::redefine::RedefinitionAgent;
use tempfile::TempDir;
use zip::{DateTime, ZipWriter, write::SimpleFileOptions};

pub use fakes::{AcceptingAgent, FlakyLoader, RecordingController, SyntheticCompiler, class_bytes};

/// Write `bytes` to `path`, creating parent directories.
pub fn write(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, bytes).unwrap();
}

/// Set the file's mtime to `age` before now.
pub fn backdate(path: &Path, age: Duration) {
    set_mtime(path, SystemTime::now() - age);
}

pub fn set_mtime(path: &Path, time: SystemTime) {
    let file = fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(time).unwrap();
}

/// Backdate every file below `root`.
pub fn backdate_tree(root: &Path, age: Duration) {
    for entry in fs::read_dir(root).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            backdate_tree(&path, age);
        } else {
            backdate(&path, age);
        }
    }
}

/// Deployment plus external directories laid out under one temp dir.
pub struct Workspace {
    pub dir: TempDir,
    pub deployment: PathBuf,
    pub sources: PathBuf,
    pub classes: PathBuf,
    pub web: PathBuf,
    pub temp: PathBuf,
}

impl Workspace {
    pub fn new(deployment_name: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let workspace = Self {
            deployment: root.join("deployments").join(deployment_name),
            sources: root.join("ext/src"),
            classes: root.join("ext/classes"),
            web: root.join("ext/web"),
            temp: root.join("server-tmp"),
            dir,
        };
        for path in [&workspace.sources, &workspace.classes, &workspace.web, &workspace.temp] {
            fs::create_dir_all(path).unwrap();
        }
        workspace
    }

    /// Properties text pointing at the external directories.
    pub fn properties(&self) -> String {
        format!(
            "classes.dir={}\nsrcs.dir={}\nweb.resources.dir={}\n",
            self.classes.display(),
            self.sources.display(),
            self.web.display()
        )
    }

    /// Exploded war with the given classes, web resources and local-scan properties.
    pub fn exploded_war(&self, classes: &[(&str, &[u8])], web: &[(&str, &[u8])]) {
        for (path, bytes) in classes {
            write(&self.deployment.join("WEB-INF/classes").join(path), bytes);
        }
        for (path, bytes) in web {
            write(&self.deployment.join(path), bytes);
        }
        write(
            &self.deployment.join("WEB-INF/class-change.properties"),
            self.properties().as_bytes(),
        );
        backdate_tree(&self.deployment, Duration::from_secs(3600));
    }

    /// Packed war whose entries carry a fixed 2020 timestamp.
    pub fn archive_war(&self, entries: &[(&str, &[u8])], properties: &str) {
        write_zip(
            &self.deployment,
            entries
                .iter()
                .copied()
                .chain(std::iter::once((
                    "WEB-INF/class-change.properties",
                    properties.as_bytes(),
                ))),
        );
    }

    pub fn external(&self, root: &Path, relative: &str, bytes: &[u8]) -> PathBuf {
        let path = root.join(relative);
        write(&path, bytes);
        path
    }

    pub fn registry(
        &self,
        compiler: Arc<dyn Compiler>,
        agent: Arc<dyn RedefinitionAgent>,
    ) -> ClassChangeRegistry {
        ClassChangeRegistry::new(self.temp.clone(), compiler, agent)
    }

    pub fn unit(&self) -> DeploymentUnit {
        DeploymentUnit::from_path(&self.deployment).unwrap()
    }
}

pub fn write_zip<'a>(path: &Path, entries: impl IntoIterator<Item = (&'a str, &'a [u8])>) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let file = fs::File::create(path).unwrap();
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .last_modified_time(DateTime::from_date_and_time(2020, 1, 1, 0, 0, 0).unwrap());
    for (name, bytes) in entries {
        zip.start_file(name, options).unwrap();
        std::io::Write::write_all(&mut zip, bytes).unwrap();
    }
    zip.finish().unwrap();
}

pub fn read_zip(path: &Path) -> std::collections::BTreeMap<String, Vec<u8>> {
    let mut archive = zip::ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
    let mut entries = std::collections::BTreeMap::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).unwrap();
        if entry.is_dir() {
            continue;
        }
        let mut bytes = Vec::new();
        std::io::Read::read_to_end(&mut entry, &mut bytes).unwrap();
        entries.insert(entry.name().to_string(), bytes);
    }
    entries
}
