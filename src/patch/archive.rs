use std::{
    collections::HashSet,
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
};

use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};
use tracing::{debug, info, warn};
use zip::{DateTime, ZipArchive, ZipWriter, extra_fields::ExtraField, write::SimpleFileOptions};

use crate::known::{ArtifactIndexes, KnownArtifactMap, local_offset, modified_millis};
use crate::loader::DeploymentClassLoader;
use crate::reconcile::{ResolvedClassChanges, classify};
use crate::scanner::{CLASS_EXTENSION, Skip, collect_times};

use super::fs_ops::{child_path, remove_dir_all_if_exists, write_file};
use super::{PatchError, PendingChanges, is_web_inf_path};

const REPLACEMENT_SUFFIX: &str = "-replaced-resources";

/// Packed deployment whose archive cannot be written while mounted.
///
/// Patches accumulate in a replacement store under the server temp dir and are
/// folded back into the archive when the deployment is unmounted.
#[derive(Debug, Clone)]
pub struct ArchiveDeployment {
    archive: PathBuf,
    replacement_root: PathBuf,
    classes_prefix: String,
}

/// Result of folding the replacement store back into the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepackageOutcome {
    /// Nothing was staged; the archive was left untouched.
    Untouched,
    /// The archive was rebuilt with this many replacement entries.
    Rebuilt { replaced_entries: usize },
}

impl ArchiveDeployment {
    pub fn new(archive: PathBuf, deployment_name: &str, temp_dir: &Path, classes_prefix: &str) -> Self {
        Self {
            archive,
            replacement_root: temp_dir.join(format!("{deployment_name}{REPLACEMENT_SUFFIX}")),
            classes_prefix: classes_prefix.to_string(),
        }
    }

    pub fn archive(&self) -> &Path {
        &self.archive
    }

    pub fn replacement_root(&self) -> &Path {
        &self.replacement_root
    }

    /// Directory holding replaced class files, mirroring the archive layout.
    pub fn replacement_classes_root(&self) -> PathBuf {
        if self.classes_prefix.is_empty() {
            self.replacement_root.clone()
        } else {
            self.replacement_root.join(&self.classes_prefix)
        }
    }

    /// Record the archive's entry times and discard any store left by a previous run.
    pub(super) fn seed(&self, indexes: &ArtifactIndexes) -> Result<(), PatchError> {
        remove_dir_all_if_exists(&self.replacement_root)?;
        let mut archive = self.open()?;
        let class_prefix = if self.classes_prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.classes_prefix)
        };
        let offset = local_offset();
        let mut classes = KnownArtifactMap::new();
        let mut web_resources = KnownArtifactMap::new();
        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i).map_err(|err| self.zip_error(err))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let extended = entry.extra_data_fields().find_map(|field| match field {
                ExtraField::ExtendedTimestamp(stamp) => stamp.mod_time(),
                #[allow(unreachable_patterns)]
                _ => None,
            });
            let modified = entry_modified_millis(extended, entry.last_modified(), offset);
            if let Some(class_path) = name.strip_prefix(&class_prefix)
                && class_path.ends_with(CLASS_EXTENSION)
            {
                classes.insert(class_path.to_string(), modified);
            }
            if !is_web_inf_path(&name) {
                web_resources.insert(name, modified);
            }
        }
        debug!(
            archive = %self.archive.display(),
            classes = classes.len(),
            web_resources = web_resources.len(),
            "Indexed archive deployment"
        );
        indexes.classes.record_all(classes);
        indexes.web_resources.record_all(web_resources);
        Ok(())
    }

    /// Original archive classes shadowed by whatever the replacement store holds.
    pub(super) fn known_classes(&self, indexes: &ArtifactIndexes) -> Result<KnownArtifactMap, PatchError> {
        let mut known = indexes.classes.snapshot_all();
        known.extend(collect_times(
            &self.replacement_classes_root(),
            Skip::Nothing,
            |relative| relative.ends_with(CLASS_EXTENSION),
        )?);
        Ok(known)
    }

    pub(super) fn known_web_resources(
        &self,
        indexes: &ArtifactIndexes,
    ) -> Result<KnownArtifactMap, PatchError> {
        let mut known = indexes.web_resources.snapshot_all();
        known.extend(collect_times(&self.replacement_root, Skip::WebInf, |_| true)?);
        Ok(known)
    }

    pub(super) fn read_resource(&self, relative: &str) -> Result<Option<Vec<u8>>, PatchError> {
        let mut archive = self.open()?;
        let mut entry = match archive.by_name(relative) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => return Ok(None),
            Err(err) => return Err(self.zip_error(err)),
        };
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|source| PatchError::io(&self.archive, source))?;
        Ok(Some(bytes))
    }

    /// Stage the pending changes in the replacement store.
    ///
    /// Classification uses `known_classes` as captured at the start of the
    /// pass, which already includes classes added by earlier patches. Nothing
    /// is staged unless every class resolves, so a failed pass is rescanned.
    pub(super) fn apply(
        &self,
        changes: PendingChanges,
        known_classes: &KnownArtifactMap,
        loader: &dyn DeploymentClassLoader,
    ) -> Result<ResolvedClassChanges, PatchError> {
        let classes_root = self.replacement_classes_root();
        let mut writes = Vec::with_capacity(changes.classes.len() + changes.web_resources.len());
        let mut resolved = ResolvedClassChanges::default();
        for (path, bytes) in &changes.classes {
            writes.push((child_path(&classes_root, path)?, bytes.as_slice()));
            let is_known = known_classes.contains_key(path);
            if let Some(change) = classify(path, bytes.clone(), is_known, loader)? {
                resolved.push(change);
            }
        }
        for (path, bytes) in &changes.web_resources {
            if is_web_inf_path(path) {
                warn!(path = %path, "Refusing to stage web resource into WEB-INF");
                continue;
            }
            writes.push((child_path(&self.replacement_root, path)?, bytes.as_slice()));
        }
        for (file, bytes) in writes {
            write_file(&file, bytes)?;
        }
        Ok(resolved)
    }

    pub(super) fn write_external_class(&self, class_path: &str, bytes: &[u8]) -> Result<(), PatchError> {
        write_file(&child_path(&self.replacement_classes_root(), class_path)?, bytes)
    }

    /// Fold the replacement store into a fresh archive and swap it in.
    ///
    /// The store is deleted whatever the outcome.
    pub(super) fn unmount(&self) -> Result<RepackageOutcome, PatchError> {
        let outcome = self.repackage();
        let cleanup = remove_dir_all_if_exists(&self.replacement_root);
        let outcome = outcome?;
        cleanup?;
        if let RepackageOutcome::Rebuilt { replaced_entries } = outcome {
            info!(
                archive = %self.archive.display(),
                replaced_entries,
                "Re-packaged archive with replaced resources"
            );
        }
        Ok(outcome)
    }

    fn repackage(&self) -> Result<RepackageOutcome, PatchError> {
        if !self.replacement_root.is_dir() {
            return Ok(RepackageOutcome::Untouched);
        }
        let parent = self
            .archive
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let temp = tempfile::Builder::new()
            .prefix(".class-change-")
            .suffix(".tmp")
            .tempfile_in(parent)
            .map_err(|source| PatchError::io(parent, source))?;

        let mut writer = ZipWriter::new(temp.as_file());
        let mut seen = HashSet::new();
        self.write_replacements(&mut writer, &self.replacement_root, "", &mut seen)?;
        if seen.is_empty() {
            return Ok(RepackageOutcome::Untouched);
        }

        {
            let mut original = self.open()?;
            for i in 0..original.len() {
                let entry = original.by_index_raw(i).map_err(|err| self.zip_error(err))?;
                if seen.contains(entry.name()) {
                    continue;
                }
                writer.raw_copy_file(entry).map_err(|err| self.zip_error(err))?;
            }
        }
        writer.finish().map_err(|err| self.zip_error(err))?;

        fs::remove_file(&self.archive).map_err(|source| PatchError::io(&self.archive, source))?;
        temp.persist(&self.archive)
            .map_err(|err| PatchError::io(&self.archive, err.error))?;
        Ok(RepackageOutcome::Rebuilt {
            replaced_entries: seen.len(),
        })
    }

    fn write_replacements(
        &self,
        writer: &mut ZipWriter<&File>,
        dir: &Path,
        relative_dir: &str,
        seen: &mut HashSet<String>,
    ) -> Result<(), PatchError> {
        let mut entries = fs::read_dir(dir)
            .map_err(|source| PatchError::io(dir, source))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| PatchError::io(dir, source))?;
        entries.sort_by_key(|entry| entry.file_name());
        for entry in entries {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let relative = if relative_dir.is_empty() {
                name
            } else {
                format!("{relative_dir}/{name}")
            };
            let file_type = entry
                .file_type()
                .map_err(|source| PatchError::io(&path, source))?;
            let options = entry_options(&path)?;
            if file_type.is_dir() {
                let dir_name = format!("{relative}/");
                writer
                    .add_directory(dir_name.as_str(), options)
                    .map_err(|err| self.zip_error(err))?;
                seen.insert(dir_name);
                self.write_replacements(writer, &path, &relative, seen)?;
            } else if file_type.is_file() {
                writer
                    .start_file(relative.as_str(), options)
                    .map_err(|err| self.zip_error(err))?;
                let bytes = fs::read(&path).map_err(|source| PatchError::io(&path, source))?;
                writer
                    .write_all(&bytes)
                    .map_err(|source| PatchError::io(&path, source))?;
                seen.insert(relative);
            }
        }
        Ok(())
    }

    fn open(&self) -> Result<ZipArchive<File>, PatchError> {
        let file = File::open(&self.archive).map_err(|source| PatchError::io(&self.archive, source))?;
        ZipArchive::new(file).map_err(|err| self.zip_error(err))
    }

    fn zip_error(&self, err: zip::result::ZipError) -> PatchError {
        PatchError::Zip {
            path: self.archive.clone(),
            message: err.to_string(),
        }
    }
}

fn entry_options(path: &Path) -> Result<SimpleFileOptions, PatchError> {
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let modified = modified_millis(path).map_err(|source| PatchError::io(path, source))?;
    Ok(match dos_time(modified, local_offset()) {
        Some(time) => options.last_modified_time(time),
        None => options,
    })
}

/// Entry mtime in epoch milliseconds.
///
/// The extended-timestamp field is UTC and wins. The DOS field carries the
/// packer's wall-clock time, read here in `offset`. Undated entries map to zero.
fn entry_modified_millis(extended: Option<u32>, dos: Option<DateTime>, offset: UtcOffset) -> i64 {
    if let Some(seconds) = extended {
        return i64::from(seconds) * 1000;
    }
    dos.and_then(|time| dos_time_millis(time, offset)).unwrap_or(0)
}

fn dos_time_millis(time: DateTime, offset: UtcOffset) -> Option<i64> {
    let month = Month::try_from(time.month()).ok()?;
    let date = Date::from_calendar_date(i32::from(time.year()), month, time.day()).ok()?;
    let clock = Time::from_hms(time.hour(), time.minute(), time.second()).ok()?;
    let stamp = PrimitiveDateTime::new(date, clock).assume_offset(offset).unix_timestamp();
    Some(stamp * 1000)
}

/// Wall-clock DOS time in `offset` for an mtime, rounded up to the 2 second DOS granularity.
fn dos_time(millis: i64, offset: UtcOffset) -> Option<DateTime> {
    let mut seconds = millis.div_euclid(1000);
    if millis.rem_euclid(1000) > 0 {
        seconds += 1;
    }
    if seconds % 2 != 0 {
        seconds += 1;
    }
    let stamp = OffsetDateTime::from_unix_timestamp(seconds).ok()?.to_offset(offset);
    DateTime::from_date_and_time(
        u16::try_from(stamp.year()).ok()?,
        u8::from(stamp.month()),
        stamp.day(),
        stamp.hour(),
        stamp.minute(),
        stamp.second(),
    )
    .ok()
}
