//! Binary cache reader/writer (Component C, `spec.md` §4.C and §6).
//!
//! Four little-endian files under a host-provided directory:
//!
//! - `table`: header `{registryStamp: i64}` followed by fixed-size entries
//!   `{id: i32, kind: u8, mainOffset: i64, extraOffset: i64}`, read until EOF
//!   (entry size is fixed, so no count field is needed).
//! - `main`: per-record bodies, addressed by `mainOffset`. Strings are
//!   `u16`-length-prefixed UTF-8; int arrays are `i32`-length-prefixed.
//! - `extra`: [`ExtraData`] bodies, addressed by `extraOffset`.
//! - `namespace`: namespace bodies, one per bundle, read sequentially.
//!
//! The writer emits to four temp files and atomically renames them into
//! place, following the teacher crate's (`nova-cache`) atomic-write
//! discipline: write fully, `sync_all`, rename, never leave a half-written
//! file at the real path.

use crate::id::{BundleId, EntityKind, Id};
use crate::model::{
    ConfigurationElementRecord, ExtensionPointRecord, ExtensionRecord, ExtraData, NamespaceRecord,
};
use smol_str::SmolStr;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::CacheError;

const TABLE_ENTRY_SIZE: u64 = 4 + 1 + 8 + 8;

/// Paths to the four cache files. The host constructs this from its runtime
/// directory; the core never guesses a location (`SPEC_FULL.md` §6).
#[derive(Debug, Clone)]
pub struct CachePaths {
    pub table: PathBuf,
    pub main: PathBuf,
    pub extra: PathBuf,
    pub namespace: PathBuf,
}

impl CachePaths {
    pub fn under(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            table: dir.join("registry.table"),
            main: dir.join("registry.main"),
            extra: dir.join("registry.extra"),
            namespace: dir.join("registry.namespace"),
        }
    }
}

/// Location of a cold (not-yet-materialized) record.
#[derive(Debug, Clone, Copy)]
pub struct ColdEntry {
    pub kind: EntityKind,
    pub main_offset: u64,
    pub extra_offset: Option<u64>,
}

/// Returns whether a cache saved under `found` may be used when the caller
/// expects `expected` (`spec.md` §6: "A configuration flag disables stamp
/// checking (stamp=0 matches any)").
pub fn stamp_matches(expected: i64, found: i64) -> bool {
    expected == 0 || found == 0 || expected == found
}

/// Opens a cache for lazy reads. Returns `Ok(None)` when the stamp doesn't
/// match (the caller should fall back to a full rebuild); any I/O or format
/// error is also reported so the caller can swallow it per §7.
pub struct CacheReader {
    index: HashMap<Id, ColdEntry>,
    main_path: PathBuf,
    extra_path: PathBuf,
    pub stamp: i64,
}

impl CacheReader {
    pub fn open(paths: &CachePaths, expected_stamp: i64) -> Result<Option<Self>, CacheError> {
        let mut table_bytes = Vec::new();
        File::open(&paths.table)?.read_to_end(&mut table_bytes)?;
        if table_bytes.len() < 8 {
            return Err(CacheError::Format("table file shorter than header".into()));
        }
        let stamp = i64::from_le_bytes(table_bytes[0..8].try_into().unwrap());
        if !stamp_matches(expected_stamp, stamp) {
            let err = CacheError::StampMismatch {
                expected: expected_stamp,
                found: stamp,
            };
            tracing::debug!(target: "nova.registry.cache", error = %err, "cache stamp mismatch; rebuilding");
            return Ok(None);
        }

        let body = &table_bytes[8..];
        if body.len() as u64 % TABLE_ENTRY_SIZE != 0 {
            return Err(CacheError::Format("table body is not entry-aligned".into()));
        }
        let mut index = HashMap::new();
        let mut cursor = &body[..];
        while !cursor.is_empty() {
            let id = i32::from_le_bytes(cursor[0..4].try_into().unwrap());
            let kind_tag = cursor[4];
            let kind = EntityKind::from_tag(kind_tag)
                .ok_or_else(|| CacheError::Format(format!("unknown kind tag {kind_tag}")))?;
            let main_offset = i64::from_le_bytes(cursor[5..13].try_into().unwrap());
            let extra_offset_raw = i64::from_le_bytes(cursor[13..21].try_into().unwrap());
            let extra_offset = if extra_offset_raw < 0 {
                None
            } else {
                Some(extra_offset_raw as u64)
            };
            index.insert(
                id,
                ColdEntry {
                    kind,
                    main_offset: main_offset as u64,
                    extra_offset,
                },
            );
            cursor = &cursor[TABLE_ENTRY_SIZE as usize..];
        }

        Ok(Some(Self {
            index,
            main_path: paths.main.clone(),
            extra_path: paths.extra.clone(),
            stamp,
        }))
    }

    pub fn index(&self) -> &HashMap<Id, ColdEntry> {
        &self.index
    }

    /// Reads a single configuration-element record and, when the cold entry
    /// has an extras offset, its associated [`ExtraData`].
    pub fn read_config_element(
        &self,
        id: Id,
        entry: ColdEntry,
    ) -> Result<ConfigurationElementRecord, CacheError> {
        let mut main = BufReader::new(File::open(&self.main_path)?);
        main.seek(SeekFrom::Start(entry.main_offset))?;
        let mut rec = wire::read_config_element(&mut main, id, entry.kind)?;
        if let Some(extra_offset) = entry.extra_offset {
            self.read_extra(extra_offset)?; // validated readable; stored separately in `extras`
            rec.extra_data_offset = Some(extra_offset);
        }
        Ok(rec)
    }

    pub fn read_extension(&self, id: Id, entry: ColdEntry) -> Result<ExtensionRecord, CacheError> {
        let mut main = BufReader::new(File::open(&self.main_path)?);
        main.seek(SeekFrom::Start(entry.main_offset))?;
        wire::read_extension(&mut main, id)
    }

    pub fn read_extension_point(
        &self,
        id: Id,
        entry: ColdEntry,
    ) -> Result<ExtensionPointRecord, CacheError> {
        let mut main = BufReader::new(File::open(&self.main_path)?);
        main.seek(SeekFrom::Start(entry.main_offset))?;
        wire::read_extension_point(&mut main, id)
    }

    pub fn read_extra(&self, offset: u64) -> Result<ExtraData, CacheError> {
        let mut extra = BufReader::new(File::open(&self.extra_path)?);
        extra.seek(SeekFrom::Start(offset))?;
        wire::read_extra(&mut extra)
    }

    pub fn read_namespaces(
        &self,
        namespace_path: &Path,
    ) -> Result<HashMap<BundleId, NamespaceRecord>, CacheError> {
        let mut reader = BufReader::new(File::open(namespace_path)?);
        let mut out = HashMap::new();
        loop {
            match wire::read_namespace(&mut reader) {
                Ok(Some((bundle_id, rec))) => {
                    out.insert(bundle_id, rec);
                }
                Ok(None) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }
}

/// Snapshot of everything a save needs; built by [`crate::object_manager::ObjectManager`]
/// after materializing any remaining cold rows.
pub struct CacheSnapshot {
    pub extension_points: HashMap<Id, ExtensionPointRecord>,
    pub extensions: HashMap<Id, ExtensionRecord>,
    pub config_elements: HashMap<Id, ConfigurationElementRecord>,
    pub extras: HashMap<Id, ExtraData>,
    pub namespaces: HashMap<BundleId, NamespaceRecord>,
}

/// Serializes `snapshot` to four temp files and atomically swaps them into
/// place under `paths`. Returns an error iff any write fails; on error no
/// partially-written file is left at the real path (`spec.md` §4.C).
pub fn save_cache(
    snapshot: &CacheSnapshot,
    stamp: i64,
    paths: &CachePaths,
) -> Result<(), CacheError> {
    let mut table_entries = Vec::new();
    let mut main_buf = Vec::new();
    let mut extra_buf = Vec::new();
    let mut extra_offsets: HashMap<Id, u64> = HashMap::new();

    for (id, extra) in &snapshot.extras {
        let offset = extra_buf.len() as u64;
        wire::write_extra(&mut extra_buf, extra)?;
        extra_offsets.insert(*id, offset);
    }

    for rec in snapshot.extension_points.values() {
        let offset = main_buf.len() as u64;
        wire::write_extension_point(&mut main_buf, rec)?;
        table_entries.push((rec.id, EntityKind::ExtensionPoint, offset, None));
    }
    for rec in snapshot.extensions.values() {
        let offset = main_buf.len() as u64;
        wire::write_extension(&mut main_buf, rec)?;
        table_entries.push((rec.id, EntityKind::Extension, offset, None));
    }
    for rec in snapshot.config_elements.values() {
        let offset = main_buf.len() as u64;
        wire::write_config_element(&mut main_buf, rec)?;
        let extra_offset = extra_offsets.get(&rec.id).copied();
        table_entries.push((rec.id, rec.kind(), offset, extra_offset));
    }

    let mut table_buf = Vec::new();
    table_buf.extend_from_slice(&stamp.to_le_bytes());
    for (id, kind, main_offset, extra_offset) in &table_entries {
        table_buf.extend_from_slice(&id.to_le_bytes());
        table_buf.push(kind.tag());
        table_buf.extend_from_slice(&(*main_offset as i64).to_le_bytes());
        let extra_raw: i64 = extra_offset.map(|o| o as i64).unwrap_or(-1);
        table_buf.extend_from_slice(&extra_raw.to_le_bytes());
    }

    let mut namespace_buf = Vec::new();
    for (bundle_id, ns) in &snapshot.namespaces {
        wire::write_namespace(&mut namespace_buf, *bundle_id, ns)?;
    }

    atomic_write(&paths.table, &table_buf)?;
    atomic_write(&paths.main, &main_buf)?;
    atomic_write(&paths.extra, &extra_buf)?;
    atomic_write(&paths.namespace, &namespace_buf)?;
    Ok(())
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let tmp_path = path.with_extension(format!(
        "tmp.{}.{}",
        std::process::id(),
        tmp_counter(),
    ));
    {
        let mut file = BufWriter::new(
            fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?,
        );
        file.write_all(bytes)?;
        file.flush()?;
        file.get_ref().sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn tmp_counter() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

mod wire {
    use super::*;

    pub(super) fn write_string(buf: &mut Vec<u8>, s: &str) -> Result<(), CacheError> {
        let bytes = s.as_bytes();
        if bytes.len() > u16::MAX as usize {
            return Err(CacheError::Format("string exceeds u16 length prefix".into()));
        }
        buf.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
        buf.extend_from_slice(bytes);
        Ok(())
    }

    pub(super) fn write_opt_string(buf: &mut Vec<u8>, s: &Option<SmolStr>) -> Result<(), CacheError> {
        match s {
            Some(s) => {
                buf.push(1);
                write_string(buf, s.as_str())?;
            }
            None => buf.push(0),
        }
        Ok(())
    }

    pub(super) fn write_id_array(buf: &mut Vec<u8>, ids: &[Id]) {
        buf.extend_from_slice(&(ids.len() as i32).to_le_bytes());
        for id in ids {
            buf.extend_from_slice(&id.to_le_bytes());
        }
    }

    pub(super) fn read_string<R: Read>(r: &mut R) -> Result<String, CacheError> {
        let mut len_buf = [0u8; 2];
        r.read_exact(&mut len_buf)?;
        let len = u16::from_le_bytes(len_buf) as usize;
        let mut bytes = vec![0u8; len];
        r.read_exact(&mut bytes)?;
        String::from_utf8(bytes).map_err(|e| CacheError::Format(e.to_string()))
    }

    pub(super) fn read_opt_string<R: Read>(r: &mut R) -> Result<Option<SmolStr>, CacheError> {
        let mut flag = [0u8; 1];
        r.read_exact(&mut flag)?;
        if flag[0] == 0 {
            Ok(None)
        } else {
            Ok(Some(SmolStr::new(read_string(r)?)))
        }
    }

    pub(super) fn read_id_array<R: Read>(r: &mut R) -> Result<Vec<Id>, CacheError> {
        let mut len_buf = [0u8; 4];
        r.read_exact(&mut len_buf)?;
        let len = i32::from_le_bytes(len_buf);
        if len < 0 {
            return Err(CacheError::Format("negative array length".into()));
        }
        let mut out = Vec::with_capacity(len as usize);
        for _ in 0..len {
            let mut id_buf = [0u8; 4];
            r.read_exact(&mut id_buf)?;
            out.push(i32::from_le_bytes(id_buf));
        }
        Ok(out)
    }

    pub(super) fn write_extension_point(
        buf: &mut Vec<u8>,
        rec: &ExtensionPointRecord,
    ) -> Result<(), CacheError> {
        buf.push(EntityKind::ExtensionPoint.tag());
        buf.extend_from_slice(&rec.bundle_id.to_le_bytes());
        write_string(buf, rec.unique_identifier.as_str())?;
        write_string(buf, rec.simple_identifier.as_str())?;
        write_opt_string(buf, &rec.schema_reference)?;
        write_opt_string(buf, &rec.label)?;
        write_id_array(buf, &rec.raw_children);
        Ok(())
    }

    pub(super) fn read_extension_point<R: Read>(
        r: &mut R,
        id: Id,
    ) -> Result<ExtensionPointRecord, CacheError> {
        let mut tag = [0u8; 1];
        r.read_exact(&mut tag)?;
        let mut bundle_id_buf = [0u8; 8];
        r.read_exact(&mut bundle_id_buf)?;
        let bundle_id = i64::from_le_bytes(bundle_id_buf);
        let unique_identifier = SmolStr::new(read_string(r)?);
        let simple_identifier = SmolStr::new(read_string(r)?);
        let schema_reference = read_opt_string(r)?;
        let label = read_opt_string(r)?;
        let raw_children = read_id_array(r)?;
        Ok(ExtensionPointRecord {
            id,
            bundle_id,
            unique_identifier,
            simple_identifier,
            schema_reference,
            label,
            raw_children,
        })
    }

    pub(super) fn write_extension(buf: &mut Vec<u8>, rec: &ExtensionRecord) -> Result<(), CacheError> {
        buf.push(EntityKind::Extension.tag());
        buf.extend_from_slice(&rec.bundle_id.to_le_bytes());
        write_opt_string(buf, &rec.simple_identifier)?;
        write_string(buf, rec.extension_point_identifier.as_str())?;
        write_opt_string(buf, &rec.label)?;
        buf.extend_from_slice(&rec.namespace.to_le_bytes());
        write_id_array(buf, &rec.raw_children);
        Ok(())
    }

    pub(super) fn read_extension<R: Read>(r: &mut R, id: Id) -> Result<ExtensionRecord, CacheError> {
        let mut tag = [0u8; 1];
        r.read_exact(&mut tag)?;
        let mut bundle_id_buf = [0u8; 8];
        r.read_exact(&mut bundle_id_buf)?;
        let bundle_id = i64::from_le_bytes(bundle_id_buf);
        let simple_identifier = read_opt_string(r)?;
        let extension_point_identifier = SmolStr::new(read_string(r)?);
        let label = read_opt_string(r)?;
        let mut ns_buf = [0u8; 8];
        r.read_exact(&mut ns_buf)?;
        let namespace = i64::from_le_bytes(ns_buf);
        let raw_children = read_id_array(r)?;
        Ok(ExtensionRecord {
            id,
            bundle_id,
            simple_identifier,
            extension_point_identifier,
            label,
            namespace,
            raw_children,
        })
    }

    pub(super) fn write_config_element(
        buf: &mut Vec<u8>,
        rec: &ConfigurationElementRecord,
    ) -> Result<(), CacheError> {
        buf.push(rec.kind().tag());
        write_string(buf, rec.name.as_str())?;
        write_opt_string(buf, &rec.value)?;
        buf.extend_from_slice(&(rec.attributes.len() as i32).to_le_bytes());
        for (k, v) in &rec.attributes {
            write_string(buf, k.as_str())?;
            write_string(buf, v.as_str())?;
        }
        buf.extend_from_slice(&rec.parent_id.to_le_bytes());
        buf.push(rec.parent_kind.tag());
        write_id_array(buf, &rec.raw_children);
        Ok(())
    }

    pub(super) fn read_config_element<R: Read>(
        r: &mut R,
        id: Id,
        kind: EntityKind,
    ) -> Result<ConfigurationElementRecord, CacheError> {
        let mut tag = [0u8; 1];
        r.read_exact(&mut tag)?;
        let name = SmolStr::new(read_string(r)?);
        let value = read_opt_string(r)?;
        let mut count_buf = [0u8; 4];
        r.read_exact(&mut count_buf)?;
        let count = i32::from_le_bytes(count_buf);
        if count < 0 {
            return Err(CacheError::Format("negative attribute count".into()));
        }
        let mut attributes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let k = SmolStr::new(read_string(r)?);
            let v = SmolStr::new(read_string(r)?);
            attributes.push((k, v));
        }
        let mut parent_id_buf = [0u8; 4];
        r.read_exact(&mut parent_id_buf)?;
        let parent_id = i32::from_le_bytes(parent_id_buf);
        let mut parent_kind_buf = [0u8; 1];
        r.read_exact(&mut parent_kind_buf)?;
        let parent_kind = EntityKind::from_tag(parent_kind_buf[0])
            .ok_or_else(|| CacheError::Format("unknown parent kind tag".into()))?;
        let raw_children = read_id_array(r)?;
        Ok(ConfigurationElementRecord {
            id,
            name,
            value,
            attributes,
            parent_id,
            parent_kind,
            raw_children,
            extra_data_offset: if kind == EntityKind::ThirdLevelConfigurationElement {
                Some(0) // overwritten by caller once the extras offset is known
            } else {
                None
            },
        })
    }

    pub(super) fn write_extra(buf: &mut Vec<u8>, extra: &ExtraData) -> Result<(), CacheError> {
        write_opt_string(buf, &extra.executable_factory)?;
        write_opt_string(buf, &extra.source_location)?;
        Ok(())
    }

    pub(super) fn read_extra<R: Read>(r: &mut R) -> Result<ExtraData, CacheError> {
        Ok(ExtraData {
            executable_factory: read_opt_string(r)?,
            source_location: read_opt_string(r)?,
        })
    }

    pub(super) fn write_namespace(
        buf: &mut Vec<u8>,
        bundle_id: BundleId,
        ns: &NamespaceRecord,
    ) -> Result<(), CacheError> {
        buf.extend_from_slice(&bundle_id.to_le_bytes());
        write_opt_string(buf, &ns.unique_identifier)?;
        write_id_array(buf, &ns.extension_point_ids);
        write_id_array(buf, &ns.extension_ids);
        Ok(())
    }

    pub(super) fn read_namespace<R: Read>(
        r: &mut R,
    ) -> Result<Option<(BundleId, NamespaceRecord)>, CacheError> {
        let mut bundle_id_buf = [0u8; 8];
        match r.read(&mut bundle_id_buf)? {
            0 => return Ok(None),
            8 => {}
            n => {
                // Short read at a record boundary means a truncated file.
                let mut rest = vec![0u8; 8 - n];
                r.read_exact(&mut rest)?;
                bundle_id_buf[n..].copy_from_slice(&rest);
            }
        }
        let bundle_id = i64::from_le_bytes(bundle_id_buf);
        let unique_identifier = read_opt_string(r)?;
        let extension_point_ids = read_id_array(r)?;
        let extension_ids = read_id_array(r)?;
        Ok(Some((
            bundle_id,
            NamespaceRecord {
                bundle_id,
                unique_identifier,
                extension_point_ids,
                extension_ids,
            },
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_matching_rules() {
        assert!(stamp_matches(0, 42));
        assert!(stamp_matches(42, 0));
        assert!(stamp_matches(42, 42));
        assert!(!stamp_matches(42, 7));
    }

    #[test]
    fn round_trip_extension_point() {
        let rec = ExtensionPointRecord {
            id: 3,
            bundle_id: 10,
            unique_identifier: "x.p".into(),
            simple_identifier: "p".into(),
            schema_reference: Some("schema.exsd".into()),
            label: None,
            raw_children: vec![1, 2, 3],
        };
        let mut buf = Vec::new();
        wire::write_extension_point(&mut buf, &rec).unwrap();
        let mut cursor = &buf[..];
        let decoded = wire::read_extension_point(&mut cursor, 3).unwrap();
        assert_eq!(decoded, rec);
    }
}
