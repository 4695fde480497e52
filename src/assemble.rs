//! Cross-variant matching
//!
//! Records are bucketed by the variant directory that holds them, then joined
//! on a derived key: the root-relative path with the variant segment removed
//! and the extension stripped, lowercased. Siblings are found by hash lookup,
//! so assembly is linear in the number of records.
//!
//! ```text
//! <root>/2019/trip/xs/IMG_01.jpg   -> bucket xs, key "2019/trip/img_01"
//! <root>/2019/trip/lg/IMG_01.JPG   -> bucket lg, key "2019/trip/img_01"
//! ```

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use tracing::{info, warn};

use crate::error::PipelineError;
use crate::record::{AssetRecord, MediaRecord, Variant};

/// Two or more files in one bucket sharing a derived key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyConflict {
    pub bucket: String,
    pub key: String,
    pub paths: Vec<PathBuf>,
}

impl KeyConflict {
    pub fn to_error(&self) -> PipelineError {
        PipelineError::DuplicateKey {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            paths: self.paths.clone(),
        }
    }
}

/// Diagnostics produced alongside the assets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssemblyReport {
    /// Files per bucket, in variant order.
    pub bucket_counts: Vec<(String, usize)>,
    /// Files under the root that sit in no variant directory.
    pub unbucketed: usize,
    pub assets: usize,
    pub conflicts: Vec<KeyConflict>,
}

#[derive(Debug, Clone)]
pub struct Assembly<V: Variant> {
    pub assets: Vec<AssetRecord<V>>,
    pub report: AssemblyReport,
}

/// Root-relative path components, as strings.
fn relative_components(root: &Path, path: &Path) -> Vec<String> {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

/// Index of the directory component nearest the file that equals `segment`.
fn segment_position(components: &[String], segment: &str) -> Option<usize> {
    let dirs = components.len().checked_sub(1)?;
    components[..dirs].iter().rposition(|c| c.eq_ignore_ascii_case(segment))
}

fn key_without(components: &[String], position: usize) -> Option<String> {
    let (file, dirs) = components.split_last()?;
    let stem = Path::new(file).file_stem()?.to_string_lossy().into_owned();

    let mut parts: Vec<&str> = dirs.iter()
        .enumerate()
        .filter(|(i, _)| *i != position)
        .map(|(_, c)| c.as_str())
        .collect();
    parts.push(&stem);

    Some(parts.join("/").to_lowercase())
}

/// Derived key of `path` as a member of the bucket named `segment`.
///
/// Returns `None` when no directory component of the root-relative path is
/// `segment`.
pub fn derive_key(root: &Path, path: &Path, segment: &str) -> Option<String> {
    let components = relative_components(root, path);
    let position = segment_position(&components, segment)?;
    key_without(&components, position)
}

/// Bucket and derived key for one path. The variant directory nearest the
/// file wins when several variant names appear in the path.
pub fn classify<V: Variant>(root: &Path, path: &Path) -> Option<(V, String)> {
    let components = relative_components(root, path);
    let dirs = components.len().checked_sub(1)?;

    (0..dirs).rev().find_map(|i| {
        let variant = V::ALL.iter().find(|v| components[i].eq_ignore_ascii_case(v.dir_name()))?;
        Some((*variant, key_without(&components, i)?))
    })
}

/// Path of the sibling rendition: the `from` directory nearest the file
/// becomes `to`, and the extension is replaced when one is given.
pub fn sibling_path(path: &Path, from: &str, to: &str, extension: Option<&str>) -> Option<PathBuf> {
    let parent = path.parent()?;
    let file_name = path.file_name()?;

    let mut dirs: Vec<_> = parent.components().collect();
    let position = dirs.iter().rposition(|c| match c {
        Component::Normal(s) => s.to_string_lossy().eq_ignore_ascii_case(from),
        _ => false,
    })?;
    dirs[position] = Component::Normal(to.as_ref());

    let mut sibling: PathBuf = dirs.iter().collect();
    sibling.push(file_name);
    if let Some(ext) = extension {
        sibling.set_extension(ext);
    }
    Some(sibling)
}

/// Assemble one asset per canonical-bucket record from the complete record set
/// of one media class.
///
/// A sibling missing from its bucket leaves that slot empty. Keys claimed by
/// more than one file in a bucket are reported as conflicts and take part in no
/// match; a conflicting canonical key produces no asset.
pub fn assemble<V: Variant>(root: &Path, records: Vec<MediaRecord>) -> Assembly<V> {
    let mut buckets: Vec<HashMap<String, MediaRecord>> = vec![HashMap::new(); V::ALL.len()];
    let mut counts = vec![0usize; V::ALL.len()];
    let mut duplicates: HashMap<(usize, String), Vec<PathBuf>> = HashMap::new();
    let mut unbucketed = 0;

    for record in records {
        let Some((variant, key)) = classify::<V>(root, &record.path) else {
            unbucketed += 1;
            continue;
        };

        let idx = variant.index();
        counts[idx] += 1;

        match buckets[idx].entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
            Entry::Occupied(existing) => {
                duplicates
                    .entry((idx, existing.key().clone()))
                    .or_insert_with(|| vec![existing.get().path.clone()])
                    .push(record.path);
            }
        }
    }

    let mut conflicts: Vec<KeyConflict> = duplicates.into_iter()
        .map(|((idx, key), mut paths)| {
            buckets[idx].remove(&key);
            paths.sort();
            KeyConflict { bucket: V::ALL[idx].dir_name().to_string(), key, paths }
        })
        .collect();
    conflicts.sort_by(|a, b| (&a.bucket, &a.key).cmp(&(&b.bucket, &b.key)));

    for conflict in &conflicts {
        warn!("{}", conflict.to_error());
    }

    let canonical = V::canonical().index();
    let mut keys: Vec<String> = buckets[canonical].keys().cloned().collect();
    keys.sort();

    let mut assets = Vec::with_capacity(keys.len());
    for key in keys {
        let Some(record) = buckets[canonical].remove(&key) else { continue };
        let mut asset = AssetRecord::<V>::new(record);

        for variant in V::ALL.iter().filter(|v| v.index() != canonical) {
            asset.set(*variant, buckets[variant.index()].remove(&key));
        }
        assets.push(asset);
    }

    let bucket_counts: Vec<(String, usize)> = V::ALL.iter()
        .map(|v| (v.dir_name().to_string(), counts[v.index()]))
        .collect();

    for (name, count) in &bucket_counts {
        info!("{}: {}", name, count);
    }

    let report = AssemblyReport {
        bucket_counts,
        unbucketed,
        assets: assets.len(),
        conflicts,
    };

    Assembly { assets, report }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{PhotoVariant, VideoVariant};

    fn rec(path: &str, size: u64) -> MediaRecord {
        MediaRecord::new(path, size)
    }

    #[test]
    fn test_derive_key_strips_segment_and_extension() {
        let root = Path::new("/srv/images");
        assert_eq!(
            derive_key(root, Path::new("/srv/images/2019/trip/xs/IMG_01.jpg"), "xs").as_deref(),
            Some("2019/trip/img_01")
        );
        assert_eq!(
            derive_key(root, Path::new("/srv/images/2019/trip/LG/img_01.JPG"), "lg").as_deref(),
            Some("2019/trip/img_01")
        );
        assert_eq!(derive_key(root, Path::new("/srv/images/2019/trip/md/a.jpg"), "xs"), None);
    }

    #[test]
    fn test_root_name_is_not_a_segment() {
        // a root that happens to be called "src" must not be treated as the src bucket
        let root = Path::new("/home/me/src");
        let found = classify::<PhotoVariant>(root, Path::new("/home/me/src/2019/xs/a.jpg"));
        assert_eq!(found, Some((PhotoVariant::Xs, "2019/a".to_string())));
    }

    #[test]
    fn test_variant_name_in_file_name_is_ignored() {
        let root = Path::new("/r");
        let found = classify::<PhotoVariant>(root, Path::new("/r/2019/sm/xs.jpg"));
        assert_eq!(found, Some((PhotoVariant::Sm, "2019/xs".to_string())));
    }

    #[test]
    fn test_key_consistent_under_substitution() {
        let root = Path::new("/r");
        let a = Path::new("/r/2020/Party/xs/DSC_1.jpg");
        let b = sibling_path(a, "xs", "prt", Some("tif")).unwrap();
        assert_eq!(b, PathBuf::from("/r/2020/Party/prt/DSC_1.tif"));
        assert_eq!(derive_key(root, a, "xs"), derive_key(root, &b, "prt"));

        let other = Path::new("/r/2020/Party/prt/DSC_2.tif");
        assert_ne!(derive_key(root, a, "xs"), derive_key(root, other, "prt"));
    }

    #[test]
    fn test_sibling_path_keeps_extension_by_default() {
        let raw = Path::new("/movies/2018/raw/clip.MOV");
        assert_eq!(
            sibling_path(raw, "raw", "thumbnails", Some("jpg")),
            Some(PathBuf::from("/movies/2018/thumbnails/clip.jpg"))
        );
        assert_eq!(
            sibling_path(raw, "raw", "full", None),
            Some(PathBuf::from("/movies/2018/full/clip.MOV"))
        );
        assert_eq!(sibling_path(raw, "lg", "xs_sq", None), None);
    }

    #[test]
    fn test_scenario_partial_variants() {
        let root = Path::new("/p");
        let records = vec![
            rec("/p/xs/a.jpg", 500),
            rec("/p/lg/a.jpg", 5000).with_dimensions(1920, 1080),
        ];

        let assembly = assemble::<PhotoVariant>(root, records);
        assert_eq!(assembly.assets.len(), 1);

        let asset = &assembly.assets[0];
        assert_eq!(asset.get(PhotoVariant::Xs).map(|m| m.size), Some(500));
        let lg = asset.get(PhotoVariant::Lg).unwrap();
        assert_eq!(lg.size, 5000);
        assert_eq!((lg.width, lg.height), (Some(1920), Some(1080)));
        assert!(asset.get(PhotoVariant::Sm).is_none());
    }

    #[test]
    fn test_one_asset_per_canonical_file_with_subsets() {
        let root = Path::new("/v");
        let mut records = Vec::new();
        for i in 0..50 {
            records.push(rec(&format!("/v/cat/thumbnails/{}.jpg", i), 10));
            if i % 2 == 0 {
                records.push(rec(&format!("/v/cat/raw/{}.mov", i), 1000));
            }
            if i % 5 == 0 {
                records.push(rec(&format!("/v/cat/scaled/{}.mp4", i), 100));
            }
        }
        // sibling with no canonical counterpart
        records.push(rec("/v/cat/full/orphan.mp4", 1));

        let assembly = assemble::<VideoVariant>(root, records);
        assert_eq!(assembly.assets.len(), 50);

        for asset in &assembly.assets {
            let stem = asset.canonical().unwrap().path.file_stem().unwrap().to_string_lossy().to_string();
            let i: u32 = stem.parse().unwrap();
            assert_eq!(asset.get(VideoVariant::Raw).is_some(), i % 2 == 0);
            assert_eq!(asset.get(VideoVariant::Scaled).is_some(), i % 5 == 0);
            assert!(asset.get(VideoVariant::Full).is_none());
        }

        let counts: HashMap<_, _> = assembly.report.bucket_counts.iter().cloned().collect();
        assert_eq!(counts["thumbnails"], 50);
        assert_eq!(counts["raw"], 25);
        assert_eq!(counts["scaled"], 10);
        assert_eq!(counts["full"], 1);
        assert_eq!(counts["thumb_sq"], 0);
    }

    #[test]
    fn test_duplicate_keys_are_reported_not_merged() {
        let root = Path::new("/v");
        let records = vec![
            rec("/v/thumbnails/a.png", 1),
            rec("/v/thumbnails/a.jpg", 2),
            rec("/v/thumbnails/b.jpg", 3),
            rec("/v/raw/b.mov", 4),
            rec("/v/raw/B.MP4", 5),
        ];

        let assembly = assemble::<VideoVariant>(root, records);
        assert_eq!(assembly.report.conflicts.len(), 2);

        let thumb_conflict = &assembly.report.conflicts.iter().find(|c| c.bucket == "thumbnails").unwrap();
        assert_eq!(thumb_conflict.key, "a");
        assert_eq!(thumb_conflict.paths.len(), 2);
        assert_eq!(thumb_conflict.to_error().kind(), "duplicate_key");

        // "a" is conflicted in the canonical bucket, "b" keeps its asset but no raw slot
        assert_eq!(assembly.assets.len(), 1);
        assert!(assembly.assets[0].get(VideoVariant::Raw).is_none());
    }

    #[test]
    fn test_unbucketed_files_are_counted() {
        let root = Path::new("/p");
        let records = vec![rec("/p/xs/a.jpg", 1), rec("/p/readme.txt", 1), rec("/p/other/a.jpg", 1)];
        let assembly = assemble::<PhotoVariant>(root, records);
        assert_eq!(assembly.report.unbucketed, 2);
        assert_eq!(assembly.assets.len(), 1);
    }
}
