//! Media and asset records
//!
//! A [`MediaRecord`] describes one file on disk. An [`AssetRecord`] groups the
//! renditions of one logical photo or video, one optional slot per variant.

use std::fmt::Debug;
use std::hash::Hash;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

/// One scanned file. Built once during the scan and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaRecord {
    pub path: PathBuf,
    pub size: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl MediaRecord {
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        Self { path: path.into(), size, width: None, height: None }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }
}

/// A named rendition slot for one media class.
///
/// `ALL` is ordered and starts with the canonical variant, the one used as the
/// enumeration basis during assembly.
pub trait Variant: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    const ALL: &'static [Self];

    /// Directory segment holding this rendition on disk.
    fn dir_name(self) -> &'static str;

    /// Slot/column prefix for this rendition.
    fn slot_name(self) -> &'static str;

    fn index(self) -> usize;

    fn canonical() -> Self {
        Self::ALL[0]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhotoVariant {
    Xs,
    XsSq,
    Sm,
    Md,
    Lg,
    Prt,
    Src,
}

impl Variant for PhotoVariant {
    const ALL: &'static [Self] = &[
        PhotoVariant::Xs,
        PhotoVariant::XsSq,
        PhotoVariant::Sm,
        PhotoVariant::Md,
        PhotoVariant::Lg,
        PhotoVariant::Prt,
        PhotoVariant::Src,
    ];

    fn dir_name(self) -> &'static str {
        self.slot_name()
    }

    fn slot_name(self) -> &'static str {
        match self {
            PhotoVariant::Xs => "xs",
            PhotoVariant::XsSq => "xs_sq",
            PhotoVariant::Sm => "sm",
            PhotoVariant::Md => "md",
            PhotoVariant::Lg => "lg",
            PhotoVariant::Prt => "prt",
            PhotoVariant::Src => "src",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoVariant {
    Thumb,
    ThumbSq,
    Scaled,
    Full,
    Raw,
}

impl Variant for VideoVariant {
    const ALL: &'static [Self] = &[
        VideoVariant::Thumb,
        VideoVariant::ThumbSq,
        VideoVariant::Scaled,
        VideoVariant::Full,
        VideoVariant::Raw,
    ];

    fn dir_name(self) -> &'static str {
        match self {
            VideoVariant::Thumb => "thumbnails",
            other => other.slot_name(),
        }
    }

    fn slot_name(self) -> &'static str {
        match self {
            VideoVariant::Thumb => "thumb",
            VideoVariant::ThumbSq => "thumb_sq",
            VideoVariant::Scaled => "scaled",
            VideoVariant::Full => "full",
            VideoVariant::Raw => "raw",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// GPS fix in decimal degrees with hemisphere reference letters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GpsFix {
    pub latitude: Option<f64>,
    pub latitude_ref: Option<char>,
    pub longitude: Option<f64>,
    pub longitude_ref: Option<char>,
}

/// One logical asset reconstructed from its renditions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetRecord<V: Variant> {
    /// Database identity, unknown until matched against the store.
    pub id: Option<i64>,
    pub category_id: Option<i64>,
    pub created: Option<DateTime<FixedOffset>>,
    pub gps: GpsFix,
    slots: Vec<Option<MediaRecord>>,
    #[serde(skip)]
    _variant: std::marker::PhantomData<V>,
}

pub type PhotoAsset = AssetRecord<PhotoVariant>;
pub type VideoAsset = AssetRecord<VideoVariant>;

impl<V: Variant> AssetRecord<V> {
    /// New asset with only the canonical slot filled.
    pub fn new(canonical: MediaRecord) -> Self {
        let mut slots = vec![None; V::ALL.len()];
        slots[V::canonical().index()] = Some(canonical);
        Self {
            id: None,
            category_id: None,
            created: None,
            gps: GpsFix::default(),
            slots,
            _variant: std::marker::PhantomData,
        }
    }

    pub fn get(&self, variant: V) -> Option<&MediaRecord> {
        self.slots[variant.index()].as_ref()
    }

    pub fn set(&mut self, variant: V, record: Option<MediaRecord>) {
        self.slots[variant.index()] = record;
    }

    /// The canonical rendition; always present for assembled assets.
    pub fn canonical(&self) -> Option<&MediaRecord> {
        self.get(V::canonical())
    }

    /// Iterate slots in declaration order.
    pub fn slots(&self) -> impl Iterator<Item = (V, Option<&MediaRecord>)> + '_ {
        V::ALL.iter().map(move |v| (*v, self.get(*v)))
    }

    pub fn populated(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}
