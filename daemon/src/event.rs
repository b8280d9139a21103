use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::path::Path;

use chrono::{DateTime, Local};

/// Bitmask naming what just happened in a camera pipeline.
///
/// A dispatch carries one tag value; a handler registration may cover several
/// bits and fires whenever the two intersect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventTag(u32);

impl EventTag {
    /// A still image or movie file was created.
    pub const FILE_CREATE: Self = Self(1);
    /// A frame with motion was processed.
    pub const MOTION: Self = Self(1 << 1);
    /// First motion frame of an episode.
    pub const FIRST_MOTION: Self = Self(1 << 2);
    /// The episode ended (event gap elapsed or pipeline stopping).
    pub const END_MOTION: Self = Self(1 << 3);
    /// The pipeline is shutting down.
    pub const STOP: Self = Self(1 << 4);
    /// Timelapse frame is due.
    pub const TIMELAPSE: Self = Self(1 << 5);
    /// The current timelapse movie should be finalized.
    pub const TIMELAPSE_END: Self = Self(1 << 6);
    /// Frame for the live feed.
    pub const WEBCAM: Self = Self(1 << 7);
    /// Frame accepted as part of a motion episode.
    pub const IMAGE_DETECTED: Self = Self(1 << 8);
    /// Motion-image counterpart of `IMAGE_DETECTED`.
    pub const IMAGEM_DETECTED: Self = Self(1 << 9);
    /// A snapshot was requested.
    pub const IMAGE_SNAPSHOT: Self = Self(1 << 10);
    /// Every captured frame (pass-through pipe).
    pub const IMAGE: Self = Self(1 << 11);
    /// Every motion image (motion pass-through pipe).
    pub const IMAGEM: Self = Self(1 << 12);
    /// A movie file was finalized.
    pub const FILE_CLOSE: Self = Self(1 << 13);

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True when at least one bit is shared with `other`.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for EventTag {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for EventTag {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Bitmask classifying the artifact a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileType(u32);

impl FileType {
    pub const NONE: Self = Self(0);
    pub const IMAGE: Self = Self(1);
    pub const IMAGE_SNAPSHOT: Self = Self(1 << 1);
    pub const IMAGE_MOTION: Self = Self(1 << 2);
    pub const MOVIE: Self = Self(1 << 3);
    pub const MOVIE_MOTION: Self = Self(1 << 4);
    pub const MOVIE_TIMELAPSE: Self = Self(1 << 5);

    pub const IMAGE_ANY: Self = Self(Self::IMAGE.0 | Self::IMAGE_SNAPSHOT.0 | Self::IMAGE_MOTION.0);
    pub const MOVIE_ANY: Self = Self(Self::MOVIE.0 | Self::MOVIE_MOTION.0 | Self::MOVIE_TIMELAPSE.0);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for FileType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payload handed unchanged to every matching handler.
///
/// The frame is borrowed from the caller and only valid for the duration of the
/// dispatch; handlers that need the bytes later must copy them.
#[derive(Debug, Clone, Copy)]
pub struct Notification<'a> {
    pub tag: EventTag,
    pub frame: Option<&'a [u8]>,
    pub filename: Option<&'a Path>,
    pub file_type: FileType,
    pub time: Option<DateTime<Local>>,
}

impl<'a> Notification<'a> {
    pub fn new(tag: EventTag) -> Self {
        Self {
            tag,
            frame: None,
            filename: None,
            file_type: FileType::NONE,
            time: None,
        }
    }

    pub fn with_frame(mut self, frame: &'a [u8]) -> Self {
        self.frame = Some(frame);
        self
    }

    pub fn with_file(mut self, filename: &'a Path, file_type: FileType) -> Self {
        self.filename = Some(filename);
        self.file_type = file_type;
        self
    }

    pub fn at(mut self, time: DateTime<Local>) -> Self {
        self.time = Some(time);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_values_are_stable() {
        assert_eq!(EventTag::FILE_CREATE.bits(), 1);
        assert_eq!(EventTag::FIRST_MOTION.bits(), 4);
        assert_eq!(EventTag::END_MOTION.bits(), 8);
        assert_eq!(EventTag::IMAGE_DETECTED.bits(), 256);
        assert_eq!(EventTag::FILE_CLOSE.bits(), 8192);
    }

    #[test]
    fn combined_tag_intersects_each_member() {
        let mask = EventTag::IMAGE | EventTag::IMAGEM;
        assert!(EventTag::IMAGE.intersects(mask));
        assert!(EventTag::IMAGEM.intersects(mask));
        assert!(!EventTag::IMAGE_DETECTED.intersects(mask));
    }

    #[test]
    fn file_type_groups_cover_their_members() {
        for ft in [FileType::IMAGE, FileType::IMAGE_SNAPSHOT, FileType::IMAGE_MOTION] {
            assert!(ft.intersects(FileType::IMAGE_ANY));
            assert!(!ft.intersects(FileType::MOVIE_ANY));
        }
        for ft in [FileType::MOVIE, FileType::MOVIE_MOTION, FileType::MOVIE_TIMELAPSE] {
            assert!(ft.intersects(FileType::MOVIE_ANY));
            assert!(!ft.intersects(FileType::IMAGE_ANY));
        }
    }

    #[test]
    fn builder_sets_payload_fields() {
        let frame = [1u8, 2, 3];
        let path = Path::new("/tmp/a.jpg");
        let n = Notification::new(EventTag::FILE_CREATE)
            .with_frame(&frame)
            .with_file(path, FileType::IMAGE);
        assert_eq!(n.tag, EventTag::FILE_CREATE);
        assert_eq!(n.frame, Some(&frame[..]));
        assert_eq!(n.filename, Some(path));
        assert_eq!(n.file_type, FileType::IMAGE);
        assert!(n.time.is_none());
    }
}
