use std::io::Cursor;

use log::debug;

use crate::raster::{TagSet, TagValue};

pub struct ExifExtractor;

impl ExifExtractor {
    /// Reads every EXIF field of an encoded image. A file without EXIF yields
    /// an empty tag set rather than an error.
    pub fn extract(bytes: &[u8]) -> TagSet {
        let mut reader = Cursor::new(bytes);

        let exif_reader = exif::Reader::new();

        match exif_reader.read_from_container(&mut reader) {
            Ok(exif_data) => Self::collect_tags(&exif_data),
            Err(err) => {
                debug!("no EXIF data: {err}");
                TagSet::new()
            }
        }
    }

    fn collect_tags(exif: &exif::Exif) -> TagSet {
        let mut tags = TagSet::new();

        for field in exif.fields() {
            let key = if field.ifd_num == exif::In::PRIMARY {
                format!("{}", field.tag)
            } else {
                format!("IFD{}.{}", field.ifd_num.index(), field.tag)
            };

            let value = match &field.value {
                exif::Value::Ascii(parts) => TagValue::Text(
                    parts
                        .iter()
                        .map(|part| String::from_utf8_lossy(part).into_owned())
                        .collect::<Vec<_>>()
                        .join(" "),
                ),
                exif::Value::Undefined(bytes, _) => TagValue::Binary(bytes.clone()),
                _ => TagValue::Text(field.display_value().to_string()),
            };

            tags.insert(key, value);
        }

        debug!("extracted {} EXIF fields", tags.len());
        tags
    }
}
