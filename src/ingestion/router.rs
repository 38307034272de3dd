//! Format detection and lane routing

use crate::error::{Error, Result};
use crate::types::document::{FileFormat, FormatCategory, Lane};

/// Result of routing an incoming file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingDecision {
    pub format: FileFormat,
    pub category: FormatCategory,
    pub lane: Lane,
}

/// Detects format from filename + MIME and assigns the processing lane.
/// MIME wins; the filename extension is the fallback. The size limit comes
/// from the resolved profile and is applied before any I/O.
pub struct FormatRouter;

impl FormatRouter {
    /// Route a file, failing on unknown formats or oversize inputs.
    pub fn route(
        filename: &str,
        mime_type: &str,
        size_bytes: u64,
        max_size_bytes: u64,
    ) -> Result<RoutingDecision> {
        if size_bytes > max_size_bytes {
            return Err(Error::FileTooLarge {
                size: size_bytes,
                limit: max_size_bytes,
            });
        }

        let format = Self::detect(filename, mime_type).ok_or_else(|| {
            Error::UnsupportedFormat(format!("{} ({})", filename, mime_type))
        })?;

        Ok(RoutingDecision {
            format,
            category: format.category(),
            lane: format.lane(),
        })
    }

    /// MIME first, then extension, then a mime_guess lookup on the filename
    /// for clients that send a generic content type.
    pub fn detect(filename: &str, mime_type: &str) -> Option<FileFormat> {
        if let Some(format) = FileFormat::from_mime(mime_type) {
            return Some(format);
        }

        let ext = filename.rsplit('.').next().unwrap_or("");
        if ext != filename {
            if let Some(format) = FileFormat::from_extension(ext) {
                return Some(format);
            }
        }

        mime_guess::from_path(filename)
            .first_raw()
            .and_then(FileFormat::from_mime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_wins_over_extension() {
        // A .bin upload declared as markdown routes as markdown.
        let d = FormatRouter::route("notes.bin", "text/markdown", 10, 1_000).unwrap();
        assert_eq!(d.format, FileFormat::Md);
        assert_eq!(d.lane, Lane::Fast);
    }

    #[test]
    fn extension_fallback_for_generic_mime() {
        let d = FormatRouter::route("report.pdf", "application/octet-stream", 10, 1_000).unwrap();
        assert_eq!(d.format, FileFormat::Pdf);
        assert_eq!(d.category, FormatCategory::Document);
        assert_eq!(d.lane, Lane::Heavy);
    }

    #[test]
    fn size_limit_applies_before_detection() {
        let err = FormatRouter::route("big.pdf", "application/pdf", 2_000, 1_000).unwrap_err();
        assert!(matches!(err, Error::FileTooLarge { size: 2_000, limit: 1_000 }));
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err =
            FormatRouter::route("firmware.bin", "application/octet-stream", 10, 1_000).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn csv_is_tabular_and_heavy() {
        let d = FormatRouter::route("data.csv", "text/csv", 10, 1_000).unwrap();
        assert_eq!(d.category, FormatCategory::Tabular);
        assert_eq!(d.lane, Lane::Heavy);
    }
}
