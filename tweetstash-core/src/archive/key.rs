use std::fmt;

use chrono::{DateTime, Datelike, TimeZone, Timelike};

const FILE_PREFIX: &str = "tweets_";
const FILE_SUFFIX: &str = ".json";

/// Object key of one flushed batch,
/// `<keyword>/<year>/<month>/<day>/<hour>/<minute>/tweets_<YYYYMMDDHHMMSS>.json`.
/// Path segments are not zero padded, the file name is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveKey {
    key: String,
    file_name_start: usize,
}

impl ArchiveKey {
    /// Builds the key for a flush at `at`, in the time zone `at` carries. The optional `token` is
    /// appended to the file stem to tell apart flushes that land in the same second.
    pub fn new<Tz>(keyword: &str, at: DateTime<Tz>, token: Option<&str>) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        let prefix = format!(
            "{keyword}/{}/{}/{}/{}/{}/",
            at.year(),
            at.month(),
            at.day(),
            at.hour(),
            at.minute()
        );
        let file_name = match token {
            Some(token) => format!(
                "{FILE_PREFIX}{}-{token}{FILE_SUFFIX}",
                at.format("%Y%m%d%H%M%S")
            ),
            None => format!("{FILE_PREFIX}{}{FILE_SUFFIX}", at.format("%Y%m%d%H%M%S")),
        };

        Self {
            file_name_start: prefix.len(),
            key: prefix + &file_name,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn file_name(&self) -> &str {
        self.key.get(self.file_name_start..).unwrap_or_default()
    }

    /// File name without the `.json` extension.
    pub(crate) fn file_stem(&self) -> &str {
        let file_name = self.file_name();
        file_name.strip_suffix(FILE_SUFFIX).unwrap_or(file_name)
    }
}

impl fmt::Display for ArchiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, Utc};

    use super::*;

    #[test]
    fn test_key_layout() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 33).unwrap();
        let key = ArchiveKey::new("go", at, None);

        assert_eq!(key.as_str(), "go/2024/3/5/14/7/tweets_20240305140733.json");
        assert_eq!(key.file_name(), "tweets_20240305140733.json");
        assert_eq!(key.file_stem(), "tweets_20240305140733");
        assert_eq!(key.to_string(), key.as_str());
    }

    #[test]
    fn test_key_with_token() {
        let at = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        let key = ArchiveKey::new("rust", at, Some("abc"));

        assert_eq!(
            key.as_str(),
            "rust/2023/12/31/23/59/tweets_20231231235959-abc.json"
        );
        assert_eq!(key.file_stem(), "tweets_20231231235959-abc");
    }

    #[test]
    fn test_key_uses_wall_clock_of_zone() {
        let utc = Utc.with_ymd_and_hms(2024, 3, 5, 23, 30, 0).unwrap();
        let plus_two = utc.with_timezone(&FixedOffset::east_opt(2 * 3600).unwrap());

        assert_eq!(
            ArchiveKey::new("rust", plus_two, None).as_str(),
            "rust/2024/3/6/1/30/tweets_20240306013000.json"
        );
    }

    #[test]
    fn test_same_second_collides() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            ArchiveKey::new("rust", at, None),
            ArchiveKey::new("rust", at, None)
        );
        assert_ne!(
            ArchiveKey::new("rust", at, Some("a")),
            ArchiveKey::new("rust", at, Some("b"))
        );
    }
}
