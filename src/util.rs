use std::path::Path;

use zip::DateTime;

use crate::errors::{ErrorInfo, Result};

/// Text form of a path, for anything that has to leave the process as a string.
pub fn path_to_string(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_owned)
        .ok_or_else(|| ErrorInfo::ConvertPathToStringError {
            path: path.to_owned(),
        })
}

/// Generate a [`NaiveDateTime`] from a [`DateTime`].
///
/// [`NaiveDateTime`]: chrono::NaiveDateTime
fn generate_chrono_datetime(datetime: &DateTime) -> Option<chrono::NaiveDateTime> {
    chrono::NaiveDate::from_ymd_opt(
        datetime.year().into(),
        datetime.month().into(),
        datetime.day().into(),
    )?
    .and_hms_opt(
        datetime.hour().into(),
        datetime.minute().into(),
        datetime.second().into(),
    )
}

/// Zip timestamps carry no zone; they are taken as UTC.
pub fn datetime_to_systemtime(datetime: &DateTime) -> Option<std::time::SystemTime> {
    let t = generate_chrono_datetime(datetime)?;
    let time = chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(t, chrono::Utc);
    Some(time.into())
}
