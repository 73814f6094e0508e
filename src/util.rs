//! This module implements utility functions.

use std::fmt;
use std::mem::size_of;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Length in bytes of the fixed timestamp fields stored in the image.
pub const TIMESTAMP_LEN: usize = 16;

/// Returns the current timestamp since the Unix epoch.
pub fn get_timestamp() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System clock panic!")
}

/// Converts a number of days since the Unix epoch into a civil date.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719468;
    let era = z.div_euclid(146097);
    let doe = z.rem_euclid(146097);
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if month <= 2 { year + 1 } else { year }, month, day)
}

/// Formats a Unix timestamp as `YYYY-MM-DD HH:MM`.
pub fn format_timestamp(since_epoch: Duration) -> String {
    let secs = since_epoch.as_secs() as i64;
    let (year, month, day) = civil_from_days(secs.div_euclid(86400));
    let rem = secs.rem_euclid(86400);
    format!(
        "{year:04}-{month:02}-{day:02} {:02}:{:02}",
        rem / 3600,
        rem % 3600 / 60
    )
}

/// The current time, shaped as a fixed timestamp field of the image.
pub fn timestamp_field() -> [u8; TIMESTAMP_LEN] {
    let text = format_timestamp(get_timestamp());
    let mut field = [0; TIMESTAMP_LEN];
    let len = text.len().min(TIMESTAMP_LEN);
    field[..len].copy_from_slice(&text.as_bytes()[..len]);
    field
}

/// Performs the log2 operation on the given integer.
///
/// If the result is undefined, the function returns None.
pub fn log2(n: u64) -> Option<u64> {
    let num_bits = (size_of::<u64>() * 8) as u64;

    let n = num_bits - n.leading_zeros() as u64;
    if n > 0 {
        Some(n - 1)
    } else {
        None
    }
}

/// Structure representing a number of bytes.
pub struct ByteSize(pub u64);

impl fmt::Display for ByteSize {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut order = log2(self.0).unwrap_or(0) / log2(1024).unwrap();

        let suffix = match order {
            0 => "bytes",
            1 => "KiB",
            2 => "MiB",
            3 => "GiB",
            4 => "TiB",
            5 => "PiB",
            6 => "EiB",
            7 => "ZiB",
            8 => "YiB",

            _ => {
                order = 0;
                "bytes"
            }
        };

        let unit = 1024usize.pow(order as u32);
        let nbr = self.0 / unit as u64;

        write!(fmt, "{} {}", nbr, suffix)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bytesize() {
        assert_eq!(format!("{}", ByteSize(0)).as_str(), "0 bytes");
        assert_eq!(format!("{}", ByteSize(1)).as_str(), "1 bytes");
        assert_eq!(format!("{}", ByteSize(1023)).as_str(), "1023 bytes");
        assert_eq!(format!("{}", ByteSize(1024)).as_str(), "1 KiB");
        assert_eq!(format!("{}", ByteSize(1025)).as_str(), "1 KiB");
        assert_eq!(format!("{}", ByteSize(2048)).as_str(), "2 KiB");
        assert_eq!(format!("{}", ByteSize(1024 * 1024)).as_str(), "1 MiB");
        assert_eq!(
            format!("{}", ByteSize(1024 * 1024 * 1024)).as_str(),
            "1 GiB"
        );
        assert_eq!(
            format!("{}", ByteSize(1024 * 1024 * 1024 * 1024)).as_str(),
            "1 TiB"
        );
    }

    #[test]
    fn civil_dates() {
        assert_eq!(format_timestamp(Duration::from_secs(0)), "1970-01-01 00:00");
        // 2004-02-29 12:34, a leap day
        assert_eq!(
            format_timestamp(Duration::from_secs(1078058040)),
            "2004-02-29 12:34"
        );
        assert_eq!(
            format_timestamp(Duration::from_secs(1735689600)),
            "2025-01-01 00:00"
        );
    }

    #[test]
    fn timestamp_field_shape() {
        let field = timestamp_field();
        assert_eq!(field.len(), TIMESTAMP_LEN);
        assert!(field.iter().all(|b| *b != 0));
    }
}
