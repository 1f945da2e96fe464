//! `Range: bytes=...` handling. Only a single range is supported.

/// What to send for a file of a given size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// No usable range header: send everything with `200`.
    Full,
    /// Inclusive span, sent with `206`.
    Partial { start: u64, end: u64 },
    /// Send `416` with `Content-Range: bytes */size`.
    Unsatisfiable,
}

impl ByteRange {
    /// Interpret an optional `Range` header against a file of `size` bytes.
    ///
    /// Malformed headers and multi-range requests fall back to [`ByteRange::Full`].
    pub fn parse(header: Option<&str>, size: u64) -> Self {
        let Some(ranges) = header.and_then(|h| h.trim().strip_prefix("bytes=")) else {
            return ByteRange::Full;
        };
        if ranges.contains(',') {
            return ByteRange::Full;
        }
        let Some((start, end)) = ranges.trim().split_once('-') else {
            return ByteRange::Full;
        };
        let (start, end) = (start.trim(), end.trim());

        if start.is_empty() {
            // Suffix form: the last `n` bytes.
            let Ok(n) = end.parse::<u64>() else {
                return ByteRange::Full;
            };
            if n == 0 || size == 0 {
                return ByteRange::Unsatisfiable;
            }
            return ByteRange::Partial {
                start: size.saturating_sub(n),
                end: size - 1,
            };
        }

        let Ok(start) = start.parse::<u64>() else {
            return ByteRange::Full;
        };
        let end = if end.is_empty() {
            size.saturating_sub(1)
        } else {
            match end.parse::<u64>() {
                Ok(end) => end.min(size.saturating_sub(1)),
                Err(_) => return ByteRange::Full,
            }
        };

        if start >= size || start > end {
            return ByteRange::Unsatisfiable;
        }
        ByteRange::Partial { start, end }
    }
}
