use std::fmt::Display;

// <PREFIX><METRIC_NAME><SUFFIX>:<VALUE>|<TYPE>
//
// Nothing is appended after the type tag. Newer statsd daemons accept
// multiple newline-delimited metrics per packet, so a trailing newline
// would be parsed as a second, empty metric and logged as a bad line.
pub fn write_metric_line<V>(
    buffer: &mut String,
    prefix: &str,
    key: &str,
    suffix: &str,
    value: V,
    mtype: &str,
) where
    V: Display,
{
    buffer.push_str(prefix);
    buffer.push_str(key);
    buffer.push_str(suffix);
    buffer.push(':');
    buffer.push_str(value.to_string().as_str());
    buffer.push('|');
    buffer.push_str(mtype);
}

/// Truncates `text` at the first line terminator.
///
/// Key affixes are often read out of files by the host's configuration
/// language, and file readers tend to append a newline. A terminator inside
/// an affix would split every metric line in two on the wire, so it is
/// stripped when the affix is stored.
pub fn strip_newline(text: &str) -> &str {
    match text.find(|c| c == '\n' || c == '\r') {
        Some(pos) => &text[..pos],
        None => text,
    }
}
