//! `COPY ... FROM STDIN` text-format row encoding.

use super::types::DbValue;

/// Appends one tab-separated, newline-terminated row.
pub(crate) fn write_copy_row<'v>(buf: &mut Vec<u8>, values: impl IntoIterator<Item = &'v DbValue>) {
    for (i, value) in values.into_iter().enumerate() {
        if i > 0 {
            buf.push(b'\t');
        }
        write_copy_value(buf, value);
    }
    buf.push(b'\n');
}

fn write_copy_value(buf: &mut Vec<u8>, value: &DbValue) {
    let text = match value {
        v if v.is_null() => {
            buf.extend_from_slice(br"\N");
            return;
        }
        DbValue::Text(Some(s)) => {
            escape_copy_text(buf, s);
            return;
        }
        DbValue::Bytes(Some(b)) => {
            // bytea hex input, with the backslash itself escaped for COPY
            buf.extend_from_slice(br"\\x");
            buf.extend_from_slice(hex::encode(b).as_bytes());
            return;
        }
        DbValue::Bool(Some(b)) => (if *b { "t" } else { "f" }).to_owned(),
        DbValue::Uuid(Some(u)) => u.to_string(),
        DbValue::TimestampTz(Some(dt)) => dt.to_rfc3339(),
        DbValue::Timestamp(Some(dt)) => dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        DbValue::BigInt(Some(n)) => n.to_string(),
        DbValue::Integer(Some(n)) => n.to_string(),
        DbValue::SmallInt(Some(n)) => n.to_string(),
        DbValue::Double(Some(n)) => float_text(*n),
        DbValue::Real(Some(n)) => float_text(f64::from(*n)),
        DbValue::Numeric(Some(d)) => d.to_string(),
        // nulls handled above
        _ => String::from(r"\N"),
    };
    buf.extend_from_slice(text.as_bytes());
}

fn float_text(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        if n.is_sign_positive() {
            "Infinity".to_owned()
        } else {
            "-Infinity".to_owned()
        }
    } else {
        n.to_string()
    }
}

fn escape_copy_text(buf: &mut Vec<u8>, s: &str) {
    for c in s.chars() {
        match c {
            '\\' => buf.extend_from_slice(br"\\"),
            '\t' => buf.extend_from_slice(br"\t"),
            '\n' => buf.extend_from_slice(br"\n"),
            '\r' => buf.extend_from_slice(br"\r"),
            _ => {
                let mut utf8 = [0_u8; 4];
                buf.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
            }
        }
    }
}
